// src/channel/broker.rs

//! Request/response on top of a publish-only broker client.
//!
//! The request id travels in `payload.metadata.requestId`; a response is any
//! inbound `(topic, payload)` carrying a known id in the same field. A
//! `metadata.error` entry marks the response as failed.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::trace;

use super::ChannelError;
use super::request::{DEFAULT_REQUEST_TIMEOUT, RequestHandler};

/// Opaque broker connection. Only publishing is required here; inbound
/// traffic is fed to [`BrokerRequests::handle_message`] by whoever owns the
/// subscription.
pub trait BrokerClient: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>>;
}

pub struct BrokerRequests<C: BrokerClient> {
    client: C,
    handler: RequestHandler,
    timeout: Duration,
}

impl<C: BrokerClient> fmt::Debug for BrokerRequests<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerRequests")
            .field("handler", &self.handler)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<C: BrokerClient> BrokerRequests<C> {
    pub fn new(client: C) -> Self {
        Self::with_timeout(client, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(client: C, timeout: Duration) -> Self {
        Self {
            client,
            handler: RequestHandler::new(),
            timeout,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn pending_count(&self) -> usize {
        self.handler.pending_count()
    }

    /// Publish `payload` on `topic` and wait for the correlated response.
    pub async fn request(&self, topic: &str, payload: Value) -> Result<Value, ChannelError> {
        let mut payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };

        self.handler
            .request(None, self.timeout, |id| {
                let metadata = payload
                    .entry("metadata")
                    .or_insert_with(|| Value::Object(Map::new()));
                if !metadata.is_object() {
                    *metadata = Value::Object(Map::new());
                }
                if let Some(meta) = metadata.as_object_mut() {
                    meta.insert("requestId".to_string(), Value::String(id));
                }
                self.client.publish(topic, Value::Object(payload))
            })
            .await
    }

    /// Offer an inbound broker message. Returns `true` if it completed a
    /// pending request.
    pub fn handle_message(&self, topic: &str, payload: &Value) -> bool {
        let Some(metadata) = payload.get("metadata") else {
            return false;
        };
        let Some(id) = metadata.get("requestId").and_then(Value::as_str) else {
            return false;
        };
        trace!(topic, request_id = id, "broker response received");

        match metadata.get("error") {
            Some(err) if !err.is_null() => {
                let message = match err {
                    Value::String(s) => s.clone(),
                    other => other
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| other.to_string()),
                };
                self.handler.settle(id, Err(ChannelError::Remote(message)))
            }
            _ => self.handler.settle(id, Ok(payload.clone())),
        }
    }

    pub fn dispose(&self) -> usize {
        self.handler.dispose()
    }
}
