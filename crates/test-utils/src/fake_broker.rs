use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use streamsheets::channel::{BrokerClient, ChannelError};
use tracing::debug;

/// A fake broker that records every publish.
#[derive(Debug, Clone, Default)]
pub struct FakeBroker {
    published: Arc<Mutex<Vec<(String, Value)>>>,
    fail_publish: bool,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker whose publishes always fail.
    pub fn failing() -> Self {
        Self {
            fail_publish: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }

    /// `metadata.requestId` of the n-th published payload.
    pub fn request_id(&self, n: usize) -> Option<String> {
        self.published
            .lock()
            .unwrap()
            .get(n)
            .and_then(|(_, p)| p.pointer("/metadata/requestId"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl BrokerClient for FakeBroker {
    fn publish(
        &self,
        topic: &str,
        payload: Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            if self.fail_publish {
                debug!(topic = %topic, "fake broker rejecting publish");
                return Err(ChannelError::Send("broker unavailable".to_string()));
            }
            self.published.lock().unwrap().push((topic, payload));
            Ok(())
        })
    }
}
