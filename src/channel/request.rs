// src/channel/request.rs

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::ChannelError;

pub type RequestId = String;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(20_000);

type Completion = oneshot::Sender<Result<Value, ChannelError>>;

#[derive(Debug)]
struct PendingRequest {
    tx: Completion,
    timer: JoinHandle<()>,
}

type PendingMap = Arc<Mutex<HashMap<RequestId, PendingRequest>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<RequestId, PendingRequest>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn new_request_id() -> RequestId {
    uuid::Uuid::new_v4().to_string()
}

/// Correlates responses to outstanding requests.
///
/// Every request owns exactly one map entry and one timeout task. Whichever
/// of response, timeout or dispose gets to the entry first removes it and
/// completes the caller; the others find nothing and do nothing.
#[derive(Debug, Clone, Default)]
pub struct RequestHandler {
    pending: PendingMap,
    disposed: Arc<AtomicBool>,
}

impl RequestHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Register a request, hand its id to `send` and wait for the outcome.
    ///
    /// `id` defaults to a fresh uuid. A send failure removes the entry before
    /// returning.
    pub async fn request<F, Fut>(
        &self,
        id: Option<RequestId>,
        timeout: Duration,
        send: F,
    ) -> Result<Value, ChannelError>
    where
        F: FnOnce(RequestId) -> Fut,
        Fut: Future<Output = Result<(), ChannelError>>,
    {
        let id = id.unwrap_or_else(new_request_id);
        let (tx, rx) = oneshot::channel();

        {
            // Checked under the lock so a concurrent dispose either sees the
            // entry or this call sees the flag.
            let mut pending = lock(&self.pending);
            if self.is_disposed() {
                return Err(ChannelError::Disposed);
            }
            if pending.contains_key(&id) {
                return Err(ChannelError::Send(format!("request id {id} is already pending")));
            }
            let timer = spawn_timeout(Arc::clone(&self.pending), id.clone(), timeout);
            pending.insert(id.clone(), PendingRequest { tx, timer });
        }
        trace!(request_id = %id, timeout_ms = timeout.as_millis() as u64, "request registered");

        if let Err(e) = send(id.clone()).await {
            if let Some(entry) = lock(&self.pending).remove(&id) {
                entry.timer.abort();
            }
            debug!(request_id = %id, error = %e, "request send failed");
            return Err(e);
        }

        rx.await.unwrap_or(Err(ChannelError::Disposed))
    }

    /// Complete request `id`. Returns `false` if nothing was pending.
    pub fn settle(&self, id: &str, outcome: Result<Value, ChannelError>) -> bool {
        let Some(entry) = lock(&self.pending).remove(id) else {
            trace!(request_id = id, "no pending request; ignoring response");
            return false;
        };
        entry.timer.abort();
        // Caller may have given up waiting.
        let _ = entry.tx.send(outcome);
        true
    }

    /// Complete request `id` from a response frame's `result`/`error` pair.
    pub fn handle_response(&self, id: &str, result: Option<Value>, error: Option<String>) -> bool {
        match error {
            Some(message) => self.settle(id, Err(ChannelError::Remote(message))),
            None => self.settle(id, Ok(result.unwrap_or(Value::Null))),
        }
    }

    /// Reject every pending request and refuse new ones. Returns how many
    /// requests were rejected.
    pub fn dispose(&self) -> usize {
        let drained: Vec<_> = {
            let mut pending = lock(&self.pending);
            self.disposed.store(true, Ordering::SeqCst);
            pending.drain().collect()
        };
        let n = drained.len();
        for (id, entry) in drained {
            entry.timer.abort();
            trace!(request_id = %id, "rejecting pending request on dispose");
            let _ = entry.tx.send(Err(ChannelError::Disposed));
        }
        if n > 0 {
            debug!(rejected = n, "request handler disposed");
        }
        n
    }
}

fn spawn_timeout(pending: PendingMap, id: RequestId, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let entry = lock(&pending).remove(&id);
        if let Some(entry) = entry {
            let timeout_ms = timeout.as_millis() as u64;
            warn!(request_id = %id, timeout_ms, "request timed out");
            let _ = entry.tx.send(Err(ChannelError::Timeout { id, timeout_ms }));
        }
    })
}
