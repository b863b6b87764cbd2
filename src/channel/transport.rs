// src/channel/transport.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::ChannelError;

/// Outbound half of a transport with two switches:
///
/// - `active`: the owner still wants to talk (cleared on close)
/// - `available`: the peer can currently receive (cleared when the transport
///   goes away)
///
/// Sends while either switch is off are suppressed and report `Ok(false)`.
#[derive(Debug, Clone)]
pub struct Channel {
    tx: mpsc::Sender<Value>,
    active: Arc<AtomicBool>,
    available: Arc<AtomicBool>,
}

impl Channel {
    pub fn new(tx: mpsc::Sender<Value>) -> Self {
        Self {
            tx,
            active: Arc::new(AtomicBool::new(true)),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.set_active(false);
    }

    /// Send one frame. `Ok(false)` means the send was suppressed.
    pub async fn send(&self, frame: Value) -> Result<bool, ChannelError> {
        if !self.is_active() || !self.is_available() {
            trace!("channel inactive or unavailable; frame suppressed");
            return Ok(false);
        }
        self.tx.send(frame).await.map_err(|_| {
            self.set_available(false);
            ChannelError::Closed
        })?;
        Ok(true)
    }
}

/// JSON-lines transport over a reader/writer pair.
#[derive(Debug)]
pub struct LineTransport {
    pub channel: Channel,
    /// Parsed inbound frames. Closes when the reader hits EOF.
    pub inbound: mpsc::Receiver<Value>,
    pub reader_task: JoinHandle<()>,
    pub writer_task: JoinHandle<()>,
}

/// Spawn reader and writer tasks for a JSON-lines peer.
pub fn spawn_line_transport<R, W>(reader: R, writer: W) -> LineTransport
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::channel::<Value>(64);
    let (in_tx, in_rx) = mpsc::channel::<Value>(64);
    let channel = Channel::new(out_tx);

    // The tasks only flip availability; holding a sender here would keep the
    // writer alive after the last `Channel` is dropped.
    let writer_available = Arc::clone(&channel.available);
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(frame) = out_rx.recv().await {
            let mut line = frame.to_string();
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                warn!(error = %e, "transport write failed; marking channel unavailable");
                writer_available.store(false, Ordering::SeqCst);
                break;
            }
            if let Err(e) = writer.flush().await {
                warn!(error = %e, "transport flush failed; marking channel unavailable");
                writer_available.store(false, Ordering::SeqCst);
                break;
            }
        }
        debug!("transport writer finished");
    });

    let reader_available = Arc::clone(&channel.available);
    let reader_task = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(line) {
                        Ok(frame) => {
                            if in_tx.send(frame).await.is_err() {
                                debug!("inbound receiver dropped; stopping reader");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "malformed inbound frame; dropping");
                        }
                    }
                }
                Ok(None) => {
                    debug!("transport reached EOF");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "transport read failed");
                    break;
                }
            }
        }
        reader_available.store(false, Ordering::SeqCst);
    });

    LineTransport {
        channel,
        inbound: in_rx,
        reader_task,
        writer_task,
    }
}
