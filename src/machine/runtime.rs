// src/machine/runtime.rs

use std::fmt;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

use crate::errors::Result;
use crate::message::Message;
use crate::queue::{EnqueueOutcome, StoreHandle};
use crate::sheet::SheetId;

use super::cadence::next_cycle_delay;
use super::core::MachineCore;
use super::handle::MachineHandle;
use super::{MachineEffect, MachineNotification, MachineSnapshot, MachineState, now_ms};

pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Requests answered by the runtime task.
#[derive(Debug)]
pub(crate) enum MachineRequest {
    Start(Reply<MachineState>),
    Stop(Reply<MachineState>),
    Pause(Reply<MachineState>),
    Step(Reply<bool>),
    Snapshot(Reply<MachineSnapshot>),
    Put {
        sheet: SheetId,
        message: Message,
        reply: Reply<Result<()>>,
    },
    Execute {
        sheet: SheetId,
        message: Option<Message>,
        reply: Reply<Result<bool>>,
    },
    SetCycleTime {
        cycletime_ms: u64,
        reply: Reply<Result<()>>,
    },
    PauseSheet {
        sheet: SheetId,
        reply: Reply<Result<bool>>,
    },
    ResumeSheet {
        sheet: SheetId,
        reply: Reply<Result<bool>>,
    },
    StopSheet {
        sheet: SheetId,
        reply: Reply<Result<bool>>,
    },
    Outbox(Reply<Vec<Message>>),
    ClearOutbox(Reply<usize>),
}

/// Everything that can wake the runtime.
#[derive(Debug)]
pub(crate) enum MachineEvent {
    Request(MachineRequest),
    /// Payload delivered by the queue store.
    Delivered { sheet: SheetId, payload: String },
    /// Store reply to an acknowledge or enqueue.
    QueueBacklog { sheet: SheetId, len: usize },
    Shutdown,
}

/// Async shell around [`MachineCore`].
///
/// A single task owns the core. It waits on three things at once:
/// - events (requests, queue deliveries, store replies)
/// - the one cycle deadline, if armed
/// - pending out-of-cycle drains
///
/// Store round-trips never block a step: acknowledgements and enqueues are
/// spawned and report back through `QueueBacklog` events.
pub struct MachineRuntime {
    core: MachineCore,
    events_rx: mpsc::Receiver<MachineEvent>,
    /// Weak, so the loop ends once every handle is dropped.
    events_tx: mpsc::WeakSender<MachineEvent>,
    notifications: broadcast::Sender<MachineNotification>,
    store: Option<StoreHandle>,
    deadline: Option<Instant>,
}

impl fmt::Debug for MachineRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineRuntime")
            .field("core", &self.core)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl MachineRuntime {
    /// Build a runtime and the handle that drives it.
    pub fn new(core: MachineCore, store: Option<StoreHandle>) -> (Self, MachineHandle) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (notifications, _) = broadcast::channel(1024);
        let weak_tx = events_tx.downgrade();
        let handle = MachineHandle::new(events_tx, notifications.clone());
        let runtime = Self {
            core,
            events_rx,
            events_tx: weak_tx,
            notifications,
            store,
            deadline: None,
        };
        (runtime, handle)
    }

    /// Spawn the runtime onto the current tokio runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    /// Main loop. Returns after a shutdown request or once every handle is
    /// gone.
    pub async fn run(mut self) -> Result<()> {
        info!(machine = %self.core.id(), name = %self.core.name(), "machine runtime started");
        self.subscribe_queues().await?;

        loop {
            let deadline = self.deadline;
            let drain_pending = self.core.has_pending_drains();

            tokio::select! {
                biased;

                event = self.events_rx.recv() => {
                    match event {
                        Some(MachineEvent::Shutdown) => {
                            info!(machine = %self.core.id(), "shutdown requested");
                            break;
                        }
                        Some(event) => self.handle_event(event),
                        None => {
                            info!("machine event channel closed; exiting");
                            break;
                        }
                    }
                }

                _ = wait_for(deadline) => {
                    self.deadline = None;
                    self.run_cycle();
                }

                _ = tokio::task::yield_now(), if drain_pending => {
                    self.core.run_drain(now_ms());
                    self.apply_effects();
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn subscribe_queues(&mut self) -> Result<()> {
        let bindings = self.core.queue_bindings();
        if bindings.is_empty() {
            return Ok(());
        }
        let Some(store) = self.store.clone() else {
            warn!(
                machine = %self.core.id(),
                "sheets are bound to queues but no store is attached; deliveries disabled"
            );
            return Ok(());
        };

        for (sheet, keys) in bindings {
            let mut rx = store.subscribe(keys.clone()).await?;
            let tx = self.events_tx.clone();
            debug!(sheet = %sheet, queue = %keys, "forwarding queue deliveries");
            tokio::spawn(async move {
                while let Some(payload) = rx.recv().await {
                    let Some(tx) = tx.upgrade() else {
                        break;
                    };
                    let event = MachineEvent::Delivered {
                        sheet: sheet.clone(),
                        payload,
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                trace!(sheet = %sheet, "queue forwarder finished");
            });
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        if self.core.state() != MachineState::Stopped {
            // Forced: a second stop skips WillStop.
            self.core.stop();
            self.core.stop();
        }
        self.apply_effects();

        if let Some(store) = self.store.clone() {
            for (_, keys) in self.core.queue_bindings() {
                if let Err(e) = store.unsubscribe(keys).await {
                    debug!(error = %e, "unsubscribe failed during shutdown");
                }
            }
        }
        info!(machine = %self.core.id(), "machine runtime exiting");
    }

    fn run_cycle(&mut self) {
        let started = Instant::now();
        self.core.cycle(now_ms());
        self.apply_effects();

        if self.core.state().is_cycling() && self.deadline.is_none() {
            let delay = next_cycle_delay(
                self.core.cycletime(),
                started.elapsed(),
                self.core.is_regulated(),
            );
            self.deadline = Some(Instant::now() + delay);
        }
    }

    fn handle_event(&mut self, event: MachineEvent) {
        match event {
            MachineEvent::Request(request) => self.handle_request(request),
            MachineEvent::Delivered { sheet, payload } => {
                if let Err(e) = self.core.deliver(&sheet, &payload) {
                    warn!(sheet = %sheet, error = %e, "delivery for unknown sheet");
                }
            }
            MachineEvent::QueueBacklog { sheet, len } => {
                self.core.set_queue_backlog(&sheet, len);
            }
            MachineEvent::Shutdown => {}
        }
        self.apply_effects();
    }

    fn handle_request(&mut self, request: MachineRequest) {
        trace!(?request, "machine request");
        // Callers that stopped waiting are not an error.
        match request {
            MachineRequest::Start(reply) => {
                let _ = reply.send(self.core.start(now_ms()));
            }
            MachineRequest::Stop(reply) => {
                let _ = reply.send(self.core.stop());
            }
            MachineRequest::Pause(reply) => {
                let _ = reply.send(self.core.pause());
            }
            MachineRequest::Step(reply) => {
                let _ = reply.send(self.core.manual_step(now_ms()));
            }
            MachineRequest::Snapshot(reply) => {
                let _ = reply.send(self.core.snapshot());
            }
            MachineRequest::Put {
                sheet,
                message,
                reply,
            } => {
                let _ = reply.send(self.core.put_message(&sheet, message));
            }
            MachineRequest::Execute {
                sheet,
                message,
                reply,
            } => {
                let _ = reply.send(self.core.execute(&sheet, message, now_ms()));
            }
            MachineRequest::SetCycleTime {
                cycletime_ms,
                reply,
            } => {
                let _ = reply.send(self.core.set_cycletime(cycletime_ms));
            }
            MachineRequest::PauseSheet { sheet, reply } => {
                let _ = reply.send(self.core.pause_sheet(&sheet));
            }
            MachineRequest::ResumeSheet { sheet, reply } => {
                let _ = reply.send(self.core.resume_sheet(&sheet));
            }
            MachineRequest::StopSheet { sheet, reply } => {
                let _ = reply.send(self.core.stop_sheet(&sheet));
            }
            MachineRequest::Outbox(reply) => {
                let _ = reply.send(self.core.outbox().messages().cloned().collect());
            }
            MachineRequest::ClearOutbox(reply) => {
                let _ = reply.send(self.core.clear_outbox());
            }
        }
    }

    fn apply_effects(&mut self) {
        for effect in self.core.take_effects() {
            match effect {
                MachineEffect::ScheduleCycle { delay } => {
                    self.deadline = Some(Instant::now() + delay);
                }
                MachineEffect::CancelCycle => {
                    self.deadline = None;
                }
                MachineEffect::Acknowledge { sheet, queue } => self.acknowledge(sheet, queue),
                MachineEffect::Enqueue {
                    sheet,
                    queue,
                    message,
                } => self.enqueue(sheet, queue, message),
                MachineEffect::Notify(notification) => {
                    // No subscribers is fine.
                    let _ = self.notifications.send(notification);
                }
            }
        }
    }

    fn acknowledge(&self, sheet: SheetId, queue: String) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let Some(tx) = self.events_tx.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            match store.acknowledge(&queue).await {
                Ok(len) => {
                    let _ = tx.send(MachineEvent::QueueBacklog { sheet, len }).await;
                }
                Err(e) => warn!(queue = %queue, error = %e, "acknowledge failed"),
            }
        });
    }

    fn enqueue(&self, sheet: SheetId, queue: String, message: Message) {
        let Some(store) = self.store.clone() else {
            warn!(sheet = %sheet, "no queue store attached; put dropped");
            return;
        };
        let Some(tx) = self.events_tx.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let payload = match message.to_json_string() {
                Ok(p) => p,
                Err(e) => {
                    warn!(sheet = %sheet, error = %e, "could not encode message for queue");
                    return;
                }
            };
            match store.enqueue(&queue, payload).await {
                Ok(EnqueueOutcome::Buffered(len)) => {
                    let _ = tx.send(MachineEvent::QueueBacklog { sheet, len }).await;
                }
                Ok(EnqueueOutcome::Dropped) => {
                    debug!(sheet = %sheet, queue = %queue, "queue saturated; put dropped");
                }
                Ok(EnqueueOutcome::Delivered) => {}
                Err(e) => warn!(queue = %queue, error = %e, "enqueue failed"),
            }
        });
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
