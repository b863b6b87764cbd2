// src/queue/actor.rs

//! Store actor: the only task that touches [`QueueStore`].

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::channel::ChannelError;
use crate::errors::Result;

use super::QueueKeys;
use super::store::{EnqueueOutcome, QueueStats, QueueStore};

#[derive(Debug)]
enum StoreCommand {
    Enqueue {
        queue: String,
        payload: String,
        reply: oneshot::Sender<EnqueueOutcome>,
    },
    Acknowledge {
        queue: String,
        reply: oneshot::Sender<usize>,
    },
    Subscribe {
        keys: QueueKeys,
        reply: oneshot::Sender<mpsc::UnboundedReceiver<String>>,
    },
    Unsubscribe {
        keys: QueueKeys,
        reply: oneshot::Sender<()>,
    },
    Members {
        source: String,
        reply: oneshot::Sender<Vec<String>>,
    },
    Stats {
        queue: String,
        reply: oneshot::Sender<QueueStats>,
    },
}

/// Cloneable handle to the store actor.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

/// Spawn the store actor. It runs until every handle is dropped.
pub fn spawn_store(store: QueueStore) -> StoreHandle {
    let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

    tokio::spawn(async move {
        let mut store = store;
        info!(max_buffer_size = store.max_buffer_size(), "queue store started");

        while let Some(cmd) = rx.recv().await {
            handle_command(&mut store, cmd);
        }

        info!("queue store finished (all handles dropped)");
    });

    StoreHandle { tx }
}

fn handle_command(store: &mut QueueStore, cmd: StoreCommand) {
    // A dropped reply receiver only means the caller stopped waiting.
    match cmd {
        StoreCommand::Enqueue {
            queue,
            payload,
            reply,
        } => {
            let _ = reply.send(store.enqueue(&queue, payload));
        }
        StoreCommand::Acknowledge { queue, reply } => {
            let _ = reply.send(store.acknowledge(&queue));
        }
        StoreCommand::Subscribe { keys, reply } => {
            let rx = store.subscribe(&keys);
            if reply.send(rx).is_err() {
                debug!(queue = %keys.queue, "subscriber went away before reply");
                store.unsubscribe(&keys);
            }
        }
        StoreCommand::Unsubscribe { keys, reply } => {
            store.unsubscribe(&keys);
            let _ = reply.send(());
        }
        StoreCommand::Members { source, reply } => {
            let _ = reply.send(store.members(&source));
        }
        StoreCommand::Stats { queue, reply } => {
            let _ = reply.send(store.stats(&queue));
        }
    }
}

impl StoreHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> StoreCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ChannelError::Closed)?;
        Ok(rx.await.map_err(|_| ChannelError::Closed)?)
    }

    pub async fn enqueue(&self, queue: &str, payload: String) -> Result<EnqueueOutcome> {
        let queue = queue.to_string();
        self.call(|reply| StoreCommand::Enqueue {
            queue,
            payload,
            reply,
        })
        .await
    }

    pub async fn acknowledge(&self, queue: &str) -> Result<usize> {
        let queue = queue.to_string();
        self.call(|reply| StoreCommand::Acknowledge { queue, reply })
            .await
    }

    pub async fn subscribe(&self, keys: QueueKeys) -> Result<mpsc::UnboundedReceiver<String>> {
        self.call(|reply| StoreCommand::Subscribe { keys, reply })
            .await
    }

    pub async fn unsubscribe(&self, keys: QueueKeys) -> Result<()> {
        self.call(|reply| StoreCommand::Unsubscribe { keys, reply })
            .await
    }

    pub async fn members(&self, source: &str) -> Result<Vec<String>> {
        let source = source.to_string();
        self.call(|reply| StoreCommand::Members { source, reply })
            .await
    }

    pub async fn stats(&self, queue: &str) -> Result<QueueStats> {
        let queue = queue.to_string();
        self.call(|reply| StoreCommand::Stats { queue, reply }).await
    }
}
