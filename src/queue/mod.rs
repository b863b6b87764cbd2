// src/queue/mod.rs

//! Flow-controlled message queue between producers and sheet inboxes.
//!
//! - [`store`] holds the credit/buffer state machine.
//! - [`actor`] serialises every store mutation through one task.
//! - [`adapter`] defines the key scheme and the producer API.

pub mod actor;
pub mod adapter;
pub mod store;

pub use actor::{StoreHandle, spawn_store};
pub use adapter::{QueueKeys, QueueProducer};
pub use store::{
    CREDIT_LIMIT, DEFAULT_MAX_BUFFER_SIZE, EnqueueOutcome, QueueStats, QueueStore,
};
