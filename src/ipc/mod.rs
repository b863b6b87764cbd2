// src/ipc/mod.rs

//! Supervisor ↔ worker control protocol over JSON lines.
//!
//! - [`service`]: the worker answers request frames for its machine.
//! - [`supervisor`]: the supervisor spawns workers and issues requests.

pub mod service;
pub mod supervisor;

pub use service::{dispatch, serve};
pub use supervisor::WorkerClient;
