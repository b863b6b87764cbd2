// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::channel::ChannelError;

#[derive(Error, Debug)]
pub enum StreamsheetError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Sheet not found: {0}")]
    UnknownSheet(String),

    #[error("unknown request: {0}")]
    UnknownRequest(String),

    #[error("invalid request '{request}': {reason}")]
    InvalidRequest { request: String, reason: String },

    #[error("processing failed in sheet '{sheet}': {reason}")]
    Processing { sheet: String, reason: String },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("machine runtime is no longer running")]
    MachineGone,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StreamsheetError>;
