// src/config/mod.rs

//! Configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk and apply environment overrides
//!   (`loader.rs`).
//! - Validate basic invariants like unique sheet ids (`validate.rs`).
//! - Turn a validated config into a ready-to-run [`MachineCore`]
//!   ([`build_machine`]).

pub mod loader;
pub mod model;
pub mod validate;

use std::time::Duration;

pub use loader::{apply_env_overrides, load_and_validate, load_from_path, parse_str};
pub use model::{
    MachineConfig, MachineSection, QueueBindingConfig, QueueSection, RawMachineConfig,
    SheetConfig,
};

use crate::errors::{Result, StreamsheetError};
use crate::machine::MachineCore;
use crate::message::{Inbox, MessageIterator, MessagePath, Outbox};
use crate::queue::QueueKeys;
use crate::sheet::{SheetUnit, build_processor};

/// Build the machine described by `cfg`, with built-in processors.
pub fn build_machine(cfg: &MachineConfig) -> Result<MachineCore> {
    let mut core = MachineCore::new(
        cfg.machine.id.clone(),
        cfg.display_name(),
        Duration::from_millis(cfg.machine.cycletime),
    )
    .with_regulation(cfg.machine.cycle_regulated)
    .with_outbox(Outbox::new(cfg.machine.outbox_max_size));

    for sheet in &cfg.sheet {
        core.add_sheet(build_sheet(&cfg.machine.id, sheet)?)?;
    }
    Ok(core)
}

/// Build one sheet from its config entry.
pub fn build_sheet(machine_id: &str, cfg: &SheetConfig) -> Result<SheetUnit> {
    let path = cfg
        .loop_path
        .as_deref()
        .map(MessagePath::parse)
        .transpose()
        .map_err(|e| StreamsheetError::ConfigError(format!("sheet '{}': {e}", cfg.id)))?;

    let sheet = SheetUnit::new(
        cfg.id.clone(),
        cfg.display_name(),
        &cfg.trigger,
        MessageIterator::new(path),
        Inbox::new(cfg.inbox_max_size),
        build_processor(cfg.processor),
    );

    Ok(match &cfg.queue {
        Some(binding) => sheet.with_queue(QueueKeys::for_sheet(machine_id, &cfg.id, &binding.source)),
        None => sheet,
    })
}
