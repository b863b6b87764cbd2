// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{MachineConfig, RawMachineConfig, SheetConfig};
use crate::errors::{Result, StreamsheetError};
use crate::message::MessagePath;
use crate::trigger::TriggerType;

impl TryFrom<RawMachineConfig> for MachineConfig {
    type Error = StreamsheetError;

    fn try_from(raw: RawMachineConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(MachineConfig::new_unchecked(raw.machine, raw.queue, raw.sheet))
    }
}

fn validate_raw_config(cfg: &RawMachineConfig) -> Result<()> {
    ensure_has_sheets(cfg)?;
    validate_machine_section(cfg)?;
    validate_queue_section(cfg)?;
    validate_sheet_ids(cfg)?;
    for sheet in &cfg.sheet {
        validate_sheet(sheet)?;
    }
    Ok(())
}

fn ensure_has_sheets(cfg: &RawMachineConfig) -> Result<()> {
    if cfg.sheet.is_empty() {
        return Err(StreamsheetError::ConfigError(
            "config must contain at least one [[sheet]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_machine_section(cfg: &RawMachineConfig) -> Result<()> {
    if cfg.machine.id.trim().is_empty() {
        return Err(StreamsheetError::ConfigError(
            "[machine].id must not be empty".to_string(),
        ));
    }
    if cfg.machine.cycletime == 0 {
        return Err(StreamsheetError::ConfigError(
            "[machine].cycletime must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.machine.outbox_max_size == 0 {
        return Err(StreamsheetError::ConfigError(
            "[machine].outbox_max_size must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_queue_section(cfg: &RawMachineConfig) -> Result<()> {
    if cfg.queue.max_buffer_size == 0 {
        return Err(StreamsheetError::ConfigError(
            "[queue].max_buffer_size must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.queue.request_timeout_ms == 0 {
        return Err(StreamsheetError::ConfigError(
            "[queue].request_timeout_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_sheet_ids(cfg: &RawMachineConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for sheet in &cfg.sheet {
        if sheet.id.trim().is_empty() {
            return Err(StreamsheetError::ConfigError(
                "sheet id must not be empty".to_string(),
            ));
        }
        if !seen.insert(sheet.id.as_str()) {
            return Err(StreamsheetError::ConfigError(format!(
                "duplicate sheet id '{}'",
                sheet.id
            )));
        }
    }
    Ok(())
}

fn validate_sheet(sheet: &SheetConfig) -> Result<()> {
    let trigger = &sheet.trigger;
    if matches!(trigger.kind, TriggerType::Timer | TriggerType::Random)
        && trigger.interval == Some(0)
    {
        return Err(StreamsheetError::ConfigError(format!(
            "sheet '{}': trigger interval must be >= 1",
            sheet.id
        )));
    }

    if sheet.inbox_max_size == Some(0) {
        return Err(StreamsheetError::ConfigError(format!(
            "sheet '{}': inbox_max_size must be >= 1",
            sheet.id
        )));
    }

    if let Some(path) = &sheet.loop_path {
        MessagePath::parse(path).map_err(|e| {
            StreamsheetError::ConfigError(format!(
                "sheet '{}': invalid loop_path '{}': {}",
                sheet.id, path, e
            ))
        })?;
    }

    if let Some(binding) = &sheet.queue {
        if binding.source.trim().is_empty() {
            return Err(StreamsheetError::ConfigError(format!(
                "sheet '{}': queue source must not be empty",
                sheet.id
            )));
        }
    }
    Ok(())
}
