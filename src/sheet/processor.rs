// src/sheet/processor.rs

//! Pluggable sheet evaluation.
//!
//! The machine never evaluates cells itself. Each sheet talks to a
//! [`SheetProcessor`], which receives the attached message and loop element
//! and reports how the step ended. Production wiring picks a processor by
//! [`ProcessorKind`]; tests provide their own implementation that records
//! what it saw and returns scripted outcomes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::message::{LoopElement, Message, Outbox};

use super::SheetState;

/// How a single evaluation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Evaluation finished; the sheet may advance its loop.
    Done,
    /// Evaluation is waiting for something external; the sheet pauses until
    /// resumed and will then continue in place.
    Pause,
    /// Evaluate the same message again on the next step.
    Repeat,
    /// Continue in place on the next step without advancing.
    Continue,
    /// End an endless run: stops the trigger and releases the message.
    Return,
}

/// Failure raised by a processor. Stops the machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ProcessError(pub String);

/// Everything a processor can see and touch during one evaluation.
#[derive(Debug)]
pub struct ProcessContext<'a> {
    pub sheet_id: &'a str,
    pub sheet_name: &'a str,
    /// Attached message, if the inbox had one.
    pub message: Option<&'a Message>,
    /// Current loop element when the sheet loops over a message path.
    pub element: Option<&'a LoopElement>,
    /// State the sheet was in when this evaluation started.
    pub state: SheetState,
    /// Sheet step counter (1-based).
    pub step: u64,
    pub now_ms: u64,
    pub outbox: &'a mut Outbox,
}

/// Evaluation engine behind a sheet.
pub trait SheetProcessor: fmt::Debug + Send {
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<ProcessOutcome, ProcessError>;
}

/// Built-in processors selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    /// Copy the current loop element (or the message data) to the outbox.
    #[default]
    Forward,
    /// Consume messages without producing anything.
    Discard,
}

impl FromStr for ProcessorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "forward" => Ok(ProcessorKind::Forward),
            "discard" => Ok(ProcessorKind::Discard),
            other => Err(format!(
                "invalid processor: {other} (expected \"forward\" or \"discard\")"
            )),
        }
    }
}

pub fn build_processor(kind: ProcessorKind) -> Box<dyn SheetProcessor> {
    match kind {
        ProcessorKind::Forward => Box::new(ForwardProcessor),
        ProcessorKind::Discard => Box::new(DiscardProcessor),
    }
}

/// Writes one result per step into the outbox.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardProcessor;

impl SheetProcessor for ForwardProcessor {
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<ProcessOutcome, ProcessError> {
        let Some(message) = ctx.message else {
            return Ok(ProcessOutcome::Done);
        };

        let data = match ctx.element {
            Some(element) => element.value.clone(),
            None => message.data.clone(),
        };

        let mut result = Message::new(data);
        result.set_meta("sheet", Value::String(ctx.sheet_name.to_string()));
        result.set_meta("source", Value::String(message.id.clone()));
        if let Some(element) = ctx.element {
            result.set_meta("loop", json!({ "index": element.index, "key": element.key }));
        }
        ctx.outbox.put(result);

        Ok(ProcessOutcome::Done)
    }
}

/// Accepts everything, produces nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardProcessor;

impl SheetProcessor for DiscardProcessor {
    fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> Result<ProcessOutcome, ProcessError> {
        Ok(ProcessOutcome::Done)
    }
}
