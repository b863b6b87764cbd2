use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use streamsheets::sheet::{
    ProcessContext, ProcessError, ProcessOutcome, SheetProcessor, SheetState,
};
use tracing::debug;

/// What a [`ScriptedProcessor`] saw during one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub step: u64,
    pub state: SheetState,
    pub message_id: Option<String>,
    pub element: Option<Value>,
    pub element_index: Option<usize>,
}

/// Shared log of evaluations; clone it before handing the processor over.
pub type EvaluationLog = Arc<Mutex<Vec<Evaluation>>>;

/// A fake processor that:
/// - records every evaluation into a shared log
/// - returns scripted outcomes in order, then `Done` forever.
#[derive(Debug, Default)]
pub struct ScriptedProcessor {
    log: EvaluationLog,
    script: VecDeque<Result<ProcessOutcome, ProcessError>>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: EvaluationLog) -> Self {
        Self {
            log,
            script: VecDeque::new(),
        }
    }

    pub fn then(mut self, outcome: ProcessOutcome) -> Self {
        self.script.push_back(Ok(outcome));
        self
    }

    pub fn then_fail(mut self, reason: &str) -> Self {
        self.script.push_back(Err(ProcessError(reason.to_string())));
        self
    }

    pub fn log(&self) -> EvaluationLog {
        Arc::clone(&self.log)
    }

    pub fn boxed(self) -> Box<dyn SheetProcessor> {
        Box::new(self)
    }
}

impl SheetProcessor for ScriptedProcessor {
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<ProcessOutcome, ProcessError> {
        {
            let mut guard = self.log.lock().unwrap();
            guard.push(Evaluation {
                step: ctx.step,
                state: ctx.state,
                message_id: ctx.message.map(|m| m.id.clone()),
                element: ctx.element.map(|e| e.value.clone()),
                element_index: ctx.element.map(|e| e.index),
            });
        }
        let outcome = self.script.pop_front().unwrap_or(Ok(ProcessOutcome::Done));
        debug!(sheet = ctx.sheet_id, step = ctx.step, ?outcome, "scripted evaluation");
        outcome
    }
}

/// Message ids seen by the processor, in evaluation order.
pub fn seen_messages(log: &EvaluationLog) -> Vec<Option<String>> {
    log.lock()
        .unwrap()
        .iter()
        .map(|e| e.message_id.clone())
        .collect()
}
