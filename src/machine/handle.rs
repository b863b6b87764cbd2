// src/machine/handle.rs

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::errors::{Result, StreamsheetError};
use crate::message::Message;

use super::runtime::{MachineEvent, MachineRequest, Reply};
use super::{MachineNotification, MachineSnapshot, MachineState};

/// Cloneable client of a [`MachineRuntime`](super::MachineRuntime).
///
/// Every call is one request/reply round trip to the runtime task. Once the
/// runtime is gone, calls fail with [`StreamsheetError::MachineGone`].
#[derive(Debug, Clone)]
pub struct MachineHandle {
    tx: mpsc::Sender<MachineEvent>,
    notifications: broadcast::Sender<MachineNotification>,
}

impl MachineHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<MachineEvent>,
        notifications: broadcast::Sender<MachineNotification>,
    ) -> Self {
        Self { tx, notifications }
    }

    /// Receive every notification emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MachineNotification> {
        self.notifications.subscribe()
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> MachineRequest) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MachineEvent::Request(build(reply)))
            .await
            .map_err(|_| StreamsheetError::MachineGone)?;
        rx.await.map_err(|_| StreamsheetError::MachineGone)
    }

    pub async fn start(&self) -> Result<MachineState> {
        self.call(MachineRequest::Start).await
    }

    pub async fn stop(&self) -> Result<MachineState> {
        self.call(MachineRequest::Stop).await
    }

    pub async fn pause(&self) -> Result<MachineState> {
        self.call(MachineRequest::Pause).await
    }

    /// Manual single cycle. `false` if the machine was not stopped or paused.
    pub async fn step(&self) -> Result<bool> {
        self.call(MachineRequest::Step).await
    }

    pub async fn snapshot(&self) -> Result<MachineSnapshot> {
        self.call(MachineRequest::Snapshot).await
    }

    pub async fn put(&self, sheet: &str, message: Message) -> Result<()> {
        let sheet = sheet.to_string();
        self.call(|reply| MachineRequest::Put {
            sheet,
            message,
            reply,
        })
        .await?
    }

    pub async fn execute(&self, sheet: &str, message: Option<Message>) -> Result<bool> {
        let sheet = sheet.to_string();
        self.call(|reply| MachineRequest::Execute {
            sheet,
            message,
            reply,
        })
        .await?
    }

    pub async fn set_cycletime(&self, cycletime_ms: u64) -> Result<()> {
        self.call(|reply| MachineRequest::SetCycleTime {
            cycletime_ms,
            reply,
        })
        .await?
    }

    pub async fn pause_sheet(&self, sheet: &str) -> Result<bool> {
        let sheet = sheet.to_string();
        self.call(|reply| MachineRequest::PauseSheet { sheet, reply })
            .await?
    }

    pub async fn resume_sheet(&self, sheet: &str) -> Result<bool> {
        let sheet = sheet.to_string();
        self.call(|reply| MachineRequest::ResumeSheet { sheet, reply })
            .await?
    }

    pub async fn stop_sheet(&self, sheet: &str) -> Result<bool> {
        let sheet = sheet.to_string();
        self.call(|reply| MachineRequest::StopSheet { sheet, reply })
            .await?
    }

    pub async fn outbox(&self) -> Result<Vec<Message>> {
        self.call(MachineRequest::Outbox).await
    }

    pub async fn clear_outbox(&self) -> Result<usize> {
        self.call(MachineRequest::ClearOutbox).await
    }

    /// Ask the runtime to stop the machine and exit its loop.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(MachineEvent::Shutdown)
            .await
            .map_err(|_| StreamsheetError::MachineGone)
    }
}
