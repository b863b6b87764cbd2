// src/ipc/supervisor.rs

//! Supervisor side: one worker process per machine, each behind its own
//! correlated channel.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelError, Envelope, RequestHandler, spawn_line_transport};

/// How long a worker gets to exit after a shutdown command.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Client of one `streamsheets worker` child process.
#[derive(Debug)]
pub struct WorkerClient {
    config: PathBuf,
    child: Child,
    channel: Channel,
    requests: RequestHandler,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl WorkerClient {
    /// Spawn `exe worker --config <config>` and connect to its stdio.
    pub async fn spawn(exe: &Path, config: &Path, timeout: Duration) -> Result<Self> {
        let mut cmd = Command::new(exe);
        cmd.arg("worker")
            .arg("--config")
            .arg(config)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning worker for '{}'", config.display()))?;

        let stdin = child.stdin.take().context("worker stdin not captured")?;
        let stdout = child.stdout.take().context("worker stdout not captured")?;

        // Worker logs go to its stderr; surface them at debug.
        if let Some(stderr) = child.stderr.take() {
            let name = config.display().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(worker = %name, "stderr: {}", line);
                }
            });
        }

        let transport = spawn_line_transport(stdout, stdin);
        let requests = RequestHandler::new();
        let reader = spawn_response_reader(
            config.display().to_string(),
            transport.inbound,
            requests.clone(),
        );

        info!(worker = %config.display(), pid = ?child.id(), "worker spawned");
        Ok(Self {
            config: config.to_path_buf(),
            child,
            channel: transport.channel,
            requests,
            timeout,
            reader,
        })
    }

    pub fn config(&self) -> &Path {
        &self.config
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.pending_count()
    }

    /// Send request `name` and wait for the worker's answer.
    pub async fn request(&self, name: &str, payload: Map<String, Value>) -> Result<Value, ChannelError> {
        let channel = self.channel.clone();
        self.requests
            .request(None, self.timeout, |id| async move {
                let frame = Envelope::request(name, &id, payload)
                    .to_value()
                    .map_err(|e| ChannelError::Send(e.to_string()))?;
                if channel.send(frame).await? {
                    Ok(())
                } else {
                    Err(ChannelError::Closed)
                }
            })
            .await
    }

    /// Ask the worker to shut down, wait for it, and reject anything still
    /// pending.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Ok(frame) = Envelope::shutdown().to_value() {
            if let Err(e) = self.channel.send(frame).await {
                debug!(error = %e, "worker channel already closed");
            }
        }
        // Dropping the last sender ends the writer task, which closes the
        // worker's stdin.
        let channel = self.channel;
        channel.close();
        drop(channel);

        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(status) => {
                let status = status.context("waiting for worker exit")?;
                info!(worker = %self.config.display(), code = ?status.code(), "worker exited");
            }
            Err(_) => {
                warn!(worker = %self.config.display(), "worker did not exit in time; killing");
                self.child.kill().await.context("killing worker")?;
            }
        }

        self.requests.dispose();
        self.reader.abort();
        Ok(())
    }
}

fn spawn_response_reader(
    worker: String,
    mut inbound: tokio::sync::mpsc::Receiver<Value>,
    requests: RequestHandler,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = inbound.recv().await {
            match Envelope::from_value(frame) {
                Ok(Envelope::Response {
                    response,
                    result,
                    error,
                }) => {
                    requests.handle_response(&response, result, error.map(|e| e.message));
                }
                Ok(other) => {
                    debug!(worker = %worker, frame = ?other, "unexpected frame from worker");
                }
                Err(e) => {
                    warn!(worker = %worker, error = %e, "malformed frame from worker; dropping");
                }
            }
        }
        let rejected = requests.dispose();
        info!(worker = %worker, rejected, "worker output closed");
    })
}
