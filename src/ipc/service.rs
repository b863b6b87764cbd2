// src/ipc/service.rs

//! Worker side of the IPC protocol: answers request frames against a
//! [`MachineHandle`].

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::envelope::SHUTDOWN;
use crate::channel::{Channel, Envelope};
use crate::errors::{Result, StreamsheetError};
use crate::machine::MachineHandle;
use crate::message::Message;

/// Serve requests from `inbound` until a shutdown command arrives or the
/// peer goes away. The machine runtime is shut down on exit either way.
pub async fn serve(
    handle: MachineHandle,
    channel: Channel,
    mut inbound: mpsc::Receiver<Value>,
) -> Result<()> {
    info!("ipc service started");

    while let Some(frame) = inbound.recv().await {
        let envelope = match Envelope::from_value(frame) {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, "unrecognised ipc frame; dropping");
                continue;
            }
        };

        match envelope {
            Envelope::Command { cmd } if cmd == SHUTDOWN => {
                info!("shutdown command received");
                break;
            }
            Envelope::Command { cmd } => {
                warn!(cmd = %cmd, "unknown ipc command; ignoring");
            }
            Envelope::Request {
                request,
                request_id,
                payload,
            } => {
                debug!(request = %request, request_id = %request_id, "ipc request");
                let reply = match dispatch(&handle, &request, &payload).await {
                    Ok(result) => Envelope::ok(&request_id, result),
                    Err(e) => {
                        debug!(request = %request, error = %e, "ipc request failed");
                        Envelope::err(&request_id, e.to_string())
                    }
                };
                if !channel.send(reply.to_value()?).await? {
                    debug!(request_id = %request_id, "reply suppressed; channel unavailable");
                }
            }
            Envelope::Response { response, .. } => {
                debug!(response = %response, "unexpected response frame on worker; ignoring");
            }
        }
    }

    channel.close();
    if let Err(e) = handle.shutdown().await {
        debug!(error = %e, "machine already gone at ipc shutdown");
    }
    info!("ipc service finished");
    Ok(())
}

/// Execute one named request.
pub async fn dispatch(
    handle: &MachineHandle,
    request: &str,
    payload: &Map<String, Value>,
) -> Result<Value> {
    let value = match request {
        "start" => json!({ "state": handle.start().await? }),
        "stop" => json!({ "state": handle.stop().await? }),
        "pause" => json!({ "state": handle.pause().await? }),
        "step" => json!({ "stepped": handle.step().await? }),
        "state" => serde_json::to_value(handle.snapshot().await?)?,
        "put" => {
            let sheet = required_str(request, payload, "sheet")?;
            let message = payload.get("message").cloned().ok_or_else(|| {
                StreamsheetError::InvalidRequest {
                    request: request.to_string(),
                    reason: "missing field 'message'".to_string(),
                }
            })?;
            let message = Message::from_value(message)?;
            let id = message.id.clone();
            handle.put(sheet, message).await?;
            json!({ "sheet": sheet, "message": id })
        }
        "execute" => {
            let sheet = required_str(request, payload, "sheet")?;
            let message = match payload.get("message") {
                Some(Value::Null) | None => None,
                Some(v) => Some(Message::from_value(v.clone())?),
            };
            json!({ "executed": handle.execute(sheet, message).await? })
        }
        "setCycleTime" => {
            let cycletime = payload
                .get("cycletime")
                .and_then(Value::as_u64)
                .ok_or_else(|| StreamsheetError::InvalidRequest {
                    request: request.to_string(),
                    reason: "field 'cycletime' must be a positive integer".to_string(),
                })?;
            handle.set_cycletime(cycletime).await?;
            json!({ "cycletime": cycletime })
        }
        "pauseSheet" => {
            let sheet = required_str(request, payload, "sheet")?;
            json!({ "changed": handle.pause_sheet(sheet).await? })
        }
        "resumeSheet" => {
            let sheet = required_str(request, payload, "sheet")?;
            json!({ "changed": handle.resume_sheet(sheet).await? })
        }
        "stopSheet" => {
            let sheet = required_str(request, payload, "sheet")?;
            json!({ "stopped": handle.stop_sheet(sheet).await? })
        }
        "outbox" => json!({ "messages": handle.outbox().await? }),
        "clearOutbox" => json!({ "cleared": handle.clear_outbox().await? }),
        other => return Err(StreamsheetError::UnknownRequest(other.to_string())),
    };
    Ok(value)
}

fn required_str<'a>(request: &str, payload: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| StreamsheetError::InvalidRequest {
            request: request.to_string(),
            reason: format!("missing string field '{field}'"),
        })
}
