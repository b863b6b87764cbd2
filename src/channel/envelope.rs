// src/channel/envelope.rs

//! IPC frames, one JSON object per line:
//!
//! ```json
//! {"request": "start", "requestId": "r1"}
//! {"response": "r1", "result": {"state": "running"}}
//! {"response": "r2", "error": {"message": "unknown request: frobnicate"}}
//! {"cmd": "shutdown"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Response {
        response: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    Request {
        request: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    Command {
        cmd: String,
    },
}

pub const SHUTDOWN: &str = "shutdown";

impl Envelope {
    pub fn request(name: &str, request_id: &str, payload: Map<String, Value>) -> Self {
        Envelope::Request {
            request: name.to_string(),
            request_id: request_id.to_string(),
            payload,
        }
    }

    pub fn ok(request_id: &str, result: Value) -> Self {
        Envelope::Response {
            response: request_id.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(request_id: &str, message: impl Into<String>) -> Self {
        Envelope::Response {
            response: request_id.to_string(),
            result: None,
            error: Some(ErrorBody {
                message: message.into(),
            }),
        }
    }

    pub fn shutdown() -> Self {
        Envelope::Command {
            cmd: SHUTDOWN.to_string(),
        }
    }

    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}
