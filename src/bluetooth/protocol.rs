// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! JSON-RPC envelope definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ble_constants::JSONRPC_VERSION;

/// Correlation id of a request.
pub type RequestId = u64;

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

fn empty_params() -> Value {
    Value::Object(Default::default())
}

/// Request sent to the peripheral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

impl Request {
    /// Create a request; `Null` params become an empty object.
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            method: method.into(),
            params: if params.is_null() { empty_params() } else { params },
        }
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

/// Status used when a response carries `error` but no code anywhere.
pub const UNSPECIFIED_ERROR_CODE: i64 = -1;

/// Response emitted by the peripheral.
///
/// `code == 0` means success with `result`; anything else carries `error`.
/// The peripheral may omit the top-level `code` and put it inside `error`
/// instead; it is resolved once when the response is decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ResponseEnvelope")]
pub struct Response {
    pub jsonrpc: String,
    pub id: RequestId,
    pub code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// Response as it appears on the wire.
#[derive(Deserialize)]
struct ResponseEnvelope {
    #[serde(default = "default_version")]
    jsonrpc: String,
    id: RequestId,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

impl From<ResponseEnvelope> for Response {
    fn from(wire: ResponseEnvelope) -> Self {
        // Top-level code, then error.code, then any error at all is a failure
        let code = match (wire.code, &wire.error) {
            (Some(code), _) => code,
            (None, Some(error)) => error.code.unwrap_or(UNSPECIFIED_ERROR_CODE),
            (None, None) => 0,
        };
        Self {
            jsonrpc: wire.jsonrpc,
            id: wire.id,
            code,
            result: wire.result,
            error: wire.error,
        }
    }
}

/// Application-level failure reported by the peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

impl Response {
    /// Build a successful response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            code: 0,
            result: Some(result),
            error: None,
        }
    }

    /// Build a failed response.
    pub fn failure(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            code,
            result: None,
            error: Some(ErrorObject {
                code: Some(code),
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Split into the result payload or the remote error.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        if self.is_success() {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(RemoteError {
                code: self.code,
                message: self.error.map(|e| e.message).unwrap_or_default(),
            })
        }
    }
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to an earlier request.
    Response(Response),
    /// Unsolicited message pushed by the peripheral (no id).
    Notification { method: String, params: Value },
    /// Valid JSON that is neither of the above.
    Unrecognized(Value),
}

impl Inbound {
    /// Classify a decoded frame.
    pub fn classify(value: Value) -> Self {
        let has_id = value.get("id").map_or(false, |id| !id.is_null());
        if has_id {
            return match serde_json::from_value::<Response>(value.clone()) {
                Ok(response) => Inbound::Response(response),
                Err(_) => Inbound::Unrecognized(value),
            };
        }

        match value.get("method").and_then(Value::as_str) {
            Some(method) => Inbound::Notification {
                method: method.to_string(),
                params: value.get("params").cloned().unwrap_or(Value::Null),
            },
            None => Inbound::Unrecognized(value),
        }
    }
}
