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

//! Error types for the RPC link.
//!
//! Framing and correlation problems never show up here: they are recovered
//! inside the connection and reported through `ConnectionEvent` only.

use thiserror::Error;
use uuid::Uuid;

use super::connection::ConnectionState;
use super::protocol::RequestId;

/// Failure reported by a link adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The link was never established or has already been released.
    #[error("link not connected")]
    NotConnected,

    /// The peripheral dropped the link.
    #[error("link disconnected by peer")]
    Disconnected,

    /// The RPC service is not exposed by the peripheral.
    #[error("service {0} not found")]
    ServiceNotFound(Uuid),

    /// A required characteristic is not exposed by the RPC service.
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// Platform stack error for a single operation.
    #[error("link I/O error: {0}")]
    Io(String),
}

impl LinkError {
    /// Whether the link can no longer carry traffic after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Disconnected)
    }
}

/// Why outstanding requests were released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called.
    Requested,
    /// The peripheral or the platform stack dropped the link.
    LinkLost,
    /// A write or read failed in a way the link cannot recover from.
    TransportFailure(String),
    /// Discovery did not resolve the required characteristics.
    Configuration(String),
    /// Every client handle was dropped.
    HandleDropped,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Requested => write!(f, "closed by application"),
            CloseReason::LinkLost => write!(f, "link lost"),
            CloseReason::TransportFailure(e) => write!(f, "transport failure: {}", e),
            CloseReason::Configuration(e) => write!(f, "configuration error: {}", e),
            CloseReason::HandleDropped => write!(f, "client dropped"),
        }
    }
}

/// Error surfaced to callers of the RPC client.
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    /// Operation requires a Ready connection.
    #[error("connection not ready (state: {0})")]
    NotReady(ConnectionState),

    /// Link-level write/read/connect failure.
    #[error("transport error: {0}")]
    Transport(#[from] LinkError),

    /// Required characteristics missing after discovery.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Request released because the connection closed.
    #[error("request cancelled: {0}")]
    Cancelled(CloseReason),

    /// No response within the configured request timeout.
    #[error("request {id} timed out")]
    TimedOut { id: RequestId },

    /// Request could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// The connection task has exited.
    #[error("connection task shut down")]
    Shutdown,
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Encode(e.to_string())
    }
}

pub type Result<T, E = RpcError> = std::result::Result<T, E>;
