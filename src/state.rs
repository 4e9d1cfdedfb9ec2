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

//! Connection status shared with application threads.
//!
//! Written only by the connection task; read from anywhere without waiting
//! on it.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::bluetooth::{CloseReason, ConnectionState};

/// Shared link status.
#[derive(Debug)]
pub struct LinkStatus {
    /// Current connection state.
    pub state: RwLock<ConnectionState>,

    /// Remote device identifier.
    pub peer: RwLock<Option<String>>,

    /// Requests waiting for a response.
    pub outstanding: RwLock<usize>,

    /// Last transport or configuration error.
    pub last_error: RwLock<Option<String>>,

    /// Why the connection closed, once it has.
    pub close_reason: RwLock<Option<CloseReason>>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            peer: RwLock::new(None),
            outstanding: RwLock::new(0),
            last_error: RwLock::new(None),
            close_reason: RwLock::new(None),
        }
    }
}

impl LinkStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    pub fn get_state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.get_state() == ConnectionState::Ready
    }

    pub fn set_peer(&self, peer: String) {
        *self.peer.write() = Some(peer);
    }

    pub fn get_peer(&self) -> Option<String> {
        self.peer.read().clone()
    }

    pub fn set_outstanding(&self, count: usize) {
        *self.outstanding.write() = count;
    }

    pub fn get_outstanding(&self) -> usize {
        *self.outstanding.read()
    }

    pub fn set_error(&self, error: String) {
        *self.last_error.write() = Some(error);
    }

    pub fn get_last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn set_close_reason(&self, reason: CloseReason) {
        *self.close_reason.write() = Some(reason);
    }

    pub fn get_close_reason(&self) -> Option<CloseReason> {
        self.close_reason.read().clone()
    }
}
