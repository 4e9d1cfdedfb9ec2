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

//! Transport capabilities the RPC connection needs from a BLE stack.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use super::error::LinkError;

/// Lifecycle events reported by the platform stack after `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link dropped.
    Disconnected,
}

pub type LinkEventStream = BoxStream<'static, LinkEvent>;
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// Resolved handle of a remote characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub uuid: Uuid,
    /// Stack-specific index (attribute handle, object id, ...).
    pub index: u32,
}

/// A discovered GATT service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicHandle>,
}

impl DiscoveredService {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicHandle> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Minimal BLE GATT client surface.
///
/// Implemented by platform bindings; the connection is the only caller.
#[async_trait]
pub trait LinkAdapter: Send + 'static {
    /// Establish the low-level link. Returns the lifecycle event stream.
    async fn connect(&mut self) -> Result<LinkEventStream, LinkError>;

    /// Enumerate services and their characteristics.
    async fn discover_services(&mut self) -> Result<Vec<DiscoveredService>, LinkError>;

    /// Write a full value to a characteristic.
    async fn write_characteristic(
        &mut self,
        handle: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<(), LinkError>;

    /// Read the current value of a characteristic.
    ///
    /// A read may return only part of what is queued on the peripheral.
    async fn read_characteristic(
        &mut self,
        handle: &CharacteristicHandle,
    ) -> Result<Vec<u8>, LinkError>;

    /// Enable notifications on a characteristic.
    async fn subscribe_notifications(
        &mut self,
        handle: &CharacteristicHandle,
    ) -> Result<NotificationStream, LinkError>;

    /// Tear the link down. Safe to call more than once.
    async fn disconnect(&mut self) -> Result<(), LinkError>;

    /// Identifier of the remote device, for logging.
    fn peer(&self) -> String;
}
