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

//! BlueZ GATT client link.

use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, Address, Device, DeviceEvent, DeviceProperty};
use futures::{future, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::LinkError;
use super::link::{
    CharacteristicHandle, DiscoveredService, LinkAdapter, LinkEvent, LinkEventStream,
    NotificationStream,
};

/// How long to wait for BlueZ to resolve services after connecting.
const SERVICE_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICE_RESOLVE_POLL: Duration = Duration::from_millis(100);

impl From<bluer::Error> for LinkError {
    fn from(e: bluer::Error) -> Self {
        match e.kind {
            bluer::ErrorKind::NotConnected => LinkError::NotConnected,
            _ => LinkError::Io(e.to_string()),
        }
    }
}

/// Link to a single peripheral through the BlueZ D-Bus API.
pub struct BluezLink {
    device: Device,
    address: Address,
    characteristics: HashMap<u32, Characteristic>,
}

impl BluezLink {
    /// Open the default adapter and prepare a link to `address`.
    pub async fn open(address: Address) -> bluer::Result<Self> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        Self::with_adapter(&adapter, address)
    }

    /// Prepare a link to `address` on an existing adapter.
    pub fn with_adapter(adapter: &Adapter, address: Address) -> bluer::Result<Self> {
        Ok(Self {
            device: adapter.device(address)?,
            address,
            characteristics: HashMap::new(),
        })
    }

    fn characteristic(&self, handle: &CharacteristicHandle) -> Result<&Characteristic, LinkError> {
        self.characteristics
            .get(&handle.index)
            .ok_or(LinkError::CharacteristicNotFound(handle.uuid))
    }

    async fn wait_services_resolved(&self) -> Result<(), LinkError> {
        let deadline = tokio::time::Instant::now() + SERVICE_RESOLVE_TIMEOUT;
        while !self.device.is_services_resolved().await? {
            if tokio::time::Instant::now() >= deadline {
                return Err(LinkError::Io("timed out resolving services".into()));
            }
            tokio::time::sleep(SERVICE_RESOLVE_POLL).await;
        }
        Ok(())
    }
}

fn handle_index(service_id: u16, characteristic_id: u16) -> u32 {
    (u32::from(service_id) << 16) | u32::from(characteristic_id)
}

#[async_trait]
impl LinkAdapter for BluezLink {
    async fn connect(&mut self) -> Result<LinkEventStream, LinkError> {
        // Subscribe first so a drop right after connecting is not missed
        let events = self.device.events().await?;

        if !self.device.is_connected().await? {
            info!("Connecting to {}...", self.address);
            self.device.connect().await?;
        }

        let events = events
            .filter_map(|event| {
                future::ready(match event {
                    DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) => {
                        Some(LinkEvent::Disconnected)
                    }
                    _ => None,
                })
            })
            .boxed();
        Ok(events)
    }

    async fn discover_services(&mut self) -> Result<Vec<DiscoveredService>, LinkError> {
        self.wait_services_resolved().await?;
        self.characteristics.clear();

        let mut discovered = Vec::new();
        for service in self.device.services().await? {
            let service_uuid = service.uuid().await?;
            debug!("service: {}", service_uuid);

            let mut handles = Vec::new();
            for characteristic in service.characteristics().await? {
                let uuid = characteristic.uuid().await?;
                let index = handle_index(service.id(), characteristic.id());
                debug!("   char: {}", uuid);

                handles.push(CharacteristicHandle { uuid, index });
                self.characteristics.insert(index, characteristic);
            }

            discovered.push(DiscoveredService {
                uuid: service_uuid,
                characteristics: handles,
            });
        }

        Ok(discovered)
    }

    async fn write_characteristic(
        &mut self,
        handle: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<(), LinkError> {
        let characteristic = self.characteristic(handle)?;
        characteristic.write(data).await?;
        debug!("Wrote {} bytes to {}", data.len(), handle.uuid);
        Ok(())
    }

    async fn read_characteristic(
        &mut self,
        handle: &CharacteristicHandle,
    ) -> Result<Vec<u8>, LinkError> {
        let characteristic = self.characteristic(handle)?;
        Ok(characteristic.read().await?)
    }

    async fn subscribe_notifications(
        &mut self,
        handle: &CharacteristicHandle,
    ) -> Result<NotificationStream, LinkError> {
        let characteristic = self.characteristic(handle)?;
        let stream = characteristic.notify().await?;
        info!("Subscribed to notifications on {}", handle.uuid);
        Ok(stream.boxed())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.characteristics.clear();
        if self.device.is_connected().await? {
            if let Err(e) = self.device.disconnect().await {
                warn!("Disconnect from {} failed: {}", self.address, e);
                return Err(e.into());
            }
            info!("Disconnected from {}", self.address);
        }
        Ok(())
    }

    fn peer(&self) -> String {
        self.address.to_string()
    }
}
