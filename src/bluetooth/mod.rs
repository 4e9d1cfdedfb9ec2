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

//! Bluetooth communication module.
//!
//! JSON-RPC client for a peripheral exposing an inbox characteristic and a
//! poll-signal characteristic.

pub mod ble_constants;
#[cfg(feature = "bluez")]
mod bluez;
pub mod codec;
mod connection;
pub mod correlator;
mod error;
pub mod link;
pub mod poller;
pub mod protocol;

#[cfg(feature = "bluez")]
pub use bluez::BluezLink;
pub use codec::{FrameCodec, FrameDrop};
pub use connection::{ClientOptions, ConnectionEvent, ConnectionState, RpcClient};
pub use correlator::{CancelPolicy, Correlator, ResponseCallback};
pub use error::{CloseReason, LinkError, RpcError};
pub use link::{
    CharacteristicHandle, DiscoveredService, LinkAdapter, LinkEvent, LinkEventStream,
    NotificationStream,
};
pub use poller::{PollMode, PollReader};
pub use protocol::{RemoteError, Request, RequestId, Response};
