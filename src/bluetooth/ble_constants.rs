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

//! BLE service and characteristic UUIDs for the RPC peripheral.

use std::time::Duration;
use uuid::Uuid;

/// RPC GATT service UUID.
pub const RPC_SERVICE_UUID: Uuid = Uuid::from_u128(0x503553ca_eb90_11e8_ac5b_bb7e434023e8);

/// RPC inbox characteristic UUID.
/// Requests are written here; queued responses are read back from it.
/// Properties: Read, Write
pub const RPC_INBOX_UUID: Uuid = Uuid::from_u128(0x510c87c8_eb90_11e8_b3dc_17292c2ecc2d);

/// Poll-signal characteristic UUID (bytes queued on the inbox).
/// Properties: Read, Notify
pub const RPC_EPOLL_UUID: Uuid = Uuid::from_u128(0x5140f882_eb90_11e8_a835_13d2bd922d3f);

/// Record delimiter terminating every JSON message on the wire (ASCII RS).
pub const RECORD_DELIMITER: u8 = 0x1e;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Poll-signal payload layout.
pub mod poll {
    /// Width of the queued-bytes counter, big-endian.
    pub const SIGNAL_LEN: usize = 4;
}

/// Client timing defaults.
pub mod config {
    use super::Duration;

    /// Period between poll-signal reads in interval mode.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

    /// Granularity of the request-timeout sweep.
    pub const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

    /// Capacity of the command hand-off queue.
    pub const DEFAULT_COMMAND_QUEUE: usize = 32;

    /// Capacity of the connection event channel.
    pub const EVENT_QUEUE: usize = 64;

    /// Initial capacity of the incoming accumulator.
    pub const ACCUMULATOR_CAPACITY: usize = 1024;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            RPC_SERVICE_UUID.to_string().to_lowercase(),
            "503553ca-eb90-11e8-ac5b-bb7e434023e8"
        );
        assert_eq!(
            RPC_INBOX_UUID.to_string().to_lowercase(),
            "510c87c8-eb90-11e8-b3dc-17292c2ecc2d"
        );
        assert_eq!(
            RPC_EPOLL_UUID.to_string().to_lowercase(),
            "5140f882-eb90-11e8-a835-13d2bd922d3f"
        );
    }

    #[test]
    fn test_delimiter_is_record_separator() {
        assert_eq!(RECORD_DELIMITER, 30);
    }
}
