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

//! Poll-signal handling.
//!
//! The peripheral cannot push responses through a notification, so it
//! announces how many bytes are queued on the inbox and waits for the client
//! to read them. Detecting that data is waiting (the trigger) and pulling it
//! (the transfer) are separate steps here so the trigger can come from a
//! notification or from a periodic read of the poll characteristic.

use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, trace};

use super::ble_constants::poll::SIGNAL_LEN;
use super::codec::{FrameCodec, FrameDrop};
use super::error::LinkError;
use super::link::{CharacteristicHandle, LinkAdapter, NotificationStream};

/// How the client learns that responses are queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Subscribe to poll-signal notifications.
    Notify,
    /// Read the poll-signal characteristic on a fixed period.
    Interval(Duration),
}

impl Default for PollMode {
    fn default() -> Self {
        PollMode::Notify
    }
}

/// Decode a poll-signal payload into the advertised queued-byte count.
///
/// Returns `None` for short payloads and for a zero count. Trailing bytes
/// beyond the counter are ignored.
pub fn parse_signal(payload: &[u8]) -> Option<u32> {
    let counter: [u8; SIGNAL_LEN] = payload.get(..SIGNAL_LEN)?.try_into().ok()?;
    match u32::from_be_bytes(counter) {
        0 => None,
        n => Some(n),
    }
}

/// Where poll triggers come from while the connection is Ready.
pub enum PollSource {
    Notifications(NotificationStream),
    Timer(Interval),
}

/// One step of a poll source.
#[derive(Debug, PartialEq, Eq)]
pub enum PollTick {
    /// A notification arrived with this payload.
    Signal(Vec<u8>),
    /// The timer fired; the poll characteristic should be read.
    Due,
    /// The notification stream ended.
    Ended,
}

impl PollSource {
    pub fn timer(period: Duration) -> Self {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        PollSource::Timer(timer)
    }

    pub async fn next(&mut self) -> PollTick {
        match self {
            PollSource::Notifications(stream) => match stream.next().await {
                Some(payload) => PollTick::Signal(payload),
                None => PollTick::Ended,
            },
            PollSource::Timer(timer) => {
                timer.tick().await;
                PollTick::Due
            }
        }
    }
}

/// Turns poll signals into inbox reads, one read per signal.
#[derive(Debug, Default)]
pub struct PollReader {
    signals: u64,
    ignored: u64,
    reads: u64,
}

impl PollReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this payload calls for exactly one inbox read.
    pub fn on_signal(&mut self, payload: &[u8]) -> bool {
        self.signals += 1;
        match parse_signal(payload) {
            Some(queued) => {
                debug!("Poll signal: {} bytes queued", queued);
                self.reads += 1;
                true
            }
            None => {
                trace!("Ignoring poll signal {:02x?}", payload);
                self.ignored += 1;
                false
            }
        }
    }

    pub fn signals(&self) -> u64 {
        self.signals
    }

    pub fn ignored(&self) -> u64 {
        self.ignored
    }

    pub fn reads_issued(&self) -> u64 {
        self.reads
    }
}

/// Read the inbox once and feed the bytes through the codec.
pub async fn transfer<L: LinkAdapter + ?Sized>(
    link: &mut L,
    inbox: &CharacteristicHandle,
    codec: &mut FrameCodec,
    on_drop: impl FnMut(FrameDrop),
) -> Result<Vec<Value>, LinkError> {
    let chunk = link.read_characteristic(inbox).await?;
    debug!("Inbox read: {} bytes", chunk.len());
    Ok(codec.feed_with(&chunk, on_drop))
}
