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

//! Record-delimited JSON framing.
//!
//! Every message on the inbox characteristic is UTF-8 JSON followed by a
//! single `0x1E` byte. There is no length prefix; reads may end anywhere
//! inside a record, so partial bytes are carried over between `feed` calls.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::ble_constants::{config, RECORD_DELIMITER};

/// Default upper bound on a single record.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// A record that was discarded instead of emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDrop {
    /// Bytes between two delimiters were not valid JSON.
    Malformed { len: usize, reason: String },
    /// Record grew past the frame limit before its delimiter arrived.
    Oversized { len: usize },
}

/// Serialize a message into a delimited frame.
pub fn encode<T: Serialize>(message: &T) -> serde_json::Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(message)?;
    frame.push(RECORD_DELIMITER);
    Ok(frame)
}

/// Splits an incoming byte stream into JSON messages.
pub struct FrameCodec {
    buffer: Vec<u8>,
    max_frame_len: usize,
    overflowed: usize,
    dropped: u64,
}

impl FrameCodec {
    /// Create a codec with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(config::ACCUMULATOR_CAPACITY),
            max_frame_len,
            overflowed: 0,
            dropped: 0,
        }
    }

    /// Consume a chunk and return every message it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.feed_with(chunk, |_| {})
    }

    /// Like [`feed`](Self::feed), reporting discarded records to `on_drop`.
    pub fn feed_with(&mut self, chunk: &[u8], mut on_drop: impl FnMut(FrameDrop)) -> Vec<Value> {
        let mut messages = Vec::new();

        for &byte in chunk {
            if byte != RECORD_DELIMITER {
                self.push_byte(byte);
                continue;
            }

            if let Some(dropped) = self.finish_record(&mut messages) {
                self.dropped += 1;
                on_drop(dropped);
            }
        }

        messages
    }

    fn push_byte(&mut self, byte: u8) {
        if self.overflowed > 0 {
            self.overflowed += 1;
        } else if self.buffer.len() >= self.max_frame_len {
            warn!(
                "Frame exceeds {} bytes, discarding until next delimiter",
                self.max_frame_len
            );
            self.overflowed = self.buffer.len() + 1;
            self.buffer.clear();
        } else {
            self.buffer.push(byte);
        }
    }

    /// Handle a delimiter. The accumulator is empty afterwards whatever happens.
    fn finish_record(&mut self, messages: &mut Vec<Value>) -> Option<FrameDrop> {
        if self.overflowed > 0 {
            let len = std::mem::take(&mut self.overflowed);
            return Some(FrameDrop::Oversized { len });
        }

        let record = std::mem::take(&mut self.buffer);
        self.buffer.reserve(config::ACCUMULATOR_CAPACITY);

        if record.iter().all(u8::is_ascii_whitespace) {
            debug!("Skipping empty record");
            return None;
        }

        match serde_json::from_slice::<Value>(&record) {
            Ok(value) => {
                debug!("Decoded frame: {} bytes", record.len());
                messages.push(value);
                None
            }
            Err(e) => {
                warn!("Dropping malformed frame ({} bytes): {}", record.len(), e);
                Some(FrameDrop::Malformed {
                    len: record.len(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Discard any partial record.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = 0;
    }

    /// Bytes waiting for a delimiter.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.overflowed
    }

    /// Records discarded since creation.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}
