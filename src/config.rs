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

//! Configuration module.
//!
//! Handles loading and saving client settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::ble_constants::config as defaults;
use crate::bluetooth::{CancelPolicy, ClientOptions, PollMode};

const APP_DIR: &str = "ble-jsonrpc";

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target device.
    pub device: DeviceConfig,

    /// RPC link settings.
    pub rpc: RpcConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Bluetooth address of the peripheral, e.g. "B8:27:EB:12:34:56".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollModeSetting {
    Notify,
    Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelPolicySetting {
    Notify,
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// How queued responses are detected: "notify" or "interval".
    pub poll_mode: PollModeSetting,

    /// Poll period in milliseconds when `poll_mode = "interval"`.
    pub poll_interval_ms: u64,

    /// Per-request timeout in milliseconds. Unset means wait forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    /// Outstanding requests on close: "notify" their callbacks or "drop" them.
    pub cancel_policy: CancelPolicySetting,

    /// Capacity of the command queue.
    pub command_queue: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            poll_mode: PollModeSetting::Notify,
            poll_interval_ms: defaults::DEFAULT_POLL_INTERVAL.as_millis() as u64,
            request_timeout_ms: None,
            cancel_policy: CancelPolicySetting::Notify,
            command_queue: defaults::DEFAULT_COMMAND_QUEUE,
        }
    }
}

impl Config {
    /// Default configuration file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from the default location, creating it if missing.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Connection options derived from the `[rpc]` section.
    pub fn rpc_options(&self) -> ClientOptions {
        let rpc = &self.rpc;
        ClientOptions {
            poll_mode: match rpc.poll_mode {
                PollModeSetting::Notify => PollMode::Notify,
                PollModeSetting::Interval => {
                    PollMode::Interval(Duration::from_millis(rpc.poll_interval_ms.max(1)))
                }
            },
            request_timeout: rpc.request_timeout_ms.map(Duration::from_millis),
            cancel_policy: match rpc.cancel_policy {
                CancelPolicySetting::Notify => CancelPolicy::Notify,
                CancelPolicySetting::Drop => CancelPolicy::Drop,
            },
            command_queue: rpc.command_queue,
            ..ClientOptions::default()
        }
    }
}
