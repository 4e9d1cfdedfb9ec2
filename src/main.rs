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

//! blerpc - send JSON-RPC requests to a BLE peripheral.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ble_jsonrpc::bluetooth::{BluezLink, ConnectionEvent, RpcClient};
use ble_jsonrpc::config::Config;

#[derive(Parser, Debug)]
#[command(name = "blerpc", version, about = "JSON-RPC over BLE")]
struct Cli {
    /// Configuration file (defaults to the user config directory).
    #[arg(long, env = "BLERPC_CONFIG")]
    config: Option<PathBuf>,

    /// Peripheral Bluetooth address; overrides the configured one.
    #[arg(long, short = 'a', env = "BLERPC_ADDRESS")]
    address: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a request and print its response.
    Call {
        method: String,
        /// Request params as a JSON object.
        params: Option<String>,
    },
    /// Send a request without waiting for a response.
    Notify {
        method: String,
        params: Option<String>,
    },
    /// Print messages pushed by the peripheral until interrupted.
    Listen,
}

fn parse_params(params: Option<&str>) -> Result<Value> {
    match params {
        Some(raw) => serde_json::from_str(raw).context("params must be valid JSON"),
        None => Ok(Value::Null),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_jsonrpc=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let address = cli
        .address
        .or(config.device.address.clone())
        .ok_or_else(|| anyhow!("no device address given (use --address or [device] address)"))?;
    let address: bluer::Address = address
        .parse()
        .with_context(|| format!("invalid Bluetooth address '{}'", address))?;

    let link = BluezLink::open(address).await?;
    let (client, events) = RpcClient::spawn(link, config.rpc_options());
    tokio::spawn(log_events(events));

    client.connect().await?;
    info!("Connected to {}", address);

    let outcome = run(&client, cli.command).await;
    client.close().await;
    outcome
}

async fn run(client: &RpcClient, command: Command) -> Result<()> {
    match command {
        Command::Call { method, params } => {
            let params = parse_params(params.as_deref())?;
            let response = client.call(method, params).await?;
            let code = response.code;
            match response.into_result() {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(e) => {
                    error!("Request failed: {}", e);
                    return Err(anyhow!("peripheral returned code {}", code));
                }
            }
        }
        Command::Notify { method, params } => {
            let params = parse_params(params.as_deref())?;
            let id = client.notify(method, params).await?;
            info!("Sent request {}", id);
        }
        Command::Listen => {
            info!("Listening, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
        }
    }
    Ok(())
}

async fn log_events(mut events: mpsc::Receiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::StateChanged(state) => info!("Connection {}", state),
            ConnectionEvent::Notification { method, params } => {
                println!("{} {}", method, params);
            }
            ConnectionEvent::FrameDropped(dropped) => warn!("Frame dropped: {:?}", dropped),
            ConnectionEvent::OrphanResponse(id) => warn!("Orphan response for id {}", id),
            ConnectionEvent::Closed(reason) => {
                info!("Connection closed: {}", reason);
                break;
            }
        }
    }
}
