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

//! RPC connection over a BLE link.
//!
//! One task owns the link, the frame codec, the correlator and the
//! connection state. Application calls reach it through a command queue,
//! so every mutation happens on that task.

use futures::future::pending;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::ble_constants::{config, RPC_EPOLL_UUID, RPC_INBOX_UUID, RPC_SERVICE_UUID};
use super::codec::{self, FrameCodec, FrameDrop, DEFAULT_MAX_FRAME_LEN};
use super::correlator::{CancelPolicy, Correlator, DispatchOutcome, ResponseCallback};
use super::error::{CloseReason, LinkError, Result, RpcError};
use super::link::{
    CharacteristicHandle, DiscoveredService, LinkAdapter, LinkEvent, LinkEventStream,
};
use super::poller::{self, PollMode, PollReader, PollSource, PollTick};
use super::protocol::{Inbound, Request, RequestId, Response};
use crate::state::LinkStatus;

/// State of an RPC connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, `connect` not called yet.
    Disconnected,
    /// Establishing the low-level link.
    Connecting,
    /// Resolving the RPC service and subscribing to the poll signal.
    DiscoveringServices,
    /// Requests may be sent.
    Ready,
    /// Torn down. Terminal.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::DiscoveringServices => write!(f, "discovering-services"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Events emitted by a connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// State transition.
    StateChanged(ConnectionState),
    /// Unsolicited message from the peripheral.
    Notification { method: String, params: Value },
    /// A record was discarded by the frame codec.
    FrameDropped(FrameDrop),
    /// A response matched no outstanding request.
    OrphanResponse(RequestId),
    /// Connection torn down.
    Closed(CloseReason),
}

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub poll_mode: PollMode,
    /// Fail requests that get no response in time. `None` waits forever.
    pub request_timeout: Option<Duration>,
    pub cancel_policy: CancelPolicy,
    pub command_queue: usize,
    pub max_frame_len: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            poll_mode: PollMode::Notify,
            request_timeout: None,
            cancel_policy: CancelPolicy::Notify,
            command_queue: config::DEFAULT_COMMAND_QUEUE,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

enum Command {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        method: String,
        params: Value,
        callback: Option<ResponseCallback>,
        reply: oneshot::Sender<Result<RequestId>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Application handle to a connection.
///
/// Cheap to clone. The connection shuts down once every handle is dropped.
#[derive(Clone)]
pub struct RpcClient {
    commands: mpsc::Sender<Command>,
    status: Arc<LinkStatus>,
}

impl RpcClient {
    /// Start the connection task for `link`. Must be called inside a Tokio runtime.
    pub fn spawn<L: LinkAdapter>(
        link: L,
        options: ClientOptions,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (command_tx, command_rx) = mpsc::channel(options.command_queue.max(1));
        let (event_tx, event_rx) = mpsc::channel(config::EVENT_QUEUE);
        let status = LinkStatus::new();

        let connection = Connection::new(link, options, status.clone(), event_tx);
        tokio::spawn(connection.run(command_rx));

        (
            Self {
                commands: command_tx,
                status,
            },
            event_rx,
        )
    }

    /// Spawn and drive the connection to Ready.
    pub async fn connect_with<L: LinkAdapter>(
        link: L,
        options: ClientOptions,
    ) -> Result<(Self, mpsc::Receiver<ConnectionEvent>)> {
        let (client, events) = Self::spawn(link, options);
        client.connect().await?;
        Ok((client, events))
    }

    /// Establish the link and discover the RPC service.
    pub async fn connect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Connect { reply }).await?;
        rx.await.map_err(|_| RpcError::Shutdown)?
    }

    /// Send a request and return its id once the frame is written.
    ///
    /// With a callback, the callback runs once on the connection task with
    /// the matching response, or with the error that released the request.
    /// Without one the request is fire-and-forget. If the write fails the
    /// error is returned here and the callback is dropped uncalled.
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Value,
        callback: Option<ResponseCallback>,
    ) -> Result<RequestId> {
        let state = self.status.get_state();
        if state != ConnectionState::Ready {
            return Err(RpcError::NotReady(state));
        }

        let (reply, rx) = oneshot::channel();
        self.submit(Command::Send {
            method: method.into(),
            params,
            callback,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RpcError::Shutdown)?
    }

    /// Fire-and-forget request.
    pub async fn notify(&self, method: impl Into<String>, params: Value) -> Result<RequestId> {
        self.send_request(method, params, None).await
    }

    /// Send a request and wait for its response.
    pub async fn call(&self, method: impl Into<String>, params: Value) -> Result<Response> {
        let (tx, rx) = oneshot::channel();
        let callback: ResponseCallback =
            Box::new(move |_: Request, outcome: Result<Response>| {
                let _ = tx.send(outcome);
            });

        self.send_request(method, params, Some(callback)).await?;
        rx.await.map_err(|_| self.released())?
    }

    /// Close the connection, releasing every outstanding request.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.submit(Command::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.get_state()
    }

    pub fn status(&self) -> Arc<LinkStatus> {
        self.status.clone()
    }

    /// Error for a callback that was dropped without being invoked.
    fn released(&self) -> RpcError {
        match self.status.get_close_reason() {
            Some(reason) => RpcError::Cancelled(reason),
            None => RpcError::Shutdown,
        }
    }

    async fn submit(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RpcError::Shutdown)
    }
}

/// Connection task state.
struct Connection<L> {
    link: L,
    options: ClientOptions,
    state: ConnectionState,
    codec: FrameCodec,
    correlator: Correlator,
    reader: PollReader,
    inbox: Option<CharacteristicHandle>,
    epoll: Option<CharacteristicHandle>,
    link_events: Option<LinkEventStream>,
    poll_source: Option<PollSource>,
    status: Arc<LinkStatus>,
    events: mpsc::Sender<ConnectionEvent>,
}

impl<L: LinkAdapter> Connection<L> {
    fn new(
        link: L,
        options: ClientOptions,
        status: Arc<LinkStatus>,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            link,
            codec: FrameCodec::with_max_frame_len(options.max_frame_len),
            correlator: Correlator::new(options.cancel_policy),
            options,
            state: ConnectionState::Disconnected,
            reader: PollReader::new(),
            inbox: None,
            epoll: None,
            link_events: None,
            poll_source: None,
            status,
            events,
        }
    }

    /// Run the connection task.
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("Connection task started");
        let mut sweep = self.options.request_timeout.map(|_| {
            let mut timer = interval(config::TIMEOUT_SWEEP_INTERVAL);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown(CloseReason::HandleDropped).await;
                        break;
                    }
                },
                event = next_link_event(&mut self.link_events) => {
                    self.handle_link_event(event).await;
                }
                tick = next_poll(&mut self.poll_source) => {
                    self.handle_poll(tick).await;
                }
                _ = next_sweep(&mut sweep) => {
                    self.expire_requests();
                }
            }

            if !sweep_active(self.state, self.options.request_timeout) {
                sweep = None;
            }
        }

        debug!("Connection task exited");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let result = self.establish().await;
                let _ = reply.send(result);
            }
            Command::Send {
                method,
                params,
                callback,
                reply,
            } => {
                let result = self.send(method, params, callback).await;
                let _ = reply.send(result);
            }
            Command::Close { reply } => {
                self.shutdown(CloseReason::Requested).await;
                let _ = reply.send(());
            }
        }
    }

    /// Disconnected -> Connecting -> DiscoveringServices -> Ready.
    async fn establish(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Ready => return Ok(()),
            state => return Err(RpcError::NotReady(state)),
        }

        self.transition(ConnectionState::Connecting);
        let link_events = match self.link.connect().await {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail_transport(e).await),
        };
        self.link_events = Some(link_events);
        self.status.set_peer(self.link.peer());
        info!("Link established with {}", self.link.peer());

        self.transition(ConnectionState::DiscoveringServices);
        let services = match self.link.discover_services().await {
            Ok(services) => services,
            Err(e) => return Err(self.fail_transport(e).await),
        };

        let (inbox, epoll) = match resolve_characteristics(&services) {
            Ok(handles) => handles,
            Err(e) => {
                let message = e.to_string();
                error!("RPC service unusable: {}", message);
                self.status.set_error(message.clone());
                self.shutdown(CloseReason::Configuration(message.clone()))
                    .await;
                return Err(RpcError::Configuration(message));
            }
        };

        let source = match self.options.poll_mode {
            PollMode::Notify => match self.link.subscribe_notifications(&epoll).await {
                Ok(stream) => PollSource::Notifications(stream),
                Err(e) => return Err(self.fail_transport(e).await),
            },
            PollMode::Interval(period) => {
                info!("Polling {} every {:?}", RPC_EPOLL_UUID, period);
                PollSource::timer(period)
            }
        };

        self.inbox = Some(inbox);
        self.epoll = Some(epoll);
        self.poll_source = Some(source);
        self.transition(ConnectionState::Ready);
        Ok(())
    }

    async fn send(
        &mut self,
        method: String,
        params: Value,
        callback: Option<ResponseCallback>,
    ) -> Result<RequestId> {
        let inbox = match (&self.inbox, self.state) {
            (Some(inbox), ConnectionState::Ready) => inbox.clone(),
            _ => return Err(RpcError::NotReady(self.state)),
        };

        let request = self.correlator.prepare(method, params);
        let frame = codec::encode(&request)?;
        debug!(
            "Sending request {} ({}): {} bytes",
            request.id,
            request.method,
            frame.len()
        );

        if let Err(e) = self.link.write_characteristic(&inbox, &frame).await {
            error!("Write of request {} failed: {}", request.id, e);
            self.on_transport_error(&e).await;
            return Err(RpcError::Transport(e));
        }

        let id = request.id;
        self.correlator.register(request, callback);
        self.status
            .set_outstanding(self.correlator.outstanding_count());
        Ok(id)
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Disconnected => {
                warn!("Link to {} lost", self.link.peer());
                self.shutdown(CloseReason::LinkLost).await;
            }
        }
    }

    async fn handle_poll(&mut self, tick: PollTick) {
        match tick {
            PollTick::Signal(payload) => {
                if self.reader.on_signal(&payload) {
                    self.pull_inbox().await;
                }
            }
            PollTick::Due => {
                let Some(epoll) = self.epoll.clone() else {
                    return;
                };
                match self.link.read_characteristic(&epoll).await {
                    Ok(payload) => {
                        if self.reader.on_signal(&payload) {
                            self.pull_inbox().await;
                        }
                    }
                    Err(e) => {
                        warn!("Poll-signal read failed: {}", e);
                        self.on_transport_error(&e).await;
                    }
                }
            }
            PollTick::Ended => {
                warn!("Poll-signal notifications ended");
                self.shutdown(CloseReason::LinkLost).await;
            }
        }
    }

    /// Read the inbox once and route whatever messages it completes.
    async fn pull_inbox(&mut self) {
        let Some(inbox) = self.inbox.clone() else {
            return;
        };

        let events = &self.events;
        let result = poller::transfer(&mut self.link, &inbox, &mut self.codec, |dropped| {
            emit(events, ConnectionEvent::FrameDropped(dropped))
        })
        .await;

        match result {
            Ok(messages) => {
                for message in messages {
                    self.route(message);
                }
                self.status
                    .set_outstanding(self.correlator.outstanding_count());
            }
            Err(e) => {
                warn!("Inbox read failed: {}", e);
                self.on_transport_error(&e).await;
            }
        }
    }

    fn route(&mut self, message: Value) {
        match Inbound::classify(message) {
            Inbound::Response(response) => {
                let id = response.id;
                if self.correlator.dispatch(response) == DispatchOutcome::Orphan {
                    emit(&self.events, ConnectionEvent::OrphanResponse(id));
                }
            }
            Inbound::Notification { method, params } => {
                debug!("Notification from peripheral: {}", method);
                emit(
                    &self.events,
                    ConnectionEvent::Notification { method, params },
                );
            }
            Inbound::Unrecognized(value) => {
                warn!("Ignoring unrecognized message: {}", value);
            }
        }
    }

    fn expire_requests(&mut self) {
        let Some(timeout) = self.options.request_timeout else {
            return;
        };
        let expired = self.correlator.expire(Instant::now(), timeout);
        if !expired.is_empty() {
            self.status
                .set_outstanding(self.correlator.outstanding_count());
        }
    }

    async fn on_transport_error(&mut self, e: &LinkError) {
        self.status.set_error(e.to_string());
        if e.is_fatal() {
            self.shutdown(CloseReason::TransportFailure(e.to_string()))
                .await;
        }
    }

    /// Close after a failed connect step and hand back the error for the caller.
    async fn fail_transport(&mut self, e: LinkError) -> RpcError {
        error!("Connection failed while {}: {}", self.state, e);
        self.status.set_error(e.to_string());
        self.shutdown(CloseReason::TransportFailure(e.to_string()))
            .await;
        RpcError::Transport(e)
    }

    /// Release everything and move to Closed.
    async fn shutdown(&mut self, reason: CloseReason) {
        if self.state == ConnectionState::Closed {
            return;
        }

        self.poll_source = None;
        self.link_events = None;
        self.inbox = None;
        self.epoll = None;

        if self.state != ConnectionState::Disconnected {
            if let Err(e) = self.link.disconnect().await {
                debug!("Disconnect failed: {}", e);
            }
        }

        self.codec.reset();
        self.status.set_close_reason(reason.clone());
        let released = self.correlator.cancel_all(&reason);
        self.status.set_outstanding(0);

        info!(
            "Connection closed ({}); {} poll signal(s) ({} ignored), {} inbox read(s), \
             {} dropped frame(s), {} request(s) released",
            reason,
            self.reader.signals(),
            self.reader.ignored(),
            self.reader.reads_issued(),
            self.codec.dropped_frames(),
            released
        );
        self.transition(ConnectionState::Closed);
        emit(&self.events, ConnectionEvent::Closed(reason));
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("State: {} -> {}", self.state, next);
        self.state = next;
        self.status.set_state(next);
        emit(&self.events, ConnectionEvent::StateChanged(next));
    }
}

/// Find the inbox and poll-signal characteristics of the RPC service.
fn resolve_characteristics(
    services: &[DiscoveredService],
) -> std::result::Result<(CharacteristicHandle, CharacteristicHandle), LinkError> {
    let service = services
        .iter()
        .find(|s| s.uuid == RPC_SERVICE_UUID)
        .ok_or(LinkError::ServiceNotFound(RPC_SERVICE_UUID))?;

    let inbox = service
        .characteristic(RPC_INBOX_UUID)
        .ok_or(LinkError::CharacteristicNotFound(RPC_INBOX_UUID))?;
    let epoll = service
        .characteristic(RPC_EPOLL_UUID)
        .ok_or(LinkError::CharacteristicNotFound(RPC_EPOLL_UUID))?;

    Ok((inbox.clone(), epoll.clone()))
}

/// Queue an event without ever waiting on the consumer.
fn emit(events: &mpsc::Sender<ConnectionEvent>, event: ConnectionEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => debug!("Event queue full, dropping {:?}", event),
        Err(TrySendError::Closed(_)) => {}
    }
}

async fn next_link_event(stream: &mut Option<LinkEventStream>) -> LinkEvent {
    match stream {
        // A finished event stream means the stack let go of the device.
        Some(stream) => stream.next().await.unwrap_or(LinkEvent::Disconnected),
        None => pending().await,
    }
}

async fn next_poll(source: &mut Option<PollSource>) -> PollTick {
    match source {
        Some(source) => source.next().await,
        None => pending().await,
    }
}

/// Whether outstanding requests still need timeout sweeps.
fn sweep_active(state: ConnectionState, request_timeout: Option<Duration>) -> bool {
    request_timeout.is_some() && state != ConnectionState::Closed
}

async fn next_sweep(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}
