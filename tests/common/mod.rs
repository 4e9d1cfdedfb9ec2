//! Scripted in-memory peripheral for driving the RPC client without a radio.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use ble_jsonrpc::bluetooth::ble_constants::{
    RECORD_DELIMITER, RPC_EPOLL_UUID, RPC_INBOX_UUID, RPC_SERVICE_UUID,
};
use ble_jsonrpc::bluetooth::codec;
use ble_jsonrpc::bluetooth::{
    CharacteristicHandle, ConnectionEvent, DiscoveredService, LinkAdapter, LinkError, LinkEvent,
    LinkEventStream, NotificationStream,
};

const INBOX_INDEX: u32 = 1;
const EPOLL_INDEX: u32 = 2;

#[derive(Default)]
struct Inner {
    services: Vec<DiscoveredService>,
    inbox: VecDeque<Vec<u8>>,
    epoll_value: Vec<u8>,
    writes: Vec<Vec<u8>>,
    inbox_reads: usize,
    epoll_reads: usize,
    disconnects: usize,
    connected: bool,
    fail_connect: Option<LinkError>,
    fail_write: Option<LinkError>,
    fail_subscribe: Option<LinkError>,
    notify_tx: Option<UnboundedSender<Vec<u8>>>,
    event_tx: Option<UnboundedSender<LinkEvent>>,
}

/// Test-side view of the fake peripheral.
#[derive(Clone, Default)]
pub struct MockPeripheral {
    inner: Arc<Mutex<Inner>>,
}

impl MockPeripheral {
    /// Peripheral exposing the RPC service with both characteristics.
    pub fn new() -> Self {
        Self::with_characteristics(&[RPC_INBOX_UUID, RPC_EPOLL_UUID])
    }

    pub fn with_characteristics(uuids: &[uuid::Uuid]) -> Self {
        let peripheral = Self::default();
        let characteristics = uuids
            .iter()
            .map(|uuid| CharacteristicHandle {
                uuid: *uuid,
                index: if *uuid == RPC_INBOX_UUID {
                    INBOX_INDEX
                } else {
                    EPOLL_INDEX
                },
            })
            .collect();
        peripheral.inner.lock().unwrap().services = vec![DiscoveredService {
            uuid: RPC_SERVICE_UUID,
            characteristics,
        }];
        peripheral
    }

    pub fn link(&self) -> MockLink {
        MockLink {
            peripheral: self.clone(),
        }
    }

    /// Queue a response frame for the next inbox read.
    pub fn queue_message(&self, message: &Value) {
        self.queue_bytes(codec::encode(message).unwrap());
    }

    /// Queue raw bytes returned by one inbox read.
    pub fn queue_bytes(&self, bytes: Vec<u8>) {
        self.inner.lock().unwrap().inbox.push_back(bytes);
    }

    /// Push a poll-signal notification.
    pub fn signal(&self, queued: u32) {
        self.notify_raw(queued.to_be_bytes().to_vec());
    }

    pub fn notify_raw(&self, payload: Vec<u8>) {
        let inner = self.inner.lock().unwrap();
        if let Some(tx) = &inner.notify_tx {
            let _ = tx.unbounded_send(payload);
        }
    }

    /// Value returned when the poll-signal characteristic is read.
    pub fn set_epoll_value(&self, queued: u32) {
        self.inner.lock().unwrap().epoll_value = queued.to_be_bytes().to_vec();
    }

    /// Simulate the peripheral dropping the link.
    pub fn drop_link(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        if let Some(tx) = &inner.event_tx {
            let _ = tx.unbounded_send(LinkEvent::Disconnected);
        }
    }

    pub fn fail_connect(&self, e: LinkError) {
        self.inner.lock().unwrap().fail_connect = Some(e);
    }

    pub fn fail_next_write(&self, e: LinkError) {
        self.inner.lock().unwrap().fail_write = Some(e);
    }

    pub fn fail_subscribe(&self, e: LinkError) {
        self.inner.lock().unwrap().fail_subscribe = Some(e);
    }

    /// Requests written to the inbox, decoded.
    pub fn written_messages(&self) -> Vec<Value> {
        self.inner
            .lock()
            .unwrap()
            .writes
            .iter()
            .map(|frame| {
                assert_eq!(frame.last(), Some(&RECORD_DELIMITER));
                serde_json::from_slice(&frame[..frame.len() - 1]).unwrap()
            })
            .collect()
    }

    pub fn inbox_reads(&self) -> usize {
        self.inner.lock().unwrap().inbox_reads
    }

    pub fn epoll_reads(&self) -> usize {
        self.inner.lock().unwrap().epoll_reads
    }

    pub fn disconnects(&self) -> usize {
        self.inner.lock().unwrap().disconnects
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }
}

/// Link adapter half handed to the client.
pub struct MockLink {
    peripheral: MockPeripheral,
}

impl MockLink {
    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.peripheral.inner.lock().unwrap()
    }
}

#[async_trait]
impl LinkAdapter for MockLink {
    async fn connect(&mut self) -> Result<LinkEventStream, LinkError> {
        let mut inner = self.inner();
        if let Some(e) = inner.fail_connect.take() {
            return Err(e);
        }
        let (tx, rx) = unbounded();
        inner.event_tx = Some(tx);
        inner.connected = true;
        Ok(rx.boxed())
    }

    async fn discover_services(&mut self) -> Result<Vec<DiscoveredService>, LinkError> {
        Ok(self.inner().services.clone())
    }

    async fn write_characteristic(
        &mut self,
        handle: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<(), LinkError> {
        let mut inner = self.inner();
        if !inner.connected {
            return Err(LinkError::NotConnected);
        }
        if let Some(e) = inner.fail_write.take() {
            return Err(e);
        }
        assert_eq!(handle.uuid, RPC_INBOX_UUID);
        inner.writes.push(data.to_vec());
        Ok(())
    }

    async fn read_characteristic(
        &mut self,
        handle: &CharacteristicHandle,
    ) -> Result<Vec<u8>, LinkError> {
        let mut inner = self.inner();
        if !inner.connected {
            return Err(LinkError::NotConnected);
        }
        if handle.uuid == RPC_INBOX_UUID {
            inner.inbox_reads += 1;
            Ok(inner.inbox.pop_front().unwrap_or_default())
        } else {
            inner.epoll_reads += 1;
            let value = inner.epoll_value.clone();
            if !inner.inbox.is_empty() && value.is_empty() {
                return Ok(vec![0, 0, 0, 1]);
            }
            Ok(value)
        }
    }

    async fn subscribe_notifications(
        &mut self,
        handle: &CharacteristicHandle,
    ) -> Result<NotificationStream, LinkError> {
        let mut inner = self.inner();
        if let Some(e) = inner.fail_subscribe.take() {
            return Err(e);
        }
        assert_eq!(handle.uuid, RPC_EPOLL_UUID);
        let (tx, rx) = unbounded();
        inner.notify_tx = Some(tx);
        Ok(rx.boxed())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        let mut inner = self.inner();
        inner.connected = false;
        inner.disconnects += 1;
        inner.notify_tx = None;
        inner.event_tx = None;
        Ok(())
    }

    fn peer(&self) -> String {
        "mock:00:11:22:33:44:55".to_string()
    }
}

/// Wait for the first event matching `pred`, failing after a second.
pub async fn wait_for_event<F>(
    events: &mut mpsc::Receiver<ConnectionEvent>,
    mut pred: F,
) -> ConnectionEvent
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    let deadline = Duration::from_secs(1);
    tokio::time::timeout(deadline, async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
