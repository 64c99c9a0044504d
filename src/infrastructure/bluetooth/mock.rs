//! In-memory transport for tests
//!
//! [`MockTransport`] is moved into the session; the paired [`MockHandle`]
//! stays with the caller to script failures and inspect every call the
//! engine made.

use crate::domain::models::{Advertisement, DeviceIdentity};
use crate::infrastructure::bluetooth::error::TransportError;
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportEvent};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A transport call recorded by the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    StartScan,
    StopScan,
    Connect(u64),
    RequestMtu(u16),
    Pair,
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Write(Uuid, Vec<u8>),
    Disconnect,
}

#[derive(Debug)]
struct MockState {
    advertisements: Vec<Advertisement>,
    connected: bool,
    connect_error: Option<TransportError>,
    connect_hangs: bool,
    disconnect_error: Option<TransportError>,
    mtu_result: Result<u16, TransportError>,
    pair_result: Result<(), TransportError>,
    subscribe_failures: HashSet<Uuid>,
    unsubscribe_failures: HashSet<Uuid>,
    write_failures: Vec<Vec<u8>>,
    write_hangs: Vec<Vec<u8>>,
    events_tx: Option<mpsc::Sender<TransportEvent>>,
    calls: Vec<MockCall>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            advertisements: Vec::new(),
            connected: false,
            connect_error: None,
            connect_hangs: false,
            disconnect_error: None,
            mtu_result: Ok(232),
            pair_result: Ok(()),
            subscribe_failures: HashSet::new(),
            unsubscribe_failures: HashSet::new(),
            write_failures: Vec::new(),
            write_hangs: Vec::new(),
            events_tx: None,
            calls: Vec::new(),
        }
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
    scan_tx: Option<mpsc::Sender<Advertisement>>,
}

/// Caller-side control of a [`MockTransport`]
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(queue_capacity: usize) -> (Self, MockHandle) {
        let (events_tx, events_rx) = mpsc::channel(queue_capacity.max(1));
        let state = Arc::new(Mutex::new(MockState {
            events_tx: Some(events_tx),
            ..MockState::default()
        }));
        (
            Self {
                state: state.clone(),
                events_rx: Some(events_rx),
                scan_tx: None,
            },
            MockHandle { state },
        )
    }

    fn record(&self, call: MockCall) -> MutexGuard<'_, MockState> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        state
    }
}

impl MockHandle {
    pub fn advertise(&self, address: u64, name: &str) {
        lock(&self.state).advertisements.push(Advertisement {
            address,
            name: Some(name.to_string()),
            signal_strength: -60,
        });
    }

    pub fn fail_connect(&self, error: TransportError) {
        lock(&self.state).connect_error = Some(error);
    }

    /// Leave every connect attempt pending forever
    pub fn hang_connect(&self) {
        lock(&self.state).connect_hangs = true;
    }

    /// The link still drops, but the call reports `error`
    pub fn fail_disconnect(&self, error: TransportError) {
        lock(&self.state).disconnect_error = Some(error);
    }

    pub fn set_mtu_result(&self, result: Result<u16, TransportError>) {
        lock(&self.state).mtu_result = result;
    }

    pub fn set_pair_result(&self, result: Result<(), TransportError>) {
        lock(&self.state).pair_result = result;
    }

    pub fn fail_subscribe(&self, characteristic: Uuid) {
        lock(&self.state).subscribe_failures.insert(characteristic);
    }

    pub fn fail_unsubscribe(&self, characteristic: Uuid) {
        lock(&self.state).unsubscribe_failures.insert(characteristic);
    }

    /// Reject any write whose payload equals `command`
    pub fn fail_write(&self, command: Vec<u8>) {
        lock(&self.state).write_failures.push(command);
    }

    /// Never acknowledge a write whose payload equals `command`
    pub fn hang_write(&self, command: Vec<u8>) {
        lock(&self.state).write_hangs.push(command);
    }

    async fn send_event(&self, event: TransportEvent) {
        let events_tx = lock(&self.state).events_tx.clone();
        if let Some(events_tx) = events_tx {
            let _ = events_tx.send(event).await;
        }
    }

    /// Push a notification as if the peripheral had sent it
    pub async fn notify(&self, characteristic: Uuid, value: Vec<u8>) {
        self.send_event(TransportEvent::Notification {
            characteristic,
            value,
        })
        .await;
    }

    /// Simulate the peripheral dropping the link
    pub async fn drop_link(&self) {
        lock(&self.state).connected = false;
        self.send_event(TransportEvent::Disconnected).await;
    }

    /// Drop the event sender so the receiving side sees the channel close
    pub fn close_events(&self) {
        lock(&self.state).events_tx = None;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state).calls.clone()
    }

    /// Payloads written to `characteristic`, in order
    pub fn writes_to(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Write(uuid, value) if *uuid == characteristic => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn start_scan(&mut self) -> Result<mpsc::Receiver<Advertisement>, TransportError> {
        let advertisements = self.record(MockCall::StartScan).advertisements.clone();
        let (tx, rx) = mpsc::channel(advertisements.len().max(1));
        for advertisement in advertisements {
            let _ = tx.try_send(advertisement);
        }
        // Keep the scan open until stop_scan, like a live radio
        self.scan_tx = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&mut self) -> Result<(), TransportError> {
        drop(self.record(MockCall::StopScan));
        self.scan_tx = None;
        Ok(())
    }

    async fn connect(
        &mut self,
        device: &DeviceIdentity,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        let hangs = {
            let mut state = self.record(MockCall::Connect(device.address));
            if let Some(error) = state.connect_error.clone() {
                return Err(error);
            }
            state.connected = !state.connect_hangs;
            state.connect_hangs
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn request_mtu(&mut self, mtu: u16) -> Result<u16, TransportError> {
        let state = self.record(MockCall::RequestMtu(mtu));
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.mtu_result.clone()
    }

    async fn pair(&mut self) -> Result<(), TransportError> {
        let state = self.record(MockCall::Pair);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.pair_result.clone()
    }

    async fn subscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        let state = self.record(MockCall::Subscribe(characteristic));
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.subscribe_failures.contains(&characteristic) {
            return Err(TransportError::CharacteristicNotFound(characteristic));
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        let state = self.record(MockCall::Unsubscribe(characteristic));
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.unsubscribe_failures.contains(&characteristic) {
            return Err(TransportError::Rejected("unsubscribe refused".to_string()));
        }
        Ok(())
    }

    async fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        let hangs = {
            let state = self.record(MockCall::Write(characteristic, value.to_vec()));
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if state.write_failures.iter().any(|cmd| cmd == value) {
                return Err(TransportError::Rejected("write refused".to_string()));
            }
            state.write_hangs.iter().any(|cmd| cmd == value)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.record(MockCall::Disconnect);
        state.connected = false;
        match state.disconnect_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.take()
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}
