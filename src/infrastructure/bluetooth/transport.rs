//! Transport abstraction
//!
//! The engine only needs a handful of GATT primitives. Backends push
//! notifications and link-loss events into a bounded channel which the
//! session task drains in order.

use crate::domain::models::{Advertisement, DeviceIdentity};
use crate::infrastructure::bluetooth::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events a backend delivers to the owning session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Notification { characteristic: Uuid, value: Vec<u8> },
    Disconnected,
}

#[async_trait]
pub trait BleTransport: Send {
    /// Start listening for advertisements. The receiver closes when scanning stops.
    async fn start_scan(&mut self) -> Result<mpsc::Receiver<Advertisement>, TransportError>;

    async fn stop_scan(&mut self) -> Result<(), TransportError>;

    async fn connect(
        &mut self,
        device: &DeviceIdentity,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Ask for a larger MTU, returning the MTU in effect
    async fn request_mtu(&mut self, mtu: u16) -> Result<u16, TransportError>;

    /// Bond with the peripheral. `AlreadyPaired` means a bond exists.
    async fn pair(&mut self) -> Result<(), TransportError>;

    async fn subscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError>;

    /// Write with response
    async fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Hand over the event stream. Only the first call returns `Some`.
    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>>;

    fn is_connected(&self) -> bool;
}
