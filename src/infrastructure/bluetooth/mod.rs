//! Bluetooth Module
//!
//! BLE telemetry engine for Polar heart-rate straps and multi-sensor units.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │     (connect(family) / disconnect() for the app)         │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ConnectionSession                      │
//! │  scan → connect → MTU → pair → subscribe → SDK → stream  │
//! └──────┬──────────────┬──────────────┬──────────────┬─────┘
//!        │              │              │              │
//!        ▼              ▼              ▼              ▼
//! ┌───────────┐ ┌──────────────┐ ┌───────────┐ ┌───────────┐
//! │  Scanner  │ │Subscriptions │ │ SDK mode  │ │  Frames   │
//! └─────┬─────┘ └──────┬───────┘ └─────┬─────┘ └───────────┘
//!       │              │               │
//!       ▼              ▼               ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │      BleTransport (WinRT backend / test mock backend)    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT UUIDs and control point command encoding
//! - [`frames`] - Heart rate, PMD data and control response decoding
//! - [`transport`] - Backend abstraction and notification channel
//! - [`scanner`] - Name-prefix discovery with timeout
//! - [`subscriptions`] - Ordered notification subscriptions
//! - [`sdk_mode`] - SDK mode and sensor stream state machine
//! - [`connection`] - Per-device session lifecycle
//! - [`service`] - Main service coordinator

pub mod connection;
pub mod error;
pub mod frames;
#[cfg(test)]
pub mod mock;
pub mod protocol;
pub mod scanner;
pub mod sdk_mode;
pub mod service;
pub mod subscriptions;
pub mod transport;
#[cfg(windows)]
pub mod winrt;

// Re-export main service for convenience
pub use error::{BleError, TransportError};
pub use service::BluetoothService;
pub use transport::{BleTransport, TransportEvent};
