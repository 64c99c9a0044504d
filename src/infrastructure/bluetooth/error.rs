//! Error types for the BLE engine.

use thiserror::Error;
use uuid::Uuid;

/// Failures reported by a transport backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("device is already paired")]
    AlreadyPaired,

    #[error("operation timed out")]
    Timeout,

    #[error("peripheral rejected the request: {0}")]
    Rejected(String),

    #[error("platform error: {0}")]
    Platform(String),
}

#[cfg(windows)]
impl From<windows::core::Error> for TransportError {
    fn from(e: windows::core::Error) -> Self {
        Self::Platform(e.to_string())
    }
}

/// Engine-level error taxonomy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BleError {
    #[error("no matching device found within {timeout_ms} ms")]
    DeviceNotFound { timeout_ms: u64 },

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("pairing degraded: {0}")]
    PairingDegraded(String),

    #[error("MTU negotiation degraded: {0}")]
    NegotiationDegraded(String),

    #[error("subscribe to {uuid} failed: {reason}")]
    SubscribeFailed { uuid: Uuid, reason: String },

    #[error("write of {command:02X?} failed: {reason}")]
    WriteFailed { command: Vec<u8>, reason: String },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("device disconnected unexpectedly")]
    UnexpectedDisconnect,

    #[error("disconnect failed: {0}")]
    DisconnectFailed(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("teardown finished with {} failure(s)", failures.len())]
    TeardownIncomplete { failures: Vec<BleError> },
}

impl BleError {
    /// Flatten nested teardown batches into a single list
    pub fn into_failures(self) -> Vec<BleError> {
        match self {
            Self::TeardownIncomplete { failures } => failures
                .into_iter()
                .flat_map(BleError::into_failures)
                .collect(),
            other => vec![other],
        }
    }
}
