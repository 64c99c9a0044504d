//! BLE biometric telemetry engine for Polar heart-rate straps and
//! multi-sensor units.
//!
//! Decoded heart-rate and motion events are pushed to a caller-supplied
//! [`TelemetryEvent`](domain::models::TelemetryEvent) channel.

pub mod domain;
pub mod infrastructure;

pub use domain::models::{
    DeviceFamily, DeviceIdentity, HeartRateMeasurement, MotionFrame, SensorKind, TelemetryEvent,
};
pub use infrastructure::bluetooth::{BleError, BluetoothService};
