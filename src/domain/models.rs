use std::fmt;

/// Device families the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// Fixed-function chest strap. Heart rate is its only required capability.
    HeartRateStrap,
    /// Optical multi-sensor unit with an SDK streaming mode.
    MultiSensor,
}

impl DeviceFamily {
    /// Advertised name prefixes that identify this family
    pub fn name_prefixes(&self) -> &'static [&'static str] {
        match self {
            Self::HeartRateStrap => &["Polar H10"],
            Self::MultiSensor => &["Polar Sense", "Polar Verity Sense"],
        }
    }

    pub fn matches(&self, advertised_name: &str) -> bool {
        self.name_prefixes()
            .iter()
            .any(|prefix| advertised_name.starts_with(prefix))
    }

    /// Whether the family needs SDK mode for raw streams
    pub fn supports_sdk_mode(&self) -> bool {
        matches!(self, Self::MultiSensor)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::HeartRateStrap => "Polar H10",
            Self::MultiSensor => "Polar Verity Sense",
        }
    }
}

/// A discovered peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub address: u64,
    pub name: String,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.address.to_be_bytes();
        write!(
            f,
            "{} ({:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X})",
            self.name, b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// One advertisement seen while scanning
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub address: u64,
    pub name: Option<String>,
    pub signal_strength: i16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartRateMeasurement {
    /// Beats per minute
    pub value: u16,
    /// RR intervals in milliseconds, oldest first
    pub rr_intervals: Vec<f64>,
}

/// Sensor stream types carried by the PMD service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    Magnetometer,
    PulseToPulseInterval,
    Unknown(u8),
}

impl SensorKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x02 => Self::Accelerometer,
            0x05 => Self::Gyroscope,
            0x06 => Self::Magnetometer,
            0x03 => Self::PulseToPulseInterval,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Accelerometer => 0x02,
            Self::Gyroscope => 0x05,
            Self::Magnetometer => 0x06,
            Self::PulseToPulseInterval => 0x03,
            Self::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accelerometer => write!(f, "ACC"),
            Self::Gyroscope => write!(f, "GYR"),
            Self::Magnetometer => write!(f, "MAG"),
            Self::PulseToPulseInterval => write!(f, "PPI"),
            Self::Unknown(code) => write!(f, "0x{:02x}", code),
        }
    }
}

/// One PMD data notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionFrame {
    pub sensor_kind: SensorKind,
    /// Everything after the type byte, left for downstream decoders
    pub payload: Vec<u8>,
}

impl MotionFrame {
    /// Sensor timestamp (ns) leading the payload, if the frame is long enough
    pub fn timestamp_ns(&self) -> Option<u64> {
        let bytes: [u8; 8] = self.payload.get(..8)?.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }
}

/// PMD control point response: `F0 <opcode> <type> <status> [params]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub opcode: u8,
    pub sensor_kind: SensorKind,
    pub status: u8,
    pub parameters: Vec<u8>,
}

impl ControlResponse {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Scanning,
    Connecting,
    Negotiating,
    Pairing,
    SubscribingCore,
    EnablingSdkMode,
    Streaming,
    TearingDown,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// Everything the engine pushes to the caller's sink
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    HeartRate(HeartRateMeasurement),
    Motion(MotionFrame),
    ControlResponse(ControlResponse),
    /// A notification that could not be decoded. The stream keeps running.
    FrameError { characteristic: uuid::Uuid, reason: String },
    ConnectionStatus(ConnectionStatus),
    LogMessage(StatusMessage),
}
