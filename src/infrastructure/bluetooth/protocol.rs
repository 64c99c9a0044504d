//! Polar PMD Protocol
//!
//! GATT identifiers and the control-point command encoding used to drive
//! SDK mode and the raw sensor streams.

use crate::domain::models::SensorKind;
use crate::domain::settings::AccelerometerSettings;
use uuid::Uuid;

/// Standard Heart Rate Measurement characteristic
pub const HR_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/// PMD Control Point - commands are written here, responses are notified here
pub const PMD_CONTROL_UUID: Uuid = Uuid::from_u128(0xfb005c81_02e7_f387_1cad_8acd2d8df0c8);

/// PMD Data - raw sensor frames are notified here
pub const PMD_DATA_UUID: Uuid = Uuid::from_u128(0xfb005c82_02e7_f387_1cad_8acd2d8df0c8);

/// Measurement type byte addressing SDK mode on the control point
pub const SDK_MODE_TYPE: u8 = 0x09;

/// Leading byte of every control point response
pub const CONTROL_RESPONSE_CODE: u8 = 0xF0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Start,
    Stop,
}

impl Opcode {
    pub fn code(&self) -> u8 {
        match self {
            Self::Start => 0x02,
            Self::Stop => 0x03,
        }
    }
}

/// Setting group identifiers inside a start command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingType {
    SampleRate,
    Resolution,
    Range,
    RangeMilliunit,
    Channels,
    Factor,
}

impl SettingType {
    pub fn code(&self) -> u8 {
        match self {
            Self::SampleRate => 0x00,
            Self::Resolution => 0x01,
            Self::Range => 0x02,
            Self::RangeMilliunit => 0x03,
            Self::Channels => 0x04,
            Self::Factor => 0x05,
        }
    }
}

/// One `(type, values)` group of a start command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSetting {
    pub setting_type: SettingType,
    pub values: Vec<u16>,
}

impl StreamSetting {
    pub fn single(setting_type: SettingType, value: u16) -> Self {
        Self {
            setting_type,
            values: vec![value],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCommand {
    pub opcode: Opcode,
    pub sensor_kind: SensorKind,
    pub settings: Vec<StreamSetting>,
}

impl StreamCommand {
    /// Serialize as `<opcode> <type> [<setting> <count> <u16 LE>...]...`
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![self.opcode.code(), self.sensor_kind.code()];
        for setting in &self.settings {
            // The count is a single byte on the wire
            let values = &setting.values[..setting.values.len().min(u8::MAX as usize)];
            bytes.push(setting.setting_type.code());
            bytes.push(values.len() as u8);
            for value in values {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }
}

pub fn build_start_command(sensor_kind: SensorKind, settings: &[StreamSetting]) -> Vec<u8> {
    StreamCommand {
        opcode: Opcode::Start,
        sensor_kind,
        settings: settings.to_vec(),
    }
    .encode()
}

pub fn build_stop_command(sensor_kind: SensorKind) -> Vec<u8> {
    vec![Opcode::Stop.code(), sensor_kind.code()]
}

pub fn build_sdk_mode_command(enable: bool) -> Vec<u8> {
    let opcode = if enable { Opcode::Start } else { Opcode::Stop };
    vec![opcode.code(), SDK_MODE_TYPE]
}

impl AccelerometerSettings {
    /// Setting groups in the order the firmware expects them
    pub fn to_stream_settings(&self) -> Vec<StreamSetting> {
        vec![
            StreamSetting::single(SettingType::SampleRate, self.sample_rate_hz),
            StreamSetting::single(SettingType::Resolution, self.resolution_bits),
            StreamSetting::single(SettingType::Range, self.range_g),
            StreamSetting::single(SettingType::Channels, self.channels),
        ]
    }
}
