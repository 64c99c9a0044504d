//! Notification frame decoding
//!
//! # Heart Rate Measurement
//!
//! ```text
//! [0]     : Flags
//!           bit 0: value is u16 (else u8)
//!           bit 3: energy expended present (u16, skipped)
//!           bit 4: RR intervals present
//! [1..]   : Value (u8 or u16 little-endian)
//! [..]    : Energy expended (u16), if flagged
//! [..]    : RR intervals (u16 little-endian, 1/1024 s units), if flagged
//! ```
//!
//! # PMD Data
//!
//! ```text
//! [0]     : Measurement type
//! [1..]   : Payload (timestamp, frame type, samples)
//! ```

use crate::domain::models::{ControlResponse, HeartRateMeasurement, MotionFrame, SensorKind};
use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::protocol::CONTROL_RESPONSE_CODE;

const HR_FLAG_U16_VALUE: u8 = 0x01;
const HR_FLAG_ENERGY_EXPENDED: u8 = 0x08;
const HR_FLAG_RR_PRESENT: u8 = 0x10;

/// Convert a raw RR value (1/1024 s) to milliseconds, one decimal place
fn rr_to_millis(raw: u16) -> f64 {
    let millis = raw as f64 / 1024.0 * 1000.0;
    (millis * 10.0).round_ties_even() / 10.0
}

pub fn decode_heart_rate(bytes: &[u8]) -> Result<HeartRateMeasurement, BleError> {
    if bytes.len() < 2 {
        return Err(BleError::MalformedFrame(format!(
            "heart rate frame needs at least 2 bytes, got {}",
            bytes.len()
        )));
    }

    let flags = bytes[0];
    let (value, mut offset) = if flags & HR_FLAG_U16_VALUE != 0 {
        let raw = bytes.get(1..3).ok_or_else(|| {
            BleError::MalformedFrame("truncated 16-bit heart rate value".to_string())
        })?;
        (u16::from_le_bytes([raw[0], raw[1]]), 3)
    } else {
        (bytes[1] as u16, 2)
    };

    if flags & HR_FLAG_ENERGY_EXPENDED != 0 {
        offset += 2;
    }

    let mut rr_intervals = Vec::new();
    if flags & HR_FLAG_RR_PRESENT != 0 {
        while let Some(raw) = bytes.get(offset..offset + 2) {
            rr_intervals.push(rr_to_millis(u16::from_le_bytes([raw[0], raw[1]])));
            offset += 2;
        }
    }

    Ok(HeartRateMeasurement {
        value,
        rr_intervals,
    })
}

pub fn decode_pmd_frame(bytes: &[u8]) -> Result<MotionFrame, BleError> {
    let (&kind, payload) = bytes
        .split_first()
        .ok_or_else(|| BleError::MalformedFrame("empty PMD data frame".to_string()))?;

    Ok(MotionFrame {
        sensor_kind: SensorKind::from_code(kind),
        payload: payload.to_vec(),
    })
}

pub fn decode_control_response(bytes: &[u8]) -> Result<ControlResponse, BleError> {
    match bytes {
        [CONTROL_RESPONSE_CODE, opcode, kind, status, parameters @ ..] => Ok(ControlResponse {
            opcode: *opcode,
            sensor_kind: SensorKind::from_code(*kind),
            status: *status,
            parameters: parameters.to_vec(),
        }),
        _ => Err(BleError::MalformedFrame(format!(
            "unexpected control point response {:02X?}",
            bytes
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heart_rate_u8_without_rr() {
        for bpm in [0u8, 42, 60, 199, 255] {
            let hr = decode_heart_rate(&[0x00, bpm]).unwrap();
            assert_eq!(hr.value, bpm as u16);
            assert!(hr.rr_intervals.is_empty());
        }
    }

    #[test]
    fn test_heart_rate_with_single_rr() {
        let hr = decode_heart_rate(&[0x10, 60, 0x00, 0x04]).unwrap();
        assert_eq!(hr.value, 60);
        assert_eq!(hr.rr_intervals, vec![1000.0]);
    }

    #[test]
    fn test_heart_rate_u16_value() {
        let hr = decode_heart_rate(&[0x01, 0x4B, 0x00]).unwrap();
        assert_eq!(hr.value, 75);
        assert!(hr.rr_intervals.is_empty());

        let hr = decode_heart_rate(&[0x01, 0x2C, 0x01]).unwrap();
        assert_eq!(hr.value, 300);
    }

    #[test]
    fn test_heart_rate_rr_order_and_rounding() {
        // 0x0320 = 800 -> 781.25 ms, 0x0340 = 832 -> 812.5 ms
        let hr = decode_heart_rate(&[0x10, 72, 0x20, 0x03, 0x40, 0x03]).unwrap();
        assert_eq!(hr.rr_intervals, vec![781.2, 812.5]);
    }

    #[test]
    fn test_heart_rate_skips_energy_expended() {
        // u16 value, energy expended 0x1234, one RR of 1024
        let hr = decode_heart_rate(&[0x19, 0x50, 0x00, 0x34, 0x12, 0x00, 0x04]).unwrap();
        assert_eq!(hr.value, 80);
        assert_eq!(hr.rr_intervals, vec![1000.0]);
    }

    #[test]
    fn test_heart_rate_trailing_odd_byte_ignored() {
        let hr = decode_heart_rate(&[0x10, 60, 0x00, 0x04, 0xFF]).unwrap();
        assert_eq!(hr.rr_intervals, vec![1000.0]);
    }

    #[test]
    fn test_heart_rate_decoding_is_repeatable() {
        let frame = [0x10, 64, 0x9A, 0x03, 0xB0, 0x03];
        assert_eq!(
            decode_heart_rate(&frame).unwrap(),
            decode_heart_rate(&frame).unwrap()
        );
    }

    #[test]
    fn test_heart_rate_malformed() {
        assert!(matches!(
            decode_heart_rate(&[]),
            Err(BleError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_heart_rate(&[0x00]),
            Err(BleError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_heart_rate(&[0x01, 0x4B]),
            Err(BleError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_pmd_frame() {
        let frame = decode_pmd_frame(&[0x02, 0x01, 0x02, 0x03]).unwrap();
        assert_eq!(frame.sensor_kind, SensorKind::Accelerometer);
        assert_eq!(frame.payload, vec![0x01, 0x02, 0x03]);

        let frame = decode_pmd_frame(&[0xFF]).unwrap();
        assert_eq!(frame.sensor_kind, SensorKind::Unknown(0xFF));
        assert!(frame.payload.is_empty());

        assert_eq!(
            decode_pmd_frame(&[0x05]).unwrap().sensor_kind,
            SensorKind::Gyroscope
        );
        assert_eq!(
            decode_pmd_frame(&[0x06]).unwrap().sensor_kind,
            SensorKind::Magnetometer
        );
        assert_eq!(
            decode_pmd_frame(&[0x03]).unwrap().sensor_kind,
            SensorKind::PulseToPulseInterval
        );
    }

    #[test]
    fn test_pmd_frame_empty() {
        assert!(matches!(
            decode_pmd_frame(&[]),
            Err(BleError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_control_response() {
        let response = decode_control_response(&[0xF0, 0x02, 0x02, 0x00, 0x01]).unwrap();
        assert_eq!(response.opcode, 0x02);
        assert_eq!(response.sensor_kind, SensorKind::Accelerometer);
        assert!(response.is_success());
        assert_eq!(response.parameters, vec![0x01]);

        let response = decode_control_response(&[0xF0, 0x02, 0x09, 0x06]).unwrap();
        assert!(!response.is_success());

        assert!(decode_control_response(&[0x0F, 0x01, 0x02, 0x00]).is_err());
        assert!(decode_control_response(&[0xF0, 0x02]).is_err());
    }
}
