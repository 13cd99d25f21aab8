// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! SH-2 report codec.
//!
//! Pure functions, no I/O: decoding of fixed-point input reports into
//! [`SensorEvent`]s and encoding of the Set Feature command that enables
//! them. The session layer walks a sensor-channel payload record by record;
//! each record's length is implied by its report ID.
//!
//! # Data Formats
//!
//! Input reports share a common 4-octet prefix (report ID, sequence, status,
//! delay) followed by little-endian 16-bit fixed-point data:
//!
//! | Report | ID | Length | Q-Point | Fields |
//! |--------|----|--------|---------|--------|
//! | Accelerometer | 0x01 | 10 | Q8 | x, y, z at offsets 4, 6, 8 |
//! | Gyroscope Calibrated | 0x02 | 10 | Q9 | x, y, z |
//! | Linear Acceleration | 0x04 | 10 | Q8 | x, y, z |
//! | Game Rotation Vector | 0x08 | 12 | Q14 | i, j, k, real |
//!
//! The low two bits of the status octet encode the accuracy estimate.

use glam::{Quat, Vec3};

use crate::constants::{
    q_to_f32, BASE_TIMESTAMP_LENGTH, Q_POINTS, SHUB_BASE_TIMESTAMP, SHUB_PROD_ID_REQ,
    SHUB_REPORT_SET_FEATURE_CMD,
};

/// SH-2 sensor report IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Sh2SensorId {
    /// Acceleration including gravity (m/s^2): Q point 8
    Accelerometer = 0x01,
    /// Calibrated gyroscope (rad/s): Q point 9
    GyroscopeCalibrated = 0x02,
    /// Acceleration minus gravity (m/s^2): Q point 8
    LinearAcceleration = 0x04,
    /// Gravity vector (m/s^2): Q point 8
    Gravity = 0x06,
    /// Gravity-referenced, yaw-free unit quaternion: Q point 14
    GameRotationVector = 0x08,

    // Status reports, reserved for future use; layouts left undecoded.
    StepCounter = 0x11,
    StabilityClassifier = 0x13,
    StepDetector = 0x18,
    ActivityClassifier = 0x1E,
}

impl Sh2SensorId {
    pub const fn report_id(self) -> u8 {
        self as u8
    }

    pub fn from_report_id(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::Accelerometer),
            0x02 => Some(Self::GyroscopeCalibrated),
            0x04 => Some(Self::LinearAcceleration),
            0x06 => Some(Self::Gravity),
            0x08 => Some(Self::GameRotationVector),
            0x11 => Some(Self::StepCounter),
            0x13 => Some(Self::StabilityClassifier),
            0x18 => Some(Self::StepDetector),
            0x1E => Some(Self::ActivityClassifier),
            _ => None,
        }
    }
}

/// Accuracy estimate from the low two bits of the report status octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Accuracy {
    Unreliable = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Accuracy {
    pub fn from_status(status: u8) -> Self {
        match status & 0x03 {
            1 => Self::Low,
            2 => Self::Medium,
            3 => Self::High,
            _ => Self::Unreliable,
        }
    }
}

/// One decoded SH-2 input report.
///
/// Exactly one of the data fields is populated, matching the sensor ID.
#[derive(Debug, Clone, Copy)]
pub struct SensorEvent {
    pub sensor_id: Sh2SensorId,
    pub accuracy: Accuracy,
    /// Accelerometer or linear acceleration, m/s^2
    pub accel: Option<Vec3>,
    /// Calibrated gyroscope, rad/s
    pub gyro: Option<Vec3>,
    /// Game rotation vector, unit quaternion
    pub game_quat: Option<Quat>,
}

impl SensorEvent {
    fn new(sensor_id: Sh2SensorId, accuracy: Accuracy) -> Self {
        Self {
            sensor_id,
            accuracy,
            accel: None,
            gyro: None,
            game_quat: None,
        }
    }
}

/// Record length implied by a report ID, for walking multi-report payloads.
///
/// Returns `None` for reports this decoder does not understand; the caller
/// cannot skip those because their length is unknown.
pub fn record_len(report_id: u8) -> Option<usize> {
    match report_id {
        0x01 | 0x02 | 0x04 | 0x06 => Some(10),
        0x08 => Some(12),
        _ => None,
    }
}

/// Consume a leading base-timestamp record (`0xFB` + 4-octet delta) if one
/// prefixes the payload. The delta is not applied; frame timestamps come
/// from the host's monotonic clock.
pub fn strip_base_timestamp(payload: &[u8]) -> &[u8] {
    if payload.len() >= BASE_TIMESTAMP_LENGTH && payload[0] == SHUB_BASE_TIMESTAMP {
        &payload[BASE_TIMESTAMP_LENGTH..]
    } else {
        payload
    }
}

/// Decode a single sensor-report record.
///
/// `record` starts at the report ID; the base-timestamp prefix must already
/// have been stripped. Returns `None` for unknown IDs and under-sized input.
pub fn decode_sensor_event(record: &[u8]) -> Option<SensorEvent> {
    if record.len() < 4 {
        return None;
    }
    let report_id = record[0];
    let accuracy = Accuracy::from_status(record[2]);

    match report_id {
        0x01 | 0x04 => {
            if record.len() < 10 {
                return None;
            }
            let q = Q_POINTS[report_id as usize];
            let v = Vec3::new(
                q_to_f32(le_i16(record, 4), q),
                q_to_f32(le_i16(record, 6), q),
                q_to_f32(le_i16(record, 8), q),
            );
            let sensor_id = Sh2SensorId::from_report_id(report_id)?;
            let mut evt = SensorEvent::new(sensor_id, accuracy);
            evt.accel = Some(v);
            Some(evt)
        }
        0x02 => {
            if record.len() < 10 {
                return None;
            }
            let q = Q_POINTS[report_id as usize];
            let v = Vec3::new(
                q_to_f32(le_i16(record, 4), q),
                q_to_f32(le_i16(record, 6), q),
                q_to_f32(le_i16(record, 8), q),
            );
            let mut evt = SensorEvent::new(Sh2SensorId::GyroscopeCalibrated, accuracy);
            evt.gyro = Some(v);
            Some(evt)
        }
        0x08 => {
            if record.len() < 12 {
                return None;
            }
            let q = Q_POINTS[report_id as usize];
            // Component order on the wire is [i, j, k, real].
            let quat = Quat::from_xyzw(
                q_to_f32(le_i16(record, 4), q),
                q_to_f32(le_i16(record, 6), q),
                q_to_f32(le_i16(record, 8), q),
                q_to_f32(le_i16(record, 10), q),
            );
            let mut evt = SensorEvent::new(Sh2SensorId::GameRotationVector, accuracy);
            evt.game_quat = Some(quat);
            Some(evt)
        }
        _ => None,
    }
}

/// Build the 17-octet Set Feature command for a sensor at `interval_us`
/// microseconds between reports.
///
/// Feature flags 0 select non-wakeup operation; batch interval 0 selects
/// live streaming; the sensor-specific configuration word is unused.
pub fn build_set_feature(sensor: Sh2SensorId, interval_us: u32) -> [u8; 17] {
    let mut cmd = [0u8; 17];
    cmd[0] = SHUB_REPORT_SET_FEATURE_CMD;
    cmd[1] = sensor.report_id();
    // cmd[2] feature flags, cmd[3..5] change sensitivity: all zero
    cmd[5..9].copy_from_slice(&interval_us.to_le_bytes());
    // cmd[9..13] batch interval, cmd[13..17] sensor-specific config: all zero
    cmd
}

/// Build the Product ID request payload.
pub fn build_product_id_request() -> [u8; 2] {
    [SHUB_PROD_ID_REQ, 0]
}

#[inline]
fn le_i16(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}
