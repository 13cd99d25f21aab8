// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! IMU session lifecycle.
//!
//! [`ImuSession`] owns the SHTP link and the decoded sensor state. It
//! bootstraps the hub (soft reset, startup drain, product-ID handshake),
//! enables the reports the classifier needs, and assembles timestamped pose
//! frames from the receive path.
//!
//! A pose frame is emitted only when all three of quaternion, acceleration
//! and gyroscope have been refreshed since the previous emission. Freshness
//! is tracked with monotonic per-slot counters checked at emission time; the
//! receive path never calls back into consumers.

use std::time::{Duration, Instant};

use glam::{Quat, Vec3};
use log::{debug, trace, warn};
use serde::Serialize;
use thiserror::Error;

use crate::constants::{
    hub_error_to_str, CMD_RESP_ADVERTISEMENT, CMD_RESP_ERROR_LIST, EXECUTABLE_DEVICE_CMD_RESET,
    EXECUTABLE_DEVICE_RESP_RESET_COMPLETE, SH2_INIT_SYSTEM, SH2_STARTUP_INIT_UNSOLICITED,
    SHUB_COMMAND_RESP, SHUB_GET_FEATURE_RESP, SHUB_PROD_ID_RESP,
};
use crate::interface::{BusError, BusInterface, LinuxI2cBus};
use crate::sh2::{
    build_product_id_request, build_set_feature, decode_sensor_event, record_len,
    strip_base_timestamp, SensorEvent, Sh2SensorId,
};
use crate::shtp::{ShtpChannel, ShtpError, ShtpFrame, ShtpLink};

/// Iterations of the aggressive startup drain after a soft reset
const DRAIN_ITERATIONS: u16 = 200;
/// Iterations of the settle drain that follows
const SETTLE_ITERATIONS: u16 = 50;
/// How long the hub gets to answer the product-ID request
const PRODUCT_ID_WAIT: Duration = Duration::from_millis(500);
/// How long the hub gets to acknowledge feature enablement
const FEATURE_ACK_WAIT: Duration = Duration::from_millis(2000);
/// Low-pass coefficient for the absolute-accelerometer gravity estimate
const GRAVITY_ALPHA: f32 = 0.02;

/// Session-level error taxonomy.
///
/// The framer and codec report locally; this layer converts their faults
/// into the classes the supervisor picks recovery strategies from.
#[derive(Debug, Error)]
pub enum ImuError {
    /// No frame within the window; soft, retried
    #[error("timeout waiting for sensor data")]
    Timeout,

    /// OS-level transport fault; requires a full re-init
    #[error("bus fault: {0}")]
    Bus(#[source] BusError),

    /// Transient link fault; a soft reset usually clears it
    #[error("transport fault: {0}")]
    Comm(#[source] BusError),

    /// Framer or codec violation; resets the session
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// The sensor announced an autonomous reset
    #[error("sensor reported reset")]
    SensorReset,

    /// The handshake never completed
    #[error("sensor did not acknowledge product id")]
    ProductId,
}

impl From<ShtpError> for ImuError {
    fn from(err: ShtpError) -> Self {
        match err {
            ShtpError::Bus(BusError::Io(e)) => Self::Bus(BusError::Io(e)),
            ShtpError::Bus(short) => Self::Comm(short),
            ShtpError::OversizeFrame { .. } => Self::Protocol("oversize frame"),
            ShtpError::InvalidHeader { .. } => Self::Protocol("invalid frame header"),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct ImuConfig {
    /// I2C bus number (`/dev/i2c-<bus>`)
    pub bus: u8,
    /// 7-bit slave address
    pub addr: u16,
    /// Report rate, clamped to 1..=400
    pub hz: u16,
    /// Per-poll read timeout in milliseconds
    pub timeout_ms: u32,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            bus: 1,
            addr: 0x4A,
            hz: 100,
            timeout_ms: 50,
        }
    }
}

impl ImuConfig {
    pub fn device_path(&self) -> String {
        format!("/dev/i2c-{}", self.bus)
    }

    /// Clamp the configured values into their operating ranges.
    pub fn normalized(mut self) -> Self {
        self.hz = self.hz.clamp(1, 400);
        self.timeout_ms = self.timeout_ms.max(1);
        self
    }
}

/// Assembled pose frame: seconds since session start, linear acceleration
/// (accelerometer fallback), calibrated gyroscope, game rotation vector.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoseFrame {
    pub t: f64,
    pub ax: f32,
    pub ay: f32,
    pub az: f32,
    pub gx: f32,
    pub gy: f32,
    pub gz: f32,
    pub qw: f32,
    pub qi: f32,
    pub qj: f32,
    pub qk: f32,
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    EnablingReports,
    Streaming,
    Resetting,
}

#[derive(Debug, Default, Clone, Copy)]
struct ValueSlot<T> {
    value: Option<T>,
    counter: u64,
}

impl<T> ValueSlot<T> {
    fn update(&mut self, value: T, counter: u64) {
        self.value = Some(value);
        self.counter = counter;
    }
}

#[derive(Debug, Default)]
struct SensorState {
    accel: ValueSlot<Vec3>,
    linear_accel: ValueSlot<Vec3>,
    gyro: ValueSlot<Vec3>,
    quat: ValueSlot<Quat>,
    advert_received: bool,
    init_received: bool,
    prod_id_verified: bool,
    feature_acked: [bool; 16],
    last_error: Option<u8>,
    pending_reset: bool,
}

/// Per-slot counters snapshotted at each emission; a slot is fresh when its
/// counter has moved past the snapshot.
#[derive(Debug, Default, Clone, Copy)]
struct FrameMarkers {
    quat: u64,
    gyro: u64,
    linear: u64,
    accel: u64,
}

#[derive(Debug)]
pub struct ImuSession<B> {
    link: ShtpLink<B>,
    config: ImuConfig,
    state: SessionState,
    sensors: SensorState,
    markers: FrameMarkers,
    report_counter: u64,
    /// Low-pass gravity estimate for the absolute-accelerometer fallback
    gravity: Option<Vec3>,
    epoch: Instant,
    last_t: f64,
}

impl ImuSession<LinuxI2cBus> {
    /// Open the configured bus, bootstrap the hub and enable reports.
    pub fn open(config: ImuConfig) -> Result<Self, ImuError> {
        let config = config.normalized();
        let bus = LinuxI2cBus::open(config.bus, config.addr).map_err(ImuError::Bus)?;
        Self::with_bus(bus, config)
    }
}

impl<B: BusInterface> ImuSession<B> {
    /// Bootstrap a session over an already-open transport.
    pub fn with_bus(bus: B, config: ImuConfig) -> Result<Self, ImuError> {
        let config = config.normalized();
        let mut session = Self {
            link: ShtpLink::new(bus),
            config,
            state: SessionState::Closed,
            sensors: SensorState::default(),
            markers: FrameMarkers::default(),
            report_counter: 0,
            gravity: None,
            epoch: Instant::now(),
            last_t: 0.0,
        };
        session.bootstrap()?;
        session.enable_reports(session.config.hz)?;
        Ok(session)
    }

    pub fn config(&self) -> &ImuConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last hub error code seen on the command channel, for diagnostics.
    pub fn last_error(&self) -> Option<u8> {
        self.sensors.last_error
    }

    /// Enable the reports the classifier consumes, all at the same rate.
    ///
    /// The classic accelerometer is enabled alongside linear acceleration as
    /// a fallback; frame assembly prefers the linear slot when both are
    /// fresh.
    pub fn enable_reports(&mut self, hz: u16) -> Result<(), ImuError> {
        self.state = SessionState::EnablingReports;
        let hz = hz.clamp(1, 400);
        self.config.hz = hz;
        let interval_us = 1_000_000u32 / hz as u32;

        let sensors = [
            Sh2SensorId::LinearAcceleration,
            Sh2SensorId::Accelerometer,
            Sh2SensorId::GyroscopeCalibrated,
            Sh2SensorId::GameRotationVector,
        ];
        for sensor in sensors {
            trace!("enable 0x{:02X} at {} us", sensor.report_id(), interval_us);
            let cmd = build_set_feature(sensor, interval_us);
            self.link.write_frame(ShtpChannel::HubControl, &cmd)?;
        }

        let start = Instant::now();
        while !self.all_features_acked(&sensors) && start.elapsed() < FEATURE_ACK_WAIT {
            self.handle_one_message(100)?;
        }
        for sensor in sensors {
            if !self.sensors.feature_acked[sensor.report_id() as usize] {
                warn!(
                    "feature 0x{:02X} not acknowledged within {:?}",
                    sensor.report_id(),
                    FEATURE_ACK_WAIT
                );
            }
        }
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Block until a complete pose frame is assembled or `timeout_ms`
    /// elapses.
    pub fn poll_frame(&mut self, timeout_ms: u32) -> Result<PoseFrame, ImuError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        loop {
            if self.sensors.pending_reset {
                self.sensors.pending_reset = false;
                self.state = SessionState::Resetting;
                return Err(ImuError::SensorReset);
            }
            if let Some(frame) = self.try_build_frame() {
                return Ok(frame);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ImuError::Timeout);
            }
            let remaining = deadline
                .saturating_duration_since(now)
                .as_millis()
                .min(250) as u32;
            if let Some(frame) = self.link.read_frame(remaining)? {
                self.handle_frame(&frame);
            }
        }
    }

    /// Recover from a sensor-announced reset: bootstrap again over the same
    /// bus handle and re-enable reports. Idempotent.
    pub fn handle_reset(&mut self) -> Result<(), ImuError> {
        self.state = SessionState::Resetting;
        self.bootstrap()?;
        self.enable_reports(self.config.hz)?;
        Ok(())
    }

    /// Tell the hub to reset.
    pub fn soft_reset(&mut self) -> Result<(), ImuError> {
        trace!("soft reset");
        let data = [EXECUTABLE_DEVICE_CMD_RESET];
        self.link.write_frame(ShtpChannel::Executable, &data)?;
        Ok(())
    }

    fn bootstrap(&mut self) -> Result<(), ImuError> {
        self.state = SessionState::Opening;
        self.link.reset_sequences();
        self.sensors = SensorState::default();
        self.markers = FrameMarkers::default();
        self.report_counter = 0;
        self.gravity = None;

        self.soft_reset()?;
        std::thread::sleep(Duration::from_millis(150));
        self.eat_all_messages(DRAIN_ITERATIONS)?;
        std::thread::sleep(Duration::from_millis(50));
        self.eat_all_messages(SETTLE_ITERATIONS)?;

        self.verify_product_id()?;

        // The reset-complete provoked by our own soft reset is not an
        // autonomous sensor reset.
        self.sensors.pending_reset = false;
        self.epoch = Instant::now();
        self.last_t = 0.0;
        Ok(())
    }

    fn verify_product_id(&mut self) -> Result<(), ImuError> {
        trace!("request product id");
        let cmd = build_product_id_request();
        self.link.write_frame(ShtpChannel::HubControl, &cmd)?;

        // The deadline holds even while the hub keeps the bus busy with
        // startup chatter; only the response itself ends the wait early.
        let start = Instant::now();
        while !self.sensors.prod_id_verified {
            if start.elapsed() > PRODUCT_ID_WAIT {
                return Err(ImuError::ProductId);
            }
            self.handle_one_message(150)?;
        }
        Ok(())
    }

    /// Consume startup chatter (advertisement, reset responses) until the
    /// bus goes quiet or the iteration budget runs out.
    fn eat_all_messages(&mut self, max_iterations: u16) -> Result<(), ImuError> {
        for _ in 0..max_iterations {
            if self.handle_one_message(10)? == 0 {
                break;
            }
        }
        Ok(())
    }

    fn handle_one_message(&mut self, timeout_ms: u32) -> Result<u32, ImuError> {
        match self.link.read_frame(timeout_ms)? {
            Some(frame) => {
                self.handle_frame(&frame);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn all_features_acked(&self, sensors: &[Sh2SensorId]) -> bool {
        sensors
            .iter()
            .all(|s| self.sensors.feature_acked[s.report_id() as usize])
    }

    fn handle_frame(&mut self, frame: &ShtpFrame) {
        let payload = &frame.payload;
        let report_id = payload.first().copied().unwrap_or(0);
        match ShtpChannel::from_raw(frame.header.channel) {
            Some(ShtpChannel::Command) => match report_id {
                CMD_RESP_ADVERTISEMENT => {
                    self.sensors.advert_received = true;
                    trace!("advertisement response ({} octets)", payload.len());
                }
                CMD_RESP_ERROR_LIST => {
                    for &code in payload.iter().skip(1) {
                        self.sensors.last_error = Some(code);
                        warn!("hub error {}: {}", code, hub_error_to_str(code));
                    }
                }
                other => trace!("unhandled command response 0x{:02X}", other),
            },
            Some(ShtpChannel::Executable) => {
                if report_id == EXECUTABLE_DEVICE_RESP_RESET_COMPLETE {
                    trace!("reset complete");
                    self.sensors.pending_reset = true;
                }
            }
            Some(ShtpChannel::HubControl) => match report_id {
                SHUB_COMMAND_RESP => {
                    if let Some(&resp) = payload.get(2) {
                        if resp == SH2_STARTUP_INIT_UNSOLICITED || resp == SH2_INIT_SYSTEM {
                            self.sensors.init_received = true;
                        }
                        trace!("command response 0x{:02X}", resp);
                    }
                }
                SHUB_PROD_ID_RESP => {
                    if payload.len() >= 4 {
                        trace!("product id response, sw {}.{}", payload[2], payload[3]);
                    }
                    self.sensors.prod_id_verified = true;
                }
                SHUB_GET_FEATURE_RESP => {
                    if let Some(&feature) = payload.get(1) {
                        trace!("feature 0x{:02X} acknowledged", feature);
                        if (feature as usize) < self.sensors.feature_acked.len() {
                            self.sensors.feature_acked[feature as usize] = true;
                        }
                    }
                }
                other => debug!("unhandled hub control report 0x{:02X}", other),
            },
            Some(ShtpChannel::SensorNormal)
            | Some(ShtpChannel::Wake)
            | Some(ShtpChannel::GyroRv) => {
                self.handle_sensor_payload(payload);
            }
            None => trace!("frame on unknown channel 0x{:02X}", frame.header.channel),
        }
    }

    /// Decode the successive report records of one sensor-channel payload.
    /// Observations are applied in payload order.
    fn handle_sensor_payload(&mut self, payload: &[u8]) {
        let mut rest = strip_base_timestamp(payload);
        while !rest.is_empty() {
            let report_id = rest[0];
            let Some(len) = record_len(report_id) else {
                debug!("undecodable report 0x{:02X}, dropping remainder", report_id);
                break;
            };
            if rest.len() < len {
                warn!(
                    "truncated report 0x{:02X}: {} of {} octets",
                    report_id,
                    rest.len(),
                    len
                );
                break;
            }
            if let Some(evt) = decode_sensor_event(&rest[..len]) {
                self.apply_event(&evt);
            }
            rest = &rest[len..];
        }
    }

    fn apply_event(&mut self, evt: &SensorEvent) {
        self.report_counter += 1;
        let n = self.report_counter;
        match evt.sensor_id {
            Sh2SensorId::Accelerometer => {
                if let Some(v) = evt.accel {
                    self.update_gravity_estimate(v);
                    self.sensors.accel.update(v, n);
                }
            }
            Sh2SensorId::LinearAcceleration => {
                if let Some(v) = evt.accel {
                    self.sensors.linear_accel.update(v, n);
                }
            }
            Sh2SensorId::GyroscopeCalibrated => {
                if let Some(v) = evt.gyro {
                    self.sensors.gyro.update(v, n);
                }
            }
            Sh2SensorId::GameRotationVector => {
                if let Some(q) = evt.game_quat {
                    self.sensors.quat.update(q, n);
                }
            }
            _ => {}
        }
    }

    fn update_gravity_estimate(&mut self, accel: Vec3) {
        self.gravity = Some(match self.gravity {
            None => accel,
            Some(g) => g.lerp(accel, GRAVITY_ALPHA),
        });
    }

    /// Emit a pose frame if quaternion, gyro and an acceleration slot have
    /// all been refreshed since the last emission.
    ///
    /// Acceleration selection: the linear slot when fresh; otherwise the
    /// absolute slot minus the gravity estimate; otherwise not ready.
    fn try_build_frame(&mut self) -> Option<PoseFrame> {
        let quat_slot = self.sensors.quat;
        let gyro_slot = self.sensors.gyro;
        let (quat, gyro) = match (quat_slot.value, gyro_slot.value) {
            (Some(q), Some(g)) => (q, g),
            _ => return None,
        };
        if quat_slot.counter <= self.markers.quat || gyro_slot.counter <= self.markers.gyro {
            return None;
        }

        let accel = if self.sensors.linear_accel.counter > self.markers.linear {
            self.sensors.linear_accel.value?
        } else if self.sensors.accel.counter > self.markers.accel {
            let raw = self.sensors.accel.value?;
            raw - self.gravity.unwrap_or(raw)
        } else {
            return None;
        };

        self.markers = FrameMarkers {
            quat: quat_slot.counter,
            gyro: gyro_slot.counter,
            linear: self.sensors.linear_accel.counter,
            accel: self.sensors.accel.counter,
        };

        let mut t = self.epoch.elapsed().as_secs_f64();
        if t <= self.last_t {
            t = self.last_t + 1e-6;
        }
        self.last_t = t;

        Some(PoseFrame {
            t,
            ax: accel.x,
            ay: accel.y,
            az: accel.z,
            gx: gyro.x,
            gy: gyro.y,
            gz: gyro.z,
            qw: quat.w,
            qi: quat.x,
            qj: quat.y,
            qk: quat.z,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::MockBus;
    use approx::assert_relative_eq;

    const TEST_CONFIG: ImuConfig = ImuConfig {
        bus: 1,
        addr: 0x4A,
        hz: 100,
        timeout_ms: 30,
    };

    fn q8(v: f32) -> [u8; 2] {
        ((v * 256.0) as i16).to_le_bytes()
    }

    fn q9(v: f32) -> [u8; 2] {
        ((v * 512.0) as i16).to_le_bytes()
    }

    fn q14(v: f32) -> [u8; 2] {
        ((v * 16384.0) as i16).to_le_bytes()
    }

    fn vec_record(report_id: u8, scale: fn(f32) -> [u8; 2], v: [f32; 3]) -> Vec<u8> {
        let mut rec = vec![report_id, 0, 0x03, 0];
        for component in v {
            rec.extend_from_slice(&scale(component));
        }
        rec
    }

    fn quat_record(q: [f32; 4]) -> Vec<u8> {
        // wire order [i, j, k, real]
        let mut rec = vec![0x08, 0, 0x03, 0];
        for component in [q[1], q[2], q[3], q[0]] {
            rec.extend_from_slice(&q14(component));
        }
        rec
    }

    /// Queue a sensor frame with a base-timestamp prefix and the records.
    fn push_sensor_frame(bus: &MockBus, seq: u8, records: &[Vec<u8>]) {
        let mut payload = vec![0xFB, 0, 0, 0, 0];
        for rec in records {
            payload.extend_from_slice(rec);
        }
        bus.push_frame(ShtpChannel::SensorNormal.as_u8(), seq, &payload);
    }

    /// Script the hub's side of a successful bootstrap + enablement.
    fn script_bootstrap(bus: &MockBus) {
        // advertisement on the command channel
        bus.push_frame(0, 0, &[CMD_RESP_ADVERTISEMENT, 0x01, 0x04, 0, 0, 0, 0]);
        // reset complete on the executable channel
        bus.push_frame(1, 0, &[EXECUTABLE_DEVICE_RESP_RESET_COMPLETE]);
        // product id response
        bus.push_frame(2, 0, &[SHUB_PROD_ID_RESP, 0x00, 3, 9, 0, 0, 0, 0]);
        // feature acknowledgements
        for id in [0x04u8, 0x01, 0x02, 0x08] {
            bus.push_frame(2, 0, &[SHUB_GET_FEATURE_RESP, id, 0, 0, 0]);
        }
    }

    fn push_full_sample(bus: &MockBus, seq: u8, az: f32) {
        push_sensor_frame(
            bus,
            seq,
            &[
                vec_record(0x04, q8, [0.0, 0.0, az]),
                vec_record(0x02, q9, [0.1, 0.0, 0.0]),
                quat_record([1.0, 0.0, 0.0, 0.0]),
            ],
        );
    }

    #[test]
    fn test_bootstrap_writes_reset_product_id_and_features() {
        let bus = MockBus::new();
        script_bootstrap(&bus);
        let session = ImuSession::with_bus(bus.clone(), TEST_CONFIG.clone()).unwrap();
        assert_eq!(session.state(), SessionState::Streaming);

        let writes = bus.writes();
        // soft reset: executable channel, sequence 0
        assert_eq!(writes[0], vec![5, 0, 1, 0, 1]);
        // product id request: hub control, sequence 0
        assert_eq!(writes[1], vec![6, 0, 2, 0, 0xF9, 0]);
        // four set-feature commands, hub control sequences 1..=4
        assert_eq!(writes.len(), 6);
        let expected_ids = [0x04u8, 0x01, 0x02, 0x08];
        for (i, write) in writes[2..].iter().enumerate() {
            assert_eq!(write[2], 2, "set feature goes to hub control");
            assert_eq!(write[3], 1 + i as u8, "hub control sequence continues");
            assert_eq!(write[4], 0xFD);
            assert_eq!(write[5], expected_ids[i]);
            assert_eq!(&write[9..13], &10_000u32.to_le_bytes());
        }
    }

    #[test]
    fn test_bootstrap_fails_without_product_id() {
        let bus = MockBus::new();
        bus.push_frame(1, 0, &[EXECUTABLE_DEVICE_RESP_RESET_COMPLETE]);
        let err = ImuSession::with_bus(bus, TEST_CONFIG.clone()).unwrap_err();
        assert!(matches!(err, ImuError::ProductId));
    }

    #[test]
    fn test_product_id_deadline_holds_under_constant_chatter() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::thread;

        // The hub never acknowledges the product id but never goes quiet
        // either; the handshake must still fail at the deadline instead of
        // waiting for a gap in the chatter.
        let bus = MockBus::new();
        let chatter_bus = bus.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_pusher = stop.clone();
        let pusher = thread::spawn(move || {
            let mut seq = 0u8;
            while !stop_pusher.load(Ordering::Relaxed) {
                chatter_bus.push_frame(0, seq, &[CMD_RESP_ADVERTISEMENT, 0, 0, 0]);
                seq = seq.wrapping_add(1);
                thread::sleep(Duration::from_millis(20));
            }
        });

        let start = Instant::now();
        let err = ImuSession::with_bus(bus, TEST_CONFIG.clone()).unwrap_err();
        let elapsed = start.elapsed();
        stop.store(true, Ordering::Relaxed);
        pusher.join().unwrap();

        assert!(matches!(err, ImuError::ProductId));
        assert!(
            elapsed < Duration::from_secs(2),
            "handshake must fail at the deadline, took {:?}",
            elapsed
        );
    }

    #[test]
    fn test_poll_frame_requires_all_three_slots_fresh() {
        let bus = MockBus::new();
        script_bootstrap(&bus);
        let mut session = ImuSession::with_bus(bus.clone(), TEST_CONFIG.clone()).unwrap();

        push_full_sample(&bus, 0, 1.0);
        let frame = session.poll_frame(100).unwrap();
        assert_relative_eq!(frame.az, 1.0);
        assert_relative_eq!(frame.gx, 0.1, epsilon = 1e-3);
        assert_relative_eq!(frame.qw, 1.0);

        // Quaternion alone does not refresh the frame.
        push_sensor_frame(&bus, 1, &[quat_record([1.0, 0.0, 0.0, 0.0])]);
        assert!(matches!(
            session.poll_frame(30),
            Err(ImuError::Timeout)
        ));

        // Completing the set does.
        push_sensor_frame(
            &bus,
            2,
            &[
                vec_record(0x04, q8, [0.0, 0.0, 2.0]),
                vec_record(0x02, q9, [0.0, 0.0, 0.0]),
            ],
        );
        let second = session.poll_frame(100).unwrap();
        assert_relative_eq!(second.az, 2.0);
        assert!(second.t > frame.t, "pose timestamps must increase");
    }

    #[test]
    fn test_accelerometer_fallback_subtracts_gravity_estimate() {
        let bus = MockBus::new();
        script_bootstrap(&bus);
        let mut session = ImuSession::with_bus(bus.clone(), TEST_CONFIG.clone()).unwrap();

        // No linear acceleration: first absolute sample defines the gravity
        // estimate, so the dynamic part is zero.
        push_sensor_frame(
            &bus,
            0,
            &[
                vec_record(0x01, q8, [0.0, 0.0, 9.81]),
                vec_record(0x02, q9, [0.0, 0.0, 0.0]),
                quat_record([1.0, 0.0, 0.0, 0.0]),
            ],
        );
        let frame = session.poll_frame(100).unwrap();
        assert_relative_eq!(frame.az, 0.0, epsilon = 1e-3);

        // A jolt on top of gravity shows up nearly in full; the estimate
        // only absorbs a 2% step per sample.
        push_sensor_frame(
            &bus,
            1,
            &[
                vec_record(0x01, q8, [0.0, 0.0, 10.81]),
                vec_record(0x02, q9, [0.0, 0.0, 0.0]),
                quat_record([1.0, 0.0, 0.0, 0.0]),
            ],
        );
        let jolt = session.poll_frame(100).unwrap();
        assert_relative_eq!(jolt.az, 0.98, epsilon = 0.01);
    }

    #[test]
    fn test_linear_slot_preferred_over_absolute() {
        let bus = MockBus::new();
        script_bootstrap(&bus);
        let mut session = ImuSession::with_bus(bus.clone(), TEST_CONFIG.clone()).unwrap();

        push_sensor_frame(
            &bus,
            0,
            &[
                vec_record(0x01, q8, [0.0, 0.0, 9.81]),
                vec_record(0x04, q8, [0.0, 0.0, 0.25]),
                vec_record(0x02, q9, [0.0, 0.0, 0.0]),
                quat_record([1.0, 0.0, 0.0, 0.0]),
            ],
        );
        let frame = session.poll_frame(100).unwrap();
        assert_relative_eq!(frame.az, 0.25, epsilon = 1e-3);
    }

    #[test]
    fn test_autonomous_reset_surfaces_then_recovers() {
        let bus = MockBus::new();
        script_bootstrap(&bus);
        let mut session = ImuSession::with_bus(bus.clone(), TEST_CONFIG.clone()).unwrap();

        bus.push_frame(1, 1, &[EXECUTABLE_DEVICE_RESP_RESET_COMPLETE]);
        assert!(matches!(
            session.poll_frame(100),
            Err(ImuError::SensorReset)
        ));
        assert_eq!(session.state(), SessionState::Resetting);

        script_bootstrap(&bus);
        session.handle_reset().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);

        // Idempotence: a second reset leaves the session in the same state.
        script_bootstrap(&bus);
        session.handle_reset().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(session.last_error().is_none());

        push_full_sample(&bus, 0, 0.5);
        let frame = session.poll_frame(100).unwrap();
        assert_relative_eq!(frame.az, 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_error_list_recorded_as_last_error() {
        let bus = MockBus::new();
        script_bootstrap(&bus);
        let mut session = ImuSession::with_bus(bus.clone(), TEST_CONFIG.clone()).unwrap();

        bus.push_frame(0, 1, &[CMD_RESP_ERROR_LIST, 5]);
        assert!(matches!(session.poll_frame(30), Err(ImuError::Timeout)));
        assert_eq!(session.last_error(), Some(5));
    }

    #[test]
    fn test_config_normalization() {
        let config = ImuConfig {
            hz: 0,
            timeout_ms: 0,
            ..ImuConfig::default()
        }
        .normalized();
        assert_eq!(config.hz, 1);
        assert_eq!(config.timeout_ms, 1);

        let config = ImuConfig {
            hz: 1000,
            ..ImuConfig::default()
        }
        .normalized();
        assert_eq!(config.hz, 400);
    }

    #[test]
    fn test_error_taxonomy_from_shtp() {
        let oversize = ShtpError::OversizeFrame { len: 600, max: 512 };
        assert!(matches!(ImuError::from(oversize), ImuError::Protocol(_)));

        let short = ShtpError::Bus(BusError::ShortRead { got: 2, want: 4 });
        assert!(matches!(ImuError::from(short), ImuError::Comm(_)));

        let io = ShtpError::Bus(BusError::Io(std::io::Error::other("gone")));
        assert!(matches!(ImuError::from(io), ImuError::Bus(_)));
    }
}
