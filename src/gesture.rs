// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Gesture-direction detection.
//!
//! The detector consumes pose samples, rotates acceleration into the world
//! frame through the game rotation vector, and watches for impulse-like
//! motion. A gesture is the time-integral of dynamic acceleration over a
//! window centered on the peak; the dominant axis of the resulting Δv and
//! its sign select a direction label.
//!
//! The game rotation vector is gravity-referenced but yaw-free, so X/Y/Z
//! here span a platform-defined world frame with X along gravity.
//! Deployments that need body-relative labels must re-map after capturing an
//! initial orientation.

use std::collections::VecDeque;
use std::fmt;

use glam::{DQuat, DVec3};
use serde::Serialize;

use crate::session::PoseFrame;

/// Δv on the dominant axis must reach this magnitude (m/s) or the candidate
/// is discarded.
pub const AXIS_DOMINANCE_THRESHOLD: f64 = 0.5;

/// Detector tuning.
#[derive(Debug, Clone)]
pub struct GestureConfig {
    /// Seconds of initial samples used to estimate the gravity baseline
    pub baseline_window_s: f64,
    /// Half of the integration window around the peak (full window ~2x)
    pub half_window_s: f64,
    /// Dynamic-acceleration floor (m/s^2); quieter samples are not integrated
    pub min_dyn_threshold: f64,
    /// Minimum peak |a_dyn| (m/s^2) for a window to count as a gesture
    pub min_peak_magnitude: f64,
    /// Minimum spacing between emitted gestures (s)
    pub min_gesture_interval: f64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            baseline_window_s: 0.2,
            half_window_s: 0.3,
            min_dyn_threshold: 0.5,
            min_peak_magnitude: 1.5,
            min_gesture_interval: 0.8,
        }
    }
}

/// World-frame axis of the dominant Δv component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
            Axis::Z => write!(f, "Z"),
        }
    }
}

/// Direction labels.
///
/// This table is the single label-assignment policy for a deployment:
/// X maps to UP/DOWN (the gravity axis), Y to FORWARD/BACKWARD, Z to
/// RIGHT/LEFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Backward,
}

impl Direction {
    pub fn from_axis_sign(axis: Axis, positive: bool) -> Self {
        match (axis, positive) {
            (Axis::X, true) => Self::Up,
            (Axis::X, false) => Self::Down,
            (Axis::Y, true) => Self::Forward,
            (Axis::Y, false) => Self::Backward,
            (Axis::Z, true) => Self::Right,
            (Axis::Z, false) => Self::Left,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Forward => "FORWARD",
            Self::Backward => "BACKWARD",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected gesture.
#[derive(Debug, Clone, Serialize)]
pub struct GestureResult {
    /// Time of the peak sample (center of the integration window)
    pub t_center: f64,
    /// Span of the integration window actually covered by samples (s)
    pub duration: f64,
    /// Integrated dynamic acceleration in the world frame (m/s)
    pub delta_v_world: DVec3,
    /// Gravity baseline the dynamics were measured against
    pub baseline_world: DVec3,
    pub axis: Axis,
    /// '+' or '-'
    pub sign: char,
    pub label: Direction,
}

#[derive(Debug, Clone, Copy)]
struct GestureSample {
    t: f64,
    accel_world: DVec3,
    #[allow(dead_code)]
    quat: DQuat,
}

/// Sliding-window peak detector over world-frame acceleration.
pub struct GestureDetector {
    cfg: GestureConfig,
    buffer: VecDeque<GestureSample>,
    baseline: DVec3,
    baseline_ready: bool,
    baseline_end_t: f64,
    last_gesture_t: f64,
    pending: Option<GestureResult>,
}

impl GestureDetector {
    pub fn new(cfg: GestureConfig) -> Self {
        Self {
            cfg,
            buffer: VecDeque::new(),
            baseline: DVec3::ZERO,
            baseline_ready: false,
            baseline_end_t: 0.0,
            last_gesture_t: f64::NEG_INFINITY,
            pending: None,
        }
    }

    /// The estimated gravity vector in the world frame, once established.
    pub fn baseline_world(&self) -> Option<DVec3> {
        self.baseline_ready.then_some(self.baseline)
    }

    /// Feed one assembled pose frame.
    pub fn push_frame(&mut self, frame: &PoseFrame) {
        let accel = DVec3::new(frame.ax as f64, frame.ay as f64, frame.az as f64);
        let quat = DQuat::from_xyzw(
            frame.qi as f64,
            frame.qj as f64,
            frame.qk as f64,
            frame.qw as f64,
        );
        self.add_sample(frame.t, accel, quat);
    }

    /// Feed one sensor-frame acceleration sample with its orientation.
    pub fn add_sample(&mut self, t: f64, accel_sensor: DVec3, quat: DQuat) {
        // sensor -> world: q * v * q^-1
        let accel_world = quat.mul_vec3(accel_sensor);
        self.buffer.push_back(GestureSample {
            t,
            accel_world,
            quat,
        });

        let max_span = 2.5 * self.cfg.half_window_s;
        while self
            .buffer
            .front()
            .is_some_and(|s| t - s.t > max_span)
        {
            self.buffer.pop_front();
        }

        if !self.baseline_ready {
            self.try_compute_baseline();
        }
        if self.baseline_ready {
            self.maybe_detect_gesture();
        }
    }

    /// Drain at most one pending gesture.
    pub fn poll_gesture(&mut self) -> Option<GestureResult> {
        self.pending.take()
    }

    /// Mean world-frame acceleration over the first baseline window. The
    /// detector stays dormant until the window has elapsed and holds at
    /// least three samples.
    fn try_compute_baseline(&mut self) {
        let Some(front) = self.buffer.front() else {
            return;
        };
        let t0 = front.t;
        let window = self.cfg.baseline_window_s;
        if self.buffer.back().is_some_and(|s| s.t - t0 < window) {
            return;
        }

        let mut sum = DVec3::ZERO;
        let mut count = 0usize;
        for s in &self.buffer {
            if s.t - t0 > window {
                break;
            }
            sum += s.accel_world;
            count += 1;
        }
        if count < 3 {
            return;
        }

        self.baseline = sum / count as f64;
        self.baseline_ready = true;
        self.baseline_end_t = t0 + window;
    }

    fn maybe_detect_gesture(&mut self) {
        if self.buffer.len() < 3 {
            return;
        }
        let t_now = self.buffer.back().map(|s| s.t).unwrap_or(0.0);
        if t_now - self.last_gesture_t < self.cfg.min_gesture_interval {
            return;
        }

        // Peak |a_dyn| over the buffer, baseline samples excluded.
        let mut max_mag = -1.0;
        let mut i_peak = 0usize;
        for (i, s) in self.buffer.iter().enumerate() {
            if s.t < self.baseline_end_t {
                continue;
            }
            let mag = (s.accel_world - self.baseline).length();
            if mag > max_mag {
                max_mag = mag;
                i_peak = i;
            }
        }
        if max_mag < self.cfg.min_peak_magnitude {
            return;
        }

        let t_peak = self.buffer[i_peak].t;
        let t_start = t_peak - self.cfg.half_window_s;
        let t_end = t_peak + self.cfg.half_window_s;

        // Hold off until the window trailing the peak has been observed;
        // integrating a half-filled window centers the gesture on whatever
        // sample happens to be newest instead of the true peak.
        if t_now < t_end {
            return;
        }

        let mut start_idx = 0;
        while start_idx < self.buffer.len() && self.buffer[start_idx].t < t_start {
            start_idx += 1;
        }
        let mut end_idx = start_idx;
        while end_idx < self.buffer.len() && self.buffer[end_idx].t <= t_end {
            end_idx += 1;
        }
        if end_idx <= start_idx + 2 {
            return;
        }

        // Integrate a_dyn over the window; samples below the dynamics floor
        // contribute noise, not motion, and are skipped.
        let mut dv = DVec3::ZERO;
        let duration = self.buffer[end_idx - 1].t - self.buffer[start_idx].t;
        for i in start_idx + 1..end_idx {
            let prev = &self.buffer[i - 1];
            let curr = &self.buffer[i];
            let dt = curr.t - prev.t;
            if dt <= 0.0 {
                continue;
            }
            let dyn_a = curr.accel_world - self.baseline;
            if dyn_a.length() < self.cfg.min_dyn_threshold {
                continue;
            }
            dv += dyn_a * dt;
        }

        let abs = dv.abs();
        let (axis, axis_val) = if abs.x >= abs.y && abs.x >= abs.z {
            (Axis::X, dv.x)
        } else if abs.y >= abs.x && abs.y >= abs.z {
            (Axis::Y, dv.y)
        } else {
            (Axis::Z, dv.z)
        };
        if abs.max_element() < AXIS_DOMINANCE_THRESHOLD {
            return;
        }

        let positive = axis_val >= 0.0;
        self.pending = Some(GestureResult {
            t_center: t_peak,
            duration,
            delta_v_world: dv,
            baseline_world: self.baseline,
            axis,
            sign: if positive { '+' } else { '-' },
            label: Direction::from_axis_sign(axis, positive),
        });
        self.last_gesture_t = t_now;
    }
}

impl Default for GestureDetector {
    fn default() -> Self {
        Self::new(GestureConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    const HZ: f64 = 100.0;

    fn feed_stream<F: Fn(f64) -> DVec3>(
        detector: &mut GestureDetector,
        t0: f64,
        t1: f64,
        accel_world: F,
    ) -> Vec<GestureResult> {
        let mut out = Vec::new();
        let steps = ((t1 - t0) * HZ) as usize;
        for i in 0..=steps {
            let t = t0 + i as f64 / HZ;
            detector.add_sample(t, accel_world(t), DQuat::IDENTITY);
            if let Some(res) = detector.poll_gesture() {
                out.push(res);
            }
        }
        out
    }

    #[test]
    fn test_synthetic_z_pulse_is_right() {
        let baseline = DVec3::new(9.81, 0.0, 0.0);
        let mut detector = GestureDetector::default();

        let gestures = feed_stream(&mut detector, 0.0, 1.0, |t| {
            baseline + DVec3::new(0.0, 0.0, 5.0 * (PI * t).sin())
        });

        assert_eq!(gestures.len(), 1, "exactly one gesture for one pulse");
        let g = &gestures[0];
        assert_eq!(g.axis, Axis::Z);
        assert_eq!(g.sign, '+');
        assert_eq!(g.label, Direction::Right);
        assert_relative_eq!(g.t_center, 0.5, epsilon = 0.02);
        assert!(
            g.delta_v_world.z > 1.4 && g.delta_v_world.z < 1.9,
            "dv_z = {}",
            g.delta_v_world.z
        );
        assert_relative_eq!(g.duration, 0.58, epsilon = 0.03);
        // The baseline absorbed the early part of the ramp along with gravity.
        assert_relative_eq!(g.baseline_world.x, 9.81, epsilon = 1e-6);
        assert!(g.baseline_world.z > 1.0 && g.baseline_world.z < 2.0);
    }

    #[test]
    fn test_dormant_until_baseline_window_spanned() {
        let mut detector = GestureDetector::default();
        // Large signal from the very first sample: nothing may be emitted
        // before the baseline window has elapsed.
        for i in 0..10 {
            let t = i as f64 / HZ; // 90 ms < 200 ms window
            detector.add_sample(t, DVec3::new(9.81, 0.0, 20.0), DQuat::IDENTITY);
            assert!(detector.poll_gesture().is_none());
            assert!(detector.baseline_world().is_none());
        }
    }

    #[test]
    fn test_quiet_stream_emits_nothing() {
        let mut detector = GestureDetector::default();
        let gestures = feed_stream(&mut detector, 0.0, 2.0, |_| DVec3::new(9.81, 0.0, 0.0));
        assert!(gestures.is_empty());
        let baseline = detector.baseline_world().expect("baseline established");
        assert_relative_eq!(baseline.x, 9.81, epsilon = 1e-9);
    }

    #[test]
    fn test_weak_pulse_below_peak_threshold_ignored() {
        let baseline = DVec3::new(9.81, 0.0, 0.0);
        let mut detector = GestureDetector::default();
        let gestures = feed_stream(&mut detector, 0.0, 2.0, |t| {
            // 1.0 m/s^2 peak, below min_peak_magnitude of 1.5
            baseline + DVec3::new(0.0, 0.0, 1.0 * (PI * t).sin().max(0.0))
        });
        assert!(gestures.is_empty());
    }

    #[test]
    fn test_gesture_interval_enforced() {
        let baseline = DVec3::new(9.81, 0.0, 0.0);
        let mut detector = GestureDetector::default();

        // Three pulses 1.2 s apart, each 0.4 s long, starting after the
        // baseline window.
        let pulse = |t: f64| -> f64 {
            for start in [0.5, 1.7, 2.9] {
                let phase = t - start;
                if (0.0..0.4).contains(&phase) {
                    return 6.0 * (PI * phase / 0.4).sin();
                }
            }
            0.0
        };
        let gestures = feed_stream(&mut detector, 0.0, 4.0, |t| {
            baseline + DVec3::new(0.0, pulse(t), 0.0)
        });

        assert!(gestures.len() >= 2, "distinct pulses must all be seen");
        for pair in gestures.windows(2) {
            assert!(
                pair[1].t_center - pair[0].t_center >= GestureConfig::default().min_gesture_interval,
                "gesture spacing violated: {} then {}",
                pair[0].t_center,
                pair[1].t_center
            );
        }
        for g in &gestures {
            assert_eq!(g.axis, Axis::Y);
            assert_eq!(g.label, Direction::Forward);
        }
    }

    #[test]
    fn test_negative_x_is_down() {
        let baseline = DVec3::new(9.81, 0.0, 0.0);
        let mut detector = GestureDetector::default();
        let gestures = feed_stream(&mut detector, 0.0, 1.5, |t| {
            let phase = t - 0.5;
            let dyn_x = if (0.0..0.4).contains(&phase) {
                -6.0 * (PI * phase / 0.4).sin()
            } else {
                0.0
            };
            baseline + DVec3::new(dyn_x, 0.0, 0.0)
        });
        assert_eq!(gestures.len(), 1);
        assert_eq!(gestures[0].axis, Axis::X);
        assert_eq!(gestures[0].sign, '-');
        assert_eq!(gestures[0].label, Direction::Down);
    }

    #[test]
    fn test_sensor_frame_rotated_into_world() {
        // Sensor rotated 90 degrees about X: sensor +Y maps to world +Z, so
        // a Y-axis push in the sensor frame must classify as RIGHT.
        let quat = DQuat::from_axis_angle(DVec3::X, PI / 2.0);
        let gravity_sensor = quat.inverse().mul_vec3(DVec3::new(9.81, 0.0, 0.0));

        let mut detector = GestureDetector::default();
        let mut gestures = Vec::new();
        let steps = (1.5 * HZ) as usize;
        for i in 0..=steps {
            let t = i as f64 / HZ;
            let phase = t - 0.5;
            let dyn_y = if (0.0..0.4).contains(&phase) {
                6.0 * (PI * phase / 0.4).sin()
            } else {
                0.0
            };
            let accel_sensor = gravity_sensor + DVec3::new(0.0, dyn_y, 0.0);
            detector.add_sample(t, accel_sensor, quat);
            if let Some(res) = detector.poll_gesture() {
                gestures.push(res);
            }
        }

        assert_eq!(gestures.len(), 1);
        assert_eq!(gestures[0].axis, Axis::Z);
        assert_eq!(gestures[0].label, Direction::Right);
    }

    #[test]
    fn test_poll_drains_single_result() {
        let baseline = DVec3::new(9.81, 0.0, 0.0);
        let mut detector = GestureDetector::default();
        let steps = (1.0 * HZ) as usize;
        let mut seen = 0;
        for i in 0..=steps {
            let t = i as f64 / HZ;
            detector.add_sample(
                t,
                baseline + DVec3::new(0.0, 0.0, 5.0 * (PI * t).sin()),
                DQuat::IDENTITY,
            );
            if detector.poll_gesture().is_some() {
                seen += 1;
                assert!(detector.poll_gesture().is_none(), "one result per drain");
            }
        }
        assert_eq!(seen, 1);
    }
}
