// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! # BNO08x Gesture-Direction Classifier
//!
//! An on-device gesture-direction classifier for BNO08x-class 9-DOF IMU
//! sensors attached to a single-board computer over two-wire I2C.
//!
//! ## Overview
//!
//! The crate continuously polls the sensor hub, decodes its framed transport
//! protocol (SHTP) and report layer (SH-2), derives world-frame motion, and
//! emits discrete directional labels (UP/DOWN/LEFT/RIGHT/FORWARD/BACKWARD).
//!
//! The pipeline, leaves first:
//!
//! | Layer | Module | Responsibility |
//! |-------|--------|----------------|
//! | Serial-bus I/O | [`interface`] | exclusive bus handle, exact-length reads/writes |
//! | SHTP framer | [`shtp`] | length-prefixed frames, channels, sequence numbers |
//! | SH-2 codec | [`sh2`] | fixed-point report decode, set-feature commands |
//! | Session manager | [`session`] | bootstrap, handshake, report enablement, pose assembly |
//! | Gesture detector | [`gesture`] | world-frame transform, peak detection, labeling |
//! | Supervisor | [`supervisor`] | error classification, recovery, metrics |
//!
//! ## Quick Start
//!
//! ```no_run
//! use imu_gestures::{GestureConfig, ImuConfig, Supervisor};
//!
//! fn main() {
//!     let config = ImuConfig {
//!         bus: 1,
//!         addr: 0x4A,
//!         hz: 100,
//!         timeout_ms: 50,
//!     };
//!     let mut supervisor = Supervisor::with_i2c(config, GestureConfig::default());
//!     supervisor.connect_now().expect("failed to initialize IMU");
//!
//!     while let Some(frame) = supervisor.poll_frame() {
//!         println!("t={:.3} a=({:.2}, {:.2}, {:.2})", frame.t, frame.ax, frame.ay, frame.az);
//!         if let Some(gesture) = supervisor.poll_gesture() {
//!             println!("{} at t={:.2}", gesture.label, gesture.t_center);
//!         }
//!     }
//! }
//! ```
//!
//! ## Enabled Reports
//!
//! The session enables four SH-2 reports at the configured rate:
//!
//! | Report | ID | Q-Point | Units |
//! |--------|----|---------|-------|
//! | Linear Acceleration | 0x04 | Q8 | m/s² |
//! | Accelerometer | 0x01 | Q8 | m/s² |
//! | Gyroscope Calibrated | 0x02 | Q9 | rad/s |
//! | Game Rotation Vector | 0x08 | Q14 | unit quaternion |
//!
//! The classic accelerometer acts as a fallback: pose assembly prefers the
//! linear-acceleration slot and subtracts a running gravity estimate when it
//! has to fall back to the absolute reading.
//!
//! ## Frames and Gestures
//!
//! [`session::PoseFrame`] carries `(t, accel, gyro, quaternion)` and is only
//! emitted once all three sensors have refreshed since the previous frame.
//! [`gesture::GestureResult`] carries the integrated world-frame Δv of a
//! detected motion impulse together with its axis, sign and label. The game
//! rotation vector is gravity-referenced but yaw-free, so labels live in a
//! platform-defined world frame.
//!
//! ## Hardware Requirements
//!
//! - Linux with i2c-dev support (`/dev/i2c-N`)
//! - BNO08x sensor wired for I2C (default address 0x4A)

pub mod constants;
pub mod gesture;
pub mod interface;
pub mod session;
pub mod sh2;
pub mod shtp;
pub mod supervisor;

// Re-export the main types at crate root for convenience
pub use gesture::{Direction, GestureConfig, GestureDetector, GestureResult};
pub use interface::{BusError, BusInterface, LinuxI2cBus, MockBus};
pub use session::{ImuConfig, ImuError, ImuSession, PoseFrame, SessionState};
pub use sh2::{Accuracy, SensorEvent, Sh2SensorId};
pub use shtp::{ShtpChannel, ShtpError, ShtpFrame, ShtpHeader, ShtpLink};
pub use supervisor::Supervisor;
