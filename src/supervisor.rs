// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Session supervision and recovery.
//!
//! The supervisor owns the session and the gesture detector, classifies
//! every error coming out of `poll_frame`, and runs the matching recovery
//! strategy:
//!
//! | Error | Strategy |
//! |-------|----------|
//! | `Timeout` | count as a drop, keep polling, never reset |
//! | `SensorReset` | one `handle_reset()`, escalate if that fails |
//! | `Comm` | `handle_reset()` |
//! | `Bus` / `ProductId` / `Protocol` | full re-init with exponential backoff |
//!
//! Backoff doubles from 100 ms to a 2 s cap. The shared shutdown flag is
//! polled on every loop iteration and between backoff sleeps, so teardown
//! latency is bounded by the poll timeout. Stream consumers never see errors
//! inline; the last fault is reported through the 5-second metrics line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::gesture::{GestureConfig, GestureDetector, GestureResult};
use crate::interface::{BusInterface, LinuxI2cBus};
use crate::session::{ImuConfig, ImuError, ImuSession, PoseFrame};

/// Initial reconnect backoff
const BACKOFF_BASE_MS: u64 = 100;
/// Backoff ceiling
const BACKOFF_CAP_MS: u64 = 2_000;
/// Backoff sleeps are sliced so the shutdown flag stays responsive
const BACKOFF_SLICE_MS: u64 = 20;
/// Metrics reporting period
const METRICS_PERIOD: Duration = Duration::from_secs(5);

/// Recovery strategy selected for an error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Count a drop and keep polling
    Drop,
    /// Soft-reset the session over the same bus handle
    SoftReset,
    /// Tear the session down and re-init with backoff
    Reinit,
}

fn strategy_for(err: &ImuError) -> Strategy {
    match err {
        ImuError::Timeout => Strategy::Drop,
        ImuError::SensorReset | ImuError::Comm(_) => Strategy::SoftReset,
        ImuError::Bus(_) | ImuError::Protocol(_) | ImuError::ProductId => Strategy::Reinit,
    }
}

/// Rolling stream counters, reported every [`METRICS_PERIOD`].
#[derive(Debug, Clone)]
pub struct StreamStats {
    pub frames_total: u64,
    pub drops_total: u64,
    pub last_error: Option<String>,
    window_frames: u64,
    window_start: Instant,
    last_report: Instant,
}

impl StreamStats {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            frames_total: 0,
            drops_total: 0,
            last_error: None,
            window_frames: 0,
            window_start: now,
            last_report: now,
        }
    }

    fn record_frame(&mut self) {
        self.frames_total += 1;
        self.window_frames += 1;
    }

    fn record_drop(&mut self) {
        self.drops_total += 1;
    }

    fn record_error(&mut self, err: &ImuError) {
        self.last_error = Some(err.to_string());
    }

    fn maybe_report(&mut self) {
        if self.last_report.elapsed() < METRICS_PERIOD {
            return;
        }
        let window_s = self.window_start.elapsed().as_secs_f64();
        let hz = if window_s > 0.0 {
            self.window_frames as f64 / window_s
        } else {
            0.0
        };
        let attempts = self.frames_total + self.drops_total;
        let drop_pct = if attempts > 0 {
            100.0 * self.drops_total as f64 / attempts as f64
        } else {
            0.0
        };
        info!(
            "frames={} window={} rate={:.1}Hz drops={} ({:.1}%) last_error={}",
            self.frames_total,
            self.window_frames,
            hz,
            self.drops_total,
            drop_pct,
            self.last_error.as_deref().unwrap_or("none"),
        );
        self.window_frames = 0;
        self.window_start = Instant::now();
        self.last_report = Instant::now();
    }
}

/// Drives a session and feeds the gesture detector, recovering from every
/// fault class until shut down.
pub struct Supervisor<B, F> {
    connect: F,
    config: ImuConfig,
    session: Option<ImuSession<B>>,
    detector: GestureDetector,
    shutdown: Arc<AtomicBool>,
    stats: StreamStats,
    backoff_ms: u64,
}

impl Supervisor<LinuxI2cBus, fn(&ImuConfig) -> Result<ImuSession<LinuxI2cBus>, ImuError>> {
    /// Supervisor over the Linux two-wire bus named in `config`.
    pub fn with_i2c(config: ImuConfig, gesture: GestureConfig) -> Self {
        fn connect(config: &ImuConfig) -> Result<ImuSession<LinuxI2cBus>, ImuError> {
            ImuSession::open(config.clone())
        }
        Self::new(config, gesture, connect)
    }
}

impl<B, F> Supervisor<B, F>
where
    B: BusInterface,
    F: FnMut(&ImuConfig) -> Result<ImuSession<B>, ImuError>,
{
    /// Build a supervisor around a session factory. The factory is invoked
    /// for the initial connection and for every full re-init.
    pub fn new(config: ImuConfig, gesture: GestureConfig, connect: F) -> Self {
        Self {
            connect,
            config: config.normalized(),
            session: None,
            detector: GestureDetector::new(gesture),
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: StreamStats::new(),
            backoff_ms: BACKOFF_BASE_MS,
        }
    }

    /// Clone of the cooperative shutdown flag. Setting it makes every
    /// polling and backoff loop return promptly.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Attempt the initial connection once, without backoff. Lets callers
    /// distinguish "never came up" (startup failure) from faults that occur
    /// mid-stream, which the polling loop absorbs.
    pub fn connect_now(&mut self) -> Result<(), ImuError> {
        let session = (self.connect)(&self.config)?;
        self.session = Some(session);
        Ok(())
    }

    /// Next pose frame, or `None` once the shutdown flag is set.
    ///
    /// Every frame is also fed to the gesture detector; drain results with
    /// [`poll_gesture`](Self::poll_gesture).
    pub fn poll_frame(&mut self) -> Option<PoseFrame> {
        while !self.shutdown.load(Ordering::Relaxed) {
            let timeout = self.config.timeout_ms;
            let result = match self.session.as_mut() {
                Some(session) => session.poll_frame(timeout),
                None => {
                    self.reconnect_with_backoff();
                    continue;
                }
            };
            match result {
                Ok(frame) => {
                    self.stats.record_frame();
                    self.stats.maybe_report();
                    self.backoff_ms = BACKOFF_BASE_MS;
                    self.detector.push_frame(&frame);
                    return Some(frame);
                }
                Err(err) => {
                    self.handle_error(err);
                    self.stats.maybe_report();
                }
            }
        }
        None
    }

    /// Drain at most one gesture detected from the frames polled so far.
    pub fn poll_gesture(&mut self) -> Option<GestureResult> {
        self.detector.poll_gesture()
    }

    fn handle_error(&mut self, err: ImuError) {
        match strategy_for(&err) {
            Strategy::Drop => {
                self.stats.record_drop();
            }
            Strategy::SoftReset => {
                self.stats.record_error(&err);
                warn!("{}; resetting session", err);
                let recovered = self
                    .session
                    .as_mut()
                    .map(|s| s.handle_reset())
                    .unwrap_or(Ok(()));
                if let Err(reset_err) = recovered {
                    warn!("reset failed ({}); escalating to re-init", reset_err);
                    self.stats.record_error(&reset_err);
                    self.session = None;
                }
            }
            Strategy::Reinit => {
                self.stats.record_error(&err);
                warn!("{}; tearing session down", err);
                self.session = None;
            }
        }
    }

    fn reconnect_with_backoff(&mut self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match (self.connect)(&self.config) {
                Ok(session) => {
                    info!("session re-initialized on {}", self.config.device_path());
                    self.session = Some(session);
                    self.backoff_ms = BACKOFF_BASE_MS;
                    return;
                }
                Err(err) => {
                    warn!(
                        "re-init failed ({}); retrying in {} ms",
                        err, self.backoff_ms
                    );
                    self.stats.record_error(&err);
                    self.sleep_backoff();
                }
            }
        }
    }

    /// Sleep out the current backoff in slices, watching the shutdown flag,
    /// then double it toward the cap.
    fn sleep_backoff(&mut self) {
        let deadline = Instant::now() + Duration::from_millis(self.backoff_ms);
        while Instant::now() < deadline && !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(BACKOFF_SLICE_MS));
        }
        self.backoff_ms = (self.backoff_ms * 2).min(BACKOFF_CAP_MS);
    }
}
