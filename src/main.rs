// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Command-line front end: stream pose frames as CSV or gesture events as
//! text/NDJSON.
//!
//! Exit codes: 0 normal shutdown, 1 initialization failure, 2 invalid
//! arguments.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};

use imu_gestures::{GestureConfig, ImuConfig, Supervisor};

#[derive(Parser)]
#[command(name = "imu-gestures", about = "BNO08x gesture-direction classifier", version)]
struct Cli {
    /// I2C bus number (/dev/i2c-<bus>)
    #[arg(long, default_value_t = 1)]
    bus: u8,

    /// 7-bit I2C address, hex accepted (e.g. 0x4A)
    #[arg(long, default_value = "0x4A", value_parser = parse_addr)]
    addr: u16,

    /// Report rate in Hz (1..=400)
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u16).range(1..=400))]
    hz: u16,

    /// Per-poll read timeout in milliseconds
    #[arg(long = "timeout-ms", default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..))]
    timeout_ms: u32,

    /// Output path; stdout when omitted
    #[arg(long)]
    out: Option<PathBuf>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Stop after this many seconds (0 = run until interrupted)
    #[arg(long, default_value_t = 0)]
    duration: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream pose frames as CSV rows: t,ax,ay,az,gx,gy,gz,qw,qi,qj,qk
    Pose {
        /// Do not print the CSV header row
        #[arg(long)]
        no_header: bool,
    },
    /// Stream detected gestures, one line per event
    Gestures {
        /// Emit NDJSON instead of text lines
        #[arg(long)]
        json: bool,
    },
}

fn parse_addr(raw: &str) -> Result<u16, String> {
    let addr = if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else {
        raw.parse()
    }
    .map_err(|e| format!("invalid address {:?}: {}", raw, e))?;
    if addr > 0x7F {
        return Err(format!("address 0x{:X} is not a 7-bit address", addr));
    }
    Ok(addr)
}

fn open_output(path: Option<&PathBuf>) -> io::Result<BufWriter<Box<dyn Write>>> {
    let sink: Box<dyn Write> = match path {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout()),
    };
    Ok(BufWriter::new(sink))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new().filter_level(cli.log_level).init();

    let config = ImuConfig {
        bus: cli.bus,
        addr: cli.addr,
        hz: cli.hz,
        timeout_ms: cli.timeout_ms,
    };

    let mut out = match open_output(cli.out.as_ref()) {
        Ok(out) => out,
        Err(e) => {
            error!("failed to open output: {}", e);
            return ExitCode::from(1);
        }
    };

    let mut supervisor = Supervisor::with_i2c(config.clone(), GestureConfig::default());
    if let Err(e) = supervisor.connect_now() {
        error!("failed to initialize IMU on {}: {}", config.device_path(), e);
        return ExitCode::from(1);
    }
    info!(
        "streaming from {} addr 0x{:02X} at {} Hz",
        config.device_path(),
        config.addr,
        config.hz
    );

    let shutdown = supervisor.shutdown_flag();
    let handler_flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed)) {
        error!("failed to install signal handler: {}", e);
        return ExitCode::from(1);
    }

    let result = match cli.command {
        Command::Pose { no_header } => run_pose(&mut supervisor, &mut out, !no_header, cli.duration),
        Command::Gestures { json } => run_gestures(&mut supervisor, &mut out, json, cli.duration),
    };

    shutdown.store(true, Ordering::Relaxed);
    if let Err(e) = result.and_then(|_| out.flush()) {
        error!("output error: {}", e);
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run_pose<B, F, W>(
    supervisor: &mut Supervisor<B, F>,
    out: &mut W,
    header: bool,
    duration_s: u64,
) -> io::Result<()>
where
    B: imu_gestures::BusInterface,
    F: FnMut(&ImuConfig) -> Result<imu_gestures::ImuSession<B>, imu_gestures::ImuError>,
    W: Write,
{
    if header {
        writeln!(out, "t,ax,ay,az,gx,gy,gz,qw,qi,qj,qk")?;
    }
    while let Some(frame) = supervisor.poll_frame() {
        writeln!(
            out,
            "{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
            frame.t,
            frame.ax,
            frame.ay,
            frame.az,
            frame.gx,
            frame.gy,
            frame.gz,
            frame.qw,
            frame.qi,
            frame.qj,
            frame.qk
        )?;
        if duration_s > 0 && frame.t >= duration_s as f64 {
            break;
        }
    }
    Ok(())
}

fn run_gestures<B, F, W>(
    supervisor: &mut Supervisor<B, F>,
    out: &mut W,
    json: bool,
    duration_s: u64,
) -> io::Result<()>
where
    B: imu_gestures::BusInterface,
    F: FnMut(&ImuConfig) -> Result<imu_gestures::ImuSession<B>, imu_gestures::ImuError>,
    W: Write,
{
    while let Some(frame) = supervisor.poll_frame() {
        if let Some(gesture) = supervisor.poll_gesture() {
            if json {
                serde_json::to_writer(&mut *out, &gesture)?;
                writeln!(out)?;
            } else {
                writeln!(
                    out,
                    "t={:.3} dir={} axis={}{} dv=({:.3},{:.3},{:.3}) dur={:.3}",
                    gesture.t_center,
                    gesture.label,
                    gesture.axis,
                    gesture.sign,
                    gesture.delta_v_world.x,
                    gesture.delta_v_world.y,
                    gesture.delta_v_world.z,
                    gesture.duration
                )?;
            }
            out.flush()?;
        }
        if duration_s > 0 && frame.t >= duration_s as f64 {
            break;
        }
    }
    Ok(())
}
