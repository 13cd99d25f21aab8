// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Constants for the BNO08x sensor-hub protocol.
//!
//! This module contains the protocol constants, report IDs, channel counts
//! and Q-point values used for communication with BNO08x-class sensors over
//! SHTP.

/// SHTP header length in octets
pub const PACKET_HEADER_LENGTH: usize = 4;
/// Maximum SHTP frame length, header included
pub const SHTP_MAX_FRAME: usize = 512;
/// The BNO08x exposes six communication channels
pub const NUM_CHANNELS: usize = 6;

// =============================================================================
// Command Channel Responses
// =============================================================================

/// Advertisement response
pub const CMD_RESP_ADVERTISEMENT: u8 = 0;
/// Error list response
pub const CMD_RESP_ERROR_LIST: u8 = 1;

// =============================================================================
// Sensor Hub (SHUB) Protocol Constants
// =============================================================================

/// Report ID for Product ID request
pub const SHUB_PROD_ID_REQ: u8 = 0xF9;
/// Report ID for Product ID response
pub const SHUB_PROD_ID_RESP: u8 = 0xF8;
/// Get feature response
pub const SHUB_GET_FEATURE_RESP: u8 = 0xFC;
/// Set feature command
pub const SHUB_REPORT_SET_FEATURE_CMD: u8 = 0xFD;
/// Command response
pub const SHUB_COMMAND_RESP: u8 = 0xF1;

/// Base-timestamp reference record that may prefix sensor-channel payloads
pub const SHUB_BASE_TIMESTAMP: u8 = 0xFB;
/// Length of the base-timestamp record (ID + 4-octet delta)
pub const BASE_TIMESTAMP_LENGTH: usize = 5;

// =============================================================================
// Executable/Device Channel Commands
// =============================================================================

/// Reset command
pub const EXECUTABLE_DEVICE_CMD_RESET: u8 = 1;
/// Reset complete response
pub const EXECUTABLE_DEVICE_RESP_RESET_COMPLETE: u8 = 1;

// =============================================================================
// Initialization Commands
// =============================================================================

/// Unsolicited flag
pub const SH2_INIT_UNSOLICITED: u8 = 0x80;
/// Initialize command
pub const SH2_CMD_INITIALIZE: u8 = 4;
/// System initialization
pub const SH2_INIT_SYSTEM: u8 = 1;
/// Startup initialization (unsolicited)
pub const SH2_STARTUP_INIT_UNSOLICITED: u8 = SH2_CMD_INITIALIZE | SH2_INIT_UNSOLICITED;

// =============================================================================
// Q-Point Table for Fixed-Point Conversion
// =============================================================================

/// Q-points for sensor report data, indexed by report ID.
///
/// 0x01 accelerometer Q8, 0x02 gyroscope Q9, 0x04 linear acceleration Q8,
/// 0x06 gravity Q8, 0x08 game rotation vector Q14.
pub const Q_POINTS: [u32; 9] = [0, 8, 9, 0, 8, 0, 8, 0, 14];

// =============================================================================
// Helper Functions
// =============================================================================

/// Convert a Q-point fixed-point value to f32
#[inline]
pub fn q_to_f32(q_val: i16, q_point: u32) -> f32 {
    (q_val as f32) / ((1u32 << q_point) as f32)
}

/// Get SHTP hub error-code description string
pub fn hub_error_to_str(code: u8) -> &'static str {
    match code {
        0 => "no error",
        1 => "hub application attempted to exceed maximum read cargo length",
        2 => "host write was too short (need at least a 4-byte header)",
        3 => "host wrote a header with length greater than maximum write cargo length",
        4 => "host wrote a header with length less than or equal to header length",
        5 => "host wrote beginning of fragmented cargo, fragmentation not supported",
        6 => "host wrote continuation of fragmented cargo, fragmentation not supported",
        7 => "unrecognized command on control channel",
        8 => "unrecognized parameter to get-advertisement command",
        9 => "host wrote to unrecognized channel",
        10 => "advertisement request received while advertisement response was pending",
        11 => "host wrote before the hub finished sending its advertisement response",
        12 => "error list too long to send, truncated",
        _ => "reserved",
    }
}
