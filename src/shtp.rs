// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! SHTP framing layer.
//!
//! SHTP multiplexes logical channels over the two-wire bus using 4-octet
//! length-prefixed frames:
//!
//! ```text
//! Octet 0: length LSB
//! Octet 1: length MSB (bit 7 = continuation; bits 0..6 = length bits 8..14)
//! Octet 2: channel
//! Octet 3: sequence
//! Octets 4..length-1: payload
//! ```
//!
//! [`ShtpLink`] owns the transport and the per-channel sequence table and
//! provides framed read/write on top of the exact-length [`BusInterface`]
//! operations.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};
use thiserror::Error;

use crate::constants::{NUM_CHANNELS, PACKET_HEADER_LENGTH, SHTP_MAX_FRAME};
use crate::interface::{BusError, BusInterface};

/// Framing-layer faults.
#[derive(Debug, Error)]
pub enum ShtpError {
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Frame length exceeds the maximum the hub may produce
    #[error("frame length {len} exceeds maximum {max}")]
    OversizeFrame { len: u16, max: usize },

    /// Frame length below the header size, or the hub re-sent a different
    /// header on the second transaction
    #[error("invalid frame header (length {len})")]
    InvalidHeader { len: u16 },
}

/// SHTP logical channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShtpChannel {
    /// SHTP protocol commands, advertisement, error list
    Command = 0,
    /// Device executable: reset, on/off
    Executable = 1,
    /// Sensor hub control: feature commands, product ID
    HubControl = 2,
    /// Non-wake input sensor reports
    SensorNormal = 3,
    /// Wake input sensor reports
    Wake = 4,
    /// Gyro rotation vector
    GyroRv = 5,
}

impl ShtpChannel {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Command),
            1 => Some(Self::Executable),
            2 => Some(Self::HubControl),
            3 => Some(Self::SensorNormal),
            4 => Some(Self::Wake),
            5 => Some(Self::GyroRv),
            _ => None,
        }
    }
}

/// Parsed SHTP frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShtpHeader {
    /// Total frame length, header included, continuation bit masked off
    pub length: u16,
    pub channel: u8,
    pub sequence: u8,
    /// The masked-off bit 15: this frame continues a prior logical packet
    pub continuation: bool,
}

impl ShtpHeader {
    /// Decode the 4 header octets. The continuation flag is masked out of
    /// the length before it is interpreted.
    pub fn parse(raw: &[u8; PACKET_HEADER_LENGTH]) -> Self {
        let raw_len = u16::from_le_bytes([raw[0], raw[1]]);
        Self {
            length: raw_len & 0x7FFF,
            channel: raw[2],
            sequence: raw[3],
            continuation: raw_len & 0x8000 != 0,
        }
    }
}

/// One SHTP frame, payload separated from its header.
#[derive(Debug, Clone)]
pub struct ShtpFrame {
    pub header: ShtpHeader,
    pub payload: Vec<u8>,
}

/// Framed SHTP endpoint over a byte transport.
#[derive(Debug)]
pub struct ShtpLink<B> {
    bus: B,
    sequence_numbers: [u8; NUM_CHANNELS],
}

impl<B: BusInterface> ShtpLink<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            sequence_numbers: [0; NUM_CHANNELS],
        }
    }

    /// Reset every channel's outgoing sequence counter.
    pub fn reset_sequences(&mut self) {
        self.sequence_numbers = [0; NUM_CHANNELS];
    }

    /// The sequence number the next write on `channel` will carry.
    pub fn next_sequence(&self, channel: ShtpChannel) -> u8 {
        self.sequence_numbers[channel.as_u8() as usize]
    }

    /// Wait up to `timeout_ms` for a frame.
    ///
    /// Returns `Ok(None)` on timeout; that is a soft condition, not an
    /// error. The hub answers an idle read with an all-zero header, so the
    /// link polls the header until it sees a length, then reads the whole
    /// frame in a second transaction (the hub re-sends the header on every
    /// transaction) and cross-checks the two lengths.
    pub fn read_frame(&mut self, timeout_ms: u32) -> Result<Option<ShtpFrame>, ShtpError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        loop {
            let mut header_raw = [0u8; PACKET_HEADER_LENGTH];
            self.bus.read_exact(&mut header_raw)?;
            let header = ShtpHeader::parse(&header_raw);

            if header.length == 0 {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            if (header.length as usize) < PACKET_HEADER_LENGTH {
                return Err(ShtpError::InvalidHeader { len: header.length });
            }
            if header.length as usize > SHTP_MAX_FRAME {
                return Err(ShtpError::OversizeFrame {
                    len: header.length,
                    max: SHTP_MAX_FRAME,
                });
            }

            let mut raw = vec![0u8; header.length as usize];
            self.bus.read_exact(&mut raw)?;
            let mut second_raw = [0u8; PACKET_HEADER_LENGTH];
            second_raw.copy_from_slice(&raw[..PACKET_HEADER_LENGTH]);
            let second = ShtpHeader::parse(&second_raw);
            if second.length != header.length {
                debug!(
                    "length mismatch: first read {} second read {}",
                    header.length, second.length
                );
                return Err(ShtpError::InvalidHeader { len: second.length });
            }
            if second.continuation {
                // No enabled report spans more than one frame; long
                // advertisement packets carry the bit during startup and
                // decode fine standalone.
                debug!("continuation frame on channel {}", second.channel);
            }
            trace!(
                "rx chan={} seq={} len={}",
                second.channel,
                second.sequence,
                second.length
            );

            let payload = raw.split_off(PACKET_HEADER_LENGTH);
            return Ok(Some(ShtpFrame {
                header: second,
                payload,
            }));
        }
    }

    /// Frame `payload` for `channel` and transmit it in one bus transaction.
    ///
    /// The sequence number is drawn from the channel's counter, which wraps
    /// modulo 256 and is independent of every other channel's.
    pub fn write_frame(&mut self, channel: ShtpChannel, payload: &[u8]) -> Result<(), ShtpError> {
        let total = payload.len() + PACKET_HEADER_LENGTH;
        if total > SHTP_MAX_FRAME {
            return Err(ShtpError::OversizeFrame {
                len: total as u16,
                max: SHTP_MAX_FRAME,
            });
        }

        let ch = channel.as_u8();
        let seq = self.sequence_numbers[ch as usize];
        self.sequence_numbers[ch as usize] = seq.wrapping_add(1);

        let mut frame = Vec::with_capacity(total);
        frame.push((total & 0xFF) as u8);
        frame.push(((total >> 8) & 0x7F) as u8);
        frame.push(ch);
        frame.push(seq);
        frame.extend_from_slice(payload);

        trace!("tx chan={} seq={} len={}", ch, seq, total);
        self.bus.write_exact(&frame)?;
        Ok(())
    }
}
