//! Wire protocol between capture workers and the interpreter
//!
//! Each captured frame travels as a group of TLV fields:
//! 1. Channel (0x01, one byte)
//! 2. Timestamp (0x02, ASCII decimal seconds since epoch)
//! 3. Position (0x03, opaque NMEA sentence body, optional)
//! 4. Frame, either still inside the device envelope (0x10)
//!    or already unwrapped (0x20)
//!
//! Two historical header layouts exist, see [`Generation`].

pub mod envelope;
pub mod record;
pub mod tlv;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub use envelope::{split_capture, EnvelopeError, Unwrapped};
pub use record::{FramePayload, WireRecord};
pub use tlv::{decode_group, split_groups, Field};

/// First 802.15.4 channel of the 2.4 GHz band
pub const FIRST_CHANNEL: u8 = 11;

/// Last 802.15.4 channel of the 2.4 GHz band
pub const LAST_CHANNEL: u8 = 26;

/// Default UDP port for the interpreter
pub const DEFAULT_PORT: u16 = 2154;

/// All standard 2.4 GHz channels, in tuning order
pub fn standard_channels() -> Vec<u8> {
    (FIRST_CHANNEL..=LAST_CHANNEL).collect()
}

/// Center frequency in MHz of a 2.4 GHz channel, `None` when non-standard
pub fn channel_frequency(channel: u8) -> Option<u16> {
    if (FIRST_CHANNEL..=LAST_CHANNEL).contains(&channel) {
        Some(2405 + 5 * (channel - FIRST_CHANNEL) as u16)
    } else {
        None
    }
}

/// TLV tag identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Channel = 0x01,
    Timestamp = 0x02,
    Position = 0x03,
    DeviceFrame = 0x10,
    Frame = 0x20,
}

impl TryFrom<u8> for Tag {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x01 => Ok(Self::Channel),
            0x02 => Ok(Self::Timestamp),
            0x03 => Ok(Self::Position),
            0x10 => Ok(Self::DeviceFrame),
            0x20 => Ok(Self::Frame),
            other => Err(other),
        }
    }
}

/// Wire protocol generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Generation {
    /// 4-byte big-endian length per group, TLV header = tag + u16 BE length
    #[default]
    A,
    /// One group per datagram, TLV header = tag + u8 length
    B,
}

impl Generation {
    /// Size of a TLV header (tag + length)
    pub fn header_len(self) -> usize {
        match self {
            Self::A => 3,
            Self::B => 2,
        }
    }

    /// Largest value a single TLV field can carry
    pub fn max_value_len(self) -> usize {
        match self {
            Self::A => u16::MAX as usize,
            Self::B => u8::MAX as usize,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

impl FromStr for Generation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" => Ok(Self::A),
            "b" => Ok(Self::B),
            other => Err(format!("unknown protocol generation '{}' (use a or b)", other)),
        }
    }
}

/// Wire protocol errors
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("truncated TLV header: {available} byte(s) left")]
    TruncatedHeader { available: usize },

    #[error("TLV tag 0x{tag:02x} declares {declared} bytes, only {available} left")]
    TruncatedValue {
        tag: u8,
        declared: usize,
        available: usize,
    },

    #[error("group declares {declared} bytes, only {available} left in datagram")]
    TruncatedGroup { declared: usize, available: usize },

    #[error("channel field must be 1 byte, got {0}")]
    InvalidChannel(usize),

    #[error("timestamp field is not ASCII decimal seconds")]
    InvalidTimestamp,

    #[error("field of {len} bytes exceeds the generation {generation} limit of {max}")]
    FieldTooLong {
        len: usize,
        max: usize,
        generation: Generation,
    },

    #[error("device envelope: {0}")]
    Envelope(#[from] EnvelopeError),
}
