//! Outgoing wire records

use chrono::{DateTime, Utc};

use super::tlv::{encode_field, GROUP_LEN_SIZE};
use super::{Generation, ProtocolError, Tag};

/// Frame carried by a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// Device envelope still attached (tag 0x10)
    Device(Vec<u8>),
    /// Bare 802.15.4 frame (tag 0x20)
    Bare(Vec<u8>),
}

impl FramePayload {
    fn tag(&self) -> Tag {
        match self {
            Self::Device(_) => Tag::DeviceFrame,
            Self::Bare(_) => Tag::Frame,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Self::Device(b) | Self::Bare(b) => b,
        }
    }
}

/// One captured frame with its acquisition metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub channel: u8,
    /// Decimal seconds since epoch, ASCII
    pub timestamp: String,
    pub position: Option<Vec<u8>>,
    pub frame: FramePayload,
}

impl WireRecord {
    pub fn new(channel: u8, captured_at: DateTime<Utc>, frame: FramePayload) -> Self {
        Self {
            channel,
            timestamp: format_timestamp(captured_at),
            position: None,
            frame,
        }
    }

    pub fn with_position(mut self, position: Option<Vec<u8>>) -> Self {
        self.position = position.filter(|p| !p.is_empty());
        self
    }

    /// Serialize as channel, timestamp, optional position, frame.
    ///
    /// Generation A prefixes the group with its 4-byte big-endian length.
    pub fn encode(&self, generation: Generation) -> Result<Vec<u8>, ProtocolError> {
        let mut group = Vec::with_capacity(64 + self.frame.bytes().len());
        encode_field(generation, Tag::Channel, &[self.channel], &mut group)?;
        encode_field(generation, Tag::Timestamp, self.timestamp.as_bytes(), &mut group)?;
        if let Some(position) = &self.position {
            encode_field(generation, Tag::Position, position, &mut group)?;
        }
        encode_field(generation, self.frame.tag(), self.frame.bytes(), &mut group)?;

        match generation {
            Generation::A => {
                let mut datagram = Vec::with_capacity(GROUP_LEN_SIZE + group.len());
                datagram.extend_from_slice(&(group.len() as u32).to_be_bytes());
                datagram.extend_from_slice(&group);
                Ok(datagram)
            }
            Generation::B => Ok(group),
        }
    }
}

/// Seconds since epoch with microsecond resolution
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}
