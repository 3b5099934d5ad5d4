//! IEEE 802.15.4 MAC header decoding

use std::fmt;

use thiserror::Error;

/// MAC decoding errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MacDecodeError {
    #[error("frame too short: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("reserved {0} addressing mode")]
    ReservedAddressMode(&'static str),
}

/// Turns a bare radio frame into a displayable description
pub trait MacParser: Send + Sync {
    fn parse(&self, frame: &[u8]) -> Result<String, MacDecodeError>;
}

/// Default parser for the 802.15.4 MAC header
#[derive(Debug, Clone, Copy, Default)]
pub struct Ieee802154;

impl MacParser for Ieee802154 {
    fn parse(&self, frame: &[u8]) -> Result<String, MacDecodeError> {
        MacHeader::decode(frame).map(|header| header.to_string())
    }
}

/// Frame type field (bits 0-2 of the frame control)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Beacon,
    Data,
    Ack,
    Command,
    Reserved(u8),
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beacon => write!(f, "Beacon"),
            Self::Data => write!(f, "Data"),
            Self::Ack => write!(f, "Ack"),
            Self::Command => write!(f, "Command"),
            Self::Reserved(bits) => write!(f, "Reserved ({})", bits),
        }
    }
}

impl From<u8> for FrameType {
    fn from(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Self::Beacon,
            1 => Self::Data,
            2 => Self::Ack,
            3 => Self::Command,
            other => Self::Reserved(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    Short(u16),
    Extended(u64),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short(a) => write!(f, "short 0x{:04x}", a),
            Self::Extended(a) => {
                let bytes = a.to_be_bytes();
                let parts: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                write!(f, "extended {}", parts.join(":"))
            }
        }
    }
}

/// Decoded MAC header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacHeader {
    pub frame_type: FrameType,
    pub security: bool,
    pub frame_pending: bool,
    pub ack_request: bool,
    pub pan_compression: bool,
    pub version: u8,
    pub sequence: u8,
    pub dest_pan: Option<u16>,
    pub dest: Option<Address>,
    pub src_pan: Option<u16>,
    pub src: Option<Address>,
    pub payload_len: usize,
}

impl MacHeader {
    pub fn decode(frame: &[u8]) -> Result<Self, MacDecodeError> {
        let mut reader = Reader::new(frame);
        let fc = reader.u16()?;
        let sequence = reader.u8()?;

        let dest_mode = ((fc >> 10) & 0x03) as u8;
        let src_mode = ((fc >> 14) & 0x03) as u8;
        let pan_compression = fc & 0x0040 != 0;

        let (dest_pan, dest) = match dest_mode {
            0 => (None, None),
            1 => return Err(MacDecodeError::ReservedAddressMode("destination")),
            mode => {
                let pan = reader.u16()?;
                (Some(pan), Some(reader.address(mode)?))
            }
        };

        let (src_pan, src) = match src_mode {
            0 => (None, None),
            1 => return Err(MacDecodeError::ReservedAddressMode("source")),
            mode => {
                let pan = if pan_compression {
                    dest_pan
                } else {
                    Some(reader.u16()?)
                };
                (pan, Some(reader.address(mode)?))
            }
        };

        Ok(Self {
            frame_type: FrameType::from(fc as u8),
            security: fc & 0x0008 != 0,
            frame_pending: fc & 0x0010 != 0,
            ack_request: fc & 0x0020 != 0,
            pan_compression,
            version: ((fc >> 12) & 0x03) as u8,
            sequence,
            dest_pan,
            dest,
            src_pan,
            src,
            payload_len: reader.remaining(),
        })
    }
}

impl fmt::Display for MacHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = match self.version {
            0 => "2003",
            1 => "2006",
            2 => "2015",
            _ => "reserved",
        };
        writeln!(f, "  frame type: {} (version {})", self.frame_type, version)?;

        let mut flags = Vec::new();
        if self.security {
            flags.push("security");
        }
        if self.frame_pending {
            flags.push("frame pending");
        }
        if self.ack_request {
            flags.push("ack request");
        }
        if self.pan_compression {
            flags.push("PAN compression");
        }
        if flags.is_empty() {
            writeln!(f, "  flags: none")?;
        } else {
            writeln!(f, "  flags: {}", flags.join(", "))?;
        }

        writeln!(f, "  sequence number: {}", self.sequence)?;
        if let (Some(pan), Some(addr)) = (self.dest_pan, self.dest) {
            writeln!(f, "  destination: PAN 0x{:04x}, {}", pan, addr)?;
        }
        if let Some(addr) = self.src {
            match self.src_pan {
                Some(pan) => writeln!(f, "  source: PAN 0x{:04x}, {}", pan, addr)?,
                None => writeln!(f, "  source: {}", addr)?,
            }
        }
        write!(f, "  payload: {} bytes", self.payload_len)
    }
}

/// Little-endian cursor over the frame
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MacDecodeError> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(MacDecodeError::Truncated {
                needed: end,
                available: self.data.len(),
            });
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, MacDecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, MacDecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn address(&mut self, mode: u8) -> Result<Address, MacDecodeError> {
        if mode == 2 {
            return Ok(Address::Short(self.u16()?));
        }
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(Address::Extended(u64::from_le_bytes(raw)))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}
