//! CC2531 device envelope handling
//!
//! The dongle delivers each radio frame inside a small envelope
//! (TI packet sniffer format):
//!
//! ```text
//! [info u8][len u16 LE][device timestamp u32 LE][plen u8][payload plen-2][rssi i8][fcs|lqi u8]
//! ```
//!
//! `len` counts every byte after itself. Bit 7 of the trailing byte is the
//! FCS check result computed by the radio, the low 7 bits are the LQI.
//! Older senders forwarded only the inner record starting at `plen`.

use thiserror::Error;

use super::Generation;

/// Offset of the little-endian sub-frame length inside a raw read
const LEN_OFFSET: usize = 1;

/// Bytes preceding the counted part of a sub-frame (info + len)
const SUBFRAME_PREFIX: usize = 3;

/// Shortest read that may hold a sub-frame
pub const MIN_SUBFRAME: usize = 8;

/// Bytes before the inner record in a timestamped envelope
const PSD_HEADER: usize = 7;

/// RSSI + FCS/LQI trailer
const TRAILER: usize = 2;

/// Envelope unwrap errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope too short: need {needed} bytes, got {available}")]
    TooShort { needed: usize, available: usize },

    #[error("invalid inner payload length {0}")]
    InvalidPayloadLength(u8),
}

/// Sub-frames found in one raw read
#[derive(Debug, Default)]
pub struct SplitCapture<'a> {
    /// Complete sub-frames in capture order
    pub frames: Vec<&'a [u8]>,
    /// Bytes left over that did not form a complete sub-frame
    pub dropped: usize,
}

/// Split a raw read into device-framed sub-frames.
///
/// Several radio frames can be concatenated into a single bulk transfer.
/// A sub-frame running past the end of the read is dropped.
pub fn split_capture(data: &[u8]) -> SplitCapture<'_> {
    let mut split = SplitCapture::default();
    let mut rest = data;

    while rest.len() >= MIN_SUBFRAME {
        let len = u16::from_le_bytes([rest[LEN_OFFSET], rest[LEN_OFFSET + 1]]) as usize;
        let end = SUBFRAME_PREFIX + len;
        if end > rest.len() {
            break;
        }
        split.frames.push(&rest[..end]);
        rest = &rest[end..];
    }

    split.dropped = rest.len();
    split
}

/// Radio frame and metrics recovered from a device envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrapped {
    /// Dongle clock at reception, only in timestamped envelopes
    pub device_timestamp: Option<u32>,
    pub rssi: i8,
    pub lqi: u8,
    /// Radio FCS verdict, `None` when the envelope does not carry it
    pub fcs_ok: Option<bool>,
    /// 802.15.4 frame without FCS
    pub payload: Vec<u8>,
}

/// Unwrap a device-framed frame with the strategy of the given generation
pub fn unwrap(generation: Generation, envelope: &[u8]) -> Result<Unwrapped, EnvelopeError> {
    match generation {
        Generation::A => unwrap_timestamped(envelope),
        Generation::B => unwrap_record(envelope),
    }
}

/// Generation A: full envelope with device timestamp, RSSI, payload and FCS flag
pub fn unwrap_timestamped(envelope: &[u8]) -> Result<Unwrapped, EnvelopeError> {
    if envelope.len() < PSD_HEADER + 1 {
        return Err(EnvelopeError::TooShort {
            needed: PSD_HEADER + 1,
            available: envelope.len(),
        });
    }

    let device_timestamp =
        u32::from_le_bytes([envelope[3], envelope[4], envelope[5], envelope[6]]);
    let inner = inner_record(&envelope[PSD_HEADER..])?;

    Ok(Unwrapped {
        device_timestamp: Some(device_timestamp),
        rssi: inner.rssi,
        lqi: inner.lqi,
        fcs_ok: Some(inner.fcs_ok),
        payload: inner.payload.to_vec(),
    })
}

/// Generation B: inner record only, RSSI, LQI and payload
pub fn unwrap_record(record: &[u8]) -> Result<Unwrapped, EnvelopeError> {
    let inner = inner_record(record)?;

    Ok(Unwrapped {
        device_timestamp: None,
        rssi: inner.rssi,
        lqi: inner.lqi,
        fcs_ok: None,
        payload: inner.payload.to_vec(),
    })
}

struct InnerRecord<'a> {
    payload: &'a [u8],
    rssi: i8,
    lqi: u8,
    fcs_ok: bool,
}

/// Parse `[plen][payload plen-2][rssi][fcs|lqi]`
fn inner_record(record: &[u8]) -> Result<InnerRecord<'_>, EnvelopeError> {
    let Some((&plen, body)) = record.split_first() else {
        return Err(EnvelopeError::TooShort {
            needed: 1,
            available: 0,
        });
    };

    let counted = plen as usize;
    if counted < TRAILER {
        return Err(EnvelopeError::InvalidPayloadLength(plen));
    }
    if body.len() < counted {
        return Err(EnvelopeError::TooShort {
            needed: counted + 1,
            available: record.len(),
        });
    }

    let payload_len = counted - TRAILER;
    let status = body[payload_len + 1];

    Ok(InnerRecord {
        payload: &body[..payload_len],
        rssi: body[payload_len] as i8,
        lqi: status & 0x7f,
        fcs_ok: status & 0x80 != 0,
    })
}

/// Inner record of a timestamped envelope, as forwarded to Generation B peers
pub fn inner_record_bytes(envelope: &[u8]) -> Result<&[u8], EnvelopeError> {
    if envelope.len() < PSD_HEADER + 1 {
        return Err(EnvelopeError::TooShort {
            needed: PSD_HEADER + 1,
            available: envelope.len(),
        });
    }
    Ok(&envelope[PSD_HEADER..])
}

/// Build a timestamped envelope around a bare frame, as the dongle would
#[cfg(test)]
pub fn wrap_timestamped(payload: &[u8], device_timestamp: u32, rssi: i8, lqi: u8, fcs_ok: bool) -> Vec<u8> {
    let plen = payload.len() + TRAILER;
    let len = 4 + 1 + plen;
    let mut out = Vec::with_capacity(SUBFRAME_PREFIX + len);
    out.push(0x00);
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&device_timestamp.to_le_bytes());
    out.push(plen as u8);
    out.extend_from_slice(payload);
    out.push(rssi as u8);
    out.push((lqi & 0x7f) | if fcs_ok { 0x80 } else { 0x00 });
    out
}
