//! TLV field codec and datagram group framing

use super::{Generation, ProtocolError, Tag};

/// Size of the outer group length prefix (generation A)
pub const GROUP_LEN_SIZE: usize = 4;

/// A decoded TLV field
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Channel(u8),
    /// Capture time in seconds since epoch
    Timestamp(f64),
    /// Opaque positioning sentence body
    Position(Vec<u8>),
    /// Frame still wrapped in the capture device envelope
    DeviceFrame(Vec<u8>),
    /// Bare 802.15.4 frame
    Frame(Vec<u8>),
    /// Tag outside the known set, skipped by the interpreter
    Unknown { tag: u8, len: usize },
}

/// Append one TLV field to `out`
pub fn encode_field(
    generation: Generation,
    tag: Tag,
    value: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), ProtocolError> {
    if value.len() > generation.max_value_len() {
        return Err(ProtocolError::FieldTooLong {
            len: value.len(),
            max: generation.max_value_len(),
            generation,
        });
    }

    out.push(tag as u8);
    match generation {
        Generation::A => out.extend_from_slice(&(value.len() as u16).to_be_bytes()),
        Generation::B => out.push(value.len() as u8),
    }
    out.extend_from_slice(value);
    Ok(())
}

/// Decode every TLV field of one group.
///
/// Any truncated header or value aborts the whole group.
pub fn decode_group(group: &[u8], generation: Generation) -> Result<Vec<Field>, ProtocolError> {
    let header_len = generation.header_len();
    let mut fields = Vec::new();
    let mut rest = group;

    while !rest.is_empty() {
        if rest.len() < header_len {
            return Err(ProtocolError::TruncatedHeader {
                available: rest.len(),
            });
        }

        let tag = rest[0];
        let len = match generation {
            Generation::A => u16::from_be_bytes([rest[1], rest[2]]) as usize,
            Generation::B => rest[1] as usize,
        };
        let body = &rest[header_len..];
        if body.len() < len {
            return Err(ProtocolError::TruncatedValue {
                tag,
                declared: len,
                available: body.len(),
            });
        }

        fields.push(decode_field(tag, &body[..len])?);
        rest = &body[len..];
    }

    Ok(fields)
}

fn decode_field(tag: u8, value: &[u8]) -> Result<Field, ProtocolError> {
    match Tag::try_from(tag) {
        Ok(Tag::Channel) => decode_channel(value),
        Ok(Tag::Timestamp) => decode_timestamp(value),
        Ok(Tag::Position) => Ok(Field::Position(value.to_vec())),
        Ok(Tag::DeviceFrame) => Ok(Field::DeviceFrame(value.to_vec())),
        Ok(Tag::Frame) => Ok(Field::Frame(value.to_vec())),
        Err(tag) => Ok(Field::Unknown {
            tag,
            len: value.len(),
        }),
    }
}

fn decode_channel(value: &[u8]) -> Result<Field, ProtocolError> {
    match value {
        [channel] => Ok(Field::Channel(*channel)),
        _ => Err(ProtocolError::InvalidChannel(value.len())),
    }
}

fn decode_timestamp(value: &[u8]) -> Result<Field, ProtocolError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|t| t.is_finite())
        .map(Field::Timestamp)
        .ok_or(ProtocolError::InvalidTimestamp)
}

/// Split a datagram into its embedded groups.
///
/// Generation A walks the 4-byte big-endian length prefixes until fewer
/// than 4 bytes remain; a prefix larger than what is left yields one error
/// and ends the walk. Generation B datagrams hold exactly one group.
pub fn split_groups(datagram: &[u8], generation: Generation) -> GroupIter<'_> {
    GroupIter {
        rest: datagram,
        generation,
    }
}

/// Iterator over the groups of one datagram
pub struct GroupIter<'a> {
    rest: &'a [u8],
    generation: Generation,
}

impl<'a> Iterator for GroupIter<'a> {
    type Item = Result<&'a [u8], ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.generation {
            Generation::B => {
                if self.rest.is_empty() {
                    return None;
                }
                let group = self.rest;
                self.rest = &[];
                Some(Ok(group))
            }
            Generation::A => {
                if self.rest.len() < GROUP_LEN_SIZE {
                    return None;
                }
                let declared = u32::from_be_bytes([
                    self.rest[0],
                    self.rest[1],
                    self.rest[2],
                    self.rest[3],
                ]) as usize;
                let body = &self.rest[GROUP_LEN_SIZE..];
                if declared > body.len() {
                    self.rest = &[];
                    return Some(Err(ProtocolError::TruncatedGroup {
                        declared,
                        available: body.len(),
                    }));
                }
                let (group, rest) = body.split_at(declared);
                self.rest = rest;
                Some(Ok(group))
            }
        }
    }
}
