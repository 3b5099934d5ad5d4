//! Rebuild a decoded message from the TLV fields of one group

use tracing::debug;

use crate::protocol::envelope::unwrap;
use crate::protocol::{Field, Generation};

/// One frame as reconstructed by the interpreter
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub channel: u8,
    /// Capture time, seconds since epoch
    pub timestamp: f64,
    pub position: Option<Vec<u8>>,
    pub device_timestamp: Option<u32>,
    pub rssi: Option<i8>,
    pub lqi: Option<u8>,
    /// `None` when the sender did not carry the radio FCS verdict
    pub fcs_ok: Option<bool>,
    /// Bare 802.15.4 frame
    pub frame: Vec<u8>,
}

/// Collects fields until a complete message can be built
#[derive(Debug, Default)]
struct Builder {
    channel: Option<u8>,
    timestamp: Option<f64>,
    position: Option<Vec<u8>>,
    device_timestamp: Option<u32>,
    rssi: Option<i8>,
    lqi: Option<u8>,
    fcs_ok: Option<bool>,
    frame: Option<Vec<u8>>,
}

impl Builder {
    fn apply(&mut self, field: Field, generation: Generation) {
        match field {
            Field::Channel(c) => self.channel = Some(c),
            Field::Timestamp(t) => self.timestamp = Some(t),
            Field::Position(p) => self.position = Some(p),
            Field::DeviceFrame(envelope) => match unwrap(generation, &envelope) {
                Ok(u) => {
                    self.device_timestamp = u.device_timestamp;
                    self.rssi = Some(u.rssi);
                    self.lqi = Some(u.lqi);
                    self.fcs_ok = u.fcs_ok;
                    self.frame = Some(u.payload);
                }
                Err(e) => debug!("Cannot unwrap device frame: {}", e),
            },
            Field::Frame(frame) => self.frame = Some(frame),
            Field::Unknown { tag, len } => {
                debug!("Ignoring unknown tag 0x{:02x} ({} bytes)", tag, len)
            }
        }
    }

    fn build(self) -> Option<DecodedMessage> {
        Some(DecodedMessage {
            channel: self.channel?,
            timestamp: self.timestamp?,
            position: self.position,
            device_timestamp: self.device_timestamp,
            rssi: self.rssi,
            lqi: self.lqi,
            fcs_ok: self.fcs_ok,
            frame: self.frame?,
        })
    }
}

/// Assemble a message; `None` unless channel, timestamp and frame are all present
pub fn assemble(fields: Vec<Field>, generation: Generation) -> Option<DecodedMessage> {
    let mut builder = Builder::default();
    for field in fields {
        builder.apply(field, generation);
    }
    builder.build()
}
