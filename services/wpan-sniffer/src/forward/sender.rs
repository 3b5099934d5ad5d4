//! Frame encoder: wraps captured frames into wire records and sends them

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::transport::{Transport, TransportError};
use crate::capture::FrameSink;
use crate::config::ForwardConfig;
use crate::position::PositionSource;
use crate::protocol::envelope::{inner_record_bytes, unwrap_timestamped};
use crate::protocol::{FramePayload, Generation, ProtocolError, WireRecord};

/// Per-worker encoder and transport sender
pub struct Forwarder {
    transport: Transport,
    config: ForwardConfig,
    position: Option<Arc<dyn PositionSource>>,
}

impl Forwarder {
    pub fn new(
        transport: Transport,
        config: ForwardConfig,
        position: Option<Arc<dyn PositionSource>>,
    ) -> Self {
        Self {
            transport,
            config,
            position,
        }
    }

    /// Open the configured endpoint, fails when it cannot be used
    pub fn connect(
        config: ForwardConfig,
        position: Option<Arc<dyn PositionSource>>,
    ) -> Result<Self, TransportError> {
        let transport = Transport::connect(&config.endpoint)?;
        Ok(Self::new(transport, config, position))
    }

    /// Build the datagram for one captured sub-frame
    pub fn encode(
        &self,
        channel: u8,
        frame: &[u8],
        captured_at: DateTime<Utc>,
    ) -> Result<Vec<u8>, ProtocolError> {
        let payload = if self.config.unwrapped {
            FramePayload::Bare(unwrap_timestamped(frame)?.payload)
        } else {
            match self.config.generation {
                Generation::A => FramePayload::Device(frame.to_vec()),
                Generation::B => FramePayload::Device(inner_record_bytes(frame)?.to_vec()),
            }
        };

        let position = self
            .position
            .as_ref()
            .and_then(|source| source.latest_fix(&self.config.position_sentence));

        WireRecord::new(channel, captured_at, payload)
            .with_position(position)
            .encode(self.config.generation)
    }
}

impl FrameSink for Forwarder {
    fn forward(&mut self, channel: u8, frame: &[u8]) -> usize {
        match self.encode(channel, frame, Utc::now()) {
            Ok(datagram) => {
                trace!("channel {}: {}", channel, hex::encode(&datagram));
                self.transport.send(&datagram)
            }
            Err(e) => {
                debug!("Cannot encode frame on channel {}: {}", channel, e);
                0
            }
        }
    }

    fn close(&mut self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::Endpoint;
    use crate::protocol::envelope::wrap_timestamped;
    use crate::protocol::{decode_group, split_groups, Field};
    use chrono::TimeZone;
    use std::os::unix::net::UnixDatagram;
    use std::path::PathBuf;

    const FRAME: &str = "41883320ab2bffff01006869";

    struct FixedFix(&'static str);

    impl PositionSource for FixedFix {
        fn latest_fix(&self, sentence: &str) -> Option<Vec<u8>> {
            (sentence == "GPRMC").then(|| self.0.as_bytes().to_vec())
        }
    }

    fn config(generation: Generation, unwrapped: bool) -> ForwardConfig {
        ForwardConfig {
            endpoint: Endpoint::Local(PathBuf::from("/nonexistent")),
            generation,
            unwrapped,
            position_sentence: "GPRMC".to_string(),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 5_000).unwrap()
    }

    #[test]
    fn test_encode_device_frame_with_position() {
        let envelope = wrap_timestamped(&hex::decode(FRAME).unwrap(), 42, -30, 90, true);
        let forwarder = Forwarder::new(
            Transport::Closed,
            config(Generation::A, false),
            Some(Arc::new(FixedFix("123519,A"))),
        );

        let datagram = forwarder.encode(17, &envelope, at()).unwrap();
        let group = split_groups(&datagram, Generation::A).next().unwrap().unwrap();
        let fields = decode_group(group, Generation::A).unwrap();
        assert_eq!(fields[0], Field::Channel(17));
        assert!(matches!(fields[1], Field::Timestamp(t) if (t - 1_700_000_000.000005).abs() < 1e-6));
        assert_eq!(fields[2], Field::Position(b"123519,A".to_vec()));
        assert_eq!(fields[3], Field::DeviceFrame(envelope));
    }

    #[test]
    fn test_encode_unwrapped_without_position() {
        let frame = hex::decode(FRAME).unwrap();
        let envelope = wrap_timestamped(&frame, 42, -30, 90, true);
        let forwarder = Forwarder::new(Transport::Closed, config(Generation::A, true), None);

        let datagram = forwarder.encode(11, &envelope, at()).unwrap();
        let group = split_groups(&datagram, Generation::A).next().unwrap().unwrap();
        let fields = decode_group(group, Generation::A).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[2], Field::Frame(frame));
    }

    #[test]
    fn test_encode_generation_b_sends_inner_record() {
        let envelope = wrap_timestamped(&[0x41, 0x88, 0x01], 1, -30, 90, true);
        let forwarder = Forwarder::new(Transport::Closed, config(Generation::B, false), None);

        let datagram = forwarder.encode(26, &envelope, at()).unwrap();
        let fields = decode_group(&datagram, Generation::B).unwrap();
        assert_eq!(fields[2], Field::DeviceFrame(envelope[7..].to_vec()));
    }

    #[test]
    fn test_closed_transport_sends_nothing() {
        let envelope = wrap_timestamped(&[0x41, 0x88, 0x01], 1, -30, 90, true);
        let mut forwarder = Forwarder::new(Transport::Closed, config(Generation::A, false), None);
        assert_eq!(forwarder.forward(11, &envelope), 0);
        // malformed envelope cannot be unwrapped
        let mut forwarder = Forwarder::new(Transport::Closed, config(Generation::A, true), None);
        assert_eq!(forwarder.forward(11, &[0x00, 0x01]), 0);
    }

    #[test]
    fn test_forward_over_local_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interp.sock");
        let server = UnixDatagram::bind(&path).unwrap();

        let mut cfg = config(Generation::A, false);
        cfg.endpoint = Endpoint::Local(path);
        let mut forwarder = Forwarder::connect(cfg, None).unwrap();

        let envelope = wrap_timestamped(&[0x41, 0x88, 0x01], 1, -30, 90, true);
        let sent = forwarder.forward(15, &envelope);
        assert!(sent > 0);

        let mut buf = [0u8; 256];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(n, sent);
        assert_eq!(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize, n - 4);

        forwarder.close();
        assert_eq!(forwarder.forward(15, &envelope), 0);
    }
}
