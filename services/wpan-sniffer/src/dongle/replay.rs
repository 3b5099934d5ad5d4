//! Replay a recorded raw capture as if it came from a dongle
//!
//! The file holds device-framed sub-frames back to back, exactly as they
//! arrive from the bulk endpoint. Reads hand out whole sub-frames, up to
//! [`DATA_BUFLEN`] bytes at a time. Once the file is exhausted every read
//! behaves as a timeout.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::{Dongle, DongleError, DATA_BUFLEN};
use crate::protocol::envelope::MIN_SUBFRAME;

pub struct ReplayDongle {
    name: String,
    data: Vec<u8>,
    cursor: usize,
    capturing: bool,
}

impl ReplayDongle {
    pub fn open(path: &Path) -> Result<Self, DongleError> {
        let data = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        info!("Loaded {} bytes of raw capture from {}", data.len(), path.display());
        Ok(Self::from_bytes(name, data))
    }

    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            cursor: 0,
            capturing: false,
        }
    }

    /// Bytes not yet handed out
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// Length of the next chunk: as many whole sub-frames as fit in one read
    fn next_chunk_len(&self) -> usize {
        let rest = &self.data[self.cursor..];
        let mut taken = 0;

        while rest.len() - taken >= MIN_SUBFRAME {
            let len = u16::from_le_bytes([rest[taken + 1], rest[taken + 2]]) as usize;
            let end = taken + 3 + len;
            if end > rest.len() || end > DATA_BUFLEN {
                break;
            }
            taken = end;
        }

        if taken == 0 {
            // Malformed or oversized head: hand out the rest, the reader drops it
            rest.len().min(DATA_BUFLEN)
        } else {
            taken
        }
    }
}

impl Dongle for ReplayDongle {
    fn label(&self) -> String {
        format!("replay:{}", self.name)
    }

    fn init(&mut self) -> Result<(), DongleError> {
        self.capturing = false;
        Ok(())
    }

    fn tune(&mut self, channel: u8) -> Result<(), DongleError> {
        debug!("[{}] tuned to channel {}", self.name, channel);
        Ok(())
    }

    fn start_capture(&mut self) -> Result<(), DongleError> {
        self.capturing = true;
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<(), DongleError> {
        self.capturing = false;
        Ok(())
    }

    fn read_raw(&mut self, timeout: Duration) -> Vec<u8> {
        if !self.capturing || self.remaining() == 0 {
            thread::sleep(timeout);
            return Vec::new();
        }

        let len = self.next_chunk_len();
        let chunk = self.data[self.cursor..self.cursor + len].to_vec();
        self.cursor += len;
        chunk
    }
}
