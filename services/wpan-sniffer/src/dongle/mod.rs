//! Capture device capability
//!
//! A dongle is owned by exactly one capture worker. Control operations may
//! fail; raw reads never do (I/O failures look like timeouts).

#[cfg(feature = "usb")]
pub mod cc2531;
pub mod replay;

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

pub use replay::ReplayDongle;

/// Largest single raw read
pub const DATA_BUFLEN: usize = 1024;

/// Device control errors
#[derive(Debug, Error)]
pub enum DongleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "usb")]
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

/// Per-device driver interface
pub trait Dongle: Send {
    /// Short identification for logs
    fn label(&self) -> String;

    /// Reset the device to its idle configuration
    fn init(&mut self) -> Result<(), DongleError>;

    /// Tune the radio to an 802.15.4 channel
    fn tune(&mut self, channel: u8) -> Result<(), DongleError>;

    fn start_capture(&mut self) -> Result<(), DongleError>;

    fn stop_capture(&mut self) -> Result<(), DongleError>;

    /// Read raw captured bytes; empty on timeout or device I/O failure
    fn read_raw(&mut self, timeout: Duration) -> Vec<u8>;
}

/// Find every capture device: replay files first, then attached dongles
pub fn discover(replay_files: &[PathBuf]) -> Vec<Box<dyn Dongle>> {
    let mut dongles: Vec<Box<dyn Dongle>> = Vec::new();

    for path in replay_files {
        match ReplayDongle::open(path) {
            Ok(dongle) => {
                info!("Replay device: {}", dongle.label());
                dongles.push(Box::new(dongle));
            }
            Err(e) => warn!("Cannot open replay file {}: {}", path.display(), e),
        }
    }

    #[cfg(feature = "usb")]
    match cc2531::discover() {
        Ok(found) => {
            for dongle in found {
                info!("CC2531 device: {}", dongle.label());
                dongles.push(Box::new(dongle));
            }
        }
        Err(e) => warn!("USB enumeration failed: {}", e),
    }

    dongles
}

/// Poll a status register until it reads `ready` or `polls` attempts pass.
///
/// Returns whether the ready status was seen. Only read errors fail.
#[cfg_attr(not(feature = "usb"), allow(dead_code))]
pub(crate) fn poll_status<F>(
    ready: u8,
    polls: usize,
    interval: Duration,
    mut read_status: F,
) -> Result<bool, DongleError>
where
    F: FnMut() -> Result<Option<u8>, DongleError>,
{
    for attempt in 0..polls {
        if read_status()? == Some(ready) {
            return Ok(true);
        }
        if attempt + 1 < polls {
            thread::sleep(interval);
        }
    }
    Ok(false)
}
