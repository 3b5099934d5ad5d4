//! TI CC2531 USB dongle running the stock packet sniffer firmware
//!
//! Control sequence (captured from the vendor tool):
//! 1. SET_CONFIGURATION 0, read ident (192)
//! 2. SET_CONFIGURATION 1, power up (197), poll status (198) until 0x04
//! 3. select channel (201, then 210 with the channel byte)
//! 4. start (210/1, 208), frames arrive on bulk endpoint 0x83
//! 5. stop (209, 197/0), SET_CONFIGURATION 0

use std::time::Duration;

use rusb::{Device, DeviceHandle, GlobalContext};
use tracing::{debug, info, trace, warn};

use super::{poll_status, Dongle, DongleError, DATA_BUFLEN};
use crate::protocol::channel_frequency;

/// CC2531 USB identifiers
pub const VID: u16 = 0x0451;
pub const PID: u16 = 0x16ae;

const INTERFACE: u8 = 0;
const DATA_EP: u8 = 0x83;
const CTRL_TIMEOUT: Duration = Duration::from_millis(200);

const REQ_SET_CONFIG: u8 = 9;
const REQ_IDENT: u8 = 192;
const REQ_POWER: u8 = 197;
const REQ_STATUS: u8 = 198;
const REQ_CHANNEL_PREP: u8 = 201;
const REQ_START: u8 = 208;
const REQ_STOP: u8 = 209;
const REQ_CHANNEL: u8 = 210;

/// Status byte reported once the radio is powered
const STATUS_READY: u8 = 0x04;
const STATUS_POLLS: usize = 20;
const STATUS_POLL_INTERVAL: Duration = Duration::from_micros(62_400);

/// List every attached CC2531 that can be opened
pub fn discover() -> Result<Vec<Cc2531>, DongleError> {
    let mut found = Vec::new();

    for device in rusb::devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(e) => {
                debug!("Skipping USB device: {}", e);
                continue;
            }
        };
        if desc.vendor_id() != VID || desc.product_id() != PID {
            continue;
        }
        match Cc2531::open(device) {
            Ok(dongle) => found.push(dongle),
            Err(e) => warn!(
                "Cannot open CC2531 (add a udev rule or run as root): {}",
                e
            ),
        }
    }

    if found.is_empty() {
        info!("No CC2531 found (VID {:04x} PID {:04x})", VID, PID);
    }
    Ok(found)
}

pub struct Cc2531 {
    handle: DeviceHandle<GlobalContext>,
    bus: u8,
    address: u8,
    sniffing: bool,
}

impl Cc2531 {
    pub fn open(device: Device<GlobalContext>) -> Result<Self, DongleError> {
        let bus = device.bus_number();
        let address = device.address();
        let mut handle = device.open()?;

        if handle.kernel_driver_active(INTERFACE).unwrap_or(false) {
            debug!("[{}:{}] detaching kernel driver", bus, address);
            handle.detach_kernel_driver(INTERFACE)?;
        }
        handle.claim_interface(INTERFACE)?;

        info!("Driving CC2531 @ USB bus {} address {}", bus, address);
        Ok(Self {
            handle,
            bus,
            address,
            sniffing: false,
        })
    }

    fn set_config(&self, config: u16) -> Result<(), DongleError> {
        self.handle
            .write_control(0x00, REQ_SET_CONFIG, config, 0, &[], CTRL_TIMEOUT)?;
        Ok(())
    }

    fn get_ctrl(&self, request: u8, len: usize) -> Result<Vec<u8>, DongleError> {
        let mut buf = vec![0u8; len];
        let n = self
            .handle
            .read_control(0xc0, request, 0, 0, &mut buf, CTRL_TIMEOUT)?;
        buf.truncate(n);
        trace!("[{}:{}] ctrl {} -> {}", self.bus, self.address, request, hex::encode(&buf));
        Ok(buf)
    }

    fn set_ctrl(&self, request: u8, index: u16, data: &[u8]) -> Result<(), DongleError> {
        self.handle
            .write_control(0x40, request, 0, index, data, CTRL_TIMEOUT)?;
        Ok(())
    }

    /// A dongle that never reports ready still gets its channel selected
    fn wait_ready(&self) -> Result<(), DongleError> {
        let ready = poll_status(STATUS_READY, STATUS_POLLS, STATUS_POLL_INTERVAL, || {
            Ok(self.get_ctrl(REQ_STATUS, 1)?.first().copied())
        })?;
        if !ready {
            warn!(
                "[{}] no 0x{:02x} status after power up, selecting channel anyway",
                self.label(),
                STATUS_READY
            );
        }
        Ok(())
    }
}

impl Dongle for Cc2531 {
    fn label(&self) -> String {
        format!("cc2531:{}:{}", self.bus, self.address)
    }

    fn init(&mut self) -> Result<(), DongleError> {
        if self.sniffing {
            self.stop_capture()?;
        }
        self.set_config(0)?;
        self.get_ctrl(REQ_IDENT, 256)?;
        Ok(())
    }

    fn tune(&mut self, channel: u8) -> Result<(), DongleError> {
        if self.sniffing {
            self.stop_capture()?;
            self.init()?;
        }
        self.set_config(1)?;
        self.set_ctrl(REQ_POWER, 4, &[])?;
        self.wait_ready()?;
        self.set_ctrl(REQ_CHANNEL_PREP, 0, &[])?;
        self.set_ctrl(REQ_CHANNEL, 0, &[channel])?;

        match channel_frequency(channel) {
            Some(mhz) => debug!("[{}] tuned to channel {} ({} MHz)", self.label(), channel, mhz),
            None => warn!("[{}] non-standard channel tuning 0x{:02x}", self.label(), channel),
        }
        Ok(())
    }

    fn start_capture(&mut self) -> Result<(), DongleError> {
        self.sniffing = true;
        self.set_ctrl(REQ_CHANNEL, 1, &[0])?;
        self.set_ctrl(REQ_START, 0, &[])?;
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<(), DongleError> {
        self.set_ctrl(REQ_STOP, 0, &[])?;
        self.set_ctrl(REQ_POWER, 0, &[])?;
        self.set_config(0)?;
        self.sniffing = false;
        Ok(())
    }

    fn read_raw(&mut self, timeout: Duration) -> Vec<u8> {
        let mut buf = vec![0u8; DATA_BUFLEN];
        match self.handle.read_bulk(DATA_EP, &mut buf, timeout) {
            Ok(n) => {
                buf.truncate(n);
                buf
            }
            Err(rusb::Error::Timeout) => Vec::new(),
            Err(e) => {
                trace!("[{}] bulk read failed: {}", self.label(), e);
                Vec::new()
            }
        }
    }
}

impl Drop for Cc2531 {
    fn drop(&mut self) {
        if self.sniffing {
            let _ = self.stop_capture();
        }
        let _ = self.handle.release_interface(INTERFACE);
    }
}
