//! Human-readable and JSON rendering of decoded frames, and the output sink

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::{Local, TimeZone};
use serde::Serialize;
use tracing::{info, warn};

use super::mac::MacDecodeError;
use super::message::DecodedMessage;
use crate::config::{OutputConfig, OutputFormat};
use crate::protocol::channel_frequency;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Capture time in local time, raw seconds when out of range
fn local_time(timestamp: f64) -> String {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9) as u32;
    match Local.timestamp_opt(secs as i64, nanos.min(999_999_999)).single() {
        Some(at) => at.format(TIME_FORMAT).to_string(),
        None => format!("{:.6}", timestamp),
    }
}

pub fn render_text(msg: &DecodedMessage, mac: &Result<String, MacDecodeError>) -> String {
    let mut lines = Vec::with_capacity(8);

    let time = local_time(msg.timestamp);
    match msg.fcs_ok {
        Some(true) => lines.push(format!("[+] frame received (FCS OK): {}", time)),
        Some(false) => lines.push(format!("[+] frame received (FCS error): {}", time)),
        None => lines.push(format!("[+] frame received: {}", time)),
    }

    if let Some(position) = &msg.position {
        lines.push(format!("position (GPRMC): {}", String::from_utf8_lossy(position)));
    }

    match channel_frequency(msg.channel) {
        Some(mhz) => lines.push(format!("channel: {}, {} MHz", msg.channel, mhz)),
        None => lines.push(format!("channel: {}, non-standard", msg.channel)),
    }

    match (msg.rssi, msg.lqi) {
        (Some(rssi), Some(lqi)) => lines.push(format!("RSSI: {}, LQI: {}", rssi, lqi)),
        (Some(rssi), None) => lines.push(format!("RSSI: {}", rssi)),
        _ => {}
    }

    lines.push(format!("IEEE 802.15.4 frame: {}", hex::encode(&msg.frame)));
    match mac {
        Ok(shown) => lines.push(format!("IEEE 802.15.4 MAC:\n{}\n", shown)),
        Err(_) => lines.push("IEEE 802.15.4 MAC: -decoding error-\n".to_string()),
    }

    lines.join("\n")
}

#[derive(Serialize)]
struct JsonFrame<'a> {
    time: String,
    timestamp: f64,
    channel: u8,
    frequency_mhz: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_timestamp: Option<u32>,
    rssi: Option<i8>,
    lqi: Option<u8>,
    fcs_ok: Option<bool>,
    frame: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mac: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mac_error: Option<String>,
}

pub fn render_json(msg: &DecodedMessage, mac: &Result<String, MacDecodeError>) -> String {
    let frame = JsonFrame {
        time: local_time(msg.timestamp),
        timestamp: msg.timestamp,
        channel: msg.channel,
        frequency_mhz: channel_frequency(msg.channel),
        position: msg
            .position
            .as_ref()
            .map(|p| String::from_utf8_lossy(p).into_owned()),
        device_timestamp: msg.device_timestamp,
        rssi: msg.rssi,
        lqi: msg.lqi,
        fcs_ok: msg.fcs_ok,
        frame: hex::encode(&msg.frame),
        mac: mac.as_ref().ok().map(String::as_str),
        mac_error: mac.as_ref().err().map(ToString::to_string),
    };
    json_line(&frame)
}

/// One JSON object per line, an error object when serialization fails
fn json_line<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

/// Where rendered frames go: stdout and/or an append-only file
pub struct Output {
    stdout: Option<Box<dyn Write + Send>>,
    file: Option<File>,
    format: OutputFormat,
}

impl Output {
    /// Open the configured sinks; a file that cannot be opened is disabled
    pub fn open(config: &OutputConfig) -> Self {
        let file = config.file.as_deref().and_then(|path| match open_session(path) {
            Ok(f) => {
                info!("Writing interpreted frames to {}", path.display());
                Some(f)
            }
            Err(e) => {
                warn!("Cannot write output to {}: {}", path.display(), e);
                None
            }
        });

        Self {
            stdout: config
                .stdout
                .then(|| Box::new(io::stdout()) as Box<dyn Write + Send>),
            file,
            format: config.format,
        }
    }

    pub fn render(&self, msg: &DecodedMessage, mac: &Result<String, MacDecodeError>) -> String {
        match self.format {
            OutputFormat::Text => render_text(msg, mac),
            OutputFormat::Json => render_json(msg, mac),
        }
    }

    pub fn emit(&mut self, block: &str) {
        if let Some(out) = &mut self.stdout {
            if let Err(e) = writeln!(out, "{}", block).and_then(|()| out.flush()) {
                warn!("Stdout write failed, disabling stdout output: {}", e);
                self.stdout = None;
            }
        }
        if let Some(file) = &mut self.file {
            if let Err(e) = writeln!(file, "{}", block) {
                warn!("Output file write failed, disabling file output: {}", e);
                self.file = None;
            }
        }
    }
}

/// Open `path` for appending and write the session banner
fn open_session(path: &Path) -> io::Result<File> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let rule = "#".repeat(20);
    write!(
        file,
        "{rule}\n# 802.15.4 interpreter session\n# {}\n{rule}\n",
        Local::now().format(TIME_FORMAT)
    )?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> DecodedMessage {
        DecodedMessage {
            channel: 20,
            timestamp: 1_384_352_000.25,
            position: Some(b"123519,A,4807.038,N".to_vec()),
            device_timestamp: Some(99),
            rssi: Some(-40),
            lqi: Some(100),
            fcs_ok: Some(true),
            frame: vec![0x41, 0x88, 0x33],
        }
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&message(), &Ok("  sequence number: 51".to_string()));
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("[+] frame received (FCS OK): 20"));
        assert_eq!(lines[1], "position (GPRMC): 123519,A,4807.038,N");
        assert_eq!(lines[2], "channel: 20, 2450 MHz");
        assert_eq!(lines[3], "RSSI: -40, LQI: 100");
        assert_eq!(lines[4], "IEEE 802.15.4 frame: 418833");
        assert_eq!(lines[5], "IEEE 802.15.4 MAC:");
        assert_eq!(lines[6], "  sequence number: 51");
    }

    #[test]
    fn test_render_text_failures() {
        let mut msg = message();
        msg.fcs_ok = Some(false);
        msg.channel = 5;
        msg.position = None;
        let text = render_text(
            &msg,
            &Err(MacDecodeError::Truncated {
                needed: 2,
                available: 1,
            }),
        );
        assert!(text.contains("(FCS error)"));
        assert!(text.contains("channel: 5, non-standard"));
        assert!(!text.contains("position"));
        assert!(text.ends_with("IEEE 802.15.4 MAC: -decoding error-\n"));

        msg.fcs_ok = None;
        msg.rssi = None;
        let text = render_text(&msg, &Ok(String::new()));
        assert!(text.starts_with("[+] frame received: "));
        assert!(!text.contains("RSSI"));
    }

    #[test]
    fn test_render_json() {
        let json = render_json(&message(), &Ok("ok".to_string()));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["channel"], 20);
        assert_eq!(value["frequency_mhz"], 2450);
        assert_eq!(value["rssi"], -40);
        assert_eq!(value["fcs_ok"], true);
        assert_eq!(value["frame"], "418833");
        assert_eq!(value["mac"], "ok");
        assert!(value.get("mac_error").is_none());

        let json = render_json(
            &message(),
            &Err(MacDecodeError::ReservedAddressMode("source")),
        );
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["mac_error"], "reserved source addressing mode");
    }

    #[test]
    fn test_json_serialization_failure_is_valid_json() {
        let mut bad = std::collections::HashMap::new();
        bad.insert((1u8, 2u8), "\"quoted\"");
        let line = json_line(&bad);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert!(value["error"].as_str().unwrap().contains("key must be a string"));
    }

    #[test]
    fn test_output_file_banner_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sniffer.txt");
        let config = OutputConfig {
            stdout: false,
            file: Some(path.clone()),
            format: OutputFormat::Text,
        };

        let mut output = Output::open(&config);
        output.emit("first");
        drop(output);
        let mut output = Output::open(&config);
        output.emit("second");
        drop(output);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("# 802.15.4 interpreter session").count(), 2);
        let first = content.find("first\n").unwrap();
        let second = content.find("second\n").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_unwritable_output_file_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = OutputConfig {
            stdout: false,
            file: Some(dir.path().join("missing").join("out.txt")),
            format: OutputFormat::Json,
        };
        let mut output = Output::open(&config);
        assert!(output.file.is_none());
        output.emit("dropped");
    }

    struct ClosedPipe {
        attempts: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            self.attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_broken_stdout_is_disabled_and_file_keeps_working() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sniffer.txt");
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut output = Output::open(&OutputConfig {
            stdout: false,
            file: Some(path.clone()),
            format: OutputFormat::Text,
        });
        output.stdout = Some(Box::new(ClosedPipe {
            attempts: attempts.clone(),
        }));

        output.emit("first");
        assert!(output.stdout.is_none());
        output.emit("second");
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("first\n"));
        assert!(content.contains("second\n"));
    }
}
