//! Configuration from the command line and environment

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{warn, Level};

use crate::forward::{Endpoint, TransportError};
use crate::position::DEFAULT_SENTENCE;
use crate::protocol::{Generation, DEFAULT_PORT, FIRST_CHANNEL, LAST_CHANNEL};

/// Raw read timeout handed to the dongle
const READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Fixes kept per NMEA sentence kind
const POSITION_HISTORY: usize = 3;
const DEFAULT_GPS_BAUD: u32 = 9600;

#[derive(Parser, Debug)]
#[command(name = "wpan-sniffer")]
#[command(about = "IEEE 802.15.4 multi-dongle sniffer with a network interpreter")]
pub struct Cli {
    /// Debug level: 0 warnings, 1 info, 2 debug, 3 trace
    #[arg(short = 'd', long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub debug: u8,

    /// Channels to sniff (11 to 26), comma separated
    #[arg(short = 'c', long = "chans", value_delimiter = ',', num_args = 1..)]
    pub chans: Vec<u16>,

    /// Dwell period on each channel when hopping, in seconds
    #[arg(short = 'p', long, default_value_t = 1.0, value_parser = parse_period)]
    pub period: f64,

    /// Show frames whose FCS check failed
    #[arg(short = 'n', long)]
    pub nofcschk: bool,

    /// NMEA position device
    #[arg(long, env = "SNIFFER_GPS", default_value = "/dev/ttyUSB0")]
    pub gps: PathBuf,

    /// Serial speed of the position device
    #[arg(long, env = "SNIFFER_GPS_BAUD", default_value_t = DEFAULT_GPS_BAUD)]
    pub gps_baud: u32,

    /// Interpreter address
    #[arg(long, env = "SNIFFER_IP", default_value = "localhost")]
    pub ip: String,

    /// Interpreter UDP port
    #[arg(long, env = "SNIFFER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Use a local datagram socket instead of UDP
    #[arg(long)]
    pub filesock: bool,

    /// Local datagram socket path
    #[arg(long, env = "SNIFFER_SOCKET", default_value = "/tmp/cc2531_server")]
    pub socket_path: PathBuf,

    /// Also append interpreted frames to a file
    #[arg(short = 'f', long)]
    pub file: bool,

    /// Output file path
    #[arg(long, env = "SNIFFER_OUTPUT", default_value = "/tmp/cc2531_sniffer")]
    pub output_path: PathBuf,

    /// Do not print interpreted frames on stdout
    #[arg(short = 's', long)]
    pub silent: bool,

    /// Wire protocol generation (a or b)
    #[arg(long, default_value = "a")]
    pub generation: Generation,

    /// Strip the device envelope before forwarding
    #[arg(long)]
    pub unwrapped: bool,

    /// Render frames as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Replay a raw capture file as a capture device (repeatable)
    #[arg(long = "replay")]
    pub replay: Vec<PathBuf>,

    /// Sleep after an empty read, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub backoff_ms: u64,

    /// Interpreter poll timeout, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub poll_ms: u64,

    /// Interpreter receive buffer, in bytes
    #[arg(long, default_value_t = 1024)]
    pub recv_buffer: usize,
}

fn parse_period(s: &str) -> Result<f64, String> {
    let period: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if period <= 0.0 || Duration::try_from_secs_f64(period).is_err() {
        return Err(format!("period must be a positive number of seconds, got {}", s));
    }
    Ok(period)
}

/// Settings for one capture worker
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Time spent on each channel when hopping
    pub dwell: Duration,
    /// Sleep after an empty read
    pub backoff: Duration,
    pub read_timeout: Duration,
}

/// Settings for the frame encoder and its transport
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    pub endpoint: Endpoint,
    pub generation: Generation,
    /// Send bare frames (tag 0x20) instead of device envelopes
    pub unwrapped: bool,
    /// NMEA sentence kind attached as position
    pub position_sentence: String,
}

#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    pub endpoint: Endpoint,
    pub generation: Generation,
    /// Render frames whose FCS check failed instead of suppressing them
    pub fcs_ignore: bool,
    pub poll_interval: Duration,
    pub recv_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct PositionConfig {
    pub device: PathBuf,
    pub baud: u32,
    pub history: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub stdout: bool,
    pub file: Option<PathBuf>,
    pub format: OutputFormat,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub channels: Vec<u8>,
    pub replay_files: Vec<PathBuf>,
    pub capture: CaptureConfig,
    pub forward: ForwardConfig,
    pub interpreter: InterpreterConfig,
    pub position: PositionConfig,
    pub output: OutputConfig,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, TransportError> {
        let endpoint = cli.endpoint()?;
        let dwell = Duration::from_secs_f64(cli.period);

        Ok(Self {
            channels: select_channels(&cli.chans),
            replay_files: cli.replay,
            capture: CaptureConfig {
                dwell,
                backoff: Duration::from_millis(cli.backoff_ms),
                read_timeout: READ_TIMEOUT,
            },
            forward: ForwardConfig {
                endpoint: endpoint.clone(),
                generation: cli.generation,
                unwrapped: cli.unwrapped,
                position_sentence: DEFAULT_SENTENCE.to_string(),
            },
            interpreter: InterpreterConfig {
                endpoint,
                generation: cli.generation,
                fcs_ignore: cli.nofcschk,
                poll_interval: Duration::from_millis(cli.poll_ms.max(1)),
                recv_buffer: cli.recv_buffer.max(1),
            },
            position: PositionConfig {
                device: cli.gps,
                baud: cli.gps_baud,
                history: POSITION_HISTORY,
            },
            output: OutputConfig {
                stdout: !cli.silent,
                file: cli.file.then_some(cli.output_path),
                format: if cli.json {
                    OutputFormat::Json
                } else {
                    OutputFormat::Text
                },
            },
        })
    }
}

impl Cli {
    pub fn log_level(&self) -> Level {
        match self.debug {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    fn endpoint(&self) -> Result<Endpoint, TransportError> {
        if self.filesock {
            return Ok(Endpoint::Local(self.socket_path.clone()));
        }
        if self.ip.contains('/') {
            return Ok(Endpoint::Local(PathBuf::from(&self.ip)));
        }
        if self.ip.contains(':') {
            return format!("[{}]:{}", self.ip, self.port).parse();
        }
        format!("{}:{}", self.ip, self.port).parse()
    }
}

/// Keep the requested channels inside 11..=26, all of them when none remain
fn select_channels(requested: &[u16]) -> Vec<u8> {
    let range = FIRST_CHANNEL as u16..=LAST_CHANNEL as u16;
    let mut channels = Vec::with_capacity(requested.len());

    for &chan in requested {
        if range.contains(&chan) {
            channels.push(chan as u8);
        } else {
            warn!("Ignoring channel {} (valid channels are {} to {})", chan, FIRST_CHANNEL, LAST_CHANNEL);
        }
    }

    if channels.is_empty() {
        channels = crate::protocol::standard_channels();
    }
    channels
}
