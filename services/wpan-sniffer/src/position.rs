//! NMEA position source
//!
//! A background task reads sentences from a serial GPS device and keeps the
//! most recent ones per sentence kind. Capture workers look up the latest
//! fix when they encode a frame.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_serial::SerialPortBuilderExt;
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::PositionConfig;

/// Sentence kind attached to outgoing frames
pub const DEFAULT_SENTENCE: &str = "GPRMC";

/// NMEA 0183 sentence kinds that are cached
pub const NMEA_KINDS: &[&str] = &[
    "GPBOD", "GPBWC", "GPGGA", "GPGLL", "GPGSA", "GPGSV", "GPHDT", "GPR00", "GPRMA", "GPRMB",
    "GPRMC", "GPRTE", "GPTRF", "GPSTN", "GPVBW", "GPVTG", "GPWPL", "GPXTE", "GPZDA",
];

/// Most recent fix lookup, shared with capture workers
pub trait PositionSource: Send + Sync {
    fn latest_fix(&self, sentence: &str) -> Option<Vec<u8>>;
}

/// Last few sentence bodies per NMEA kind
#[derive(Clone)]
pub struct FixCache {
    fixes: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
    history: usize,
}

impl FixCache {
    pub fn new(history: usize) -> Self {
        Self {
            fixes: Arc::new(Mutex::new(HashMap::new())),
            history: history.max(1),
        }
    }

    /// Store one NMEA line, returns false when it is not a known sentence
    pub fn ingest(&self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some((kind, body)) = line.strip_prefix('$').and_then(|s| s.split_once(',')) else {
            return false;
        };
        if !NMEA_KINDS.contains(&kind) {
            return false;
        }

        let mut fixes = self.lock();
        let entries = fixes.entry(kind.to_string()).or_default();
        if entries.len() == self.history {
            entries.pop_front();
        }
        entries.push_back(body.to_string());
        true
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<String>>> {
        self.fixes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PositionSource for FixCache {
    fn latest_fix(&self, sentence: &str) -> Option<Vec<u8>> {
        self.lock()
            .get(sentence)
            .and_then(|entries| entries.back())
            .map(|body| body.as_bytes().to_vec())
    }
}

/// Reads NMEA lines from the position device into a [`FixCache`]
pub struct NmeaReader {
    device: PathBuf,
    baud: u32,
    cache: FixCache,
}

impl NmeaReader {
    pub fn new(config: &PositionConfig) -> Self {
        Self {
            device: config.device.clone(),
            baud: config.baud,
            cache: FixCache::new(config.history),
        }
    }

    pub fn cache(&self) -> FixCache {
        self.cache.clone()
    }

    /// Open the serial device and read until cancelled or it goes away
    pub async fn run(self, token: CancellationToken) {
        let path = self.device.to_string_lossy().into_owned();
        let port = match tokio_serial::new(path, self.baud).open_native_async() {
            Ok(port) => port,
            Err(e) => {
                warn!(
                    "Position device {} unavailable, frames go out without position: {}",
                    self.device.display(),
                    e
                );
                return;
            }
        };
        info!(
            "Reading positions from {} at {} baud",
            self.device.display(),
            self.baud
        );

        self.read_sentences(port, token).await;
    }

    async fn read_sentences<R>(self, device: R, token: CancellationToken)
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = SplitStream::new(BufReader::new(device).split(b'\n'));
        let mut sentences = 0u64;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                line = lines.next() => match line {
                    Some(Ok(raw)) => {
                        let line = String::from_utf8_lossy(&raw);
                        if self.cache.ingest(&line) {
                            sentences += 1;
                            trace!("NMEA {}", line.trim_end());
                        } else {
                            debug!("Ignoring NMEA line: {}", line.trim_end());
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Position device read failed: {}", e);
                        break;
                    }
                    None => {
                        info!("Position device closed");
                        break;
                    }
                },
            }
        }

        info!("Position reader stopped. Sentences: {}", sentences);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";

    #[test]
    fn test_ingest_and_latest_fix() {
        let cache = FixCache::new(3);
        assert!(cache.ingest(RMC));
        assert_eq!(
            cache.latest_fix("GPRMC"),
            Some(b"123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A".to_vec())
        );
        assert_eq!(cache.latest_fix("GPGGA"), None);
    }

    #[test]
    fn test_unknown_and_malformed_lines_are_ignored() {
        let cache = FixCache::new(3);
        assert!(!cache.ingest("$GPXYZ,1,2,3"));
        assert!(!cache.ingest("GPRMC,1,2,3"));
        assert!(!cache.ingest("$GPRMC"));
        assert!(!cache.ingest(""));
        assert_eq!(cache.latest_fix("GPRMC"), None);
    }

    #[test]
    fn test_history_is_bounded() {
        let cache = FixCache::new(3);
        for i in 0..5 {
            cache.ingest(&format!("$GPGGA,{}", i));
        }
        let fixes = cache.lock();
        let entries = fixes.get("GPGGA").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.front().map(String::as_str), Some("2"));
        assert_eq!(entries.back().map(String::as_str), Some("4"));
    }

    fn position_config(device: PathBuf) -> PositionConfig {
        PositionConfig {
            device,
            baud: 9600,
            history: 3,
        }
    }

    #[tokio::test]
    async fn test_reader_fills_cache_from_device() {
        let mut device = tempfile::NamedTempFile::new().unwrap();
        write!(device, "$GPGGA,1\r\n{}garbage\n", RMC).unwrap();
        device.flush().unwrap();

        let reader = NmeaReader::new(&position_config(device.path().to_path_buf()));
        let cache = reader.cache();
        let token = CancellationToken::new();
        let file = tokio::fs::File::open(device.path()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), reader.read_sentences(file, token))
            .await
            .unwrap();
        assert!(cache.latest_fix("GPRMC").is_some());
        assert_eq!(cache.latest_fix("GPGGA"), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_missing_device_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let reader = NmeaReader::new(&position_config(dir.path().join("ttyNONE")));
        let cache = reader.cache();
        reader.run(CancellationToken::new()).await;
        assert_eq!(cache.latest_fix("GPRMC"), None);
    }

    #[tokio::test]
    async fn test_non_serial_device_is_rejected() {
        let device = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(device.path(), RMC).unwrap();

        let reader = NmeaReader::new(&position_config(device.path().to_path_buf()));
        let cache = reader.cache();
        tokio::time::timeout(Duration::from_secs(2), reader.run(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(cache.latest_fix("GPRMC"), None);
    }

    #[tokio::test]
    async fn test_reader_stops_on_cancel_while_device_is_silent() {
        let (_writer, device) = tokio::io::duplex(64);
        let reader = NmeaReader::new(&position_config(PathBuf::from("/dev/null")));
        let token = CancellationToken::new();
        token.cancel();

        tokio::time::timeout(Duration::from_secs(2), reader.read_sentences(device, token))
            .await
            .unwrap();
    }
}
