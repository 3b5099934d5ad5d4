//! Per-worker capture statistics

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for a single capture worker
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub frames_forwarded: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub empty_reads: AtomicU64,
    pub bytes_dropped: AtomicU64,
    pub hops: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_forwarded(&self, sent: usize) {
        self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
        if sent == 0 {
            self.send_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
        }
    }

    pub fn record_empty_read(&self) {
        self.empty_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, bytes: usize) {
        if bytes > 0 {
            self.bytes_dropped.fetch_add(bytes as u64, Ordering::Relaxed);
        }
    }

    pub fn record_hop(&self) {
        self.hops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_forwarded(&self) -> u64 {
        self.frames_forwarded.load(Ordering::Relaxed)
    }

    pub fn get_send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    pub fn get_empty_reads(&self) -> u64 {
        self.empty_reads.load(Ordering::Relaxed)
    }

    pub fn get_hops(&self) -> u64 {
        self.hops.load(Ordering::Relaxed)
    }
}

impl fmt::Display for CaptureStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frames: {} | Bytes sent: {} | Send failures: {} | Empty reads: {} | Dropped bytes: {} | Hops: {}",
            self.get_forwarded(),
            self.bytes_sent.load(Ordering::Relaxed),
            self.get_send_failures(),
            self.get_empty_reads(),
            self.bytes_dropped.load(Ordering::Relaxed),
            self.get_hops(),
        )
    }
}
