//! Channel-hopping capture loop (runs in a dedicated thread)

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stats::CaptureStats;
use crate::config::CaptureConfig;
use crate::dongle::{Dongle, DongleError};
use crate::protocol::{channel_frequency, split_capture};

/// Destination of captured device-framed sub-frames
pub trait FrameSink {
    /// Forward one sub-frame captured on `channel`, returning bytes sent
    fn forward(&mut self, channel: u8, frame: &[u8]) -> usize;

    /// Release the destination once capture has stopped
    fn close(&mut self) {}
}

/// Drives one dongle over its assigned channels
pub struct CaptureScheduler<S: FrameSink> {
    dongle: Box<dyn Dongle>,
    channels: Vec<u8>,
    config: CaptureConfig,
    sink: S,
    stats: Arc<CaptureStats>,
    label: String,
}

impl<S: FrameSink> CaptureScheduler<S> {
    pub fn new(dongle: Box<dyn Dongle>, channels: Vec<u8>, config: CaptureConfig, sink: S) -> Self {
        let label = dongle.label();
        Self {
            dongle,
            channels,
            config,
            sink,
            stats: Arc::new(CaptureStats::new()),
            label,
        }
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    /// Capture until the token is cancelled
    pub fn run(mut self, token: &CancellationToken) {
        info!("[{}] start listening on channel(s): {:?}", self.label, self.channels);

        match self.channels.len() {
            0 => warn!("[{}] no channel assigned, nothing to capture", self.label),
            1 => self.monitor(self.channels[0], token),
            _ => self.hop(token),
        }
        self.sink.close();

        info!("[{}] capture stopped. {}", self.label, self.stats);
    }

    /// Multi-channel hopping, `dwell` on each channel in list order
    fn hop(&mut self, token: &CancellationToken) {
        while !token.is_cancelled() {
            for i in 0..self.channels.len() {
                if token.is_cancelled() {
                    break;
                }
                let channel = self.channels[i];
                if let Err(e) = self.prepare(channel) {
                    warn!("[{}] cannot tune channel {}: {}", self.label, channel, e);
                    thread::sleep(self.config.backoff);
                    continue;
                }
                self.stats.record_hop();

                let started = Instant::now();
                while !token.is_cancelled() && started.elapsed() < self.config.dwell {
                    self.read_frames(channel);
                }
                self.halt();
            }
        }
    }

    /// Single channel: tune once and read until cancelled
    fn monitor(&mut self, channel: u8, token: &CancellationToken) {
        while let Err(e) = self.prepare(channel) {
            warn!("[{}] cannot tune channel {}: {}", self.label, channel, e);
            if token.is_cancelled() {
                return;
            }
            thread::sleep(self.config.backoff);
        }
        self.stats.record_hop();

        while !token.is_cancelled() {
            self.read_frames(channel);
        }
        self.halt();
    }

    fn prepare(&mut self, channel: u8) -> Result<(), DongleError> {
        match channel_frequency(channel) {
            Some(mhz) => debug!("[{}] sniffing on channel {} ({} MHz)", self.label, channel, mhz),
            None => warn!("[{}] sniffing on non-standard channel {}", self.label, channel),
        }
        self.dongle.init()?;
        self.dongle.tune(channel)?;
        self.dongle.start_capture()
    }

    fn halt(&mut self) {
        if let Err(e) = self.dongle.stop_capture() {
            warn!("[{}] stop capture failed: {}", self.label, e);
        }
    }

    fn read_frames(&mut self, channel: u8) {
        let data = self.dongle.read_raw(self.config.read_timeout);
        if data.is_empty() {
            self.stats.record_empty_read();
            thread::sleep(self.config.backoff);
            return;
        }

        let split = split_capture(&data);
        for frame in split.frames {
            let sent = self.sink.forward(channel, frame);
            self.stats.record_forwarded(sent);
        }
        self.stats.record_dropped(split.dropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::wrap_timestamped;
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Event {
        Init,
        Tune(u8),
        Start,
        Stop,
    }

    /// Dongle fed by a channel of scripted raw reads
    pub struct MockDongle {
        pub events: Arc<Mutex<Vec<(Event, Instant)>>>,
        reads: Receiver<Vec<u8>>,
    }

    impl MockDongle {
        pub fn new() -> (Self, Sender<Vec<u8>>) {
            let (tx, rx) = unbounded();
            let dongle = Self {
                events: Arc::new(Mutex::new(Vec::new())),
                reads: rx,
            };
            (dongle, tx)
        }

        fn record(&self, event: Event) {
            self.events.lock().unwrap().push((event, Instant::now()));
        }
    }

    impl Dongle for MockDongle {
        fn label(&self) -> String {
            "mock".to_string()
        }
        fn init(&mut self) -> Result<(), DongleError> {
            self.record(Event::Init);
            Ok(())
        }
        fn tune(&mut self, channel: u8) -> Result<(), DongleError> {
            self.record(Event::Tune(channel));
            Ok(())
        }
        fn start_capture(&mut self) -> Result<(), DongleError> {
            self.record(Event::Start);
            Ok(())
        }
        fn stop_capture(&mut self) -> Result<(), DongleError> {
            self.record(Event::Stop);
            Ok(())
        }
        fn read_raw(&mut self, timeout: Duration) -> Vec<u8> {
            self.reads.recv_timeout(timeout).unwrap_or_default()
        }
    }

    #[derive(Clone, Default)]
    pub struct CollectSink {
        pub frames: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
    }

    impl FrameSink for CollectSink {
        fn forward(&mut self, channel: u8, frame: &[u8]) -> usize {
            self.frames.lock().unwrap().push((channel, frame.to_vec()));
            frame.len()
        }
    }

    fn config(dwell_ms: u64) -> CaptureConfig {
        CaptureConfig {
            dwell: Duration::from_millis(dwell_ms),
            backoff: Duration::from_millis(2),
            read_timeout: Duration::from_millis(1),
        }
    }

    fn tunes(events: &[(Event, Instant)]) -> Vec<(u8, Instant)> {
        events
            .iter()
            .filter_map(|(e, at)| match e {
                Event::Tune(c) => Some((*c, *at)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_dwell_timing_and_order() {
        let dwell = Duration::from_millis(100);
        let (dongle, _tx) = MockDongle::new();
        let events = dongle.events.clone();
        let scheduler = CaptureScheduler::new(
            Box::new(dongle),
            vec![11, 12, 13],
            config(100),
            CollectSink::default(),
        );

        let token = CancellationToken::new();
        let worker_token = token.clone();
        let handle = thread::spawn(move || scheduler.run(&worker_token));
        thread::sleep(dwell * 7 / 2);
        token.cancel();
        handle.join().unwrap();

        let events = events.lock().unwrap();
        let tunes = tunes(&events);
        let order: Vec<u8> = tunes.iter().map(|(c, _)| *c).collect();
        assert!(order.len() >= 4, "visited {:?}", order);
        assert_eq!(&order[..4], &[11, 12, 13, 11]);

        for pair in tunes.windows(2).take(3) {
            let spent = pair[1].1 - pair[0].1;
            assert!(spent >= dwell, "dwell too short: {:?}", spent);
            assert!(spent < dwell * 2, "dwell too long: {:?}", spent);
        }
        assert_eq!(events.last().map(|(e, _)| *e), Some(Event::Stop));
    }

    #[test]
    fn test_single_channel_tunes_once_and_forwards_in_order() {
        let (dongle, tx) = MockDongle::new();
        let events = dongle.events.clone();
        let sink = CollectSink::default();
        let frames = sink.frames.clone();
        let scheduler = CaptureScheduler::new(Box::new(dongle), vec![20], config(10), sink);
        let stats = scheduler.stats();

        let first = wrap_timestamped(&[0x41, 0x88, 0x01], 1, -40, 100, true);
        let second = wrap_timestamped(&[0x41, 0x88, 0x02], 2, -41, 101, true);
        let mut read = first.clone();
        read.extend_from_slice(&second);
        read.extend_from_slice(&first[..9]);
        tx.send(read).unwrap();

        let token = CancellationToken::new();
        let worker_token = token.clone();
        let handle = thread::spawn(move || scheduler.run(&worker_token));
        thread::sleep(Duration::from_millis(80));
        token.cancel();
        handle.join().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(tunes(&events).len(), 1);
        assert_eq!(events.last().map(|(e, _)| *e), Some(Event::Stop));

        let frames = frames.lock().unwrap();
        assert_eq!(*frames, vec![(20, first.clone()), (20, second)]);
        assert_eq!(stats.get_forwarded(), 2);
        assert_eq!(stats.bytes_dropped.load(std::sync::atomic::Ordering::Relaxed), 9);
        assert!(stats.get_empty_reads() > 0);
    }

    #[test]
    fn test_cancelled_before_start_never_reads() {
        let (dongle, _tx) = MockDongle::new();
        let events = dongle.events.clone();
        let scheduler =
            CaptureScheduler::new(Box::new(dongle), vec![11, 12], config(50), CollectSink::default());
        let token = CancellationToken::new();
        token.cancel();
        scheduler.run(&token);
        assert!(events.lock().unwrap().is_empty());
    }
}
