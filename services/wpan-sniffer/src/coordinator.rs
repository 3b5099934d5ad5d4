//! Lifecycle coordinator
//!
//! Starts the interpreter, the position reader and one capture worker per
//! device, all sharing one cancellation token. Waits for the shutdown
//! signal, cancels the token and joins every worker.

use std::future::Future;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::capture::{partition_channels, CaptureScheduler, CaptureStats};
use crate::config::Config;
use crate::dongle;
use crate::forward::Forwarder;
use crate::interpreter::{Ieee802154, Output, Receiver};
use crate::position::{NmeaReader, PositionSource};

/// A running capture thread
struct CaptureWorker {
    label: String,
    stats: Arc<CaptureStats>,
    handle: JoinHandle<()>,
}

pub struct Coordinator {
    config: Config,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run every worker until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let config = self.config;

        let dongles = dongle::discover(&config.replay_files);
        if dongles.is_empty() {
            bail!("no capture device found (plug a CC2531 or pass --replay <file>)");
        }
        info!("{} capture device(s) found", dongles.len());

        let token = CancellationToken::new();

        // The interpreter binds first so local senders find its socket
        let output = Output::open(&config.output);
        let receiver = Receiver::bind(&config.interpreter, Box::new(Ieee802154), output)
            .await
            .context("Failed to start interpreter")?;
        let interpreter_handle = tokio::spawn(receiver.run(token.clone()));

        let reader = NmeaReader::new(&config.position);
        let position: Arc<dyn PositionSource> = Arc::new(reader.cache());
        let position_handle = tokio::spawn(reader.run(token.clone()));

        let assignments = partition_channels(&config.channels, dongles.len());
        let mut workers = Vec::with_capacity(dongles.len());

        for (index, (dongle, channels)) in dongles.into_iter().zip(assignments).enumerate() {
            let label = dongle.label();
            if channels.is_empty() {
                info!("[{}] no channel left to assign, device stays idle", label);
                continue;
            }

            let forwarder = match Forwarder::connect(config.forward.clone(), Some(position.clone())) {
                Ok(f) => f,
                Err(e) => {
                    error!("[{}] cannot reach the interpreter, worker not started: {}", label, e);
                    continue;
                }
            };

            let scheduler = CaptureScheduler::new(dongle, channels, config.capture.clone(), forwarder);
            let stats = scheduler.stats();
            let worker_token = token.clone();
            let handle = thread::Builder::new()
                .name(format!("capture-{}", index))
                .spawn(move || scheduler.run(&worker_token))
                .with_context(|| format!("Failed to spawn capture thread for {}", label))?;

            workers.push(CaptureWorker {
                label,
                stats,
                handle,
            });
        }

        if workers.is_empty() {
            warn!("No capture worker running, only the interpreter is active");
        }
        info!("Capturing. Press Ctrl+C to stop.");

        shutdown.await;
        info!("Shutdown requested, stopping workers...");
        token.cancel();

        let mut frames = 0;
        for worker in workers {
            let CaptureWorker {
                label,
                stats,
                handle,
            } = worker;
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => error!("[{}] capture thread panicked", label),
                Err(e) => error!("[{}] cannot join capture thread: {}", label, e),
            }
            frames += stats.get_forwarded();
        }

        match interpreter_handle.await {
            Ok(stats) => info!("Interpreter summary. {}", stats),
            Err(e) => error!("Interpreter task failed: {}", e),
        }
        if let Err(e) = position_handle.await {
            error!("Position reader task failed: {}", e);
        }

        info!("Shutdown complete. Frames forwarded: {}", frames);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cli;
    use crate::protocol::envelope::wrap_timestamped;
    use clap::Parser;
    use std::path::Path;
    use std::time::Duration;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["wpan-sniffer"];
        argv.extend_from_slice(args);
        Config::from_cli(Cli::try_parse_from(argv).unwrap()).unwrap()
    }

    fn write_capture(path: &Path, count: u8) {
        let mut data = Vec::new();
        for seq in 0..count {
            // Ack frame: frame control 0x0002, sequence number
            data.extend(wrap_timestamped(&[0x02, 0x00, seq], seq as u32, -45, 99, true));
        }
        std::fs::write(path, data).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replay_through_local_socket() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("capture.raw");
        let sock = dir.path().join("interp.sock");
        let out = dir.path().join("out.txt");
        let gps = dir.path().join("ttyNONE");
        write_capture(&capture, 3);

        let config = config(&[
            "--filesock",
            "--socket-path",
            sock.to_str().unwrap(),
            "-f",
            "--output-path",
            out.to_str().unwrap(),
            "-s",
            "-c",
            "15",
            "--gps",
            gps.to_str().unwrap(),
            "--replay",
            capture.to_str().unwrap(),
            "--backoff-ms",
            "2",
            "--poll-ms",
            "20",
        ]);

        Coordinator::new(config)
            .run(tokio::time::sleep(Duration::from_millis(300)))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&out).unwrap();
        assert_eq!(content.matches("[+] frame received (FCS OK)").count(), 3);
        assert!(content.contains("channel: 15, 2420 MHz"));
        assert!(content.contains("IEEE 802.15.4 frame: 020002"));
        assert!(!sock.exists());
    }

    #[tokio::test]
    async fn test_no_device_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.raw");
        let config = config(&["--replay", missing.to_str().unwrap()]);

        let result = Coordinator::new(config).run(async {}).await;
        assert!(result.is_err());
    }
}
