//! Datagram receiver and decoding state machine
//!
//! ```text
//! Idle -> Listening -> Processing -> Listening ... -> Stopped
//! ```
//!
//! A datagram that has been read is always processed completely before the
//! stop signal is looked at again.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::{UdpSocket, UnixDatagram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::mac::MacParser;
use super::message::{assemble, DecodedMessage};
use super::render::Output;
use crate::config::InterpreterConfig;
use crate::forward::{Endpoint, TransportError};
use crate::protocol::{decode_group, split_groups, Generation, ProtocolError};

/// Result of interpreting one embedded group
#[derive(Debug, PartialEq)]
pub enum Decoded {
    /// Complete message to render
    Rendered(DecodedMessage),
    /// Complete message withheld because its FCS check failed
    Suppressed(DecodedMessage),
    /// Framing or TLV error, the group (or datagram tail) was discarded
    Corrupted(ProtocolError),
    /// Decoded fine but channel, timestamp or frame is missing
    Incomplete,
}

/// Interpreter counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterStats {
    pub datagrams: u64,
    pub rendered: u64,
    pub suppressed: u64,
    pub corrupted: u64,
    pub incomplete: u64,
}

impl fmt::Display for InterpreterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Datagrams: {}, Rendered: {}, Suppressed: {}, Corrupted: {}, Incomplete: {}",
            self.datagrams, self.rendered, self.suppressed, self.corrupted, self.incomplete
        )
    }
}

/// Datagram decoding, independent of any socket
pub struct Interpreter {
    generation: Generation,
    fcs_ignore: bool,
    stats: InterpreterStats,
}

impl Interpreter {
    pub fn new(generation: Generation, fcs_ignore: bool) -> Self {
        Self {
            generation,
            fcs_ignore,
            stats: InterpreterStats::default(),
        }
    }

    pub fn stats(&self) -> InterpreterStats {
        self.stats
    }

    /// Decode every group of a datagram, in serialized order
    pub fn process_datagram(&mut self, datagram: &[u8]) -> Vec<Decoded> {
        self.stats.datagrams += 1;

        let outcomes: Vec<Decoded> = split_groups(datagram, self.generation)
            .map(|group| match group {
                Ok(group) => self.interpret_group(group),
                Err(e) => Decoded::Corrupted(e),
            })
            .collect();

        for outcome in &outcomes {
            match outcome {
                Decoded::Rendered(_) => self.stats.rendered += 1,
                Decoded::Suppressed(_) => self.stats.suppressed += 1,
                Decoded::Corrupted(_) => self.stats.corrupted += 1,
                Decoded::Incomplete => self.stats.incomplete += 1,
            }
        }
        outcomes
    }

    fn interpret_group(&self, group: &[u8]) -> Decoded {
        let fields = match decode_group(group, self.generation) {
            Ok(fields) => fields,
            Err(e) => return Decoded::Corrupted(e),
        };

        match assemble(fields, self.generation) {
            Some(msg) if msg.fcs_ok == Some(false) && !self.fcs_ignore => Decoded::Suppressed(msg),
            Some(msg) => Decoded::Rendered(msg),
            None => Decoded::Incomplete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Listening,
    Processing,
    Stopped,
}

/// Bound listening endpoint
enum Listener {
    Udp(UdpSocket),
    Local { socket: UnixDatagram, path: PathBuf },
}

impl Listener {
    async fn bind(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let bind_error = |source| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };

        match endpoint {
            Endpoint::Udp { host, port } => {
                let addr = Endpoint::socket_addr(host, *port)?;
                let socket = UdpSocket::bind(addr).await.map_err(bind_error)?;
                Ok(Self::Udp(socket))
            }
            Endpoint::Local(path) => {
                match std::fs::remove_file(path) {
                    Ok(()) => debug!("Removed stale socket {}", path.display()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(bind_error(e)),
                }
                let socket = UnixDatagram::bind(path).map_err(bind_error)?;
                Ok(Self::Local {
                    socket,
                    path: path.clone(),
                })
            }
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Udp(socket) => socket.recv(buf).await,
            Self::Local { socket, .. } => socket.recv(buf).await,
        }
    }

    fn close(self) {
        if let Self::Local { socket, path } = self {
            drop(socket);
            if let Err(e) = std::fs::remove_file(&path) {
                debug!("Cannot remove socket {}: {}", path.display(), e);
            }
        }
    }
}

/// Interpreter worker: receives datagrams, renders decoded frames
pub struct Receiver {
    listener: Listener,
    endpoint: Endpoint,
    interpreter: Interpreter,
    mac: Box<dyn MacParser>,
    output: Output,
    poll_interval: Duration,
    recv_buffer: usize,
    state: ReceiverState,
}

impl Receiver {
    /// Bind the configured endpoint; failure here is fatal for the interpreter
    pub async fn bind(
        config: &InterpreterConfig,
        mac: Box<dyn MacParser>,
        output: Output,
    ) -> Result<Self, TransportError> {
        let listener = Listener::bind(&config.endpoint).await?;
        info!("Interpreter listening on {}", config.endpoint);

        Ok(Self {
            listener,
            endpoint: config.endpoint.clone(),
            interpreter: Interpreter::new(config.generation, config.fcs_ignore),
            mac,
            output,
            poll_interval: config.poll_interval,
            recv_buffer: config.recv_buffer,
            state: ReceiverState::Idle,
        })
    }

    fn set_state(&mut self, state: ReceiverState) {
        if self.state != state {
            trace!("interpreter {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Receive until cancelled, then release the endpoint
    pub async fn run(mut self, token: CancellationToken) -> InterpreterStats {
        let mut buf = vec![0u8; self.recv_buffer];
        self.set_state(ReceiverState::Listening);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = tokio::time::timeout(self.poll_interval, self.listener.recv(&mut buf)) => {
                    match received {
                        Err(_) => continue,
                        Ok(Ok(n)) => {
                            self.set_state(ReceiverState::Processing);
                            self.handle(&buf[..n]);
                            self.set_state(ReceiverState::Listening);
                        }
                        Ok(Err(e)) => warn!("Interpreter receive failed: {}", e),
                    }
                }
            }
        }

        self.set_state(ReceiverState::Stopped);
        let stats = self.interpreter.stats();
        info!("Interpreter stopped on {}. {}", self.endpoint, stats);
        self.listener.close();
        stats
    }

    fn handle(&mut self, datagram: &[u8]) {
        trace!("datagram: {}", hex::encode(datagram));

        for outcome in self.interpreter.process_datagram(datagram) {
            match outcome {
                Decoded::Rendered(msg) => {
                    let mac = self.mac.parse(&msg.frame);
                    let block = self.output.render(&msg, &mac);
                    self.output.emit(&block);
                }
                Decoded::Suppressed(msg) => {
                    debug!("FCS error on channel {}, frame suppressed", msg.channel)
                }
                Decoded::Corrupted(e) => info!("Corrupted message: {}", e),
                Decoded::Incomplete => debug!("Incomplete message ignored"),
            }
        }
    }
}
