//! Frame encoder and the sending side of the transport

pub mod sender;
pub mod transport;

pub use sender::Forwarder;
pub use transport::{Endpoint, Transport, TransportError};
