//! Interpreter: receives wire records, decodes and renders them

pub mod mac;
pub mod message;
pub mod render;
pub mod receiver;

pub use mac::{Ieee802154, MacDecodeError, MacParser};
pub use message::DecodedMessage;
pub use render::Output;
pub use receiver::{Decoded, Interpreter, InterpreterStats, Receiver, ReceiverState};
