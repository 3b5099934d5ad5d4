//! Capture side: channel assignment, hopping loop and worker statistics

pub mod partition;
pub mod scheduler;
pub mod stats;

pub use partition::partition_channels;
pub use scheduler::{CaptureScheduler, FrameSink};
pub use stats::CaptureStats;
