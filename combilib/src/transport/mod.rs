//! Transport abstraction for the adapter link.
//!
//! The protocol engine only ever needs two things from the underlying USB
//! or serial device: "write this byte buffer within a timeout" and a stream
//! of raw bytes pushed into [`FrameRouter::feed`] as they arrive. Keeping
//! the seam this narrow lets the whole engine run against an in-memory
//! transport in tests, with no device attached.
//!
//! [`FrameRouter::feed`]: crate::protocol::router::FrameRouter::feed

#[cfg(feature = "native")]
pub mod serial;

use crate::error::Result;
use std::time::Duration;

/// Outbound half of the adapter link.
///
/// The inbound half is push-based: whoever owns the device's receive side
/// delivers bytes to the engine's `feed` entry point.
pub trait Transport: Send {
    /// Write the whole buffer to the device, failing after `timeout`.
    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<()>;
}

#[cfg(feature = "native")]
pub use serial::{ReaderThread, SerialTransport};
