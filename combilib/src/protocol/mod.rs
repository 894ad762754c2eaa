//! Protocol engine: framing, checksums, routing and command exchange.

pub mod crc;
pub mod exchange;
pub mod frame;
pub mod router;

// Re-export common types
pub use crc::Crc32;
pub use exchange::Exchange;
pub use frame::{Frame, FrameDecoder, TERM_ACK, TERM_NACK};
pub use router::FrameRouter;
