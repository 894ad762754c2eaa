//! Error types for combilib.

use std::io;
use thiserror::Error;

/// Result type for combilib operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for combilib operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, raw transport).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No response arrived within the command timeout.
    #[error("Command {command:#04x} timed out")]
    CommandTimeout {
        /// Command code that was sent.
        command: u8,
    },

    /// Adapter answered with a NACK terminator.
    #[error("Command {command:#04x} rejected by adapter")]
    CommandRejected {
        /// Command code that was sent.
        command: u8,
    },

    /// Response command code does not match the command sent.
    ///
    /// Indicates response-queue corruption from packet loss or a prior
    /// mismatched exchange; all subsequent exchanges are suspect.
    #[error("Protocol desync: sent {sent:#04x}, received {received:#04x}")]
    ProtocolDesync {
        /// Command code that was sent.
        sent: u8,
        /// Command code found in the response.
        received: u8,
    },

    /// Response payload length differs from what the command expects.
    #[error("Unexpected reply length: expected {expected}, got {actual}")]
    UnexpectedReplyLength {
        /// Expected payload length.
        expected: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// Local and adapter-side CRC-32 disagree after a flash transfer.
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// CRC computed locally over the transferred data.
        expected: u32,
        /// CRC reported by the adapter.
        actual: u32,
    },

    /// Flash image does not carry the signature required by the target ECU.
    #[error("Invalid image signature for target ECU")]
    InvalidImageSignature,

    /// Flash image length differs from the target's flash size.
    #[error("Image size mismatch: expected {expected} bytes, got {actual}")]
    ImageSizeMismatch {
        /// Flash size of the selected ECU.
        expected: usize,
        /// Length of the supplied image.
        actual: usize,
    },

    /// Another long-running operation is already in progress.
    #[error("Operation already in progress")]
    AlreadyRunning,

    /// A flash operation was requested without a connected ECU session.
    #[error("Not connected to an ECU")]
    NoActiveSession,

    /// Telemetry channel number out of range.
    #[error("Unknown A/D channel {0}")]
    InvalidChannel(u32),

    /// ECU index outside the descriptor catalog.
    #[error("Unknown ECU index {0}")]
    UnknownEcu(usize),

    /// Command not available on this adapter variant.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}
