//! CombiAdapter packet framing.
//!
//! Every message on the USB link, in both directions, uses the same
//! length-prefixed frame:
//!
//! ```text
//! +---------+----------+---------------+------------+
//! | Command |  Length  |    Payload    | Terminator |
//! +---------+----------+---------------+------------+
//! | 1 byte  | 2 bytes  | Length bytes  |   1 byte   |
//! |         |  (BE)    |  (may be 0)   | ACK / NACK |
//! +---------+----------+---------------+------------+
//! ```
//!
//! The terminator is ACK (0x00) on success and NACK (0xFF) for a failure or
//! abort. The adapter delivers frames over bulk USB transfers with arbitrary
//! chunk boundaries, so [`FrameDecoder`] reassembles them incrementally: a
//! parsed header survives across deliveries in a single pending slot and is
//! never re-read. The protocol is strictly pipelined, so at most one frame
//! is ever pending.

use byteorder::{BigEndian, WriteBytesExt};
use std::collections::VecDeque;

/// Terminator byte for a successful command or response.
pub const TERM_ACK: u8 = 0x00;

/// Terminator byte for a failed command or an abort request.
pub const TERM_NACK: u8 = 0xFF;

/// Header length: command code plus big-endian payload length.
pub const HEADER_LEN: usize = 3;

/// Minimum length of a complete frame (empty payload).
pub const MIN_FRAME_LEN: usize = 4;

/// One decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command code.
    pub command: u8,
    /// Payload data block (0..=65535 bytes).
    pub payload: Vec<u8>,
    /// Trailing status byte, [`TERM_ACK`] or [`TERM_NACK`].
    pub terminator: u8,
}

impl Frame {
    /// Check whether the adapter acknowledged this frame.
    pub fn is_ack(&self) -> bool {
        self.terminator == TERM_ACK
    }
}

/// Encode a command frame with an ACK terminator.
pub fn encode(command: u8, payload: &[u8]) -> Vec<u8> {
    encode_with_terminator(command, payload, TERM_ACK)
}

/// Encode a frame with an explicit terminator byte.
///
/// A NACK-terminated, empty-payload frame interrupts an in-progress bulk
/// transfer on the adapter.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
#[allow(clippy::cast_possible_truncation)] // payload length is validated below
pub fn encode_with_terminator(command: u8, payload: &[u8], terminator: u8) -> Vec<u8> {
    debug_assert!(payload.len() <= usize::from(u16::MAX));

    let mut buf = Vec::with_capacity(MIN_FRAME_LEN + payload.len());
    buf.push(command);
    buf.write_u16::<BigEndian>(payload.len() as u16).unwrap();
    buf.extend_from_slice(payload);
    buf.push(terminator);
    buf
}

/// Incremental frame decoder over the inbound byte queue.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: VecDeque<u8>,
    pending: Option<PendingHeader>,
}

/// Header of a frame whose body has not fully arrived yet.
#[derive(Debug, Clone, Copy)]
struct PendingHeader {
    command: u8,
    length: u16,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the transport to the inbound queue.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes);
    }

    /// Number of bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to decode the next complete frame.
    ///
    /// Returns `None` when more bytes are needed; the pending header, if one
    /// was parsed, is kept so the next call resumes where this one stopped.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.pending.is_none() {
            if self.buf.len() < HEADER_LEN {
                return None;
            }

            let command = self.pop();
            let length = u16::from_be_bytes([self.pop(), self.pop()]);
            self.pending = Some(PendingHeader { command, length });
        }

        let header = self.pending?;
        let body_len = usize::from(header.length);
        if self.buf.len() < body_len + 1 {
            // payload + terminator not complete yet
            return None;
        }

        let payload: Vec<u8> = self.buf.drain(..body_len).collect();
        let terminator = self.pop();
        self.pending = None;

        Some(Frame {
            command: header.command,
            payload,
            terminator,
        })
    }

    fn pop(&mut self) -> u8 {
        // callers check the buffered length first
        self.buf.pop_front().unwrap_or_default()
    }
}
