//! Command/response exchange.
//!
//! The adapter executes one command at a time and answers strictly in
//! order, so correlation needs no request IDs: a process-wide command lock
//! keeps at most one call in flight, and the oldest queued response always
//! belongs to it. [`Exchange::call`] sends a frame and validates the reply;
//! [`Exchange::receive_next`] applies the same validation to the follow-up
//! frames a single flash request streams back.
//!
//! Every validation failure is a distinct error so callers can tell a slow
//! adapter ([`Error::CommandTimeout`]) from a corrupted response queue
//! ([`Error::ProtocolDesync`]), an adapter-reported failure
//! ([`Error::CommandRejected`]) and a logic fault
//! ([`Error::UnexpectedReplyLength`]).

use crate::error::{Error, Result};
use crate::protocol::frame::{TERM_NACK, encode, encode_with_terminator};
use crate::protocol::router::FrameRouter;
use crate::transport::Transport;
use log::{debug, trace};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serialized command/response channel over a [`Transport`].
pub struct Exchange<T: Transport> {
    transport: Mutex<T>,
    /// Held for the full send-and-receive of one call.
    command_lock: Mutex<()>,
    router: Arc<FrameRouter>,
}

impl<T: Transport> Exchange<T> {
    /// Create an exchange over `transport`, receiving through `router`.
    pub fn new(transport: T, router: Arc<FrameRouter>) -> Self {
        Self {
            transport: Mutex::new(transport),
            command_lock: Mutex::new(()),
            router,
        }
    }

    /// The router this exchange receives from.
    ///
    /// The transport's receive side feeds raw bytes into it.
    pub fn router(&self) -> &Arc<FrameRouter> {
        &self.router
    }

    /// Send a command and wait for its validated reply payload.
    ///
    /// Holds the command lock across send and receive, so callers on other
    /// threads queue up rather than interleave.
    pub fn call(
        &self,
        command: u8,
        payload: &[u8],
        expected_reply_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let _in_flight = self.command_lock.lock().unwrap();

        self.send(command, payload, timeout)?;
        self.receive(command, expected_reply_len, timeout)
    }

    /// Wait for the next streamed response frame of an exchange already in
    /// progress, without sending anything.
    pub fn receive_next(
        &self,
        command: u8,
        expected_reply_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.receive(command, expected_reply_len, timeout)
    }

    /// Send a command that the adapter answers with nothing at all.
    ///
    /// Takes the command lock so the write cannot interleave with another
    /// caller's exchange, but queues no response wait.
    pub fn send_one_way(&self, command: u8, payload: &[u8], timeout: Duration) -> Result<()> {
        let _in_flight = self.command_lock.lock().unwrap();
        self.send(command, payload, timeout)
    }

    /// Interrupt an in-progress bulk exchange.
    ///
    /// Sends an empty NACK-terminated frame for `command`; no reply is
    /// awaited. Follow up with [`Exchange::drain_stale_responses`] once the
    /// in-flight bytes have settled.
    pub fn abort(&self, command: u8, timeout: Duration) -> Result<()> {
        debug!("aborting exchange {command:#04x}");
        let bytes = encode_with_terminator(command, &[], TERM_NACK);
        self.transport.lock().unwrap().write(&bytes, timeout)
    }

    /// Discard responses left over from an aborted exchange.
    pub fn drain_stale_responses(&self) {
        self.router.drain_responses();
    }

    fn send(&self, command: u8, payload: &[u8], timeout: Duration) -> Result<()> {
        let bytes = encode(command, payload);
        trace!("tx command {command:#04x}, {} bytes", bytes.len());
        self.transport.lock().unwrap().write(&bytes, timeout)
    }

    fn receive(&self, command: u8, expected_reply_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let Some(frame) = self.router.wait_response(timeout) else {
            return Err(Error::CommandTimeout { command });
        };

        if frame.command != command {
            // response queue messed up by packet loss or an earlier
            // mismatched exchange; fail hard, the frame is not requeued
            return Err(Error::ProtocolDesync {
                sent: command,
                received: frame.command,
            });
        }

        if !frame.is_ack() {
            // adapter signalled a parameter error or execution failure
            return Err(Error::CommandRejected { command });
        }

        if frame.payload.len() != expected_reply_len {
            return Err(Error::UnexpectedReplyLength {
                expected: expected_reply_len,
                actual: frame.payload.len(),
            });
        }

        Ok(frame.payload)
    }
}
