//! Transport bridge: inbound byte routing.
//!
//! The transport's receive side runs in a context the engine does not
//! control (a USB callback, a reader thread, a test harness). All of it
//! funnels through [`FrameRouter::feed`], which appends the bytes to the
//! inbound queue, runs the frame decoder, and dispatches every completed
//! frame:
//!
//! - bus-frame notifications (the reserved command code with a 15-byte
//!   payload) are decoded into [`CanFrame`] records and queued for
//!   [`FrameRouter::wait_bus_frame`];
//! - everything else is a command response, queued for the exchanger.
//!
//! Each queue has its own short-held lock and condvar; the decode state has
//! a third. None of them is held across a wait, and none is shared with the
//! command-send path.

use crate::bus::CanFrame;
use crate::protocol::frame::{Frame, FrameDecoder};
use log::{trace, warn};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Decoded-frame dispatcher fed by the transport's receive side.
#[derive(Debug)]
pub struct FrameRouter {
    /// Inbound byte queue plus partial-frame state.
    decoder: Mutex<FrameDecoder>,
    /// Command responses, FIFO against the single in-flight command.
    responses: Mutex<VecDeque<Frame>>,
    responses_ready: Condvar,
    /// Unsolicited CAN frames.
    bus_frames: Mutex<VecDeque<CanFrame>>,
    bus_ready: Condvar,
    /// Command code of bus-frame notifications, if the adapter variant
    /// tunnels CAN at all.
    bus_notify: Option<u8>,
}

impl FrameRouter {
    /// Create a router.
    ///
    /// `bus_notify` is the command code the adapter uses for unsolicited
    /// CAN-frame packets; `None` routes every frame to the response queue.
    pub fn new(bus_notify: Option<u8>) -> Self {
        Self {
            decoder: Mutex::new(FrameDecoder::new()),
            responses: Mutex::new(VecDeque::new()),
            responses_ready: Condvar::new(),
            bus_frames: Mutex::new(VecDeque::new()),
            bus_ready: Condvar::new(),
            bus_notify,
        }
    }

    /// Entry point for raw bytes arriving from the transport.
    ///
    /// May be called from any thread at any time, concurrently with command
    /// senders and flash workers.
    pub fn feed(&self, bytes: &[u8]) {
        trace!("rx {} bytes", bytes.len());

        let mut decoder = self.decoder.lock().unwrap();
        decoder.feed(bytes);
        while let Some(frame) = decoder.next_frame() {
            self.dispatch(frame);
        }
    }

    fn dispatch(&self, frame: Frame) {
        if Some(frame.command) == self.bus_notify {
            match CanFrame::from_payload(&frame.payload) {
                Some(can_frame) => {
                    let mut queue = self.bus_frames.lock().unwrap();
                    queue.push_back(can_frame);
                    self.bus_ready.notify_all();
                    return;
                },
                None => {
                    // malformed notification; fall through so it at least
                    // surfaces as a desync instead of vanishing
                    warn!(
                        "bus notification with bad payload length {}",
                        frame.payload.len()
                    );
                },
            }
        }

        trace!(
            "response frame {:#04x}, {} bytes",
            frame.command,
            frame.payload.len()
        );
        let mut queue = self.responses.lock().unwrap();
        queue.push_back(frame);
        self.responses_ready.notify_all();
    }

    /// Wait up to `timeout` for the next command response.
    pub fn wait_response(&self, timeout: Duration) -> Option<Frame> {
        let queue = self.responses.lock().unwrap();
        let (mut queue, _) = self
            .responses_ready
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap();
        queue.pop_front()
    }

    /// Discard all queued responses.
    ///
    /// Used after an abort to throw away whatever the adapter still emits
    /// for the interrupted exchange.
    pub fn drain_responses(&self) {
        let mut queue = self.responses.lock().unwrap();
        if !queue.is_empty() {
            trace!("dropping {} stale responses", queue.len());
            queue.clear();
        }
    }

    /// Receive the oldest queued CAN frame.
    ///
    /// With a non-zero `timeout` this waits for a frame to arrive; in either
    /// case the queue is then polled without blocking, so an already-queued
    /// frame is returned immediately.
    pub fn wait_bus_frame(&self, timeout: Duration) -> Option<CanFrame> {
        let mut queue = self.bus_frames.lock().unwrap();
        if !timeout.is_zero() && queue.is_empty() {
            let (guard, _) = self
                .bus_ready
                .wait_timeout_while(queue, timeout, |q| q.is_empty())
                .unwrap();
            queue = guard;
        }
        queue.pop_front()
    }
}
