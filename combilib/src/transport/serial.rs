//! Serial transport implementation using the `serialport` crate.
//!
//! The CombiAdapter enumerates as a USB CDC serial device on desktop
//! platforms, so the raw link is an ordinary serial port. Writes go through
//! [`SerialTransport`]; reception runs on a background thread that pumps
//! whatever the port delivers into the engine's [`FrameRouter`], mirroring
//! the push-style receive callback of the USB stack.

use crate::error::Result;
use crate::protocol::router::FrameRouter;
use crate::transport::Transport;
use log::{trace, warn};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Poll interval of the reader thread; bounds shutdown latency.
const READ_POLL: Duration = Duration::from_millis(100);

/// Read buffer size; comfortably above one full flash block frame.
const READ_BUF_LEN: usize = 512;

/// Outbound half of a serial link to the adapter.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open a serial port to the adapter.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(READ_POLL)
            .open()?;
        Ok(Self { port })
    }

    /// Wrap an already-opened serial port.
    pub fn from_port(port: Box<dyn serialport::SerialPort>) -> Self {
        Self { port }
    }

    /// Clone this transport's handle to the same port.
    ///
    /// Useful for keeping a receive handle before the transport moves into
    /// the adapter engine.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            port: self.port.try_clone()?,
        })
    }

    /// Launch the receive pump for this port, feeding `router`.
    ///
    /// Uses a cloned handle to the same port, so reads and writes proceed
    /// independently. The pump stops when the returned handle is dropped or
    /// the port goes away.
    pub fn spawn_reader(&self, router: Arc<FrameRouter>) -> Result<ReaderThread> {
        let port = self.port.try_clone()?;
        Ok(ReaderThread::spawn(port, router))
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<()> {
        self.port.set_timeout(timeout)?;
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }
}

/// Background thread pumping inbound bytes into the frame router.
pub struct ReaderThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderThread {
    fn spawn(mut port: Box<dyn serialport::SerialPort>, router: Arc<FrameRouter>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            let _ = port.set_timeout(READ_POLL);
            let mut buf = [0u8; READ_BUF_LEN];

            while !stop_flag.load(Ordering::Acquire) {
                match port.read(&mut buf) {
                    Ok(0) => {},
                    Ok(n) => {
                        trace!("serial rx {n} bytes");
                        router.feed(&buf[..n]);
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {},
                    Err(e) => {
                        warn!("serial read failed, stopping receive pump: {e}");
                        break;
                    },
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Ask the pump to stop and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReaderThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
