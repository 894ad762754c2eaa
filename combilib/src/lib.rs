//! # combilib
//!
//! A library for driving CombiAdapter USB diagnostic interfaces.
//!
//! This crate provides the host side of the adapter's binary protocol,
//! including:
//!
//! - Length-prefixed frame encoding and incremental decoding
//! - Serialized command/response exchange with per-command timeouts
//! - CAN pass-through (open, bitrate, transmit, receive)
//! - ECU flash reading and writing with CRC-32 verification
//! - Telemetry queries (ADC channels, thermocouple, firmware version)
//!
//! ## Supported Adapters
//!
//! - CombiAdapter (full feature set)
//! - USBBDM2 (firmware version query only)
//!
//! ## Features
//!
//! - `native` (default): Serial port transport via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use combilib::{AdapterProfile, CombiAdapter, SerialTransport};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = SerialTransport::open("/dev/ttyACM0", 2_000_000)?;
//!     let rx = transport.try_clone()?;
//!     let adapter = CombiAdapter::new(transport, AdapterProfile::COMBI);
//!
//!     // Pump inbound bytes into the adapter's frame router.
//!     let _reader = rx.spawn_reader(adapter.router())?;
//!
//!     let version = adapter.firmware_version()?;
//!     println!("adapter firmware {version:#06x}");
//!
//!     adapter.connect_session(3)?; // Trionic 7
//!     adapter.start_read_flash("dump.bin")?;
//!     while adapter.is_running() {
//!         println!("read {} bytes", adapter.progress());
//!         std::thread::sleep(std::time::Duration::from_millis(500));
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod bus;
pub mod error;
pub mod operation;
pub mod protocol;
pub mod target;
pub mod transport;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use transport::{ReaderThread, SerialTransport};
pub use {
    adapter::{AdapterProfile, CombiAdapter, cmd},
    adapter::flash::{METHOD_STRIP_VIN, TRANSFER_BLOCK_SIZE},
    bus::CanFrame,
    error::{Error, Result},
    operation::Supervisor,
    protocol::{Crc32, Exchange, Frame, FrameDecoder, FrameRouter, TERM_ACK, TERM_NACK},
    target::{DESCRIPTORS, EcuDescriptor, descriptor},
    transport::Transport,
};
