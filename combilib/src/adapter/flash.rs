//! Flash transfer procedures.
//!
//! Both directions stream the ECU's entire flash in fixed 256-byte blocks
//! through the command/response exchange, fold every block into a local
//! CRC-32, and finish by comparing against the checksum the adapter
//! computed on its side of the link.
//!
//! These functions run on the supervisor's worker thread. They return their
//! first error instead of propagating it anywhere else; the caller polls
//! the supervisor for the outcome. Before returning an error the worker
//! attempts protocol recovery: abort the bulk exchange, give in-flight
//! bytes a moment to settle, then drop whatever responses the adapter still
//! emitted for it.

use crate::adapter::cmd;
use crate::error::{Error, Result};
use crate::operation::Supervisor;
use crate::protocol::crc::Crc32;
use crate::protocol::exchange::Exchange;
use crate::target::EcuDescriptor;
use crate::transport::Transport;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Bytes moved per protocol exchange.
pub const TRANSFER_BLOCK_SIZE: usize = 256;

/// Timeout for steady-state block exchanges.
const BLOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Timeout for the write-begin command (the adapter prepares the target).
const WRITE_BEGIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the first written block; it triggers the chip erase.
const FIRST_BLOCK_TIMEOUT: Duration = Duration::from_secs(20);

/// Pause after an abort before draining, letting in-flight bytes land.
const ABORT_SETTLE: Duration = Duration::from_millis(100);

/// Flashing method that also blanks the image's VIN/immobilizer field.
pub const METHOD_STRIP_VIN: u8 = 1;

/// Read the connected ECU's flash into the file at `path`.
pub(crate) fn read_flash<T: Transport>(
    exchange: &Exchange<T>,
    supervisor: &Supervisor,
    desc: &EcuDescriptor,
    path: &Path,
) -> Result<()> {
    let result = run_read(exchange, supervisor, desc, path);
    if let Err(ref e) = result {
        warn!("flash read failed: {e}");
        recover(exchange, cmd::READ_FLASH);
    }
    result
}

#[allow(clippy::cast_possible_truncation)] // block size fits u32
fn run_read<T: Transport>(
    exchange: &Exchange<T>,
    supervisor: &Supervisor,
    desc: &EcuDescriptor,
    path: &Path,
) -> Result<()> {
    let mut dest = File::create(path)?;
    let total = desc.flash_size;
    let mut crc = Crc32::new();
    let mut bytes_read: u32 = 0;

    while bytes_read < total {
        // the adapter streams follow-up blocks unsolicited after the
        // initial request
        let block = if bytes_read == 0 {
            exchange.call(cmd::READ_FLASH, &[], TRANSFER_BLOCK_SIZE, BLOCK_TIMEOUT)?
        } else {
            exchange.receive_next(cmd::READ_FLASH, TRANSFER_BLOCK_SIZE, BLOCK_TIMEOUT)?
        };

        dest.write_all(&block)?;
        crc.update_block(&block);
        bytes_read += TRANSFER_BLOCK_SIZE as u32;
        supervisor.report_progress(bytes_read);
    }

    verify_remote_checksum(exchange, cmd::READ_FLASH, &crc)?;
    dest.flush()?;

    info!("flash read complete, {bytes_read} bytes");
    Ok(())
}

/// Write the flash image at `path` to the connected ECU.
pub(crate) fn write_flash<T: Transport>(
    exchange: &Exchange<T>,
    supervisor: &Supervisor,
    desc: &EcuDescriptor,
    path: &Path,
    method: u8,
) -> Result<()> {
    let result = run_write(exchange, supervisor, desc, path, method);
    if let Err(ref e) = result {
        warn!("flash write failed: {e}");
        recover(exchange, cmd::WRITE_FLASH);
    }
    result
}

#[allow(clippy::cast_possible_truncation)] // image length equals flash_size: u32
fn run_write<T: Transport>(
    exchange: &Exchange<T>,
    supervisor: &Supervisor,
    desc: &EcuDescriptor,
    path: &Path,
    method: u8,
) -> Result<()> {
    let mut image = fs::read(path)?;
    desc.prepare_image(&mut image, method == METHOD_STRIP_VIN)?;

    let mut crc = Crc32::new();
    debug!("starting write, method {method}");
    exchange.call(cmd::WRITE_FLASH, &[method], 0, WRITE_BEGIN_TIMEOUT)?;

    let mut bytes_written: u32 = 0;
    for block in image.chunks(TRANSFER_BLOCK_SIZE) {
        let timeout = if bytes_written == 0 {
            FIRST_BLOCK_TIMEOUT
        } else {
            BLOCK_TIMEOUT
        };
        exchange.call(cmd::WRITE_FLASH, block, 0, timeout)?;

        crc.update_block(block);
        bytes_written += block.len() as u32;
        supervisor.report_progress(bytes_written);
    }

    verify_remote_checksum(exchange, cmd::WRITE_FLASH, &crc)?;

    info!("flash write complete, {bytes_written} bytes");
    Ok(())
}

/// Receive the adapter's final 4-byte checksum and compare.
fn verify_remote_checksum<T: Transport>(
    exchange: &Exchange<T>,
    command: u8,
    crc: &Crc32,
) -> Result<()> {
    let reply = exchange.receive_next(command, 4, BLOCK_TIMEOUT)?;
    let remote = BigEndian::read_u32(&reply);
    let local = crc.finish();

    if local != remote {
        return Err(Error::ChecksumMismatch {
            expected: local,
            actual: remote,
        });
    }
    debug!("checksums match ({local:#010x})");
    Ok(())
}

/// Best-effort protocol recovery after a failed transfer.
fn recover<T: Transport>(exchange: &Exchange<T>, command: u8) {
    if let Err(e) = exchange.abort(command, BLOCK_TIMEOUT) {
        warn!("abort failed during recovery: {e}");
    }
    thread::sleep(ABORT_SETTLE);
    exchange.drain_stale_responses();
}
