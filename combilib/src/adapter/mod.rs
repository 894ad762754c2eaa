//! CombiAdapter device facade.
//!
//! [`CombiAdapter`] ties the protocol engine together for one attached
//! adapter: short command/response calls (telemetry, CAN channel and
//! session control), the CAN pass-through queues, and the long-running
//! flash transfers driven through the operation supervisor.
//!
//! Two hardware variants exist. The full CombiAdapter tunnels CAN and
//! flashes ECUs; the older USB-BDM2 speaks the same frame protocol but only
//! answers the firmware-version query. Both share this one engine,
//! parametrized by an [`AdapterProfile`] describing the available command
//! set rather than by separate types.

pub mod flash;

use crate::bus::CanFrame;
use crate::error::{Error, Result};
use crate::operation::Supervisor;
use crate::protocol::exchange::Exchange;
use crate::protocol::router::FrameRouter;
use crate::target::{EcuDescriptor, descriptor};
use crate::transport::Transport;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Command codes of the adapter protocol.
pub mod cmd {
    /// Firmware version query.
    pub const FW_VERSION: u8 = 0x20;
    /// A/D input filter get/set.
    pub const ADC_FILTER: u8 = 0x21;
    /// A/D input value query.
    pub const ADC_VALUE: u8 = 0x22;
    /// Thermocouple (EGT) value query.
    pub const EGT_VALUE: u8 = 0x23;

    /// CAN channel open/close.
    pub const CAN_OPEN: u8 = 0x80;
    /// CAN bitrate set.
    pub const CAN_BITRATE: u8 = 0x81;
    /// Unsolicited CAN frame notification.
    pub const CAN_FRAME: u8 = 0x82;
    /// CAN frame transmit.
    pub const CAN_TXFRAME: u8 = 0x83;

    /// ECU session connect/disconnect.
    pub const ECU_CONNECT: u8 = 0x89;
    /// Bulk flash read.
    pub const READ_FLASH: u8 = 0x8A;
    /// Bulk flash write.
    pub const WRITE_FLASH: u8 = 0x8B;
}

/// Default timeout for short command/response exchanges.
pub const PACKET_TIMEOUT: Duration = Duration::from_millis(1000);

/// Timeout for the session connect command (the adapter probes the bus).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of A/D channels on the adapter board.
pub const ADC_NUM_CHANNELS: u32 = 5;

/// Capability profile of one adapter hardware variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterProfile {
    /// Marketing name of the variant.
    pub name: &'static str,
    /// USB vendor ID.
    pub vid: u16,
    /// USB product ID.
    pub pid: u16,
    /// Variant tunnels a CAN bus and supports sessions.
    pub has_bus: bool,
    /// Variant supports bulk flash read/write.
    pub has_flash: bool,
}

impl AdapterProfile {
    /// The full USB/CAN/flash-capable CombiAdapter.
    pub const COMBI: Self = Self {
        name: "CombiAdapter",
        vid: 0xFFFF,
        pid: 0x0005,
        has_bus: true,
        has_flash: true,
    };

    /// The USB-BDM2 programmer; frame protocol only, firmware query alone.
    pub const BDM2: Self = Self {
        name: "USB-BDM2",
        vid: 0xFFFF,
        pid: 0x0006,
        has_bus: false,
        has_flash: false,
    };

    fn require_bus(&self) -> Result<()> {
        if self.has_bus {
            Ok(())
        } else {
            Err(Error::Unsupported(format!(
                "{} has no CAN interface",
                self.name
            )))
        }
    }

    fn require_flash(&self) -> Result<()> {
        if self.has_flash {
            Ok(())
        } else {
            Err(Error::Unsupported(format!(
                "{} cannot flash ECUs",
                self.name
            )))
        }
    }
}

/// One attached adapter: protocol engine, session state and operation
/// supervisor.
///
/// Generic over the transport so tests (and future device backends) can
/// supply their own link; the receive side pushes raw bytes through
/// [`CombiAdapter::feed`].
pub struct CombiAdapter<T: Transport> {
    exchange: Arc<Exchange<T>>,
    supervisor: Arc<Supervisor>,
    session: Mutex<Option<usize>>,
    profile: AdapterProfile,
}

impl<T: Transport> CombiAdapter<T> {
    /// Create an adapter engine over `transport`.
    pub fn new(transport: T, profile: AdapterProfile) -> Self {
        let bus_notify = profile.has_bus.then_some(cmd::CAN_FRAME);
        let router = Arc::new(FrameRouter::new(bus_notify));

        Self {
            exchange: Arc::new(Exchange::new(transport, router)),
            supervisor: Arc::new(Supervisor::new()),
            session: Mutex::new(None),
            profile,
        }
    }

    /// This adapter's capability profile.
    pub fn profile(&self) -> &AdapterProfile {
        &self.profile
    }

    /// Entry point for raw bytes arriving from the transport.
    pub fn feed(&self, bytes: &[u8]) {
        self.exchange.router().feed(bytes);
    }

    /// Shared handle to the frame router, for transport reader threads.
    pub fn router(&self) -> Arc<FrameRouter> {
        Arc::clone(self.exchange.router())
    }

    // ---- board telemetry ----

    /// Query the adapter's firmware version.
    pub fn firmware_version(&self) -> Result<u16> {
        let reply = self
            .exchange
            .call(cmd::FW_VERSION, &[], 2, PACKET_TIMEOUT)?;
        Ok(LittleEndian::read_u16(&reply))
    }

    /// Query whether filtering is enabled on an A/D channel.
    pub fn adc_filtering(&self, channel: u32) -> Result<bool> {
        let channel = check_channel(channel)?;
        let reply = self
            .exchange
            .call(cmd::ADC_FILTER, &[channel], 1, PACKET_TIMEOUT)?;
        Ok(reply[0] == 0x01)
    }

    /// Enable or disable filtering on an A/D channel.
    pub fn set_adc_filtering(&self, channel: u32, enable: bool) -> Result<()> {
        let channel = check_channel(channel)?;
        self.exchange.call(
            cmd::ADC_FILTER,
            &[channel, u8::from(enable)],
            0,
            PACKET_TIMEOUT,
        )?;
        Ok(())
    }

    /// Read the voltage on an A/D channel.
    pub fn adc_value(&self, channel: u32) -> Result<f32> {
        let channel = check_channel(channel)?;
        let reply = self
            .exchange
            .call(cmd::ADC_VALUE, &[channel], 4, PACKET_TIMEOUT)?;
        Ok(LittleEndian::read_f32(&reply))
    }

    /// Read the thermocouple (exhaust gas temperature) input.
    pub fn thermo_value(&self) -> Result<f32> {
        let reply = self.exchange.call(cmd::EGT_VALUE, &[], 5, PACKET_TIMEOUT)?;
        // status byte first, value after it
        Ok(LittleEndian::read_f32(&reply[1..5]))
    }

    // ---- CAN channel and session control ----

    /// Open or close the adapter's CAN channel.
    pub fn open_channel(&self, open: bool) -> Result<()> {
        self.profile.require_bus()?;
        debug!("{} CAN channel", if open { "opening" } else { "closing" });
        self.exchange
            .call(cmd::CAN_OPEN, &[u8::from(open)], 0, PACKET_TIMEOUT)?;
        Ok(())
    }

    /// Set the CAN bitrate in bits per second.
    pub fn set_bitrate(&self, bitrate: u32) -> Result<()> {
        self.profile.require_bus()?;
        let mut payload = [0u8; 4];
        BigEndian::write_u32(&mut payload, bitrate);
        self.exchange
            .call(cmd::CAN_BITRATE, &payload, 0, PACKET_TIMEOUT)?;
        Ok(())
    }

    /// Connect a diagnostic session to the ECU at `index` in the catalog.
    ///
    /// No-op when that session is already connected.
    pub fn connect_session(&self, index: usize) -> Result<()> {
        self.profile.require_bus()?;
        let desc = descriptor(index).ok_or(Error::UnknownEcu(index))?;
        let index_byte = u8::try_from(index).map_err(|_| Error::UnknownEcu(index))?;

        let mut session = self.session.lock().unwrap();
        if *session == Some(index) {
            return Ok(());
        }

        info!("connecting to {}", desc.name);
        self.exchange
            .call(cmd::ECU_CONNECT, &[1, index_byte], 0, CONNECT_TIMEOUT)?;
        *session = Some(index);
        Ok(())
    }

    /// Disconnect the active session, optionally resetting the ECU.
    ///
    /// The session index is cleared even when the command fails; a dead
    /// link should not wedge the driver in a phantom session.
    pub fn disconnect_session(&self, reset: bool) -> Result<()> {
        let mut session = self.session.lock().unwrap();
        if session.is_none() {
            return Ok(());
        }

        let result = self
            .exchange
            .call(
                cmd::ECU_CONNECT,
                &[0, u8::from(reset)],
                0,
                PACKET_TIMEOUT,
            )
            .map(|_| ());
        *session = None;
        result
    }

    /// Index of the connected ECU, if a session is active.
    pub fn session(&self) -> Option<usize> {
        *self.session.lock().unwrap()
    }

    /// Descriptor of the connected ECU, if a session is active.
    pub fn session_descriptor(&self) -> Option<&'static EcuDescriptor> {
        self.session().and_then(descriptor)
    }

    // ---- CAN pass-through ----

    /// Transmit a CAN frame. One-way; the adapter does not answer.
    pub fn send_frame(&self, frame: &CanFrame) -> Result<()> {
        self.profile.require_bus()?;
        self.exchange
            .send_one_way(cmd::CAN_TXFRAME, &frame.to_payload(), PACKET_TIMEOUT)
    }

    /// Receive the oldest queued CAN frame, waiting up to `timeout`.
    ///
    /// A zero timeout polls: an already-queued frame is returned
    /// immediately, otherwise `None`.
    pub fn receive_frame(&self, timeout: Duration) -> Option<CanFrame> {
        self.exchange.router().wait_bus_frame(timeout)
    }

    // ---- operation polling ----

    /// Whether a flash transfer is currently running.
    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Bytes transferred by the current or most recent flash operation.
    pub fn progress(&self) -> u32 {
        self.supervisor.progress()
    }

    /// Whether the most recent flash operation succeeded.
    pub fn succeeded(&self) -> bool {
        self.supervisor.succeeded()
    }

    /// Error captured by the most recent flash operation, if any.
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.supervisor.last_error()
    }

    /// Protocol-level shutdown: best-effort session disconnect and CAN
    /// channel close. Errors are logged and swallowed; the link may
    /// already be gone.
    pub fn shutdown(&self) {
        if self.profile.has_bus {
            if let Err(e) = self.disconnect_session(false) {
                warn!("disconnect on shutdown failed: {e}");
            }
            if let Err(e) = self.open_channel(false) {
                warn!("channel close on shutdown failed: {e}");
            }
        }
    }
}

impl<T: Transport + 'static> CombiAdapter<T> {
    /// Start reading the connected ECU's flash into the file at `path`.
    ///
    /// Returns as soon as the worker is launched; poll
    /// [`CombiAdapter::is_running`] / [`CombiAdapter::progress`] and read
    /// the outcome from [`CombiAdapter::succeeded`] /
    /// [`CombiAdapter::last_error`].
    pub fn start_read_flash(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.profile.require_flash()?;
        let desc = self.session_descriptor().ok_or(Error::NoActiveSession)?;

        let exchange = Arc::clone(&self.exchange);
        let supervisor = Arc::clone(&self.supervisor);
        let path = path.into();

        info!("reading {} flash ({} bytes)", desc.name, desc.flash_size);
        self.supervisor
            .start(move || flash::read_flash(&exchange, &supervisor, desc, &path))
    }

    /// Start writing the flash image at `path` to the connected ECU.
    ///
    /// `method` is the adapter-side flashing method byte; method 1 also
    /// strips the VIN/immobilizer field from the image before sending.
    pub fn start_write_flash(&self, path: impl Into<PathBuf>, method: u8) -> Result<()> {
        self.profile.require_flash()?;
        let desc = self.session_descriptor().ok_or(Error::NoActiveSession)?;

        let exchange = Arc::clone(&self.exchange);
        let supervisor = Arc::clone(&self.supervisor);
        let path = path.into();

        info!("writing {} flash ({} bytes)", desc.name, desc.flash_size);
        self.supervisor
            .start(move || flash::write_flash(&exchange, &supervisor, desc, &path, method))
    }
}

#[allow(clippy::cast_possible_truncation)] // channel < 5 after the check
fn check_channel(channel: u32) -> Result<u8> {
    if channel < ADC_NUM_CHANNELS {
        Ok(channel as u8)
    } else {
        Err(Error::InvalidChannel(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{TERM_NACK, encode, encode_with_terminator};

    /// Transport answering each write with the next scripted reply.
    struct ScriptedTransport {
        router: Arc<FrameRouter>,
        replies: Vec<Vec<u8>>,
    }

    impl Transport for ScriptedTransport {
        fn write(&mut self, _buf: &[u8], _timeout: Duration) -> Result<()> {
            if !self.replies.is_empty() {
                let reply = self.replies.remove(0);
                self.router.feed(&reply);
            }
            Ok(())
        }
    }

    fn adapter_with(
        profile: AdapterProfile,
        replies: Vec<Vec<u8>>,
    ) -> CombiAdapter<ScriptedTransport> {
        let bus_notify = profile.has_bus.then_some(cmd::CAN_FRAME);
        let router = Arc::new(FrameRouter::new(bus_notify));
        let transport = ScriptedTransport {
            router: Arc::clone(&router),
            replies,
        };

        CombiAdapter {
            exchange: Arc::new(Exchange::new(transport, router)),
            supervisor: Arc::new(Supervisor::new()),
            session: Mutex::new(None),
            profile,
        }
    }

    #[test]
    fn test_firmware_version_little_endian() {
        let adapter = adapter_with(
            AdapterProfile::BDM2,
            vec![encode(cmd::FW_VERSION, &[0x10, 0x02])],
        );
        assert_eq!(adapter.firmware_version().unwrap(), 0x0210);
    }

    #[test]
    fn test_bus_commands_rejected_on_bdm2() {
        let adapter = adapter_with(AdapterProfile::BDM2, vec![]);
        assert!(matches!(
            adapter.open_channel(true).unwrap_err(),
            Error::Unsupported(_)
        ));
        assert!(matches!(
            adapter.connect_session(0).unwrap_err(),
            Error::Unsupported(_)
        ));
        assert!(matches!(
            adapter.start_read_flash("/tmp/x.bin").unwrap_err(),
            Error::Unsupported(_)
        ));
    }

    #[test]
    fn test_adc_channel_range_checked() {
        let adapter = adapter_with(AdapterProfile::COMBI, vec![]);
        assert!(matches!(
            adapter.adc_value(5).unwrap_err(),
            Error::InvalidChannel(5)
        ));
    }

    #[test]
    fn test_connect_session_sets_index() {
        let adapter = adapter_with(
            AdapterProfile::COMBI,
            vec![encode(cmd::ECU_CONNECT, &[])],
        );
        adapter.connect_session(3).unwrap();
        assert_eq!(adapter.session(), Some(3));
        assert_eq!(adapter.session_descriptor().unwrap().name, "Trionic 7");

        // reconnecting the same ECU sends nothing and succeeds
        adapter.connect_session(3).unwrap();
    }

    #[test]
    fn test_connect_unknown_index_rejected() {
        let adapter = adapter_with(AdapterProfile::COMBI, vec![]);
        assert!(matches!(
            adapter.connect_session(9).unwrap_err(),
            Error::UnknownEcu(9)
        ));
    }

    #[test]
    fn test_disconnect_clears_session_even_on_failure() {
        let adapter = adapter_with(
            AdapterProfile::COMBI,
            vec![
                encode(cmd::ECU_CONNECT, &[]),
                encode_with_terminator(cmd::ECU_CONNECT, &[], TERM_NACK),
            ],
        );
        adapter.connect_session(0).unwrap();

        assert!(matches!(
            adapter.disconnect_session(false).unwrap_err(),
            Error::CommandRejected { .. }
        ));
        assert_eq!(adapter.session(), None);
    }

    #[test]
    fn test_disconnect_without_session_is_noop() {
        let adapter = adapter_with(AdapterProfile::COMBI, vec![]);
        adapter.disconnect_session(true).unwrap();
    }

    #[test]
    fn test_flash_requires_session() {
        let adapter = adapter_with(AdapterProfile::COMBI, vec![]);
        assert!(matches!(
            adapter.start_read_flash("/tmp/x.bin").unwrap_err(),
            Error::NoActiveSession
        ));
    }

    #[test]
    fn test_receive_frame_zero_timeout_polls() {
        let adapter = adapter_with(AdapterProfile::COMBI, vec![]);
        let frame = CanFrame {
            id: 0x220,
            data: 0xAB,
            length: 1,
            ..CanFrame::default()
        };
        adapter.feed(&encode(cmd::CAN_FRAME, &frame.to_payload()));

        assert_eq!(adapter.receive_frame(Duration::ZERO), Some(frame));
        assert_eq!(adapter.receive_frame(Duration::ZERO), None);
    }
}
