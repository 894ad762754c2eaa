//! CAN frame representation and wire codec.
//!
//! The adapter tunnels CAN traffic through the packet protocol: outgoing
//! frames ride in a send command, incoming frames arrive as unsolicited
//! notification packets carrying a fixed 15-byte payload:
//!
//! ```text
//! +---------+---------+--------+----------+--------+
//! |   id    |  data   | length | extended | remote |
//! +---------+---------+--------+----------+--------+
//! | 4 bytes | 8 bytes | 1 byte |  1 byte  | 1 byte |
//! |  (LE)   |  (LE)   |        |          |        |
//! +---------+---------+--------+----------+--------+
//! ```
//!
//! `id` and `data` are little-endian on the wire (host order of the
//! reference firmware), unlike the big-endian control-plane integers in the
//! frame header. The asymmetry is part of the wire protocol.

use byteorder::{ByteOrder, LittleEndian};

/// Size of the CAN frame payload inside a notification packet.
pub const CAN_PAYLOAD_LEN: usize = 15;

/// One CAN bus frame as carried by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanFrame {
    /// Arbitration identifier (11 or 29 bits).
    pub id: u32,
    /// Up to 8 data bytes, packed into a little-endian u64.
    pub data: u64,
    /// Number of valid data bytes (0..=8).
    pub length: u8,
    /// Extended (29-bit) identifier flag.
    pub is_extended: bool,
    /// Remote transmission request flag.
    pub is_remote: bool,
}

impl CanFrame {
    /// Pack the frame into the fixed 15-byte command payload.
    pub fn to_payload(&self) -> [u8; CAN_PAYLOAD_LEN] {
        let mut buf = [0u8; CAN_PAYLOAD_LEN];
        LittleEndian::write_u32(&mut buf[0..4], self.id);
        LittleEndian::write_u64(&mut buf[4..12], self.data);
        buf[12] = self.length;
        buf[13] = u8::from(self.is_extended);
        buf[14] = u8::from(self.is_remote);
        buf
    }

    /// Unpack a frame from a 15-byte notification payload.
    ///
    /// Returns `None` when the payload length is wrong.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() != CAN_PAYLOAD_LEN {
            return None;
        }

        Some(Self {
            id: LittleEndian::read_u32(&payload[0..4]),
            data: LittleEndian::read_u64(&payload[4..12]),
            length: payload[12],
            is_extended: payload[13] != 0,
            is_remote: payload[14] != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_layout() {
        let frame = CanFrame {
            id: 0x0000_07E0,
            data: 0x1122_3344_5566_7788,
            length: 8,
            is_extended: false,
            is_remote: false,
        };

        let payload = frame.to_payload();
        // id little-endian
        assert_eq!(&payload[0..4], &[0xE0, 0x07, 0x00, 0x00]);
        // data little-endian
        assert_eq!(payload[4], 0x88);
        assert_eq!(payload[11], 0x11);
        assert_eq!(payload[12], 8);
        assert_eq!(payload[13], 0);
        assert_eq!(payload[14], 0);
    }

    #[test]
    fn test_round_trip() {
        let frame = CanFrame {
            id: 0x1FFF_FFFF,
            data: 0xDEAD_BEEF,
            length: 4,
            is_extended: true,
            is_remote: true,
        };
        assert_eq!(CanFrame::from_payload(&frame.to_payload()), Some(frame));
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(CanFrame::from_payload(&[0u8; 14]).is_none());
        assert!(CanFrame::from_payload(&[0u8; 16]).is_none());
    }
}
