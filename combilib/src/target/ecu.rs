//! Static catalog of flashable ECU targets.
//!
//! The adapter addresses one of a fixed set of Trionic engine-control
//! units. Each entry records the memory layout the flash procedures need;
//! the catalog is read-only and selected by index when a session is
//! connected.

use crate::error::{Error, Result};

/// Length of the flash-image signature, where a target defines one.
pub const SIGNATURE_LEN: usize = 4;

/// Size of the region scanned for identification fields, from the top of
/// the image downward.
const VIN_SCAN_WINDOW: usize = 0x300;

/// Tagged-field ID of the VIN/immobilizer record.
const VIN_FIELD_ID: u8 = 0x92;

/// Memory layout and flashing rules for one ECU model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EcuDescriptor {
    /// Human-readable model name.
    pub name: &'static str,
    /// Flash chip type fitted to this ECU.
    pub flash_type: &'static str,
    /// Flash base address in the ECU's memory map.
    pub flash_base: u32,
    /// Flash size in bytes; also the exact length of a valid image.
    pub flash_size: u32,
    /// SRAM base address.
    pub sram_base: u32,
    /// SRAM size in bytes.
    pub sram_size: u32,
    /// Required signature at offset 0 of a flash image, if any.
    pub signature: Option<[u8; SIGNATURE_LEN]>,
    /// Whether the image tail carries tagged VIN/immobilizer fields that
    /// can be stripped before flashing.
    pub vin_fields: bool,
}

/// The supported ECU targets, addressed by session index.
pub const DESCRIPTORS: [EcuDescriptor; 5] = [
    EcuDescriptor {
        name: "Trionic 5.2",
        flash_type: "28f010",
        flash_base: 0x060000,
        flash_size: 0x020000,
        sram_base: 0x0,
        sram_size: 0x8000,
        signature: None,
        vin_fields: false,
    },
    EcuDescriptor {
        name: "Trionic 5.5, 28F010 chips",
        flash_type: "28f010",
        flash_base: 0x040000,
        flash_size: 0x040000,
        sram_base: 0x0,
        sram_size: 0x8000,
        signature: None,
        vin_fields: false,
    },
    EcuDescriptor {
        name: "Trionic 5.5, 29F010 chips",
        flash_type: "29f010",
        flash_base: 0x040000,
        flash_size: 0x040000,
        sram_base: 0x0,
        sram_size: 0x8000,
        signature: None,
        vin_fields: false,
    },
    EcuDescriptor {
        name: "Trionic 7",
        flash_type: "29f400",
        flash_base: 0x0,
        flash_size: 0x080000,
        sram_base: 0xF00000,
        sram_size: 0xFFFF,
        signature: Some([0xFF, 0xFF, 0xEF, 0xFC]),
        vin_fields: true,
    },
    EcuDescriptor {
        name: "Trionic 8",
        flash_type: "29f400",
        flash_base: 0x0,
        flash_size: 0x100000,
        sram_base: 0xF00000,
        sram_size: 0xFFFF,
        signature: None,
        vin_fields: false,
    },
];

/// Look up a descriptor by session index.
pub fn descriptor(index: usize) -> Option<&'static EcuDescriptor> {
    DESCRIPTORS.get(index)
}

impl EcuDescriptor {
    /// Validate and prepare an in-memory flash image for writing.
    ///
    /// Checks the image length against the flash size, verifies the target
    /// signature where one is defined, and optionally blanks the
    /// VIN/immobilizer field so the programmed ECU does not inherit the
    /// donor image's identity.
    pub fn prepare_image(&self, image: &mut [u8], strip_vin: bool) -> Result<()> {
        if image.len() != self.flash_size as usize {
            return Err(Error::ImageSizeMismatch {
                expected: self.flash_size as usize,
                actual: image.len(),
            });
        }

        if let Some(signature) = self.signature {
            if image[..SIGNATURE_LEN] != signature {
                return Err(Error::InvalidImageSignature);
            }
        }

        if strip_vin && self.vin_fields {
            strip_vin_field(image);
        }

        Ok(())
    }
}

/// Blank the VIN/immobilizer field in the image's tagged tail section.
///
/// The top of the image holds a sequence of `(length, id, value[length])`
/// fields growing downward from the last byte. The scan walks them until a
/// terminating length byte (0x00 or 0xFF) or the bottom of the window; when
/// the field with ID 0x92 is found, its value bytes (and only those) are
/// overwritten with 0xFF.
fn strip_vin_field(image: &mut [u8]) {
    let floor = image.len().saturating_sub(VIN_SCAN_WINDOW);
    let mut addr = image.len() - 1;

    while addr > floor + 1 {
        let field_len = usize::from(image[addr]);
        if field_len == 0x00 || field_len == 0xFF {
            break;
        }
        addr -= 1;

        let field_id = image[addr];
        addr -= 1;

        if field_id == VIN_FIELD_ID {
            // addr now sits on the field's last value byte
            for _ in 0..field_len {
                image[addr] = 0xFF;
                if addr == floor {
                    break;
                }
                addr -= 1;
            }
            return;
        }

        if addr < floor + field_len {
            break;
        }
        addr -= field_len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T7: &EcuDescriptor = &DESCRIPTORS[3];

    fn t7_image() -> Vec<u8> {
        let mut image = vec![0u8; T7.flash_size as usize];
        image[..4].copy_from_slice(&[0xFF, 0xFF, 0xEF, 0xFC]);
        image
    }

    /// Append a tagged field growing downward from `addr`, returning the
    /// next free address.
    fn put_field(image: &mut [u8], addr: usize, id: u8, value: &[u8]) -> usize {
        let mut addr = addr;
        image[addr] = u8::try_from(value.len()).unwrap();
        addr -= 1;
        image[addr] = id;
        for &byte in value.iter().rev() {
            addr -= 1;
            image[addr] = byte;
        }
        addr - 1
    }

    #[test]
    fn test_catalog_shape() {
        assert_eq!(DESCRIPTORS.len(), 5);
        assert!(descriptor(4).is_some());
        assert!(descriptor(5).is_none());
        assert_eq!(descriptor(3).unwrap().flash_size, 0x080000);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut image = vec![0u8; 100];
        let err = T7.prepare_image(&mut image, false).unwrap_err();
        assert!(matches!(
            err,
            Error::ImageSizeMismatch {
                expected: 0x080000,
                actual: 100
            }
        ));
    }

    #[test]
    fn test_signature_enforced_for_t7() {
        let mut image = vec![0u8; T7.flash_size as usize];
        let err = T7.prepare_image(&mut image, false).unwrap_err();
        assert!(matches!(err, Error::InvalidImageSignature));

        image[..4].copy_from_slice(&[0xFF, 0xFF, 0xEF, 0xFC]);
        T7.prepare_image(&mut image, false).unwrap();
    }

    #[test]
    fn test_no_signature_required_for_t5() {
        let t5 = &DESCRIPTORS[0];
        let mut image = vec![0u8; t5.flash_size as usize];
        t5.prepare_image(&mut image, false).unwrap();
    }

    #[test]
    fn test_vin_field_blanked() {
        let mut image = t7_image();
        let top = image.len() - 1;

        // field layout from the top down: a dummy field, then the VIN field
        let next = put_field(&mut image, top, 0x10, &[1, 2, 3]);
        let vin_top = next;
        put_field(&mut image, next, 0x92, b"YS3ED48E5Y3070016");

        T7.prepare_image(&mut image, true).unwrap();

        // dummy field untouched
        assert_eq!(image[top], 3);
        assert_eq!(image[top - 1], 0x10);
        assert_eq!(&image[top - 4..top - 1], &[1, 2, 3]);

        // VIN header (length/id) kept, value blanked
        assert_eq!(image[vin_top], 17);
        assert_eq!(image[vin_top - 1], 0x92);
        assert!(image[vin_top - 18..vin_top - 1].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_scan_stops_at_terminator() {
        let mut image = t7_image();
        let top = image.len() - 1;

        // terminator right away; VIN field below it must survive
        image[top] = 0x00;
        let vin_top = top - 1;
        put_field(&mut image, vin_top, 0x92, b"SECRET");

        T7.prepare_image(&mut image, true).unwrap();
        assert_eq!(&image[vin_top - 7..vin_top - 1], b"SECRET");
    }

    #[test]
    fn test_strip_not_requested_leaves_image_alone() {
        let mut image = t7_image();
        let top = image.len() - 1;
        put_field(&mut image, top, 0x92, b"KEEPME");

        let before = image.clone();
        T7.prepare_image(&mut image, false).unwrap();
        assert_eq!(image, before);
    }
}
