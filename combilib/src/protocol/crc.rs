//! CRC-32 checksum calculation.
//!
//! The adapter validates every bulk flash transfer with the ISO-3309 CRC-32
//! (the zip/Ethernet variant): polynomial 0x04C11DB7, reflected input and
//! output, initial value 0xFFFFFFFF, final XOR 0xFFFFFFFF.
//!
//! The implementation is the plain bitwise form; flash transfers are paced
//! by the USB link, so a lookup table would not be observable.

/// Generator polynomial.
const POLY: u32 = 0x04C11DB7;

/// Initial remainder.
const INIT: u32 = 0xFFFFFFFF;

/// Final XOR value.
const FINAL_XOR: u32 = 0xFFFFFFFF;

/// Running CRC-32 accumulator.
///
/// Each accumulator owns its own state and may be used from any thread.
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    remainder: u32,
}

impl Crc32 {
    /// Start a new checksum.
    pub fn new() -> Self {
        Self { remainder: INIT }
    }

    /// Fold a single byte into the checksum.
    pub fn update(&mut self, byte: u8) {
        self.remainder ^= reflect(u32::from(byte), 8) << 24;
        for _ in 0..8 {
            if self.remainder & 0x8000_0000 != 0 {
                self.remainder = (self.remainder << 1) ^ POLY;
            } else {
                self.remainder <<= 1;
            }
        }
    }

    /// Fold a block of bytes into the checksum in order.
    pub fn update_block(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Finish the checksum and return the final value.
    pub fn finish(&self) -> u32 {
        reflect(self.remainder, 32) ^ FINAL_XOR
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Reflect the low `num_bits` bits of `value`.
fn reflect(value: u32, num_bits: u8) -> u32 {
    let mut reflection = 0;
    let mut value = value;
    for bit in 0..num_bits {
        if value & 0x01 != 0 {
            reflection |= 1 << (num_bits - 1 - bit);
        }
        value >>= 1;
    }
    reflection
}

/// Compute the CRC-32 of a byte slice in one shot.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update_block(data);
    crc.finish()
}
