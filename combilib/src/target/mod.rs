//! Target ECU descriptors and flash-image preparation.

pub mod ecu;

pub use ecu::{DESCRIPTORS, EcuDescriptor, descriptor};
