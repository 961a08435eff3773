//! multiboot-core — wire format, payload cipher and CRC, image handling,
//! and configuration. The session crate and the binary depend on this one.

pub mod config;
pub mod crypto;
pub mod image;
pub mod wire;

pub use crypto::{Crc, Keystream, SessionKeys};
pub use image::{Image, ImageError};
pub use wire::{CartridgeHeader, WireError};
