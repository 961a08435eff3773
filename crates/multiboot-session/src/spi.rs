//! Linux spidev transport.
//!
//! The link port is wired to an SPI controller acting as master. The device
//! is configured once on open (mode 3, 8-bit words, 1 MHz) and every
//! exchange is a single 4-byte `SPI_IOC_MESSAGE(1)` transfer.
//!
//! The ioctl calls are the only unsafe code in the workspace.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use static_assertions::assert_eq_size;

use multiboot_core::wire::{SPI_BITS_PER_WORD, SPI_MODE, SPI_SPEED_HZ, WORD_BYTES};

use crate::transport::{Transport, TransportError};

// ── spidev ABI ────────────────────────────────────────────────────────────────

const SPI_IOC_MAGIC: u8 = b'k';
const SPI_IOC_NR_MESSAGE: u8 = 0;
const SPI_IOC_NR_MODE: u8 = 1;
const SPI_IOC_NR_BITS_PER_WORD: u8 = 3;
const SPI_IOC_NR_MAX_SPEED_HZ: u8 = 4;

/// `struct spi_ioc_transfer` from `<linux/spi/spidev.h>`.
#[derive(Debug, Default)]
#[repr(C)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    pad: u8,
}

assert_eq_size!(SpiIocTransfer, [u8; 32]);

mod ioctl {
    use super::*;

    nix::ioctl_write_ptr!(spi_write_mode, SPI_IOC_MAGIC, SPI_IOC_NR_MODE, u8);
    nix::ioctl_write_ptr!(spi_write_bits_per_word, SPI_IOC_MAGIC, SPI_IOC_NR_BITS_PER_WORD, u8);
    nix::ioctl_write_ptr!(spi_write_max_speed_hz, SPI_IOC_MAGIC, SPI_IOC_NR_MAX_SPEED_HZ, u32);
    nix::ioctl_write_buf!(spi_message, SPI_IOC_MAGIC, SPI_IOC_NR_MESSAGE, SpiIocTransfer);
}

use ioctl::{spi_message, spi_write_bits_per_word, spi_write_max_speed_hz, spi_write_mode};

// ── Transport ─────────────────────────────────────────────────────────────────

/// An open, configured spidev node. Closed on drop.
#[derive(Debug)]
pub struct SpiTransport {
    device: File,
    path: PathBuf,
}

impl SpiTransport {
    /// Open `path` and apply the link's fixed SPI settings.
    pub fn open(path: &Path) -> Result<Self, TransportError> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| TransportError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let fd = device.as_raw_fd();

        let mode = SPI_MODE;
        let bits = SPI_BITS_PER_WORD;
        let speed = SPI_SPEED_HZ;

        // SAFETY: `fd` stays open for as long as `device` lives, and each
        // pointer refers to a live local of exactly the type the request encodes.
        unsafe { spi_write_mode(fd, &mode) }.map_err(configure("mode"))?;
        unsafe { spi_write_bits_per_word(fd, &bits) }.map_err(configure("bits per word"))?;
        unsafe { spi_write_max_speed_hz(fd, &speed) }.map_err(configure("max speed"))?;

        tracing::info!(
            path = %path.display(),
            mode,
            bits_per_word = bits,
            speed_hz = speed,
            "link device configured"
        );

        Ok(Self {
            device,
            path: path.to_path_buf(),
        })
    }
}

fn configure(setting: &'static str) -> impl FnOnce(nix::errno::Errno) -> TransportError {
    move |errno| TransportError::Configure {
        setting,
        source: errno.into(),
    }
}

impl Transport for SpiTransport {
    fn exchange(&mut self, word: u32) -> Result<u32, TransportError> {
        let tx = word.to_be_bytes();
        let mut rx = [0u8; WORD_BYTES];

        let transfer = SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len: WORD_BYTES as u32,
            speed_hz: SPI_SPEED_HZ,
            bits_per_word: SPI_BITS_PER_WORD,
            ..SpiIocTransfer::default()
        };

        // SAFETY: the transfer points at `tx` and `rx`, both WORD_BYTES long
        // and alive until the ioctl returns; the kernel reads `len` bytes from
        // one and writes `len` bytes to the other.
        unsafe { spi_message(self.device.as_raw_fd(), std::slice::from_ref(&transfer)) }
            .map_err(|errno| TransportError::Exchange {
                word,
                source: errno.into(),
            })?;

        Ok(u32::from_be_bytes(rx))
    }
}

impl Drop for SpiTransport {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "link device released");
    }
}
