//! Multiboot wire format — command words, fixed layouts, and link timing.
//!
//! These values ARE the protocol. The receiving console's BIOS expects every
//! command word, every constant and every bit position exactly as written
//! here; none of them are tunable. Every exchange on the link is one 32-bit
//! word, transmitted most-significant byte first. 16-bit values travel in the
//! low half of the outgoing word and come back in the high half of the reply.
//!
//! The cartridge header type uses zerocopy derives for allocation-free
//! parsing. There is no unsafe code in this module.

use std::time::Duration;

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Command words ─────────────────────────────────────────────────────────────

/// Outbound command words, in the order the session issues them.
pub mod cmd {
    /// Handshake poll. Repeated until the peer answers [`super::reply::READY`].
    pub const HANDSHAKE: u32 = 0x6202;
    /// Request normal-mode multiboot after the peer reported ready.
    pub const BOOT_MODE: u32 = 0x6102;
    /// Marks the end of the 0xC0-byte header stream.
    pub const HEADER_END: u32 = 0x6200;
    /// Sent after the header, before the key probes.
    pub const HEADER_CONFIRM: u32 = 0x6202;
    /// Key probe. The reply to the second probe carries the session token.
    pub const KEY_PROBE: u32 = 0x63D1;
    /// Palette/CRC parameter command; the low byte carries the adjusted `crcA`.
    pub const CRC_PARAM: u32 = 0x6400;
    /// Completion request, polled until the peer answers [`super::reply::ACK`].
    pub const ACK_REQUEST: u32 = 0x0065;
    /// Announces that the next word is the final CRC.
    pub const CRC_EXCHANGE: u32 = 0x0066;
}

/// Values expected in the high half of a reply.
pub mod reply {
    /// Peer is powered, in the BIOS, and waiting for a multiboot transfer.
    pub const READY: u16 = 0x7202;
    /// Peer has received the whole payload.
    pub const ACK: u16 = 0x0075;
    /// Required top byte of the session token.
    pub const TOKEN_TAG: u8 = 0x73;
}

// ── Sizes ─────────────────────────────────────────────────────────────────────

/// Bytes of the image sent in clear during the header phase.
pub const HEADER_SIZE: usize = 0xC0;

/// Largest image the peer can accept (its external work RAM).
pub const MAX_IMAGE_SIZE: usize = 0x40000;

/// Payload length is rounded up to this boundary.
pub const TRANSFER_ALIGN: u32 = 0x10;

/// Zero bytes kept after the image so trailing words can be read whole.
pub const IMAGE_TAIL_PADDING: usize = 0x10;

/// Bias subtracted from the padded length before it is sent as a word count.
pub const LENGTH_BIAS: u32 = 0x190;

// ── Link timing ───────────────────────────────────────────────────────────────

/// Delay between successive polls in both waiting loops.
///
/// The peer's firmware loop needs this long to reload its reply register.
/// Polling faster is unverified.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// SPI clock rate.
pub const SPI_SPEED_HZ: u32 = 1_000_000;

/// SPI word width. Each exchange is four of these.
pub const SPI_BITS_PER_WORD: u8 = 8;

/// SPI mode 3: clock idles high, data sampled on the trailing edge.
pub const SPI_MODE: u8 = 0x03;

/// Bytes per exchange.
pub const WORD_BYTES: usize = 4;

// ── Length arithmetic ────────────────────────────────────────────────────────

/// Round an image length up to the next multiple of [`TRANSFER_ALIGN`].
///
/// Meaningful up to [`MAX_IMAGE_SIZE`]; lengths within one alignment step of
/// `u32::MAX` wrap to zero instead of overflowing.
pub fn padded_length(image_len: u32) -> u32 {
    image_len.wrapping_add(TRANSFER_ALIGN - 1) & !(TRANSFER_ALIGN - 1)
}

/// The word announcing the payload size to the peer.
///
/// Unsigned 32-bit arithmetic throughout: header-only images
/// (padded length below the bias) wrap rather than fail.
pub fn length_word(padded_len: u32) -> u32 {
    padded_len.wrapping_sub(LENGTH_BIAS) / 4
}

/// High half of a reply — the part the peer actually drives.
pub fn reply_high(reply: u32) -> u16 {
    (reply >> 16) as u16
}

// ── Cartridge header ──────────────────────────────────────────────────────────

/// The standard cartridge header occupying the first 0xC0 bytes of an image.
///
/// The peer's BIOS validates the logo, the fixed byte and the complement
/// check before it jumps into a received image.
///
/// Wire size: 192 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct CartridgeHeader {
    /// ARM branch instruction to the image entry point (little-endian).
    pub entry: [u8; 4],
    /// Compressed logo bitmap. Must match the BIOS copy byte-for-byte.
    pub logo: [u8; 156],
    /// Upper-case ASCII title, NUL padded.
    pub title: [u8; 12],
    /// Four-character game code.
    pub game_code: [u8; 4],
    /// Two-character maker code.
    pub maker_code: [u8; 2],
    /// Must be [`HEADER_FIXED_VALUE`].
    pub fixed: u8,
    pub unit_code: u8,
    pub device_type: u8,
    pub reserved: [u8; 7],
    pub version: u8,
    /// Complement check over bytes 0xA0..=0xBC.
    pub complement: u8,
    pub reserved_tail: [u8; 2],
}

assert_eq_size!(CartridgeHeader, [u8; HEADER_SIZE]);

/// Value required at header offset 0xB2.
pub const HEADER_FIXED_VALUE: u8 = 0x96;

/// Byte range covered by the complement check.
const COMPLEMENT_RANGE: std::ops::RangeInclusive<usize> = 0xA0..=0xBC;

impl CartridgeHeader {
    /// Interpret the first [`HEADER_SIZE`] bytes of `bytes`.
    /// Returns `None` if fewer bytes are available.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Self::read_from_prefix(bytes)
    }

    pub fn entry_branch(&self) -> u32 {
        u32::from_le_bytes(self.entry)
    }

    pub fn title(&self) -> String {
        ascii_field(&self.title)
    }

    pub fn game_code(&self) -> String {
        ascii_field(&self.game_code)
    }

    pub fn maker_code(&self) -> String {
        ascii_field(&self.maker_code)
    }

    /// The complement byte the BIOS will compute for this header.
    pub fn expected_complement(&self) -> u8 {
        let bytes = self.as_bytes();
        let sum = bytes[COMPLEMENT_RANGE]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        0u8.wrapping_sub(sum).wrapping_sub(0x19)
    }

    /// Problems the peer's BIOS would reject the image for.
    pub fn check(&self) -> Vec<HeaderIssue> {
        let mut issues = Vec::new();
        if self.fixed != HEADER_FIXED_VALUE {
            issues.push(HeaderIssue::FixedByte(self.fixed));
        }
        let expected = self.expected_complement();
        if self.complement != expected {
            issues.push(HeaderIssue::Complement {
                stored: self.complement,
                expected,
            });
        }
        issues
    }
}

/// Printable form of a fixed-width ASCII field. Stops at the first NUL.
fn ascii_field(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|b| **b != 0)
        .map(|b| if b.is_ascii_graphic() || *b == b' ' { *b as char } else { '?' })
        .collect()
}

/// A cartridge header defect. Reported, never fatal: the peer decides.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderIssue {
    #[error("fixed byte is 0x{0:02x}, expected 0x96")]
    FixedByte(u8),

    #[error("complement check is 0x{stored:02x}, expected 0x{expected:02x}")]
    Complement { stored: u8, expected: u8 },
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting words received from the peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("peer rejected session: token 0x{token:08x} does not carry tag 0x73")]
    PeerRejected { token: u32 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
