//! Payload protection for multiboot transfers.
//!
//! Provides three things:
//!   1. Session key derivation — keystream seed and CRC parameters from the
//!      peer's token
//!   2. The keystream cipher — a 32-bit linear-congruential keystream XORed
//!      with each payload word and its offset
//!   3. The payload CRC — a bit-serial CRC-16 over the plaintext words
//!
//! None of this is cryptographically strong; it is what the peer's BIOS
//! implements and must be reproduced bit for bit. There is no unsafe code in
//! this module.

use crate::wire::{reply, WireError};

// ── Constants ────────────────────────────────────────────────────────────────

/// Seed template. The token's key byte is OR-ed into bits 8..16.
pub const SEED_BASE: u32 = 0xFFFF_00D1;

/// Keystream recurrence multiplier: `seed = seed * M + 1`.
pub const KEYSTREAM_MULTIPLIER: u32 = 0x6F64_6573;

/// Fixed mask XORed into every encrypted word.
pub const CIPHER_MASK: u32 = 0x4320_2F2F;

/// Offsets are mixed in as `OFFSET_BASE - offset`.
pub const OFFSET_BASE: u32 = 0xFE00_0000;

/// Added to the token's key byte to produce `crcA`.
pub const CRC_A_BIAS: u8 = 0x0F;

/// Initial CRC state.
pub const CRC_INITIAL: u16 = 0xC387;

/// Feedback constant applied when the shifted-out bit differs.
pub const CRC_FEEDBACK: u16 = 0xC37B;

// ── Session keys ──────────────────────────────────────────────────────────────

/// Parameters negotiated from the peer's session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKeys {
    /// Initial keystream state.
    pub seed: u32,
    /// Adjusted key byte; sent to the peer and folded into the final CRC.
    pub crc_a: u8,
}

impl SessionKeys {
    /// Derive keys from the reply to the second key probe.
    ///
    /// The token's top byte must be [`reply::TOKEN_TAG`]; anything else
    /// means the peer is not running compatible firmware.
    pub fn derive(token: u32) -> Result<Self, WireError> {
        if (token >> 24) as u8 != reply::TOKEN_TAG {
            return Err(WireError::PeerRejected { token });
        }
        let key = (token >> 16) as u8;
        Ok(Self {
            seed: SEED_BASE | (u32::from(key) << 8),
            crc_a: key.wrapping_add(CRC_A_BIAS),
        })
    }

    /// The word that hands `crcA` back to the peer.
    pub fn crc_param_word(&self) -> u32 {
        crate::wire::cmd::CRC_PARAM | u32::from(self.crc_a)
    }
}

/// `crcB` — the key byte carried by the reply to the length word.
pub fn crc_b_from_reply(reply: u32) -> u8 {
    (reply >> 16) as u8
}

// ── Keystream ─────────────────────────────────────────────────────────────────

/// Running keystream state. Advanced exactly once per payload word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keystream {
    seed: u32,
}

impl Keystream {
    pub fn new(seed: u32) -> Self {
        Self { seed }
    }

    /// Step the recurrence and return the new state.
    pub fn advance(&mut self) -> u32 {
        self.seed = self
            .seed
            .wrapping_mul(KEYSTREAM_MULTIPLIER)
            .wrapping_add(1);
        self.seed
    }
}

/// Encrypt one payload word at byte `offset` with an already-advanced `seed`.
pub fn encrypt_word(seed: u32, word: u32, offset: u32) -> u32 {
    seed ^ word ^ OFFSET_BASE.wrapping_sub(offset) ^ CIPHER_MASK
}

/// The cipher is a pure XOR, so decryption is the same operation.
pub fn decrypt_word(seed: u32, word: u32, offset: u32) -> u32 {
    encrypt_word(seed, word, offset)
}

// ── CRC ───────────────────────────────────────────────────────────────────────

/// Bit-serial payload CRC.
///
/// Words are consumed least-significant bit first, 32 iterations per word.
/// This is not one of the table-driven CRC-16 variants; do not substitute
/// a library CRC without proving equivalence against the vectors below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crc {
    state: u16,
}

impl Crc {
    pub fn new() -> Self {
        Self { state: CRC_INITIAL }
    }

    pub fn update(&mut self, word: u32) {
        let mut bits = word;
        for _ in 0..32 {
            let feedback = (self.state ^ bits as u16) & 1;
            self.state >>= 1;
            if feedback != 0 {
                self.state ^= CRC_FEEDBACK;
            }
            bits >>= 1;
        }
    }

    /// Fold the negotiated parameters in, as the peer does after the payload.
    pub fn fold_keys(&mut self, crc_a: u8, crc_b: u8) {
        self.update(final_word(crc_a, crc_b));
    }

    pub fn value(&self) -> u16 {
        self.state
    }
}

impl Default for Crc {
    fn default() -> Self {
        Self::new()
    }
}

/// Synthetic word folded into the CRC after the last payload word.
pub fn final_word(crc_a: u8, crc_b: u8) -> u32 {
    0xFFFF_0000 | (u32::from(crc_b) << 8) | u32::from(crc_a)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
