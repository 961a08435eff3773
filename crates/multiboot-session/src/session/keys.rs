//! Key exchange phase and the per-session cipher/CRC state it creates.

use multiboot_core::crypto::{crc_b_from_reply, encrypt_word, Crc, Keystream, SessionKeys};
use multiboot_core::wire::{self, cmd, HEADER_SIZE};

use super::{Session, SessionError};
use crate::transport::Transport;

/// Mutable state of one transfer: created by the key exchange, advanced by
/// the payload loop, read once more by finalization, then dropped.
#[derive(Debug, Clone)]
pub(crate) struct SessionState {
    keystream: Keystream,
    crc: Crc,
    crc_a: u8,
    crc_b: u8,
    /// Next payload byte offset. Starts at the end of the header.
    cursor: u32,
    padded_len: u32,
}

impl SessionState {
    pub(crate) fn new(keys: SessionKeys, crc_b: u8, padded_len: u32) -> Self {
        Self {
            keystream: Keystream::new(keys.seed),
            crc: Crc::new(),
            crc_a: keys.crc_a,
            crc_b,
            cursor: HEADER_SIZE as u32,
            padded_len,
        }
    }

    /// CRC the plaintext word at the cursor, encrypt it, and step the cursor.
    /// Returns `(offset, encrypted)`.
    pub(crate) fn seal_next(&mut self, plain: u32) -> (u32, u32) {
        let offset = self.cursor;
        self.crc.update(plain);
        let seed = self.keystream.advance();
        self.cursor += wire::WORD_BYTES as u32;
        (offset, encrypt_word(seed, plain, offset))
    }

    /// Fold `crcA`/`crcB` into the CRC. Called once, after the last word.
    pub(crate) fn fold_keys(&mut self) {
        self.crc.fold_keys(self.crc_a, self.crc_b);
    }

    pub(crate) fn crc(&self) -> u16 {
        self.crc.value()
    }

    pub(crate) fn cursor(&self) -> u32 {
        self.cursor
    }

    pub(crate) fn padded_len(&self) -> u32 {
        self.padded_len
    }
}

impl<T: Transport> Session<T> {
    /// Obtain the session token, derive keys, and announce the payload length.
    pub(super) fn exchange_keys(&mut self) -> Result<SessionState, SessionError> {
        self.command(cmd::HEADER_CONFIRM)?;
        self.command(cmd::KEY_PROBE)?;
        let token = self.command(cmd::KEY_PROBE)?;

        let keys = SessionKeys::derive(token)?;
        tracing::debug!(
            token = format_args!("{token:#010x}"),
            seed = format_args!("{:#010x}", keys.seed),
            crc_a = keys.crc_a,
            "session token accepted"
        );
        self.command(keys.crc_param_word())?;

        let padded_len = self.image.padded_len();
        let length_reply = self.command(wire::length_word(padded_len))?;
        let crc_b = crc_b_from_reply(length_reply);
        tracing::debug!(padded_len, crc_b, "payload length announced");

        Ok(SessionState::new(keys, crc_b, padded_len))
    }
}
