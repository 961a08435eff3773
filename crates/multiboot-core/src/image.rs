//! The executable image handed to the peer.
//!
//! An image is loaded once, checked against the peer's size limit, and kept
//! in a zero-padded buffer so the header halfwords and the trailing payload
//! words can always be read whole. It is never mutated after loading.

use std::path::{Path, PathBuf};

use crate::wire::{self, CartridgeHeader, HEADER_SIZE, IMAGE_TAIL_PADDING, MAX_IMAGE_SIZE};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Precondition failures. All are reported before the link is touched.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to stat {0}: {1}")]
    Stat(PathBuf, std::io::Error),
    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),
    #[error("image is {len} bytes, the peer accepts at most {} (256 KiB)", MAX_IMAGE_SIZE)]
    TooLarge { len: usize },
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
}

// ── Image ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Image {
    /// Image bytes followed by at least `IMAGE_TAIL_PADDING` zeros,
    /// and never shorter than the header plus that padding.
    buf: Vec<u8>,
    len: usize,
}

impl Image {
    /// Load and validate an image file.
    pub fn load(path: &Path) -> Result<Self, ImageError> {
        let meta =
            std::fs::metadata(path).map_err(|e| ImageError::Stat(path.to_path_buf(), e))?;
        if !meta.is_file() {
            return Err(ImageError::NotAFile(path.to_path_buf()));
        }
        let len = usize::try_from(meta.len()).unwrap_or(usize::MAX);
        if len > MAX_IMAGE_SIZE {
            return Err(ImageError::TooLarge { len });
        }

        let bytes = std::fs::read(path).map_err(|e| ImageError::Read(path.to_path_buf(), e))?;
        let image = Self::from_bytes(bytes)?;

        tracing::debug!(path = %path.display(), len = image.len, "image loaded");
        Ok(image)
    }

    /// Wrap in-memory image bytes.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self, ImageError> {
        let len = bytes.len();
        if len > MAX_IMAGE_SIZE {
            return Err(ImageError::TooLarge { len });
        }
        bytes.resize(len.max(HEADER_SIZE) + IMAGE_TAIL_PADDING, 0);
        Ok(Self { buf: bytes, len })
    }

    /// True image length, excluding padding.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Transfer length: the image length rounded up to 16 bytes.
    pub fn padded_len(&self) -> u32 {
        // len <= MAX_IMAGE_SIZE, so the cast is lossless.
        wire::padded_length(self.len as u32)
    }

    /// The image bytes without padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The header as the sequence of little-endian halfwords sent in clear.
    pub fn header_halfwords(&self) -> impl Iterator<Item = u16> + '_ {
        self.buf[..HEADER_SIZE]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Little-endian word at `offset`. Bytes past the image read as zero.
    pub fn word_at(&self, offset: u32) -> u32 {
        let start = offset as usize;
        let mut raw = [0u8; wire::WORD_BYTES];
        if let Some(src) = self.buf.get(start..start + wire::WORD_BYTES) {
            raw.copy_from_slice(src);
        }
        u32::from_le_bytes(raw)
    }

    /// `(offset, word)` for every payload word, header excluded.
    pub fn payload_words(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (HEADER_SIZE as u32..self.padded_len())
            .step_by(wire::WORD_BYTES)
            .map(move |offset| (offset, self.word_at(offset)))
    }

    /// The cartridge header. Short images see zeros past their end.
    pub fn header(&self) -> CartridgeHeader {
        // buf is at least HEADER_SIZE long.
        CartridgeHeader::parse(&self.buf).unwrap_or_else(|| {
            <CartridgeHeader as zerocopy::FromZeroes>::new_zeroed()
        })
    }

    /// BLAKE3 digest of the true image bytes.
    pub fn digest(&self) -> [u8; 32] {
        *blake3::hash(self.as_bytes()).as_bytes()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
