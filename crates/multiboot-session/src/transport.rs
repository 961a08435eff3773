//! The word-exchange seam between the session and the link hardware.

use std::path::PathBuf;

/// A full-duplex link that swaps one 32-bit word per call.
///
/// Both directions are most-significant byte first. There is no framing and
/// no retry: an `Err` ends the session. Implementations are used by exactly
/// one session and released when it is dropped.
pub trait Transport: Send {
    fn exchange(&mut self, word: u32) -> Result<u32, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn exchange(&mut self, word: u32) -> Result<u32, TransportError> {
        (**self).exchange(word)
    }
}

/// Run link exchanges from async code.
///
/// Exchanges block the calling thread. On a multi-thread runtime the worker
/// is handed off with `block_in_place` so other tasks keep running; a
/// current-thread runtime cannot do that and runs `f` directly.
pub(crate) fn blocking<R>(f: impl FnOnce() -> R) -> R {
    use tokio::runtime::{Handle, RuntimeFlavor};

    match Handle::try_current().map(|h| h.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open link device {}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to configure link device ({setting})")]
    Configure {
        setting: &'static str,
        source: std::io::Error,
    },

    #[error("link exchange of word 0x{word:08x} failed")]
    Exchange {
        word: u32,
        source: std::io::Error,
    },
}
