//! The multiboot session — one image, one transport, five phases.
//!
//! Phases run strictly in order over a single full-duplex link:
//!
//!   handshake → header → key exchange → payload → finalization
//!
//! Every word exchanged is part of a total order the peer's BIOS tracks;
//! nothing here may be reordered, overlapped or retried. Any failure ends
//! the session, and the transport is dropped with it on every path.

mod finalize;
mod handshake;
mod keys;
mod payload;

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use multiboot_core::config::SessionConfig;
use multiboot_core::{Image, WireError};

use crate::poll::{Poller, Shutdown, WaitError};
use crate::transport::{blocking, Transport, TransportError};

use keys::SessionState;

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Wait for the peer to power on.
    pub handshake: Poller,
    /// Wait for the peer to acknowledge the payload.
    pub acknowledge: Poller,
    /// Treat a final CRC disagreement as a failure.
    pub verify_crc: bool,
    /// Publish progress every N payload bytes. 0 disables.
    pub progress_interval: u32,
    /// Hold the link after the final exchange so the peer can jump to the image.
    pub settle: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            handshake: Poller::new(config.handshake_timeout()),
            acknowledge: Poller::new(config.ack_timeout()),
            verify_crc: config.verify_crc,
            progress_interval: config.progress_interval,
            settle: config.settle(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// Payload bytes sent so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub sent: u32,
    pub total: u32,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        f64::from(self.sent) * 100.0 / f64::from(self.total)
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

/// Outcome of a completed session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub image_len: usize,
    pub padded_len: u32,
    pub words_sent: u32,
    /// CRC we computed and sent.
    pub crc: u16,
    /// CRC the peer reported back.
    pub peer_crc: u16,
    pub crc_matched: bool,
    pub handshake_polls: u32,
    pub ack_polls: u32,
    pub elapsed_ms: u64,
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct Session<T: Transport> {
    transport: T,
    image: Image,
    options: SessionOptions,
    shutdown: Shutdown,
    progress: Option<mpsc::UnboundedSender<Progress>>,
}

impl<T: Transport> Session<T> {
    /// Take ownership of an open transport and a loaded image.
    pub fn new(transport: T, image: Image, options: SessionOptions) -> Self {
        Self {
            transport,
            image,
            options,
            shutdown: Shutdown::never(),
            progress: None,
        }
    }

    /// Allow the waiting loops to be interrupted.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Publish payload progress on `tx`.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<Progress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Run every phase to completion. The transport is released when this returns.
    pub async fn run(mut self) -> Result<SessionReport, SessionError> {
        let started = Instant::now();
        tracing::info!(
            image_len = self.image.len(),
            padded_len = self.image.padded_len(),
            "multiboot session starting"
        );

        let handshake_polls = self.handshake().await?;

        // Header through payload is one uninterrupted run of exchanges.
        let (mut state, words_sent) = blocking(|| -> Result<_, SessionError> {
            self.send_header()?;
            let mut state = self.exchange_keys()?;
            let words = self.send_payload(&mut state)?;
            Ok((state, words))
        })?;
        state.fold_keys();
        let (peer_crc, ack_polls) = self.finalize(&state).await?;

        let crc = state.crc();
        let crc_matched = crc == peer_crc;
        if !crc_matched {
            tracing::warn!(crc, peer_crc, "peer computed a different CRC");
            if self.options.verify_crc {
                return Err(SessionError::CrcMismatch {
                    local: crc,
                    peer: peer_crc,
                });
            }
        }

        let report = SessionReport {
            image_len: self.image.len(),
            padded_len: state.padded_len(),
            words_sent,
            crc,
            peer_crc,
            crc_matched,
            handshake_polls,
            ack_polls,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            words_sent,
            crc,
            peer_crc,
            elapsed_ms = report.elapsed_ms,
            "multiboot session complete"
        );
        Ok(report)
    }

    /// One command word. Logged, never validated here.
    fn command(&mut self, word: u32) -> Result<u32, TransportError> {
        let reply = self.transport.exchange(word)?;
        tracing::debug!(
            word = format_args!("{word:#06x}"),
            reply = format_args!("{reply:#010x}"),
            "command"
        );
        Ok(reply)
    }

    fn publish(&self, progress: Progress) {
        tracing::debug!(sent = progress.sent, total = progress.total, "payload progress");
        if let Some(tx) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(progress);
        }
    }
}

// ── Waiting points ────────────────────────────────────────────────────────────

/// The two places a session blocks on the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Handshake,
    Acknowledge,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Handshake => "handshake",
            Phase::Acknowledge => "acknowledgment",
        })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    PeerRejected(#[from] WireError),

    #[error(
        "transmission error at byte 0x{offset:x}: peer echoed 0x{echoed:04x}, expected 0x{:04x}",
        .offset & 0xFFFF
    )]
    Integrity { offset: u32, echoed: u16 },

    #[error("gave up waiting for the peer during {phase} after {waited:?}")]
    TimedOut { phase: Phase, waited: Duration },

    #[error("cancelled during {phase}")]
    Cancelled { phase: Phase },

    #[error("final CRC mismatch: sent 0x{local:04x}, peer computed 0x{peer:04x}")]
    CrcMismatch { local: u16, peer: u16 },
}

impl SessionError {
    fn from_wait(phase: Phase) -> impl FnOnce(WaitError) -> SessionError {
        move |err| match err {
            WaitError::Transport(e) => SessionError::Transport(e),
            WaitError::TimedOut { waited, .. } => SessionError::TimedOut { phase, waited },
            WaitError::Cancelled { .. } => SessionError::Cancelled { phase },
        }
    }
}
