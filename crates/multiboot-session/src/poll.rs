//! Waiting for the peer.
//!
//! Two points in the protocol block until the peer reaches a state: power-on
//! (handshake) and end-of-payload acknowledgment. Both are the same loop:
//! exchange a fixed word, sleep one poll interval, stop when the reply's high
//! half matches. The loop is unbounded unless a timeout is set, and can be
//! interrupted between iterations by a shutdown signal.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use multiboot_core::wire::{self, POLL_INTERVAL};

use crate::transport::{blocking, Transport, TransportError};

// ── Shutdown ─────────────────────────────────────────────────────────────────

/// Cancellation signal checked between poll iterations.
#[derive(Debug, Default)]
pub struct Shutdown(Option<broadcast::Receiver<()>>);

impl Shutdown {
    pub fn new(rx: broadcast::Receiver<()>) -> Self {
        Self(Some(rx))
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self(None)
    }

    /// Resolves once shutdown is requested. A closed channel counts as a request.
    async fn requested(&mut self) {
        match &mut self.0 {
            Some(rx) => {
                let _ = rx.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

// ── Poller ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    interval: Duration,
    timeout: Option<Duration>,
}

impl Poller {
    /// Poll at the protocol's fixed interval. `None` waits forever.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            interval: POLL_INTERVAL,
            timeout,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Exchange `word` until the reply's high half equals `expected`.
    ///
    /// Every exchange is followed by a full interval, including the one that
    /// succeeds. Shutdown is only observed while another poll is pending, so
    /// a matched reply always returns `Ok`. Returns the number of exchanges
    /// made.
    pub async fn wait_for<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        word: u32,
        expected: u16,
        shutdown: &mut Shutdown,
    ) -> Result<u32, WaitError> {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            let reply = blocking(|| transport.exchange(word))?;
            polls += 1;

            let seen = wire::reply_high(reply);
            if seen == expected {
                // The peer has moved on; a late shutdown must not undo that.
                tokio::time::sleep(self.interval).await;
                return Ok(polls);
            }
            tracing::trace!(polls, seen, expected, "peer not ready");

            tokio::select! {
                biased;
                _ = shutdown.requested() => return Err(WaitError::Cancelled { polls }),
                _ = tokio::time::sleep(self.interval) => {}
            }

            if let Some(limit) = self.timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(WaitError::TimedOut { waited, polls });
                }
            }
        }
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(None)
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no reply after {polls} polls ({waited:?})")]
    TimedOut { waited: Duration, polls: u32 },

    #[error("cancelled after {polls} polls")]
    Cancelled { polls: u32 },
}

// ── Tests ────────────────────────────────────────────────────────────────────
