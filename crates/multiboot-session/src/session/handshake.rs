//! Handshake and header phases.

use multiboot_core::wire::{cmd, reply, HEADER_SIZE};

use super::{Phase, Session, SessionError};
use crate::transport::Transport;

impl<T: Transport> Session<T> {
    /// Poll until the peer reports ready. Returns the number of polls it took.
    pub(super) async fn handshake(&mut self) -> Result<u32, SessionError> {
        tracing::info!(
            timeout = ?self.options.handshake.timeout(),
            "waiting for peer; connect the link cable and power it on"
        );

        let polls = self
            .options
            .handshake
            .wait_for(&mut self.transport, cmd::HANDSHAKE, reply::READY, &mut self.shutdown)
            .await
            .map_err(SessionError::from_wait(Phase::Handshake))?;
        tracing::info!(polls, "handshake successful");
        Ok(polls)
    }

    /// Request boot mode, then send the first 0xC0 image bytes in clear, one
    /// halfword per exchange.
    pub(super) fn send_header(&mut self) -> Result<(), SessionError> {
        // The reply is not checked here; the key exchange catches a confused peer.
        self.command(cmd::BOOT_MODE)?;
        for (index, half) in self.image.header_halfwords().enumerate() {
            self.transport.exchange(u32::from(half))?;
            tracing::trace!(offset = index * 2, half, "header");
        }
        self.command(cmd::HEADER_END)?;
        tracing::debug!(bytes = HEADER_SIZE, "header sent");
        Ok(())
    }
}
