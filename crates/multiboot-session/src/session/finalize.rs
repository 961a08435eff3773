//! Finalization — wait for the peer's acknowledgment, then swap CRCs.

use multiboot_core::wire::{self, cmd, reply};

use super::{Phase, Session, SessionError, SessionState};
use crate::transport::{blocking, Transport, TransportError};

impl<T: Transport> Session<T> {
    /// Returns the peer's CRC and the number of acknowledgment polls.
    ///
    /// `state` must already have the key parameters folded in.
    pub(super) async fn finalize(&mut self, state: &SessionState) -> Result<(u16, u32), SessionError> {
        tracing::info!("waiting for peer acknowledgment");
        blocking(|| self.command(cmd::ACK_REQUEST))?;

        let polls = self
            .options
            .acknowledge
            .wait_for(&mut self.transport, cmd::ACK_REQUEST, reply::ACK, &mut self.shutdown)
            .await
            .map_err(SessionError::from_wait(Phase::Acknowledge))?;
        tracing::debug!(polls, "peer acknowledged payload");

        let peer_crc = blocking(|| -> Result<u16, TransportError> {
            self.command(cmd::CRC_EXCHANGE)?;
            Ok(wire::reply_high(self.command(u32::from(state.crc()))?))
        })?;
        tracing::debug!(crc = state.crc(), peer_crc, "final CRC exchanged");

        tokio::time::sleep(self.options.settle).await;
        Ok((peer_crc, polls))
    }
}
