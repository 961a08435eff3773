//! Payload phase — encrypt, checksum and stream the image past the header.

use multiboot_core::wire;

use super::{Progress, Session, SessionError, SessionState};
use crate::transport::Transport;

impl<T: Transport> Session<T> {
    /// Stream every payload word. The peer must echo the low 16 bits of each
    /// word's byte offset in the high half of the same exchange; the first
    /// mismatch aborts. Returns the number of words sent.
    pub(super) fn send_payload(&mut self, state: &mut SessionState) -> Result<u32, SessionError> {
        let total = state.padded_len();
        let interval = self.options.progress_interval;
        let mut words = 0u32;

        tracing::info!(bytes = total, "sending payload");

        for (offset, plain) in self.image.payload_words() {
            debug_assert_eq!(offset, state.cursor());
            let (offset, sealed) = state.seal_next(plain);

            let reply = self.transport.exchange(sealed)?;
            let echoed = wire::reply_high(reply);
            if echoed != offset as u16 {
                tracing::error!(
                    offset,
                    echoed = format_args!("{echoed:#06x}"),
                    "peer echoed the wrong offset"
                );
                return Err(SessionError::Integrity { offset, echoed });
            }
            tracing::trace!(offset, sealed, "payload word");
            words += 1;

            if interval != 0 && offset % interval == 0 {
                self.publish(Progress { sent: offset, total });
            }
        }

        self.publish(Progress { sent: total, total });
        tracing::info!(words, "payload sent");
        Ok(words)
    }
}
