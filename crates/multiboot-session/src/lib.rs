//! multiboot-session — the multiboot protocol state machine over a
//! word-exchange transport, plus the spidev transport used on real hardware.

pub mod poll;
pub mod session;
#[cfg(target_os = "linux")]
pub mod spi;
pub mod transport;

pub use poll::{Poller, Shutdown};
pub use session::{Phase, Progress, Session, SessionError, SessionOptions, SessionReport};
#[cfg(target_os = "linux")]
pub use spi::SpiTransport;
pub use transport::{Transport, TransportError};
