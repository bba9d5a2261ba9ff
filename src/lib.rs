//! A single-threaded, poll()-driven engine that multiplexes an arbitrary
//! number of logical byte-stream channels over one duplex transport.
//!
//! Each channel is bound to a local file descriptor and a direction; the
//! shell arbitrates reads and writes across all of them, enforces
//! per-channel flow-control windows, and frames everything crossing the
//! transport as one of three message kinds: `DATA`, `WINDOW`, and `CLOSE`.
//! See [`shell::Shell`] for the event loop and [`wire`] for the framing.

pub mod channel;
pub mod error;
pub mod ringbuf;
pub mod shell;
pub mod wire;

pub use channel::{Channel, Dir};
pub use error::{Error, Result};
pub use ringbuf::Ringbuf;
pub use shell::{DefaultHandler, MessageHandler, Shell, FROM_PEER, NR_SPECIAL_CH, TO_PEER};
