//! Error types for the multiplexing shell.

/// Top-level error type for everything that can go wrong while running a
/// [`crate::shell::Shell`].
///
/// `Protocol` errors are always fatal: the peer violated the framing rules
/// and the shell must stop. `Io` errors are fatal unless they are
/// `Interrupted`, which the poll pump treats as benign before this type is
/// ever constructed.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Builds a protocol error, logging it at the point of construction so a
    /// log consumer sees the failure even if the caller only propagates the
    /// error upward and never prints its string.
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::error!("protocol error: {}", msg);
        Error::Protocol(msg)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
