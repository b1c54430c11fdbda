//! Error types shared by every groundlink crate.
//!
//! Transport, radio, and control-channel operations all return
//! [`Result<T>`], which uses [`Error`] as the error type. The relay crate
//! layers its own session-level taxonomy on top of these variants.

/// The error type for transport and radio operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port, TCP listener or socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (bad API frame checksum, failed delivery status).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for data from the radio or a client.
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid parameter was passed (zero frame size, malformed peer address).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An operation was called in a state that does not allow it, such as
    /// listening twice on the same control server.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The link or connection has not been opened, or was already closed.
    #[error("not connected")]
    NotConnected,

    /// The peer closed the connection or the device went away.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` when the underlying link is gone and retrying on the
    /// same handle cannot succeed.
    pub fn is_link_down(&self) -> bool {
        matches!(self, Error::ConnectionLost | Error::NotConnected)
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_their_detail() {
        let cases = [
            (Error::Transport("port busy".into()), "transport error: port busy"),
            (Error::Protocol("bad checksum".into()), "protocol error: bad checksum"),
            (
                Error::InvalidState("already listening".into()),
                "invalid state: already listening",
            ),
        ];
        for (error, text) in cases {
            assert_eq!(error.to_string(), text);
        }
    }

    #[test]
    fn unplugged_device_io_error_converts() {
        let e: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged").into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().ends_with("unplugged"));
        // Only the explicit variants count as link loss.
        assert!(!e.is_link_down());
    }

    #[test]
    fn link_down_classification() {
        assert!(Error::ConnectionLost.is_link_down());
        assert!(Error::NotConnected.is_link_down());
        assert!(!Error::Timeout.is_link_down());
        assert!(!Error::Protocol("delivery failed".into()).is_link_down());
    }
}
