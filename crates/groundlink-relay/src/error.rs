//! Relay-level error taxonomy.
//!
//! [`groundlink_core::Error`] describes what went wrong on a single link or
//! socket. [`RelayError`] adds where it happened, which decides whether the
//! relay keeps going: setup, handshake and radio-link loss are fatal, a
//! control-connection failure ends one session, a failed radio send drops
//! one frame.

use std::fmt;

use groundlink_core::Error;

/// The handshake step that was waiting when something went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// Opening the radio link, before any message is exchanged.
    Open,
    /// Waiting for the peer's INITIALIZATION_REQUEST.
    InitRequest,
    /// Sending INITIALIZATION_REQUEST_ACK to the peer.
    InitRequestAck,
    /// Waiting for the peer's final ACK.
    Ack,
}

impl fmt::Display for HandshakeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeStage::Open => "link open",
            HandshakeStage::InitRequest => "initialization request",
            HandshakeStage::InitRequestAck => "initialization request ack",
            HandshakeStage::Ack => "ack",
        };
        f.write_str(name)
    }
}

/// Why the radio handshake did not reach `Ready`.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The peer's message started with the wrong sentinel.
    #[error("expected 0x{expected:02X} during {stage}, got 0x{got:02X}")]
    UnexpectedSentinel {
        stage: HandshakeStage,
        expected: u8,
        got: u8,
    },

    /// The peer sent a message with no payload.
    #[error("empty radio message during {stage}")]
    EmptyMessage { stage: HandshakeStage },

    /// Nothing arrived within the handshake timeout.
    #[error("timed out during {stage}")]
    Timeout { stage: HandshakeStage },

    /// The radio link itself failed.
    #[error("radio error during {stage}: {source}")]
    Radio {
        stage: HandshakeStage,
        #[source]
        source: Error,
    },

    /// `perform()` was called out of order.
    #[error("handshake cannot run from state {0}")]
    InvalidState(&'static str),
}

impl HandshakeError {
    /// The stage the handshake was in, if it got as far as a stage.
    pub fn stage(&self) -> Option<HandshakeStage> {
        match self {
            HandshakeError::UnexpectedSentinel { stage, .. }
            | HandshakeError::EmptyMessage { stage }
            | HandshakeError::Timeout { stage }
            | HandshakeError::Radio { stage, .. } => Some(*stage),
            HandshakeError::InvalidState(_) => None,
        }
    }
}

/// Errors surfaced by the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Radio open, listener bind or another startup step failed.
    #[error("setup failed: {0}")]
    Setup(#[source] Error),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configuration file is not valid TOML for [`RelayConfig`](crate::RelayConfig).
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The radio handshake failed.
    #[error("radio handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Reading from or writing to the control client failed, including
    /// the client disconnecting.
    #[error("control connection failed: {0}")]
    ControlIo(#[source] Error),

    /// One frame could not be delivered over the radio.
    #[error("radio send failed: {0}")]
    RadioSend(#[source] Error),

    /// The radio link is gone.
    #[error("radio link lost: {0}")]
    RadioLinkLost(#[source] Error),
}

impl RelayError {
    /// Returns `true` for errors that stop the relay rather than a session
    /// or a single frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RelayError::ControlIo(_) | RelayError::RadioSend(_))
    }

    /// Classify a radio send failure: link-down errors are fatal, the rest
    /// only cost the frame being sent.
    pub fn from_radio_send(error: Error) -> Self {
        if error.is_link_down() {
            RelayError::RadioLinkLost(error)
        } else {
            RelayError::RadioSend(error)
        }
    }
}

/// A convenience `Result` alias using [`RelayError`].
pub type RelayResult<T> = std::result::Result<T, RelayError>;
