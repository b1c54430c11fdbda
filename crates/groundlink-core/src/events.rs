//! Relay event types.
//!
//! The relay publishes these through a `tokio::sync::broadcast` channel so
//! operator displays and tests can follow what the relay is doing without
//! scraping logs. Delivery is best effort: a lagging subscriber misses
//! events rather than slowing the relay down.

use std::net::SocketAddr;

/// An event emitted by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// The radio link is open and initialization has finished.
    RadioReady {
        /// `false` when the handshake was skipped by configuration.
        handshake: bool,
    },

    /// The control channel is bound and accepting clients.
    Listening {
        /// Bound address; resolves port 0 to the ephemeral port.
        addr: SocketAddr,
    },

    /// A control client connected and was sent the READY byte.
    ClientConnected {
        /// Remote address of the client.
        addr: SocketAddr,
    },

    /// The control client went away.
    ClientDisconnected {
        /// Remote address of the client.
        addr: SocketAddr,
        /// Bytes of the unfinished frame that were thrown away.
        discarded: usize,
    },

    /// A frame was handed to the radio and accepted.
    FrameSent {
        /// Per-process frame sequence number, starting at 0.
        seq: u64,
        /// Frame length in bytes.
        len: usize,
    },

    /// A frame could not be delivered and was dropped.
    FrameDropped {
        /// Per-process frame sequence number.
        seq: u64,
        /// Display form of the radio error.
        reason: String,
    },
}
