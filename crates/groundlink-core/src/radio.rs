//! Radio link abstraction and peer addressing.
//!
//! A [`RadioLink`] is the ground station's handle on its local radio module.
//! It can address one remote module by its 64-bit hardware address
//! ([`PeerAddress`]) and deliver whole messages in both directions. The
//! relay never sees serial bytes or API frames, only messages.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;

/// 64-bit hardware address of a radio module.
///
/// Stored as the 8 address octets in transmission (big-endian) order, the
/// same order the address is printed on the module label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress([u8; 8]);

impl PeerAddress {
    /// The broadcast address `000000000000FFFF`.
    pub const BROADCAST: PeerAddress = PeerAddress([0, 0, 0, 0, 0, 0, 0xFF, 0xFF]);

    /// Create an address from its 8 octets, most significant first.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        PeerAddress(bytes)
    }

    /// Create an address from its numeric value.
    pub const fn from_u64(value: u64) -> Self {
        PeerAddress(value.to_be_bytes())
    }

    /// The 8 address octets, most significant first.
    pub fn to_bytes(self) -> [u8; 8] {
        self.0
    }

    /// The numeric value of the address.
    pub fn as_u64(self) -> u64 {
        u64::from_be_bytes(self.0)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

/// Error returned when a string cannot be parsed as a [`PeerAddress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePeerAddressError(String);

impl fmt::Display for ParsePeerAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid peer address '{}': expected 16 hex digits",
            self.0
        )
    }
}

impl std::error::Error for ParsePeerAddressError {}

impl FromStr for PeerAddress {
    type Err = ParsePeerAddressError;

    /// Accepts `0013A200415BAD65`, `0x0013A200415BAD65`, and octets
    /// separated by `:`, `-` or spaces.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let digits: String = body
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | ' '))
            .collect();

        if digits.len() != 16 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParsePeerAddressError(s.to_string()));
        }

        u64::from_str_radix(&digits, 16)
            .map(PeerAddress::from_u64)
            .map_err(|_| ParsePeerAddressError(s.to_string()))
    }
}

/// A message delivered by the radio link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioMessage {
    /// Address of the module that sent the message.
    pub source: PeerAddress,
    /// Message payload. May be empty.
    pub data: Vec<u8>,
}

impl RadioMessage {
    /// First payload byte, which carries the handshake sentinels.
    pub fn first_byte(&self) -> Option<u8> {
        self.data.first().copied()
    }
}

/// Point-to-point message link through the local radio module.
#[async_trait]
pub trait RadioLink: Send {
    /// Open the connection to the local radio module.
    ///
    /// Opening an already-open link is a no-op.
    async fn open(&mut self) -> Result<()>;

    /// Deliver `data` to the module at `peer` as a single message.
    async fn send(&mut self, peer: PeerAddress, data: &[u8]) -> Result<()>;

    /// Wait for the next inbound message.
    ///
    /// `None` waits indefinitely. With `Some(timeout)`, returns
    /// [`Error::Timeout`](crate::error::Error::Timeout) when nothing arrives in time.
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<RadioMessage>;

    /// Close the connection to the local module. Idempotent.
    async fn close(&mut self) -> Result<()>;

    /// Whether [`open`](RadioLink::open) has succeeded and the link has
    /// not been closed since.
    fn is_open(&self) -> bool;
}
