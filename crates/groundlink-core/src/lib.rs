//! groundlink-core: Core traits, protocol constants, and error definitions.
//!
//! This crate defines the abstractions the rest of the workspace is built
//! on. The relay depends only on these types, so it can run against the
//! XBee driver, a mock radio, or any other link implementation.
//!
//! # Key types
//!
//! - [`RadioLink`] -- message-level link to a remote radio peer
//! - [`PeerAddress`] -- 64-bit hardware address of a radio module
//! - [`Transport`] -- byte-level channel to the local radio module
//! - [`RelayEvent`] -- relay activity notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod protocol;
pub mod radio;
pub mod transport;

pub use error::{Error, Result};
pub use events::RelayEvent;
pub use radio::{ParsePeerAddressError, PeerAddress, RadioLink, RadioMessage};
pub use transport::Transport;
