//! groundlink-test-harness: mock serial lines, radio links, and control
//! clients for testing groundlink without radio hardware.
//!
//! - [`MockSerial`] -- scripted byte-level [`Transport`](groundlink_core::Transport)
//!   for exercising radio drivers
//! - [`MockRadioLink`] / [`MockRadioHandle`] -- scripted
//!   [`RadioLink`](groundlink_core::RadioLink) for exercising the relay
//! - [`MockControlClient`] -- the upstream controller's side of the TCP
//!   control channel

pub mod mock_client;
pub mod mock_radio;
pub mod mock_serial;

pub use mock_client::MockControlClient;
pub use mock_radio::{MOCK_REMOTE_ADDRESS, MockRadioHandle, MockRadioLink, SentMessage};
pub use mock_serial::MockSerial;
