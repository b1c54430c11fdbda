//! Byte-level transport trait.
//!
//! The [`Transport`] trait abstracts over the serial line that connects the
//! ground station to its local radio module. The XBee driver in
//! `groundlink-xbee` speaks its API-frame protocol on top of a `Transport`,
//! which lets the same driver run against a real serial port or against the
//! scripted `MockSerial` from `groundlink-test-harness`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a local radio module.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write all of `data` and flush it to the device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever bytes are available into `buf`, waiting at most
    /// `timeout` for the first byte.
    ///
    /// Returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrives before the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport. Later `send()`/`receive()` calls return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently open.
    fn is_connected(&self) -> bool;
}
