//! Scripted serial line for testing radio drivers.
//!
//! [`MockSerial`] implements [`Transport`] over an in-memory byte queue.
//! Bytes the "module" emits unprompted are queued with
//! [`queue_inbound`](MockSerial::queue_inbound); replies to specific writes
//! are scripted with [`expect`](MockSerial::expect).
//!
//! # Example
//!
//! ```
//! use groundlink_test_harness::MockSerial;
//!
//! let mut serial = MockSerial::new();
//! // A Receive Packet arrives before anything is written.
//! serial.queue_inbound(&[0x7E, 0x00, 0x0D, 0x90]);
//! // When the driver writes this request, the module answers with a status frame.
//! serial.expect(&[0x7E, 0x00, 0x01], &[0x7E, 0x00, 0x07, 0x8B]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use groundlink_core::error::{Error, Result};
use groundlink_core::transport::Transport;

#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    response: Vec<u8>,
}

/// In-memory [`Transport`] with scripted inbound bytes.
///
/// Writes are always recorded. While scripted expectations remain, each
/// write must match the next one exactly and its response is appended to
/// the inbound queue; once they are exhausted, writes are accepted silently.
/// A `receive()` on an empty queue waits out the full timeout and returns
/// [`Error::Timeout`], like a quiet serial line.
#[derive(Debug)]
pub struct MockSerial {
    inbound: VecDeque<u8>,
    expectations: VecDeque<Expectation>,
    /// Upper bound on bytes returned per `receive()`, to exercise partial reads.
    chunk_size: usize,
    connected: bool,
    sent_log: Vec<Vec<u8>>,
}

impl MockSerial {
    /// Create an open mock line with nothing queued.
    pub fn new() -> Self {
        MockSerial {
            inbound: VecDeque::new(),
            expectations: VecDeque::new(),
            chunk_size: usize::MAX,
            connected: true,
            sent_log: Vec::new(),
        }
    }

    /// Queue bytes that the module emits without being asked.
    pub fn queue_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    /// Script a reply: when `request` is written, `response` becomes readable.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Limit how many bytes a single `receive()` may return.
    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size.max(1);
    }

    /// Every write so far, one entry per `send()` call.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Scripted replies not yet triggered.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Inbound bytes not yet read.
    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    /// Simulate the device being unplugged (or plugged back in).
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockSerial {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockSerial {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.sent_log.push(data.to_vec());

        if let Some(expectation) = self.expectations.pop_front() {
            if data != expectation.request.as_slice() {
                return Err(Error::Protocol(format!(
                    "unexpected write: expected {:02X?}, got {:02X?}",
                    expectation.request, data
                )));
            }
            self.inbound.extend(expectation.response);
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if self.inbound.is_empty() {
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout);
        }

        let n = self.inbound.len().min(buf.len()).min(self.chunk_size);
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
