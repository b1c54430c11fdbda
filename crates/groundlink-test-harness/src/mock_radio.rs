//! Scripted radio link for testing the relay.
//!
//! [`MockRadioLink::new`] returns the link together with a
//! [`MockRadioHandle`]. The link is moved into the code under test; the
//! handle stays with the test to inject inbound messages, queue failures,
//! and observe every message the relay sends.
//!
//! # Example
//!
//! ```
//! use groundlink_test_harness::MockRadioLink;
//!
//! let (link, handle) = MockRadioLink::new();
//! // The peer opens the handshake.
//! handle.push_message(&[0xFC]);
//! handle.push_message(&[0xFF]);
//! // ... hand `link` to the relay ...
//! # drop(link);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use groundlink_core::error::{Error, Result};
use groundlink_core::radio::{PeerAddress, RadioLink, RadioMessage};

/// Source address used for messages pushed without an explicit source.
pub const MOCK_REMOTE_ADDRESS: PeerAddress = PeerAddress::from_u64(0x0013_A200_415B_AD65);

/// A message the link under test delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub peer: PeerAddress,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct Shared {
    open: bool,
    open_calls: usize,
    close_calls: usize,
    open_failure: Option<Error>,
    send_failures: VecDeque<Error>,
    sent_log: Vec<SentMessage>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory [`RadioLink`]. See the module docs.
#[derive(Debug)]
pub struct MockRadioLink {
    inbound_rx: mpsc::UnboundedReceiver<RadioMessage>,
    sent_tx: mpsc::UnboundedSender<SentMessage>,
    shared: Arc<Mutex<Shared>>,
}

/// Test-side controls for a [`MockRadioLink`].
#[derive(Debug)]
pub struct MockRadioHandle {
    inbound_tx: mpsc::UnboundedSender<RadioMessage>,
    sent_rx: mpsc::UnboundedReceiver<SentMessage>,
    shared: Arc<Mutex<Shared>>,
}

impl MockRadioLink {
    /// Create a closed link and its handle.
    pub fn new() -> (MockRadioLink, MockRadioHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));

        let link = MockRadioLink {
            inbound_rx,
            sent_tx,
            shared: Arc::clone(&shared),
        };
        let handle = MockRadioHandle {
            inbound_tx,
            sent_rx,
            shared,
        };
        (link, handle)
    }
}

impl MockRadioHandle {
    /// Deliver a message from [`MOCK_REMOTE_ADDRESS`].
    pub fn push_message(&self, data: &[u8]) {
        self.push_message_from(MOCK_REMOTE_ADDRESS, data);
    }

    /// Deliver a message from `source`.
    pub fn push_message_from(&self, source: PeerAddress, data: &[u8]) {
        // The link may already be gone; the message is simply lost then.
        let _ = self.inbound_tx.send(RadioMessage {
            source,
            data: data.to_vec(),
        });
    }

    /// Make the next `send()` fail with `error`. Failures queue up in order.
    pub fn fail_next_send(&self, error: Error) {
        lock(&self.shared).send_failures.push_back(error);
    }

    /// Make the next `open()` fail with `error`.
    pub fn fail_open(&self, error: Error) {
        lock(&self.shared).open_failure = Some(error);
    }

    /// Wait up to `timeout` for the next message the link delivers.
    pub async fn next_sent(&mut self, timeout: Duration) -> Option<SentMessage> {
        tokio::time::timeout(timeout, self.sent_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Whether the link has been dropped, so nothing more can be sent.
    pub fn link_dropped(&self) -> bool {
        self.sent_rx.is_closed()
    }

    /// Snapshot of every message delivered so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.shared).sent_log.clone()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.shared).open
    }

    /// Number of successful `open()` calls.
    pub fn open_calls(&self) -> usize {
        lock(&self.shared).open_calls
    }

    /// Number of `close()` calls that actually closed an open link.
    pub fn close_calls(&self) -> usize {
        lock(&self.shared).close_calls
    }
}

#[async_trait]
impl RadioLink for MockRadioLink {
    async fn open(&mut self) -> Result<()> {
        let mut shared = lock(&self.shared);
        if let Some(error) = shared.open_failure.take() {
            return Err(error);
        }
        if !shared.open {
            shared.open = true;
            shared.open_calls += 1;
        }
        Ok(())
    }

    async fn send(&mut self, peer: PeerAddress, data: &[u8]) -> Result<()> {
        let message = {
            let mut shared = lock(&self.shared);
            if !shared.open {
                return Err(Error::NotConnected);
            }
            if let Some(error) = shared.send_failures.pop_front() {
                return Err(error);
            }
            let message = SentMessage {
                peer,
                data: data.to_vec(),
            };
            shared.sent_log.push(message.clone());
            message
        };

        tracing::trace!(peer = %peer, data = ?data, "Mock radio send");
        let _ = self.sent_tx.send(message);
        Ok(())
    }

    async fn receive(&mut self, timeout: Option<Duration>) -> Result<RadioMessage> {
        if !lock(&self.shared).open {
            return Err(Error::NotConnected);
        }

        let next = match timeout {
            Some(t) => tokio::time::timeout(t, self.inbound_rx.recv())
                .await
                .map_err(|_| Error::Timeout)?,
            None => self.inbound_rx.recv().await,
        };
        // The handle was dropped: nothing can ever arrive again.
        next.ok_or(Error::ConnectionLost)
    }

    async fn close(&mut self) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.open {
            shared.open = false;
            shared.close_calls += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.shared).open
    }
}
