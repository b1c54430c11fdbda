//! XBeeLink -- [`RadioLink`] over an XBee module in API mode.
//!
//! Outbound messages become 64-bit Transmit Request frames addressed to the
//! peer. When a transmit-status timeout is configured, each send carries a
//! non-zero frame id and waits for the matching Transmit Status, so a
//! delivery failure reported by the module surfaces as an error instead of
//! silently dropping the message. Receive Packets that show up while a send
//! is waiting are queued and handed out by later `receive()` calls.

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use groundlink_core::error::{Error, Result};
use groundlink_core::radio::{PeerAddress, RadioLink, RadioMessage};
use groundlink_core::transport::Transport;
use groundlink_transport::{SerialConfig, SerialTransport};

use crate::api::{self, ApiFrame, ApiMode, DecodeResult};

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 256;

/// Transport poll interval while waiting without a deadline.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Where the link gets its transport from on `open()`.
enum Backing {
    /// Serial port opened on `open()` and dropped on `close()`.
    Serial { path: String, config: SerialConfig },
    /// Caller-provided transport, used as-is.
    Injected,
}

/// An XBee module driven through its serial API.
///
/// Construct with [`XBeeBuilder`](crate::builder::XBeeBuilder).
pub struct XBeeLink {
    transport: Option<Box<dyn Transport>>,
    backing: Backing,
    mode: ApiMode,
    tx_status_timeout: Option<Duration>,
    rx_buf: BytesMut,
    inbox: VecDeque<RadioMessage>,
    next_frame_id: u8,
    open: bool,
}

impl XBeeLink {
    pub(crate) fn with_serial(
        path: String,
        config: SerialConfig,
        mode: ApiMode,
        tx_status_timeout: Option<Duration>,
    ) -> Self {
        Self::new(
            None,
            Backing::Serial { path, config },
            mode,
            tx_status_timeout,
        )
    }

    pub(crate) fn with_transport(
        transport: Box<dyn Transport>,
        mode: ApiMode,
        tx_status_timeout: Option<Duration>,
    ) -> Self {
        Self::new(Some(transport), Backing::Injected, mode, tx_status_timeout)
    }

    fn new(
        transport: Option<Box<dyn Transport>>,
        backing: Backing,
        mode: ApiMode,
        tx_status_timeout: Option<Duration>,
    ) -> Self {
        XBeeLink {
            transport,
            backing,
            mode,
            tx_status_timeout,
            rx_buf: BytesMut::with_capacity(READ_CHUNK),
            inbox: VecDeque::new(),
            next_frame_id: 1,
            open: false,
        }
    }

    /// Serial framing mode this link expects the module to use.
    pub fn api_mode(&self) -> ApiMode {
        self.mode
    }

    /// How long a send waits for its Transmit Status, if at all.
    pub fn tx_status_timeout(&self) -> Option<Duration> {
        self.tx_status_timeout
    }

    /// Frame ids cycle through 1..=255; 0 would suppress the status frame.
    fn allocate_frame_id(&mut self) -> u8 {
        let id = self.next_frame_id;
        self.next_frame_id = if id == u8::MAX { 1 } else { id + 1 };
        id
    }

    /// Read the next complete API frame, dropping noise and corrupt frames.
    ///
    /// With a deadline, returns [`Error::Timeout`] once it passes.
    async fn read_frame(&mut self, deadline: Option<Instant>) -> Result<ApiFrame> {
        loop {
            match api::decode_frame(&self.rx_buf, self.mode) {
                DecodeResult::Frame(frame, consumed) => {
                    self.rx_buf.advance(consumed);
                    tracing::trace!(frame = ?frame, "API frame received");
                    return Ok(frame);
                }
                DecodeResult::Discard(n) => {
                    tracing::debug!(discarded = n, "Discarding bytes from radio");
                    self.rx_buf.advance(n);
                    continue;
                }
                DecodeResult::Incomplete => {}
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    deadline - now
                }
                None => IDLE_POLL,
            };

            let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
            let mut chunk = [0u8; READ_CHUNK];
            match transport.receive(&mut chunk, wait).await {
                Ok(n) => self.rx_buf.extend_from_slice(&chunk[..n]),
                Err(Error::Timeout) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for the Transmit Status carrying `frame_id`.
    async fn await_status(&mut self, frame_id: u8, peer: PeerAddress, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let frame = self.read_frame(Some(deadline)).await.inspect_err(|e| {
                if matches!(e, Error::Timeout) {
                    tracing::warn!(frame_id, peer = %peer, "No transmit status from radio");
                }
            })?;

            match frame {
                ApiFrame::TransmitStatus {
                    frame_id: id,
                    retry_count,
                    delivery_status,
                    ..
                } if id == frame_id => {
                    if delivery_status == 0 {
                        tracing::trace!(frame_id, retry_count, "Transmit acknowledged");
                        return Ok(());
                    }
                    let reason = api::delivery_status_text(delivery_status);
                    tracing::warn!(
                        frame_id,
                        peer = %peer,
                        retry_count,
                        status = delivery_status,
                        reason,
                        "Radio reported delivery failure"
                    );
                    return Err(Error::Protocol(format!(
                        "delivery to {peer} failed: {reason} (0x{delivery_status:02X})"
                    )));
                }
                ApiFrame::TransmitStatus { frame_id: id, .. } => {
                    tracing::debug!(frame_id = id, waiting_for = frame_id, "Stale transmit status");
                }
                ApiFrame::ReceivePacket { source, data, .. } => {
                    self.inbox.push_back(RadioMessage { source, data });
                }
                other => {
                    tracing::debug!(frame_type = other.frame_type(), "Ignoring API frame");
                }
            }
        }
    }
}

#[async_trait]
impl RadioLink for XBeeLink {
    async fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }

        match &self.backing {
            Backing::Serial { path, config } => {
                let transport = SerialTransport::open_with_config(path, config.clone()).await?;
                self.transport = Some(Box::new(transport));
            }
            Backing::Injected => {
                let connected = self
                    .transport
                    .as_ref()
                    .is_some_and(|t| t.is_connected());
                if !connected {
                    return Err(Error::NotConnected);
                }
            }
        }

        self.rx_buf.clear();
        self.inbox.clear();
        self.open = true;
        tracing::info!(api_mode = ?self.mode, "XBee link open");
        Ok(())
    }

    async fn send(&mut self, peer: PeerAddress, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(Error::NotConnected);
        }

        let frame_id = match self.tx_status_timeout {
            Some(_) => self.allocate_frame_id(),
            None => 0,
        };
        let frame = ApiFrame::TransmitRequest {
            frame_id,
            dest: peer,
            data: data.to_vec(),
        };
        let bytes = api::encode_frame(&frame, self.mode)?;

        tracing::trace!(peer = %peer, frame_id, len = data.len(), "Transmit request");
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        transport.send(&bytes).await?;

        match self.tx_status_timeout {
            Some(timeout) => self.await_status(frame_id, peer, timeout).await,
            None => Ok(()),
        }
    }

    async fn receive(&mut self, timeout: Option<Duration>) -> Result<RadioMessage> {
        if !self.open {
            return Err(Error::NotConnected);
        }
        if let Some(message) = self.inbox.pop_front() {
            return Ok(message);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.read_frame(deadline).await? {
                ApiFrame::ReceivePacket { source, data, .. } => {
                    tracing::debug!(source = %source, len = data.len(), "Radio message received");
                    return Ok(RadioMessage { source, data });
                }
                ApiFrame::TransmitStatus {
                    frame_id,
                    delivery_status,
                    ..
                } => {
                    tracing::debug!(frame_id, status = delivery_status, "Unsolicited transmit status");
                }
                other => {
                    tracing::debug!(frame_type = other.frame_type(), "Ignoring API frame");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.rx_buf.clear();
        self.inbox.clear();

        let result = match self.transport.as_mut() {
            Some(transport) => transport.close().await,
            None => Ok(()),
        };
        if matches!(self.backing, Backing::Serial { .. }) {
            self.transport = None;
        }
        tracing::info!("XBee link closed");
        result
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
