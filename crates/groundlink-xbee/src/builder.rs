//! XBeeBuilder -- fluent builder for constructing [`XBeeLink`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! serial line parameters, the API framing mode and the transmit-status
//! policy before the serial port is touched. The link returned by
//! [`build()`](XBeeBuilder::build) is not open yet; the port is opened by
//! [`RadioLink::open`](groundlink_core::RadioLink::open).
//!
//! # Example
//!
//! ```no_run
//! use groundlink_core::RadioLink;
//! use groundlink_xbee::{ApiMode, XBeeBuilder};
//! use std::time::Duration;
//!
//! # async fn example() -> groundlink_core::Result<()> {
//! let mut link = XBeeBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .baud_rate(115_200)
//!     .api_mode(ApiMode::Escaped)
//!     .tx_status_timeout(Duration::from_secs(2))
//!     .build()?;
//! link.open().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use groundlink_core::error::{Error, Result};
use groundlink_core::transport::Transport;
use groundlink_transport::{FlowControl, SerialConfig};

use crate::api::ApiMode;
use crate::link::XBeeLink;

/// Default wait for a Transmit Status after each send.
pub const DEFAULT_TX_STATUS_TIMEOUT: Duration = Duration::from_secs(2);

/// Fluent builder for [`XBeeLink`].
#[derive(Debug, Clone)]
pub struct XBeeBuilder {
    serial_port: Option<String>,
    serial: SerialConfig,
    api_mode: ApiMode,
    tx_status_timeout: Option<Duration>,
}

impl XBeeBuilder {
    /// Create a builder with 115200 8N1, API mode 2 and a 2 s transmit-status wait.
    pub fn new() -> Self {
        XBeeBuilder {
            serial_port: None,
            serial: SerialConfig::default(),
            api_mode: ApiMode::default(),
            tx_status_timeout: Some(DEFAULT_TX_STATUS_TIMEOUT),
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Set the baud rate. Must match the module's `BD` setting.
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.serial.baud_rate = baud;
        self
    }

    /// Set the API framing mode. Must match the module's `AP` setting.
    pub fn api_mode(mut self, mode: ApiMode) -> Self {
        self.api_mode = mode;
        self
    }

    /// Wait up to `timeout` for the module's Transmit Status after each send.
    pub fn tx_status_timeout(mut self, timeout: Duration) -> Self {
        self.tx_status_timeout = Some(timeout);
        self
    }

    /// Send with frame id 0: the module reports nothing and sends never
    /// wait for delivery.
    pub fn no_tx_status(mut self) -> Self {
        self.tx_status_timeout = None;
        self
    }

    /// Enable or disable RTS/CTS flow control (default: disabled).
    pub fn hardware_flow_control(mut self, enabled: bool) -> Self {
        self.serial.flow_control = if enabled {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };
        self
    }

    /// Drive DTR high after opening the port (default: true).
    pub fn assert_dtr(mut self, enabled: bool) -> Self {
        self.serial.assert_dtr = enabled;
        self
    }

    /// Build an [`XBeeLink`] with a caller-provided transport.
    ///
    /// This is the entry point for testing (pass a `MockSerial` from
    /// `groundlink-test-harness`). Serial line settings are ignored.
    pub fn build_with_transport(self, transport: Box<dyn Transport>) -> XBeeLink {
        XBeeLink::with_transport(transport, self.api_mode, self.tx_status_timeout)
    }

    /// Build an [`XBeeLink`] that opens the configured serial port.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub fn build(self) -> Result<XBeeLink> {
        let port = self
            .serial_port
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for build()".into()))?;

        tracing::debug!(
            port = %port,
            baud_rate = self.serial.baud_rate,
            api_mode = ?self.api_mode,
            tx_status_timeout = ?self.tx_status_timeout,
            "Configured XBee link"
        );
        Ok(XBeeLink::with_serial(
            port,
            self.serial,
            self.api_mode,
            self.tx_status_timeout,
        ))
    }
}

impl Default for XBeeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
