//! Serial transport to the local radio module.
//!
//! XBee and DigiMesh modules attach over a USB-serial bridge (or a bare
//! UART) and talk at 115200 baud, 8N1, without flow control by default.
//! [`SerialTransport`] implements [`Transport`] on top of `tokio-serial`.
//!
//! # Example
//!
//! ```no_run
//! use groundlink_transport::SerialTransport;
//! use groundlink_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> groundlink_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 115_200).await?;
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use groundlink_core::error::{Error, Result};
use groundlink_core::protocol::DEFAULT_BAUD_RATE;
use groundlink_core::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

/// Serial line settings. Framing is always 8N1, the only framing XBee
/// API mode is specified for.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate; must match the module's `BD` setting.
    pub baud_rate: u32,
    /// Hardware flow control needs the module's CTS/RTS pins enabled.
    pub flow_control: FlowControl,
    /// Drive DTR high after opening. XBee modules with pin sleep enabled
    /// sleep while DTR is de-asserted.
    pub assert_dtr: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            flow_control: FlowControl::None,
            assert_dtr: true,
        }
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlowControl {
    #[default]
    None,
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// Serial port [`Transport`] to a locally attached radio module.
pub struct SerialTransport {
    port: Option<SerialStream>,
    /// Device path, kept for log fields.
    path: String,
}

impl SerialTransport {
    /// Open `path` at `baud_rate` with the remaining settings at their
    /// defaults (8N1, no flow control, DTR asserted).
    pub async fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..Default::default()
        };
        Self::open_with_config(path, config).await
    }

    /// Open `path` with explicit line settings.
    pub async fn open_with_config(path: &str, config: SerialConfig) -> Result<Self> {
        tracing::debug!(
            port = %path,
            baud_rate = config.baud_rate,
            flow_control = ?config.flow_control,
            "Opening radio serial port"
        );

        let mut stream = tokio_serial::new(path, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(config.flow_control.into())
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %path, error = %e, "Failed to open radio serial port");
                Error::Transport(format!("failed to open serial port {}: {}", path, e))
            })?;

        if let Err(e) = stream.write_data_terminal_ready(config.assert_dtr) {
            tracing::warn!(port = %path, error = %e, "Failed to set DTR");
        }

        tracing::info!(port = %path, baud_rate = config.baud_rate, "Radio serial port opened");

        Ok(Self {
            port: Some(stream),
            path: path.to_string(),
        })
    }

    /// Device path this transport was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(port = %self.path, bytes = data.len(), data = ?data, "Serial write");

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.path, error = %e, "Serial write failed");
            map_io_error(e)
        })?;
        port.flush().await.map_err(|e| {
            tracing::error!(port = %self.path, error = %e, "Serial flush failed");
            map_io_error(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(0)) => {
                // A USB-serial bridge that was unplugged reads as EOF.
                tracing::warn!(port = %self.path, "Serial port returned EOF");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(port = %self.path, bytes = n, data = ?&buf[..n], "Serial read");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.path, error = %e, "Serial read failed");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush().await {
                tracing::warn!(port = %self.path, error = %e, "Flush before close failed");
            }
            tracing::info!(port = %self.path, "Radio serial port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

/// Map a serial I/O error onto the shared error kinds.
///
/// An unplugged USB-serial bridge fails with `EIO`, `ENXIO` or `ENODEV`
/// rather than a broken pipe; those are [`Error::ConnectionLost`] too.
pub fn map_io_error(e: std::io::Error) -> Error {
    if device_gone(&e) {
        return Error::ConnectionLost;
    }
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[cfg(unix)]
fn device_gone(e: &std::io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EIO) | Some(libc::ENXIO) | Some(libc::ENODEV)
    )
}

#[cfg(not(unix))]
fn device_gone(_e: &std::io::Error) -> bool {
    false
}
