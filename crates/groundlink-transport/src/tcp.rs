//! TCP control channel.
//!
//! The upstream controller connects to the relay over plain TCP and streams
//! payload bytes without any framing. [`ControlChannelServer`] owns the
//! listening socket and hands out one [`ControlConnection`] per accepted
//! client; the connection offers blocking single-byte reads and writes.
//!
//! # Example
//!
//! ```no_run
//! use groundlink_transport::ControlChannelServer;
//!
//! # async fn example() -> groundlink_core::Result<()> {
//! let mut server = ControlChannelServer::new();
//! server.listen("0.0.0.0:5555").await?;
//!
//! let mut conn = server.accept_one().await?;
//! conn.write_byte(0xFE).await?;
//! let first = conn.read_byte().await?;
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

use groundlink_core::error::{Error, Result};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Listening side of the control channel.
#[derive(Debug, Default)]
pub struct ControlChannelServer {
    listener: Option<TcpListener>,
}

impl ControlChannelServer {
    /// Create a server that is not yet listening.
    pub fn new() -> Self {
        Self { listener: None }
    }

    /// Bind `addr` (a `host:port` string; port 0 picks a free port) and
    /// start listening. Returns the bound address.
    ///
    /// Calling `listen` again before [`close`](Self::close) returns
    /// [`Error::InvalidState`].
    pub async fn listen(&mut self, addr: &str) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            let bound = listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".into());
            tracing::error!(addr = %addr, bound = %bound, "Control channel is already listening");
            return Err(Error::InvalidState(format!(
                "control channel already listening on {bound}"
            )));
        }

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "Failed to bind control channel");
            Error::Transport(format!("failed to bind control channel on {addr}: {e}"))
        })?;
        let local = listener.local_addr()?;

        tracing::info!(addr = %local, "Control channel listening");
        self.listener = Some(listener);
        Ok(local)
    }

    /// Wait for the next client and return its connection.
    pub async fn accept_one(&mut self) -> Result<ControlConnection> {
        let listener = self.listener.as_ref().ok_or(Error::NotConnected)?;

        let (stream, peer) = listener.accept().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to accept control client");
            Error::Io(e)
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %peer, error = %e, "Failed to set TCP_NODELAY (continuing anyway)");
        }

        tracing::info!(addr = %peer, "Control client connected");
        Ok(ControlConnection::from_stream(stream, peer))
    }

    /// Address the server is bound to, if listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Stop listening. Idempotent; existing connections are unaffected.
    pub fn close(&mut self) {
        if let Some(listener) = self.listener.take() {
            match listener.local_addr() {
                Ok(addr) => tracing::info!(addr = %addr, "Control channel closed"),
                Err(_) => tracing::info!("Control channel closed"),
            }
        }
    }
}

/// An accepted control client.
///
/// Reads are buffered internally so that byte-at-a-time consumption does not
/// cost one syscall per byte; writes are flushed immediately.
#[derive(Debug)]
pub struct ControlConnection {
    stream: Option<BufReader<TcpStream>>,
    peer: SocketAddr,
}

impl ControlConnection {
    /// Wrap an already-connected stream.
    pub fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: Some(BufReader::new(stream)),
            peer,
        }
    }

    /// Remote address of the client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Block until the client sends one byte.
    ///
    /// A clean disconnect by the client yields [`Error::ConnectionLost`].
    pub async fn read_byte(&mut self) -> Result<u8> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        match stream.read_u8().await {
            Ok(b) => {
                tracing::trace!(addr = %self.peer, byte = b, "Control byte received");
                Ok(b)
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!(addr = %self.peer, "Control client closed the connection");
                Err(Error::ConnectionLost)
            }
            Err(e) => {
                tracing::warn!(addr = %self.peer, error = %e, "Control read failed");
                Err(map_io_error(e))
            }
        }
    }

    /// Send one byte to the client and flush it.
    pub async fn write_byte(&mut self, byte: u8) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        stream.write_all(&[byte]).await.map_err(|e| {
            tracing::warn!(addr = %self.peer, error = %e, "Control write failed");
            map_io_error(e)
        })?;
        stream.flush().await.map_err(|e| {
            tracing::warn!(addr = %self.peer, error = %e, "Control flush failed");
            map_io_error(e)
        })?;

        tracing::trace!(addr = %self.peer, byte, "Control byte sent");
        Ok(())
    }

    /// Shut the connection down. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(
                    addr = %self.peer,
                    error = %e,
                    "Shutdown of control connection failed (continuing anyway)"
                );
            }
            tracing::info!(addr = %self.peer, "Control client disconnected");
        }
        Ok(())
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}
