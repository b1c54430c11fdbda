//! Scripted control-module client for end-to-end relay tests.
//!
//! [`MockControlClient`] plays the upstream controller: it connects to the
//! relay's control port, waits for the READY byte, and streams payload
//! bytes.
//!
//! # Example
//!
//! ```no_run
//! use groundlink_test_harness::MockControlClient;
//! use std::time::Duration;
//!
//! # async fn example() -> groundlink_core::Result<()> {
//! let mut client = MockControlClient::connect("127.0.0.1:5555").await?;
//! client.expect_ready(Duration::from_secs(1)).await?;
//! client.send(&[1, 2, 3, 4, 5, 6, 7, 8]).await?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use groundlink_core::error::{Error, Result};
use groundlink_core::protocol::READY;

/// A TCP client speaking the control-channel protocol.
#[derive(Debug)]
pub struct MockControlClient {
    stream: TcpStream,
    relay_addr: SocketAddr,
}

impl MockControlClient {
    /// Connect to the relay's control port.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Transport(format!("mock client failed to connect to {addr}: {e}")))?;
        stream.set_nodelay(true)?;
        let relay_addr = stream.peer_addr()?;
        Ok(Self { stream, relay_addr })
    }

    /// Address of the relay this client is connected to.
    pub fn relay_addr(&self) -> SocketAddr {
        self.relay_addr
    }

    /// Local address of the client socket, as the relay sees it.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Read one byte sent by the relay.
    ///
    /// Returns [`Error::ConnectionLost`] if the relay closed the connection
    /// and [`Error::Timeout`] if nothing arrives in time.
    pub async fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        let mut byte = [0u8; 1];
        match tokio::time::timeout(timeout, self.stream.read(&mut byte)).await {
            Ok(Ok(0)) => Err(Error::ConnectionLost),
            Ok(Ok(_)) => Ok(byte[0]),
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Wait for the READY byte; any other byte is a protocol error.
    pub async fn expect_ready(&mut self, timeout: Duration) -> Result<()> {
        match self.read_byte(timeout).await? {
            READY => Ok(()),
            other => Err(Error::Protocol(format!(
                "expected READY (0x{READY:02X}), got 0x{other:02X}"
            ))),
        }
    }

    /// Stream payload bytes to the relay.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Close the connection from the client side.
    pub async fn disconnect(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn ready_then_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let relay = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[READY]).await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut client = MockControlClient::connect(&addr.to_string()).await.unwrap();
        assert_eq!(client.relay_addr(), addr);
        client.expect_ready(Duration::from_secs(1)).await.unwrap();
        client.send(&[9, 8, 7, 6]).await.unwrap();

        assert_eq!(relay.await.unwrap(), [9, 8, 7, 6]);
    }

    #[tokio::test]
    async fn wrong_first_byte_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[0x00]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut client = MockControlClient::connect(&addr.to_string()).await.unwrap();
        let result = client.expect_ready(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn relay_close_is_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut client = MockControlClient::connect(&addr.to_string()).await.unwrap();
        let result = client.read_byte(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(Error::ConnectionLost)), "got {result:?}");
    }
}
