//! groundlink-relay: fixed-size framing, radio handshake, and the
//! control-channel-to-radio relay loop.
//!
//! - [`FrameAccumulator`] -- groups the control byte stream into frames
//! - [`HandshakeCoordinator`] -- the 0xFC / 0xFD / 0xFF radio handshake
//! - [`Relay`] -- startup, accept loop and per-client sessions
//! - [`RelayConfig`] -- TOML-backed settings
//! - [`RelayError`] / [`HandshakeError`] -- what failed and whether it is fatal
//!
//! # Example
//!
//! ```no_run
//! use groundlink_relay::{Relay, RelayConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RelayConfig::default();
//! let link = config.radio_builder().build()?;
//! let relay = Relay::new(config, Box::new(link))?;
//! relay.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod relay;

pub use config::{ApiModeSetting, DisconnectPolicy, RelayConfig};
pub use error::{HandshakeError, HandshakeStage, RelayError, RelayResult};
pub use frame::{Frame, FrameAccumulator, FrameStatus};
pub use handshake::{HandshakeCoordinator, HandshakeState};
pub use relay::Relay;
