//! Relay configuration.
//!
//! Loaded from a TOML file in which every key is optional:
//!
//! ```toml
//! tcp_port = 5555
//! bind_address = "0.0.0.0"
//! frame_size = 8
//! radio_device_path = "/dev/ttyUSB0"
//! radio_baud_rate = 115200
//! peer_address = "0013A200415BAD65"
//! skip_handshake = false
//! handshake_timeout_ms = 60000
//! on_disconnect = "reaccept"
//! frame_queue_depth = 16
//! api_mode = "escaped"
//! tx_status_timeout_ms = 2000
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use groundlink_core::PeerAddress;
use groundlink_core::protocol::{
    DEFAULT_BAUD_RATE, DEFAULT_FRAME_SIZE, DEFAULT_TCP_PORT, DIGIMESH_MAX_PAYLOAD, MAX_FRAME_SIZE,
};
use groundlink_xbee::{ApiMode, XBeeBuilder};

use crate::error::{RelayError, RelayResult};

/// What the relay does after the control client disconnects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectPolicy {
    /// Go back to accepting a new client.
    #[default]
    Reaccept,
    /// Close the radio link and stop.
    Exit,
}

/// The XBee `AP` setting the radio is configured with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiModeSetting {
    /// `AP=1`
    Unescaped,
    /// `AP=2`
    #[default]
    Escaped,
}

impl From<ApiModeSetting> for ApiMode {
    fn from(setting: ApiModeSetting) -> Self {
        match setting {
            ApiModeSetting::Unescaped => ApiMode::Unescaped,
            ApiModeSetting::Escaped => ApiMode::Escaped,
        }
    }
}

/// Everything the relay needs to know at startup.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RelayConfig {
    /// Control channel TCP port (default: 5555)
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// Address the control channel binds to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Bytes per radio frame (default: 8)
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,

    /// Serial device of the local radio module
    #[serde(default = "default_radio_device_path")]
    pub radio_device_path: String,

    /// Serial baud rate (default: 115200)
    #[serde(default = "default_radio_baud_rate")]
    pub radio_baud_rate: u32,

    /// 64-bit address of the remote radio, as 16 hex digits
    #[serde(default = "default_peer_address")]
    pub peer_address: String,

    /// Go straight to READY without the radio handshake
    #[serde(default)]
    pub skip_handshake: bool,

    /// Per-message handshake wait in milliseconds; 0 waits forever (default: 60000)
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default)]
    pub on_disconnect: DisconnectPolicy,

    /// Frames buffered between the control reader and the radio sender (default: 16)
    #[serde(default = "default_frame_queue_depth")]
    pub frame_queue_depth: usize,

    #[serde(default)]
    pub api_mode: ApiModeSetting,

    /// Wait for the radio's transmit status in milliseconds; 0 disables (default: 2000)
    #[serde(default = "default_tx_status_timeout_ms")]
    pub tx_status_timeout_ms: u64,
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_frame_size() -> usize {
    DEFAULT_FRAME_SIZE
}
fn default_radio_device_path() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_radio_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_peer_address() -> String {
    "0013A200415BAD65".to_string()
}
fn default_handshake_timeout_ms() -> u64 {
    60_000
}
fn default_frame_queue_depth() -> usize {
    16
}
fn default_tx_status_timeout_ms() -> u64 {
    2_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            tcp_port: default_tcp_port(),
            bind_address: default_bind_address(),
            frame_size: default_frame_size(),
            radio_device_path: default_radio_device_path(),
            radio_baud_rate: default_radio_baud_rate(),
            peer_address: default_peer_address(),
            skip_handshake: false,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            on_disconnect: DisconnectPolicy::default(),
            frame_queue_depth: default_frame_queue_depth(),
            api_mode: ApiModeSetting::default(),
            tx_status_timeout_ms: default_tx_status_timeout_ms(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    ///
    /// The result is not validated, so command-line overrides can be
    /// applied first; call [`validate()`](Self::validate) afterwards.
    pub fn load(path: &Path) -> RelayResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> RelayResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Check the values the relay cannot run with.
    pub fn validate(&self) -> RelayResult<()> {
        if self.frame_size == 0 || self.frame_size > MAX_FRAME_SIZE {
            return Err(RelayError::Config(format!(
                "frame_size must be between 1 and {MAX_FRAME_SIZE}, got {}",
                self.frame_size
            )));
        }
        if self.exceeds_digimesh_payload() {
            tracing::warn!(
                frame_size = self.frame_size,
                limit = DIGIMESH_MAX_PAYLOAD,
                "frame_size exceeds the 2.4 GHz DigiMesh RF payload; check the radio's NP setting"
            );
        }
        if self.frame_queue_depth == 0 {
            return Err(RelayError::Config("frame_queue_depth must be at least 1".into()));
        }
        if self.radio_device_path.trim().is_empty() {
            return Err(RelayError::Config("radio_device_path is empty".into()));
        }
        if self.bind_address.trim().is_empty() {
            return Err(RelayError::Config("bind_address is empty".into()));
        }
        self.peer()?;
        Ok(())
    }

    /// Whether a frame would overflow one 2.4 GHz DigiMesh RF payload.
    /// Such configs are valid; longer-range modules take larger payloads.
    pub fn exceeds_digimesh_payload(&self) -> bool {
        self.frame_size > DIGIMESH_MAX_PAYLOAD
    }

    /// The remote radio's address.
    pub fn peer(&self) -> RelayResult<PeerAddress> {
        self.peer_address
            .parse()
            .map_err(|e| RelayError::Config(format!("peer_address: {e}")))
    }

    /// Socket address string for the control listener.
    pub fn listen_addr(&self) -> String {
        let host = self.bind_address.trim();
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.tcp_port)
        } else {
            format!("{}:{}", host, self.tcp_port)
        }
    }

    /// Per-message handshake wait; `None` waits indefinitely.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        match self.handshake_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Transmit-status wait; `None` sends without waiting.
    pub fn tx_status_timeout(&self) -> Option<Duration> {
        match self.tx_status_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// An XBee builder for the configured radio.
    pub fn radio_builder(&self) -> XBeeBuilder {
        let builder = XBeeBuilder::new()
            .serial_port(&self.radio_device_path)
            .baud_rate(self.radio_baud_rate)
            .api_mode(self.api_mode.into());
        match self.tx_status_timeout() {
            Some(timeout) => builder.tx_status_timeout(timeout),
            None => builder.no_tx_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.tcp_port, 5555);
        assert_eq!(config.frame_size, 8);
        assert_eq!(config.radio_baud_rate, 115_200);
        assert!(!config.skip_handshake);
        assert_eq!(config.on_disconnect, DisconnectPolicy::Reaccept);
        assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(
            config.peer().unwrap(),
            PeerAddress::from_u64(0x0013_A200_415B_AD65)
        );
        config.validate().unwrap();
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(RelayConfig::parse("").unwrap(), RelayConfig::default());
    }

    #[test]
    fn parse_overrides() {
        let config = RelayConfig::parse(
            r#"
            tcp_port = 6000
            frame_size = 4
            peer_address = "00:13:A2:00:40:0A:01:27"
            skip_handshake = true
            handshake_timeout_ms = 0
            on_disconnect = "exit"
            api_mode = "unescaped"
            tx_status_timeout_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.tcp_port, 6000);
        assert_eq!(config.frame_size, 4);
        assert!(config.skip_handshake);
        assert_eq!(config.handshake_timeout(), None);
        assert_eq!(config.tx_status_timeout(), None);
        assert_eq!(config.on_disconnect, DisconnectPolicy::Exit);
        assert_eq!(config.api_mode, ApiModeSetting::Unescaped);
        assert_eq!(config.peer().unwrap().as_u64(), 0x0013_A200_400A_0127);
        // Untouched keys keep their defaults.
        assert_eq!(config.frame_queue_depth, 16);
    }

    #[test]
    fn unknown_policy_is_parse_error() {
        let result = RelayConfig::parse(r#"on_disconnect = "retry""#);
        assert!(matches!(result, Err(RelayError::ConfigParse(_))));
    }

    #[test]
    fn large_frames_validate_but_are_flagged() {
        let config = RelayConfig {
            frame_size: DIGIMESH_MAX_PAYLOAD + 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.exceeds_digimesh_payload());

        let config = RelayConfig {
            frame_size: DIGIMESH_MAX_PAYLOAD,
            ..Default::default()
        };
        assert!(!config.exceeds_digimesh_payload());
        assert!(!RelayConfig::default().exceeds_digimesh_payload());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let cases = [
            RelayConfig {
                frame_size: 0,
                ..Default::default()
            },
            RelayConfig {
                frame_size: MAX_FRAME_SIZE + 1,
                ..Default::default()
            },
            RelayConfig {
                frame_queue_depth: 0,
                ..Default::default()
            },
            RelayConfig {
                radio_device_path: " ".into(),
                ..Default::default()
            },
            RelayConfig {
                peer_address: "0013A200".into(),
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(RelayError::Config(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn listen_addr_formats() {
        let mut config = RelayConfig::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:5555");
        config.bind_address = "::1".into();
        config.tcp_port = 0;
        assert_eq!(config.listen_addr(), "[::1]:0");
    }

    #[test]
    fn load_missing_file() {
        let result = RelayConfig::load(Path::new("/nonexistent/groundlink.toml"));
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[test]
    fn radio_builder_follows_config() {
        let config = RelayConfig {
            tx_status_timeout_ms: 0,
            api_mode: ApiModeSetting::Unescaped,
            ..Default::default()
        };
        let link = config
            .radio_builder()
            .build()
            .unwrap();
        assert_eq!(link.api_mode(), ApiMode::Unescaped);
        assert_eq!(link.tx_status_timeout(), None);
    }
}
