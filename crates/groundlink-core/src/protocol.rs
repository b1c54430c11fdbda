//! Sentinel bytes and protocol defaults shared by the relay and its clients.
//!
//! # Control channel
//!
//! ```text
//! relay  -> client : 0xFE                     (READY, once per accepted client)
//! client -> relay  : <payload bytes...>       (no delimiters)
//! ```
//!
//! # Radio initialization
//!
//! ```text
//! peer   -> relay  : 0xFC                     (INITIALIZATION_REQUEST)
//! relay  -> peer   : 0xFD                     (INITIALIZATION_REQUEST_ACK)
//! peer   -> relay  : 0xFF                     (ACK)
//! ```

/// Sent to the control client once the relay is ready for payload bytes.
pub const READY: u8 = 0xFE;

/// First byte of the peer's opening handshake message.
pub const INITIALIZATION_REQUEST: u8 = 0xFC;

/// The relay's single-byte answer to [`INITIALIZATION_REQUEST`].
pub const INITIALIZATION_REQUEST_ACK: u8 = 0xFD;

/// First byte of the peer's closing handshake message.
pub const ACK: u8 = 0xFF;

/// Default TCP port of the control channel.
pub const DEFAULT_TCP_PORT: u16 = 5555;

/// Default number of payload bytes per radio frame.
pub const DEFAULT_FRAME_SIZE: usize = 8;

/// Largest frame size the relay accepts.
///
/// This is the framing limit, not the radio's. The module's `NP` setting
/// caps one RF payload (73 bytes on 2.4 GHz DigiMesh, 256 on the 900HP);
/// a larger frame is rejected by the radio with delivery status 0x74 and
/// dropped on every send.
pub const MAX_FRAME_SIZE: usize = 256;

/// RF payload limit (`NP`) of 2.4 GHz DigiMesh XBee modules.
pub const DIGIMESH_MAX_PAYLOAD: usize = 73;

/// Default baud rate of the local radio module's serial line.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
