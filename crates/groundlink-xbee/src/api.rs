//! XBee API frame encoder/decoder.
//!
//! In API mode the module exchanges structured frames with the host
//! instead of a transparent byte stream. This module handles the pure
//! byte-level encoding and decoding of those frames.
//!
//! # Frame format
//!
//! ```text
//! 0x7E <len hi> <len lo> <frame type> <frame data...> <checksum>
//! ```
//!
//! - Start delimiter: `0x7E`
//! - Length: number of bytes from the frame type up to (not including) the
//!   checksum, big-endian
//! - Checksum: `0xFF` minus the low byte of the sum of the frame-type and
//!   frame-data bytes
//!
//! In API mode 2 ([`ApiMode::Escaped`]) every byte after the start
//! delimiter that equals `0x7E`, `0x7D`, `0x11` or `0x13` is sent as
//! `0x7D` followed by the byte XOR `0x20`.

use bytes::{BufMut, BytesMut};
use groundlink_core::{Error, PeerAddress, Result};

/// Start-of-frame byte.
pub const START_DELIMITER: u8 = 0x7E;

/// Escape marker in API mode 2.
pub const ESCAPE: u8 = 0x7D;

/// Software flow control XON; escaped in API mode 2.
pub const XON: u8 = 0x11;

/// Software flow control XOFF; escaped in API mode 2.
pub const XOFF: u8 = 0x13;

/// Value XORed into an escaped byte.
pub const ESCAPE_XOR: u8 = 0x20;

/// 64-bit Transmit Request frame type.
pub const TRANSMIT_REQUEST: u8 = 0x10;

/// Extended Transmit Status frame type.
pub const TRANSMIT_STATUS: u8 = 0x8B;

/// 64-bit Receive Packet frame type.
pub const RECEIVE_PACKET: u8 = 0x90;

/// 16-bit destination used when only the 64-bit address is known.
pub const UNKNOWN_NETWORK_ADDRESS: u16 = 0xFFFE;

/// Largest frame-data length the 16-bit length field can carry.
pub const MAX_FRAME_DATA: usize = u16::MAX as usize;

/// Header bytes of a Transmit Request before the RF data.
const TRANSMIT_REQUEST_HEADER: usize = 14;

/// Header bytes of a Receive Packet before the RF data.
const RECEIVE_PACKET_HEADER: usize = 12;

/// Serial framing mode, the module's `AP` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiMode {
    /// `AP=1`: frames are sent as-is.
    Unescaped,
    /// `AP=2`: reserved bytes are escaped.
    #[default]
    Escaped,
}

/// A decoded (or to-be-encoded) API frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFrame {
    /// Host -> module: send `data` to `dest`.
    TransmitRequest {
        /// Non-zero ids ask the module for a [`ApiFrame::TransmitStatus`].
        frame_id: u8,
        dest: PeerAddress,
        data: Vec<u8>,
    },
    /// Module -> host: outcome of a transmit request.
    TransmitStatus {
        frame_id: u8,
        retry_count: u8,
        delivery_status: u8,
        discovery_status: u8,
    },
    /// Module -> host: RF data received from `source`.
    ReceivePacket {
        source: PeerAddress,
        options: u8,
        data: Vec<u8>,
    },
    /// Any frame type this driver does not interpret.
    Unknown { frame_type: u8, data: Vec<u8> },
}

impl ApiFrame {
    /// The frame type byte.
    pub fn frame_type(&self) -> u8 {
        match self {
            ApiFrame::TransmitRequest { .. } => TRANSMIT_REQUEST,
            ApiFrame::TransmitStatus { .. } => TRANSMIT_STATUS,
            ApiFrame::ReceivePacket { .. } => RECEIVE_PACKET,
            ApiFrame::Unknown { frame_type, .. } => *frame_type,
        }
    }

    /// Serialize the frame type and frame data (everything the checksum covers).
    fn frame_data(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(self.frame_type());
        match self {
            ApiFrame::TransmitRequest {
                frame_id,
                dest,
                data,
            } => {
                buf.put_u8(*frame_id);
                buf.put_slice(&dest.to_bytes());
                buf.put_u16(UNKNOWN_NETWORK_ADDRESS);
                buf.put_u8(0x00); // broadcast radius: maximum hops
                buf.put_u8(0x00); // transmit options
                buf.put_slice(data);
            }
            ApiFrame::TransmitStatus {
                frame_id,
                retry_count,
                delivery_status,
                discovery_status,
            } => {
                buf.put_u8(*frame_id);
                buf.put_u16(UNKNOWN_NETWORK_ADDRESS);
                buf.put_u8(*retry_count);
                buf.put_u8(*delivery_status);
                buf.put_u8(*discovery_status);
            }
            ApiFrame::ReceivePacket {
                source,
                options,
                data,
            } => {
                buf.put_slice(&source.to_bytes());
                buf.put_u16(UNKNOWN_NETWORK_ADDRESS);
                buf.put_u8(*options);
                buf.put_slice(data);
            }
            ApiFrame::Unknown { data, .. } => buf.put_slice(data),
        }
        buf.to_vec()
    }
}

/// Human-readable meaning of a Transmit Status delivery code.
pub fn delivery_status_text(status: u8) -> &'static str {
    match status {
        0x00 => "success",
        0x01 => "MAC ACK failure",
        0x02 => "CCA/LBT failure",
        0x15 => "invalid destination endpoint",
        0x21 => "network ACK failure",
        0x22 => "not joined to network",
        0x23 => "self-addressed",
        0x24 => "address not found",
        0x25 => "route not found",
        0x74 => "payload too large",
        _ => "unknown delivery status",
    }
}

fn needs_escape(b: u8) -> bool {
    matches!(b, START_DELIMITER | ESCAPE | XON | XOFF)
}

fn checksum(frame_data: &[u8]) -> u8 {
    0xFF - frame_data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Encode a frame into wire bytes, start delimiter included.
///
/// # Example
///
/// ```
/// use groundlink_core::PeerAddress;
/// use groundlink_xbee::api::{encode_frame, ApiFrame, ApiMode};
///
/// let frame = ApiFrame::TransmitRequest {
///     frame_id: 0x01,
///     dest: PeerAddress::from_u64(0x0013_A200_400A_0127),
///     data: b"TxData0A".to_vec(),
/// };
/// let bytes = encode_frame(&frame, ApiMode::Unescaped).unwrap();
/// assert_eq!(&bytes[..4], &[0x7E, 0x00, 0x16, 0x10]);
/// assert_eq!(bytes.last(), Some(&0x13));
/// ```
pub fn encode_frame(frame: &ApiFrame, mode: ApiMode) -> Result<Vec<u8>> {
    let data = frame.frame_data();
    if data.len() > MAX_FRAME_DATA {
        return Err(Error::InvalidParameter(format!(
            "API frame data of {} bytes exceeds {} bytes",
            data.len(),
            MAX_FRAME_DATA
        )));
    }

    let mut unescaped = BytesMut::with_capacity(data.len() + 3);
    unescaped.put_u16(data.len() as u16);
    unescaped.put_slice(&data);
    unescaped.put_u8(checksum(&data));

    let mut out = BytesMut::with_capacity(unescaped.len() * 2 + 1);
    out.put_u8(START_DELIMITER);
    for &b in unescaped.iter() {
        if mode == ApiMode::Escaped && needs_escape(b) {
            out.put_u8(ESCAPE);
            out.put_u8(b ^ ESCAPE_XOR);
        } else {
            out.put_u8(b);
        }
    }
    Ok(out.to_vec())
}

/// Result of attempting to decode a frame from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete frame; the `usize` is the number of bytes consumed.
    Frame(ApiFrame, usize),
    /// The buffer holds the beginning of a frame; more bytes are needed.
    Incomplete,
    /// The leading bytes are noise or a corrupt frame; drop this many and
    /// try again.
    Discard(usize),
}

enum Step {
    Byte(u8),
    NeedMore,
    /// A start delimiter appeared mid-frame at this offset.
    Resync(usize),
}

/// Reads logical (unescaped) bytes out of a wire buffer.
struct Unescaper<'a> {
    buf: &'a [u8],
    pos: usize,
    mode: ApiMode,
}

impl Unescaper<'_> {
    fn next(&mut self) -> Step {
        let Some(&b) = self.buf.get(self.pos) else {
            return Step::NeedMore;
        };
        if self.mode == ApiMode::Escaped {
            if b == START_DELIMITER {
                return Step::Resync(self.pos);
            }
            if b == ESCAPE {
                let Some(&escaped) = self.buf.get(self.pos + 1) else {
                    return Step::NeedMore;
                };
                if escaped == START_DELIMITER {
                    return Step::Resync(self.pos + 1);
                }
                self.pos += 2;
                return Step::Byte(escaped ^ ESCAPE_XOR);
            }
        }
        self.pos += 1;
        Step::Byte(b)
    }
}

/// Attempt to decode one API frame from the front of `buf`.
///
/// Bytes before the first start delimiter are reported as
/// [`DecodeResult::Discard`], as are frames with a bad checksum or a
/// malformed body, so the caller can drain and retry in a loop.
///
/// # Example
///
/// ```
/// use groundlink_xbee::api::{decode_frame, ApiFrame, ApiMode, DecodeResult};
///
/// let buf = [
///     0x7E, 0x00, 0x0D, 0x90, 0x00, 0x13, 0xA2, 0x00, 0x41, 0x5B, 0xAD, 0x65,
///     0xFF, 0xFE, 0x01, 0xFC, 0x12,
/// ];
/// match decode_frame(&buf, ApiMode::Unescaped) {
///     DecodeResult::Frame(ApiFrame::ReceivePacket { data, .. }, consumed) => {
///         assert_eq!(data, vec![0xFC]);
///         assert_eq!(consumed, buf.len());
///     }
///     other => panic!("expected a receive packet, got {other:?}"),
/// }
/// ```
pub fn decode_frame(buf: &[u8], mode: ApiMode) -> DecodeResult {
    let start = match buf.iter().position(|&b| b == START_DELIMITER) {
        Some(pos) => pos,
        None if buf.is_empty() => return DecodeResult::Incomplete,
        None => return DecodeResult::Discard(buf.len()),
    };
    if start > 0 {
        return DecodeResult::Discard(start);
    }

    let mut reader = Unescaper { buf, pos: 1, mode };

    macro_rules! next_byte {
        () => {
            match reader.next() {
                Step::Byte(b) => b,
                Step::NeedMore => return DecodeResult::Incomplete,
                Step::Resync(at) => return DecodeResult::Discard(at),
            }
        };
    }

    let len = u16::from_be_bytes([next_byte!(), next_byte!()]) as usize;
    if len == 0 {
        return DecodeResult::Discard(reader.pos);
    }

    let mut data = Vec::with_capacity(len);
    while data.len() < len {
        data.push(next_byte!());
    }
    let received_checksum = next_byte!();
    let consumed = reader.pos;

    if checksum(&data) != received_checksum {
        tracing::warn!(
            expected = checksum(&data),
            received = received_checksum,
            frame_type = data[0],
            "API frame checksum mismatch"
        );
        return DecodeResult::Discard(consumed);
    }

    match parse_frame_data(&data) {
        Some(frame) => DecodeResult::Frame(frame, consumed),
        None => {
            tracing::warn!(frame_type = data[0], len, "Malformed API frame");
            DecodeResult::Discard(consumed)
        }
    }
}

/// Interpret checksummed frame data. `None` if a known type is too short.
fn parse_frame_data(data: &[u8]) -> Option<ApiFrame> {
    let (&frame_type, body) = data.split_first()?;
    let address = |bytes: &[u8]| -> Option<PeerAddress> {
        Some(PeerAddress::from_bytes(bytes.try_into().ok()?))
    };

    match frame_type {
        TRANSMIT_REQUEST if data.len() >= TRANSMIT_REQUEST_HEADER => {
            Some(ApiFrame::TransmitRequest {
                frame_id: body[0],
                dest: address(&body[1..9])?,
                data: data[TRANSMIT_REQUEST_HEADER..].to_vec(),
            })
        }
        TRANSMIT_STATUS if data.len() == 7 => Some(ApiFrame::TransmitStatus {
            frame_id: body[0],
            retry_count: body[3],
            delivery_status: body[4],
            discovery_status: body[5],
        }),
        RECEIVE_PACKET if data.len() >= RECEIVE_PACKET_HEADER => Some(ApiFrame::ReceivePacket {
            source: address(&body[0..8])?,
            options: body[10],
            data: data[RECEIVE_PACKET_HEADER..].to_vec(),
        }),
        TRANSMIT_REQUEST | TRANSMIT_STATUS | RECEIVE_PACKET => None,
        _ => Some(ApiFrame::Unknown {
            frame_type,
            data: body.to_vec(),
        }),
    }
}
