//! XBee API-mode radio link for groundlink.
//!
//! This crate drives a Digi XBee (DigiMesh or Zigbee firmware) module over
//! its serial API and exposes it as a [`RadioLink`](groundlink_core::RadioLink).
//! It provides:
//!
//! - **Frame codec** ([`api`]) -- encode and decode API frames, with and
//!   without API mode 2 escaping.
//! - **XBeeLink** ([`link`]) -- the `RadioLink` implementation that sends
//!   Transmit Requests, checks Transmit Status and delivers Receive Packets.
//! - **XBeeBuilder** ([`builder`]) -- fluent builder for serial settings,
//!   framing mode and the transmit-status policy.
//!
//! # Example
//!
//! ```
//! use groundlink_core::PeerAddress;
//! use groundlink_xbee::api::{decode_frame, encode_frame, ApiFrame, ApiMode, DecodeResult};
//!
//! let request = ApiFrame::TransmitRequest {
//!     frame_id: 1,
//!     dest: PeerAddress::from_u64(0x0013_A200_415B_AD65),
//!     data: vec![1, 2, 3, 4, 5, 6, 7, 8],
//! };
//! let bytes = encode_frame(&request, ApiMode::Escaped).unwrap();
//! assert_eq!(
//!     decode_frame(&bytes, ApiMode::Escaped),
//!     DecodeResult::Frame(request, bytes.len())
//! );
//! ```

pub mod api;
pub mod builder;
pub mod link;

pub use api::ApiMode;
pub use builder::XBeeBuilder;
pub use link::XBeeLink;
