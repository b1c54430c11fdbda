//! Transport implementations for groundlink.
//!
//! - [`SerialTransport`]: the serial line to the local radio module,
//!   implementing [`Transport`](groundlink_core::Transport)
//! - [`ControlChannelServer`] / [`ControlConnection`]: the TCP control
//!   channel the upstream controller streams payload bytes over

pub mod serial;
pub mod tcp;

pub use serial::{FlowControl, SerialConfig, SerialTransport};
pub use tcp::{ControlChannelServer, ControlConnection};
