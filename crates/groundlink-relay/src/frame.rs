//! Fixed-size framing of the control-channel byte stream.
//!
//! The control client streams raw bytes with no delimiters. The relay
//! groups them into frames of exactly `frame_size` bytes and only complete
//! frames ever reach the radio.

use bytes::{BufMut, Bytes, BytesMut};
use std::ops::Deref;

use groundlink_core::error::{Error, Result};
use groundlink_core::protocol::MAX_FRAME_SIZE;

/// A complete, immutable frame of exactly `frame_size` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Outcome of pushing one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame is not full yet.
    Partial,
    /// The byte completed a frame; the accumulator is empty again.
    Complete(Frame),
}

/// Collects bytes one at a time into fixed-size frames, in arrival order.
#[derive(Debug)]
pub struct FrameAccumulator {
    buf: BytesMut,
    capacity: usize,
}

impl FrameAccumulator {
    /// Create an accumulator for frames of `frame_size` bytes.
    ///
    /// `frame_size` must be between 1 and [`MAX_FRAME_SIZE`].
    pub fn new(frame_size: usize) -> Result<Self> {
        if frame_size == 0 || frame_size > MAX_FRAME_SIZE {
            return Err(Error::InvalidParameter(format!(
                "frame size must be between 1 and {MAX_FRAME_SIZE}, got {frame_size}"
            )));
        }
        Ok(Self {
            buf: BytesMut::with_capacity(frame_size),
            capacity: frame_size,
        })
    }

    /// Append one byte. Returns the finished frame when this byte fills it.
    pub fn push(&mut self, byte: u8) -> FrameStatus {
        self.buf.put_u8(byte);
        if self.buf.len() < self.capacity {
            return FrameStatus::Partial;
        }
        // split() leaves `buf` empty but keeps its allocation for the next frame.
        let frame = self.buf.split().freeze();
        self.buf.reserve(self.capacity);
        FrameStatus::Complete(Frame(frame))
    }

    /// Bytes buffered toward the next frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// The frame size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard the partial frame, returning how many bytes were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        dropped
    }
}
