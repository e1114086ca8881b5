//! Frame encoding and decoding for the module's UART protocol.
//!
//! The wire format is the same in both directions:
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────┬──────────┐
//! │   0xAA   │  opcode  │  length  │   payload   │ checksum │
//! │  1 byte  │  1 byte  │  1 byte  │ length bytes│  1 byte  │
//! └──────────┴──────────┴──────────┴─────────────┴──────────┘
//! ```
//! The checksum is the two's complement of the sum of all preceding bytes,
//! so a valid frame sums to zero mod 256.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::command::Command;

/// Frame start marker.
pub const FRAME_START: u8 = 0xAA;

/// Frame overhead: start marker, opcode, length and checksum bytes.
pub const FRAME_OVERHEAD: usize = 4;

/// A decoded module frame: reply or indication opcode plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Opcode byte as sent by the module.
    pub opcode: u8,
    /// Payload bytes, without framing or checksum.
    pub payload: Bytes,
}

fn complement(sum: u8) -> u8 {
    (sum ^ 0xFF).wrapping_add(1)
}

fn sum_bytes(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encodes a command into its on-wire byte sequence. Deterministic and pure.
#[must_use]
pub fn encode(command: &Command) -> Bytes {
    let params = command.params();
    let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + params.len());
    buf.extend_from_slice(&[
        FRAME_START,
        command.opcode().into(),
        params.len() as u8,
    ]);
    buf.extend_from_slice(params);
    let checksum = complement(sum_bytes(&buf));
    buf.extend_from_slice(&[checksum]);
    buf.freeze()
}

/// Incremental frame decoder that handles partial reads.
///
/// Bytes are fed in as they arrive from the transport; [`decode`] yields a
/// frame once a complete one is buffered. Garbage before the start marker is
/// skipped, and a corrupted frame is reported once and then skipped so the
/// decoder resynchronizes on the next marker.
///
/// [`decode`]: FrameDecoder::decode
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Creates a new frame decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Feeds received bytes into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(Some(frame))` when a complete valid frame was buffered,
    /// `Ok(None)` when more data is needed.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::ChecksumMismatch`] when a complete frame fails
    /// its checksum. The offending start marker is consumed, so calling
    /// `decode` again continues with the remaining bytes.
    pub fn decode(&mut self) -> Result<Option<RawFrame>, FrameError> {
        // Drop anything before the start marker.
        match self.buffer.iter().position(|&b| b == FRAME_START) {
            Some(0) => {}
            Some(start) => self.buffer.advance(start),
            None => {
                self.buffer.clear();
                return Ok(None);
            }
        }

        if self.buffer.len() < FRAME_OVERHEAD {
            return Ok(None);
        }

        let length = usize::from(self.buffer[2]);
        let total = FRAME_OVERHEAD + length;
        if self.buffer.len() < total {
            return Ok(None);
        }

        if sum_bytes(&self.buffer[..total]) != 0 {
            let expected = complement(sum_bytes(&self.buffer[..total - 1]));
            let actual = self.buffer[total - 1];
            // Skip this marker so the next call resynchronizes.
            self.buffer.advance(1);
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        let opcode = self.buffer[1];
        self.buffer.advance(3);
        let payload = self.buffer.split_to(length).freeze();
        self.buffer.advance(1); // checksum

        Ok(Some(RawFrame { opcode, payload }))
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Decodes exactly one complete frame from a byte slice.
///
/// # Errors
///
/// Returns [`FrameError::Truncated`] when the input ends before the frame
/// does, or [`FrameError::ChecksumMismatch`] for a corrupted frame.
pub fn decode(data: &[u8]) -> Result<RawFrame, FrameError> {
    let mut decoder = FrameDecoder::new();
    decoder.feed(data);
    match decoder.decode()? {
        Some(frame) => Ok(frame),
        None => {
            let expected = if data.len() >= 3 {
                FRAME_OVERHEAD + usize::from(data[2])
            } else {
                FRAME_OVERHEAD
            };
            Err(FrameError::Truncated {
                expected,
                got: data.len(),
            })
        }
    }
}
