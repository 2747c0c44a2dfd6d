// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Zero-delimited frame assembly over a raw byte stream.
//!
//! A packet on the wire is `cobs::encode(body)` followed by a single `0x00`
//! delimiter. This module only knows about delimiter framing and the
//! 512-byte discard limit; checksum validation and payload interpretation
//! live in `robosup-protocol`.

use crate::cobs;

/// Maximum accumulated frame length before it is discarded as corrupt.
pub const MAX_FRAME_LEN: usize = 512;

/// COBS-encode `body` and append the frame delimiter.
pub fn build_frame(body: &[u8]) -> Vec<u8> {
    let mut out = cobs::encode(body);
    out.push(0x00);
    out
}

/// Accumulates raw bytes from a serial stream and yields complete,
/// still-COBS-encoded frames (without the trailing delimiter) as they
/// are completed.
#[derive(Default)]
pub struct FrameExtractor {
    buf: Vec<u8>,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed one byte read from the wire. Returns `Some(frame)` whenever a
    /// delimiter completes a non-empty frame.
    pub fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        if byte == 0x00 {
            if self.buf.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.buf));
        }
        self.buf.push(byte);
        if self.buf.len() > MAX_FRAME_LEN {
            self.buf.clear();
        }
        None
    }

    /// Feed a chunk of bytes, returning every frame completed within it.
    pub fn feed_all(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        data.iter().filter_map(|&b| self.feed(b)).collect()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_extracted_on_delimiter() {
        let mut ex = FrameExtractor::new();
        let frame = build_frame(b"hi");
        let frames = ex.feed_all(&frame);
        assert_eq!(frames.len(), 1);
        assert_eq!(cobs::decode(&frames[0]).unwrap(), b"hi");
    }

    #[test]
    fn oversized_frame_is_discarded() {
        let mut ex = FrameExtractor::new();
        for _ in 0..(MAX_FRAME_LEN + 10) {
            assert_eq!(ex.feed(0x01), None);
        }
        // Closing delimiter on an already-discarded buffer yields nothing.
        assert_eq!(ex.feed(0x00), None);
    }

    #[test]
    fn empty_delimiter_run_yields_nothing() {
        let mut ex = FrameExtractor::new();
        assert_eq!(ex.feed(0x00), None);
        assert_eq!(ex.feed(0x00), None);
    }
}
