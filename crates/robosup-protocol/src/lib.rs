// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Typed command/telemetry packet encode/decode for the reflex and face
//! MCUs, layered on `robosup-transport`'s COBS framing and CRC16 checksum.
//!
//! Packet structure (before COBS): `[type:u8][seq:u8][payload:N][crc16:u16-LE]`.
//! All multi-byte values are little-endian.

pub mod expressions;
pub mod face;
pub mod reflex;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("COBS error: {0}")]
    Cobs(#[from] robosup_transport::cobs::CobsError),
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("CRC mismatch: recv=0x{recv:04X} calc=0x{calc:04X}")]
    CrcMismatch { recv: u16, calc: u16 },
    #[error("payload too short: {got} < {want}")]
    PayloadTooShort { got: usize, want: usize },
    #[error("value must be exactly 4 bytes, got {0}")]
    BadConfigValueLen(usize),
}

/// A decoded packet: type id, producer-local sequence number, payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    pub pkt_type: u8,
    pub seq: u8,
    pub payload: Vec<u8>,
}

/// Build a wire-ready packet: COBS-encode(type|seq|payload|crc16-LE) + 0x00.
pub fn build_packet(pkt_type: u8, seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(2 + payload.len() + 2);
    raw.push(pkt_type);
    raw.push(seq);
    raw.extend_from_slice(payload);
    let crc = robosup_transport::crc::crc16_ccitt(&raw);
    raw.extend_from_slice(&crc.to_le_bytes());
    robosup_transport::build_frame(&raw)
}

/// Parse a COBS-encoded frame (without the trailing 0x00 delimiter).
pub fn parse_frame(frame: &[u8]) -> Result<ParsedPacket, ProtocolError> {
    let raw = robosup_transport::cobs::decode(frame)?;
    if raw.len() < 4 {
        return Err(ProtocolError::TooShort(raw.len()));
    }

    let body = &raw[..raw.len() - 2];
    let crc_recv = u16::from_le_bytes([raw[raw.len() - 2], raw[raw.len() - 1]]);
    let crc_calc = robosup_transport::crc::crc16_ccitt(body);
    if crc_recv != crc_calc {
        return Err(ProtocolError::CrcMismatch {
            recv: crc_recv,
            calc: crc_calc,
        });
    }

    Ok(ParsedPacket {
        pkt_type: body[0],
        seq: body[1],
        payload: body[2..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_round_trips() {
        let frame = build_packet(0x10, 5, &[1, 2, 3, 4]);
        // Strip the trailing delimiter the way FrameExtractor would.
        let encoded = &frame[..frame.len() - 1];
        let parsed = parse_frame(encoded).unwrap();
        assert_eq!(parsed.pkt_type, 0x10);
        assert_eq!(parsed.seq, 5);
        assert_eq!(parsed.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let mut frame = build_packet(0x10, 5, &[1, 2, 3, 4]);
        frame.truncate(frame.len() - 1); // drop delimiter
        let mut decoded = robosup_transport::cobs::decode(&frame).unwrap();
        decoded[2] ^= 0xFF; // corrupt a payload byte
        let re_encoded = robosup_transport::cobs::encode(&decoded);
        assert!(matches!(
            parse_frame(&re_encoded),
            Err(ProtocolError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn too_short_frame_rejected() {
        let frame = robosup_transport::cobs::encode(&[1, 2]);
        assert_eq!(parse_frame(&frame), Err(ProtocolError::TooShort(2)));
    }
}
