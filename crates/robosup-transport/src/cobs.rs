// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! COBS (Consistent Overhead Byte Stuffing) encode/decode.
//!
//! Wire format produced elsewhere in this crate is `[COBS-encoded payload]
//! [0x00 delimiter]`; this module only handles the byte-stuffing itself.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CobsError {
    #[error("unexpected zero byte in COBS stream")]
    UnexpectedZero,
    #[error("COBS stream truncated")]
    Truncated,
}

/// COBS-encode `data`. Does NOT append the 0x00 delimiter.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 254 + 2);
    let mut code_idx = 0usize;
    out.push(0); // placeholder for first code byte
    let mut code: u8 = 1;

    for &b in data {
        if b == 0 {
            out[code_idx] = code;
            code_idx = out.len();
            out.push(0);
            code = 1;
        } else {
            out.push(b);
            code += 1;
            if code == 0xFF {
                out[code_idx] = code;
                code_idx = out.len();
                out.push(0);
                code = 1;
            }
        }
    }

    out[code_idx] = code;
    out
}

/// COBS-decode `data`. Input must NOT include the 0x00 delimiter.
pub fn decode(data: &[u8]) -> Result<Vec<u8>, CobsError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::with_capacity(data.len());
    let mut idx = 0usize;

    while idx < data.len() {
        let code = data[idx];
        if code == 0 {
            return Err(CobsError::UnexpectedZero);
        }
        idx += 1;

        for _ in 0..(code - 1) {
            if idx >= data.len() {
                return Err(CobsError::Truncated);
            }
            out.push(data[idx]);
            idx += 1;
        }

        if code < 0xFF && idx < data.len() {
            out.push(0);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_no_zeros() {
        let data = b"hello world";
        let encoded = encode(data);
        assert!(!encoded.contains(&0));
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn round_trip_with_embedded_zeros() {
        let data = [1, 0, 2, 0, 0, 3];
        let encoded = encode(&data);
        assert!(!encoded.contains(&0));
        assert_eq!(decode(&encoded).unwrap(), data.to_vec());
    }

    #[test]
    fn round_trip_empty() {
        assert_eq!(decode(&encode(&[])).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn round_trip_long_run_crosses_0xfe_boundary() {
        let data = vec![1u8; 300];
        let encoded = encode(&data);
        assert!(!encoded.contains(&0));
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn decode_rejects_embedded_zero_code() {
        assert_eq!(decode(&[1, 0, 1]), Err(CobsError::UnexpectedZero));
    }

    #[test]
    fn decode_rejects_truncated_run() {
        assert_eq!(decode(&[5, 1, 2]), Err(CobsError::Truncated));
    }
}
