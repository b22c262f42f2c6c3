//! UTF-16 string encoding for Serato files
//!
//! Serato stores every string as UTF-16:
//! - Text/Path tag payloads: UTF-16BE, no byte-order mark, no terminator
//! - neworder.pref: UTF-16BE on write; a byte-order mark is honoured on read
//!
//! Byte order is always spelled out explicitly so the host's endianness
//! never leaks onto the wire.

use crate::error::{Error, Result};

const BOM_BE: [u8; 2] = [0xFE, 0xFF];
const BOM_LE: [u8; 2] = [0xFF, 0xFE];

/// Encode a string as UTF-16BE bytes
pub fn encode_utf16be(s: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(encoded_length(s));
    for ch in s.encode_utf16() {
        result.extend_from_slice(&ch.to_be_bytes());
    }
    result
}

/// Decode UTF-16BE bytes into a string
///
/// Fails on an odd byte count or unpaired surrogates; a lossy decode would
/// break byte-stable round trips.
pub fn decode_utf16be(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::StringEncoding(format!(
            "UTF-16 payload has odd length {}",
            bytes.len()
        )));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    String::from_utf16(&units).map_err(|e| Error::StringEncoding(e.to_string()))
}

/// Decode UTF-16 text that may start with a byte-order mark.
/// Without a mark the text is taken as big-endian.
pub fn decode_utf16_text(bytes: &[u8]) -> Result<String> {
    if bytes.starts_with(&BOM_BE) {
        return decode_utf16be(&bytes[2..]);
    }

    if bytes.starts_with(&BOM_LE) {
        let body = &bytes[2..];
        if body.len() % 2 != 0 {
            return Err(Error::StringEncoding(format!(
                "UTF-16 payload has odd length {}",
                body.len()
            )));
        }
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16(&units).map_err(|e| Error::StringEncoding(e.to_string()));
    }

    decode_utf16be(bytes)
}

/// Get the encoded length of a string without actually encoding it
pub fn encoded_length(s: &str) -> usize {
    s.encode_utf16().count() * 2
}
