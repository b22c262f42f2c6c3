//! Base64 text as Serato embeds it
//!
//! Serato writes unpadded base64, broken into 72-character lines. Files in
//! the wild also carry NUL padding after the text, a dangling final
//! character, and non-zero trailing bits, so decoding is lenient about all
//! of those.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use crate::error::Result;

/// Characters per line of encoded text
pub const LINE_LENGTH: usize = 72;

const SERATO_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Encode bytes as line-wrapped, unpadded base64
pub fn encode_base64(data: &[u8]) -> String {
    let encoded = SERATO_BASE64.encode(data);

    let mut text = String::with_capacity(encoded.len() + encoded.len() / LINE_LENGTH);
    for (i, ch) in encoded.chars().enumerate() {
        if i > 0 && i % LINE_LENGTH == 0 {
            text.push('\n');
        }
        text.push(ch);
    }
    text
}

/// Decode base64 text, ignoring line breaks, NULs and padding
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let mut cleaned: String = text
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && *c != '\0' && *c != '=')
        .collect();

    // A lone trailing sextet cannot form a byte; complete it
    if cleaned.len() % 4 == 1 {
        cleaned.push('A');
    }

    Ok(SERATO_BASE64.decode(cleaned)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let data: Vec<u8> = (0..=255u8).collect();
        assert_eq!(decode_base64(&encode_base64(&data)).unwrap(), data);
    }

    #[test]
    fn test_lines_are_wrapped() {
        let text = encode_base64(&[0xAB; 200]);
        assert!(text.lines().all(|line| line.len() <= LINE_LENGTH));
        assert!(text.lines().count() > 1);
    }

    #[test]
    fn test_no_padding() {
        assert_eq!(encode_base64(b"a"), "YQ");
    }

    #[test]
    fn test_tolerates_padding_and_nuls() {
        assert_eq!(decode_base64("YQ==\0\0\0").unwrap(), b"a");
        assert_eq!(decode_base64("YW\nJj").unwrap(), b"abc");
    }

    #[test]
    fn test_dangling_character() {
        // "YWJj" + one stray character decodes the first three bytes intact
        let decoded = decode_base64("YWJjZ").unwrap();
        assert_eq!(&decoded[..3], b"abc");
    }

    #[test]
    fn test_invalid_character_is_error() {
        assert!(decode_base64("Y*Jj").is_err());
    }
}
