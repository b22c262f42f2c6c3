//! Markers2 record stream
//!
//! Decoded layout of the "Serato Markers2" field:
//! - 2 bytes: version (01 01)
//! - records: NUL-terminated ASCII name, 4-byte big-endian size, payload
//! - a single zero byte where the next name would start
//!
//! CUE payload (offsets in bytes):
//! ```text
//! 0  pad      1  index    2  position (4)   6  pad
//! 7  rgb (3)  10 pad (2)  12 label, NUL-terminated
//! ```
//! LOOP payload:
//! ```text
//! 0  pad        1  index      2  start (4)     6  end (4)
//! 10 FF FF FF FF              14 00 rgb (4)    18 pad
//! 19 locked     20 label, NUL-terminated
//! ```
//! Records with any other name are kept verbatim.

use serde::Serialize;

use super::{field, CueMarker, LoopMarker, Marker, Rgb};
use crate::error::{Error, Result};

pub const MARKERS2_VERSION: [u8; 2] = [0x01, 0x01];

const CUE_NAME: &str = "CUE";
const LOOP_NAME: &str = "LOOP";

const CUE_MIN_PAYLOAD: usize = 13;
const LOOP_MIN_PAYLOAD: usize = 21;

/// A record this library does not interpret
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpaqueRecord {
    pub name: String,
    pub data: Vec<u8>,
}

/// One entry of the Markers2 stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Markers2Record {
    Marker(Marker),
    Opaque(OpaqueRecord),
}

impl Markers2Record {
    pub fn name(&self) -> &str {
        match self {
            Markers2Record::Marker(Marker::Cue(_)) => CUE_NAME,
            Markers2Record::Marker(Marker::Loop(_)) => LOOP_NAME,
            Markers2Record::Opaque(opaque) => &opaque.name,
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        match self {
            Markers2Record::Marker(Marker::Cue(cue)) => cue.v2_payload(),
            Markers2Record::Marker(Marker::Loop(lp)) => lp.v2_payload(),
            Markers2Record::Opaque(opaque) => opaque.data.clone(),
        }
    }

    /// Name, size and payload
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let payload = self.payload();
        out.extend_from_slice(self.name().as_bytes());
        out.push(0);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);
    }
}

impl CueMarker {
    /// Decode a record that must be named "CUE"
    pub fn from_v2_record(name: &str, payload: &[u8]) -> Result<Self> {
        expect_name(name, CUE_NAME)?;
        if payload.len() < CUE_MIN_PAYLOAD {
            return Err(Error::MarkerFormat(format!(
                "CUE payload is {} bytes, need at least {}",
                payload.len(),
                CUE_MIN_PAYLOAD
            )));
        }

        Ok(Self {
            index: payload[1],
            position_ms: be_u32(&payload[2..6]),
            color: Rgb::new(payload[7], payload[8], payload[9]),
            label: read_label(&payload[12..]),
        })
    }

    pub fn v2_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(CUE_MIN_PAYLOAD + self.label.len());
        payload.push(0x00);
        payload.push(self.index);
        payload.extend_from_slice(&self.position_ms.to_be_bytes());
        payload.push(0x00);
        payload.extend_from_slice(&[self.color.red, self.color.green, self.color.blue]);
        payload.extend_from_slice(&[0x00, 0x00]);
        payload.extend_from_slice(self.label.as_bytes());
        payload.push(0x00);
        payload
    }

    /// Full record bytes: name, size, payload
    pub fn to_v2_record(&self) -> Vec<u8> {
        let mut out = Vec::new();
        Markers2Record::Marker(Marker::Cue(self.clone())).encode_into(&mut out);
        out
    }
}

impl LoopMarker {
    /// Decode a record that must be named "LOOP"
    pub fn from_v2_record(name: &str, payload: &[u8]) -> Result<Self> {
        expect_name(name, LOOP_NAME)?;
        if payload.len() < LOOP_MIN_PAYLOAD {
            return Err(Error::MarkerFormat(format!(
                "LOOP payload is {} bytes, need at least {}",
                payload.len(),
                LOOP_MIN_PAYLOAD
            )));
        }

        Ok(Self {
            index: payload[1],
            start_ms: be_u32(&payload[2..6]),
            end_ms: be_u32(&payload[6..10]),
            color: Rgb::new(payload[15], payload[16], payload[17]),
            locked: payload[19] != 0,
            label: read_label(&payload[20..]),
        })
    }

    pub fn v2_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(LOOP_MIN_PAYLOAD + self.label.len());
        payload.push(0x00);
        payload.push(self.index);
        payload.extend_from_slice(&self.start_ms.to_be_bytes());
        payload.extend_from_slice(&self.end_ms.to_be_bytes());
        payload.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        payload.extend_from_slice(&[0x00, self.color.red, self.color.green, self.color.blue]);
        payload.push(0x00);
        payload.push(u8::from(self.locked));
        payload.extend_from_slice(self.label.as_bytes());
        payload.push(0x00);
        payload
    }

    pub fn to_v2_record(&self) -> Vec<u8> {
        let mut out = Vec::new();
        Markers2Record::Marker(Marker::Loop(self.clone())).encode_into(&mut out);
        out
    }
}

fn expect_name(found: &str, expected: &str) -> Result<()> {
    if found == expected {
        Ok(())
    } else {
        Err(Error::MarkerFormat(format!(
            "expected a {} record, found '{}'",
            expected, found
        )))
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_label(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Decode the binary Markers2 stream (already base64-decoded)
pub fn decode_markers2(data: &[u8]) -> Result<Vec<Markers2Record>> {
    if data.len() < 2 || data[..2] != MARKERS2_VERSION {
        return Err(Error::MarkerFormat(format!(
            "unsupported Markers2 version {:02X?}",
            &data[..data.len().min(2)]
        )));
    }

    let mut records = Vec::new();
    let mut offset = 2;

    while offset < data.len() {
        let rest = &data[offset..];
        let name_len = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            Error::MarkerFormat("unterminated Markers2 record name".into())
        })?;

        // Zero byte in place of a name ends the stream
        if name_len == 0 {
            break;
        }

        let name = std::str::from_utf8(&rest[..name_len])
            .ok()
            .filter(|name| name.is_ascii())
            .ok_or_else(|| Error::MarkerFormat("non-ASCII Markers2 record name".into()))?;

        let size_start = name_len + 1;
        let payload_start = size_start + 4;
        if rest.len() < payload_start {
            return Err(Error::MarkerFormat(format!(
                "record '{}' is missing its size",
                name
            )));
        }

        let size = be_u32(&rest[size_start..payload_start]) as usize;
        let payload_end = payload_start
            .checked_add(size)
            .filter(|&end| end <= rest.len())
            .ok_or_else(|| {
                Error::MarkerFormat(format!(
                    "record '{}' declares {} bytes past the end of the field",
                    name, size
                ))
            })?;
        let payload = &rest[payload_start..payload_end];

        let record = match name {
            CUE_NAME => Markers2Record::Marker(Marker::Cue(CueMarker::from_v2_record(name, payload)?)),
            LOOP_NAME => Markers2Record::Marker(Marker::Loop(LoopMarker::from_v2_record(name, payload)?)),
            _ => Markers2Record::Opaque(OpaqueRecord {
                name: name.to_string(),
                data: payload.to_vec(),
            }),
        };
        records.push(record);
        offset += payload_end;
    }

    Ok(records)
}

/// Encode records into the binary Markers2 stream, terminator included
pub fn encode_markers2(records: &[Markers2Record]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 * records.len() + 3);
    out.extend_from_slice(&MARKERS2_VERSION);
    for record in records {
        record.encode_into(&mut out);
    }
    out.push(0x00);
    out
}

/// Decode the base64 text stored in the container
pub fn decode_markers2_field(text: &str) -> Result<Vec<Markers2Record>> {
    decode_markers2(&field::decode_base64(text)?)
}

/// Encode records into the base64 text stored in the container
pub fn encode_markers2_field(records: &[Markers2Record]) -> String {
    field::encode_base64(&encode_markers2(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cue() -> CueMarker {
        CueMarker::new("TEST", 187_750, 1, Rgb::new(0x45, 0xDC, 0x02))
    }

    #[test]
    fn test_cue_record_bytes() {
        assert_eq!(
            test_cue().to_v2_record(),
            vec![
                0x43, 0x55, 0x45, 0x00, 0x00, 0x00, 0x00, 0x11, 0x00, 0x01, 0x00, 0x02, 0xDD,
                0x66, 0x00, 0x45, 0xDC, 0x02, 0x00, 0x00, 0x54, 0x45, 0x53, 0x54, 0x00,
            ]
        );
    }

    #[test]
    fn test_cue_record_decodes() {
        let record = test_cue().to_v2_record();
        let cue = CueMarker::from_v2_record("CUE", &record[8..]).unwrap();
        assert_eq!(cue, test_cue());
    }

    #[test]
    fn test_loop_record_layout() {
        let mut lp = LoopMarker::new("Verse", 1_000, 9_000, 2);
        lp.locked = true;
        let payload = lp.v2_payload();

        assert_eq!(payload.len(), LOOP_MIN_PAYLOAD + 5);
        assert_eq!(&payload[10..14], &[0xFF; 4]);
        assert_eq!(&payload[14..18], &[0x00, 0x27, 0xAA, 0xE1]);
        assert_eq!(payload[19], 0x01);
        assert_eq!(LoopMarker::from_v2_record("LOOP", &payload).unwrap(), lp);
    }

    #[test]
    fn test_wrong_literal_name_is_error() {
        let payload = test_cue().v2_payload();
        assert!(matches!(
            CueMarker::from_v2_record("LOOP", &payload),
            Err(Error::MarkerFormat(_))
        ));
        assert!(matches!(
            LoopMarker::from_v2_record("CUE", &payload),
            Err(Error::MarkerFormat(_))
        ));
    }

    #[test]
    fn test_short_payload_is_error() {
        assert!(CueMarker::from_v2_record("CUE", &[0x00, 0x01, 0x02]).is_err());
    }

    #[test]
    fn test_stream_keeps_unknown_records() {
        let records = vec![
            Markers2Record::Opaque(OpaqueRecord {
                name: "BPMLOCK".into(),
                data: vec![0x01],
            }),
            Markers2Record::Marker(Marker::Cue(test_cue())),
            Markers2Record::Marker(Marker::Loop(LoopMarker::new("", 5, 10, 0))),
        ];

        let encoded = encode_markers2(&records);
        assert_eq!(&encoded[..2], &MARKERS2_VERSION);
        assert_eq!(*encoded.last().unwrap(), 0x00);
        assert_eq!(decode_markers2(&encoded).unwrap(), records);
    }

    #[test]
    fn test_bad_version_is_error() {
        assert!(decode_markers2(&[0x02, 0x01, 0x00]).is_err());
    }

    #[test]
    fn test_truncated_record_is_error() {
        let mut encoded = encode_markers2(&[Markers2Record::Marker(Marker::Cue(test_cue()))]);
        encoded.truncate(encoded.len() - 6);
        assert!(matches!(decode_markers2(&encoded), Err(Error::MarkerFormat(_))));
    }

    #[test]
    fn test_field_text_roundtrip() {
        let records = vec![Markers2Record::Marker(Marker::Cue(test_cue()))];
        let text = encode_markers2_field(&records);
        assert!(!text.contains('='));
        assert_eq!(decode_markers2_field(&text).unwrap(), records);
    }
}
