//! Serato tag stream codec
//!
//! The database file and every crate file are a flat sequence of tags:
//! - 4 bytes: ASCII identifier (e.g. "otrk", "pfil")
//! - 4 bytes: big-endian payload length
//! - payload, interpreted by the identifier's leading byte
//!
//! Object tags nest another tag stream as their payload. Inside an object
//! identifiers are unique (the last occurrence wins) and children are always
//! written in ascending identifier order, which keeps round trips byte-stable.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;

use binrw::{binrw, BinRead};

use crate::error::{Error, Result};
use crate::string::{decode_utf16be, encode_utf16be, encoded_length};

/// Size of the identifier + length header in front of every payload
pub const TAG_HEADER_SIZE: usize = 8;

/// Version tag present at the top of the database and every crate file
pub const VERSION_TAG: TagId = TagId::new(*b"vrsn");

/// Tag header as it appears on the wire
#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Copy)]
struct TagHeader {
    id: [u8; 4],
    length: u32,
}

/// Four-character tag identifier.
///
/// Ordering is byte-wise, which equals ordering the identifier as a
/// big-endian u32.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId([u8; 4]);

impl TagId {
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Parse an identifier from a 4-character ASCII string
    pub fn parse(s: &str) -> Option<Self> {
        let bytes: [u8; 4] = s.as_bytes().try_into().ok()?;
        Self::is_valid(&bytes).then_some(Self(bytes))
    }

    pub fn as_bytes(&self) -> [u8; 4] {
        self.0
    }

    /// The payload kind implied by the identifier's leading byte
    pub fn kind(&self) -> TagKind {
        match self.0[0] {
            b'o' => TagKind::Object,
            b't' | b'v' => TagKind::Text,
            b'p' => TagKind::Path,
            b'u' => TagKind::UInt32,
            b's' => TagKind::UInt16,
            b'b' => TagKind::Boolean,
            _ => TagKind::Blob,
        }
    }

    fn is_valid(bytes: &[u8; 4]) -> bool {
        bytes.iter().all(|b| b.is_ascii_graphic())
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagId({})", self)
    }
}

/// Payload interpretation of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Object,
    Text,
    Path,
    UInt32,
    UInt16,
    Boolean,
    Blob,
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TagKind::Object => "object",
            TagKind::Text => "text",
            TagKind::Path => "path",
            TagKind::UInt32 => "uint32",
            TagKind::UInt16 => "uint16",
            TagKind::Boolean => "boolean",
            TagKind::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// Decoded payload of a tag
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Object(TagObject),
    Text(String),
    Path(String),
    UInt32(u32),
    UInt16(u16),
    Boolean(bool),
    Blob(Vec<u8>),
}

impl TagValue {
    pub fn kind(&self) -> TagKind {
        match self {
            TagValue::Object(_) => TagKind::Object,
            TagValue::Text(_) => TagKind::Text,
            TagValue::Path(_) => TagKind::Path,
            TagValue::UInt32(_) => TagKind::UInt32,
            TagValue::UInt16(_) => TagKind::UInt16,
            TagValue::Boolean(_) => TagKind::Boolean,
            TagValue::Blob(_) => TagKind::Blob,
        }
    }
}

/// A single identified tag
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    id: TagId,
    value: TagValue,
}

impl Tag {
    /// Build a tag, panicking if the identifier's type class disagrees
    /// with the value. A mismatched pair is a programming error.
    pub fn new(id: TagId, value: TagValue) -> Self {
        assert_eq!(
            id.kind(),
            value.kind(),
            "tag '{}' is a {} tag and cannot hold a {} value",
            id,
            id.kind(),
            value.kind()
        );
        Self { id, value }
    }

    pub fn object(id: TagId, object: TagObject) -> Self {
        Self::new(id, TagValue::Object(object))
    }

    pub fn text(id: TagId, text: impl Into<String>) -> Self {
        Self::new(id, TagValue::Text(text.into()))
    }

    pub fn path(id: TagId, path: impl Into<String>) -> Self {
        Self::new(id, TagValue::Path(path.into()))
    }

    pub fn uint32(id: TagId, value: u32) -> Self {
        Self::new(id, TagValue::UInt32(value))
    }

    pub fn uint16(id: TagId, value: u16) -> Self {
        Self::new(id, TagValue::UInt16(value))
    }

    pub fn boolean(id: TagId, value: bool) -> Self {
        Self::new(id, TagValue::Boolean(value))
    }

    pub fn blob(id: TagId, data: Vec<u8>) -> Self {
        Self::new(id, TagValue::Blob(data))
    }

    pub fn id(&self) -> TagId {
        self.id
    }

    pub fn value(&self) -> &TagValue {
        &self.value
    }

    pub fn kind(&self) -> TagKind {
        self.value.kind()
    }

    /// String payload of a text or path tag
    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            TagValue::Text(s) | TagValue::Path(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uint32(&self) -> Option<u32> {
        match self.value {
            TagValue::UInt32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_uint16(&self) -> Option<u16> {
        match self.value {
            TagValue::UInt16(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self.value {
            TagValue::Boolean(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match &self.value {
            TagValue::Blob(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&TagObject> {
        match &self.value {
            TagValue::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<TagObject> {
        match self.value {
            TagValue::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Size of the encoded payload, excluding the header
    pub fn payload_len(&self) -> usize {
        match &self.value {
            TagValue::Object(object) => object.payload_len(),
            TagValue::Text(s) | TagValue::Path(s) => encoded_length(s),
            TagValue::UInt32(_) => 4,
            TagValue::UInt16(_) => 2,
            TagValue::Boolean(_) => 1,
            TagValue::Blob(data) => data.len(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        TAG_HEADER_SIZE + self.payload_len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buffer);
        buffer
    }

    /// Append identifier, length and payload to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.0);
        out.extend_from_slice(&(self.payload_len() as u32).to_be_bytes());

        match &self.value {
            TagValue::Object(object) => object.encode_into(out),
            TagValue::Text(s) | TagValue::Path(s) => out.extend_from_slice(&encode_utf16be(s)),
            TagValue::UInt32(v) => out.extend_from_slice(&v.to_be_bytes()),
            TagValue::UInt16(v) => out.extend_from_slice(&v.to_be_bytes()),
            TagValue::Boolean(v) => out.push(u8::from(*v)),
            TagValue::Blob(data) => out.extend_from_slice(data),
        }
    }

    /// Decode the tag at the start of `buffer`.
    /// Returns the tag and the number of bytes it occupied.
    pub fn decode(buffer: &[u8]) -> Result<(Tag, usize)> {
        if buffer.len() < TAG_HEADER_SIZE {
            return Err(Error::MalformedTag(format!(
                "{} trailing bytes cannot hold a tag header",
                buffer.len()
            )));
        }

        let header = TagHeader::read_be(&mut Cursor::new(buffer))?;
        if !TagId::is_valid(&header.id) {
            return Err(Error::MalformedTag(format!(
                "invalid identifier {:02X?}",
                header.id
            )));
        }

        let id = TagId(header.id);
        let length = header.length as usize;
        let remaining = buffer.len() - TAG_HEADER_SIZE;
        if length > remaining {
            return Err(Error::MalformedTag(format!(
                "tag '{}' declares {} payload bytes but only {} remain",
                id, length, remaining
            )));
        }

        let end = TAG_HEADER_SIZE + length;
        let value = decode_payload(id, &buffer[TAG_HEADER_SIZE..end])?;
        Ok((Tag { id, value }, end))
    }

    /// Decode a single tag whose identifier must belong to `kind`
    pub fn decode_as(buffer: &[u8], kind: TagKind) -> Result<Tag> {
        let (tag, _) = Tag::decode(buffer)?;
        if tag.id.kind() != kind {
            return Err(Error::MalformedTag(format!(
                "tag '{}' is a {} tag, not a {} tag",
                tag.id,
                tag.id.kind(),
                kind
            )));
        }
        Ok(tag)
    }
}

fn decode_payload(id: TagId, payload: &[u8]) -> Result<TagValue> {
    let wrong_length = |expected: usize| {
        Error::MalformedTag(format!(
            "tag '{}' has {} payload bytes (expected {})",
            id,
            payload.len(),
            expected
        ))
    };

    let value = match id.kind() {
        TagKind::Object => TagValue::Object(TagObject::decode(payload)?),
        TagKind::Text => TagValue::Text(decode_string(id, payload)?),
        TagKind::Path => TagValue::Path(decode_string(id, payload)?),
        TagKind::UInt32 => {
            let bytes: [u8; 4] = payload.try_into().map_err(|_| wrong_length(4))?;
            TagValue::UInt32(u32::from_be_bytes(bytes))
        }
        TagKind::UInt16 => {
            let bytes: [u8; 2] = payload.try_into().map_err(|_| wrong_length(2))?;
            TagValue::UInt16(u16::from_be_bytes(bytes))
        }
        TagKind::Boolean => match payload {
            [byte] => TagValue::Boolean(*byte != 0),
            _ => return Err(wrong_length(1)),
        },
        TagKind::Blob => TagValue::Blob(payload.to_vec()),
    };

    Ok(value)
}

fn decode_string(id: TagId, payload: &[u8]) -> Result<String> {
    decode_utf16be(payload).map_err(|e| Error::MalformedTag(format!("tag '{}': {}", id, e)))
}

/// Children of an object tag, keyed and ordered by identifier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagObject {
    children: BTreeMap<TagId, Tag>,
}

impl TagObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a nested tag stream. Duplicate identifiers keep the last one.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut object = Self::new();
        for tag in parse_tags(payload)? {
            object.insert(tag);
        }
        Ok(object)
    }

    /// Insert or replace the child with the same identifier
    pub fn insert(&mut self, tag: Tag) -> Option<Tag> {
        self.children.insert(tag.id, tag)
    }

    pub fn get(&self, id: TagId) -> Option<&Tag> {
        self.children.get(&id)
    }

    pub fn remove(&mut self, id: TagId) -> Option<Tag> {
        self.children.remove(&id)
    }

    pub fn contains(&self, id: TagId) -> bool {
        self.children.contains_key(&id)
    }

    pub fn text(&self, id: TagId) -> Option<&str> {
        self.get(id).and_then(Tag::as_text)
    }

    pub fn uint32(&self, id: TagId) -> Option<u32> {
        self.get(id).and_then(Tag::as_uint32)
    }

    pub fn uint16(&self, id: TagId) -> Option<u16> {
        self.get(id).and_then(Tag::as_uint16)
    }

    pub fn boolean(&self, id: TagId) -> Option<bool> {
        self.get(id).and_then(Tag::as_boolean)
    }

    /// Children in ascending identifier order
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.children.values()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn payload_len(&self) -> usize {
        self.children.values().map(Tag::encoded_len).sum()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        for tag in self.children.values() {
            tag.encode_into(out);
        }
    }
}

/// Parse a whole buffer into tags, in buffer order
pub fn parse_tags(buffer: &[u8]) -> Result<Vec<Tag>> {
    let mut tags = Vec::new();
    let mut offset = 0;

    while offset < buffer.len() {
        let (tag, consumed) = Tag::decode(&buffer[offset..])?;
        tags.push(tag);
        offset += consumed;
    }

    Ok(tags)
}

/// Encode a sequence of tags, preserving their order
pub fn encode_tags(tags: &[Tag]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(tags.iter().map(Tag::encoded_len).sum());
    for tag in tags {
        tag.encode_into(&mut buffer);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    const TITLE: TagId = TagId::new(*b"tsng");
    const PATH: TagId = TagId::new(*b"pfil");
    const ADDED: TagId = TagId::new(*b"uadd");
    const MISSING: TagId = TagId::new(*b"bmis");
    const TRACK: TagId = TagId::new(*b"otrk");

    fn roundtrip(tag: &Tag) -> Tag {
        let encoded = tag.encode();
        assert_eq!(encoded.len(), tag.encoded_len());
        let (decoded, consumed) = Tag::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        decoded
    }

    #[test]
    fn test_identifier_type_classes() {
        assert_eq!(TagId::new(*b"otrk").kind(), TagKind::Object);
        assert_eq!(TagId::new(*b"tsng").kind(), TagKind::Text);
        assert_eq!(TagId::new(*b"vrsn").kind(), TagKind::Text);
        assert_eq!(TagId::new(*b"pfil").kind(), TagKind::Path);
        assert_eq!(TagId::new(*b"uadd").kind(), TagKind::UInt32);
        assert_eq!(TagId::new(*b"sbav").kind(), TagKind::UInt16);
        assert_eq!(TagId::new(*b"bmis").kind(), TagKind::Boolean);
        assert_eq!(TagId::new(*b"adat").kind(), TagKind::Blob);
    }

    #[test]
    fn test_text_tag_bytes() {
        let tag = Tag::text(TITLE, "A");
        assert_eq!(
            tag.encode(),
            vec![0x74, 0x73, 0x6E, 0x67, 0x00, 0x00, 0x00, 0x02, 0x00, 0x41]
        );
    }

    #[test]
    fn test_scalar_roundtrips() {
        for tag in [
            Tag::text(TITLE, "Strings & Things ♫"),
            Tag::path(PATH, "Music/Artist/track.mp3"),
            Tag::uint32(ADDED, 0xDEAD_BEEF),
            Tag::uint16(TagId::new(*b"sbav"), 0x0102),
            Tag::boolean(MISSING, true),
            Tag::boolean(MISSING, false),
            Tag::blob(TagId::new(*b"adat"), vec![1, 2, 3, 0, 255]),
        ] {
            assert_eq!(roundtrip(&tag), tag);
        }
    }

    #[test]
    fn test_object_roundtrip() {
        let mut object = TagObject::new();
        object.insert(Tag::path(PATH, "a.mp3"));
        object.insert(Tag::uint32(ADDED, 7));
        let tag = Tag::object(TRACK, object);

        let decoded = roundtrip(&tag);
        assert_eq!(decoded, tag);
        assert_eq!(decoded.as_object().unwrap().text(PATH), Some("a.mp3"));
    }

    #[test]
    fn test_object_children_encoded_in_identifier_order() {
        let mut object = TagObject::new();
        object.insert(Tag::text(TITLE, "t"));
        object.insert(Tag::uint32(ADDED, 1));
        object.insert(Tag::path(PATH, "p"));

        let encoded = Tag::object(TRACK, object).encode();
        let children = parse_tags(&encoded[TAG_HEADER_SIZE..]).unwrap();
        let ids: Vec<TagId> = children.iter().map(Tag::id).collect();
        assert_eq!(ids, vec![PATH, TITLE, ADDED]);
    }

    #[test]
    fn test_duplicate_child_last_wins() {
        let mut payload = Tag::text(TITLE, "first").encode();
        payload.extend(Tag::text(TITLE, "second").encode());

        let object = TagObject::decode(&payload).unwrap();
        assert_eq!(object.len(), 1);
        assert_eq!(object.text(TITLE), Some("second"));
    }

    #[test]
    fn test_parse_tags_keeps_buffer_order() {
        let tags = vec![Tag::text(TITLE, "b"), Tag::path(PATH, "a")];
        let parsed = parse_tags(&encode_tags(&tags)).unwrap();
        assert_eq!(parsed, tags);
    }

    #[test]
    fn test_length_past_end_is_malformed() {
        let mut encoded = Tag::text(TITLE, "abc").encode();
        encoded.truncate(encoded.len() - 1);
        assert!(matches!(parse_tags(&encoded), Err(Error::MalformedTag(_))));
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        assert!(matches!(
            parse_tags(&[0x74, 0x73, 0x6E]),
            Err(Error::MalformedTag(_))
        ));
    }

    #[test]
    fn test_wrong_scalar_length_is_malformed() {
        let bytes = [b'u', b'a', b'd', b'd', 0, 0, 0, 3, 1, 2, 3];
        assert!(matches!(Tag::decode(&bytes), Err(Error::MalformedTag(_))));
    }

    #[test]
    fn test_non_ascii_identifier_is_malformed() {
        let bytes = [0x00, 0x01, 0x02, 0x03, 0, 0, 0, 0];
        assert!(matches!(Tag::decode(&bytes), Err(Error::MalformedTag(_))));
    }

    #[test]
    fn test_decode_as_rejects_other_type_class() {
        let encoded = Tag::uint32(ADDED, 5).encode();
        assert!(Tag::decode_as(&encoded, TagKind::UInt32).is_ok());
        assert!(matches!(
            Tag::decode_as(&encoded, TagKind::Text),
            Err(Error::MalformedTag(_))
        ));
    }

    #[test]
    #[should_panic(expected = "cannot hold a text value")]
    fn test_mismatched_constructor_panics() {
        let _ = Tag::text(ADDED, "not a number");
    }

    #[test]
    fn test_identifier_parse() {
        assert_eq!(TagId::parse("otrk"), Some(TRACK));
        assert_eq!(TagId::parse("otr"), None);
        assert_eq!(TRACK.to_string(), "otrk");
    }
}
