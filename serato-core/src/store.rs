//! Embedded marker fields and the containers that hold them
//!
//! Serato stores markers inside the audio file itself. The container I/O is
//! behind `MarkerFieldStore` so the database never touches audio files
//! directly; `Id3MarkerStore` handles ID3v2 (MP3/AIFF/WAV tags) and
//! `MemoryMarkerStore` keeps fields in memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use id3::frame::{Content, EncapsulatedObject};
use id3::{Frame, Tag, TagLike, Version};
use tracing::debug;

use crate::error::{Error, Result};

/// Which of the two legacy slot layouts a container carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyLayout {
    /// 19-byte slots (MP4, FLAC, Ogg)
    Raw,
    /// 22-byte 7-bit slots (ID3)
    Encoded,
}

/// Raw marker fields of one audio file, as stored in its container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedFields {
    /// Base64 text of the Markers2 stream
    pub markers_v2: Option<String>,
    /// Complete legacy Markers_ field
    pub legacy_markers: Option<Vec<u8>>,
    /// Complete BeatGrid field
    pub beat_grid: Option<Vec<u8>>,
}

impl EmbeddedFields {
    pub fn is_empty(&self) -> bool {
        self.markers_v2.is_none() && self.legacy_markers.is_none() && self.beat_grid.is_none()
    }
}

/// Reads and writes embedded marker fields of audio files
pub trait MarkerFieldStore {
    /// Layout of the legacy field in this container
    fn legacy_layout(&self) -> LegacyLayout;

    fn read_fields(&self, path: &Path) -> Result<EmbeddedFields>;

    /// Replace every marker field of the file. `None` fields are removed.
    fn write_fields(&mut self, path: &Path, fields: &EmbeddedFields) -> Result<()>;
}

pub const GEOB_MARKERS2: &str = "Serato Markers2";
pub const GEOB_LEGACY_MARKERS: &str = "Serato Markers_";
pub const GEOB_BEAT_GRID: &str = "Serato BeatGrid";

const GEOB_MIME: &str = "application/octet-stream";

/// Prefix of the Markers2 GEOB payload, ahead of the base64 text
const MARKERS2_GEOB_PREFIX: [u8; 2] = [0x01, 0x01];

/// Serato zero-pads the Markers2 GEOB payload to at least this size
pub const MARKERS2_GEOB_MIN_SIZE: usize = 470;

/// Marker fields in ID3v2 general encapsulated object (GEOB) frames
#[derive(Debug, Clone, Copy, Default)]
pub struct Id3MarkerStore;

impl Id3MarkerStore {
    pub fn new() -> Self {
        Self
    }
}

fn is_serato_geob(description: &str) -> bool {
    matches!(
        description,
        GEOB_MARKERS2 | GEOB_LEGACY_MARKERS | GEOB_BEAT_GRID
    )
}

fn geob_frame(description: &str, data: Vec<u8>) -> Frame {
    Frame::with_content(
        "GEOB",
        Content::EncapsulatedObject(EncapsulatedObject {
            mime_type: GEOB_MIME.to_string(),
            filename: String::new(),
            description: description.to_string(),
            data,
        }),
    )
}

fn markers2_geob_payload(text: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(MARKERS2_GEOB_MIN_SIZE.max(text.len() + 3));
    data.extend_from_slice(&MARKERS2_GEOB_PREFIX);
    data.extend_from_slice(text.as_bytes());
    // Always NUL-terminated
    data.push(0);
    if data.len() < MARKERS2_GEOB_MIN_SIZE {
        data.resize(MARKERS2_GEOB_MIN_SIZE, 0);
    }
    data
}

fn markers2_geob_text(data: &[u8]) -> Result<String> {
    let text = data.strip_prefix(&MARKERS2_GEOB_PREFIX).ok_or_else(|| {
        Error::MarkerFormat(format!(
            "unsupported Markers2 frame version {:02X?}",
            &data[..data.len().min(2)]
        ))
    })?;
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    std::str::from_utf8(&text[..end])
        .map(str::to_string)
        .map_err(|_| Error::MarkerFormat("Markers2 frame is not ASCII text".into()))
}

impl MarkerFieldStore for Id3MarkerStore {
    fn legacy_layout(&self) -> LegacyLayout {
        LegacyLayout::Encoded
    }

    fn read_fields(&self, path: &Path) -> Result<EmbeddedFields> {
        let tag = match Tag::read_from_path(path) {
            Ok(tag) => tag,
            Err(e) if matches!(e.kind, id3::ErrorKind::NoTag) => {
                debug!("No ID3 tag in {}", path.display());
                return Ok(EmbeddedFields::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut fields = EmbeddedFields::default();
        for frame in tag.frames() {
            let Content::EncapsulatedObject(object) = frame.content() else {
                continue;
            };
            match object.description.as_str() {
                GEOB_MARKERS2 => fields.markers_v2 = Some(markers2_geob_text(&object.data)?),
                GEOB_LEGACY_MARKERS => fields.legacy_markers = Some(object.data.clone()),
                GEOB_BEAT_GRID => fields.beat_grid = Some(object.data.clone()),
                _ => {}
            }
        }

        Ok(fields)
    }

    fn write_fields(&mut self, path: &Path, fields: &EmbeddedFields) -> Result<()> {
        let mut tag = match Tag::read_from_path(path) {
            Ok(tag) => tag,
            Err(e) if matches!(e.kind, id3::ErrorKind::NoTag) => Tag::new(),
            Err(e) => return Err(e.into()),
        };

        // Keep every GEOB that is not ours, then add ours back
        let kept: Vec<Frame> = tag
            .frames()
            .filter(|frame| match frame.content() {
                Content::EncapsulatedObject(object) => !is_serato_geob(&object.description),
                _ => false,
            })
            .cloned()
            .collect();
        tag.remove("GEOB");
        for frame in kept {
            tag.add_frame(frame);
        }

        if let Some(text) = &fields.markers_v2 {
            tag.add_frame(geob_frame(GEOB_MARKERS2, markers2_geob_payload(text)));
        }
        if let Some(data) = &fields.legacy_markers {
            tag.add_frame(geob_frame(GEOB_LEGACY_MARKERS, data.clone()));
        }
        if let Some(data) = &fields.beat_grid {
            tag.add_frame(geob_frame(GEOB_BEAT_GRID, data.clone()));
        }

        // Keep the file's tag version; ID3v2.2 cannot be written back
        let version = match tag.version() {
            Version::Id3v22 => Version::Id3v23,
            version => version,
        };
        tag.write_to_path(path, version)?;
        debug!("Wrote marker fields to {}", path.display());
        Ok(())
    }
}

/// Fields kept in memory, keyed by path
#[derive(Debug, Clone)]
pub struct MemoryMarkerStore {
    layout: LegacyLayout,
    fields: HashMap<PathBuf, EmbeddedFields>,
    writes: Vec<PathBuf>,
}

impl MemoryMarkerStore {
    pub fn new(layout: LegacyLayout) -> Self {
        Self {
            layout,
            fields: HashMap::new(),
            writes: Vec::new(),
        }
    }

    /// Seed fields for a path without recording a write
    pub fn insert(&mut self, path: impl Into<PathBuf>, fields: EmbeddedFields) {
        self.fields.insert(path.into(), fields);
    }

    pub fn get(&self, path: &Path) -> Option<&EmbeddedFields> {
        self.fields.get(path)
    }

    /// Every path written, in write order
    pub fn writes(&self) -> &[PathBuf] {
        &self.writes
    }
}

impl Default for MemoryMarkerStore {
    fn default() -> Self {
        Self::new(LegacyLayout::Encoded)
    }
}

impl MarkerFieldStore for MemoryMarkerStore {
    fn legacy_layout(&self) -> LegacyLayout {
        self.layout
    }

    fn read_fields(&self, path: &Path) -> Result<EmbeddedFields> {
        Ok(self.fields.get(path).cloned().unwrap_or_default())
    }

    fn write_fields(&mut self, path: &Path, fields: &EmbeddedFields) -> Result<()> {
        self.fields.insert(path.to_path_buf(), fields.clone());
        self.writes.push(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::{CueMarker, GridMarker, Marker, Rgb, TrackMarkers};
    use tempfile::TempDir;

    fn sample_fields() -> EmbeddedFields {
        let mut markers = TrackMarkers::new();
        markers.add_marker(Marker::Cue(CueMarker::new("Intro", 1_500, 0, Rgb::new(0xCC, 0, 0))));
        markers.set_grid_markers(vec![GridMarker::new(0.1, 124.0)]);
        markers.to_fields(LegacyLayout::Encoded).unwrap()
    }

    #[test]
    fn test_markers2_payload_padding() {
        let payload = markers2_geob_payload("AQE");
        assert_eq!(payload.len(), MARKERS2_GEOB_MIN_SIZE);
        assert_eq!(&payload[..5], &[0x01, 0x01, b'A', b'Q', b'E']);
        assert_eq!(markers2_geob_text(&payload).unwrap(), "AQE");

        let long = "A".repeat(600);
        assert_eq!(markers2_geob_payload(&long).len(), 603);
    }

    #[test]
    fn test_markers2_payload_bad_prefix() {
        assert!(markers2_geob_text(&[0x02, 0x01, b'A']).is_err());
    }

    #[test]
    fn test_id3_missing_tag_reads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("silence.mp3");
        std::fs::write(&path, [0u8; 64]).unwrap();

        let fields = Id3MarkerStore::new().read_fields(&path).unwrap();
        assert!(fields.is_empty());
    }

    #[test]
    fn test_id3_roundtrip_keeps_foreign_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("track.mp3");
        std::fs::write(&path, [0u8; 64]).unwrap();

        let mut tag = Tag::new();
        tag.set_title("Song");
        tag.add_frame(geob_frame("Other App", vec![1, 2, 3]));
        tag.add_frame(geob_frame(GEOB_BEAT_GRID, vec![9, 9]));
        tag.write_to_path(&path, Version::Id3v24).unwrap();

        let mut store = Id3MarkerStore::new();
        let fields = sample_fields();
        store.write_fields(&path, &fields).unwrap();

        assert_eq!(store.read_fields(&path).unwrap(), fields);

        let tag = Tag::read_from_path(&path).unwrap();
        assert_eq!(tag.title(), Some("Song"));
        let descriptions: Vec<String> = tag
            .frames()
            .filter_map(|frame| match frame.content() {
                Content::EncapsulatedObject(object) => Some(object.description.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(descriptions.len(), 4);
        assert!(descriptions.contains(&"Other App".to_string()));
    }

    #[test]
    fn test_id3_keeps_tag_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("track.mp3");
        std::fs::write(&path, [0u8; 64]).unwrap();

        let mut tag = Tag::new();
        tag.set_artist("Artist");
        tag.write_to_path(&path, Version::Id3v23).unwrap();

        let mut store = Id3MarkerStore::new();
        store.write_fields(&path, &sample_fields()).unwrap();

        let tag = Tag::read_from_path(&path).unwrap();
        assert_eq!(tag.version(), Version::Id3v23);
        assert_eq!(tag.artist(), Some("Artist"));
        assert_eq!(store.read_fields(&path).unwrap(), sample_fields());
    }

    #[test]
    fn test_id3_removed_field_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("track.mp3");
        std::fs::write(&path, [0u8; 64]).unwrap();

        let mut store = Id3MarkerStore::new();
        store.write_fields(&path, &sample_fields()).unwrap();

        let mut fields = sample_fields();
        fields.beat_grid = None;
        store.write_fields(&path, &fields).unwrap();

        assert_eq!(store.read_fields(&path).unwrap().beat_grid, None);
    }

    #[test]
    fn test_memory_store_records_writes() {
        let mut store = MemoryMarkerStore::new(LegacyLayout::Raw);
        let path = Path::new("/music/a.mp3");
        assert!(store.read_fields(path).unwrap().is_empty());

        store.insert(path, sample_fields());
        assert!(store.writes().is_empty());

        store.write_fields(path, &EmbeddedFields::default()).unwrap();
        assert_eq!(store.writes(), &[PathBuf::from("/music/a.mp3")]);
        assert!(store.get(path).unwrap().is_empty());
        assert_eq!(store.legacy_layout(), LegacyLayout::Raw);
    }
}
