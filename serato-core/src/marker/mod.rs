//! Cue, loop and beat-grid markers embedded in audio files
//!
//! Serato keeps three independent marker fields per track:
//! - Markers2 (current): base64 text of name/size framed records
//! - Markers_ (legacy V1): fixed slots, either raw or 7-bit encoded
//! - BeatGrid: float positions with integral beat counts between them
//!
//! `TrackMarkers` is the decoded view of all three; the store in
//! `crate::store` moves the raw field values in and out of the container.

pub mod field;
pub mod grid;
pub mod v1;
pub mod v2;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::store::{EmbeddedFields, LegacyLayout};

pub use grid::{decode_grid_markers, encode_grid_markers};
pub use v1::{LegacyMarkers, RawSlotV1, EncodedSlotV1};
pub use v2::{Markers2Record, OpaqueRecord};

/// 24-bit colour as stored by Serato
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(0xFF, 0xFF, 0xFF);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes([0, self.red, self.green, self.blue])
    }

    /// Takes the low 24 bits
    pub fn from_u32(value: u32) -> Self {
        let [_, red, green, blue] = value.to_be_bytes();
        Self { red, green, blue }
    }
}

/// Hot cue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueMarker {
    pub label: String,
    pub position_ms: u32,
    /// 0-based hot cue slot
    pub index: u8,
    pub color: Rgb,
}

impl CueMarker {
    pub fn new(label: impl Into<String>, position_ms: u32, index: u8, color: Rgb) -> Self {
        Self {
            label: label.into(),
            position_ms,
            index,
            color,
        }
    }
}

/// Saved loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopMarker {
    pub label: String,
    pub start_ms: u32,
    pub end_ms: u32,
    /// 0-based loop slot
    pub index: u8,
    pub color: Rgb,
    pub locked: bool,
}

impl LoopMarker {
    pub fn new(label: impl Into<String>, start_ms: u32, end_ms: u32, index: u8) -> Self {
        Self {
            label: label.into(),
            start_ms,
            end_ms,
            index,
            color: LOOP_DEFAULT_COLOR,
            locked: false,
        }
    }
}

/// Colour Serato assigns to new loops
pub const LOOP_DEFAULT_COLOR: Rgb = Rgb::new(0x27, 0xAA, 0xE1);

/// A cue or a loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Marker {
    Cue(CueMarker),
    Loop(LoopMarker),
}

impl Marker {
    pub fn index(&self) -> u8 {
        match self {
            Marker::Cue(cue) => cue.index,
            Marker::Loop(lp) => lp.index,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Marker::Cue(cue) => &cue.label,
            Marker::Loop(lp) => &lp.label,
        }
    }

    pub fn color(&self) -> Rgb {
        match self {
            Marker::Cue(cue) => cue.color,
            Marker::Loop(lp) => lp.color,
        }
    }

    /// Cue position, or loop start
    pub fn position_ms(&self) -> u32 {
        match self {
            Marker::Cue(cue) => cue.position_ms,
            Marker::Loop(lp) => lp.start_ms,
        }
    }
}

/// Beat grid anchor.
///
/// The BPM of every marker but the last is derived from the integral number
/// of beats up to the next marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridMarker {
    pub position_secs: f32,
    pub bpm: f32,
}

impl GridMarker {
    pub fn new(position_secs: f32, bpm: f32) -> Self {
        Self { position_secs, bpm }
    }
}

/// Every marker stored for one track
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TrackMarkers {
    cues: Vec<CueMarker>,
    loops: Vec<LoopMarker>,
    grid: Vec<GridMarker>,
    /// Markers2 records this library does not interpret (COLOR, BPMLOCK, ...)
    opaque: Vec<OpaqueRecord>,
    /// Track colour carried by the legacy field
    track_color: Rgb,
}

impl TrackMarkers {
    pub fn new() -> Self {
        Self {
            track_color: Rgb::WHITE,
            ..Self::default()
        }
    }

    /// Decode the embedded fields of one track.
    /// Markers2 wins for cues and loops; the legacy field is the fallback.
    /// The track colour always comes from the legacy field.
    pub fn from_fields(fields: &EmbeddedFields, layout: LegacyLayout) -> Result<Self> {
        let mut markers = Self::new();

        let legacy_data = fields.legacy_markers.as_deref().filter(|d| !d.is_empty());
        match &fields.markers_v2 {
            Some(text) if !text.trim().is_empty() => {
                for record in v2::decode_markers2_field(text)? {
                    markers.push_record(record);
                }
                if let Some(data) = legacy_data {
                    match v1::decode_legacy_field(data, layout) {
                        Ok(legacy) => markers.track_color = legacy.track_color,
                        Err(e) => warn!("Ignoring unreadable legacy markers: {}", e),
                    }
                }
            }
            _ => {
                if let Some(data) = legacy_data {
                    let legacy = v1::decode_legacy_field(data, layout)?;
                    markers.cues = legacy.cues;
                    markers.loops = legacy.loops;
                    markers.track_color = legacy.track_color;
                }
            }
        }

        if let Some(data) = fields.beat_grid.as_deref().filter(|d| !d.is_empty()) {
            markers.grid = grid::decode_beat_grid_field(data)?;
        }

        Ok(markers)
    }

    /// Encode all fields for writing back.
    ///
    /// Grid markers are normalized in place to exactly what was encoded.
    pub fn to_fields(&mut self, layout: LegacyLayout) -> Result<EmbeddedFields> {
        let beat_grid = if self.grid.is_empty() {
            None
        } else {
            Some(grid::encode_beat_grid_field(&mut self.grid)?)
        };

        let legacy =
            v1::encode_legacy_field(&self.cues, &self.loops, self.track_color, layout)?;

        Ok(EmbeddedFields {
            markers_v2: Some(v2::encode_markers2_field(&self.records())),
            legacy_markers: Some(legacy),
            beat_grid,
        })
    }

    fn push_record(&mut self, record: Markers2Record) {
        match record {
            Markers2Record::Marker(Marker::Cue(cue)) => self.cues.push(cue),
            Markers2Record::Marker(Marker::Loop(lp)) => self.loops.push(lp),
            Markers2Record::Opaque(opaque) => self.opaque.push(opaque),
        }
    }

    /// Markers2 records in write order: opaque records, cues, loops
    pub fn records(&self) -> Vec<Markers2Record> {
        self.opaque
            .iter()
            .cloned()
            .map(Markers2Record::Opaque)
            .chain(self.markers().map(Markers2Record::Marker))
            .collect()
    }

    /// Cues then loops
    pub fn markers(&self) -> impl Iterator<Item = Marker> + '_ {
        self.cues
            .iter()
            .cloned()
            .map(Marker::Cue)
            .chain(self.loops.iter().cloned().map(Marker::Loop))
    }

    pub fn cue_markers(&self) -> &[CueMarker] {
        &self.cues
    }

    pub fn loop_markers(&self) -> &[LoopMarker] {
        &self.loops
    }

    pub fn grid_markers(&self) -> &[GridMarker] {
        &self.grid
    }

    pub fn opaque_records(&self) -> &[OpaqueRecord] {
        &self.opaque
    }

    pub fn track_color(&self) -> Rgb {
        self.track_color
    }

    /// Add a marker, replacing any existing one of the same kind and slot
    pub fn add_marker(&mut self, marker: Marker) {
        match marker {
            Marker::Cue(cue) => {
                self.cues.retain(|c| c.index != cue.index);
                self.cues.push(cue);
                self.cues.sort_by_key(|c| c.index);
            }
            Marker::Loop(lp) => {
                self.loops.retain(|l| l.index != lp.index);
                self.loops.push(lp);
                self.loops.sort_by_key(|l| l.index);
            }
        }
    }

    pub fn clear_markers(&mut self) {
        self.cues.clear();
        self.loops.clear();
    }

    pub fn set_grid_markers(&mut self, grid: Vec<GridMarker>) {
        self.grid = grid;
    }

    pub fn set_track_color(&mut self, color: Rgb) {
        self.track_color = color;
    }
}
