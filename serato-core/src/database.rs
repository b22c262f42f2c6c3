//! Library database (`_Serato_/database V2`)
//!
//! The database file is a tag stream: the version tag followed by one `otrk`
//! object per track. `Database` also owns the crate hierarchy and the
//! marker store, and saves only what changed:
//! 1. marker fields of tracks whose markers were replaced
//! 2. the database file, when any track was added, removed or modified
//! 3. crate files and the order file, via `CrateOrderFile`

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::LibraryConfig;
use crate::crate_tree::CrateTree;
use crate::error::Result;
use crate::layout::database_path;
use crate::marker::TrackMarkers;
use crate::order::CrateOrderFile;
use crate::store::MarkerFieldStore;
use crate::tag::{encode_tags, parse_tags, Tag, VERSION_TAG};
use crate::track::{Track, TRACK_TAG};

pub const DATABASE_VERSION: &str = "2.0/Serato Scratch LIVE Database";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseState {
    Valid,
    /// The file was malformed or of an unsupported version. Nothing was
    /// loaded from it and it is never overwritten.
    Invalid,
}

/// Files written by one `save_if_modified` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    /// Audio files whose marker fields were written
    pub track_files: usize,
    pub database_written: bool,
    /// Crate files plus the order file
    pub crate_files: usize,
}

impl SaveSummary {
    pub fn files_written(&self) -> usize {
        self.track_files + usize::from(self.database_written) + self.crate_files
    }
}

pub struct Database<S: MarkerFieldStore> {
    config: LibraryConfig,
    store: S,
    state: DatabaseState,
    tracks: Vec<Track>,
    /// Top-level tags other than the version and tracks, in file order
    other_tags: Vec<Tag>,
    /// Tracks were added or removed since the last save
    tracks_changed: bool,
    crates: CrateOrderFile,
}

/// Parsed database contents, or `None` for a file that must be ignored
fn parse_database(data: &[u8]) -> Option<(Vec<Track>, Vec<Tag>)> {
    let tags = match parse_tags(data) {
        Ok(tags) => tags,
        Err(e) => {
            warn!("Malformed database: {}", e);
            return None;
        }
    };

    let mut tags = tags.into_iter();
    match tags.next() {
        Some(tag) if tag.id() == VERSION_TAG && tag.as_text() == Some(DATABASE_VERSION) => {}
        Some(tag) => {
            warn!(
                "Unsupported database version {:?}",
                tag.as_text().unwrap_or_default()
            );
            return None;
        }
        None => return Some((Vec::new(), Vec::new())),
    }

    let mut tracks = Vec::new();
    let mut other_tags = Vec::new();
    for tag in tags {
        if tag.id() == TRACK_TAG {
            match Track::from_tag(tag) {
                Ok(track) => tracks.push(track),
                Err(e) => {
                    warn!("Malformed database track: {}", e);
                    return None;
                }
            }
        } else {
            other_tags.push(tag);
        }
    }

    Some((tracks, other_tags))
}

impl<S: MarkerFieldStore> Database<S> {
    /// Open the library at `config.root`. A missing database file opens as
    /// an empty, valid database; an unreadable or foreign one as invalid.
    pub fn open(config: LibraryConfig, store: S) -> Result<Self> {
        let path = database_path(&config.root);
        let (state, tracks, other_tags) = match fs::read(&path) {
            Ok(data) => match parse_database(&data) {
                Some((tracks, other_tags)) => (DatabaseState::Valid, tracks, other_tags),
                None => (DatabaseState::Invalid, Vec::new(), Vec::new()),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No database at {}", path.display());
                (DatabaseState::Valid, Vec::new(), Vec::new())
            }
            Err(e) => return Err(e.into()),
        };

        let crates = CrateOrderFile::load(&config)?;
        info!(
            "Opened {} with {} tracks and {} crates",
            config.root.display(),
            tracks.len(),
            crates.tree().len()
        );

        Ok(Self {
            config,
            store,
            state,
            tracks,
            other_tags,
            tracks_changed: false,
            crates,
        })
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn state(&self) -> DatabaseState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == DatabaseState::Valid
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_by_path(&self, path: &str) -> Option<&Track> {
        self.tracks.iter().find(|track| track.path() == path)
    }

    pub fn track_by_path_mut(&mut self, path: &str) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|track| track.path() == path)
    }

    /// Add a track, replacing any track with the same path
    pub fn add_track(&mut self, track: Track) {
        match self.tracks.iter_mut().find(|t| t.path() == track.path()) {
            Some(existing) => *existing = track,
            None => self.tracks.push(track),
        }
        self.tracks_changed = true;
    }

    pub fn remove_track_by_path(&mut self, path: &str) -> Option<Track> {
        let index = self.tracks.iter().position(|track| track.path() == path)?;
        self.tracks_changed = true;
        Some(self.tracks.remove(index))
    }

    /// Location of a track's audio file
    pub fn audio_file_path(&self, track_path: &str) -> PathBuf {
        self.config.root.join(track_path)
    }

    /// Markers of a track, read from its audio file on first use.
    /// `Ok(None)` when no track has this path.
    pub fn markers_for(&mut self, path: &str) -> Result<Option<&TrackMarkers>> {
        let file = self.audio_file_path(path);
        let layout = self.store.legacy_layout();

        let Some(index) = self.tracks.iter().position(|track| track.path() == path) else {
            return Ok(None);
        };

        if self.tracks[index].markers().is_none() {
            let fields = self.store.read_fields(&file)?;
            let markers = TrackMarkers::from_fields(&fields, layout)?;
            self.tracks[index].cache_markers(markers);
        }
        Ok(self.tracks[index].markers())
    }

    /// Replace a track's markers. Returns false when no track has this path.
    pub fn set_markers_for(&mut self, path: &str, markers: TrackMarkers) -> bool {
        match self.track_by_path_mut(path) {
            Some(track) => {
                track.set_markers(markers);
                true
            }
            None => false,
        }
    }

    pub fn crates(&self) -> &CrateTree {
        self.crates.tree()
    }

    pub fn crates_mut(&mut self) -> &mut CrateTree {
        self.crates.tree_mut()
    }

    pub fn crate_order(&self) -> &CrateOrderFile {
        &self.crates
    }

    pub fn is_modified(&self) -> bool {
        self.tracks_changed || self.tracks.iter().any(Track::is_modified)
    }

    /// Encode the database file contents
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut tags = Vec::with_capacity(1 + self.other_tags.len() + self.tracks.len());
        tags.push(Tag::text(VERSION_TAG, DATABASE_VERSION));
        tags.extend(self.other_tags.iter().cloned());
        tags.extend(self.tracks.iter().map(Track::to_tag));
        encode_tags(&tags)
    }

    /// Write everything that changed since it was loaded or last saved
    pub fn save_if_modified(&mut self) -> Result<SaveSummary> {
        let mut summary = SaveSummary::default();
        let layout = self.store.legacy_layout();
        let root = self.config.root.clone();

        // Marker flags stay set until the database step is done, so a save
        // that fails partway is retried in full
        for track in self.tracks.iter_mut().filter(|t| t.is_markers_modified()) {
            let file = root.join(track.path());
            if let Some(markers) = track.markers_mut() {
                let fields = markers.to_fields(layout)?;
                self.store.write_fields(&file, &fields)?;
                summary.track_files += 1;
            }
        }

        if summary.track_files > 0 || self.is_modified() {
            if self.is_valid() {
                write_database(&database_path(&root), &self.to_bytes())?;
                summary.database_written = true;
            } else {
                warn!("Not writing the database: it was not loaded");
            }
            for track in &mut self.tracks {
                track.clear_record_modified();
                track.clear_markers_modified();
            }
            self.tracks_changed = false;
        }

        summary.crate_files = self.crates.save_if_modified()?;

        if summary.files_written() > 0 {
            info!(
                "Saved {}: {} audio files, database {}, {} crate files",
                root.display(),
                summary.track_files,
                if summary.database_written { "written" } else { "unchanged" },
                summary.crate_files
            );
        }
        Ok(summary)
    }
}

fn write_database(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)?;
    debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}
