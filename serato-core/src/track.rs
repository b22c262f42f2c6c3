//! Database track records
//!
//! Each track in `database V2` is an `otrk` object. The record is kept as
//! parsed so sub-tags this library does not know about are written back
//! untouched; the accessors below read and update the known ones.

use crate::error::{Error, Result};
use crate::marker::TrackMarkers;
use crate::tag::{Tag, TagId, TagObject};

pub const TRACK_TAG: TagId = TagId::new(*b"otrk");

/// Path relative to the volume root
pub const PATH: TagId = TagId::new(*b"pfil");
pub const TITLE: TagId = TagId::new(*b"tsng");
pub const ARTIST: TagId = TagId::new(*b"tart");
pub const ALBUM: TagId = TagId::new(*b"talb");
pub const GENRE: TagId = TagId::new(*b"tgen");
pub const COMMENTS: TagId = TagId::new(*b"tcom");
pub const GROUPING: TagId = TagId::new(*b"tgrp");
pub const LABEL: TagId = TagId::new(*b"tlbl");
pub const COMPOSER: TagId = TagId::new(*b"tcmp");
pub const KEY: TagId = TagId::new(*b"tkey");
pub const BPM: TagId = TagId::new(*b"tbpm");
pub const LENGTH: TagId = TagId::new(*b"tlen");
pub const SIZE: TagId = TagId::new(*b"tsiz");
pub const BITRATE: TagId = TagId::new(*b"tbit");
pub const SAMPLE_RATE: TagId = TagId::new(*b"tsmp");
pub const DATE_ADDED_TEXT: TagId = TagId::new(*b"tadd");
pub const FILE_TYPE: TagId = TagId::new(*b"ttyp");
/// Seconds since the Unix epoch
pub const DATE_ADDED: TagId = TagId::new(*b"uadd");
pub const BEATGRID_LOCKED: TagId = TagId::new(*b"bbgl");
pub const MISSING: TagId = TagId::new(*b"bmis");
pub const CORRUPT: TagId = TagId::new(*b"bcrt");

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    record: TagObject,
    /// Markers read from the audio file, once requested
    markers: Option<TrackMarkers>,
    record_modified: bool,
    markers_modified: bool,
}

impl Track {
    /// New track for a path relative to the volume root
    pub fn new(path: impl Into<String>) -> Self {
        let mut record = TagObject::new();
        record.insert(Tag::path(PATH, path));
        Self {
            record,
            markers: None,
            record_modified: true,
            markers_modified: false,
        }
    }

    /// Track from an `otrk` tag as read from the database
    pub fn from_tag(tag: Tag) -> Result<Self> {
        let record = tag
            .into_object()
            .ok_or_else(|| Error::MalformedTag("track is not an object".into()))?;
        if record.text(PATH).is_none() {
            return Err(Error::MalformedTag("track without a path".into()));
        }

        Ok(Self {
            record,
            markers: None,
            record_modified: false,
            markers_modified: false,
        })
    }

    pub fn to_tag(&self) -> Tag {
        Tag::object(TRACK_TAG, self.record.clone())
    }

    pub fn record(&self) -> &TagObject {
        &self.record
    }

    pub fn path(&self) -> &str {
        self.record.text(PATH).unwrap_or_default()
    }

    pub fn title(&self) -> Option<&str> {
        self.record.text(TITLE)
    }

    pub fn artist(&self) -> Option<&str> {
        self.record.text(ARTIST)
    }

    pub fn album(&self) -> Option<&str> {
        self.record.text(ALBUM)
    }

    pub fn genre(&self) -> Option<&str> {
        self.record.text(GENRE)
    }

    pub fn comments(&self) -> Option<&str> {
        self.record.text(COMMENTS)
    }

    pub fn grouping(&self) -> Option<&str> {
        self.record.text(GROUPING)
    }

    pub fn label(&self) -> Option<&str> {
        self.record.text(LABEL)
    }

    pub fn composer(&self) -> Option<&str> {
        self.record.text(COMPOSER)
    }

    pub fn key(&self) -> Option<&str> {
        self.record.text(KEY)
    }

    /// BPM as Serato displays it, e.g. "128.00"
    pub fn bpm(&self) -> Option<&str> {
        self.record.text(BPM)
    }

    pub fn length(&self) -> Option<&str> {
        self.record.text(LENGTH)
    }

    pub fn file_type(&self) -> Option<&str> {
        self.record.text(FILE_TYPE)
    }

    pub fn date_added(&self) -> Option<u32> {
        self.record.uint32(DATE_ADDED)
    }

    pub fn is_beatgrid_locked(&self) -> bool {
        self.record.boolean(BEATGRID_LOCKED).unwrap_or(false)
    }

    pub fn is_missing(&self) -> bool {
        self.record.boolean(MISSING).unwrap_or(false)
    }

    pub fn is_corrupt(&self) -> bool {
        self.record.boolean(CORRUPT).unwrap_or(false)
    }

    /// Replace or insert a sub-tag; marks the record modified when it changed
    pub fn set_tag(&mut self, tag: Tag) {
        if self.record.get(tag.id()) == Some(&tag) {
            return;
        }
        self.record.insert(tag);
        self.record_modified = true;
    }

    pub fn remove_tag(&mut self, id: TagId) -> Option<Tag> {
        let removed = self.record.remove(id);
        if removed.is_some() {
            self.record_modified = true;
        }
        removed
    }

    pub fn set_title(&mut self, title: &str) {
        self.set_tag(Tag::text(TITLE, title));
    }

    pub fn set_artist(&mut self, artist: &str) {
        self.set_tag(Tag::text(ARTIST, artist));
    }

    pub fn set_album(&mut self, album: &str) {
        self.set_tag(Tag::text(ALBUM, album));
    }

    pub fn set_genre(&mut self, genre: &str) {
        self.set_tag(Tag::text(GENRE, genre));
    }

    pub fn set_key(&mut self, key: &str) {
        self.set_tag(Tag::text(KEY, key));
    }

    pub fn set_date_added(&mut self, secs: u32) {
        self.set_tag(Tag::uint32(DATE_ADDED, secs));
    }

    pub fn set_beatgrid_locked(&mut self, locked: bool) {
        self.set_tag(Tag::boolean(BEATGRID_LOCKED, locked));
    }

    pub fn set_missing(&mut self, missing: bool) {
        self.set_tag(Tag::boolean(MISSING, missing));
    }

    /// Markers, if they have been loaded from the audio file
    pub fn markers(&self) -> Option<&TrackMarkers> {
        self.markers.as_ref()
    }

    /// Replace the track's markers; they are written to the audio file on save
    pub fn set_markers(&mut self, markers: TrackMarkers) {
        self.markers = Some(markers);
        self.markers_modified = true;
    }

    pub(crate) fn cache_markers(&mut self, markers: TrackMarkers) {
        self.markers = Some(markers);
    }

    pub(crate) fn markers_mut(&mut self) -> Option<&mut TrackMarkers> {
        self.markers.as_mut()
    }

    pub fn is_record_modified(&self) -> bool {
        self.record_modified
    }

    pub fn is_markers_modified(&self) -> bool {
        self.markers_modified
    }

    pub fn is_modified(&self) -> bool {
        self.record_modified || self.markers_modified
    }

    pub(crate) fn clear_markers_modified(&mut self) {
        self.markers_modified = false;
    }

    pub(crate) fn clear_record_modified(&mut self) {
        self.record_modified = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::TagKind;

    fn parsed_track() -> Track {
        let mut record = TagObject::new();
        record.insert(Tag::path(PATH, "Music/song.mp3"));
        record.insert(Tag::text(TITLE, "Song"));
        record.insert(Tag::uint32(DATE_ADDED, 1_700_000_000));
        record.insert(Tag::boolean(MISSING, true));
        record.insert(Tag::blob(TagId::new(*b"xfoo"), vec![1, 2, 3]));
        Track::from_tag(Tag::object(TRACK_TAG, record)).unwrap()
    }

    #[test]
    fn test_accessors() {
        let track = parsed_track();
        assert_eq!(track.path(), "Music/song.mp3");
        assert_eq!(track.title(), Some("Song"));
        assert_eq!(track.artist(), None);
        assert_eq!(track.date_added(), Some(1_700_000_000));
        assert!(track.is_missing());
        assert!(!track.is_corrupt());
        assert!(!track.is_modified());
    }

    #[test]
    fn test_unknown_tags_pass_through() {
        let track = parsed_track();
        let tag = track.to_tag();
        let object = tag.as_object().unwrap();
        let unknown = object.get(TagId::new(*b"xfoo")).unwrap();
        assert_eq!(unknown.kind(), TagKind::Blob);
        assert_eq!(unknown.as_blob(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_setting_same_value_is_not_a_change() {
        let mut track = parsed_track();
        track.set_title("Song");
        assert!(!track.is_modified());

        track.set_title("Other");
        assert!(track.is_record_modified());
        assert!(!track.is_markers_modified());
    }

    #[test]
    fn test_set_markers_marks_modified() {
        let mut track = parsed_track();
        track.set_markers(TrackMarkers::new());
        assert!(track.is_markers_modified());
        assert!(!track.is_record_modified());
    }

    #[test]
    fn test_track_without_path_rejected() {
        let tag = Tag::object(TRACK_TAG, TagObject::new());
        assert!(matches!(Track::from_tag(tag), Err(Error::MalformedTag(_))));
    }

    #[test]
    fn test_new_track_is_modified() {
        let track = Track::new("a.mp3");
        assert_eq!(track.path(), "a.mp3");
        assert!(track.is_record_modified());
    }
}
