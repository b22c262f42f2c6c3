//! Crate files (`_Serato_/Subcrates/<name>.crate`)
//!
//! A crate file is a tag stream: the version tag, column and sorting
//! settings (`osrt`, `ovct`, ...), then one `otrk` object per track entry
//! wrapping the track's volume-relative path in `ptrk`.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, warn};

use crate::crate_tree::{TrackEntry, VolumeEntries};
use crate::error::{Error, Result};
use crate::tag::{encode_tags, parse_tags, Tag, TagId, TagObject, VERSION_TAG};

pub const CRATE_VERSION: &str = "1.0/Serato ScratchLive Crate";

pub const TRACK_ENTRY_TAG: TagId = TagId::new(*b"otrk");
pub const ENTRY_PATH_TAG: TagId = TagId::new(*b"ptrk");

impl TrackEntry {
    /// Entry from an `otrk` object tag
    pub fn from_tag(tag: Tag) -> Result<Self> {
        let id = tag.id();
        let object = tag
            .into_object()
            .ok_or_else(|| Error::MalformedTag(format!("track entry '{}' is not an object", id)))?;
        let path = object
            .text(ENTRY_PATH_TAG)
            .ok_or_else(|| Error::MalformedTag("track entry without a path".into()))?
            .to_string();
        Ok(Self::with_original(path, object))
    }

    /// `otrk` object tag for this entry; unknown sub-tags of the parsed
    /// original are kept
    pub fn to_tag(&self) -> Tag {
        let mut object = self.original().cloned().unwrap_or_else(TagObject::new);
        object.insert(Tag::path(ENTRY_PATH_TAG, self.path()));
        Tag::object(TRACK_ENTRY_TAG, object)
    }
}

/// Parse crate file contents. `Ok(None)` when the version does not match.
pub fn parse_crate_file(data: &[u8]) -> Result<Option<VolumeEntries>> {
    let mut tags = parse_tags(data)?.into_iter();

    match tags.next() {
        Some(tag) if tag.id() == VERSION_TAG && tag.as_text() == Some(CRATE_VERSION) => {}
        Some(tag) => {
            warn!("Unsupported crate version {:?}", tag.as_text().unwrap_or_default());
            return Ok(None);
        }
        None => return Ok(None),
    }

    let mut volume = VolumeEntries::default();
    for tag in tags {
        if tag.id() == TRACK_ENTRY_TAG {
            volume.entries.push(TrackEntry::from_tag(tag)?);
        } else {
            volume.extra_tags.push(tag);
        }
    }
    Ok(Some(volume))
}

/// Encode a volume's entries as a crate file
pub fn encode_crate_file(volume: &VolumeEntries) -> Vec<u8> {
    let mut tags = Vec::with_capacity(1 + volume.extra_tags.len() + volume.entries.len());
    tags.push(Tag::text(VERSION_TAG, CRATE_VERSION));
    tags.extend(volume.extra_tags.iter().cloned());
    tags.extend(volume.entries.iter().map(TrackEntry::to_tag));
    encode_tags(&tags)
}

/// Read a crate file. A missing, malformed or foreign-version file reads as
/// `None`; other IO errors propagate.
pub fn read_crate_file(path: &Path) -> Result<Option<VolumeEntries>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match parse_crate_file(&data) {
        Ok(Some(volume)) => {
            debug!("Read {} entries from {}", volume.entries.len(), path.display());
            Ok(Some(volume))
        }
        Ok(None) => {
            warn!("Ignoring crate file {} with unsupported version", path.display());
            Ok(None)
        }
        Err(e) => {
            warn!("Ignoring malformed crate file {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

pub fn write_crate_file(path: &Path, volume: &VolumeEntries) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, encode_crate_file(volume))?;
    debug!("Wrote {} entries to {}", volume.entries.len(), path.display());
    Ok(())
}
