//! In-memory crate hierarchy
//!
//! Crates live in an arena owned by `CrateTree` and are addressed by
//! `CrateId`. The root (`CrateId::ROOT`) has an empty name and is never
//! written to disk; every other crate reachable from it is a real crate.
//!
//! A crate's full name encodes its ancestry: `House%%Deep` is the child
//! `Deep` of `House`. Track entries are kept per volume, since one crate
//! may list tracks from several drives.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::LinkageError;
use crate::layout::crate_file_stem;
use crate::tag::{Tag, TagObject};

/// Separator between ancestor names in a full crate name
pub const CRATE_NAME_SEPARATOR: &str = "%%";

/// Part of a full name after the last separator
pub fn short_name(full_name: &str) -> &str {
    full_name
        .rsplit_once(CRATE_NAME_SEPARATOR)
        .map_or(full_name, |(_, short)| short)
}

/// Full name of the parent, or `None` for a top-level crate
pub fn parent_name(full_name: &str) -> Option<&str> {
    full_name
        .rsplit_once(CRATE_NAME_SEPARATOR)
        .map(|(parent, _)| parent)
}

pub fn child_full_name(parent_full_name: &str, short_name: &str) -> String {
    if parent_full_name.is_empty() {
        short_name.to_string()
    } else {
        format!("{}{}{}", parent_full_name, CRATE_NAME_SEPARATOR, short_name)
    }
}

/// Handle to a crate in a `CrateTree`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CrateId(usize);

impl CrateId {
    pub const ROOT: CrateId = CrateId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for CrateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A track listed in a crate
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEntry {
    path: String,
    /// Entry object as parsed from disk, kept so unknown sub-tags survive
    original: Option<TagObject>,
    owner: Option<CrateId>,
}

impl TrackEntry {
    /// New entry for a path relative to its volume root
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            original: None,
            owner: None,
        }
    }

    pub(crate) fn with_original(path: String, original: TagObject) -> Self {
        Self {
            path,
            original: Some(original),
            owner: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn original(&self) -> Option<&TagObject> {
        self.original.as_ref()
    }

    /// Crate this entry currently belongs to
    pub fn owner(&self) -> Option<CrateId> {
        self.owner
    }
}

/// Entries of one crate on one volume
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeEntries {
    pub(crate) entries: Vec<TrackEntry>,
    /// Top-level tags of the crate file other than the version and entries
    pub(crate) extra_tags: Vec<Tag>,
}

impl VolumeEntries {
    pub fn entries(&self) -> &[TrackEntry] {
        &self.entries
    }

    pub fn extra_tags(&self) -> &[Tag] {
        &self.extra_tags
    }
}

#[derive(Debug, Clone)]
pub struct Crate {
    name: String,
    /// Name of the crate file this crate was read from or last saved to
    stored_name: Option<String>,
    parent: Option<CrateId>,
    children: Vec<CrateId>,
    volumes: BTreeMap<PathBuf, VolumeEntries>,
    children_modified: bool,
    tracks_modified: bool,
}

impl Crate {
    fn new(name: String) -> Self {
        Self {
            name,
            stored_name: None,
            parent: None,
            children: Vec::new(),
            volumes: BTreeMap::new(),
            children_modified: false,
            tracks_modified: false,
        }
    }

    /// Full name, ancestry included
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn short_name(&self) -> &str {
        short_name(&self.name)
    }

    pub fn stored_name(&self) -> Option<&str> {
        self.stored_name.as_deref()
    }

    pub fn parent(&self) -> Option<CrateId> {
        self.parent
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn children(&self) -> &[CrateId] {
        &self.children
    }

    pub fn volumes(&self) -> impl Iterator<Item = (&Path, &VolumeEntries)> {
        self.volumes.iter().map(|(path, entries)| (path.as_path(), entries))
    }

    pub fn entries(&self, volume: &Path) -> &[TrackEntry] {
        self.volumes
            .get(volume)
            .map(|volume| volume.entries.as_slice())
            .unwrap_or(&[])
    }

    pub fn track_count(&self) -> usize {
        self.volumes.values().map(|v| v.entries.len()).sum()
    }

    /// Children were added or removed since the last save
    pub fn is_children_modified(&self) -> bool {
        self.children_modified
    }

    /// Track entries or the name changed since the last save
    pub fn is_tracks_modified(&self) -> bool {
        self.tracks_modified
    }
}

/// Arena of crates rooted at `CrateId::ROOT`
#[derive(Debug, Clone)]
pub struct CrateTree {
    crates: Vec<Crate>,
}

impl Default for CrateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CrateTree {
    pub fn new() -> Self {
        Self {
            crates: vec![Crate::new(String::new())],
        }
    }

    pub fn root(&self) -> CrateId {
        CrateId::ROOT
    }

    pub fn get(&self, id: CrateId) -> &Crate {
        &self.crates[id.0]
    }

    fn get_mut(&mut self, id: CrateId) -> &mut Crate {
        &mut self.crates[id.0]
    }

    /// New crate with no parent. It starts track-dirty so that its file is
    /// written on the next save, even when empty.
    pub fn create_crate(&mut self, full_name: impl Into<String>) -> CrateId {
        let id = CrateId(self.crates.len());
        let mut krate = Crate::new(full_name.into());
        krate.tracks_modified = true;
        self.crates.push(krate);
        id
    }

    /// Create a crate named `short_name` under `parent`.
    ///
    /// The name must be non-empty, free of the separator, and must not share
    /// a crate file with one of `parent`'s current children.
    pub fn try_create_child(
        &mut self,
        parent: CrateId,
        short_name: &str,
    ) -> Result<CrateId, LinkageError> {
        if short_name.is_empty() || short_name.contains(CRATE_NAME_SEPARATOR) {
            return Err(LinkageError::InvalidName {
                name: short_name.to_string(),
            });
        }

        let name = child_full_name(&self.get(parent).name, short_name);
        let stem = crate_file_stem(&name);
        let taken = self
            .get(parent)
            .children
            .iter()
            .any(|&sibling| crate_file_stem(&self.get(sibling).name) == stem);
        if taken {
            return Err(LinkageError::DuplicateName { parent, name });
        }

        let child = self.create_crate(name);
        self.try_add_child(parent, child)?;
        Ok(child)
    }

    /// Panics with the `LinkageError` message when the name is rejected
    pub fn create_child(&mut self, parent: CrateId, short_name: &str) -> CrateId {
        match self.try_create_child(parent, short_name) {
            Ok(child) => child,
            Err(e) => panic!("{}", e),
        }
    }

    /// Crate loaded from disk; clean, and remembered under its file name
    pub(crate) fn create_loaded_crate(&mut self, full_name: String) -> CrateId {
        let id = CrateId(self.crates.len());
        let mut krate = Crate::new(full_name.clone());
        krate.stored_name = Some(full_name);
        self.crates.push(krate);
        id
    }

    fn is_ancestor_or_self(&self, ancestor: CrateId, mut id: CrateId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.get(id).parent {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }

    fn check_can_adopt(&self, parent: CrateId, child: CrateId) -> Result<(), LinkageError> {
        if self.get(child).parent.is_some() {
            return Err(LinkageError::AlreadyParented { child });
        }
        if child == CrateId::ROOT || self.is_ancestor_or_self(child, parent) {
            return Err(LinkageError::Cycle { parent, child });
        }
        Ok(())
    }

    pub fn try_add_child(&mut self, parent: CrateId, child: CrateId) -> Result<(), LinkageError> {
        let index = self.get(parent).children.len();
        self.try_insert_child(parent, index, child)
    }

    /// Add `child` at position `index` among `parent`'s children (clamped).
    ///
    /// The child and its descendants are renamed to sit under the parent's
    /// full name.
    pub fn try_insert_child(
        &mut self,
        parent: CrateId,
        index: usize,
        child: CrateId,
    ) -> Result<(), LinkageError> {
        self.check_can_adopt(parent, child)?;

        let name = child_full_name(&self.get(parent).name, self.get(child).short_name());
        self.rename_subtree(child, name);

        self.link_at(parent, index, child);
        self.get_mut(parent).children_modified = true;
        Ok(())
    }

    /// Panics with the `LinkageError` message when the link is invalid
    pub fn add_child(&mut self, parent: CrateId, child: CrateId) {
        if let Err(e) = self.try_add_child(parent, child) {
            panic!("{}", e);
        }
    }

    pub fn insert_child(&mut self, parent: CrateId, index: usize, child: CrateId) {
        if let Err(e) = self.try_insert_child(parent, index, child) {
            panic!("{}", e);
        }
    }

    /// Link without renaming or dirtying; used while loading
    pub(crate) fn link_child(&mut self, parent: CrateId, child: CrateId) -> Result<(), LinkageError> {
        let index = self.get(parent).children.len();
        self.link_child_at(parent, index, child)
    }

    pub(crate) fn link_child_at(
        &mut self,
        parent: CrateId,
        index: usize,
        child: CrateId,
    ) -> Result<(), LinkageError> {
        self.check_can_adopt(parent, child)?;
        self.link_at(parent, index, child);
        Ok(())
    }

    fn link_at(&mut self, parent: CrateId, index: usize, child: CrateId) {
        let children = &mut self.get_mut(parent).children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.get_mut(child).parent = Some(parent);
    }

    fn rename_subtree(&mut self, id: CrateId, name: String) {
        if self.get(id).name == name {
            return;
        }

        let krate = self.get_mut(id);
        krate.name = name;
        krate.tracks_modified = true;

        let children = krate.children.clone();
        let parent_name = krate.name.clone();
        for child in children {
            let child_name = child_full_name(&parent_name, self.get(child).short_name());
            self.rename_subtree(child, child_name);
        }
    }

    pub fn try_remove_child(&mut self, parent: CrateId, child: CrateId) -> Result<(), LinkageError> {
        if self.get(child).parent != Some(parent) {
            return Err(LinkageError::NotAChild { parent, child });
        }

        let krate = self.get_mut(parent);
        krate.children.retain(|&c| c != child);
        krate.children_modified = true;
        self.get_mut(child).parent = None;
        Ok(())
    }

    pub fn remove_child(&mut self, parent: CrateId, child: CrateId) {
        if let Err(e) = self.try_remove_child(parent, child) {
            panic!("{}", e);
        }
    }

    /// Detach every child of `id` and return them, parent-less
    pub fn remove_and_return_children_crates(&mut self, id: CrateId) -> Vec<CrateId> {
        let krate = self.get_mut(id);
        let children = std::mem::take(&mut krate.children);
        krate.children_modified = true;
        for &child in &children {
            self.get_mut(child).parent = None;
        }
        children
    }

    pub fn try_add_track_entry(
        &mut self,
        id: CrateId,
        volume: &Path,
        mut entry: TrackEntry,
    ) -> Result<(), LinkageError> {
        if entry.owner.is_some() {
            return Err(LinkageError::EntryAlreadyOwned { path: entry.path });
        }

        entry.owner = Some(id);
        let krate = self.get_mut(id);
        krate
            .volumes
            .entry(volume.to_path_buf())
            .or_default()
            .entries
            .push(entry);
        krate.tracks_modified = true;
        Ok(())
    }

    pub fn add_track_entry(&mut self, id: CrateId, volume: &Path, entry: TrackEntry) {
        if let Err(e) = self.try_add_track_entry(id, volume, entry) {
            panic!("{}", e);
        }
    }

    /// Remove the entry at `index` on `volume` and hand it back unowned
    pub fn try_remove_track_entry(
        &mut self,
        id: CrateId,
        volume: &Path,
        index: usize,
    ) -> Result<TrackEntry, LinkageError> {
        let not_in_crate = || LinkageError::EntryNotInCrate {
            owner: id,
            volume: volume.display().to_string(),
            index,
        };

        let krate = self.get_mut(id);
        let entries = &mut krate
            .volumes
            .get_mut(volume)
            .filter(|v| index < v.entries.len())
            .ok_or_else(not_in_crate)?
            .entries;
        if entries[index].owner != Some(id) {
            return Err(not_in_crate());
        }

        let mut entry = entries.remove(index);
        entry.owner = None;
        krate.tracks_modified = true;
        Ok(entry)
    }

    pub fn remove_track_entry(&mut self, id: CrateId, volume: &Path, index: usize) -> TrackEntry {
        match self.try_remove_track_entry(id, volume, index) {
            Ok(entry) => entry,
            Err(e) => panic!("{}", e),
        }
    }

    /// Detach every track entry of `id` on every volume and return them
    /// unowned, keyed by volume. Extra tags stay with the crate.
    pub fn remove_and_return_track_entries(&mut self, id: CrateId) -> BTreeMap<PathBuf, Vec<TrackEntry>> {
        let krate = self.get_mut(id);
        krate.tracks_modified = true;

        let mut detached = BTreeMap::new();
        for (volume, entries) in krate.volumes.iter_mut() {
            let mut taken = std::mem::take(&mut entries.entries);
            for entry in &mut taken {
                entry.owner = None;
            }
            if !taken.is_empty() {
                detached.insert(volume.clone(), taken);
            }
        }
        detached
    }

    /// Attach a volume's entries as read from disk, without dirtying
    pub(crate) fn attach_loaded_volume(&mut self, id: CrateId, volume: &Path, mut loaded: VolumeEntries) {
        for entry in &mut loaded.entries {
            entry.owner = Some(id);
        }
        self.get_mut(id).volumes.insert(volume.to_path_buf(), loaded);
    }

    pub(crate) fn mark_children_modified(&mut self, id: CrateId) {
        self.get_mut(id).children_modified = true;
    }

    /// Record that the crate file now matches memory
    pub(crate) fn mark_tracks_saved(&mut self, id: CrateId) {
        let krate = self.get_mut(id);
        krate.stored_name = Some(krate.name.clone());
        krate.tracks_modified = false;
    }

    /// Every crate below the root, parents before children, siblings in order
    pub fn depth_first(&self) -> Vec<CrateId> {
        let mut order = Vec::with_capacity(self.crates.len());
        let mut stack: Vec<CrateId> = self.get(CrateId::ROOT).children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.get(id).children.iter().rev().copied());
        }
        order
    }

    pub fn find_by_full_name(&self, full_name: &str) -> Option<CrateId> {
        self.depth_first()
            .into_iter()
            .find(|&id| self.get(id).name == full_name)
    }

    /// Whether any crate reachable from the root, the root included, had
    /// children added or removed
    pub fn any_children_modified(&self) -> bool {
        self.get(CrateId::ROOT).children_modified
            || self
                .depth_first()
                .into_iter()
                .any(|id| self.get(id).children_modified)
    }

    pub fn clear_children_modified(&mut self) {
        for krate in &mut self.crates {
            krate.children_modified = false;
        }
    }

    /// Number of crates reachable from the root
    pub fn len(&self) -> usize {
        self.depth_first().len()
    }

    pub fn is_empty(&self) -> bool {
        self.get(CrateId::ROOT).children.is_empty()
    }

    /// Depth of a crate below the root (top-level crates are 0)
    pub fn depth(&self, mut id: CrateId) -> usize {
        let mut depth = 0;
        while let Some(parent) = self.get(id).parent {
            if parent == CrateId::ROOT {
                break;
            }
            depth += 1;
            id = parent;
        }
        depth
    }
}
