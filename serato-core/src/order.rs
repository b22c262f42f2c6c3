//! Crate order file (`_Serato_/neworder.pref`)
//!
//! UTF-16 text listing every crate's full name in display order:
//! ```text
//! [begin record]
//! [crate]House
//! [end record]
//! [begin record]
//! [crate]House%%Deep
//! [end record]
//! ```
//! The order file defines the hierarchy and sibling order; crate files in
//! the subcrates folder hold the entries. Loading reconciles the two.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::LibraryConfig;
use crate::crate_file::{read_crate_file, write_crate_file};
use crate::crate_tree::{parent_name, CrateId, CrateTree, VolumeEntries};
use crate::error::Result;
use crate::layout::{crate_file_path, crate_file_stem, list_crate_files, order_file_path};
use crate::string::{decode_utf16_text, encode_utf16be};

const BEGIN_RECORD: &str = "[begin record]";
const CRATE_PREFIX: &str = "[crate]";
const END_RECORD: &str = "[end record]";

/// Crate names in file order, duplicates after the first dropped
pub fn parse_order_text(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        let Some(name) = line.strip_prefix(CRATE_PREFIX) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        if seen.insert(name.to_string()) {
            names.push(name.to_string());
        } else {
            debug!("Skipping duplicate crate '{}' in order file", name);
        }
    }

    names
}

pub fn order_text<S: AsRef<str>>(names: &[S]) -> String {
    let mut text = String::new();
    for name in names {
        text.push_str(BEGIN_RECORD);
        text.push('\n');
        text.push_str(CRATE_PREFIX);
        text.push_str(name.as_ref());
        text.push('\n');
        text.push_str(END_RECORD);
        text.push('\n');
    }
    text
}

/// Crate hierarchy of a library together with the order file it came from
#[derive(Debug, Clone)]
pub struct CrateOrderFile {
    root_volume: PathBuf,
    volumes: Vec<PathBuf>,
    tree: CrateTree,
    /// Names in the order file without a crate file, kept for the next save
    unknown_names: Vec<String>,
}

impl CrateOrderFile {
    /// Empty hierarchy for a library that has no crates yet
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            root_volume: config.root.clone(),
            volumes: config.volumes.clone(),
            tree: CrateTree::new(),
            unknown_names: Vec::new(),
        }
    }

    /// Build the crate tree from the order file and every crate file present.
    ///
    /// Crate files missing from the order file are put at the front of the
    /// top level; ordered names without a file are kept as unknown names.
    pub fn load(config: &LibraryConfig) -> Result<Self> {
        let mut order = Self::new(config);

        let ordered = read_order_file(&order_file_path(&config.root))?;
        let on_disk = list_crate_files(&config.root)?;
        let on_disk_set: HashSet<&str> = on_disk.iter().map(String::as_str).collect();

        // Ordered names are matched to files by stem, since a name with a
        // path separator is stored under a sanitised file name
        let mut claimed: HashSet<String> = HashSet::new();
        let mut ids: HashMap<String, CrateId> = HashMap::new();
        let mut listed = Vec::new();
        for name in &ordered {
            let stem = crate_file_stem(name);
            if on_disk_set.contains(stem.as_str()) && claimed.insert(stem) {
                let id = order.tree.create_loaded_crate(name.clone());
                ids.insert(name.clone(), id);
                listed.push(id);
            } else {
                debug!("Crate '{}' has no crate file", name);
                order.unknown_names.push(name.clone());
            }
        }

        // Link each listed crate under its parent once every crate exists, so
        // a child listed before its parent still lands under it
        for &id in &listed {
            let parent = parent_name(order.tree.get(id).name())
                .and_then(|parent| ids.get(parent).copied())
                .unwrap_or(CrateId::ROOT);
            if order.tree.link_child(parent, id).is_err() {
                order.tree.link_child(CrateId::ROOT, id).ok();
            }
        }

        let orphans: Vec<String> = on_disk
            .iter()
            .filter(|stem| !claimed.contains(*stem))
            .cloned()
            .collect();
        for (index, name) in orphans.into_iter().enumerate() {
            info!("Adding crate '{}' missing from the order file", name);
            let id = order.tree.create_loaded_crate(name);
            if let Err(e) = order.tree.link_child_at(CrateId::ROOT, index, id) {
                warn!("{}", e);
                continue;
            }
            order.tree.mark_children_modified(CrateId::ROOT);
        }

        for id in order.tree.depth_first() {
            order.load_entries(id)?;
        }

        debug!(
            "Loaded {} crates, {} unknown names",
            order.tree.len(),
            order.unknown_names.len()
        );
        Ok(order)
    }

    fn load_entries(&mut self, id: CrateId) -> Result<()> {
        let name = self.tree.get(id).name().to_string();
        let volumes: Vec<PathBuf> = std::iter::once(self.root_volume.clone())
            .chain(self.volumes.iter().cloned())
            .collect();

        for volume in volumes {
            if let Some(loaded) = read_crate_file(&crate_file_path(&volume, &name))? {
                self.tree.attach_loaded_volume(id, &volume, loaded);
            }
        }
        Ok(())
    }

    pub fn tree(&self) -> &CrateTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut CrateTree {
        &mut self.tree
    }

    pub fn unknown_crate_names(&self) -> &[String] {
        &self.unknown_names
    }

    /// Names as the order file would list them: the tree depth first, then
    /// unknown names
    pub fn ordered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tree
            .depth_first()
            .into_iter()
            .map(|id| self.tree.get(id).name().to_string())
            .collect();
        for unknown in &self.unknown_names {
            if !names.contains(unknown) {
                names.push(unknown.clone());
            }
        }
        names
    }

    /// Write every track-dirty crate, and the order file when any crate
    /// gained or lost children. Returns the number of files written.
    pub fn save_if_modified(&mut self) -> Result<usize> {
        let mut written = 0;

        for id in self.tree.depth_first() {
            if self.tree.get(id).is_tracks_modified() {
                written += self.save_crate(id)?;
            }
        }

        if self.tree.any_children_modified() {
            let path = order_file_path(&self.root_volume);
            write_order_file(&path, &self.ordered_names())?;
            self.tree.clear_children_modified();
            written += 1;
        }

        if written > 0 {
            info!("Saved crates: {} files written", written);
        }
        Ok(written)
    }

    fn save_crate(&mut self, id: CrateId) -> Result<usize> {
        let krate = self.tree.get(id);
        let name = krate.name().to_string();
        let mut written = 0;

        // The root volume's file always exists so the crate is found on load
        let root_entries = krate
            .volumes()
            .find(|(volume, _)| *volume == self.root_volume.as_path())
            .map(|(_, entries)| entries.clone())
            .unwrap_or_else(VolumeEntries::default);
        write_crate_file(&crate_file_path(&self.root_volume, &name), &root_entries)?;
        written += 1;

        for (volume, entries) in krate.volumes() {
            if volume == self.root_volume.as_path() {
                continue;
            }
            write_crate_file(&crate_file_path(volume, &name), entries)?;
            written += 1;
        }

        if let Some(stored) = krate.stored_name().filter(|stored| *stored != name) {
            let stored = stored.to_string();
            let volumes: Vec<PathBuf> = std::iter::once(self.root_volume.clone())
                .chain(krate.volumes().map(|(volume, _)| volume.to_path_buf()))
                .collect();
            for volume in volumes {
                remove_stale_crate_file(&crate_file_path(&volume, &stored))?;
            }
        }

        self.tree.mark_tracks_saved(id);
        Ok(written)
    }
}

fn remove_stale_crate_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed stale crate file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Names listed in an order file; missing or undecodable files list none
pub fn read_order_file(path: &Path) -> Result<Vec<String>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    match decode_utf16_text(&data) {
        Ok(text) => Ok(parse_order_text(&text)),
        Err(e) => {
            warn!("Ignoring unreadable order file {}: {}", path.display(), e);
            Ok(Vec::new())
        }
    }
}

pub fn write_order_file<S: AsRef<str>>(path: &Path, names: &[S]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, encode_utf16be(&order_text(names)))?;
    debug!("Wrote {} crate names to {}", names.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crate_tree::TrackEntry;
    use crate::layout::subcrates_folder;
    use tempfile::TempDir;

    fn library(order: &[&str], crates: &[&str]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        if !order.is_empty() {
            write_order_file(&order_file_path(tmp.path()), order).unwrap();
        }
        for name in crates {
            write_crate_file(&crate_file_path(tmp.path(), name), &VolumeEntries::default()).unwrap();
        }
        tmp
    }

    fn names(order: &CrateOrderFile, ids: &[CrateId]) -> Vec<String> {
        ids.iter()
            .map(|&id| order.tree().get(id).name().to_string())
            .collect()
    }

    #[test]
    fn test_parse_order_text() {
        let text = "[begin record]\r\n[crate]House\r\n[end record]\r\n\
                    [begin record]\n[crate]House%%Deep\n[end record]\n\
                    [begin record]\n[crate]House\n[end record]\n";
        assert_eq!(parse_order_text(text), vec!["House", "House%%Deep"]);
    }

    #[test]
    fn test_order_text_framing() {
        assert_eq!(
            order_text(&["A", "A%%B"]),
            "[begin record]\n[crate]A\n[end record]\n[begin record]\n[crate]A%%B\n[end record]\n"
        );
    }

    #[test]
    fn test_order_file_is_utf16be() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("neworder.pref");
        write_order_file(&path, &["A"]).unwrap();

        let data = fs::read(&path).unwrap();
        assert_eq!(&data[..4], &[0x00, b'[', 0x00, b'b']);
        assert_eq!(read_order_file(&path).unwrap(), vec!["A"]);
    }

    #[test]
    fn test_load_builds_hierarchy() {
        let tmp = library(
            &["House", "House%%Deep", "House%%Tech", "Techno"],
            &["House", "House%%Deep", "House%%Tech", "Techno"],
        );
        let order = CrateOrderFile::load(&LibraryConfig::new(tmp.path())).unwrap();
        let tree = order.tree();

        let top = tree.get(CrateId::ROOT).children();
        assert_eq!(names(&order, top), vec!["House", "Techno"]);
        assert_eq!(names(&order, tree.get(top[0]).children()), vec!["House%%Deep", "House%%Tech"]);
        assert!(!tree.any_children_modified());
    }

    #[test]
    fn test_child_listed_before_parent() {
        let tmp = library(&["A%%B", "A"], &["A", "A%%B"]);
        let order = CrateOrderFile::load(&LibraryConfig::new(tmp.path())).unwrap();

        let a = order.tree().find_by_full_name("A").unwrap();
        let b = order.tree().find_by_full_name("A%%B").unwrap();
        assert_eq!(order.tree().get(b).parent(), Some(a));
    }

    #[test]
    fn test_missing_parent_keeps_full_name() {
        let tmp = library(&["B%%C"], &["B%%C"]);
        let order = CrateOrderFile::load(&LibraryConfig::new(tmp.path())).unwrap();

        let top = order.tree().get(CrateId::ROOT).children();
        assert_eq!(names(&order, top), vec!["B%%C"]);
    }

    #[test]
    fn test_orphans_inserted_at_front_and_saved() {
        let tmp = library(&["House"], &["House", "Zed", "Acid"]);
        let mut order = CrateOrderFile::load(&LibraryConfig::new(tmp.path())).unwrap();

        let top = order.tree().get(CrateId::ROOT).children().to_vec();
        assert_eq!(names(&order, &top), vec!["Acid", "Zed", "House"]);

        assert_eq!(order.save_if_modified().unwrap(), 1);
        assert_eq!(
            read_order_file(&order_file_path(tmp.path())).unwrap(),
            vec!["Acid", "Zed", "House"]
        );
    }

    #[test]
    fn test_orphan_keeps_full_name() {
        let tmp = library(&["A"], &["A", "X%%Y"]);
        let order = CrateOrderFile::load(&LibraryConfig::new(tmp.path())).unwrap();

        let top = order.tree().get(CrateId::ROOT).children();
        assert_eq!(names(&order, top), vec!["X%%Y", "A"]);
    }

    #[test]
    fn test_unknown_names_kept() {
        let tmp = library(&["Gone", "House"], &["House"]);
        let mut order = CrateOrderFile::load(&LibraryConfig::new(tmp.path())).unwrap();
        assert_eq!(order.unknown_crate_names(), &["Gone".to_string()]);

        order.tree_mut().create_child(CrateId::ROOT, "New");
        order.save_if_modified().unwrap();

        assert_eq!(
            read_order_file(&order_file_path(tmp.path())).unwrap(),
            vec!["House", "New", "Gone"]
        );
        assert!(crate_file_path(tmp.path(), "New").exists());
    }

    #[test]
    fn test_name_with_separator_reloads() {
        let tmp = TempDir::new().unwrap();
        let config = LibraryConfig::new(tmp.path());
        let mut order = CrateOrderFile::new(&config);
        order.tree_mut().create_child(CrateId::ROOT, "AC/DC");
        order.save_if_modified().unwrap();
        assert!(crate_file_path(tmp.path(), "AC/DC").ends_with("AC-DC.crate"));

        let mut reloaded = CrateOrderFile::load(&config).unwrap();
        let top = reloaded.tree().get(CrateId::ROOT).children().to_vec();
        assert_eq!(names(&reloaded, &top), vec!["AC/DC"]);
        assert!(reloaded.unknown_crate_names().is_empty());
        assert_eq!(reloaded.save_if_modified().unwrap(), 0);
        assert_eq!(
            read_order_file(&order_file_path(tmp.path())).unwrap(),
            vec!["AC/DC"]
        );
    }

    #[test]
    fn test_untouched_save_writes_nothing() {
        let tmp = library(&["House"], &["House"]);
        let mut order = CrateOrderFile::load(&LibraryConfig::new(tmp.path())).unwrap();
        assert_eq!(order.save_if_modified().unwrap(), 0);
    }

    #[test]
    fn test_track_change_writes_only_that_crate() {
        let tmp = library(&["A", "B"], &["A", "B"]);
        let mut order = CrateOrderFile::load(&LibraryConfig::new(tmp.path())).unwrap();

        let b = order.tree().find_by_full_name("B").unwrap();
        order
            .tree_mut()
            .add_track_entry(b, tmp.path(), TrackEntry::new("Music/x.mp3"));
        assert_eq!(order.save_if_modified().unwrap(), 1);

        let reloaded = CrateOrderFile::load(&LibraryConfig::new(tmp.path())).unwrap();
        let b = reloaded.tree().find_by_full_name("B").unwrap();
        assert_eq!(reloaded.tree().get(b).entries(tmp.path())[0].path(), "Music/x.mp3");
    }

    #[test]
    fn test_moved_crate_removes_stale_file() {
        let tmp = library(&["A", "B", "C"], &["A", "B", "C"]);
        let mut order = CrateOrderFile::load(&LibraryConfig::new(tmp.path())).unwrap();

        let tree = order.tree_mut();
        let a = tree.find_by_full_name("A").unwrap();
        let c = tree.find_by_full_name("C").unwrap();
        tree.remove_child(CrateId::ROOT, c);
        tree.add_child(a, c);
        order.save_if_modified().unwrap();

        assert!(crate_file_path(tmp.path(), "A%%C").exists());
        assert!(!crate_file_path(tmp.path(), "C").exists());
        assert_eq!(
            read_order_file(&order_file_path(tmp.path())).unwrap(),
            vec!["A", "A%%C", "B"]
        );
    }

    #[test]
    fn test_entries_from_other_volume() {
        let root = library(&["A"], &["A"]);
        let usb = TempDir::new().unwrap();
        let mut usb_entries = VolumeEntries::default();
        usb_entries.entries.push(TrackEntry::new("Music/usb.mp3"));
        write_crate_file(&crate_file_path(usb.path(), "A"), &usb_entries).unwrap();

        let config = LibraryConfig::new(root.path()).with_volume(usb.path());
        let order = CrateOrderFile::load(&config).unwrap();
        let a = order.tree().find_by_full_name("A").unwrap();

        assert!(order.tree().get(a).entries(root.path()).is_empty());
        assert_eq!(order.tree().get(a).entries(usb.path())[0].path(), "Music/usb.mp3");
        assert_eq!(order.tree().get(a).track_count(), 1);
    }

    #[test]
    fn test_empty_library() {
        let tmp = TempDir::new().unwrap();
        let order = CrateOrderFile::load(&LibraryConfig::new(tmp.path())).unwrap();
        assert!(order.tree().is_empty());
        assert!(!subcrates_folder(tmp.path()).exists());
    }
}
