//! On-disk layout of a Serato library
//!
//! ```text
//! <volume>/_Serato_/
//! ├── database V2
//! ├── neworder.pref
//! └── Subcrates/
//!     ├── House.crate
//!     └── House%%Deep.crate
//! ```

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::Result;

pub const SERATO_FOLDER: &str = "_Serato_";
pub const DATABASE_FILE: &str = "database V2";
pub const ORDER_FILE: &str = "neworder.pref";
pub const SUBCRATES_FOLDER: &str = "Subcrates";
pub const CRATE_EXTENSION: &str = "crate";

pub fn serato_folder(volume: &Path) -> PathBuf {
    volume.join(SERATO_FOLDER)
}

pub fn database_path(volume: &Path) -> PathBuf {
    serato_folder(volume).join(DATABASE_FILE)
}

pub fn order_file_path(volume: &Path) -> PathBuf {
    serato_folder(volume).join(ORDER_FILE)
}

pub fn subcrates_folder(volume: &Path) -> PathBuf {
    serato_folder(volume).join(SUBCRATES_FOLDER)
}

/// Stem of a crate's file; path separators in the name become '-'.
/// Names that differ only in separators share a stem.
pub fn crate_file_stem(full_name: &str) -> String {
    full_name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect()
}

pub fn crate_file_name(full_name: &str) -> String {
    format!("{}.{}", crate_file_stem(full_name), CRATE_EXTENSION)
}

pub fn crate_file_path(volume: &Path, full_name: &str) -> PathBuf {
    subcrates_folder(volume).join(crate_file_name(full_name))
}

/// Stems of every crate file in a volume's subcrates folder, sorted.
/// A missing folder has no crates.
pub fn list_crate_files(volume: &Path) -> Result<Vec<String>> {
    let folder = subcrates_folder(volume);
    if !folder.is_dir() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in WalkDir::new(&folder).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("subcrates walk failed"))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(CRATE_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            names.push(stem.to_string());
        }
    }

    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let volume = Path::new("/Volumes/USB");
        assert_eq!(
            database_path(volume),
            PathBuf::from("/Volumes/USB/_Serato_/database V2")
        );
        assert_eq!(
            crate_file_path(volume, "House%%Deep"),
            PathBuf::from("/Volumes/USB/_Serato_/Subcrates/House%%Deep.crate")
        );
    }

    #[test]
    fn test_crate_file_name_sanitized() {
        assert_eq!(crate_file_name("AC/DC"), "AC-DC.crate");
        assert_eq!(crate_file_name("a\\b%%c"), "a-b%%c.crate");
        assert_eq!(crate_file_stem("AC/DC"), crate_file_stem("AC-DC"));
    }

    #[test]
    fn test_list_crate_files() {
        let tmp = TempDir::new().unwrap();
        let folder = subcrates_folder(tmp.path());
        fs::create_dir_all(folder.join("nested")).unwrap();
        fs::write(folder.join("Techno.crate"), b"").unwrap();
        fs::write(folder.join("House%%Deep.crate"), b"").unwrap();
        fs::write(folder.join("notes.txt"), b"").unwrap();
        fs::write(folder.join("nested").join("Hidden.crate"), b"").unwrap();

        assert_eq!(
            list_crate_files(tmp.path()).unwrap(),
            vec!["House%%Deep".to_string(), "Techno".to_string()]
        );
    }

    #[test]
    fn test_list_missing_folder() {
        let tmp = TempDir::new().unwrap();
        assert!(list_crate_files(tmp.path()).unwrap().is_empty());
    }
}
