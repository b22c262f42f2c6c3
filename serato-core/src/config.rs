//! Library configuration

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LibraryConfig {
    /// Volume holding the database, the crate order file and the subcrates
    pub root: PathBuf,
    /// Other volumes whose subcrates contribute crate entries
    pub volumes: Vec<PathBuf>,
}

impl LibraryConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            volumes: Vec::new(),
        }
    }

    pub fn with_volume(mut self, volume: impl Into<PathBuf>) -> Self {
        let volume = volume.into();
        if volume != self.root && !self.volumes.contains(&volume) {
            self.volumes.push(volume);
        }
        self
    }

    /// Root volume first, then the others in configured order
    pub fn all_volumes(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.root.as_path()).chain(self.volumes.iter().map(PathBuf::as_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volumes_deduplicated() {
        let config = LibraryConfig::new("/music")
            .with_volume("/usb")
            .with_volume("/music")
            .with_volume("/usb");

        let volumes: Vec<&Path> = config.all_volumes().collect();
        assert_eq!(volumes, vec![Path::new("/music"), Path::new("/usb")]);
    }
}
