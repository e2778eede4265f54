//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::file::File;

/// Where the control plane keeps its files
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Inventory file, relative names resolve against the base directory
    pub fn inventory_file(&self, name: &str) -> File {
        File::new(self.base_dir.join(name))
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/etc/keel")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = StorageLayout::new("/tmp/keel");
        assert_eq!(layout.settings_file().path().to_str(), Some("/tmp/keel/settings.json"));
        assert_eq!(
            layout.inventory_file("/abs/inv.json").path().to_str(),
            Some("/abs/inv.json")
        );
    }
}
