use crate::error::{CacheError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_DIR: &str = "trajectories";
pub const DEFAULT_INDEX_NAME: &str = "dataindex.txt";

/// Where trajectories and the index live.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub data_dir: PathBuf,
    pub index_path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            index_path: PathBuf::from(DEFAULT_INDEX_NAME),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CacheConfigFile {
    #[serde(default)]
    data_dir: Option<PathBuf>,
    #[serde(default)]
    index_path: Option<PathBuf>,
}

impl CacheConfig {
    /// Places both the data directory and the index under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            data_dir: root.join(DEFAULT_DATA_DIR),
            index_path: root.join(DEFAULT_INDEX_NAME),
        }
    }

    /// Loads a YAML file with optional `data_dir` and `index_path` keys.
    /// Relative paths are resolved against the file's directory.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let file: CacheConfigFile = serde_yaml::from_str(&raw)?;
        let base = path.parent().unwrap_or(Path::new("."));
        let anchor = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        let defaults = CacheConfig::rooted_at(base);
        let config = Self {
            data_dir: file.data_dir.map(anchor).unwrap_or(defaults.data_dir),
            index_path: file.index_path.map(anchor).unwrap_or(defaults.index_path),
        };
        if config.data_dir == config.index_path {
            return Err(CacheError::config(
                "data_dir and index_path must be different paths",
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::temp_root;

    #[test]
    fn yaml_paths_are_anchored_to_the_file() {
        let root = temp_root("anchor");
        let path = root.join("cache.yaml");
        fs::write(&path, "data_dir: runs\nindex_path: /tmp/absolute_index.txt\n").expect("write");
        let config = CacheConfig::from_yaml_file(&path).expect("load");
        assert_eq!(config.data_dir, root.join("runs"));
        assert_eq!(config.index_path, PathBuf::from("/tmp/absolute_index.txt"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_keys_default_next_to_the_file() {
        let root = temp_root("defaults");
        let path = root.join("cache.yaml");
        fs::write(&path, "{}\n").expect("write");
        let config = CacheConfig::from_yaml_file(&path).expect("load");
        assert_eq!(config, CacheConfig::rooted_at(&root));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn identical_paths_are_rejected() {
        let root = temp_root("same");
        let path = root.join("cache.yaml");
        fs::write(&path, "data_dir: x\nindex_path: x\n").expect("write");
        let err = CacheConfig::from_yaml_file(&path).expect_err("same path");
        assert!(matches!(err, CacheError::Configuration(_)));
        let _ = fs::remove_dir_all(root);
    }
}
