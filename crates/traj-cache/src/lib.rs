//! Parameter-indexed cache of simulation trajectories and the run driver that
//! decides between serving a cached trajectory, extending it, or computing a
//! fresh one.

pub mod batch;
pub mod codec;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod index;
pub mod params;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use config::CacheConfig;
pub use driver::{DriverRequest, DriverState, RunDriver, TrajectoryCache};
pub use engine::{Engine, EngineFactory};
pub use error::{CacheError, EngineError, Result};
pub use index::{AuditReport, TrajectoryIndex, TrajectoryRecord};
pub use params::{resolve, ParamSet, ParamValue, Params};
pub use stats::StatTable;

use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::Path;

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Replaces `path` via a sibling temp file so readers never observe a partial
/// write.
pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Trajectory files are written once; an existing file is never replaced.
pub(crate) fn write_new_file(path: &Path, bytes: &[u8]) -> Result<()> {
    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(mut file) => {
            file.write_all(bytes)?;
            file.sync_all()?;
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(CacheError::StorageConflict(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::temp_root;

    #[test]
    fn atomic_write_replaces_contents() {
        let root = temp_root("atomic");
        let path = root.join("index.txt");
        atomic_write_bytes(&path, b"first").expect("write");
        atomic_write_bytes(&path, b"second").expect("rewrite");
        assert_eq!(fs::read(&path).expect("read"), b"second");
        let leftovers = fs::read_dir(&root).expect("list").count();
        assert_eq!(leftovers, 1);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn write_new_file_never_overwrites() {
        let root = temp_root("once");
        let path = root.join("t.txt.zst");
        write_new_file(&path, b"a").expect("first write");
        let err = write_new_file(&path, b"b").expect_err("second write");
        assert!(matches!(err, CacheError::StorageConflict(_)));
        assert_eq!(fs::read(&path).expect("read"), b"a");
        let _ = fs::remove_dir_all(root);
    }
}
