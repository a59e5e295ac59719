//! Filesystem abstraction
//!
//! Fallback records and rendered reports are written through this trait so
//! tests can substitute an in-memory or read-only implementation.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Filesystem write failure
#[derive(Debug, Error)]
#[error("{action} {}: {source}", .path.display())]
pub struct FsError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Minimal write-side filesystem interface
pub trait FileSystem: Send + Sync {
    /// Creates a directory and all missing parents
    fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;

    /// Writes `contents` so that readers never observe a partial file
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), FsError>;

    /// Removes a file; a missing file is not an error
    fn remove_file(&self, path: &Path) -> Result<(), FsError>;
}

/// Local disk implementation
///
/// Atomic writes go to a sibling `.tmp` file which is then renamed over
/// the target.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        std::fs::create_dir_all(path).map_err(|source| FsError {
            action: "create directory",
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        let tmp = path.with_extension("tmp");

        std::fs::write(&tmp, contents).map_err(|source| FsError {
            action: "write",
            path: tmp.clone(),
            source,
        })?;

        std::fs::rename(&tmp, path).map_err(|source| {
            let _ = std::fs::remove_file(&tmp);
            FsError {
                action: "rename",
                path: path.to_path_buf(),
                source,
            }
        })
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(FsError {
                action: "remove",
                path: path.to_path_buf(),
                source: e,
            }),
            _ => Ok(()),
        }
    }
}
