//! The scratch directory that holds one session's artifacts.
//!
//! A [`Workspace`] is an explicit object handed to the coordinator and the
//! session, never ambient global state. Its root is flat: the acquired file,
//! the intermediate record, the table and all extracted images sit directly
//! inside it. Subdirectories are left alone by [`Workspace::reset`], which is
//! what lets the annotation store (kept in a subdirectory) outlive a session.

use crate::config::ImageOrder;
use crate::error::{CyzError, PurgeError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of [`Workspace::reset`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetReport {
    /// Files that were deleted.
    pub removed: Vec<PathBuf>,
    /// Files that could not be deleted. Non-fatal.
    pub failures: Vec<PurgeError>,
}

impl ResetReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A single scratch directory for one processing session.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create the directory (and parents) if needed and pin its absolute path.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, CyzError> {
        let root = root.as_ref();
        let unavailable = |source| CyzError::WorkspaceUnavailable {
            path: root.to_path_buf(),
            source,
        };

        fs::create_dir_all(root).map_err(unavailable)?;
        let root = root.canonicalize().map_err(unavailable)?;
        debug!("Workspace at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stable path for a named artifact. No I/O.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Delete every regular file directly inside the root.
    ///
    /// Subdirectories and their contents are kept. A file that cannot be
    /// removed is logged and recorded; the remaining files are still
    /// processed.
    pub fn reset(&self) -> ResetReport {
        let mut report = ResetReport::default();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list workspace {}: {}", self.root.display(), e);
                report.failures.push(PurgeError {
                    path: self.root.clone(),
                    detail: e.to_string(),
                });
                return report;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable workspace entry: {}", e);
                    report.failures.push(PurgeError {
                        path: self.root.clone(),
                        detail: e.to_string(),
                    });
                    continue;
                }
            };

            let path = entry.path();
            // symlink_metadata: a link to a directory is still just a file here.
            let is_file = fs::symlink_metadata(&path)
                .map(|m| !m.is_dir())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => report.removed.push(path),
                Err(e) => {
                    warn!("Error deleting file {}: {}", path.display(), e);
                    report.failures.push(PurgeError {
                        path,
                        detail: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Workspace reset: {} files removed, {} failures",
            report.removed.len(),
            report.failures.len()
        );
        report
    }

    /// File names directly in the root with the given extension.
    ///
    /// The extension is compared case-insensitively and without the dot.
    pub fn list_images(&self, extension: &str, order: ImageOrder) -> Result<Vec<String>, CyzError> {
        let entries = fs::read_dir(&self.root).map_err(|source| CyzError::WorkspaceUnavailable {
            path: self.root.clone(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || !has_extension(&path, extension) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }

        order.apply(&mut names);
        Ok(names)
    }

    /// Best-effort removal of images left by an earlier extract run.
    pub fn remove_images(&self, extension: &str) -> usize {
        let Ok(names) = self.list_images(extension, ImageOrder::Enumeration) else {
            return 0;
        };
        let mut removed = 0;
        for name in names {
            let path = self.path_for(&name);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove stale image {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            debug!("Removed {} stale images", removed);
        }
        removed
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension.trim_start_matches('.')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn open_creates_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path().join("a/b/ws")).unwrap();
        assert!(ws.root().is_dir());
        assert!(ws.root().is_absolute());
    }

    #[test]
    fn path_for_joins_root() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        assert_eq!(ws.path_for("record.json"), ws.root().join("record.json"));
    }

    #[test]
    fn reset_removes_files_keeps_directories() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        touch(ws.root(), "a.tif");
        touch(ws.root(), "record.json");
        fs::create_dir(ws.path_for("annotations")).unwrap();
        touch(&ws.path_for("annotations"), "annotations.csv");

        let report = ws.reset();
        assert_eq!(report.removed.len(), 2);
        assert!(report.is_clean());
        assert!(!ws.path_for("a.tif").exists());
        assert!(ws.path_for("annotations/annotations.csv").exists());
    }

    #[test]
    fn reset_twice_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        touch(ws.root(), "a.tif");

        ws.reset();
        let second = ws.reset();
        assert!(second.removed.is_empty());
        assert!(second.is_clean());
        assert_eq!(fs::read_dir(ws.root()).unwrap().count(), 0);
    }

    #[test]
    fn reset_of_vanished_root_reports_instead_of_failing() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path().join("gone")).unwrap();
        fs::remove_dir(ws.root()).unwrap();
        let report = ws.reset();
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn list_images_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        for name in ["p10.tif", "p2.TIF", "p1.tif", "table.csv", "note.tiff"] {
            touch(ws.root(), name);
        }
        fs::create_dir(ws.path_for("dir.tif")).unwrap();

        let names = ws.list_images("tif", ImageOrder::Lexicographic).unwrap();
        assert_eq!(names, vec!["p1.tif", "p10.tif", "p2.TIF"]);

        let dotted = ws.list_images(".tif", ImageOrder::Lexicographic).unwrap();
        assert_eq!(dotted, names);
    }

    #[test]
    fn remove_images_only_touches_extension() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        touch(ws.root(), "p1.tif");
        touch(ws.root(), "record.json");

        assert_eq!(ws.remove_images("tif"), 1);
        assert!(ws.path_for("record.json").exists());
    }
}
