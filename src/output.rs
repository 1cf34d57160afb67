//! Result types produced by the pipeline stages.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where an acquired file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Url,
}

/// The instrument file after the acquire stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquiredFile {
    /// Location inside the workspace.
    pub path: PathBuf,
    /// Size in bytes. Always > 0.
    pub bytes: u64,
    pub kind: SourceKind,
}

/// What the extract stage left in the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Tabular measurement data.
    pub table: PathBuf,
    /// Directory holding the images (the workspace root).
    pub image_dir: PathBuf,
    /// Image file names in canonical display order.
    pub images: Vec<String>,
    /// Wall-clock time spent in the extractor.
    pub duration_ms: u64,
}

impl ExtractionResult {
    /// Full path of an image listed in this result.
    pub fn image_path(&self, name: &str) -> PathBuf {
        self.image_dir.join(name)
    }
}
