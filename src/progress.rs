//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn StageProgressCallback>`] via
//! [`crate::config::SessionConfigBuilder::progress_callback`] to learn when a
//! stage starts, finishes or fails. Decoding and extraction block until the
//! external process exits, which can take minutes on a large instrument file;
//! `on_stage_start` is the caller's cue to show a busy indicator.
//!
//! # Example
//!
//! ```rust
//! use cyz_annotate::{Stage, StageProgressCallback, SessionConfig};
//! use std::sync::Arc;
//!
//! struct Announce;
//!
//! impl StageProgressCallback for Announce {
//!     fn on_stage_start(&self, stage: Stage) {
//!         eprintln!("{stage} running…");
//!     }
//! }
//!
//! let config = SessionConfig::builder()
//!     .progress_callback(Arc::new(Announce) as Arc<dyn StageProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::Stage;
use std::path::Path;
use std::sync::Arc;

/// Called by the coordinator around every stage run.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. A stage that is rejected on its precondition never
/// starts and therefore only produces `on_stage_error`.
pub trait StageProgressCallback: Send + Sync {
    /// Called right before the stage does any work.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when the stage's declared output is in place.
    ///
    /// # Arguments
    /// * `output`:     the declared output (acquired file, record or table)
    /// * `elapsed_ms`: wall-clock time spent in the stage
    fn on_stage_complete(&self, stage: Stage, output: &Path, elapsed_ms: u64) {
        let _ = (stage, output, elapsed_ms);
    }

    /// Called when the stage fails, with the human-readable error.
    fn on_stage_error(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl StageProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::SessionConfig`].
pub type ProgressCallback = Arc<dyn StageProgressCallback>;
