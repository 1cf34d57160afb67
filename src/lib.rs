//! # cyz-annotate
//!
//! Turn a CytoSense `.cyz` flow-cytometry file into browsable particle images
//! and record per-image annotations that survive between sessions.
//!
//! ## Why this crate?
//!
//! The instrument format is proprietary. Decoding it and rendering particle
//! images are jobs for external tools (the Cyz2Json .NET decoder and the
//! `listmode.py` extractor). What those tools do not give an operator is a
//! safe sequence around them: a clean scratch directory, a refusal to run a
//! stage whose input is missing, failures that leave no half-written
//! artifacts, and an annotation file that is never torn by a crash.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL or path
//!  │
//!  ├─ 0. Reset    clear last session's files from the workspace
//!  ├─ 1. Acquire  download or copy the .cyz file (reqwest / tokio::fs)
//!  ├─ 2. Convert  .cyz → record.json via the decoder (spawn_blocking)
//!  ├─ 3. Extract  record.json → *.tif + measurements.csv (spawn_blocking)
//!  └─ 4. Browse   cursor over images, load/save annotations.csv
//! ```
//!
//! Each stage checks that its input exists before doing anything; nothing
//! remembers "the last stage that ran".
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cyz_annotate::{AnnotationRecord, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::builder()
//!         .decoder_path("/opt/cyz2json/bin/Cyz2Json.dll")
//!         .extractor_script("/opt/cyz2json/listmode.py")
//!         .build()?;
//!
//!     let (mut session, _report) = Session::open(config)?;
//!     let result = session.run_all("https://example.org/sample.cyz").await?;
//!     eprintln!("{} images", result.images.len());
//!
//!     session.annotate_current(&AnnotationRecord::new(["algae", "diatom"]))?;
//!     session.navigator_mut().next();
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `cyz-annotate` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! cyz-annotate = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod annotation;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod navigator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use annotation::{AnnotationRecord, AnnotationStore};
pub use config::{ImageOrder, SessionConfig, SessionConfigBuilder};
pub use coordinator::PipelineCoordinator;
pub use error::{CyzError, PurgeError};
pub use navigator::ArtifactNavigator;
pub use output::{AcquiredFile, ExtractionResult, SourceKind};
pub use pipeline::{Converter, DotnetConverter, Extractor, ScriptExtractor, Stage, ToolFailure};
pub use progress::{NoopProgressCallback, ProgressCallback, StageProgressCallback};
pub use session::Session;
pub use workspace::{ResetReport, Workspace};
