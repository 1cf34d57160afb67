//! Pipeline stages for turning an instrument file into annotatable images.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets us swap the external
//! tool behind a stage (process, library call, test double) without touching
//! the others.
//!
//! ## Data Flow
//!
//! ```text
//! acquire ──▶ convert ──▶ extract
//! (URL/path)  (Cyz2Json)  (listmode)
//!   .cyz        .json      .tif + .csv
//! ```
//!
//! 1. [`acquire`]: copy or download the source into the workspace
//! 2. [`convert`]: hand the instrument file to the decoder ([`Converter`])
//! 3. [`extract`]: hand the record to the extractor ([`Extractor`])
//!
//! The shared process plumbing used by the default tools lives in [`tool`].

pub mod acquire;
pub mod convert;
pub mod extract;
pub mod tool;

pub use convert::{Converter, DotnetConverter};
pub use extract::{Extractor, ScriptExtractor};
pub use tool::ToolFailure;

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Bring the instrument file into the workspace.
    Acquire,
    /// Decode the instrument file into the intermediate record.
    Convert,
    /// Produce images and the measurement table from the record.
    Extract,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::Acquire, Stage::Convert, Stage::Extract];

    /// The stage whose output this stage consumes.
    pub fn previous(self) -> Option<Stage> {
        match self {
            Stage::Acquire => None,
            Stage::Convert => Some(Stage::Acquire),
            Stage::Extract => Some(Stage::Convert),
        }
    }

    /// Operator-facing advice for a missing input.
    pub fn precondition_hint(self) -> String {
        match self.previous() {
            Some(prev) => format!("Run the {prev} stage first."),
            None => "Check the source path or URL.".to_string(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Acquire => "acquire",
            Stage::Convert => "convert",
            Stage::Extract => "extract",
        })
    }
}
