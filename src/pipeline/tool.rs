//! Process plumbing shared by the process-backed decoder and extractor.
//!
//! External tools are plain blocking child processes. [`run_tool`] waits for
//! exit and turns anything other than a clean exit into a [`ToolFailure`]
//! carrying the tool's own output untouched, so the operator sees exactly what
//! the decoder or extractor printed.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Why an external tool run did not succeed.
///
/// Returned by [`crate::pipeline::Converter::run`] and
/// [`crate::pipeline::Extractor::run`]; the coordinator attaches the stage
/// and turns it into [`crate::error::CyzError::ExternalToolFailure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    /// Exit code, or `None` if the process never started or was killed.
    pub status: Option<i32>,
    /// Tool output (stderr, else stdout), verbatim.
    pub diagnostic: String,
}

impl ToolFailure {
    pub fn new(status: Option<i32>, diagnostic: impl Into<String>) -> Self {
        Self {
            status,
            diagnostic: diagnostic.into(),
        }
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "exit status {code}: {}", self.diagnostic),
            None => write!(f, "{}", self.diagnostic),
        }
    }
}

/// Run `program args...` to completion.
pub fn run_tool(program: &Path, args: &[OsString]) -> Result<(), ToolFailure> {
    debug!("Running {} {:?}", program.display(), args);

    let output = Command::new(program).args(args).output().map_err(|e| {
        ToolFailure::new(None, format!("failed to launch '{}': {e}", program.display()))
    })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let diagnostic = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).into_owned()
    } else {
        stderr.into_owned()
    };

    Err(ToolFailure::new(output.status.code(), diagnostic))
}

/// Render a command line for logs and error messages.
pub fn describe(program: &Path, leading: &[&Path]) -> String {
    let mut parts = vec![program.display().to_string()];
    parts.extend(leading.iter().map(|p| p.display().to_string()));
    parts.join(" ")
}
