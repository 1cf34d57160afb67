//! Decoding: instrument file → intermediate record via an opaque converter.
//!
//! The decoder is a capability, not a binding. [`Converter`] has one job:
//! read `input`, write `output`, or explain why not. The default
//! [`DotnetConverter`] shells out to the Cyz2Json .NET tool; tests and embedders
//! plug in anything else.

use super::tool::{describe, run_tool, ToolFailure};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Turns an instrument file into the intermediate record.
///
/// Implementations block until the conversion finishes. The coordinator calls
/// them from `spawn_blocking`, so they must be `Send + Sync`.
pub trait Converter: Send + Sync {
    /// Decode `input` and write the record to `output`.
    fn run(&self, input: &Path, output: &Path) -> Result<(), ToolFailure>;

    /// Short label used in logs and error messages.
    fn name(&self) -> String {
        "converter".to_string()
    }
}

/// Runs `<dotnet> <Cyz2Json.dll> <input> --output <output>`.
#[derive(Debug, Clone)]
pub struct DotnetConverter {
    dotnet: PathBuf,
    decoder: PathBuf,
}

impl DotnetConverter {
    pub fn new(dotnet: impl Into<PathBuf>, decoder: impl Into<PathBuf>) -> Self {
        Self {
            dotnet: dotnet.into(),
            decoder: decoder.into(),
        }
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            self.decoder.clone().into_os_string(),
            input.as_os_str().to_owned(),
            "--output".into(),
            output.as_os_str().to_owned(),
        ]
    }
}

impl Converter for DotnetConverter {
    fn run(&self, input: &Path, output: &Path) -> Result<(), ToolFailure> {
        run_tool(&self.dotnet, &self.args(input, output))
    }

    fn name(&self) -> String {
        describe(&self.dotnet, &[&self.decoder])
    }
}
