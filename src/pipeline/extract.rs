//! Extraction: intermediate record → particle images + measurement table.
//!
//! Like decoding, extraction is an opaque capability. The default
//! [`ScriptExtractor`] runs the `listmode.py` script with the record, the
//! table path and the image directory; images land next to the table.

use super::tool::{describe, run_tool, ToolFailure};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Turns the intermediate record into image files plus a table.
///
/// Image names must be deterministic for a given record; annotation keys
/// depend on them staying stable across runs.
pub trait Extractor: Send + Sync {
    /// Read `record`, write the table to `table` and images into `image_dir`.
    fn run(&self, record: &Path, table: &Path, image_dir: &Path) -> Result<(), ToolFailure>;

    /// Short label used in logs and error messages.
    fn name(&self) -> String {
        "extractor".to_string()
    }
}

/// Runs `<python> <script> <record> --output <table> <image_dir> <image_dir>`.
///
/// `listmode.py` takes the image directory twice (images and per-particle
/// side files); both point at the workspace.
#[derive(Debug, Clone)]
pub struct ScriptExtractor {
    interpreter: PathBuf,
    script: PathBuf,
}

impl ScriptExtractor {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }

    fn args(&self, record: &Path, table: &Path, image_dir: &Path) -> Vec<OsString> {
        vec![
            self.script.clone().into_os_string(),
            record.as_os_str().to_owned(),
            "--output".into(),
            table.as_os_str().to_owned(),
            image_dir.as_os_str().to_owned(),
            image_dir.as_os_str().to_owned(),
        ]
    }
}

impl Extractor for ScriptExtractor {
    fn run(&self, record: &Path, table: &Path, image_dir: &Path) -> Result<(), ToolFailure> {
        run_tool(&self.interpreter, &self.args(record, table, image_dir))
    }

    fn name(&self) -> String {
        describe(&self.interpreter, &[&self.script])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_listmode_command_line() {
        let x = ScriptExtractor::new("python", "./listmode.py");
        let args: Vec<String> = x
            .args(
                Path::new("/ws/record.json"),
                Path::new("/ws/measurements.csv"),
                Path::new("/ws"),
            )
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "./listmode.py",
                "/ws/record.json",
                "--output",
                "/ws/measurements.csv",
                "/ws",
                "/ws"
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn script_failure_surfaces_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("listmode.sh");
        std::fs::write(&script, "echo \"no particles in $1\" >&2\nexit 4\n").unwrap();

        let x = ScriptExtractor::new("sh", &script);
        let err = x
            .run(Path::new("rec.json"), &dir.path().join("t.csv"), dir.path())
            .unwrap_err();
        assert_eq!(err.status, Some(4));
        assert_eq!(err.diagnostic, "no particles in rec.json\n");
    }
}
