//! Configuration types for a processing session.
//!
//! Everything a session needs is controlled through [`SessionConfig`], built
//! via its [`SessionConfigBuilder`]. The workspace location is part of this
//! struct rather than a process-wide setting, so two sessions in one process
//! (tests, embedders) never share hidden state.

use crate::error::CyzError;
use crate::pipeline::{Converter, Extractor};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default workspace directory name under the system temp dir.
pub const DEFAULT_WORKSPACE_DIR: &str = "CyzWorkspace";

/// Configuration for a processing session.
///
/// Built via [`SessionConfig::builder()`] or using
/// [`SessionConfig::default()`].
///
/// # Example
/// ```rust
/// use cyz_annotate::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .workspace_root("/tmp/cyz-session")
///     .decoder_path("/opt/cyz2json/bin/Cyz2Json.dll")
///     .annotation_fields(["biological", "species"])
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct SessionConfig {
    /// Scratch directory for this session. Default: `<tmp>/CyzWorkspace`.
    ///
    /// Every regular file directly inside it is deleted when a session opens.
    pub workspace_root: PathBuf,

    /// File name of the intermediate record. Default: `record.json`.
    pub record_name: String,

    /// File name of the measurement table. Default: `measurements.csv`.
    pub table_name: String,

    /// Extension of extracted images, without the dot. Default: `tif`.
    pub image_extension: String,

    /// How extracted images are ordered for browsing. Default: lexicographic.
    pub image_order: ImageOrder,

    /// Annotation CSV location. If None, `<workspace>/annotations/annotations.csv`.
    ///
    /// The default sits in a subdirectory so it survives workspace reset.
    pub annotation_path: Option<PathBuf>,

    /// Annotation columns after the image name. Default: `biological`, `species`.
    pub annotation_fields: Vec<String>,

    /// Download timeout for URL sources in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// .NET host used to run the decoder. Default: `dotnet`.
    pub dotnet_program: PathBuf,

    /// Path to `Cyz2Json.dll`. If None, falls back to `CYZ2JSON_PATH`.
    pub decoder_path: Option<PathBuf>,

    /// Interpreter for the extractor script. Default: `python`.
    pub extractor_program: PathBuf,

    /// Path to `listmode.py`. If None, falls back to `CYZ_EXTRACTOR_SCRIPT`.
    pub extractor_script: Option<PathBuf>,

    /// Pre-constructed decoder. Takes precedence over `decoder_path`.
    pub converter: Option<Arc<dyn Converter>>,

    /// Pre-constructed extractor. Takes precedence over `extractor_script`.
    pub extractor: Option<Arc<dyn Extractor>>,

    /// Stage progress events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join(DEFAULT_WORKSPACE_DIR),
            record_name: "record.json".to_string(),
            table_name: "measurements.csv".to_string(),
            image_extension: "tif".to_string(),
            image_order: ImageOrder::default(),
            annotation_path: None,
            annotation_fields: vec!["biological".to_string(), "species".to_string()],
            download_timeout_secs: 120,
            dotnet_program: PathBuf::from("dotnet"),
            decoder_path: None,
            extractor_program: PathBuf::from("python"),
            extractor_script: None,
            converter: None,
            extractor: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("workspace_root", &self.workspace_root)
            .field("record_name", &self.record_name)
            .field("table_name", &self.table_name)
            .field("image_extension", &self.image_extension)
            .field("image_order", &self.image_order)
            .field("annotation_path", &self.annotation_path)
            .field("annotation_fields", &self.annotation_fields)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("dotnet_program", &self.dotnet_program)
            .field("decoder_path", &self.decoder_path)
            .field("extractor_program", &self.extractor_program)
            .field("extractor_script", &self.extractor_script)
            .field("converter", &self.converter.as_ref().map(|c| c.name()))
            .field("extractor", &self.extractor.as_ref().map(|x| x.name()))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn StageProgressCallback>"),
            )
            .finish()
    }
}

impl SessionConfig {
    /// Create a new builder for `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Where the annotation CSV lives for a workspace rooted at `root`.
    pub fn resolve_annotation_path(&self, root: &Path) -> PathBuf {
        self.annotation_path
            .clone()
            .unwrap_or_else(|| root.join("annotations").join("annotations.csv"))
    }
}

/// Builder for [`SessionConfig`].
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl fmt::Debug for SessionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionConfigBuilder").field(&self.config).finish()
    }
}

impl SessionConfigBuilder {
    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = root.into();
        self
    }

    pub fn record_name(mut self, name: impl Into<String>) -> Self {
        self.config.record_name = name.into();
        self
    }

    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.config.table_name = name.into();
        self
    }

    pub fn image_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.image_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    pub fn image_order(mut self, order: ImageOrder) -> Self {
        self.config.image_order = order;
        self
    }

    pub fn annotation_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.annotation_path = Some(path.into());
        self
    }

    pub fn annotation_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.annotation_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn dotnet_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.dotnet_program = program.into();
        self
    }

    pub fn decoder_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.decoder_path = Some(path.into());
        self
    }

    pub fn extractor_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.extractor_program = program.into();
        self
    }

    pub fn extractor_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.extractor_script = Some(path.into());
        self
    }

    pub fn converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.config.converter = Some(converter);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SessionConfig, CyzError> {
        let c = &self.config;

        for (what, name) in [("record", &c.record_name), ("table", &c.table_name)] {
            if !is_plain_file_name(name) {
                return Err(CyzError::InvalidConfig(format!(
                    "{what} name must be a plain file name, got '{name}'"
                )));
            }
        }
        if c.record_name == c.table_name {
            return Err(CyzError::InvalidConfig(
                "record and table must have different names".into(),
            ));
        }
        if c.image_extension.is_empty() {
            return Err(CyzError::InvalidConfig("image extension is empty".into()));
        }
        if c.annotation_fields.is_empty() {
            return Err(CyzError::InvalidConfig(
                "at least one annotation field is required".into(),
            ));
        }
        for (i, field) in c.annotation_fields.iter().enumerate() {
            if field.trim().is_empty() {
                return Err(CyzError::InvalidConfig("annotation field names must not be empty".into()));
            }
            if field.eq_ignore_ascii_case(crate::annotation::KEY_COLUMN) {
                return Err(CyzError::InvalidConfig(format!(
                    "'{field}' is reserved for the image column"
                )));
            }
            if c.annotation_fields[..i].contains(field) {
                return Err(CyzError::InvalidConfig(format!(
                    "duplicate annotation field '{field}'"
                )));
            }
        }
        Ok(self.config)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Display order of extracted images.
///
/// The extractor's emission order and the filesystem's enumeration order are
/// not guaranteed to be stable, so "next" could land on a different image
/// after a re-run. Lexicographic ordering by file name removes that doubt and
/// is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOrder {
    /// Byte-wise ascending by file name. (default)
    #[default]
    Lexicographic,
    /// Whatever order the directory listing returns.
    Enumeration,
}

impl ImageOrder {
    /// Reorder `names` in place.
    pub fn apply(self, names: &mut [String]) {
        match self {
            ImageOrder::Lexicographic => names.sort_unstable(),
            ImageOrder::Enumeration => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = SessionConfig::builder().build().unwrap();
        assert_eq!(c.record_name, "record.json");
        assert_eq!(c.annotation_fields, vec!["biological", "species"]);
        assert_eq!(c.image_order, ImageOrder::Lexicographic);
        assert!(c.workspace_root.ends_with(DEFAULT_WORKSPACE_DIR));
    }

    #[test]
    fn extension_loses_leading_dot() {
        let c = SessionConfig::builder().image_extension(".png").build().unwrap();
        assert_eq!(c.image_extension, "png");
    }

    #[test]
    fn rejects_nested_record_name() {
        let err = SessionConfig::builder().record_name("sub/record.json").build();
        assert!(matches!(err, Err(CyzError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_same_record_and_table() {
        let err = SessionConfig::builder()
            .record_name("x.out")
            .table_name("x.out")
            .build();
        assert!(matches!(err, Err(CyzError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_bad_fields() {
        assert!(SessionConfig::builder()
            .annotation_fields(Vec::<String>::new())
            .build()
            .is_err());
        assert!(SessionConfig::builder()
            .annotation_fields(["image"])
            .build()
            .is_err());
        assert!(SessionConfig::builder()
            .annotation_fields(["species", "species"])
            .build()
            .is_err());
    }

    #[test]
    fn annotation_path_defaults_into_subdirectory() {
        let c = SessionConfig::default();
        let p = c.resolve_annotation_path(Path::new("/ws"));
        assert_eq!(p, PathBuf::from("/ws/annotations/annotations.csv"));

        let c = SessionConfig::builder()
            .annotation_path("/elsewhere/notes.csv")
            .build()
            .unwrap();
        assert_eq!(
            c.resolve_annotation_path(Path::new("/ws")),
            PathBuf::from("/elsewhere/notes.csv")
        );
    }

    #[test]
    fn lexicographic_order_sorts() {
        let mut names = vec!["b.tif".to_string(), "a.tif".to_string()];
        ImageOrder::Lexicographic.apply(&mut names);
        assert_eq!(names, vec!["a.tif", "b.tif"]);

        let mut names = vec!["b.tif".to_string(), "a.tif".to_string()];
        ImageOrder::Enumeration.apply(&mut names);
        assert_eq!(names, vec!["b.tif", "a.tif"]);
    }

    #[test]
    fn debug_hides_trait_objects() {
        let s = format!("{:?}", SessionConfig::default());
        assert!(s.contains("workspace_root"));
        assert!(s.contains("converter: None"));
    }
}
