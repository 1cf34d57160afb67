//! One operator session: workspace, pipeline, annotation store and cursor.
//!
//! [`Session::open`] is the only place the workspace is reset. Everything
//! produced afterwards (acquired file, record, table, images) lives until the
//! next session opens on the same root. Annotations are kept in a
//! subdirectory by default and so carry over from session to session.

use crate::annotation::{AnnotationRecord, AnnotationStore};
use crate::config::SessionConfig;
use crate::coordinator::PipelineCoordinator;
use crate::error::CyzError;
use crate::navigator::ArtifactNavigator;
use crate::output::{AcquiredFile, ExtractionResult};
use crate::workspace::{ResetReport, Workspace};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Pipeline plus browsing state for a single run of the tool.
pub struct Session {
    coordinator: PipelineCoordinator,
    store: AnnotationStore,
    navigator: ArtifactNavigator,
}

impl Session {
    /// Open the configured workspace and clear out the previous session's files.
    ///
    /// Files that could not be removed are reported, not fatal.
    pub fn open(config: SessionConfig) -> Result<(Self, ResetReport), CyzError> {
        let workspace = Workspace::open(&config.workspace_root)?;
        let report = workspace.reset();
        if !report.is_clean() {
            warn!(
                "{} leftover file(s) could not be removed from {}",
                report.failures.len(),
                workspace.root().display()
            );
        }

        let store = AnnotationStore::new(
            config.resolve_annotation_path(workspace.root()),
            config.annotation_fields.clone(),
        );
        info!(
            "Session opened in {} (annotations: {})",
            workspace.root().display(),
            store.path().display()
        );

        Ok((
            Self {
                coordinator: PipelineCoordinator::new(workspace, config),
                store,
                navigator: ArtifactNavigator::new(),
            },
            report,
        ))
    }

    pub fn workspace(&self) -> &Workspace {
        self.coordinator.workspace()
    }

    pub fn config(&self) -> &SessionConfig {
        self.coordinator.config()
    }

    pub fn coordinator(&self) -> &PipelineCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn navigator(&self) -> &ArtifactNavigator {
        &self.navigator
    }

    pub fn navigator_mut(&mut self) -> &mut ArtifactNavigator {
        &mut self.navigator
    }

    // ── Stages ───────────────────────────────────────────────────────────

    pub async fn acquire(&self, source: &str) -> Result<AcquiredFile, CyzError> {
        self.coordinator.acquire(source).await
    }

    pub async fn convert(&self, input: &Path) -> Result<PathBuf, CyzError> {
        self.coordinator.convert(input).await
    }

    /// Run extraction and, on success, point the navigator at the new images.
    ///
    /// A run that was rejected before starting (missing record, no extractor)
    /// leaves the navigator alone. Any later failure has already removed the
    /// previous images from disk, so the navigator is emptied with them.
    pub async fn extract(&mut self) -> Result<ExtractionResult, CyzError> {
        match self.coordinator.extract().await {
            Ok(result) => {
                self.navigator.start(result.images.iter().cloned());
                Ok(result)
            }
            Err(e) => {
                if !matches!(
                    e,
                    CyzError::MissingPrecondition { .. } | CyzError::ToolNotConfigured { .. }
                ) {
                    self.navigator.start(Vec::<String>::new());
                }
                Err(e)
            }
        }
    }

    /// All three stages, then start browsing.
    pub async fn run_all(&mut self, source: &str) -> Result<ExtractionResult, CyzError> {
        let acquired = self.acquire(source).await?;
        self.convert(&acquired.path).await?;
        self.extract().await
    }

    // ── Annotation ───────────────────────────────────────────────────────

    /// The current image and its stored annotation, read fresh from disk.
    pub fn current_annotation(&self) -> Result<Option<(String, AnnotationRecord)>, CyzError> {
        match self.navigator.current() {
            Some(image) => Ok(Some((image.to_string(), self.store.load(image)?))),
            None => Ok(None),
        }
    }

    /// Save `record` for the image under the cursor.
    ///
    /// Returns the image name the record was stored under.
    pub fn annotate_current(&self, record: &AnnotationRecord) -> Result<String, CyzError> {
        let image = self.navigator.current().ok_or(CyzError::OutOfRange {
            index: 0,
            len: 0,
        })?;
        self.store.save(image, record)?;
        Ok(image.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Converter, Extractor, ToolFailure};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct EchoConverter;

    impl Converter for EchoConverter {
        fn run(&self, input: &Path, output: &Path) -> Result<(), ToolFailure> {
            std::fs::copy(input, output)
                .map(|_| ())
                .map_err(|e| ToolFailure::new(None, e.to_string()))
        }
    }

    struct TwoImages;

    impl Extractor for TwoImages {
        fn run(&self, _record: &Path, table: &Path, dir: &Path) -> Result<(), ToolFailure> {
            let io = |e: std::io::Error| ToolFailure::new(None, e.to_string());
            std::fs::write(dir.join("p2.tif"), b"II*").map_err(io)?;
            std::fs::write(dir.join("p1.tif"), b"II*").map_err(io)?;
            std::fs::write(table, b"id,fws\n1,0.5\n2,0.7\n").map_err(io)
        }
    }

    fn config(dir: &TempDir) -> SessionConfig {
        SessionConfig::builder()
            .workspace_root(dir.path().join("ws"))
            .converter(Arc::new(EchoConverter))
            .extractor(Arc::new(TwoImages))
            .build()
            .unwrap()
    }

    #[test]
    fn open_resets_previous_files_but_keeps_annotations() {
        let dir = TempDir::new().unwrap();
        let ws = dir.path().join("ws");
        std::fs::create_dir_all(ws.join("annotations")).unwrap();
        std::fs::write(ws.join("old.tif"), b"x").unwrap();
        std::fs::write(ws.join("annotations").join("annotations.csv"), "image,biological,species\n")
            .unwrap();

        let (session, report) = Session::open(config(&dir)).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.removed.len(), 1);
        assert!(!session.workspace().path_for("old.tif").exists());
        assert!(session.store().path().exists());
    }

    #[tokio::test]
    async fn annotate_without_images_is_out_of_range() {
        let dir = TempDir::new().unwrap();
        let (session, _) = Session::open(config(&dir)).unwrap();
        assert!(session.current_annotation().unwrap().is_none());
        assert!(matches!(
            session.annotate_current(&AnnotationRecord::new(["a"])),
            Err(CyzError::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn run_all_then_annotate() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("sample.cyz");
        std::fs::write(&src, b"instrument bytes").unwrap();

        let (mut session, _) = Session::open(config(&dir)).unwrap();
        let result = session.run_all(src.to_str().unwrap()).await.unwrap();
        assert_eq!(result.images, vec!["p1.tif", "p2.tif"]);
        assert_eq!(session.navigator().current(), Some("p1.tif"));

        let saved = session
            .annotate_current(&AnnotationRecord::new(["algae", "diatom"]))
            .unwrap();
        assert_eq!(saved, "p1.tif");

        session.navigator_mut().next();
        let (image, record) = session.current_annotation().unwrap().unwrap();
        assert_eq!(image, "p2.tif");
        assert!(record.is_empty());

        session.navigator_mut().previous();
        let (_, record) = session.current_annotation().unwrap().unwrap();
        assert_eq!(record, AnnotationRecord::new(["algae", "diatom"]));
    }

    #[tokio::test]
    async fn failed_reextract_empties_navigator() {
        struct FailsSecondTime(std::sync::atomic::AtomicUsize);
        impl Extractor for FailsSecondTime {
            fn run(&self, record: &Path, table: &Path, dir: &Path) -> Result<(), ToolFailure> {
                if self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    TwoImages.run(record, table, dir)
                } else {
                    Err(ToolFailure::new(Some(1), "no particles"))
                }
            }
        }

        let dir = TempDir::new().unwrap();
        let src = dir.path().join("sample.cyz");
        std::fs::write(&src, b"instrument bytes").unwrap();
        let cfg = SessionConfig::builder()
            .workspace_root(dir.path().join("ws"))
            .converter(Arc::new(EchoConverter))
            .extractor(Arc::new(FailsSecondTime(Default::default())))
            .build()
            .unwrap();
        let (mut session, _) = Session::open(cfg).unwrap();
        session.run_all(src.to_str().unwrap()).await.unwrap();
        assert_eq!(session.navigator().len(), 2);

        let err = session.extract().await.unwrap_err();
        assert!(matches!(err, CyzError::ExternalToolFailure { status: Some(1), .. }));
        assert!(!session.workspace().path_for("p1.tif").exists());
        assert!(session.navigator().is_empty());
        assert!(matches!(
            session.annotate_current(&AnnotationRecord::new(["algae"])),
            Err(CyzError::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn rejected_extract_keeps_navigator() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = Session::open(config(&dir)).unwrap();
        session.navigator_mut().start(["keep.tif"]);

        let err = session.extract().await.unwrap_err();
        assert!(matches!(err, CyzError::MissingPrecondition { .. }));
        assert_eq!(session.navigator().current(), Some("keep.tif"));
    }
}
