//! Stage sequencing: acquire → convert → extract against one workspace.
//!
//! ## Stage state
//!
//! The filesystem is the only source of truth about what has been produced.
//! Each stage checks that its declared input is present (and non-empty)
//! before doing anything, so re-running an earlier stage and then a later one
//! always sees the real state of the workspace. No "last completed stage"
//! flag is kept anywhere.
//!
//! ## Failure contract
//!
//! A stage that fails removes its declared output. Callers therefore never
//! find a record or table that claims success for a run that did not finish,
//! and the next stage's precondition check catches the gap.

use crate::config::SessionConfig;
use crate::error::CyzError;
use crate::output::{AcquiredFile, ExtractionResult};
use crate::pipeline::{
    acquire, Converter, DotnetConverter, Extractor, ScriptExtractor, Stage, ToolFailure,
};
use crate::workspace::Workspace;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Environment fallback for the decoder location.
pub const DECODER_ENV: &str = "CYZ2JSON_PATH";

/// Environment fallback for the extractor script location.
pub const EXTRACTOR_ENV: &str = "CYZ_EXTRACTOR_SCRIPT";

/// Runs pipeline stages against a [`Workspace`].
///
/// Stages are independent calls. Nothing forces acquire, convert and extract
/// to run back-to-back; [`PipelineCoordinator::run_all`] is a convenience.
pub struct PipelineCoordinator {
    workspace: Workspace,
    config: SessionConfig,
}

impl PipelineCoordinator {
    pub fn new(workspace: Workspace, config: SessionConfig) -> Self {
        Self { workspace, config }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Declared output of the convert stage.
    pub fn record_path(&self) -> PathBuf {
        self.workspace.path_for(&self.config.record_name)
    }

    /// Declared table output of the extract stage.
    pub fn table_path(&self) -> PathBuf {
        self.workspace.path_for(&self.config.table_name)
    }

    // ── Stage 1 ──────────────────────────────────────────────────────────

    /// Copy or download `source` into the workspace.
    ///
    /// The file keeps the source's sanitised name unless that would collide
    /// with the record, the table or the image extension; see
    /// [`acquire::workspace_name`].
    ///
    /// # Errors
    /// - `MissingPrecondition` if a local source is absent or empty; nothing
    ///   is started in that case
    /// - `AcquisitionFailure` / `AcquisitionTimeout` for download problems
    pub async fn acquire(&self, source: &str) -> Result<AcquiredFile, CyzError> {
        let result = self.acquire_inner(source).await;
        if let Err(ref e) = result {
            self.notify_error(Stage::Acquire, e);
        }
        result
    }

    async fn acquire_inner(&self, source: &str) -> Result<AcquiredFile, CyzError> {
        if !acquire::is_url(source) {
            require_input(Stage::Acquire, Path::new(source))?;
        }
        let name = acquire::workspace_name(
            source,
            &[self.config.record_name.as_str(), self.config.table_name.as_str()],
            &self.config.image_extension,
        )?;

        let start = self.begin(Stage::Acquire);
        info!("Acquiring: {}", source);
        let acquired = acquire::acquire(
            source,
            &name,
            &self.workspace,
            self.config.download_timeout_secs,
        )
        .await?;
        self.complete(Stage::Acquire, &acquired.path, start);
        Ok(acquired)
    }

    // ── Stage 2 ──────────────────────────────────────────────────────────

    /// Decode `input` (normally the acquired file) into the record.
    ///
    /// # Errors
    /// - `MissingPrecondition` if `input` is absent or empty; the decoder is
    ///   not resolved or started in that case
    /// - `ToolNotConfigured` if no decoder can be resolved
    /// - `ExternalToolFailure` if the decoder fails or writes nothing
    pub async fn convert(&self, input: &Path) -> Result<PathBuf, CyzError> {
        let output = self.record_path();
        let result = self.convert_inner(input, &output).await;
        if let Err(ref e) = result {
            self.notify_error(Stage::Convert, e);
        }
        result
    }

    async fn convert_inner(&self, input: &Path, output: &Path) -> Result<PathBuf, CyzError> {
        require_input(Stage::Convert, input)?;
        let converter = self.resolve_converter()?;
        let tool = converter.name();

        let start = self.begin(Stage::Convert);
        info!("Converting {} with {}", input.display(), tool);
        // A stale record must not satisfy the postcondition for this run.
        remove_if_present(output);

        let (input_owned, output_owned) = (input.to_path_buf(), output.to_path_buf());
        let outcome = tokio::task::spawn_blocking(move || converter.run(&input_owned, &output_owned))
            .await
            .map_err(|e| CyzError::Internal(format!("Convert task panicked: {e}")))?;

        self.settle(Stage::Convert, &tool, outcome, &[output])?;
        self.complete(Stage::Convert, output, start);
        Ok(output.to_path_buf())
    }

    // ── Stage 3 ──────────────────────────────────────────────────────────

    /// Turn the record into images and the measurement table.
    ///
    /// Images from an earlier extract run are removed first, so the result
    /// lists exactly what this run produced.
    ///
    /// # Errors
    /// - `MissingPrecondition` if the record is absent or empty
    /// - `ToolNotConfigured` if no extractor can be resolved
    /// - `ExternalToolFailure` if the extractor fails or writes no table
    pub async fn extract(&self) -> Result<ExtractionResult, CyzError> {
        let result = self.extract_inner().await;
        if let Err(ref e) = result {
            self.notify_error(Stage::Extract, e);
        }
        result
    }

    async fn extract_inner(&self) -> Result<ExtractionResult, CyzError> {
        let record = self.record_path();
        let table = self.table_path();
        let image_dir = self.workspace.root().to_path_buf();
        let extension = self.config.image_extension.clone();

        require_input(Stage::Extract, &record)?;
        let extractor = self.resolve_extractor()?;
        let tool = extractor.name();

        let start = self.begin(Stage::Extract);
        info!("Extracting {} with {}", record.display(), tool);
        remove_if_present(&table);
        self.workspace.remove_images(&extension);

        let (r, t, d) = (record.clone(), table.clone(), image_dir.clone());
        let outcome = tokio::task::spawn_blocking(move || extractor.run(&r, &t, &d))
            .await
            .map_err(|e| CyzError::Internal(format!("Extract task panicked: {e}")))?;

        if let Err(e) = self.settle(Stage::Extract, &tool, outcome, &[table.as_path()]) {
            self.workspace.remove_images(&extension);
            return Err(e);
        }

        let images = self
            .workspace
            .list_images(&extension, self.config.image_order)?;
        let duration_ms = start.elapsed().as_millis() as u64;
        info!("Extracted {} images in {}ms", images.len(), duration_ms);
        self.complete(Stage::Extract, &table, start);

        Ok(ExtractionResult {
            table,
            image_dir,
            images,
            duration_ms,
        })
    }

    /// Acquire, convert and extract in one go, stopping at the first failure.
    pub async fn run_all(&self, source: &str) -> Result<ExtractionResult, CyzError> {
        let acquired = self.acquire(source).await?;
        self.convert(&acquired.path).await?;
        self.extract().await
    }

    // ── Tool resolution ──────────────────────────────────────────────────

    /// Resolve the decoder, from most-specific to least-specific:
    /// pre-built converter, configured DLL path, then `CYZ2JSON_PATH`.
    fn resolve_converter(&self) -> Result<Arc<dyn Converter>, CyzError> {
        if let Some(ref converter) = self.config.converter {
            return Ok(Arc::clone(converter));
        }

        let dll = self
            .config
            .decoder_path
            .clone()
            .or_else(|| env_path(DECODER_ENV))
            .ok_or_else(|| CyzError::ToolNotConfigured {
                stage: Stage::Convert,
                hint: format!(
                    "Point --decoder (or {DECODER_ENV}) at Cyz2Json.dll.\n\
                     Build it from https://github.com/OBAMANEXT/cyz2json (requires .NET 8)."
                ),
            })?;

        Ok(Arc::new(DotnetConverter::new(&self.config.dotnet_program, dll)))
    }

    /// Resolve the extractor: pre-built, configured script, then `CYZ_EXTRACTOR_SCRIPT`.
    fn resolve_extractor(&self) -> Result<Arc<dyn Extractor>, CyzError> {
        if let Some(ref extractor) = self.config.extractor {
            return Ok(Arc::clone(extractor));
        }

        let script = self
            .config
            .extractor_script
            .clone()
            .or_else(|| env_path(EXTRACTOR_ENV))
            .ok_or_else(|| CyzError::ToolNotConfigured {
                stage: Stage::Extract,
                hint: format!("Point --extractor-script (or {EXTRACTOR_ENV}) at listmode.py."),
            })?;

        Ok(Arc::new(ScriptExtractor::new(
            &self.config.extractor_program,
            script,
        )))
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    /// Map a tool outcome to the stage result and enforce the postcondition.
    ///
    /// On any failure every path in `outputs` is removed.
    fn settle(
        &self,
        stage: Stage,
        tool: &str,
        outcome: Result<(), ToolFailure>,
        outputs: &[&Path],
    ) -> Result<(), CyzError> {
        let failure = match outcome {
            Ok(()) => outputs
                .iter()
                .find(|p| !is_non_empty_file(p))
                .map(|missing| ToolFailure {
                    status: None,
                    diagnostic: format!(
                        "{tool} reported success but produced no output at '{}'",
                        missing.display()
                    ),
                }),
            Err(f) => Some(f),
        };

        match failure {
            None => Ok(()),
            Some(f) => {
                outputs.iter().for_each(|p| remove_if_present(p));
                Err(CyzError::ExternalToolFailure {
                    stage,
                    tool: tool.to_string(),
                    status: f.status,
                    diagnostic: f.diagnostic,
                })
            }
        }
    }

    fn begin(&self, stage: Stage) -> Instant {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(stage);
        }
        Instant::now()
    }

    fn complete(&self, stage: Stage, output: &Path, start: Instant) {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        debug!("{} stage done in {}ms → {}", stage, elapsed_ms, output.display());
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_complete(stage, output, elapsed_ms);
        }
    }

    fn notify_error(&self, stage: Stage, error: &CyzError) {
        warn!("{} stage failed: {}", stage, error);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_error(stage, &error.to_string());
        }
    }
}

fn require_input(stage: Stage, path: &Path) -> Result<(), CyzError> {
    if is_non_empty_file(path) {
        Ok(())
    } else {
        Err(CyzError::MissingPrecondition {
            stage,
            path: path.to_path_buf(),
        })
    }
}

fn is_non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
