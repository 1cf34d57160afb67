//! Acquisition: bring a user-supplied path or URL into the workspace.
//!
//! ## Why copy local files too?
//!
//! Every later stage reads and writes inside the workspace only. Copying the
//! source there (rather than pointing the decoder at the user's file) keeps
//! the session self-contained and lets the decoder's output sit next to its
//! input. Bytes go to a temporary file in the workspace first and are renamed
//! into place, so an interrupted transfer never leaves a truncated file under
//! the final name.

use crate::error::CyzError;
use crate::output::{AcquiredFile, SourceKind};
use crate::pipeline::Stage;
use crate::workspace::Workspace;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Name used when the source offers nothing usable.
pub const FALLBACK_NAME: &str = "source.cyz";

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Derive the workspace file name for a source.
///
/// Uses the last path segment of the URL or path, with every run of
/// characters outside `[A-Za-z0-9._-]` replaced by `_`.
pub fn derived_name(source: &str) -> String {
    let raw = if is_url(source) {
        reqwest::Url::parse(source)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut s| s.next_back().map(str::to_string))
            })
            .unwrap_or_default()
    } else {
        Path::new(source)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    let cleaned = UNSAFE_CHARS.replace_all(&raw, "_").into_owned();
    if cleaned.trim_matches('.').is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

/// Suffixes tried, in order, when the derived name collides with a stage artifact.
const COLLISION_SUFFIXES: [&str; 2] = [".cyz", ".input"];

/// The workspace file name for `source`, kept apart from every other artifact.
///
/// The name must not equal any of `reserved` (record, table) and must not
/// carry the image extension, or a later stage would overwrite or delete the
/// acquired file. Colliding names get a suffix from [`COLLISION_SUFFIXES`].
pub fn workspace_name(
    source: &str,
    reserved: &[&str],
    image_extension: &str,
) -> Result<String, CyzError> {
    let image_ext = image_extension.trim_start_matches('.');
    let clashes = |name: &str| {
        reserved.iter().any(|r| *r == name)
            || Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(image_ext))
    };

    let base = derived_name(source);
    if !clashes(&base) {
        return Ok(base);
    }
    COLLISION_SUFFIXES
        .iter()
        .map(|suffix| format!("{base}{suffix}"))
        .find(|candidate| !clashes(candidate))
        .map(|renamed| {
            debug!("Acquired file renamed {} -> {}", base, renamed);
            renamed
        })
        .ok_or_else(|| CyzError::AcquisitionFailure {
            location: source.to_string(),
            reason: format!("no workspace name for '{base}' avoids the stage outputs"),
        })
}

/// Acquire `source` into `workspace` as `dest_name`, overwriting any previous
/// file of that name.
pub async fn acquire(
    source: &str,
    dest_name: &str,
    workspace: &Workspace,
    timeout_secs: u64,
) -> Result<AcquiredFile, CyzError> {
    let dest = workspace.path_for(dest_name);

    if is_url(source) {
        let bytes = download_url(source, timeout_secs).await?;
        write_atomically(source, workspace.root(), &dest, &bytes)?;
        info!("Downloaded {} bytes to: {}", bytes.len(), dest.display());
        Ok(AcquiredFile {
            path: dest,
            bytes: bytes.len() as u64,
            kind: SourceKind::Url,
        })
    } else {
        copy_local(source, workspace, dest).await
    }
}

/// Copy a local file into the workspace.
async fn copy_local(
    source: &str,
    workspace: &Workspace,
    dest: PathBuf,
) -> Result<AcquiredFile, CyzError> {
    let path = PathBuf::from(source);
    if !path.is_file() {
        return Err(CyzError::MissingPrecondition {
            stage: Stage::Acquire,
            path,
        });
    }

    // Already in place (e.g. a re-run pointed at the workspace copy).
    if let (Ok(a), Ok(b)) = (path.canonicalize(), dest.canonicalize()) {
        if a == b {
            let bytes = std::fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
            if bytes == 0 {
                return Err(empty_source(source));
            }
            debug!("Source already in workspace: {}", dest.display());
            return Ok(AcquiredFile {
                path: dest,
                bytes,
                kind: SourceKind::Local,
            });
        }
    }

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| CyzError::AcquisitionFailure {
            location: source.to_string(),
            reason: e.to_string(),
        })?;

    write_atomically(source, workspace.root(), &dest, &bytes)?;
    info!("Copied {} to: {}", path.display(), dest.display());

    Ok(AcquiredFile {
        path: dest,
        bytes: bytes.len() as u64,
        kind: SourceKind::Local,
    })
}

/// Download a URL fully into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, CyzError> {
    info!("Downloading instrument file from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CyzError::AcquisitionFailure {
            location: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            CyzError::AcquisitionTimeout {
                location: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            CyzError::AcquisitionFailure {
                location: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;

    if !response.status().is_success() {
        return Err(CyzError::AcquisitionFailure {
            location: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_err)?;
    Ok(bytes.to_vec())
}

/// Write `bytes` to `dest` via a temp file in `dir`, refusing empty content.
fn write_atomically(source: &str, dir: &Path, dest: &Path, bytes: &[u8]) -> Result<(), CyzError> {
    if bytes.is_empty() {
        return Err(empty_source(source));
    }

    let fail = |e: std::io::Error| CyzError::AcquisitionFailure {
        location: source.to_string(),
        reason: format!("failed to write '{}': {e}", dest.display()),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(fail)?;
    tmp.write_all(bytes).map_err(fail)?;
    tmp.flush().map_err(fail)?;
    tmp.persist(dest).map_err(|e| fail(e.error))?;
    Ok(())
}

fn empty_source(source: &str) -> CyzError {
    CyzError::AcquisitionFailure {
        location: source.to_string(),
        reason: "source is empty".to_string(),
    }
}
