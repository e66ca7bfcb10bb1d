//! Submission through blender itself: every file is opened headless and a python
//! script (normally one driving the CGRU addon) is run against it.
use blender::{Blender, BlenderError};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SCRIPT: &str = include_str!("../scripts/cgru_submit_default.py");
pub const CUSTOM_SETTINGS_MARKER: &str = "# {{CUSTOM_SETTINGS}}";
pub const SCRIPT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("No script content available for submission")]
    EmptyScript,
    #[error("Unable to read script {path}: {source}")]
    ScriptRead {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Script to run: a file of the user's, or the packaged default. `custom_settings`
/// goes where the marker line is.
pub fn load_script(
    custom: Option<&Path>,
    custom_settings: Option<&str>,
) -> Result<String, BatchError> {
    let script = match custom {
        Some(path) => std::fs::read_to_string(path).map_err(|source| BatchError::ScriptRead {
            path: path.to_path_buf(),
            source,
        })?,
        None => DEFAULT_SCRIPT.to_owned(),
    };
    let script = match custom_settings.filter(|s| !s.trim().is_empty()) {
        Some(settings) => script.replace(CUSTOM_SETTINGS_MARKER, settings),
        None => script,
    };
    if script.trim().is_empty() {
        return Err(BatchError::EmptyScript);
    }
    Ok(script)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FileOutcome {
    Ran {
        #[serde(rename = "returncode")]
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub success: bool,
    pub cancelled: bool,
    pub results: Vec<FileResult>,
    /// Last per-file error.
    pub error: Option<String>,
}

/// Run `script` against every file in order. Stops early once `cancel` fires.
/// A non-zero exit code is reported but does not count as an error.
pub async fn run_batch(
    blender: &Blender,
    files: &[PathBuf],
    script: &str,
    cancel: &CancellationToken,
) -> Result<BatchReport, BatchError> {
    run_batch_with_timeout(blender, files, script, cancel, SCRIPT_TIMEOUT).await
}

pub(crate) async fn run_batch_with_timeout(
    blender: &Blender,
    files: &[PathBuf],
    script: &str,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<BatchReport, BatchError> {
    if script.trim().is_empty() {
        return Err(BatchError::EmptyScript);
    }

    let mut report = BatchReport::default();
    for file in files {
        if cancel.is_cancelled() {
            tracing::warn!("Submission cancelled by user");
            report.cancelled = true;
            break;
        }
        tracing::info!(file = %file.display(), "Running submit script");

        let outcome = tokio::select! {
            result = run_one(blender, file, script, timeout) => result,
            _ = cancel.cancelled() => {
                report.cancelled = true;
                Err("Submission cancelled".to_owned())
            }
        };
        let outcome = match outcome {
            Ok(output) => {
                if !output.success() {
                    tracing::warn!(file = %file.display(), code = ?output.code, "Blender exited with an error code");
                }
                FileOutcome::Ran {
                    code: output.code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                }
            }
            Err(error) => {
                tracing::error!(file = %file.display(), %error, "Submit script failed");
                report.error = Some(error.clone());
                FileOutcome::Failed { error }
            }
        };
        report.results.push(FileResult {
            file: file.clone(),
            outcome,
        });
        if report.cancelled {
            break;
        }
    }
    report.success = report.error.is_none();
    Ok(report)
}

async fn run_one(
    blender: &Blender,
    file: &Path,
    script: &str,
    timeout: Duration,
) -> Result<blender::ScriptOutput, String> {
    let mut temp = tempfile::Builder::new()
        .prefix("cgru_submit_")
        .suffix(".py")
        .tempfile()
        .map_err(|e| e.to_string())?;
    temp.write_all(script.as_bytes())
        .and_then(|_| temp.flush())
        .map_err(|e| e.to_string())?;

    let executable = blender.get_executable();
    // a bare name is looked up on PATH when spawned
    if executable.components().count() > 1 && !executable.exists() {
        return Err(BlenderError::NotFound(executable.to_path_buf()).to_string());
    }
    blender
        .run_script(file, temp.path(), timeout)
        .await
        .map_err(|e| e.to_string())
}
