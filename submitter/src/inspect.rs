//! Turn a list of blend files into submission state, reading each file directly
//! and asking blender only when that fails.
use crate::job::FileJob;
use blender::{BlendInfo, Blender, BlenderError};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const INSPECT_TIMEOUT: Duration = Duration::from_secs(120);
const BLENDER_MISSING: &str = "Blender not found";

pub struct Inspector {
    blender: Option<Blender>,
    timeout: Duration,
    // set after the first spawn fails with a missing executable
    blender_missing: bool,
}

impl Inspector {
    pub fn new(blender: Option<Blender>) -> Self {
        Self {
            blender,
            timeout: INSPECT_TIMEOUT,
            blender_missing: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn blender_missing(&self) -> bool {
        self.blender_missing
    }

    pub async fn inspect(&mut self, path: PathBuf) -> FileJob {
        let native = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || BlendInfo::from_path(&path)).await
        };
        let native_error = match native {
            Ok(Ok(info)) => {
                tracing::debug!(file = %path.display(), scenes = info.scenes.len(), "Read blend file");
                return FileJob::from_info(info);
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        tracing::info!(file = %path.display(), error = %native_error, "Unable to read blend file directly, asking blender");

        let blender = match &self.blender {
            Some(blender) if !self.blender_missing => blender,
            _ => return FileJob::failed(path, format!("{native_error}; {BLENDER_MISSING}")),
        };
        match blender.inspect(&path, self.timeout).await {
            Ok(mut info) => {
                if info.job_name.is_empty() {
                    info.job_name = blender::models::blend_info::job_name_for(&path);
                }
                info.file = path;
                FileJob::from_info(info)
            }
            Err(BlenderError::NotFound(executable)) => {
                tracing::error!(executable = %executable.display(), "Blender executable is missing");
                self.blender_missing = true;
                FileJob::failed(path, format!("{native_error}; {BLENDER_MISSING}"))
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Blender could not inspect file");
                FileJob::failed(path, format!("{native_error}; {e}"))
            }
        }
    }

    /// Inspect files in order. Files left when `cancel` fires are dropped.
    pub async fn inspect_all(
        &mut self,
        paths: impl IntoIterator<Item = PathBuf>,
        cancel: &CancellationToken,
    ) -> Vec<FileJob> {
        let mut jobs = Vec::new();
        for path in paths {
            if cancel.is_cancelled() {
                tracing::warn!("Inspection cancelled");
                break;
            }
            jobs.push(self.inspect(path).await);
        }
        jobs
    }
}
