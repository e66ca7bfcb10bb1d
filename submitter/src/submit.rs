//! Direct submission: validate, build one Afanasy job per file, send, remember the id.
use crate::afanasy::Farm;
use crate::job::{validate, FileJob, JobSettings, ValidationError};
use crate::records;
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitResult {
    pub file: PathBuf,
    pub job_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitResult {
    pub fn is_ok(&self) -> bool {
        self.job_id.is_some()
    }
}

/// Submit every file that inspected cleanly. Nothing is sent if validation fails.
pub async fn submit_all(
    farm: &dyn Farm,
    jobs: &[FileJob],
    settings: &JobSettings,
    cancel: &CancellationToken,
) -> Result<Vec<SubmitResult>, ValidationError> {
    validate(jobs)?;

    let mut results = Vec::with_capacity(jobs.len());
    for file in jobs {
        if cancel.is_cancelled() {
            tracing::warn!("Submission cancelled by user");
            break;
        }
        let mut result = SubmitResult {
            file: file.path.clone(),
            job_name: file.job_name.clone(),
            job_id: None,
            error: None,
        };

        if let Some(error) = &file.error {
            result.error = Some(format!("Not inspected: {error}"));
            results.push(result);
            continue;
        }

        let job = file.to_job(settings);
        match farm.submit(&job).await {
            Ok(id) => {
                tracing::info!(file = %file.path.display(), id, "Submitted");
                records::write(&file.path, id);
                result.job_id = Some(id);
            }
            Err(e) => {
                tracing::error!(file = %file.path.display(), error = %e, "Submission failed");
                result.error = Some(e.to_string());
            }
        }
        results.push(result);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::afanasy::{AfanasyError, Job};
    use blender::{BlendInfo, SceneInfo, ViewLayerInfo};
    use serde_json::Value;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeFarm {
        jobs: Mutex<Vec<Job>>,
    }

    #[async_trait::async_trait]
    impl Farm for FakeFarm {
        async fn submit(&self, job: &Job) -> Result<i64, AfanasyError> {
            if job.name == "rejected" {
                return Err(AfanasyError::Rejected("no".to_owned()));
            }
            let mut jobs = self.jobs.lock().unwrap();
            jobs.push(job.clone());
            Ok(100 + jobs.len() as i64)
        }

        async fn job_info(&self, id: i64) -> Result<Value, AfanasyError> {
            Err(AfanasyError::JobNotFound(id))
        }

        async fn task_output(&self, id: i64, _: i64, _: i64) -> Result<String, AfanasyError> {
            Err(AfanasyError::JobNotFound(id))
        }
    }

    fn file_job(dir: &std::path::Path, name: &str, layers: &[(&str, bool)]) -> FileJob {
        FileJob::from_info(BlendInfo {
            file: dir.join(format!("{name}.blend")),
            job_name: name.to_owned(),
            scenes: vec![SceneInfo {
                name: "Scene".to_owned(),
                view_layers: layers
                    .iter()
                    .map(|(name, enabled)| ViewLayerInfo {
                        name: name.to_string(),
                        enabled: *enabled,
                    })
                    .collect(),
                ..Default::default()
            }],
            active_scene: None,
            blender_version: None,
        })
    }

    #[tokio::test]
    async fn submits_and_records_ids() {
        let dir = tempfile::tempdir().unwrap();
        let farm = FakeFarm::default();
        let jobs = vec![
            file_job(dir.path(), "a", &[("Beauty", true)]),
            file_job(dir.path(), "rejected", &[]),
            FileJob::failed(dir.path().join("c.blend"), "bad header"),
        ];

        let results = submit_all(&farm, &jobs, &JobSettings::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].job_id, Some(101));
        assert!(results[1].error.as_deref().unwrap().contains("rejected"));
        assert!(results[2].error.as_deref().unwrap().starts_with("Not inspected"));

        assert_eq!(farm.jobs.lock().unwrap()[0].blocks[0].name, "Scene_Beauty");
        assert_eq!(records::ids_for(&dir.path().join("a.blend")), vec!["101"]);
        assert!(records::ids_for(&dir.path().join("rejected.blend")).is_empty());
    }

    #[tokio::test]
    async fn invalid_selection_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let farm = FakeFarm::default();
        let jobs = vec![
            file_job(dir.path(), "a", &[("Beauty", true)]),
            file_job(dir.path(), "b", &[("Beauty", false)]),
        ];
        let err = submit_all(&farm, &jobs, &JobSettings::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.files, vec!["b.blend"]);
        assert!(farm.jobs.lock().unwrap().is_empty());
    }
}
