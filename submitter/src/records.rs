//! Job ids remembered next to the blend files they were submitted from,
//! as `<blend dir>/job_id/<job name>_jobID_<id>.txt`.
use blender::models::blend_info::job_name_for;
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const RECORD_DIR: &str = "job_id";

static RECORD_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^(.+)_jobID_(.+)\.txt$"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub job_name: String,
    pub job_id: String,
}

fn record_path(blend: &Path, job_name: &str, id: &str) -> PathBuf {
    blend
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(RECORD_DIR)
        .join(format!("{job_name}_jobID_{id}.txt"))
}

/// Remember a submitted job. Failing to write is logged and otherwise ignored,
/// the job is on the farm either way.
pub fn write(blend: &Path, id: i64) -> Option<PathBuf> {
    let job_name = job_name_for(blend);
    let path = record_path(blend, &job_name, &id.to_string());
    let contents = format!(
        "Job Name: {job_name}\nJob ID: {id}\nBlend File: {}\nSubmitted: {}\n",
        blend.display(),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
    );

    let result = path
        .parent()
        .map(std::fs::create_dir_all)
        .transpose()
        .and_then(|_| std::fs::write(&path, contents));
    match result {
        Ok(()) => Some(path),
        Err(e) => {
            tracing::warn!(blend = %blend.display(), error = %e, "Failed to write job id record");
            None
        }
    }
}

/// All records in `dir/job_id`. Numeric ids come first in numeric order.
pub fn scan_directory(dir: &Path) -> Vec<JobRecord> {
    let Ok(regex) = RECORD_NAME.as_ref() else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(dir.join(RECORD_DIR)) else {
        return Vec::new();
    };

    let mut records: Vec<JobRecord> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let caps = regex.captures(&name)?;
            Some(JobRecord {
                job_name: caps[1].to_owned(),
                job_id: caps[2].to_owned(),
            })
        })
        .collect();
    records.sort_by(|a, b| compare_ids(&a.job_id, &b.job_id).then_with(|| a.job_name.cmp(&b.job_name)));
    records
}

fn compare_ids(a: &str, b: &str) -> Ordering {
    let numeric = |id: &str| -> Option<u128> {
        if id.bytes().all(|c| c.is_ascii_digit()) {
            id.parse().ok()
        } else {
            None
        }
    };
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Ids submitted for this blend file.
pub fn ids_for(blend: &Path) -> Vec<String> {
    let job_name = job_name_for(blend);
    let dir = blend.parent().unwrap_or_else(|| Path::new(""));
    scan_directory(dir)
        .into_iter()
        .filter(|r| r.job_name == job_name)
        .map(|r| r.job_id)
        .collect()
}

/// Forget a job id. A record that is already gone is fine.
/// Ids are limited to letters, digits, `-` and `_` so the record stays inside `job_id/`.
pub fn remove(blend: &Path, id: &str) -> std::io::Result<()> {
    let valid = !id.is_empty()
        && id
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || c == b'-' || c == b'_');
    if !valid {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid job id {id:?}"),
        ));
    }
    let path = record_path(blend, &job_name_for(blend), id);
    match std::fs::remove_file(&path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_list() {
        let dir = tempdir().unwrap();
        let blend = dir.path().join("shot_010.blend");

        let path = write(&blend, 42).unwrap();
        assert_eq!(path, dir.path().join("job_id").join("shot_010_jobID_42.txt"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Job Name: shot_010\nJob ID: 42\nBlend File: "));
        assert!(text.contains("\nSubmitted: "));

        assert_eq!(ids_for(&blend), vec!["42"]);
        assert!(ids_for(&dir.path().join("other.blend")).is_empty());
    }

    #[test]
    fn numeric_ids_sort_first() {
        let dir = tempdir().unwrap();
        let records = dir.path().join("job_id");
        std::fs::create_dir(&records).unwrap();
        for name in [
            "a_jobID_10.txt",
            "a_jobID_9.txt",
            "b_jobID_beta.txt",
            "b_jobID_alpha.txt",
            "a_jobID_100.txt",
            "notes.txt",
        ] {
            std::fs::write(records.join(name), "").unwrap();
        }
        let ids: Vec<_> = scan_directory(dir.path())
            .into_iter()
            .map(|r| r.job_id)
            .collect();
        assert_eq!(ids, vec!["9", "10", "100", "alpha", "beta"]);
    }

    #[test]
    fn missing_folder_is_empty() {
        let dir = tempdir().unwrap();
        assert!(scan_directory(dir.path()).is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let blend = dir.path().join("shot.blend");
        write(&blend, 7).unwrap();
        remove(&blend, "7").unwrap();
        assert!(ids_for(&blend).is_empty());
        remove(&blend, "7").unwrap();
    }

    #[test]
    fn remove_rejects_ids_outside_the_record_folder() {
        let dir = tempdir().unwrap();
        let shots = dir.path().join("shots");
        std::fs::create_dir_all(shots.join("job_id")).unwrap();
        let victim = dir.path().join("x.txt");
        std::fs::write(&victim, "keep").unwrap();
        let blend = shots.join("a.blend");

        let err = remove(&blend, "../../x").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(remove(&blend, "").is_err());
        assert!(victim.exists());
        remove(&blend, "beta").unwrap();
    }

    #[test]
    fn write_failure_is_not_fatal() {
        let dir = tempdir().unwrap();
        // a file where the record folder should go
        std::fs::write(dir.path().join("job_id"), "").unwrap();
        assert_eq!(write(&dir.path().join("shot.blend"), 1), None);
    }
}
