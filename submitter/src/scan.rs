use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Endings skipped even though they may sit next to blend files: blender backups and logs.
pub const DEFAULT_EXCLUDES: &[&str] = &[".blend1", ".blend2", ".txt", ".py", ".json", ".md", ".2025"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Directory not found or not readable: {0}")]
    NotFound(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

pub fn default_excludes() -> Vec<String> {
    DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
}

/// Recursively collect `.blend` files under `dir`, sorted by path.
pub fn scan(dir: &Path, exclude: &[String]) -> Result<Vec<ScannedFile>, ScanError> {
    if !dir.is_dir() || fs::read_dir(dir).is_err() {
        return Err(ScanError::NotFound(dir.to_path_buf()));
    }
    let exclude: Vec<String> = exclude.iter().map(|e| e.to_lowercase()).collect();

    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %current.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            // linked folders are not followed, they can loop
            if file_type.is_symlink() && path.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let lower = name.to_lowercase();
            if !lower.ends_with(".blend") || exclude.iter().any(|e| lower.ends_with(e.as_str())) {
                continue;
            }

            let size = match fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Unable to stat file");
                    0
                }
            };
            found.push(ScannedFile { name, path, size });
        }
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::info!(dir = %dir.display(), count = found.len(), "Scan finished");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_blend_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("shots/sq010")).unwrap();
        fs::write(root.join("b.blend"), b"1234").unwrap();
        fs::write(root.join("A.BLEND"), b"").unwrap();
        fs::write(root.join("b.blend1"), b"").unwrap();
        fs::write(root.join("notes.txt"), b"").unwrap();
        fs::write(root.join("shots/sq010/sh010.blend"), b"").unwrap();
        fs::write(root.join("shots/sq010/sh010.blend2"), b"").unwrap();

        let files = scan(root, &default_excludes()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["A.BLEND", "b.blend", "sh010.blend"]);
        assert_eq!(files[1].size, 4);
        assert_eq!(files[2].path, root.join("shots/sq010/sh010.blend"));
    }

    #[test]
    fn custom_excludes_apply() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.blend"), b"").unwrap();
        fs::write(dir.path().join("old_backup.blend"), b"").unwrap();

        let files = scan(dir.path(), &["_BACKUP.blend".to_owned()]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "keep.blend");
    }

    #[test]
    fn missing_root_is_not_found() {
        let err = scan(Path::new("/no/such/dir/anywhere"), &default_excludes()).unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
    }

    #[test]
    fn empty_directory_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan(dir.path(), &[]).unwrap().is_empty());
    }
}
