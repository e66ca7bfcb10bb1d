/*
    This manager keeps track of blender installations on this machine:
    - Installations found by scanning well known folders, e.g. D:/App/blender/4.2/blender.exe
    - Installations the user registered by hand, persisted in the user config directory.
    The two sources are merged and the newest version becomes the default.
*/
use crate::blender::{Blender, BlenderError};
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};
use thiserror::Error;

const CONFIG_DIR: &str = "CgruSubmitter";
const CONFIG_FILE: &str = "BlenderManager.json";

#[cfg(target_os = "windows")]
pub const EXECUTABLE: &str = "blender.exe";
#[cfg(target_os = "macos")]
pub const EXECUTABLE: &str = "Blender.app/Contents/MacOS/Blender";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const EXECUTABLE: &str = "blender";

static VERSION_DIR: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)?$"));

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Unable to locate the user config directory")]
    NoConfigDir,
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to serialize manager data: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Blender error: {source}")]
    BlenderError {
        #[from]
        source: BlenderError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manager {
    /// Installations registered by hand.
    blenders: Vec<Blender>,
    /// Roots scanned for `<version>/<executable>` folders. Not persisted, comes from configuration.
    #[serde(skip, default = "Manager::default_search_dirs")]
    search_dirs: Vec<PathBuf>,
    #[serde(skip)]
    config_path: Option<PathBuf>,
    #[serde(skip)]
    has_modified: bool,
}

impl Default for Manager {
    fn default() -> Self {
        Self {
            blenders: Vec::new(),
            search_dirs: Self::default_search_dirs(),
            config_path: None,
            has_modified: false,
        }
    }
}

impl Manager {
    // this path is machine specific and should not be shared across machines.
    pub fn get_config_path() -> Result<PathBuf, ManagerError> {
        let path = dirs::config_dir().ok_or(ManagerError::NoConfigDir)?;
        Ok(path.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load the manager data from the user's config directory.
    pub fn load() -> Result<Self, ManagerError> {
        Ok(Self::load_from(Self::get_config_path()?))
    }

    /// Load from `path`. A missing or unreadable file gives an empty manager that saves to `path`.
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut manager = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Fail to deserialize manager data, starting fresh");
                Self::default()
            }),
            Err(_) => {
                tracing::debug!(path = %path.display(), "No manager data yet");
                Self::default()
            }
        };
        manager.config_path = Some(path);
        manager
    }

    /// Replace the folders scanned for installations. An empty list keeps the defaults.
    pub fn with_search_dirs(mut self, search_dirs: Vec<PathBuf>) -> Self {
        if !search_dirs.is_empty() {
            self.search_dirs = search_dirs;
        }
        self
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Save the registered installations.
    pub fn save(&self) -> Result<(), ManagerError> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&self)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_search_dirs() -> Vec<PathBuf> {
        if cfg!(target_os = "windows") {
            vec![
                PathBuf::from("D:/App/blender"),
                PathBuf::from("C:/blender"),
                PathBuf::from("D:/blender"),
            ]
        } else if cfg!(target_os = "macos") {
            vec![PathBuf::from("/Applications/Blender")]
        } else {
            let mut dirs = vec![PathBuf::from("/opt/blender")];
            if let Some(home) = dirs::home_dir() {
                dirs.push(home.join("blender"));
            }
            dirs
        }
    }

    /// Scan the search roots. Each child folder named like a version (`4.2`) holding the
    /// platform executable is an installation. Newest first.
    pub fn discover(&self) -> Vec<Blender> {
        let mut found = Vec::new();
        for root in &self.search_dirs {
            // rare layout: the root itself is the version folder
            if let Some(blender) = Self::installation_in(root) {
                found.push(blender);
            }

            let entries = match fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(root = %root.display(), error = %e, "Skipping blender search root");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    found.extend(Self::installation_in(&path));
                }
            }
        }
        found.sort_by(|a, b| b.cmp(a));
        found
    }

    fn installation_in(dir: &Path) -> Option<Blender> {
        let name = dir.file_name()?.to_str()?;
        let version = parse_dir_version(name)?;
        let executable = dir.join(EXECUTABLE);
        executable
            .is_file()
            .then(|| Blender::new(executable, version))
    }

    /// Registered installations, as stored.
    pub fn get_blenders(&self) -> &Vec<Blender> {
        &self.blenders
    }

    /// Discovered and registered installations that still exist, newest first.
    pub fn installations(&self) -> Vec<Blender> {
        let mut seen = HashSet::new();
        let mut list: Vec<Blender> = self
            .discover()
            .into_iter()
            .chain(
                self.blenders
                    .iter()
                    .filter(|b| b.get_executable().exists())
                    .cloned(),
            )
            .filter(|b| seen.insert(b.get_executable().to_path_buf()))
            .collect();
        list.sort_by(|a, b| b.cmp(a));
        list
    }

    /// Newest installation available.
    pub fn default_blender(&self) -> Option<Blender> {
        self.installations().into_iter().next()
    }

    /// Newest installation matching `major.minor` of `version`.
    pub fn fetch_blender(&self, version: &Version) -> Option<Blender> {
        self.installations().into_iter().find(|b| {
            let v = b.get_version();
            v.major == version.major && v.minor == version.minor
        })
    }

    /// Add a new blender installation to the manager list.
    pub fn add_blender(&mut self, blender: Blender) {
        if self
            .blenders
            .iter()
            .any(|b| b.get_executable() == blender.get_executable())
        {
            return;
        }
        self.blenders.push(blender);
        self.has_modified = true;
    }

    /// Check and add a local installation of blender to manager's registry.
    pub async fn add_blender_path(&mut self, path: impl AsRef<Path>) -> Result<Blender, ManagerError> {
        let path = path.as_ref();
        // for MacOS - User will select the app bundle instead of actual executable, We must include the additional path
        let path = if path.extension().is_some_and(|ext| ext == "app") {
            path.join("Contents/MacOS/Blender")
        } else {
            path.to_path_buf()
        };

        let blender = Blender::from_executable(path).await?;
        tracing::info!(version = %blender.get_version(), executable = %blender.get_executable().display(), "Registered blender");
        self.add_blender(blender.clone());
        Ok(blender)
    }

    /// Remove a registered installation. Returns whether anything was removed.
    pub fn remove_blender(&mut self, executable: &Path) -> bool {
        let before = self.blenders.len();
        self.blenders.retain(|b| b.get_executable() != executable);
        let removed = self.blenders.len() != before;
        self.has_modified |= removed;
        removed
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if self.has_modified {
            if let Err(e) = self.save() {
                tracing::error!("Error saving manager file: {e}");
            }
        }
    }
}

fn parse_dir_version(name: &str) -> Option<Version> {
    let regex = VERSION_DIR.as_ref().ok()?;
    if !regex.is_match(name) {
        return None;
    }
    let mut parts = name.split('.').map(str::parse::<u64>);
    let major = parts.next()?.ok()?;
    let minor = match parts.next() {
        Some(minor) => minor.ok()?,
        None => 0,
    };
    Some(Version::new(major, minor, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(root: &Path, version: &str) -> PathBuf {
        let exe = root.join(version).join(EXECUTABLE);
        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, b"").unwrap();
        exe
    }

    #[test]
    fn folder_versions() {
        assert_eq!(parse_dir_version("4.2"), Some(Version::new(4, 2, 0)));
        assert_eq!(parse_dir_version("4"), Some(Version::new(4, 0, 0)));
        assert_eq!(parse_dir_version("4.2.1"), None);
        assert_eq!(parse_dir_version("blender-4.2"), None);
    }

    #[test]
    fn discovers_newest_first() {
        let root = tempfile::tempdir().unwrap();
        install(root.path(), "4.2");
        install(root.path(), "4.10");
        install(root.path(), "3.6");
        install(root.path(), "nightly");
        fs::create_dir_all(root.path().join("5.0")).unwrap();

        let manager = Manager::default().with_search_dirs(vec![root.path().to_path_buf()]);
        let versions: Vec<_> = manager
            .discover()
            .iter()
            .map(|b| b.get_version().to_string())
            .collect();
        assert_eq!(versions, ["4.10.0", "4.2.0", "3.6.0"]);
        assert_eq!(
            manager.default_blender().unwrap().get_version(),
            &Version::new(4, 10, 0)
        );
        assert_eq!(
            manager.fetch_blender(&Version::new(3, 6, 2)).unwrap().get_version(),
            &Version::new(3, 6, 0)
        );
    }

    #[test]
    fn version_named_root_counts() {
        let parent = tempfile::tempdir().unwrap();
        install(parent.path(), "4.1");
        let manager = Manager::default().with_search_dirs(vec![parent.path().join("4.1")]);
        assert_eq!(manager.discover().len(), 1);
    }

    #[test]
    fn missing_roots_are_skipped() {
        let manager =
            Manager::default().with_search_dirs(vec![PathBuf::from("/no/such/blender/root")]);
        assert!(manager.discover().is_empty());
        assert!(manager.default_blender().is_none());
    }

    #[test]
    fn registered_installations_persist() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config").join(CONFIG_FILE);
        let exe = install(dir.path(), "4.2");
        let empty_root = dir.path().join("no_root");

        {
            let mut manager =
                Manager::load_from(&config).with_search_dirs(vec![empty_root.clone()]);
            assert!(manager.get_blenders().is_empty());
            manager.add_blender(Blender::new(exe.clone(), Version::new(4, 2, 0)));
            manager.add_blender(Blender::new(exe.clone(), Version::new(4, 2, 0)));
            // dropped here, which saves
        }
        assert!(config.exists());

        let mut manager = Manager::load_from(&config).with_search_dirs(vec![empty_root]);
        assert_eq!(manager.get_blenders().len(), 1);
        assert_eq!(manager.installations().len(), 1);

        assert!(manager.remove_blender(&exe));
        assert!(!manager.remove_blender(&exe));
        assert!(manager.get_blenders().is_empty());
    }

    #[test]
    fn registered_and_discovered_are_merged() {
        let root = tempfile::tempdir().unwrap();
        let exe = install(root.path(), "4.2");
        let mut manager = Manager::default().with_search_dirs(vec![root.path().to_path_buf()]);
        manager.add_blender(Blender::new(exe, Version::new(4, 2, 0)));
        manager.add_blender(Blender::new(
            root.path().join("gone/blender"),
            Version::new(9, 0, 0),
        ));
        assert_eq!(manager.installations().len(), 1);
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join(CONFIG_FILE);
        fs::write(&config, "not json").unwrap();
        let manager = Manager::load_from(&config);
        assert!(manager.get_blenders().is_empty());
    }
}
