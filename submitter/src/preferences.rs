use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

/*
    Settings the user picks once and expects to be remembered between runs,
    e.g. which blender to submit with and how many frames go into each farm task.
    Stored per machine in the user's config directory.
*/
const SETTINGS_PATH: &str = "CgruSubmitter";
const SETTINGS_FILE_NAME: &str = "Preferences.json";

pub const DEFAULT_FRAMES_PER_TASK: u32 = 3;
pub const DEFAULT_PRIORITY: u32 = 99;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Blender executable used for submission and headless inspection.
    pub blender_path: Option<PathBuf>,
    pub frames_per_task: u32,
    pub priority: u32,
    /// Directory of the last scan.
    pub last_directory: Option<PathBuf>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            blender_path: None,
            frames_per_task: DEFAULT_FRAMES_PER_TASK,
            priority: DEFAULT_PRIORITY,
            last_directory: None,
        }
    }
}

impl Preferences {
    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        let path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(path.join(SETTINGS_PATH).join(SETTINGS_FILE_NAME))
    }

    /// Load user preferences from the user's config directory.
    pub fn load() -> Self {
        match Self::get_config_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                tracing::warn!("{e}, using default preferences");
                Self::default()
            }
        }
    }

    /// A missing file gives the defaults. A corrupt one is logged and replaced by defaults.
    pub fn load_from(path: &std::path::Path) -> Self {
        match fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Unable to parse preferences");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save the preferences to the user's config directory.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::get_config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Apply a `key=value` pair as given on the command line.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: "preference",
            value: format!("{key}={value}"),
        };
        match key {
            "blender_path" => {
                self.blender_path = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            "frames_per_task" => {
                self.frames_per_task = value
                    .parse::<u32>()
                    .ok()
                    .filter(|&n| n > 0 && i32::try_from(n).is_ok())
                    .ok_or_else(invalid)?;
            }
            "priority" => self.priority = value.parse().map_err(|_| invalid())?,
            "last_directory" => {
                self.last_directory = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            _ => return Err(invalid()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);

        assert_eq!(Preferences::load_from(&path), Preferences::default());

        let mut prefs = Preferences::default();
        prefs.set("frames_per_task", "5").unwrap();
        prefs.set("blender_path", "/opt/blender/4.2/blender").unwrap();
        prefs.save_to(&path).unwrap();

        let loaded = Preferences::load_from(&path);
        assert_eq!(loaded.frames_per_task, 5);
        assert_eq!(
            loaded.blender_path,
            Some(PathBuf::from("/opt/blender/4.2/blender"))
        );
        assert_eq!(loaded.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, r#"{"priority": 50}"#).unwrap();
        let prefs = Preferences::load_from(&path);
        assert_eq!(prefs.priority, 50);
        assert_eq!(prefs.frames_per_task, DEFAULT_FRAMES_PER_TASK);
    }

    #[test]
    fn rejects_bad_values() {
        let mut prefs = Preferences::default();
        assert!(prefs.set("frames_per_task", "0").is_err());
        assert!(prefs.set("frames_per_task", "3000000000").is_err());
        assert!(prefs.set("priority", "high").is_err());
        assert!(prefs.set("colour", "blue").is_err());
        assert_eq!(prefs, Preferences::default());
    }
}
