//! Process configuration from the environment (and `.env`), with the farm address
//! falling back to the CGRU install's `config_default.json`.
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SERVER: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 51000;
const CGRU_CONFIG_FILE: &str = "config_default.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Unable to locate the user config directory")]
    NoConfigDir,
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse settings: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub afanasy_server: String,
    pub afanasy_port: u16,
    pub cgru_location: Option<PathBuf>,
    pub blender_path: Option<PathBuf>,
    pub blender_search_dirs: Vec<PathBuf>,
    pub environment: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            afanasy_server: DEFAULT_SERVER.to_owned(),
            afanasy_port: DEFAULT_PORT,
            cgru_location: None,
            blender_path: None,
            blender_search_dirs: Vec::new(),
            environment: "development".to_owned(),
            log_level: "info".to_owned(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        config.cgru_location = get("CGRU_LOCATION").map(PathBuf::from);
        if let Some(location) = &config.cgru_location {
            let (server, port) = read_cgru_config(location);
            if let Some(server) = server {
                config.afanasy_server = server;
            }
            if let Some(port) = port {
                config.afanasy_port = port;
            }
        }

        if let Some(server) = get("AFANASY_SERVER") {
            config.afanasy_server = server;
        }
        if let Some(port) = get("AFANASY_PORT") {
            config.afanasy_port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "AFANASY_PORT",
                    value: port.clone(),
                })?;
        }

        config.blender_path = get("BLENDER_PATH").map(PathBuf::from);
        config.blender_search_dirs = get("BLENDER_SEARCH_DIRS")
            .map(|dirs| std::env::split_paths(&dirs).collect())
            .unwrap_or_default();
        if let Some(environment) = get("ENVIRONMENT") {
            config.environment = environment;
        }
        if let Some(level) = get("LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }

        Ok(config)
    }

    /// `host:port` of the Afanasy server.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.afanasy_server, self.afanasy_port)
    }
}

// The file is either the variables themselves or wrapped in {"cgru_config": {...}}.
fn read_cgru_config(location: &Path) -> (Option<String>, Option<u16>) {
    let path = location.join(CGRU_CONFIG_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "No CGRU config");
            return (None, None);
        }
    };
    let root: Value = match serde_json::from_str(&content) {
        Ok(root) => root,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unable to parse CGRU config");
            return (None, None);
        }
    };
    let vars = root.get("cgru_config").unwrap_or(&root);

    let server = vars
        .get("af_servername")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned);
    let port = vars.get("af_serverport").and_then(|port| match port {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });
    (server, port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server_address(), "127.0.0.1:51000");
    }

    #[test]
    fn environment_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("AFANASY_SERVER", "farm.local"),
            ("AFANASY_PORT", "52000"),
            ("BLENDER_PATH", "/opt/blender/4.2/blender"),
            ("LOG_LEVEL", "DEBUG"),
            ("ENVIRONMENT", ""),
        ]))
        .unwrap();
        assert_eq!(config.server_address(), "farm.local:52000");
        assert_eq!(
            config.blender_path,
            Some(PathBuf::from("/opt/blender/4.2/blender"))
        );
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.environment, "development");
    }

    #[test]
    fn bad_port_is_an_error() {
        let err = Config::from_lookup(lookup(&[("AFANASY_PORT", "farm")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "AFANASY_PORT", .. }));
    }

    #[test]
    fn cgru_config_supplies_server() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CGRU_CONFIG_FILE),
            r#"{"cgru_config": {"af_servername": "afserver", "af_serverport": 51001}}"#,
        )
        .unwrap();
        let location = dir.path().to_string_lossy().into_owned();

        let config = Config::from_lookup(lookup(&[("CGRU_LOCATION", location.as_str())])).unwrap();
        assert_eq!(config.server_address(), "afserver:51001");

        // environment still wins
        let config = Config::from_lookup(lookup(&[
            ("CGRU_LOCATION", location.as_str()),
            ("AFANASY_SERVER", "override"),
        ]))
        .unwrap();
        assert_eq!(config.server_address(), "override:51001");
    }

    #[test]
    fn search_dirs_are_a_path_list() {
        let joined = std::env::join_paths(["/opt/a", "/opt/b"]).unwrap();
        let joined = joined.to_string_lossy().into_owned();
        let config = Config::from_lookup(lookup(&[("BLENDER_SEARCH_DIRS", joined.as_str())])).unwrap();
        assert_eq!(
            config.blender_search_dirs,
            vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]
        );
    }
}
