use crate::models::{args::Args, blend_info::BlendInfo};
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    process::Stdio,
    sync::LazyLock,
    time::Duration,
};
use thiserror::Error;
use tokio::process::Command;

/// Prefix of the line the inspector script prints its JSON on.
pub const INSPECTOR_PREFIX: &str = "BLEND_INSPECTOR_JSON:";
const INSPECTOR_SCRIPT: &str = include_str!("../scripts/blend_inspector.py");
const VERSION_TIMEOUT: Duration = Duration::from_secs(30);
const STDERR_EXCERPT: usize = 200;

static VERSION_LINE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"Blender (\d+)\.(\d+)(?:\.(\d+))?"));

#[derive(Debug, Error)]
pub enum BlenderError {
    #[error("Blender executable not found: {0}")]
    NotFound(PathBuf),
    #[error("Unable to read blender version from output: {0}")]
    UnknownVersion(String),
    #[error("Blender did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Blender did not report any metadata: {0}")]
    NoMetadata(String),
    #[error("Invalid metadata from blender: {0}")]
    InvalidMetadata(#[from] serde_json::Error),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blender structure to hold path to executable and version of blender installed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blender {
    /// Path to blender executable on the system.
    executable: PathBuf,
    /// Version of blender installed on the system.
    version: Version,
}

/// Captured result of a headless blender run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutput {
    /// Exit code. `None` when blender was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Paths from `Saved: '/path/to/file.png'` lines.
    pub fn saved_files(&self) -> Vec<PathBuf> {
        self.stdout
            .lines()
            .filter(|line| line.contains("Saved:"))
            .filter_map(|line| line.split('\'').nth(1))
            .map(|location| PathBuf::from(location.trim()))
            .collect()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.stdout
            .lines()
            .chain(self.stderr.lines())
            .filter(|line| line.contains("Warning:"))
    }
}

impl Blender {
    /// Create a new blender struct with provided path and version. Note this is not checked and enforced!
    ///
    /// # Examples
    /// ```
    /// use blender::blender::Blender;
    /// use semver::Version;
    /// let blender = Blender::new("path/to/blender".into(), Version::new(4, 1, 0));
    /// assert_eq!(blender.get_version(), &Version::new(4, 1, 0));
    /// ```
    pub fn new(executable: PathBuf, version: Version) -> Self {
        Blender {
            executable,
            version,
        }
    }

    /// Create a new blender struct from executable path. This function will fetch the version of blender by invoking -v command.
    /// Otherwise, if Blender is not install, or a version is not found, an error will be thrown
    pub async fn from_executable(executable: impl AsRef<Path>) -> Result<Self, BlenderError> {
        let executable = executable.as_ref().to_path_buf();
        let output = spawn_and_wait(&executable, vec!["-v".to_owned()], VERSION_TIMEOUT).await?;
        let version = Self::parse_version(&output.stdout)
            .ok_or_else(|| BlenderError::UnknownVersion(first_line(&output.stdout)))?;
        Ok(Blender {
            executable,
            version,
        })
    }

    /// Pull `X.Y[.Z]` out of `Blender 4.2.1 LTS`-like output.
    pub fn parse_version(stdout: &str) -> Option<Version> {
        let regex = VERSION_LINE.as_ref().ok()?;
        let caps = regex.captures(stdout)?;
        let part = |i: usize| -> Option<u64> {
            caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
        };
        Some(Version::new(part(1)?, part(2)?, part(3)?))
    }

    pub fn get_executable(&self) -> &Path {
        &self.executable
    }

    pub fn get_version(&self) -> &Version {
        &self.version
    }

    /// Run blender with the given arguments and capture its output.
    /// The process is killed if it does not exit within `timeout`.
    pub async fn run(&self, args: &Args, timeout: Duration) -> Result<ScriptOutput, BlenderError> {
        let col = args.create_arg_list();
        tracing::debug!(executable = %self.executable.display(), args = ?col, "Running blender");
        spawn_and_wait(&self.executable, col, timeout).await
    }

    /// `blender -b <blend> -y -P <script>`
    pub async fn run_script(
        &self,
        blend: impl AsRef<Path>,
        script: impl AsRef<Path>,
        timeout: Duration,
    ) -> Result<ScriptOutput, BlenderError> {
        self.run(&Args::script(blend, script), timeout).await
    }

    /// Read blend metadata by opening the file in blender. Slower than [BlendInfo::from_path]
    /// but works for any file this version of blender can load.
    pub async fn inspect(
        &self,
        blend: impl AsRef<Path>,
        timeout: Duration,
    ) -> Result<BlendInfo, BlenderError> {
        let mut script = tempfile::Builder::new()
            .prefix("blend_inspector_")
            .suffix(".py")
            .tempfile()?;
        script.write_all(INSPECTOR_SCRIPT.as_bytes())?;
        script.flush()?;

        let output = self.run_script(blend, script.path(), timeout).await?;
        let json = output
            .stdout
            .lines()
            .find_map(|line| line.trim().strip_prefix(INSPECTOR_PREFIX))
            .ok_or_else(|| {
                BlenderError::NoMetadata(output.stderr.chars().take(STDERR_EXCERPT).collect())
            })?;
        Ok(serde_json::from_str(json)?)
    }
}

impl PartialOrd for Blender {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Blender {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.executable.cmp(&other.executable))
    }
}

async fn spawn_and_wait(
    executable: &Path,
    args: Vec<String>,
    timeout: Duration,
) -> Result<ScriptOutput, BlenderError> {
    let child = Command::new(executable)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => BlenderError::NotFound(executable.to_path_buf()),
            _ => BlenderError::Io(e),
        })?;

    // dropping the child on timeout kills it
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| BlenderError::Timeout(timeout))??;

    Ok(ScriptOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_banner() {
        assert_eq!(
            Blender::parse_version("Blender 4.2.1 LTS\n\tbuild date: 2024-08-19"),
            Some(Version::new(4, 2, 1))
        );
        assert_eq!(
            Blender::parse_version("Blender 3.6\n"),
            Some(Version::new(3, 6, 0))
        );
        assert_eq!(Blender::parse_version("command not found"), None);
    }

    #[test]
    fn orders_by_version_not_text() {
        let old = Blender::new("/opt/blender/4.2/blender".into(), Version::new(4, 2, 0));
        let new = Blender::new("/opt/blender/4.10/blender".into(), Version::new(4, 10, 0));
        assert!(new > old);
        let mut list = vec![new.clone(), old.clone()];
        list.sort();
        assert_eq!(list, vec![old, new]);
    }

    #[test]
    fn extracts_saved_files() {
        let output = ScriptOutput {
            code: Some(0),
            stdout: "Fra:1 Mem:10M | Rendering 1 / 4 samples\nSaved: '/tmp/out/0001.png'\n Time: 00:01.20 (Saving: 00:00.10)\nWarning: missing texture\n".to_owned(),
            stderr: String::new(),
        };
        assert!(output.success());
        assert_eq!(output.saved_files(), vec![PathBuf::from("/tmp/out/0001.png")]);
        assert_eq!(output.warnings().count(), 1);
    }

    #[tokio::test]
    async fn missing_executable_is_not_found() {
        let blender = Blender::new("/definitely/not/here/blender".into(), Version::new(4, 2, 0));
        let err = blender
            .run_script("scene.blend", "script.py", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BlenderError::NotFound(_)));

        let err = Blender::from_executable("/definitely/not/here/blender")
            .await
            .unwrap_err();
        assert!(matches!(err, BlenderError::NotFound(_)));
    }

    // Every fake is written before anything is spawned. A child forked while another
    // test still holds a script open for writing would make exec fail with ETXTBSY.
    #[cfg(unix)]
    #[tokio::test]
    async fn runs_fake_blender() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let write_fake = |name: &str, body: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };

        let inspector = write_fake(
            "inspector",
            r#"echo 'Blender 4.2.0'
echo 'BLEND_INSPECTOR_JSON:{"file":"/a.blend","job_name":"a","scenes":[{"name":"Scene","frame_start":1,"frame_end":10,"frame_step":1,"output_path":"/tmp/","view_layers":[{"name":"ViewLayer","use":true}],"render_engine":"CYCLES","use_nodes":false,"resolution_x":1920,"resolution_y":1080,"output_format":"PNG"}],"active_scene":"Scene"}'"#,
        );
        let broken = write_fake("broken", "echo 'Error: cannot read file' >&2\nexit 1");
        let slow = write_fake("slow", "sleep 5");

        let blender = Blender::from_executable(&inspector).await.unwrap();
        assert_eq!(blender.get_version(), &Version::new(4, 2, 0));
        let info = blender.inspect("/a.blend", Duration::from_secs(10)).await.unwrap();
        assert_eq!(info.job_name, "a");
        assert_eq!(info.active_scene.as_deref(), Some("Scene"));
        assert!(info.scenes[0].view_layers[0].enabled);

        let blender = Blender::new(broken, Version::new(4, 2, 0));
        match blender.inspect("/a.blend", Duration::from_secs(10)).await {
            Err(BlenderError::NoMetadata(stderr)) => assert!(stderr.contains("cannot read file")),
            other => panic!("unexpected result {other:?}"),
        }
        let output = blender
            .run_script("a.blend", "b.py", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(output.code, Some(1));
        assert!(!output.success());

        let blender = Blender::new(slow, Version::new(4, 2, 0));
        let err = blender
            .run_script("a.blend", "b.py", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, BlenderError::Timeout(_)));
    }
}
