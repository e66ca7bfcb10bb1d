//! Narrow down a render task's log to the lines that matter.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

const ERROR_CONTEXT: usize = 2;
const CRASH_FILE: &str = "crash.txt";

static ERROR_LINE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?i)error|traceback|exception|fatal|critical"));
static WARNING_LINE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?i)warning|\bwarn\b"));
static TIME_LINE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*Time:\s+\d+"));

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum OutputFilter {
    #[default]
    Full,
    /// Error lines with the two lines after each.
    Errors,
    Warnings,
    /// What got written and how long each frame took.
    Saved,
    /// Render progress lines.
    Frames,
}

impl OutputFilter {
    pub fn apply(&self, text: &str) -> String {
        match self {
            OutputFilter::Full => text.to_owned(),
            OutputFilter::Errors => errors(text),
            OutputFilter::Warnings => warnings(text),
            OutputFilter::Saved => saved(text),
            OutputFilter::Frames => frames(text),
        }
    }
}

fn matches(regex: &LazyLock<Result<Regex, regex::Error>>, line: &str) -> bool {
    regex.as_ref().is_ok_and(|r| r.is_match(line))
}

pub fn errors(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if matches(&ERROR_LINE, lines[i]) {
            let end = (i + 1 + ERROR_CONTEXT).min(lines.len());
            out.extend_from_slice(&lines[i..end]);
            i += 1 + ERROR_CONTEXT;
        } else {
            i += 1;
        }
    }
    out.join("\n")
}

pub fn warnings(text: &str) -> String {
    keep(text, |line| matches(&WARNING_LINE, line))
}

pub fn saved(text: &str) -> String {
    keep(text, |line| {
        line.trim().starts_with("Saved:") || matches(&TIME_LINE, line)
    })
}

pub fn frames(text: &str) -> String {
    keep(text, |line| line.trim().starts_with("Fra:"))
}

fn keep(text: &str, pred: impl Fn(&str) -> bool) -> String {
    text.lines().filter(|l| pred(l)).collect::<Vec<_>>().join("\n")
}

/// `crash.txt` from the blend's folder or the one above, framed for display.
pub fn crash_report(blend: &Path) -> Option<String> {
    crash_candidates(blend).iter().filter(|p| p.is_file()).find_map(|path| {
        let bytes = std::fs::read(path)
            .inspect_err(|e| tracing::debug!(path = %path.display(), error = %e, "Unable to read crash report"))
            .ok()?;
        Some(format!(
            "=== crash.txt ===\n{}\n=================\n\n",
            String::from_utf8_lossy(&bytes)
        ))
    })
}

// A bare file name has an empty parent, which joins to a path relative to the working directory.
fn crash_candidates(blend: &Path) -> Vec<PathBuf> {
    let dir = blend.parent().unwrap_or(Path::new(""));
    std::iter::once(dir.join(CRASH_FILE))
        .chain(dir.parent().map(|p| p.join(CRASH_FILE)))
        .collect()
}
