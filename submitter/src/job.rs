//! Per-file submission state and how it turns into an Afanasy job.
use crate::afanasy::{Block, Job};
use crate::preferences::{DEFAULT_FRAMES_PER_TASK, DEFAULT_PRIORITY};
use blender::models::blend_info::{
    job_name_for, DEFAULT_FRAME_END, DEFAULT_FRAME_START, DEFAULT_FRAME_STEP,
};
use blender::{Args, BlendInfo, Format, Mode, SceneInfo};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const FALLBACK_BLOCK: &str = "render";
const ALL_LAYERS: &str = "AllLayers";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneSelection {
    /// Let blender pick the scene saved as active.
    #[default]
    Default,
    Scene(String),
    AllScenes,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum LayerMode {
    /// All selected layers in one block.
    #[default]
    Single,
    /// One block per layer so layers render side by side.
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSettings {
    pub priority: u32,
    pub start_paused: bool,
    pub branch: Option<String>,
    /// 0 means unlimited.
    pub max_running_tasks: u32,
    pub hosts_mask: Option<String>,
    pub hosts_mask_exclude: Option<String>,
    pub depend_mask: Option<String>,
    /// Executable as the render nodes see it.
    pub blender: PathBuf,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            start_paused: false,
            branch: None,
            max_running_tasks: 0,
            hosts_mask: None,
            hosts_mask_exclude: None,
            depend_mask: None,
            blender: PathBuf::from("blender"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("No view layers selected for: {}", files.join(", "))]
pub struct ValidationError {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub frames: i64,
    pub tasks: i64,
}

impl std::ops::Add for FrameStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            frames: self.frames + rhs.frames,
            tasks: self.tasks + rhs.tasks,
        }
    }
}

/// Frames rendered for an inclusive range and the task count Afanasy splits them into.
pub fn frame_stats(start: i32, end: i32, step: i32, frames_per_task: i32) -> FrameStats {
    if step <= 0 {
        return FrameStats::default();
    }
    let frames = ((end as i64 - start as i64).div_euclid(step as i64) + 1).max(0);
    let tasks = if frames_per_task > 0 && frames > 0 {
        (frames + frames_per_task as i64 - 1) / frames_per_task as i64
    } else {
        0
    };
    FrameStats { frames, tasks }
}

/// One blend file queued for submission, seeded from its metadata and then edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileJob {
    pub path: PathBuf,
    pub job_name: String,
    pub info: Option<BlendInfo>,
    /// Why inspection failed, if it did.
    pub error: Option<String>,
    pub scene: SceneSelection,
    pub layers: Vec<String>,
    pub frame_start: i32,
    pub frame_end: i32,
    pub frame_step: i32,
    pub frames_per_task: i32,
    pub output_path: String,
    pub output_format: Format,
    pub layer_mode: LayerMode,
}

// Settings one block is built from.
struct BlockSpec<'a> {
    scene: Option<&'a str>,
    layers: Vec<&'a str>,
    start: i32,
    end: i32,
    step: i32,
    output: &'a str,
    format: &'a Format,
}

impl FileJob {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            job_name: job_name_for(&path),
            path,
            info: None,
            error: None,
            scene: SceneSelection::Default,
            layers: Vec::new(),
            frame_start: DEFAULT_FRAME_START,
            frame_end: DEFAULT_FRAME_END,
            frame_step: DEFAULT_FRAME_STEP,
            frames_per_task: DEFAULT_FRAMES_PER_TASK as i32,
            output_path: String::new(),
            output_format: Format::default(),
            layer_mode: LayerMode::default(),
        }
    }

    /// Seed everything from the first scene of `info`.
    pub fn from_info(info: BlendInfo) -> Self {
        let mut job = Self::new(info.file.clone());
        job.job_name = info.job_name.clone();
        if let Some(first) = info.scenes.first() {
            job.scene = SceneSelection::Scene(first.name.clone());
            job.apply_scene(first);
        }
        job.info = Some(info);
        job
    }

    pub fn failed(path: impl Into<PathBuf>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(path)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    fn apply_scene(&mut self, scene: &SceneInfo) {
        self.layers = scene.enabled_layers().map(|l| l.name.clone()).collect();
        self.frame_start = scene.frame_start;
        self.frame_end = scene.frame_end;
        self.frame_step = scene.frame_step;
        self.output_path = scene.output_path.clone();
        self.output_format = scene.output_format.clone();
    }

    /// Change the scene and reload its range, output and layers.
    /// Returns false when the named scene is not in the file; the selection is left as is.
    pub fn select_scene(&mut self, selection: SceneSelection) -> bool {
        let scene = match (&selection, &self.info) {
            (SceneSelection::Scene(name), Some(info)) => match info.scene(name) {
                Some(scene) => Some(scene.clone()),
                None => return false,
            },
            (SceneSelection::Scene(_), None) => return false,
            (SceneSelection::Default, Some(info)) => info.default_scene().cloned(),
            _ => None,
        };
        if let Some(scene) = scene {
            self.apply_scene(&scene);
        }
        self.scene = selection;
        true
    }

    /// Scene the single-scene settings refer to.
    pub fn selected_scene(&self) -> Option<&SceneInfo> {
        let info = self.info.as_ref()?;
        match &self.scene {
            SceneSelection::Scene(name) => info.scene(name),
            SceneSelection::Default => info.default_scene(),
            SceneSelection::AllScenes => None,
        }
    }

    // A scene with view layers needs at least one of them picked.
    fn needs_layers(&self) -> bool {
        !matches!(self.scene, SceneSelection::AllScenes)
            && self.layers.iter().all(|l| l.trim().is_empty())
            && self
                .selected_scene()
                .is_some_and(|scene| !scene.view_layers.is_empty())
    }

    pub fn stats(&self) -> FrameStats {
        match (&self.scene, &self.info) {
            (SceneSelection::AllScenes, Some(info)) => info
                .scenes
                .iter()
                .map(|s| frame_stats(s.frame_start, s.frame_end, s.frame_step, self.frames_per_task))
                .fold(FrameStats::default(), |acc, s| acc + s),
            _ => frame_stats(
                self.frame_start,
                self.frame_end,
                self.frame_step,
                self.frames_per_task,
            ),
        }
    }

    pub fn blocks(&self, blender: &Path) -> Vec<Block> {
        let specs: Vec<BlockSpec> = match (&self.scene, &self.info) {
            (SceneSelection::AllScenes, Some(info)) if !info.scenes.is_empty() => info
                .scenes
                .iter()
                .map(|scene| BlockSpec {
                    scene: Some(scene.name.as_str()),
                    layers: scene.enabled_layers().map(|l| l.name.trim()).collect(),
                    start: scene.frame_start,
                    end: scene.frame_end,
                    step: scene.frame_step,
                    output: &scene.output_path,
                    format: &scene.output_format,
                })
                .collect(),
            _ => vec![BlockSpec {
                scene: match &self.scene {
                    SceneSelection::Scene(name) => Some(name.as_str()),
                    _ => None,
                },
                layers: self.layers.iter().map(|l| l.trim()).collect(),
                start: self.frame_start,
                end: self.frame_end,
                step: self.frame_step,
                output: &self.output_path,
                format: &self.output_format,
            }],
        };

        specs
            .into_iter()
            .flat_map(|spec| self.blocks_for(spec, blender))
            .collect()
    }

    fn blocks_for(&self, spec: BlockSpec, blender: &Path) -> Vec<Block> {
        let scene = spec.scene.filter(|s| !s.is_empty());
        let layers: Vec<&str> = spec.layers.iter().copied().filter(|l| !l.is_empty()).collect();

        let mut args = Args::new(&self.path, Mode::Numeric { step: spec.step });
        args.scene = scene.map(str::to_owned);
        args.output = Some(spec.output)
            .filter(|o| !o.is_empty())
            .map(PathBuf::from);
        args.format = Some(spec.format.clone());
        let command = args.to_command(blender, quote_arg);

        let names = match self.layer_mode {
            LayerMode::Parallel if !layers.is_empty() => layers
                .iter()
                .map(|layer| format!("{}_{layer}", scene.unwrap_or(FALLBACK_BLOCK)))
                .collect(),
            _ => vec![single_block_name(scene, &layers)],
        };

        let working_directory = self
            .path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        names
            .into_iter()
            .map(|name| {
                let mut block = Block::new(name, command.clone());
                block.working_directory = working_directory.clone();
                block.set_numeric(
                    spec.start as i64,
                    spec.end as i64,
                    self.frames_per_task as i64,
                    spec.step as i64,
                );
                block
            })
            .collect()
    }

    pub fn to_job(&self, settings: &JobSettings) -> Job {
        let mut job = Job::new(&self.job_name, settings.priority);
        job.offline = settings.start_paused.then_some(true);
        job.branch = non_empty(&settings.branch);
        job.max_running_tasks = (settings.max_running_tasks > 0).then_some(settings.max_running_tasks);
        job.hosts_mask = non_empty(&settings.hosts_mask);
        job.hosts_mask_exclude = non_empty(&settings.hosts_mask_exclude);
        job.depend_mask = non_empty(&settings.depend_mask);
        job.blocks = self.blocks(&settings.blender);
        job
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

fn single_block_name(scene: Option<&str>, layers: &[&str]) -> String {
    match (scene, layers) {
        (Some(scene), [layer]) => format!("{scene}_{layer}"),
        (None, [layer]) => (*layer).to_owned(),
        (Some(scene), [_, _, ..]) => format!("{scene}_{ALL_LAYERS}"),
        (None, [_, _, ..]) => ALL_LAYERS.to_owned(),
        (scene, []) => scene.unwrap_or(FALLBACK_BLOCK).to_owned(),
    }
}

/// Check every file that can be submitted. Lists all offenders at once.
pub fn validate(jobs: &[FileJob]) -> Result<(), ValidationError> {
    let files: Vec<String> = jobs
        .iter()
        .filter(|job| !job.is_failed() && job.needs_layers())
        .map(|job| {
            job.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| job.job_name.clone())
        })
        .collect();
    if files.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { files })
    }
}

/// Quote for the shell of the machine building the command.
pub fn quote_arg(arg: &str) -> String {
    if cfg!(windows) {
        quote_windows(arg)
    } else {
        quote_posix(arg)
    }
}

pub fn quote_posix(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_owned();
    }
    let safe = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        arg.to_owned()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

pub fn quote_windows(arg: &str) -> String {
    format!("\"{}\"", arg.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blender::ViewLayerInfo;

    fn layer(name: &str, enabled: bool) -> ViewLayerInfo {
        ViewLayerInfo {
            name: name.to_owned(),
            enabled,
        }
    }

    fn scene(name: &str, layers: Vec<ViewLayerInfo>) -> SceneInfo {
        SceneInfo {
            name: name.to_owned(),
            frame_start: 1,
            frame_end: 10,
            frame_step: 1,
            output_path: "/renders/out_".to_owned(),
            view_layers: layers,
            output_format: Format::OPEN_EXR,
            ..Default::default()
        }
    }

    fn info(scenes: Vec<SceneInfo>) -> BlendInfo {
        BlendInfo {
            file: PathBuf::from("/proj/shot_010.blend"),
            job_name: "shot_010".to_owned(),
            scenes,
            active_scene: None,
            blender_version: Some("4.2".to_owned()),
        }
    }

    #[test]
    fn frame_stats_math() {
        assert_eq!(frame_stats(1, 10, 1, 3), FrameStats { frames: 10, tasks: 4 });
        assert_eq!(frame_stats(1, 10, 2, 3), FrameStats { frames: 5, tasks: 2 });
        assert_eq!(frame_stats(5, 5, 1, 3), FrameStats { frames: 1, tasks: 1 });
        assert_eq!(frame_stats(10, 1, 1, 3), FrameStats { frames: 0, tasks: 0 });
        assert_eq!(frame_stats(1, 10, 0, 3), FrameStats::default());
        assert_eq!(frame_stats(1, 10, 1, 0), FrameStats { frames: 10, tasks: 0 });
        // floors toward negative infinity like the range it models
        assert_eq!(frame_stats(3, 1, 2, 1).frames, 0);
    }

    #[test]
    fn from_info_uses_first_scene() {
        let job = FileJob::from_info(info(vec![
            scene("Main", vec![layer("Beauty", true), layer("Mask", false)]),
            scene("Alt", vec![]),
        ]));
        assert_eq!(job.job_name, "shot_010");
        assert_eq!(job.scene, SceneSelection::Scene("Main".to_owned()));
        assert_eq!(job.layers, vec!["Beauty"]);
        assert_eq!(job.frames_per_task, 3);
        assert_eq!(job.output_format, Format::OPEN_EXR);
        assert!(!job.is_failed());
    }

    #[test]
    fn select_scene_reloads_settings() {
        let mut alt = scene("Alt", vec![layer("Fog", true)]);
        alt.frame_end = 48;
        let mut job = FileJob::from_info(info(vec![scene("Main", vec![]), alt]));

        assert!(job.select_scene(SceneSelection::Scene("Alt".to_owned())));
        assert_eq!(job.frame_end, 48);
        assert_eq!(job.layers, vec!["Fog"]);

        assert!(!job.select_scene(SceneSelection::Scene("Nope".to_owned())));
        assert_eq!(job.scene, SceneSelection::Scene("Alt".to_owned()));

        assert!(job.select_scene(SceneSelection::AllScenes));
        assert_eq!(job.stats().frames, 10 + 48);
    }

    #[test]
    fn single_mode_block_names() {
        let blender = Path::new("blender");
        let mut job = FileJob::from_info(info(vec![scene(
            "Main",
            vec![layer("Beauty", true), layer("Fog", true)],
        )]));
        assert_eq!(job.blocks(blender)[0].name, "Main_AllLayers");

        job.layers = vec!["Beauty".to_owned()];
        assert_eq!(job.blocks(blender)[0].name, "Main_Beauty");

        job.layers.clear();
        assert_eq!(job.blocks(blender)[0].name, "Main");

        job.scene = SceneSelection::Default;
        assert_eq!(job.blocks(blender)[0].name, "render");
        job.layers = vec!["A".to_owned(), "B".to_owned()];
        assert_eq!(job.blocks(blender)[0].name, "AllLayers");
    }

    #[test]
    fn parallel_mode_one_block_per_layer() {
        let mut job = FileJob::from_info(info(vec![scene(
            "Main",
            vec![layer("Beauty", true), layer("Fog", true)],
        )]));
        job.layer_mode = LayerMode::Parallel;
        let blocks = job.blocks(Path::new("blender"));
        let names: Vec<_> = blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Main_Beauty", "Main_Fog"]);
        assert!(blocks.iter().all(|b| b.command == blocks[0].command));

        job.layers.clear();
        assert_eq!(job.blocks(Path::new("blender"))[0].name, "Main");
    }

    #[cfg(not(windows))]
    #[test]
    fn block_command_and_frames() {
        let mut job = FileJob::from_info(info(vec![scene("Main", vec![layer("Beauty", true)])]));
        job.frame_step = 2;
        job.frames_per_task = 5;
        let block = &job.blocks(Path::new("/opt/blender/4.2/blender"))[0];
        assert_eq!(
            block.command,
            "/opt/blender/4.2/blender -b /proj/shot_010.blend -y -S Main -o /renders/out_ -F OPEN_EXR -s @#@ -e @#@ -j 2 -a"
        );
        assert_eq!(block.working_directory, "/proj");
        assert_eq!(block.service, "blender");
        assert_eq!(
            (block.frame_first, block.frame_last, block.frames_per_task, block.frames_inc),
            (1, 10, 5, 2)
        );
    }

    #[test]
    fn unknown_format_and_empty_output_are_left_out() {
        let mut job = FileJob::from_info(info(vec![scene("Main", vec![])]));
        job.output_path.clear();
        job.output_format = Format::Unknown(99);
        let command = &job.blocks(Path::new("blender"))[0].command;
        assert!(!command.contains(" -o "));
        assert!(!command.contains(" -F "));
    }

    #[cfg(not(windows))]
    #[test]
    fn all_scenes_use_their_own_settings() {
        let mut second = scene("Alt Cam", vec![layer("A", true), layer("B", false)]);
        second.frame_start = 100;
        second.frame_end = 120;
        second.output_format = Format::PNG;
        let mut job = FileJob::from_info(info(vec![
            scene("Main", vec![layer("Beauty", true), layer("Fog", true)]),
            second,
        ]));
        job.scene = SceneSelection::AllScenes;

        let blocks = job.blocks(Path::new("blender"));
        let names: Vec<_> = blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Main_AllLayers", "Alt Cam_A"]);
        assert_eq!(blocks[1].frame_first, 100);
        assert!(blocks[1].command.contains("-S 'Alt Cam'"));
        assert!(blocks[1].command.contains("-F PNG"));

        job.layer_mode = LayerMode::Parallel;
        assert_eq!(job.blocks(Path::new("blender")).len(), 3);
        assert_eq!(job.stats(), FrameStats { frames: 10 + 21, tasks: 4 + 7 });
    }

    #[test]
    fn to_job_applies_settings() {
        let job = FileJob::from_info(info(vec![scene("Main", vec![])]));
        let settings = JobSettings {
            priority: 10,
            start_paused: true,
            branch: Some("  ".to_owned()),
            max_running_tasks: 4,
            hosts_mask: Some("node.*".to_owned()),
            ..Default::default()
        };
        let af = job.to_job(&settings);
        assert_eq!(af.name, "shot_010");
        assert_eq!(af.priority, 10);
        assert_eq!(af.offline, Some(true));
        assert_eq!(af.branch, None);
        assert_eq!(af.max_running_tasks, Some(4));
        assert_eq!(af.hosts_mask.as_deref(), Some("node.*"));
        assert_eq!(af.blocks.len(), 1);

        let af = job.to_job(&JobSettings::default());
        assert_eq!(af.offline, None);
        assert_eq!(af.max_running_tasks, None);
    }

    #[test]
    fn validation_lists_files_without_layers() {
        let mut missing = FileJob::from_info(info(vec![scene("Main", vec![layer("Beauty", false)])]));
        assert!(missing.layers.is_empty());
        let ok = FileJob::from_info(info(vec![scene("Main", vec![layer("Beauty", true)])]));
        let no_layers = FileJob::from_info(info(vec![scene("Old", vec![])]));
        let failed = FileJob::failed("/proj/broken.blend", "bad header");

        let err = validate(&[missing.clone(), ok.clone(), no_layers, failed]).unwrap_err();
        assert_eq!(err.files, vec!["shot_010.blend"]);
        assert_eq!(err.to_string(), "No view layers selected for: shot_010.blend");

        missing.scene = SceneSelection::AllScenes;
        assert!(validate(&[missing, ok]).is_ok());
    }

    #[test]
    fn posix_quoting() {
        assert_eq!(quote_posix(""), "''");
        assert_eq!(quote_posix("/opt/blender-4.2/blender"), "/opt/blender-4.2/blender");
        assert_eq!(quote_posix("my shot.blend"), "'my shot.blend'");
        assert_eq!(quote_posix("it's"), r"'it'\''s'");
        assert_eq!(quote_posix("$HOME"), "'$HOME'");
    }

    #[test]
    fn windows_quoting() {
        assert_eq!(quote_windows(r"C:\blender\blender.exe"), r#""C:\blender\blender.exe""#);
        assert_eq!(quote_windows(r#"say "hi""#), r#""say ""hi""""#);
        assert_eq!(quote_windows(""), r#""""#);
    }
}
