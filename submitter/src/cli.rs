use crate::afanasy::{AfanasyClient, Farm};
use crate::batch::{load_script, run_batch, FileOutcome};
use crate::config::Config;
use crate::inspect::Inspector;
use crate::job::{FileJob, JobSettings, LayerMode, SceneSelection};
use crate::output_filter::{crash_report, OutputFilter};
use crate::preferences::Preferences;
use crate::scan::{default_excludes, scan};
use crate::{records, submit};
use anyhow::{anyhow, bail, Context};
use blender::{Blender, BlenderError, Manager};
use clap::{Args as ClapArgs, Parser, Subcommand};
use semver::Version;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "cgru-submit")]
#[command(version)]
#[command(about = "Scan folders for blend files and submit them to the CGRU/Afanasy render farm.")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List blender installations, or register/unregister one
    Blenders {
        #[arg(long, value_name = "EXECUTABLE")]
        add: Option<PathBuf>,
        #[arg(long, value_name = "EXECUTABLE")]
        remove: Option<PathBuf>,
    },
    /// Find blend files under a directory
    Scan {
        dir: PathBuf,
        /// File endings to skip, replaces the defaults
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
    },
    /// Read scene settings from blend files (directories are scanned)
    Inspect {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        blender: Option<PathBuf>,
    },
    /// Build and send one Afanasy job per blend file
    Submit {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[command(flatten)]
        overrides: Overrides,
        #[command(flatten)]
        farm: FarmOptions,
        /// Print the jobs instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
    /// Open every blend file in blender and run a submit script against it
    Batch {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Script to run instead of the packaged one
        #[arg(long)]
        script: Option<PathBuf>,
        /// Python lines inserted at the custom settings marker
        #[arg(long, conflicts_with = "settings_file")]
        settings: Option<String>,
        #[arg(long)]
        settings_file: Option<PathBuf>,
        #[arg(long)]
        blender: Option<PathBuf>,
    },
    /// Job ids submitted from a directory
    Jobs { dir: PathBuf },
    /// Forget a submitted job id
    Forget { blend: PathBuf, id: String },
    /// Progress of a job on the farm
    Status { id: i64 },
    /// Output of one task
    Log {
        id: i64,
        block: i64,
        task: i64,
        #[arg(long, value_enum, default_value_t = OutputFilter::Full)]
        filter: OutputFilter,
        /// Prepend crash.txt found next to this blend file
        #[arg(long)]
        crash: Option<PathBuf>,
    },
    /// Show configuration and preferences, or change a preference
    Settings {
        /// key=value, e.g. frames_per_task=5
        #[arg(long, value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
}

#[derive(ClapArgs)]
struct Overrides {
    /// Scene to render instead of the first one
    #[arg(long, conflicts_with = "all_scenes")]
    scene: Option<String>,
    /// Render every scene with its own settings
    #[arg(long)]
    all_scenes: bool,
    /// View layers to render, comma separated
    #[arg(long, value_delimiter = ',')]
    layers: Vec<String>,
    #[arg(long, value_enum)]
    layer_mode: Option<LayerMode>,
    #[arg(long)]
    start: Option<i32>,
    #[arg(long)]
    end: Option<i32>,
    #[arg(long)]
    step: Option<i32>,
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(i32::MAX)))]
    frames_per_task: Option<u32>,
    #[arg(long)]
    output: Option<String>,
}

#[derive(ClapArgs)]
struct FarmOptions {
    #[arg(long)]
    priority: Option<u32>,
    /// Submit the jobs paused
    #[arg(long)]
    paused: bool,
    #[arg(long)]
    branch: Option<String>,
    #[arg(long, default_value_t = 0)]
    max_running_tasks: u32,
    #[arg(long)]
    hosts_mask: Option<String>,
    #[arg(long)]
    hosts_mask_exclude: Option<String>,
    #[arg(long)]
    depend_mask: Option<String>,
    /// Blender executable as the render nodes see it
    #[arg(long)]
    blender: Option<PathBuf>,
}

#[derive(Serialize)]
struct SettingsView<'a> {
    config: &'a Config,
    preferences: &'a Preferences,
}

impl Cli {
    pub async fn run(self, config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
        let json = self.json;
        let mut preferences = Preferences::load();

        match self.command {
            Commands::Blenders { add, remove } => {
                let mut manager = load_manager(&config);
                if let Some(path) = add {
                    let blender = manager.add_blender_path(&path).await?;
                    tracing::info!(version = %blender.get_version(), "Added blender");
                }
                if let Some(path) = remove {
                    if !manager.remove_blender(&path) {
                        tracing::warn!(path = %path.display(), "No such registered installation");
                    }
                }
                let installations = manager.installations();
                print(json, &installations, || {
                    if installations.is_empty() {
                        println!("No blender installations found");
                    }
                    for blender in &installations {
                        println!("{:<10} {}", blender.get_version(), blender.get_executable().display());
                    }
                })?;
            }

            Commands::Scan { dir, exclude } => {
                let exclude = if exclude.is_empty() { default_excludes() } else { exclude };
                let files = scan(&dir, &exclude)?;
                preferences.last_directory = Some(dir.clone());
                if let Err(e) = preferences.save() {
                    tracing::warn!(error = %e, "Unable to save preferences");
                }
                print(json, &files, || {
                    for file in &files {
                        println!("{:>12}  {}", file.size, file.path.display());
                    }
                    println!("{} blend file(s) in {}", files.len(), dir.display());
                })?;
            }

            Commands::Inspect { paths, blender } => {
                let blender = resolve_blender(blender, &config, &preferences).await;
                let jobs = Inspector::new(blender)
                    .inspect_all(expand_paths(&paths)?, &cancel)
                    .await;
                print(json, &jobs, || jobs.iter().for_each(print_file_job))?;
                let failed = jobs.iter().filter(|j| j.is_failed()).count();
                if failed > 0 {
                    bail!("{failed} of {} file(s) could not be inspected", jobs.len());
                }
            }

            Commands::Submit {
                paths,
                overrides,
                farm,
                dry_run,
            } => {
                let inspect_with = farm.blender.clone();
                let blender = resolve_blender(inspect_with, &config, &preferences).await;
                let mut jobs = Inspector::new(blender.clone())
                    .inspect_all(expand_paths(&paths)?, &cancel)
                    .await;
                for job in &mut jobs {
                    overrides.apply(job, &preferences)?;
                }

                let settings = JobSettings {
                    priority: farm.priority.unwrap_or(preferences.priority),
                    start_paused: farm.paused,
                    branch: farm.branch,
                    max_running_tasks: farm.max_running_tasks,
                    hosts_mask: farm.hosts_mask,
                    hosts_mask_exclude: farm.hosts_mask_exclude,
                    depend_mask: farm.depend_mask,
                    blender: farm
                        .blender
                        .or_else(|| blender.map(|b| b.get_executable().to_path_buf()))
                        .unwrap_or_else(|| PathBuf::from("blender")),
                };

                if dry_run {
                    crate::job::validate(&jobs)?;
                    let built: Vec<_> = jobs
                        .iter()
                        .filter(|j| !j.is_failed())
                        .map(|j| j.to_job(&settings))
                        .collect();
                    print(json, &built, || {
                        for (file, job) in jobs.iter().filter(|j| !j.is_failed()).zip(&built) {
                            let stats = file.stats();
                            println!("{} ({} frames, {} tasks)", job.name, stats.frames, stats.tasks);
                            for block in &job.blocks {
                                println!("  [{}] {}", block.name, block.command);
                            }
                        }
                    })?;
                    return Ok(());
                }

                let client = AfanasyClient::new(config.server_address());
                let results = submit::submit_all(&client, &jobs, &settings, &cancel).await?;
                print(json, &results, || {
                    for result in &results {
                        match (&result.job_id, &result.error) {
                            (Some(id), _) => println!("{}: submitted (ID: {id})", result.job_name),
                            (None, Some(error)) => println!("{}: {error}", result.job_name),
                            (None, None) => {}
                        }
                    }
                })?;
                let failed = results.iter().filter(|r| !r.is_ok()).count();
                if failed > 0 {
                    bail!("{failed} of {} file(s) were not submitted", results.len());
                }
            }

            Commands::Batch {
                paths,
                script,
                settings,
                settings_file,
                blender,
            } => {
                let settings = match settings_file {
                    Some(path) => Some(
                        std::fs::read_to_string(&path)
                            .with_context(|| format!("Unable to read {}", path.display()))?,
                    ),
                    None => settings,
                };
                let script = load_script(script.as_deref(), settings.as_deref())?;
                let requested = blender.or_else(|| config.blender_path.clone()).or_else(|| preferences.blender_path.clone());
                let blender = match resolve_blender(requested.clone(), &config, &preferences).await {
                    Some(blender) => blender,
                    // let every file report the missing executable
                    None => Blender::new(
                        requested.unwrap_or_else(|| PathBuf::from("blender")),
                        Version::new(0, 0, 0),
                    ),
                };
                let files = expand_paths(&paths)?;
                let report = run_batch(&blender, &files, &script, &cancel).await?;
                print(json, &report, || {
                    for result in &report.results {
                        match &result.outcome {
                            FileOutcome::Ran { code, stdout, .. } => {
                                let code = code.map_or("killed".to_owned(), |c| c.to_string());
                                println!("{}: exit {code}", result.file.display());
                                for line in stdout.lines().filter(|l| l.contains("CGRU")) {
                                    println!("  {line}");
                                }
                            }
                            FileOutcome::Failed { error } => {
                                println!("{}: {error}", result.file.display())
                            }
                        }
                    }
                })?;
                if report.cancelled {
                    bail!("Submission cancelled");
                }
                if !report.success {
                    bail!(report.error.unwrap_or_else(|| "Batch submission failed".to_owned()));
                }
            }

            Commands::Jobs { dir } => {
                let found = records::scan_directory(&dir);
                print(json, &found, || {
                    for record in &found {
                        println!("{:>8}  {}", record.job_id, record.job_name);
                    }
                })?;
            }

            Commands::Forget { blend, id } => {
                records::remove(&blend, &id)
                    .with_context(|| format!("Unable to remove job {id} for {}", blend.display()))?;
                tracing::info!(id = %id, "Removed job id record");
            }

            Commands::Status { id } => {
                let stats = AfanasyClient::new(config.server_address()).job_stats(id).await?;
                print(json, &stats, || {
                    println!("{} [{}] {}", stats.id, stats.state, stats.name);
                    for block in &stats.blocks {
                        println!(
                            "  {:<30} {:>3}%  {}/{} done, {} running, {} error",
                            block.name, block.percentage, block.done, block.tasks, block.running, block.error
                        );
                    }
                })?;
            }

            Commands::Log {
                id,
                block,
                task,
                filter,
                crash,
            } => {
                let output = AfanasyClient::new(config.server_address())
                    .task_output(id, block, task)
                    .await?;
                let prefix = crash.as_deref().and_then(crash_report).unwrap_or_default();
                let text = filter.apply(&format!("{prefix}{output}"));
                print(json, &text, || println!("{text}"))?;
            }

            Commands::Settings { set } => {
                for pair in &set {
                    let (key, value) = pair
                        .split_once('=')
                        .ok_or_else(|| anyhow!("Expected KEY=VALUE, got {pair:?}"))?;
                    preferences.set(key.trim(), value.trim())?;
                }
                if !set.is_empty() {
                    let path = preferences.save()?;
                    tracing::info!(path = %path.display(), "Saved preferences");
                }
                let view = SettingsView {
                    config: &config,
                    preferences: &preferences,
                };
                print(json, &view, || {
                    println!("Afanasy server:   {}", config.server_address());
                    if let Some(location) = &config.cgru_location {
                        println!("CGRU location:    {}", location.display());
                    }
                    if let Some(path) = preferences.blender_path.as_ref().or(config.blender_path.as_ref()) {
                        println!("Blender:          {}", path.display());
                    }
                    println!("Frames per task:  {}", preferences.frames_per_task);
                    println!("Priority:         {}", preferences.priority);
                    if let Some(dir) = &preferences.last_directory {
                        println!("Last directory:   {}", dir.display());
                    }
                })?;
            }
        }
        Ok(())
    }
}

impl Overrides {
    fn apply(&self, job: &mut FileJob, preferences: &Preferences) -> anyhow::Result<()> {
        let frames_per_task = self.frames_per_task.unwrap_or(preferences.frames_per_task);
        job.frames_per_task = i32::try_from(frames_per_task)
            .map_err(|_| anyhow!("frames per task {frames_per_task} is too large"))?;
        if job.is_failed() {
            return Ok(());
        }
        if self.all_scenes {
            job.select_scene(SceneSelection::AllScenes);
        } else if let Some(scene) = &self.scene {
            if !job.select_scene(SceneSelection::Scene(scene.clone())) {
                job.error = Some(format!("Scene {scene:?} not found"));
                return Ok(());
            }
        }
        if !self.layers.is_empty() {
            job.layers = self.layers.clone();
        }
        if let Some(mode) = self.layer_mode {
            job.layer_mode = mode;
        }
        if let Some(start) = self.start {
            job.frame_start = start;
        }
        if let Some(end) = self.end {
            job.frame_end = end;
        }
        if let Some(step) = self.step {
            job.frame_step = step;
        }
        if let Some(output) = &self.output {
            job.output_path = output.clone();
        }
        Ok(())
    }
}

fn print<T: Serialize + ?Sized>(json: bool, value: &T, human: impl FnOnce()) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human();
    }
    Ok(())
}

fn print_file_job(job: &FileJob) {
    if let Some(error) = &job.error {
        println!("{}: {error}", job.path.display());
        return;
    }
    let version = job
        .info
        .as_ref()
        .and_then(|i| i.blender_version.as_deref())
        .unwrap_or("?");
    println!("{} (blender {version})", job.path.display());
    for scene in job.info.iter().flat_map(|i| &i.scenes) {
        let layers: Vec<String> = scene
            .view_layers
            .iter()
            .map(|l| if l.enabled { l.name.clone() } else { format!("({})", l.name) })
            .collect();
        println!(
            "  {:<20} {}-{} step {}  {}x{}  {}  {}  [{}]",
            scene.name,
            scene.frame_start,
            scene.frame_end,
            scene.frame_step,
            scene.resolution_x,
            scene.resolution_y,
            scene.render_engine,
            scene.output_format,
            layers.join(", ")
        );
    }
}

fn load_manager(config: &Config) -> Manager {
    Manager::load()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Unable to load blender manager, using defaults");
            Manager::default()
        })
        .with_search_dirs(config.blender_search_dirs.clone())
}

/// Blender picked on the command line, then the environment, then preferences,
/// then the newest installation found.
async fn resolve_blender(
    requested: Option<PathBuf>,
    config: &Config,
    preferences: &Preferences,
) -> Option<Blender> {
    let explicit = requested
        .or_else(|| config.blender_path.clone())
        .or_else(|| preferences.blender_path.clone());
    match explicit {
        Some(path) => match Blender::from_executable(&path).await {
            Ok(blender) => Some(blender),
            Err(BlenderError::NotFound(path)) => {
                tracing::warn!(path = %path.display(), "Blender executable not found");
                None
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unable to use blender");
                None
            }
        },
        None => load_manager(config).default_blender(),
    }
}

/// Files are taken as given, directories are scanned with the default excludes.
fn expand_paths(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(scan(path, &default_excludes())?.into_iter().map(|f| f.path));
        } else {
            files.push(absolute(path));
        }
    }
    Ok(files)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
