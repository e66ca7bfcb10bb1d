// Metadata extraction straight from the blend file.
use crate::blend::{BlendError, BlendFile, StructView};
use crate::models::{
    blend_info::{
        job_name_for, BlendInfo, SceneInfo, ViewLayerInfo, DEFAULT_ENGINE, DEFAULT_FRAME_END,
        DEFAULT_FRAME_START, DEFAULT_FRAME_STEP, DEFAULT_RESOLUTION,
    },
    format::Format,
};
use std::{
    collections::HashSet,
    path::Path,
};

// ViewLayer.flag bit for "Use for Rendering"
const VIEW_LAYER_RENDER: i64 = 1 << 0;
const PNG_IMTYPE: i32 = 14;

impl BlendInfo {
    /// Parse the file on disk. The returned path is absolute.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, BlendError> {
        let path = std::path::absolute(path.as_ref())?;
        let blend = BlendFile::open(&path)?;
        Ok(Self::from_blend(&blend, &path))
    }

    /// Extract metadata from an already loaded file. `path` is used for the job name and to
    /// resolve `//` relative output paths.
    pub fn from_blend(blend: &BlendFile, path: &Path) -> Self {
        let blend_dir = path.parent().unwrap_or_else(|| Path::new(""));
        let scenes = blend
            .blocks_with_code("SC")
            .map(|scene| read_scene(&scene, blend_dir))
            .collect();

        let version = blend.header.blender_version();
        Self {
            file: path.to_path_buf(),
            job_name: job_name_for(path),
            scenes,
            active_scene: active_scene(blend),
            blender_version: Some(format!("{}.{}", version.major, version.minor)),
        }
    }
}

/// Name of an ID block without its two letter type code, `SCScene` -> `Scene`.
fn id_name(view: &StructView) -> Option<String> {
    let raw = view.get_string("id.name")?;
    let name: String = raw.chars().skip(2).collect();
    (!name.is_empty()).then_some(name)
}

/// Scene shown in the first window of the window manager.
fn active_scene(blend: &BlendFile) -> Option<String> {
    let wm = blend.blocks_with_code("WM").next()?;
    let window = wm.list("windows").next()?;
    id_name(&window.deref("scene")?)
}

fn read_scene(scene: &StructView, blend_dir: &Path) -> SceneInfo {
    let engine = scene
        .get_string("r.engine")
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_ENGINE.to_owned());
    let imtype = scene
        .get_i32("r.im_format.imtype")
        .unwrap_or(PNG_IMTYPE);

    SceneInfo {
        name: id_name(scene).unwrap_or_else(|| "Unknown".to_owned()),
        frame_start: scene.get_i32("r.sfra").unwrap_or(DEFAULT_FRAME_START),
        frame_end: scene.get_i32("r.efra").unwrap_or(DEFAULT_FRAME_END),
        frame_step: scene.get_i32("r.frame_step").unwrap_or(DEFAULT_FRAME_STEP),
        output_path: resolve_output_path(
            &scene.get_string("r.pic").unwrap_or_default(),
            blend_dir,
        ),
        view_layers: view_layers(scene),
        render_engine: engine,
        use_nodes: scene.get_int("use_nodes").is_some_and(|v| v != 0),
        resolution_x: scene.get_i32("r.xsch").unwrap_or(DEFAULT_RESOLUTION.0),
        resolution_y: scene.get_i32("r.ysch").unwrap_or(DEFAULT_RESOLUTION.1),
        output_format: Format::from_imtype(imtype),
    }
}

// Files from before 2.80 have no view layers at all and yield an empty list.
fn view_layers(scene: &StructView) -> Vec<ViewLayerInfo> {
    let mut seen = HashSet::new();
    scene
        .list("view_layers")
        .filter_map(|layer| {
            let name = layer.get_string("name").filter(|n| !n.is_empty())?;
            let enabled = layer
                .get_int("flag")
                .is_some_and(|flag| flag & VIEW_LAYER_RENDER != 0);
            Some(ViewLayerInfo { name, enabled })
        })
        .filter(|layer| seen.insert(layer.name.clone()))
        .collect()
}

/// Blender writes paths relative to the blend file with a `//` prefix.
pub fn resolve_output_path(path: &str, blend_dir: &Path) -> String {
    match path.strip_prefix("//") {
        Some(relative) => blend_dir.join(relative).to_string_lossy().into_owned(),
        None => path.to_owned(),
    }
}
