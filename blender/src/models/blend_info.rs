use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::format::Format;

pub const DEFAULT_FRAME_START: i32 = 1;
pub const DEFAULT_FRAME_END: i32 = 250;
pub const DEFAULT_FRAME_STEP: i32 = 1;
pub const DEFAULT_RESOLUTION: (i32, i32) = (1920, 1080);
pub const DEFAULT_ENGINE: &str = "BLENDER_EEVEE";

/// Everything the submitter needs to know about a blend file before building a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendInfo {
    pub file: PathBuf,
    pub job_name: String,
    pub scenes: Vec<SceneInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_scene: Option<String>,
    /// `major.minor` of the Blender release that saved the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blender_version: Option<String>,
}

impl BlendInfo {
    pub fn scene(&self, name: &str) -> Option<&SceneInfo> {
        self.scenes.iter().find(|s| s.name == name)
    }

    /// Active scene if known, otherwise the first one.
    pub fn default_scene(&self) -> Option<&SceneInfo> {
        self.active_scene
            .as_deref()
            .and_then(|name| self.scene(name))
            .or_else(|| self.scenes.first())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneInfo {
    pub name: String,
    pub frame_start: i32,
    pub frame_end: i32,
    pub frame_step: i32,
    pub output_path: String,
    pub view_layers: Vec<ViewLayerInfo>,
    pub render_engine: String,
    pub use_nodes: bool,
    pub resolution_x: i32,
    pub resolution_y: i32,
    pub output_format: Format,
}

impl SceneInfo {
    pub fn enabled_layers(&self) -> impl Iterator<Item = &ViewLayerInfo> {
        self.view_layers.iter().filter(|layer| layer.enabled)
    }
}

impl Default for SceneInfo {
    fn default() -> Self {
        Self {
            name: "Unknown".to_owned(),
            frame_start: DEFAULT_FRAME_START,
            frame_end: DEFAULT_FRAME_END,
            frame_step: DEFAULT_FRAME_STEP,
            output_path: String::new(),
            view_layers: Vec::new(),
            render_engine: DEFAULT_ENGINE.to_owned(),
            use_nodes: false,
            resolution_x: DEFAULT_RESOLUTION.0,
            resolution_y: DEFAULT_RESOLUTION.1,
            output_format: Format::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewLayerInfo {
    pub name: String,
    /// "Use for Rendering" checkbox of the layer.
    #[serde(rename = "use")]
    pub enabled: bool,
}

/// Job name for a blend file: the file name without the `.blend` extension.
pub fn job_name_for(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cut = name.len().saturating_sub(".blend".len());
    match name.get(cut..) {
        Some(ext) if ext.eq_ignore_ascii_case(".blend") => name[..cut].to_owned(),
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_name_strips_extension() {
        assert_eq!(job_name_for(Path::new("/a/b/shot_010.blend")), "shot_010");
        assert_eq!(job_name_for(Path::new("SHOT.BLEND")), "SHOT");
        assert_eq!(job_name_for(Path::new("notes.txt")), "notes.txt");
    }

    #[test]
    fn view_layer_json_uses_use_key() {
        let layer = ViewLayerInfo {
            name: "Fog".to_owned(),
            enabled: false,
        };
        let json = serde_json::to_value(&layer).unwrap();
        assert_eq!(json, serde_json::json!({"name": "Fog", "use": false}));
    }

    #[test]
    fn optional_fields_are_omitted() {
        let info = BlendInfo {
            file: PathBuf::from("/a.blend"),
            job_name: "a".to_owned(),
            scenes: vec![SceneInfo::default()],
            active_scene: None,
            blender_version: None,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("active_scene").is_none());
        assert!(json.get("blender_version").is_none());
        assert_eq!(json["scenes"][0]["output_format"], "PNG");
    }

    #[test]
    fn default_scene_prefers_active() {
        let info = BlendInfo {
            file: PathBuf::from("/a.blend"),
            job_name: "a".to_owned(),
            scenes: vec![
                SceneInfo {
                    name: "First".to_owned(),
                    ..Default::default()
                },
                SceneInfo {
                    name: "Second".to_owned(),
                    ..Default::default()
                },
            ],
            active_scene: Some("Second".to_owned()),
            blender_version: None,
        };
        assert_eq!(info.default_scene().unwrap().name, "Second");
    }

    #[test]
    fn inspector_json_keeps_unlisted_formats() {
        let json = r#"{"file":"/a.blend","job_name":"a","scenes":[{"name":"Scene","frame_start":1,"frame_end":10,"frame_step":1,"output_path":"//out/","view_layers":[],"render_engine":"BLENDER_WORKBENCH","use_nodes":false,"resolution_x":640,"resolution_y":480,"output_format":"AVI_RAW"}],"active_scene":"Scene"}"#;
        let info: BlendInfo = serde_json::from_str(json).unwrap();
        assert_eq!(
            info.scenes[0].output_format,
            Format::Other("AVI_RAW".to_owned())
        );
    }
}
