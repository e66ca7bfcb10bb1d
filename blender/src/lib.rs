// binary reader for .blend files
pub mod blend;

// container for blender installation
pub mod blender;

// keep track of blender installations on this machine
pub mod manager;

// data types shared with the application, e.g. command arguments and blend metadata
pub mod models;

// read scene settings out of a blend file without launching blender
pub mod peek;

pub use blend::BlendError;
pub use blender::{Blender, BlenderError, ScriptOutput};
pub use manager::{Manager, ManagerError};
pub use models::{
    args::Args,
    blend_info::{BlendInfo, SceneInfo, ViewLayerInfo},
    engine::Engine,
    format::Format,
    mode::Mode,
};
