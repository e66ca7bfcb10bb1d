use serde::{Deserialize, Serialize};

// context for serde: https://serde.rs/enum-representations.html
#[derive(Debug, Clone, Default, PartialEq, Hash, Serialize, Deserialize)]
pub enum Mode {
    // JSON: "Frame": "i32",
    Frame(i32),

    // JSON: "Animation": {"start":"i32", "end":"i32"}
    Animation { start: i32, end: i32 },

    // Frame range is filled in per task by the farm through the @#@ placeholder.
    // JSON: "Numeric": {"step":"i32"}
    Numeric { step: i32 },

    // Leave frame selection to whatever runs after the file is loaded, e.g. a python script.
    #[default]
    None,
}

/// Afanasy replaces this token with the first/last frame of each task.
pub const FRAME_PLACEHOLDER: &str = "@#@";
