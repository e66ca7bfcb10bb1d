pub mod args;
pub mod blend_info;
pub mod engine;
pub mod format;
pub mod mode;
