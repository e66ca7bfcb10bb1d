// farm connection and job wire format
pub mod afanasy;

// run a submit script through blender for every file
pub mod batch;

pub mod cli;

// environment and .env, plus the CGRU install's own config
pub mod config;

// read blend files natively, fall back to headless blender
pub mod inspect;

// per-file submission state and afanasy block building
pub mod job;

pub mod output_filter;

// remembered between runs in the user's config directory
pub mod preferences;

// job ids written next to submitted blend files
pub mod records;

pub mod scan;
pub mod submit;

pub use cli::Cli;
pub use config::Config;
