// Reader for Blender's binary `.blend` format.
// Parsing happens without launching Blender, which makes scanning large folders cheap.
use thiserror::Error;

mod file;
mod header;
mod sdna;
mod view;

#[cfg(any(test, feature = "testing"))]
pub mod fixture;

pub use file::{BlendFile, BlockHeader};
pub use header::{Endian, Header};
pub use sdna::{Field, Sdna, Struct};
pub use view::{ListIter, StructView};

#[derive(Debug, Error)]
pub enum BlendError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not a blend file: {0}")]
    InvalidHeader(String),
    #[error("Unexpected end of data while reading {0}")]
    Truncated(&'static str),
    #[error("Corrupt blend file: {0}")]
    Corrupt(String),
    #[error("Blend file has no DNA1 block")]
    MissingSdna,
}
