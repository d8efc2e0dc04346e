use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} is not a usable font", path.display())]
    Font { path: PathBuf },

    #[error("failed to decode image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("canvas of {width}x{height} pixels cannot be allocated")]
    Canvas { width: u32, height: u32 },

    #[error("failed to serialize trials: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Stimulus(#[from] peg_core::DirectiveError),
}
