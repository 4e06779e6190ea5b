use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerialignError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Grid depth mismatch: expected depth {expected}, got {actual}")]
    GridDepthMismatch { expected: usize, actual: usize },

    #[error("Grid size mismatch: field is {field_h}x{field_w}, grid is {grid_h}x{grid_w}")]
    GridSizeMismatch {
        field_h: usize,
        field_w: usize,
        grid_h: usize,
        grid_w: usize,
    },

    #[error("Deformed template and reference share no valid samples")]
    EmptyOverlap,

    #[error("Empty frame sequence")]
    EmptySequence,

    #[error("Invalid deformation file: {0}")]
    InvalidDeformationFile(String),

    #[error("Invalid raw array file: {0}")]
    InvalidRawFile(String),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, SerialignError>;
