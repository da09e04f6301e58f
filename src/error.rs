use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("{what} dimensions mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("kernel dimensions must be odd, got {width}x{height}")]
    EvenKernel { width: usize, height: usize },

    #[error("image '{}' has {actual} bytes, expected {expected}", path.display())]
    ImageSize {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SimResult<T> = Result<T, SimError>;
