use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Binary deserialization error: {0}")]
    Deserialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Failed to load resource {path:?}: {reason}")]
    ResourceLoad { path: PathBuf, reason: String },

    #[error("Degenerate projective mapping of point ({x}, {y}): homogeneous coordinate is zero")]
    DomainTransform { x: f32, y: f32 },

    #[error("Transform is not invertible")]
    SingularTransform,

    #[error("Unsupported record version {found} (supported: {supported:?})")]
    Version { found: u32, supported: Vec<u32> },
}

impl Error {
    pub(crate) fn resource(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::ResourceLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
