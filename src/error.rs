// THEORY:
// The `error` module holds the single error taxonomy of the engine. Most of what can
// go wrong while analyzing a shot is NOT an error: a frame with no visible stream is an
// ordinary "not found" result, and a temporal statistic without enough samples is simply
// undefined. Only conditions that stop a feature vector from being produced at all, or
// that come from the outside world (files, images, config, model artifacts), live here.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for every fallible engine operation.
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors that can occur while supplying, analyzing or storing espresso shots.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Not a single frame (or fewer than the configured minimum) could be processed.
    #[error("no usable frames: {decoded} decoded, at least {required} required")]
    NoUsableFrames { decoded: usize, required: usize },

    /// One frame failed to materialize. The accumulator skips these.
    #[error("failed to decode frame {path}: {source}")]
    FrameDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("trained model failed: {message}")]
    Model { message: String },

    #[error("shot {0} not found")]
    ShotNotFound(u64),

    #[error("a shot named {0} is already stored")]
    DuplicateShot(String),

    #[error("analysis task failed: {0}")]
    Join(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
