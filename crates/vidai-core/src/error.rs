//! Error types for vidai-core.

use crate::device::DeviceId;
use thiserror::Error;

/// Error type for vidai-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Backend {backend} does not support device {device}")]
    UnsupportedDevice { backend: String, device: DeviceId },

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Model not loaded")]
    NotLoaded,

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Failed to acquire buffers: {0}")]
    Buffers(String),

    #[error("Invalid tensor: {0}")]
    InvalidTensor(String),

    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
