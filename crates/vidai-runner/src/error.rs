//! Error types for the backend runner and artifact resolution.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] vidai_core::Error),

    #[error("Unable to create or load model of type {backend} from path: {file}")]
    ModelLoad { backend: String, file: String },

    #[error("Runner has no backend instances")]
    NoInstances,

    #[error("Runner not initialized")]
    NotInitialized,

    #[error("Runner stopped")]
    Stopped,

    #[error("Backend index {index} out of range ({lanes} lanes)")]
    InvalidBackendIndex { index: usize, lanes: usize },

    #[error("Failed to acquire buffers on {failed} of {total} instances")]
    BufferAcquisition { failed: usize, total: usize },

    #[error("Downloads disabled, cannot fetch model: {0}")]
    DownloadsDisabled(String),

    #[error("No fetcher configured for model: {0}")]
    NoFetcher(String),

    #[error("Failed to download {file} after {attempts} attempts")]
    Download { file: String, attempts: u32 },

    #[error("Invalid path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
