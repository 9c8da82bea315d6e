//! Centralized error type for the vidai umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] vidai_core::Error),

    #[cfg(feature = "runner")]
    #[error("Runner: {0}")]
    Runner(#[from] vidai_runner::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
