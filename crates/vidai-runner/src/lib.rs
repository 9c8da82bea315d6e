//! Backend runner orchestration for vidai.
//!
//! A [`BackendRunner`] owns the model instances for one artifact across the
//! requested devices, load-balances `process` calls over them, and recovers
//! from a missing or corrupt artifact by fetching it again through an
//! [`ArtifactResolver`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vidai_runner::{EngineContext, Error};
//! use vidai_core::{BackendKind, DeviceId, EngineConfig};
//!
//! let ctx = EngineContext::builder()
//!     .config(EngineConfig::from_file("vidai.toml")?)
//!     .gpus(enumerate_gpus())
//!     .registry(registry)
//!     .build()?;
//!
//! let mut runner = ctx.auto_runner("upscale.onnx", &info, DeviceId::AUTO, 0, true)?;
//! runner.load()?;
//! runner.initialize();
//!
//! let mut input = runner.create_input().ok_or(Error::NoInstances)?;
//! input.set_image("image", frame);
//! let output = runner.process(&input)?;
//! ```

mod error;
pub use error::{Error, Result};

mod artifact;
pub use artifact::{ArtifactResolver, DirectoryFetcher, ModelFetcher, ModelManager};

mod runner;
pub use runner::BackendRunner;

mod context;
pub use context::{EngineContext, EngineContextBuilder};
