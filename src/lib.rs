//! # Vidai - Multi-backend Inference for Video
//!
//! Runs neural models on video frames across heterogeneous compute devices.
//!
//! ## Architecture
//!
//! Vidai is an umbrella crate that coordinates:
//! - **vidai-core** - Device catalog, backend kinds and adapter trait, model I/O,
//!   blocking queues, resource pools, worker sinks, model buffer cache
//! - **vidai-runner** - Per-device model replicas, load-balanced `process`,
//!   artifact download and recovery
//!
//! ## Quick Start
//!
//! ```ignore
//! use vidai::prelude::*;
//!
//! let registry = Arc::new(BackendRegistry::new());
//! registry.register(BackendKind::Onnx, || Ok(Box::new(MyOnnxAdapter::default())));
//!
//! let ctx = EngineContext::builder()
//!     .config(EngineConfig::from_file("vidai.toml")?)
//!     .registry(registry)
//!     .build()?;
//!
//! let mut runner = ctx.auto_runner("denoise.onnx", &info, DeviceId::AUTO, 0, true)?;
//! runner.load()?;
//! runner.initialize();
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Core plus runner
//! - `runner` - Runner orchestration

mod error;
pub use error::{Error, Result};

/// Re-export of vidai-core for direct access
pub use vidai_core as core;

// Core types
pub use vidai_core::{
    // Backends
    read_artifact,
    BackendConstructor,
    BackendInfo,
    BackendKind,
    BackendRegistry,
    // Concurrency
    BlockingPriorityQueue,
    BlockingQueue,
    // Cache
    CacheStats,
    // Devices
    DataType,
    DeviceCatalog,
    DeviceId,
    DeviceInfo,
    DiskCachable,
    DiskCachableQueue,
    // Config
    EngineConfig,
    ModelBackend,
    ModelCache,
    ModelInfo,
    // I/O
    ModelInput,
    ModelOutput,
    MtSink,
    NamedBuffers,
    OsKind,
    PoolGuard,
    QueueStore,
    ResourcePool,
    SinkProcessor,
    SystemInfo,
    Tensor,
};

// Runner subsystem
#[cfg(feature = "runner")]
pub use vidai_runner as runner;

#[cfg(feature = "runner")]
pub use vidai_runner::{
    ArtifactResolver, BackendRunner, DirectoryFetcher, EngineContext, EngineContextBuilder,
    ModelFetcher, ModelManager,
};

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{Error, Result};

    pub use crate::{
        BackendKind, BackendRegistry, DeviceCatalog, DeviceId, DeviceInfo, EngineConfig,
        ModelBackend, ModelInfo, ModelInput, ModelOutput, SystemInfo, Tensor,
    };

    #[cfg(feature = "runner")]
    pub use crate::{BackendRunner, EngineContext};

    pub use std::sync::Arc;
}
