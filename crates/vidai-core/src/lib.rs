//! Core primitives for multi-backend model inference.
//!
//! Framework-agnostic building blocks: the compute device catalog, backend
//! kinds and the [`ModelBackend`] adapter contract, model I/O types, blocking
//! queues, resource pools, the multithreaded sink, and the model buffer cache.
//!
//! This crate contains NO ML framework dependencies. Vendor adapters are
//! registered in a [`BackendRegistry`] at startup.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vidai_core::{BackendKind, BackendRegistry, DeviceCatalog, SystemInfo};
//!
//! let registry = BackendRegistry::new();
//! registry.register(BackendKind::Onnx, || Ok(Box::new(OnnxBackend::new())));
//!
//! let catalog = DeviceCatalog::new(SystemInfo::detect(), enumerate_gpus());
//! let replicas = catalog.compute_device_instances(catalog.preferred_device(), 0, BackendKind::Onnx);
//! ```

mod error;
pub use error::{Error, Result};

mod config;
pub use config::EngineConfig;

pub mod device;
pub use device::{
    DataType, DeviceCatalog, DeviceId, DeviceInfo, OsKind, SystemInfo, DEFAULT_MIN_COREML_MAC_VERSION,
};

pub mod backend;
pub use backend::{read_artifact, BackendConstructor, BackendKind, BackendRegistry, ModelBackend};

pub mod io;
pub use io::{ModelInput, ModelOutput, NamedBuffers, Tensor};

mod model;
pub use model::{BackendInfo, ModelInfo};

pub mod queue;
pub use queue::{BlockingPriorityQueue, BlockingQueue, QueueStore};

mod disk_queue;
pub use disk_queue::{DiskCachable, DiskCachableQueue};

mod pool;
pub use pool::{PoolGuard, ResourcePool};

mod sink;
pub use sink::{MtSink, SinkProcessor};

mod cache;
pub use cache::{CacheStats, ModelCache};
