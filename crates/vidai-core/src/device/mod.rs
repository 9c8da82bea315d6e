//! Compute device descriptions and the capability catalog.

mod catalog;
mod info;

pub use catalog::{DeviceCatalog, DEFAULT_MIN_COREML_MAC_VERSION};
pub use info::{DataType, DeviceId, DeviceInfo, OsKind, SystemInfo};
