//! Backend kinds, the model backend adapter contract and the registry of
//! available backends.

mod adapter;
mod kind;
mod registry;

pub use adapter::{read_artifact, ModelBackend};
pub use kind::BackendKind;
pub use registry::{BackendConstructor, BackendRegistry};
