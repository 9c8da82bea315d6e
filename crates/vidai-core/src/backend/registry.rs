use super::{BackendKind, ModelBackend};
use crate::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;

/// Constructs a fresh, unloaded adapter.
pub type BackendConstructor = Arc<dyn Fn() -> Result<Box<dyn ModelBackend>> + Send + Sync>;

/// Backend kinds available in this process and how to construct them.
///
/// Vendor integrations register a constructor per kind at startup. The set of
/// registered kinds is the process's availability mask.
#[derive(Default)]
pub struct BackendRegistry {
    constructors: DashMap<BackendKind, BackendConstructor>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any previous one for `kind`.
    ///
    /// # Example
    /// ```ignore
    /// registry.register(BackendKind::Onnx, || Ok(Box::new(OnnxBackend::new())));
    /// ```
    pub fn register<F>(&self, kind: BackendKind, constructor: F)
    where
        F: Fn() -> Result<Box<dyn ModelBackend>> + Send + Sync + 'static,
    {
        tracing::debug!(backend = %kind, "Registered backend");
        self.constructors.insert(kind, Arc::new(constructor));
    }

    pub fn unregister(&self, kind: BackendKind) -> bool {
        self.constructors.remove(&kind).is_some()
    }

    /// Construct a new adapter of `kind`.
    pub fn make(&self, kind: BackendKind) -> Result<Box<dyn ModelBackend>> {
        // Clone out of the map so the shard lock is not held while constructing.
        let constructor = self
            .constructors
            .get(&kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::UnsupportedBackend(kind.name().to_string()))?;
        constructor()
    }

    pub fn is_available(&self, kind: BackendKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Registered kinds, lowest bit first.
    pub fn available_kinds(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<BackendKind> = self.constructors.iter().map(|e| *e.key()).collect();
        kinds.sort();
        kinds
    }

    pub fn available_mask(&self) -> u32 {
        self.constructors
            .iter()
            .fold(0, |mask, entry| mask | entry.key().bits())
    }

    pub fn available_names(&self) -> Vec<&'static str> {
        self.available_kinds().into_iter().map(BackendKind::name).collect()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("available", &self.available_names())
            .finish()
    }
}
