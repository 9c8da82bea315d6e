//! Backend runner: a pool of per-device model instances behind one
//! synchronous `process` entry point.
//!
//! ## Routing
//!
//! Instances live in an arena and are addressed by index. Free instances
//! wait in lanes:
//!
//! - **pinned** (`switch_inputs = true`): one lane per backend index. An
//!   input tagged with index `i` blocks on lane `i` until that instance is
//!   free. [`BackendRunner::create_input`] hands indices out round-robin.
//! - **shared** (`switch_inputs = false`): a single lane holds every instance
//!   and any free instance serves any input.
//!
//! A checked-out instance always goes back to its lane when the call ends,
//! including on adapter errors and panics. Lane items carry the generation
//! they were issued in, so checkouts that outlive a `destroy` are dropped on
//! return instead of duplicating an instance that `initialize` re-issued.

use crate::artifact::ArtifactResolver;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use vidai_core::{
    BackendInfo, BackendKind, BackendRegistry, BlockingQueue, DeviceId, ModelBackend, ModelInfo,
    ModelInput, ModelOutput,
};

/// One owned model instance.
struct Slot {
    backend: Mutex<Box<dyn ModelBackend>>,
    device: DeviceId,
    backend_index: AtomicUsize,
    /// Blank input from the adapter, cloned by `create_input` so callers never
    /// wait on a busy instance just to build an input.
    template: ModelInput,
}

/// Arena handle plus the generation it was issued in.
type LaneItem = (usize, u64);

pub struct BackendRunner {
    registry: Arc<BackendRegistry>,
    resolver: Arc<dyn ArtifactResolver>,
    model_file: String,
    model_path: PathBuf,
    model_key: String,
    kind: BackendKind,
    devices: Vec<(DeviceId, usize)>,
    backend_info: BackendInfo,
    model_info: ModelInfo,
    switch_inputs: bool,

    slots: Vec<Slot>,
    lanes: Vec<BlockingQueue<LaneItem>>,
    initialized: AtomicBool,
    generation: AtomicU64,
    /// Serializes initialize, destroy and check-in.
    lifecycle: Mutex<()>,
    input_cursor: Mutex<usize>,
}

impl BackendRunner {
    /// Runner for `model_file` with `devices` as `(device, replicas)` pairs.
    ///
    /// Nothing is loaded until [`load`](Self::load).
    pub fn new(
        registry: Arc<BackendRegistry>,
        resolver: Arc<dyn ArtifactResolver>,
        model_file: impl Into<String>,
        kind: BackendKind,
        devices: Vec<(DeviceId, usize)>,
        model_info: &ModelInfo,
        switch_inputs: bool,
    ) -> Self {
        let model_file = model_file.into();
        let model_path = resolver.model_path(&model_file);
        Self {
            registry,
            model_path,
            resolver,
            model_file,
            model_key: model_info.key().to_string(),
            kind,
            devices,
            backend_info: model_info.backend_info(kind).cloned().unwrap_or_default(),
            model_info: model_info.clone(),
            switch_inputs,
            slots: Vec::new(),
            lanes: Vec::new(),
            initialized: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            lifecycle: Mutex::new(()),
            input_cursor: Mutex::new(0),
        }
    }

    /// Construct every instance: one loaded adapter per device, then clones
    /// of it for the remaining replicas.
    ///
    /// All or nothing: on failure the runner holds no instances. Requires
    /// exclusive access, so it can never overlap `process`.
    pub fn load(&mut self) -> Result<()> {
        self.destroy();
        self.slots.clear();
        self.lanes.clear();
        *self.input_cursor.lock() = 0;

        tracing::info!(devices = self.devices.len(), model = %self.model_file, "Loading backend runner");
        let mut slots = Vec::new();
        for &(device, count) in &self.devices {
            tracing::info!(device = %device, instances = count, "Device allocation");
            if count == 0 {
                continue;
            }

            let first = self.make_model_backend(device).map_err(|e| {
                tracing::error!(model = %self.model_file, "Backend runner cannot be initialized");
                e
            })?;
            let mut replicas = Vec::with_capacity(count);
            for _ in 1..count {
                let replica = first.try_clone(device).map_err(|e| {
                    tracing::error!(device = %device, "Failed to clone model instance: {}", e);
                    self.load_error()
                })?;
                replicas.push(replica);
            }

            for backend in std::iter::once(first).chain(replicas) {
                let index = slots.len();
                slots.push(Slot {
                    template: backend.create_input(index),
                    backend: Mutex::new(backend),
                    device,
                    backend_index: AtomicUsize::new(index),
                });
            }
        }

        let lane_count = if self.switch_inputs { slots.len() } else { 1 };
        self.lanes = (0..lane_count).map(|_| BlockingQueue::new()).collect();
        self.slots = slots;
        tracing::info!(instances = self.slots.len(), "Backend runner loaded");
        Ok(())
    }

    fn load_error(&self) -> Error {
        Error::ModelLoad {
            backend: self.kind.name().to_string(),
            file: self.model_file.clone(),
        }
    }

    /// Fresh adapter configured for `device`, not yet loaded.
    fn new_adapter(&self, device: DeviceId) -> Result<Box<dyn ModelBackend>> {
        let mut backend = self.registry.make(self.kind)?;
        if !backend.supports_target(device) {
            return Err(vidai_core::Error::UnsupportedDevice {
                backend: self.kind.name().to_string(),
                device,
            }
            .into());
        }
        backend.set_backend_info(&self.backend_info);
        backend.set_target_device(device);
        Ok(backend)
    }

    /// Create and load one adapter on `device`.
    ///
    /// If the artifact fails to load it is assumed missing or corrupt: the
    /// local copy is removed, fetched again, and loaded once more.
    fn make_model_backend(&self, device: DeviceId) -> Result<Box<dyn ModelBackend>> {
        let mut backend = self.new_adapter(device).map_err(|e| {
            tracing::error!(backend = %self.kind, "Unable to create model backend: {}", e);
            e
        })?;
        match self.load_artifact(backend.as_mut()) {
            Ok(()) => return Ok(backend),
            Err(e) => tracing::warn!(
                file = %self.model_file,
                device = %device,
                "Model load failed, fetching artifact again: {}",
                e
            ),
        }
        drop(backend);

        if let Err(e) = self.resolver.remove_model(&self.model_file) {
            tracing::warn!(file = %self.model_file, "Failed to remove stale model: {}", e);
        }
        let reloaded = self.new_adapter(device).and_then(|mut backend| {
            self.resolver.download_model(&self.model_info, &self.model_file)?;
            self.load_artifact(backend.as_mut())?;
            Ok(backend)
        });
        reloaded.map_err(|e| {
            let err = self.load_error();
            tracing::error!("{}: {}", err, e);
            err
        })
    }

    /// Load the artifact into `backend`. Unencrypted artifacts go through the
    /// resolver so they can be served from its cache; keyed ones are read by
    /// the adapter itself.
    fn load_artifact(&self, backend: &mut dyn ModelBackend) -> Result<()> {
        if self.model_key.is_empty() {
            let buffers = self.resolver.load_buffers(&self.model_file)?;
            backend.load(&buffers)?;
        } else {
            backend.load_from_file(&self.model_path, &self.model_key)?;
        }
        Ok(())
    }

    /// Reserve device buffers on every instance.
    ///
    /// Every instance is attempted even after a failure, and nothing is
    /// rolled back; call [`release_buffers`](Self::release_buffers) afterwards
    /// regardless of the result.
    pub fn acquire_buffers(&self) -> Result<()> {
        let failed = self
            .slots
            .iter()
            .filter(|slot| match slot.backend.lock().acquire_buffers() {
                Ok(()) => false,
                Err(e) => {
                    tracing::warn!(device = %slot.device, "Buffer acquisition failed: {}", e);
                    true
                }
            })
            .count();
        if failed > 0 {
            return Err(Error::BufferAcquisition {
                failed,
                total: self.slots.len(),
            });
        }
        Ok(())
    }

    pub fn release_buffers(&self) {
        for slot in &self.slots {
            slot.backend.lock().release_buffers();
        }
    }

    /// Assign backend indices and make every instance available. Idempotent.
    pub fn initialize(&self) {
        let _lifecycle = self.lifecycle.lock();
        if self.initialized.load(Ordering::Acquire) {
            return;
        }
        tracing::info!(instances = self.slots.len(), pinned = self.switch_inputs, "Initializing backend runner");

        let generation = self.generation.load(Ordering::Acquire);
        for lane in &self.lanes {
            lane.clear();
            lane.initialize();
        }
        for (handle, slot) in self.slots.iter().enumerate() {
            let index = if self.switch_inputs { handle } else { 0 };
            slot.backend_index.store(index, Ordering::Release);
            if let Some(lane) = self.lanes.get(index) {
                lane.push((handle, generation));
            }
        }
        self.initialized.store(true, Ordering::Release);
    }

    /// Withdraw every instance. Blocked `process` calls return
    /// [`Error::Stopped`]; calls in progress finish normally.
    pub fn destroy(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.initialized.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        for lane in &self.lanes {
            lane.destroy();
            lane.clear();
        }
    }

    /// Run `input` on a free instance of its lane, blocking until one is free.
    pub fn process(&self, input: &ModelInput) -> Result<ModelOutput> {
        if self.slots.is_empty() {
            return Err(Error::NoInstances);
        }
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        let lane = if self.switch_inputs {
            input.backend_index()
        } else {
            0
        };
        let queue = self.lanes.get(lane).ok_or(Error::InvalidBackendIndex {
            index: lane,
            lanes: self.lanes.len(),
        })?;

        let (handle, generation) = queue.pop().ok_or(Error::Stopped)?;
        let _checkout = Checkout {
            runner: self,
            lane,
            handle,
            generation,
        };
        if !self.is_initialized() {
            return Err(Error::Stopped);
        }

        let mut backend = self.slots[handle].backend.lock();
        Ok(backend.process(input)?)
    }

    fn check_in(&self, lane: usize, handle: usize, generation: u64) {
        let _lifecycle = self.lifecycle.lock();
        if generation == self.generation.load(Ordering::Acquire) {
            self.lanes[lane].push((handle, generation));
        }
    }

    /// Blank input for the next instance in round-robin order.
    ///
    /// Pinned runners cycle 0, 1, ..., K-1, 0; shared runners always use 0.
    /// `None` when no instances are loaded.
    pub fn create_input(&self) -> Option<ModelInput> {
        let mut cursor = self.input_cursor.lock();
        let count = self.slots.len();
        if count == 0 {
            return None;
        }
        let index = if self.switch_inputs { *cursor % count } else { 0 };
        if self.switch_inputs {
            *cursor = (index + 1) % count;
        }
        Some(self.slots[index].template.clone().with_backend_index(index))
    }

    pub fn backend_count(&self) -> usize {
        self.slots.len()
    }

    /// Instances free right now.
    pub fn available(&self) -> usize {
        self.lanes.iter().map(|lane| lane.len()).sum()
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_pinned(&self) -> bool {
        self.switch_inputs
    }

    pub fn model_file(&self) -> &str {
        &self.model_file
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn device_allocation(&self) -> &[(DeviceId, usize)] {
        &self.devices
    }

    /// `(device, backend index)` of every instance, in arena order.
    pub fn instances(&self) -> Vec<(DeviceId, usize)> {
        self.slots
            .iter()
            .map(|slot| (slot.device, slot.backend_index.load(Ordering::Acquire)))
            .collect()
    }

    pub fn describe(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| slot.backend.lock().describe())
            .collect()
    }
}

impl Drop for BackendRunner {
    fn drop(&mut self) {
        self.destroy();
        tracing::debug!(model = %self.model_file, "Backend runner removed");
    }
}

impl std::fmt::Debug for BackendRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRunner")
            .field("model_file", &self.model_file)
            .field("kind", &self.kind)
            .field("devices", &self.devices)
            .field("instances", &self.slots.len())
            .field("pinned", &self.switch_inputs)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Returns a checked-out instance to its lane on drop.
struct Checkout<'a> {
    runner: &'a BackendRunner,
    lane: usize,
    handle: usize,
    generation: u64,
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        self.runner.check_in(self.lane, self.handle, self.generation);
    }
}
