//! Test helpers and fixtures for vidai integration tests
//!
//! Provides a mock model backend that records loads, clones and per-instance
//! concurrency, plus a model directory fixture with a mirror for re-fetching.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use vidai::prelude::*;
use vidai::{BackendInfo, DirectoryFetcher, ModelManager, NamedBuffers};

/// Artifact file used by most tests.
pub const MODEL_FILE: &str = "denoise.onnx";

/// Weights accepted by [`MockBackend`].
pub const GOOD_WEIGHTS: &[u8] = b"mock-weights-v1";

/// Weights that [`MockBackend::load`] rejects.
pub const CORRUPT_WEIGHTS: &[u8] = b"corrupt";

/// Route tracing output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Counters shared by every instance built from one registry.
#[derive(Default)]
pub struct MockStats {
    next_id: AtomicUsize,
    pub loads: AtomicUsize,
    pub clones: AtomicUsize,
    pub processed: AtomicUsize,
    /// Calls that entered an instance already running another call.
    pub overlaps: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub delay_ms: AtomicU64,
    pub fail_process: AtomicBool,
    pub fail_buffers: AtomicBool,
    busy: Mutex<HashSet<usize>>,
}

impl MockStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn enter(&self, id: usize) {
        if !self.busy.lock().insert(id) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
    }

    fn exit(&self, id: usize) {
        self.busy.lock().remove(&id);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Model backend that doubles every input image and reports which instance
/// served the call as a one-element tensor.
pub struct MockBackend {
    id: usize,
    device: DeviceId,
    loaded: bool,
    stats: Arc<MockStats>,
}

impl MockBackend {
    pub fn new(stats: Arc<MockStats>) -> Self {
        Self {
            id: stats.next_id(),
            device: DeviceId::CPU,
            loaded: false,
            stats,
        }
    }
}

struct Busy<'a> {
    stats: &'a MockStats,
    id: usize,
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.stats.exit(self.id);
    }
}

impl ModelBackend for MockBackend {
    fn load(&mut self, buffers: &NamedBuffers) -> vidai::core::Result<()> {
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        if buffers.values().any(|data| data.starts_with(CORRUPT_WEIGHTS)) {
            return Err(vidai::core::Error::ModelLoad("corrupt weights".into()));
        }
        self.loaded = true;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn set_target_device(&mut self, device: DeviceId) {
        self.device = device;
    }

    fn target_device(&self) -> DeviceId {
        self.device
    }

    fn process(&mut self, input: &ModelInput) -> vidai::core::Result<ModelOutput> {
        if !self.loaded {
            return Err(vidai::core::Error::NotLoaded);
        }
        self.stats.enter(self.id);
        let _busy = Busy {
            stats: &self.stats,
            id: self.id,
        };

        let delay = self.stats.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.stats.fail_process.load(Ordering::SeqCst) {
            return Err(vidai::core::Error::Inference("mock failure".into()));
        }

        let mut output = ModelOutput::new();
        for image in input.images().values() {
            let doubled: Vec<f32> = image.data().iter().map(|v| v * 2.0).collect();
            output.push(Tensor::new(image.shape().to_vec(), doubled)?);
        }
        output.push(Tensor::new(vec![1], vec![self.id as f32])?);
        self.stats.processed.fetch_add(1, Ordering::SeqCst);
        Ok(output)
    }

    fn try_clone(&self, target: DeviceId) -> vidai::core::Result<Box<dyn ModelBackend>> {
        self.stats.clones.fetch_add(1, Ordering::SeqCst);
        let mut clone = MockBackend::new(Arc::clone(&self.stats));
        clone.device = target;
        clone.loaded = self.loaded;
        Ok(Box::new(clone))
    }

    fn acquire_buffers(&mut self) -> vidai::core::Result<()> {
        if self.stats.fail_buffers.load(Ordering::SeqCst) {
            return Err(vidai::core::Error::Buffers("out of device memory".into()));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("mock#{} on {}", self.id, self.device)
    }
}

/// Instance id reported by a [`MockBackend`] output.
pub fn served_by(output: &ModelOutput) -> usize {
    let results = output.results();
    results[results.len() - 1].data()[0] as usize
}

/// Registry with ONNX and TensorRT mapped to [`MockBackend`].
pub fn mock_registry(stats: &Arc<MockStats>) -> Arc<BackendRegistry> {
    let registry = Arc::new(BackendRegistry::new());
    for kind in [BackendKind::Onnx, BackendKind::TensorRt] {
        let stats = Arc::clone(stats);
        registry.register(kind, move || {
            let backend: Box<dyn ModelBackend> = Box::new(MockBackend::new(Arc::clone(&stats)));
            Ok(backend)
        });
    }
    registry
}

pub fn model_info() -> ModelInfo {
    ModelInfo::new("denoise")
        .with_backend(BackendKind::Onnx, BackendInfo::default().with_input("image", "input_0"))
        .with_backend(BackendKind::TensorRt, BackendInfo::default())
}

pub fn frame(values: &[f32]) -> Tensor {
    Tensor::new(vec![values.len()], values.to_vec()).expect("valid tensor")
}

/// Local model directory plus a mirror holding good weights.
pub struct Fixture {
    pub models: TempDir,
    pub mirror: TempDir,
    pub manager: Arc<ModelManager>,
}

impl Fixture {
    /// Mirror populated, local directory empty.
    pub fn empty() -> Self {
        let models = tempfile::tempdir().expect("temp model dir");
        let mirror = tempfile::tempdir().expect("temp mirror dir");
        std::fs::write(mirror.path().join(MODEL_FILE), GOOD_WEIGHTS).expect("write mirror");
        let manager = Arc::new(
            ModelManager::new(models.path())
                .with_fetcher(Arc::new(DirectoryFetcher::new(mirror.path()))),
        );
        Self {
            models,
            mirror,
            manager,
        }
    }

    /// Mirror and local directory both populated.
    pub fn new() -> Self {
        let fixture = Self::empty();
        fixture.write_local(GOOD_WEIGHTS);
        fixture
    }

    pub fn write_local(&self, bytes: &[u8]) {
        std::fs::write(self.models.path().join(MODEL_FILE), bytes).expect("write model");
    }

    pub fn read_local(&self) -> Vec<u8> {
        std::fs::read(self.models.path().join(MODEL_FILE)).expect("read model")
    }

    pub fn runner(
        &self,
        stats: &Arc<MockStats>,
        devices: Vec<(DeviceId, usize)>,
        pinned: bool,
    ) -> BackendRunner {
        BackendRunner::new(
            mock_registry(stats),
            self.manager.clone(),
            MODEL_FILE,
            BackendKind::Onnx,
            devices,
            &model_info(),
            pinned,
        )
    }
}
