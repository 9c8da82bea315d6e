use crate::device::DeviceId;
use crate::io::{ModelInput, ModelOutput, NamedBuffers};
use crate::model::BackendInfo;
use crate::{Error, Result};
use std::path::Path;

/// Adapter around one loaded model instance on one device.
///
/// Vendor integrations (ONNX Runtime, OpenVINO, TensorRT, CoreML, ...)
/// implement this trait. No framework types cross the boundary: inputs and
/// outputs are [`ModelInput`]/[`ModelOutput`] and artifacts are raw bytes.
///
/// # Lifecycle
///
/// 1. Create through a [`BackendRegistry`](super::BackendRegistry) factory
/// 2. [`set_backend_info`](Self::set_backend_info) and
///    [`set_target_device`](Self::set_target_device)
/// 3. [`load_from_file`](Self::load_from_file) for the first instance on a
///    device, [`try_clone`](Self::try_clone) for further replicas
/// 4. [`process`](Self::process) repeatedly
///
/// # Thread Safety
///
/// An instance is used by one caller at a time; the runner wraps each one in
/// a mutex and hands it out through its pools. Adapters only need `Send`.
pub trait ModelBackend: Send {
    fn load(&mut self, buffers: &NamedBuffers) -> Result<()>;

    /// Load an artifact from disk.
    ///
    /// The default reads the file into a single named buffer. Adapters whose
    /// artifacts are encrypted use `key` to decrypt before loading.
    fn load_from_file(&mut self, path: &Path, key: &str) -> Result<()> {
        let _ = key;
        let buffers = read_artifact(path)?;
        self.load(&buffers)
    }

    fn is_loaded(&self) -> bool;

    fn supports_target(&self, device: DeviceId) -> bool {
        let _ = device;
        true
    }

    fn set_target_device(&mut self, device: DeviceId);

    fn target_device(&self) -> DeviceId;

    fn set_backend_info(&mut self, info: &BackendInfo) {
        let _ = info;
    }

    fn process(&mut self, input: &ModelInput) -> Result<ModelOutput>;

    /// Blank input bound to `backend_index`.
    fn create_input(&self, backend_index: usize) -> ModelInput {
        ModelInput::new(backend_index)
    }

    /// New loaded instance on `target`, sharing immutable model state.
    fn try_clone(&self, target: DeviceId) -> Result<Box<dyn ModelBackend>>;

    /// Reserve per-instance device buffers ahead of a processing run.
    fn acquire_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn release_buffers(&mut self) {}

    fn describe(&self) -> String;
}

/// Read a model artifact into named buffers keyed by its file name.
pub fn read_artifact(path: &Path) -> Result<NamedBuffers> {
    let bytes = std::fs::read(path)?;
    if bytes.is_empty() {
        return Err(Error::ModelLoad(format!(
            "empty model artifact: {}",
            path.display()
        )));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut buffers = NamedBuffers::new();
    buffers.insert(name, bytes);
    Ok(buffers)
}
