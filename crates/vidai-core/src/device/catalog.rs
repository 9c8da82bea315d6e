//! Device capability catalog and replica heuristics.

use super::info::{DeviceId, DeviceInfo, SystemInfo};
use crate::backend::BackendKind;
use crate::model::ModelInfo;
use crate::Result;
use serde::Serialize;

/// Discrete devices at or below this much VRAM (GB) are never preferred.
const MIN_DISCRETE_VRAM_GB: f32 = 1.5;

/// Oldest macOS release CoreML models are run on, in
/// [`SystemInfo::parse_os_version`] form.
pub const DEFAULT_MIN_COREML_MAC_VERSION: f32 = 10.15;

/// Read-only view of the host's compute devices.
///
/// Built once per process and shared behind an `Arc`. All heuristics resolve
/// meta ids (auto, all devices, out of range) to the preferred device first.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCatalog {
    system: SystemInfo,
    devices: Vec<DeviceInfo>,
    preferred: DeviceId,
}

impl DeviceCatalog {
    pub fn new(system: SystemInfo, devices: Vec<DeviceInfo>) -> Self {
        let preferred = find_preferred_device(&system, &devices);
        Self {
            system,
            devices,
            preferred,
        }
    }

    /// Catalog for a host with no accelerators.
    pub fn cpu_only(system: SystemInfo) -> Self {
        Self::new(system, Vec::new())
    }

    pub fn system(&self) -> &SystemInfo {
        &self.system
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn preferred_device(&self) -> DeviceId {
        self.preferred
    }

    pub fn is_meta(&self, id: DeviceId) -> bool {
        id.0 < -1 || id.0 >= self.device_count() as i32
    }

    /// Map meta ids to the preferred device. Concrete ids pass through.
    pub fn resolve(&self, id: DeviceId) -> DeviceId {
        if self.is_meta(id) {
            self.preferred
        } else {
            id
        }
    }

    fn device(&self, id: DeviceId) -> Option<&DeviceInfo> {
        self.resolve(id)
            .gpu_index()
            .and_then(|index| self.devices.get(index))
    }

    pub fn use_legacy(&self, id: DeviceId) -> bool {
        self.device(id).is_some_and(|dev| dev.legacy)
    }

    /// Number of model replicas a device sustains.
    pub fn threads_for_device(&self, id: DeviceId) -> usize {
        if self.system.threads < 4 {
            return 1;
        }
        let Some(dev) = self.device(id) else {
            if !self.system.avx {
                return 1;
            }
            return self.system.threads / 2;
        };

        let mem = dev.total_memory;
        if dev.is_intel() {
            return 1 + dev.data_type.level() as usize;
        }
        if dev.data_type.supports_fp16() {
            return (mem > 4.0) as usize + (mem > 6.0) as usize + 1;
        }
        (mem > 4.0) as usize + 1
    }

    /// Fractional processing-block budget for a device.
    pub fn blocks_for_device(&self, id: DeviceId) -> f32 {
        let Some(dev) = self.device(id) else {
            if !self.system.avx {
                return 0.1;
            }
            let ram = self.system.ram_total;
            let units = (ram > 8.0) as u32 * 4 + (ram > 16.0) as u32 * 5 + 1;
            return units as f32 / 10.0;
        };

        let m = dev.total_memory;
        let gt = |limit: f32| (m > limit) as u32;
        if dev.is_intel() {
            return (1 + dev.data_type.level()) as f32 / 10.0;
        }
        let units = if dev.data_type.supports_fp16() {
            gt(2.0) + gt(4.0) * 2 + gt(4.0) * 3 + gt(6.0) * 3 + 1
        } else {
            gt(2.0) + gt(4.0) * 2 + gt(6.0) * 3 + gt(8.0) * 3 + 1
        };
        units as f32 / 10.0
    }

    /// Memory in GB; system RAM for the CPU.
    pub fn device_memory(&self, id: DeviceId) -> f64 {
        match self.device(id) {
            Some(dev) => dev.total_memory as f64,
            None => self.system.ram_total,
        }
    }

    /// Compute capability, zeroed for levels whose marketing name does not match.
    pub fn device_capability(&self, id: DeviceId) -> i32 {
        let Some(dev) = self.device(id) else {
            return 0;
        };
        let required = match dev.compute_level {
            601 => Some("GTX 10"),
            705 => Some("RTX 20"),
            806 => Some("RTX 30"),
            809 => Some("RTX 40"),
            _ => None,
        };
        match required {
            Some(family) if !dev.name.contains(family) => 0,
            _ => dev.compute_level,
        }
    }

    /// Smallest VRAM across accelerators, capped at 100 GB.
    pub fn min_vram(&self) -> f32 {
        self.devices
            .iter()
            .map(|dev| dev.total_memory)
            .fold(100.0, f32::min)
    }

    /// Replica allocation `(device, count)` for a runner.
    ///
    /// The "all devices" id expands to every accelerator; other meta ids
    /// resolve to the preferred device. CPU-only backend kinds always run on
    /// the CPU. Every entry gets `threads_for_device + extra_threads` replicas.
    pub fn compute_device_instances(
        &self,
        id: DeviceId,
        extra_threads: usize,
        kind: BackendKind,
    ) -> Vec<(DeviceId, usize)> {
        let count = self.device_count();
        let targets: Vec<DeviceId> = if !kind.uses_accelerators() {
            vec![DeviceId::CPU]
        } else if count > 0 && id == DeviceId::all(count) {
            (0..count).map(DeviceId::gpu).collect()
        } else {
            vec![self.resolve(id)]
        };

        targets
            .into_iter()
            .map(|dev| (dev, self.threads_for_device(dev) + extra_threads))
            .collect()
    }

    /// Pick a backend kind for `id` among the `available` bit mask, with
    /// the default CoreML macOS floor.
    pub fn preferred_backend(&self, id: DeviceId, available: u32) -> Option<BackendKind> {
        self.preferred_backend_with(id, available, DEFAULT_MIN_COREML_MAC_VERSION)
    }

    pub fn preferred_backend_with(
        &self,
        id: DeviceId,
        available: u32,
        min_coreml_mac_version: f32,
    ) -> Option<BackendKind> {
        let has = |kind: BackendKind| available & kind.bits() != 0;
        let dev = self.device(id);
        let fp16 = dev.is_some_and(|dev| dev.data_type.supports_fp16());

        if self.system.is_apple()
            && self.supports_coreml(min_coreml_mac_version)
            && has(BackendKind::CoreMl)
        {
            return Some(BackendKind::CoreMl);
        }
        if dev.is_some_and(DeviceInfo::is_nvidia) && has(BackendKind::TensorRt) {
            return Some(BackendKind::TensorRt);
        }
        if dev.map_or(true, DeviceInfo::is_intel) {
            if fp16 && has(BackendKind::OpenVino16) {
                return Some(BackendKind::OpenVino16);
            }
            if has(BackendKind::OpenVino) {
                return Some(BackendKind::OpenVino);
            }
        }
        if fp16 && has(BackendKind::Onnx16) {
            return Some(BackendKind::Onnx16);
        }
        if has(BackendKind::Onnx) {
            return Some(BackendKind::Onnx);
        }
        BackendKind::all().into_iter().find(|kind| has(*kind))
    }

    /// Host is macOS at `min_mac_version` or newer.
    pub fn supports_coreml(&self, min_mac_version: f32) -> bool {
        self.system.is_mac() && self.system.os_version >= min_mac_version
    }

    /// The kinds in `backends` that can run on `id`.
    ///
    /// CoreML needs a recent enough macOS and TensorRT an NVIDIA device.
    /// OpenVINO runs on the CPU or an Intel device. Half-precision variants
    /// need an fp16 capable accelerator.
    pub fn available_backends(
        &self,
        backends: u32,
        id: DeviceId,
        min_coreml_mac_version: f32,
    ) -> u32 {
        let dev = self.device(id);
        let fp16 = dev.is_some_and(|dev| dev.data_type.supports_fp16());
        let intel_or_cpu = dev.map_or(true, DeviceInfo::is_intel);

        BackendKind::from_mask(backends)
            .into_iter()
            .filter(|&kind| match kind {
                BackendKind::CoreMl => self.supports_coreml(min_coreml_mac_version),
                BackendKind::TensorRt => dev.is_some_and(DeviceInfo::is_nvidia),
                BackendKind::OpenVino | BackendKind::OpenVino8 => intel_or_cpu,
                BackendKind::OpenVino16 => intel_or_cpu && fp16,
                BackendKind::Onnx16 => fp16,
                _ => true,
            })
            .fold(0, |mask, kind| mask | kind.bits())
    }

    /// Artifact files to fetch for `info` on `id`: those listed for the
    /// backend that would be picked among the `registered` kinds.
    pub fn preferred_model_files(
        &self,
        info: &ModelInfo,
        registered: u32,
        id: DeviceId,
    ) -> Vec<String> {
        let usable = self.available_backends(
            info.backend_mask() & registered,
            id,
            DEFAULT_MIN_COREML_MAC_VERSION,
        );
        self.preferred_backend(id, usable)
            .and_then(|kind| info.backend_info(kind))
            .map(|backend| backend.files.clone())
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn log_summary(&self) {
        tracing::info!(
            cpu = %self.system.cpu_name,
            threads = self.system.threads,
            ram_gb = self.system.ram_total,
            devices = self.device_count(),
            preferred = %self.preferred,
            "Device catalog"
        );
        for dev in &self.devices {
            tracing::info!(
                index = dev.index,
                name = %dev.name,
                memory_gb = dev.total_memory,
                compute_level = dev.compute_level,
                "  accelerator"
            );
        }
    }
}

fn find_preferred_device(system: &SystemInfo, devices: &[DeviceInfo]) -> DeviceId {
    if system.is_apple() && !devices.is_empty() {
        return DeviceId::gpu(0);
    }
    let intel_usable = system.is_windows() && system.avx2;

    let mut max_mem = 0.0f32;
    let mut max_fp16 = false;
    let mut preferred: Option<usize> = None;
    for (i, dev) in devices.iter().enumerate() {
        if dev.is_intel() && !intel_usable {
            continue;
        }
        if dev.discrete && dev.total_memory <= MIN_DISCRETE_VRAM_GB {
            continue;
        }
        if dev.total_memory < max_mem {
            continue;
        }
        let fp16 = dev.data_type.supports_fp16();
        if dev.total_memory == max_mem && fp16 <= max_fp16 {
            continue;
        }
        if preferred.is_some_and(|p| devices[p].compute_level > dev.compute_level) {
            continue;
        }
        max_mem = dev.total_memory;
        max_fp16 = fp16;
        preferred = Some(i);
    }
    preferred.map_or(DeviceId::CPU, DeviceId::gpu)
}
