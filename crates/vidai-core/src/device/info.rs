//! Device and host descriptions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compute device identifier.
///
/// The numeric convention is shared with host applications and must not change:
/// `0..n` are accelerators in platform enumeration order, `-1` is the CPU,
/// `-2` asks for the preferred device and `n` (the device count) means
/// "all accelerators". Anything below `-1` or at/above `n` is a meta id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub i32);

impl DeviceId {
    pub const CPU: Self = Self(-1);
    pub const AUTO: Self = Self(-2);

    pub fn gpu(index: usize) -> Self {
        Self(index as i32)
    }

    /// The "all accelerators" meta id for a host with `device_count` devices.
    pub fn all(device_count: usize) -> Self {
        Self(device_count as i32)
    }

    pub fn as_i32(self) -> i32 {
        self.0
    }

    pub fn is_cpu(self) -> bool {
        self == Self::CPU
    }

    /// Accelerator index, if this id addresses one.
    pub fn gpu_index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl From<i32> for DeviceId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            -1 => write!(f, "cpu"),
            -2 => write!(f, "auto"),
            id => write!(f, "device:{}", id),
        }
    }
}

/// Best numeric precision a device runs natively.
///
/// Levels are ordered and compared bitwise: `Int8` carries the FP16 bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    None = 0,
    Fp32 = 1,
    Fp16 = 2,
    Int8 = 3,
}

impl DataType {
    pub fn level(self) -> u32 {
        self as u32
    }

    pub fn supports_fp16(self) -> bool {
        self.level() & DataType::Fp16.level() != 0
    }
}

/// Accelerator description as reported by platform enumeration.
///
/// Memory figures are in GB.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub total_memory: f32,
    pub optimal_memory: f32,
    pub free_memory: f32,
    pub used_memory: f32,
    pub temperature: f32,
    pub index: u32,
    pub cores: u32,
    pub legacy: bool,
    pub discrete: bool,
    pub visible: bool,
    pub cuda_id: i32,
    pub compute_level: i32,
    pub data_type: DataType,
}

impl DeviceInfo {
    pub fn new(index: u32, name: impl Into<String>, total_memory: f32) -> Self {
        Self {
            name: name.into(),
            index,
            total_memory,
            visible: true,
            cuda_id: -1,
            ..Default::default()
        }
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_compute_level(mut self, level: i32) -> Self {
        self.compute_level = level;
        self
    }

    pub fn discrete(mut self, discrete: bool) -> Self {
        self.discrete = discrete;
        self
    }

    pub fn legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }

    pub fn is_intel(&self) -> bool {
        self.name.to_uppercase().contains("INTEL")
    }

    pub fn is_nvidia(&self) -> bool {
        let name = self.name.to_uppercase();
        name.contains("NVIDIA") || name.contains("QUADRO")
    }

    pub fn is_llvmpipe(&self) -> bool {
        self.name.to_uppercase().contains("LLVMPIPE")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsKind {
    Windows,
    Mac,
    Linux,
}

impl OsKind {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            OsKind::Windows
        } else if cfg!(target_os = "macos") {
            OsKind::Mac
        } else {
            OsKind::Linux
        }
    }
}

/// RAM assumed when the host does not report it.
const FALLBACK_RAM_GB: f64 = 8.0;

/// Host CPU and memory description. RAM figures are in GB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: OsKind,
    pub os_version: f32,
    pub cpu_name: String,
    pub threads: usize,
    pub avx: bool,
    pub avx2: bool,
    pub vnni: bool,
    pub ram_total: f64,
    pub ram_free: f64,
    pub machine_id: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: OsKind::current(),
            os_version: 0.0,
            cpu_name: String::new(),
            threads: 1,
            avx: false,
            avx2: false,
            vnni: false,
            ram_total: FALLBACK_RAM_GB,
            ram_free: FALLBACK_RAM_GB,
            machine_id: String::new(),
        }
    }
}

impl SystemInfo {
    /// Detect what the standard library and OS files reveal about the host.
    ///
    /// GPU enumeration is platform specific and supplied separately.
    pub fn detect() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let (avx, avx2, vnni) = cpu_features();
        let (ram_total, ram_free) = read_meminfo().unwrap_or((FALLBACK_RAM_GB, FALLBACK_RAM_GB));

        let info = Self {
            os: OsKind::current(),
            os_version: read_os_version(),
            cpu_name: read_cpu_name(),
            threads,
            avx,
            avx2,
            vnni,
            ram_total,
            ram_free,
            ..Default::default()
        };
        tracing::debug!(
            cpu = %info.cpu_name,
            os_version = info.os_version,
            threads = info.threads,
            avx = info.avx,
            avx2 = info.avx2,
            ram_gb = info.ram_total,
            "Detected host"
        );
        info
    }

    pub fn is_windows(&self) -> bool {
        self.os == OsKind::Windows
    }

    pub fn is_mac(&self) -> bool {
        self.os == OsKind::Mac
    }

    pub fn is_apple(&self) -> bool {
        self.cpu_name.to_lowercase().contains("apple")
    }

    /// `major.minor[.patch]` as a number comparable with release thresholds.
    ///
    /// The minor part fills two decimal places, so 10.9 orders below 10.15.
    pub fn parse_os_version(text: &str) -> Option<f32> {
        let mut parts = text.trim().split('.');
        let major: u32 = parts.next()?.parse().ok()?;
        let minor: u32 = match parts.next() {
            Some(minor) => minor.parse().ok()?,
            None => 0,
        };
        format!("{}.{:02}", major, minor.min(99)).parse().ok()
    }
}

#[cfg(target_arch = "x86_64")]
fn cpu_features() -> (bool, bool, bool) {
    (
        std::arch::is_x86_feature_detected!("avx"),
        std::arch::is_x86_feature_detected!("avx2"),
        std::arch::is_x86_feature_detected!("avx512vnni"),
    )
}

#[cfg(not(target_arch = "x86_64"))]
fn cpu_features() -> (bool, bool, bool) {
    (false, false, false)
}

fn read_cpu_name() -> String {
    if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        return "Apple Silicon".to_string();
    }
    std::fs::read_to_string("/proc/cpuinfo")
        .ok()
        .and_then(|text| {
            text.lines()
                .find(|line| line.starts_with("model name"))
                .and_then(|line| line.split(':').nth(1))
                .map(|name| name.trim().to_string())
        })
        .unwrap_or_default()
}

/// macOS product version, 0.0 elsewhere or when unreadable.
fn read_os_version() -> f32 {
    if !cfg!(target_os = "macos") {
        return 0.0;
    }
    std::fs::read_to_string("/System/Library/CoreServices/SystemVersion.plist")
        .ok()
        .and_then(|text| {
            let rest = text.split("<key>ProductVersion</key>").nth(1)?;
            let start = rest.find("<string>")? + "<string>".len();
            let len = rest[start..].find("</string>")?;
            SystemInfo::parse_os_version(&rest[start..start + len])
        })
        .unwrap_or(0.0)
}

/// (total, available) RAM in GB from `/proc/meminfo`.
fn read_meminfo() -> Option<(f64, f64)> {
    let text = std::fs::read_to_string("/proc/meminfo").ok()?;
    let field = |key: &str| -> Option<f64> {
        text.lines()
            .find(|line| line.starts_with(key))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<f64>().ok())
            .map(|kb| kb / (1024.0 * 1024.0))
    };
    Some((field("MemTotal:")?, field("MemAvailable:")?))
}
