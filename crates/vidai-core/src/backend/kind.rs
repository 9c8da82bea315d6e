use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inference framework family.
///
/// Discriminants are bit flags shared with model descriptors and host
/// applications, so availability sets travel as a plain `u32` mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum BackendKind {
    None = 0x0,
    Dnn = 0x1,
    TensorFlow = 0x2,
    OpenVino = 0x4,
    CoreMl = 0x8,
    Onnx16 = 0x10,
    Onnx = 0x20,
    OpenVino8 = 0x40,
    OpenVino16 = 0x80,
    TensorRt = 0x100,
}

impl BackendKind {
    /// Every real backend kind, lowest bit first.
    pub fn all() -> [BackendKind; 9] {
        [
            BackendKind::Dnn,
            BackendKind::TensorFlow,
            BackendKind::OpenVino,
            BackendKind::CoreMl,
            BackendKind::Onnx16,
            BackendKind::Onnx,
            BackendKind::OpenVino8,
            BackendKind::OpenVino16,
            BackendKind::TensorRt,
        ]
    }

    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Kinds whose bit is set in `mask`.
    pub fn from_mask(mask: u32) -> Vec<BackendKind> {
        Self::all()
            .into_iter()
            .filter(|kind| mask & kind.bits() != 0)
            .collect()
    }

    /// Key used for this kind in model descriptors.
    pub fn key(self) -> &'static str {
        match self {
            BackendKind::None => "none",
            BackendKind::Dnn => "dnn",
            BackendKind::TensorFlow => "tensorflow",
            BackendKind::OpenVino => "openvino",
            BackendKind::CoreMl => "coreml",
            BackendKind::Onnx16 => "onnx16",
            BackendKind::Onnx => "onnx",
            BackendKind::OpenVino8 => "openvino8",
            BackendKind::OpenVino16 => "openvino16",
            BackendKind::TensorRt => "tensorrt",
        }
    }

    /// Human-readable framework name.
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::None => "None",
            BackendKind::Dnn => "OpenCV DNN",
            BackendKind::TensorFlow => "TensorFlow",
            BackendKind::OpenVino => "OpenVINO",
            BackendKind::CoreMl => "CoreML",
            BackendKind::Onnx16 => "ONNX FP16",
            BackendKind::Onnx => "ONNX",
            BackendKind::OpenVino8 => "OpenVINO INT8",
            BackendKind::OpenVino16 => "OpenVINO FP16",
            BackendKind::TensorRt => "TensorRT",
        }
    }

    pub fn from_key(key: &str) -> Option<BackendKind> {
        let key = key.to_ascii_lowercase();
        std::iter::once(BackendKind::None)
            .chain(Self::all())
            .find(|kind| kind.key() == key)
    }

    /// Whether instances of this kind may target accelerators.
    ///
    /// DNN and TensorFlow adapters run on the CPU only.
    pub fn uses_accelerators(self) -> bool {
        !matches!(
            self,
            BackendKind::None | BackendKind::Dnn | BackendKind::TensorFlow
        )
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_key(s).ok_or_else(|| Error::UnsupportedBackend(s.to_string()))
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        kind.key().to_string()
    }
}

impl TryFrom<String> for BackendKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}
