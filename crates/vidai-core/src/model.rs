//! Model descriptors.
//!
//! Each model ships a JSON descriptor naming the backends it has artifacts
//! for and, per backend, the layer aliases adapters should use:
//!
//! ```json
//! {
//!   "name": "upscale-v3",
//!   "password": "optional decryption key",
//!   "backends": {
//!     "onnx": { "inputs": { "image": "input_1" }, "files": ["upscale-v3.onnx"] },
//!     "tensorrt": { "inputs": { "image": "input_1" } }
//!   }
//! }
//! ```

use crate::backend::BackendKind;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Per-backend section of a model descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendInfo {
    /// Input alias to framework layer name.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Artifact files this backend loads.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Adapter-specific keys passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BackendInfo {
    pub fn with_input(mut self, alias: impl Into<String>, layer: impl Into<String>) -> Self {
        self.inputs.insert(alias.into(), layer.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.files.push(file.into());
        self
    }

    /// Layer name for an alias, or the alias itself when unmapped.
    pub fn input_name<'a>(&'a self, alias: &'a str) -> &'a str {
        self.inputs.get(alias).map(String::as_str).unwrap_or(alias)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Keyed by [`BackendKind::key`].
    #[serde(default)]
    pub backends: BTreeMap<String, BackendInfo>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, kind: BackendKind, info: BackendInfo) -> Self {
        self.backends.insert(kind.key().to_string(), info);
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decryption key for the model's artifacts; empty when unencrypted.
    pub fn key(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    pub fn backend_info(&self, kind: BackendKind) -> Option<&BackendInfo> {
        self.backends.get(kind.key())
    }

    pub fn supports(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(kind.key())
    }

    /// Bit mask of the backend kinds this descriptor lists.
    pub fn backend_mask(&self) -> u32 {
        self.backends
            .keys()
            .filter_map(|key| BackendKind::from_key(key))
            .fold(0, |mask, kind| mask | kind.bits())
    }
}
