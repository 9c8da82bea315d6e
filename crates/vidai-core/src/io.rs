//! Model inputs and outputs.
//!
//! Tensors are flat `f32` data behind an `Arc<[f32]>`, so frames can be
//! handed to several inputs without copying.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Suffix appended to layer names by graph-style frameworks.
const LAYER_SUFFIX: &str = ":0";

/// Named raw model buffers (weights, graph definitions, compiled engines).
pub type NamedBuffers = BTreeMap<String, Vec<u8>>;

/// Dense `f32` tensor with a row-major shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Arc<[f32]>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: impl Into<Arc<[f32]>>) -> Result<Self> {
        let data = data.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::InvalidTensor(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len: usize = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len].into(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A unit of work for one `process` call.
///
/// The backend index is fixed at creation and decides which instance lane a
/// pinned runner serves this input from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelInput {
    backend_index: usize,
    fix_names: bool,
    images: BTreeMap<String, Tensor>,
    params: BTreeMap<String, f32>,
    output_layer_names: Vec<String>,
}

impl ModelInput {
    pub fn new(backend_index: usize) -> Self {
        Self {
            backend_index,
            ..Default::default()
        }
    }

    /// Append `:0` to layer names that lack it.
    pub fn with_fixed_names(mut self, fix_names: bool) -> Self {
        self.fix_names = fix_names;
        self
    }

    /// Same contents, different backend index.
    pub fn with_backend_index(mut self, backend_index: usize) -> Self {
        self.backend_index = backend_index;
        self
    }

    pub fn backend_index(&self) -> usize {
        self.backend_index
    }

    pub fn fix_names(&self) -> bool {
        self.fix_names
    }

    pub fn set_fix_names(&mut self, fix_names: bool) {
        self.fix_names = fix_names;
    }

    fn layer_name(&self, name: &str) -> String {
        if self.fix_names && !name.ends_with(LAYER_SUFFIX) {
            format!("{}{}", name, LAYER_SUFFIX)
        } else {
            name.to_string()
        }
    }

    pub fn set_image(&mut self, name: &str, image: Tensor) {
        let name = self.layer_name(name);
        self.images.insert(name, image);
    }

    pub fn set_parameter(&mut self, name: &str, value: f32) {
        let name = self.layer_name(name);
        self.params.insert(name, value);
    }

    pub fn set_output_layer_names<S: AsRef<str>>(&mut self, names: &[S]) {
        self.output_layer_names = names.iter().map(|n| self.layer_name(n.as_ref())).collect();
    }

    pub fn images(&self) -> &BTreeMap<String, Tensor> {
        &self.images
    }

    pub fn image(&self, name: &str) -> Option<&Tensor> {
        self.images.get(name)
    }

    pub fn params(&self) -> &BTreeMap<String, f32> {
        &self.params
    }

    pub fn output_layer_names(&self) -> &[String] {
        &self.output_layer_names
    }

    /// Drop images, parameters and requested outputs. The backend index stays.
    pub fn clear(&mut self) {
        self.images.clear();
        self.params.clear();
        self.output_layer_names.clear();
    }

    pub fn log(&self) {
        for (name, image) in &self.images {
            tracing::debug!(name = %name, shape = ?image.shape(), "input image");
        }
        for (name, value) in &self.params {
            tracing::debug!(name = %name, value, "input param");
        }
    }
}

/// Result of one `process` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    results: Vec<Tensor>,
    error: Option<String>,
}

impl ModelOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_results(results: Vec<Tensor>) -> Self {
        Self {
            results,
            error: None,
        }
    }

    pub fn push(&mut self, tensor: Tensor) {
        self.results.push(tensor);
    }

    pub fn results(&self) -> &[Tensor] {
        &self.results
    }

    pub fn into_results(self) -> Vec<Tensor> {
        self.results
    }

    pub fn result(&self, index: usize) -> Option<&Tensor> {
        self.results.get(index)
    }

    pub fn has_results(&self) -> bool {
        !self.results.is_empty()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}
