//! Model artifact resolution: local paths, descriptors, and re-fetching.
//!
//! The runner only needs [`ArtifactResolver`]. [`ModelManager`] is the
//! standard implementation: it owns the local model directory, the parsed
//! `*.json` descriptors, and an optional [`ModelFetcher`] used to restore
//! missing or corrupt artifacts.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vidai_core::{read_artifact, EngineConfig, ModelCache, ModelInfo, NamedBuffers};

/// Where model artifacts live and how to restore them.
pub trait ArtifactResolver: Send + Sync {
    /// Local path for an artifact file name.
    fn model_path(&self, file: &str) -> PathBuf;

    /// Fetch `file` again and verify it.
    fn download_model(&self, info: &ModelInfo, file: &str) -> Result<()>;

    /// Delete the local copy of `file`. A missing file is not an error.
    fn remove_model(&self, file: &str) -> Result<()> {
        remove_if_exists(&self.model_path(file))
    }

    /// Buffers for an unencrypted artifact. The default reads the local file.
    fn load_buffers(&self, file: &str) -> Result<Arc<NamedBuffers>> {
        Ok(Arc::new(read_artifact(&self.model_path(file))?))
    }
}

/// Transport that copies a remote artifact to a local destination.
pub trait ModelFetcher: Send + Sync {
    fn fetch(&self, file: &str, dest: &Path) -> Result<()>;
}

/// Fetches artifacts from a mirror directory (offline deployments, shared
/// network mounts).
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ModelFetcher for DirectoryFetcher {
    fn fetch(&self, file: &str, dest: &Path) -> Result<()> {
        let source = self.root.join(file);
        std::fs::copy(&source, dest)?;
        Ok(())
    }
}

pub struct ModelManager {
    local_dir: PathBuf,
    config_dir: PathBuf,
    models: RwLock<BTreeMap<String, ModelInfo>>,
    allow_downloads: AtomicBool,
    download_attempts: u32,
    fetcher: Option<Arc<dyn ModelFetcher>>,
    cache: Option<Arc<ModelCache>>,
}

impl ModelManager {
    /// Manager over `local_dir`, reading descriptors from the same directory.
    pub fn new(local_dir: impl Into<PathBuf>) -> Self {
        let local_dir = local_dir.into();
        Self {
            config_dir: local_dir.clone(),
            local_dir,
            models: RwLock::new(BTreeMap::new()),
            allow_downloads: AtomicBool::new(true),
            download_attempts: 3,
            fetcher: None,
            cache: None,
        }
    }

    /// Build a manager from engine configuration and load its descriptors.
    ///
    /// Creates the model directory if needed. A configured mirror directory
    /// becomes the fetcher.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.model_dir).map_err(|e| {
            tracing::error!(
                path = %config.model_dir.display(),
                "Model directory not writable: {}",
                e
            );
            Error::InvalidPath(config.model_dir.clone())
        })?;

        let mut manager = Self::new(&config.model_dir)
            .with_config_dir(config.config_dir())
            .with_download_attempts(config.download_attempts);
        if let Some(mirror) = &config.mirror_dir {
            manager = manager.with_fetcher(Arc::new(DirectoryFetcher::new(mirror)));
        }
        manager.set_allow_downloads(config.allow_downloads);

        let count = manager.load_model_infos()?;
        if count == 0 {
            tracing::warn!(
                path = %manager.config_dir.display(),
                "No model descriptors found"
            );
        }
        Ok(manager)
    }

    pub fn with_config_dir(mut self, config_dir: impl Into<PathBuf>) -> Self {
        self.config_dir = config_dir.into();
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ModelFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_cache(mut self, cache: Arc<ModelCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_download_attempts(mut self, attempts: u32) -> Self {
        self.download_attempts = attempts.max(1);
        self
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Parse every `*.json` descriptor in the config directory.
    ///
    /// Unreadable or invalid descriptors are skipped with a warning. Returns
    /// the number of descriptors loaded.
    pub fn load_model_infos(&self) -> Result<usize> {
        if !self.config_dir.is_dir() {
            return Ok(0);
        }
        let mut loaded = BTreeMap::new();
        for entry in std::fs::read_dir(&self.config_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match ModelInfo::from_file(&path) {
                Ok(info) => {
                    tracing::debug!(model = %info.name, "Loaded model descriptor");
                    loaded.insert(info.name.clone(), info);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Skipping model descriptor: {}", e);
                }
            }
        }
        let count = loaded.len();
        self.models.write().extend(loaded);
        Ok(count)
    }

    pub fn model_info(&self, name: &str) -> Option<ModelInfo> {
        self.models.read().get(name).cloned()
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.read().keys().cloned().collect()
    }

    pub fn insert_model_info(&self, info: ModelInfo) {
        self.models.write().insert(info.name.clone(), info);
    }

    /// The local artifact exists and is non-empty.
    pub fn model_file_exists(&self, file: &str) -> bool {
        verify_file(&self.model_path(file))
    }

    pub fn set_allow_downloads(&self, allow: bool) {
        tracing::info!(allow, "Model downloads");
        self.allow_downloads.store(allow, Ordering::Release);
    }

    pub fn allow_downloads(&self) -> bool {
        self.allow_downloads.load(Ordering::Acquire)
    }

    /// Fetch `file` through the configured fetcher and verify it.
    ///
    /// Each attempt downloads into a `.part` file that replaces the artifact
    /// only once verified. Any cached buffers for `file` are dropped.
    pub fn download_model_and_verify(&self, info: &ModelInfo, file: &str) -> Result<()> {
        if !self.allow_downloads() {
            return Err(Error::DownloadsDisabled(file.to_string()));
        }
        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or_else(|| Error::NoFetcher(file.to_string()))?;

        let dest = self.model_path(file);
        let partial = self.model_path(&format!("{}.part", file));
        for attempt in 1..=self.download_attempts {
            tracing::info!(model = %info.name, file, attempt, "Downloading model");
            match fetcher.fetch(file, &partial) {
                Ok(()) if verify_file(&partial) => {
                    std::fs::rename(&partial, &dest)?;
                    if let Some(cache) = &self.cache {
                        cache.remove(file);
                    }
                    return Ok(());
                }
                Ok(()) => tracing::warn!(file, attempt, "Downloaded model failed verification"),
                Err(e) => tracing::warn!(file, attempt, "Model download failed: {}", e),
            }
            let _ = std::fs::remove_file(&partial);
        }
        Err(Error::Download {
            file: file.to_string(),
            attempts: self.download_attempts,
        })
    }

    /// Per-model scratch directory under the local model directory.
    pub fn cache_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.local_dir.join("cache").join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl ArtifactResolver for ModelManager {
    fn model_path(&self, file: &str) -> PathBuf {
        self.local_dir.join(file)
    }

    fn download_model(&self, info: &ModelInfo, file: &str) -> Result<()> {
        self.download_model_and_verify(info, file)
    }

    fn remove_model(&self, file: &str) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.remove(file);
        }
        remove_if_exists(&self.model_path(file))
    }

    /// Served from the cache when present; a fresh read is cached if it fits.
    fn load_buffers(&self, file: &str) -> Result<Arc<NamedBuffers>> {
        if let Some(buffers) = self.cache.as_ref().and_then(|c| c.fetch(file)) {
            tracing::debug!(file, "Model buffers served from cache");
            return Ok(buffers);
        }
        let buffers = Arc::new(read_artifact(&self.model_path(file))?);
        if let Some(cache) = &self.cache {
            if !cache.add(file, Arc::clone(&buffers)) {
                tracing::debug!(file, "Model not cached");
            }
        }
        Ok(buffers)
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("local_dir", &self.local_dir)
            .field("config_dir", &self.config_dir)
            .field("models", &self.models.read().len())
            .field("allow_downloads", &self.allow_downloads())
            .finish()
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn verify_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}
