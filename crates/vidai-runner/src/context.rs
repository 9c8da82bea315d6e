//! Engine context: the shared device catalog, backend registry, artifact
//! resolver and model cache, constructed once and passed to every runner.

use crate::artifact::{ArtifactResolver, ModelFetcher, ModelManager};
use crate::error::Result;
use crate::runner::BackendRunner;
use std::sync::Arc;
use vidai_core::{
    BackendKind, BackendRegistry, DeviceCatalog, DeviceId, DeviceInfo, EngineConfig, ModelCache,
    ModelInfo, MtSink, SinkProcessor, SystemInfo, DEFAULT_MIN_COREML_MAC_VERSION,
};

/// Process-wide inference state. Cheap to clone.
#[derive(Clone)]
pub struct EngineContext {
    inner: Arc<EngineContextInner>,
}

struct EngineContextInner {
    config: EngineConfig,
    devices: Arc<DeviceCatalog>,
    registry: Arc<BackendRegistry>,
    resolver: Arc<dyn ArtifactResolver>,
    cache: Arc<ModelCache>,
}

impl EngineContext {
    pub fn builder() -> EngineContextBuilder {
        EngineContextBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn devices(&self) -> &Arc<DeviceCatalog> {
        &self.inner.devices
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.inner.registry
    }

    pub fn resolver(&self) -> &Arc<dyn ArtifactResolver> {
        &self.inner.resolver
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.inner.cache
    }

    /// Runner with an explicit backend kind and device allocation.
    pub fn runner(
        &self,
        model_file: impl Into<String>,
        kind: BackendKind,
        devices: Vec<(DeviceId, usize)>,
        info: &ModelInfo,
        switch_inputs: bool,
    ) -> BackendRunner {
        BackendRunner::new(
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.resolver),
            model_file,
            kind,
            devices,
            info,
            switch_inputs,
        )
    }

    /// Runner on the best available backend for `device`, with replica
    /// counts taken from the device catalog.
    ///
    /// Candidates are the kinds both registered and listed in `info`, minus
    /// those the device cannot run.
    pub fn auto_runner(
        &self,
        model_file: impl Into<String>,
        info: &ModelInfo,
        device: DeviceId,
        extra_threads: usize,
        switch_inputs: bool,
    ) -> Result<BackendRunner> {
        let devices = &self.inner.devices;
        let mask = devices.available_backends(
            self.inner.registry.available_mask() & info.backend_mask(),
            device,
            DEFAULT_MIN_COREML_MAC_VERSION,
        );
        let kind = devices
            .preferred_backend(device, mask)
            .ok_or_else(|| {
                vidai_core::Error::UnsupportedBackend(format!(
                    "no available backend for model {}",
                    info.name
                ))
            })?;
        let allocation = devices.compute_device_instances(device, extra_threads, kind);
        tracing::info!(model = %info.name, backend = %kind, device = %device, "Selected backend");
        Ok(self.runner(model_file, kind, allocation, info, switch_inputs))
    }

    /// Worker sink configured from the engine settings. Not started.
    pub fn sink<T, P>(&self, processor: P, max_queue_len: usize, threads: usize) -> MtSink<T, P>
    where
        T: Send + 'static,
        P: SinkProcessor<T>,
    {
        MtSink::new(processor, max_queue_len, threads).with_config(&self.inner.config)
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.inner.config)
            .field("devices", &self.inner.devices.device_count())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

#[derive(Default)]
pub struct EngineContextBuilder {
    config: EngineConfig,
    system: Option<SystemInfo>,
    gpus: Vec<DeviceInfo>,
    registry: Option<Arc<BackendRegistry>>,
    resolver: Option<Arc<dyn ArtifactResolver>>,
    fetcher: Option<Arc<dyn ModelFetcher>>,
}

impl EngineContextBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Host description. Detected when not set.
    pub fn system(mut self, system: SystemInfo) -> Self {
        self.system = Some(system);
        self
    }

    /// Accelerators in platform enumeration order.
    pub fn gpus(mut self, gpus: Vec<DeviceInfo>) -> Self {
        self.gpus = gpus;
        self
    }

    pub fn registry(mut self, registry: Arc<BackendRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the default [`ModelManager`] resolver.
    pub fn resolver(mut self, resolver: Arc<dyn ArtifactResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Fetcher for the default resolver. Overrides a configured mirror.
    pub fn fetcher(mut self, fetcher: Arc<dyn ModelFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn build(self) -> Result<EngineContext> {
        self.config.validate()?;

        let system = self.system.unwrap_or_else(SystemInfo::detect);
        let devices = Arc::new(DeviceCatalog::new(system, self.gpus));
        devices.log_summary();

        let cache = Arc::new(ModelCache::for_system(
            devices.system(),
            self.config.cache_fraction,
        ));
        let resolver: Arc<dyn ArtifactResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => {
                let mut manager =
                    ModelManager::from_config(&self.config)?.with_cache(Arc::clone(&cache));
                if let Some(fetcher) = self.fetcher {
                    manager = manager.with_fetcher(fetcher);
                }
                Arc::new(manager)
            }
        };

        Ok(EngineContext {
            inner: Arc::new(EngineContextInner {
                config: self.config,
                devices,
                registry: self.registry.unwrap_or_default(),
                resolver,
                cache,
            }),
        })
    }
}
