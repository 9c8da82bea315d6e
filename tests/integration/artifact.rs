//! Artifact recovery integration tests
//!
//! A runner whose model file is corrupt or missing removes it, fetches it
//! again from the mirror, and loads it a second time.

use crate::helpers::*;
use std::sync::atomic::Ordering;
use vidai::prelude::*;
use vidai::runner::Error as RunnerError;
use vidai::{ArtifactResolver, DirectoryFetcher, ModelCache, ModelManager};

#[test]
fn test_corrupt_artifact_is_refetched() {
    init_tracing();
    let fixture = Fixture::new();
    fixture.write_local(CORRUPT_WEIGHTS);
    let stats = MockStats::new();

    let mut runner = fixture.runner(&stats, vec![(DeviceId::CPU, 2)], false);
    runner.load().unwrap();

    assert_eq!(runner.backend_count(), 2);
    assert_eq!(fixture.read_local(), GOOD_WEIGHTS);
    // one failed load, one reload, then a clone
    assert_eq!(stats.loads.load(Ordering::SeqCst), 2);
    assert_eq!(stats.clones.load(Ordering::SeqCst), 1);
    assert!(!fixture
        .models
        .path()
        .join(format!("{}.part", MODEL_FILE))
        .exists());
}

#[test]
fn test_missing_artifact_is_restored_from_mirror() {
    let fixture = Fixture::empty();
    let stats = MockStats::new();

    let mut runner = fixture.runner(&stats, vec![(DeviceId(0), 1), (DeviceId(1), 1)], true);
    runner.load().unwrap();
    runner.initialize();

    assert_eq!(fixture.read_local(), GOOD_WEIGHTS);
    assert!(runner.process(&ModelInput::new(1)).is_ok());
}

#[test]
fn test_downloads_disabled_fails_load() {
    let fixture = Fixture::new();
    fixture.write_local(CORRUPT_WEIGHTS);
    fixture.manager.set_allow_downloads(false);
    let stats = MockStats::new();

    let mut runner = fixture.runner(&stats, vec![(DeviceId::CPU, 2)], false);
    let err = runner.load().unwrap_err();
    assert!(matches!(err, RunnerError::ModelLoad { .. }));
    assert_eq!(
        err.to_string(),
        format!("Unable to create or load model of type ONNX from path: {}", MODEL_FILE)
    );
    assert_eq!(runner.backend_count(), 0);
    assert!(runner.create_input().is_none());
    // the stale copy was removed before the refused download
    assert!(!fixture.manager.model_file_exists(MODEL_FILE));
}

#[test]
fn test_mirror_without_artifact_exhausts_attempts() {
    let models = tempfile::tempdir().unwrap();
    let mirror = tempfile::tempdir().unwrap();
    let manager = ModelManager::new(models.path())
        .with_fetcher(Arc::new(DirectoryFetcher::new(mirror.path())))
        .with_download_attempts(2);

    let result = manager.download_model_and_verify(&model_info(), MODEL_FILE);
    assert!(matches!(
        result,
        Err(RunnerError::Download { attempts: 2, .. })
    ));
    assert!(!manager.model_file_exists(MODEL_FILE));
}

#[test]
fn test_empty_mirror_file_fails_verification() {
    let fixture = Fixture::empty();
    std::fs::write(fixture.mirror.path().join(MODEL_FILE), b"").unwrap();

    let result = fixture
        .manager
        .download_model(&model_info(), MODEL_FILE);
    assert!(matches!(result, Err(RunnerError::Download { .. })));
    assert!(!fixture.manager.model_file_exists(MODEL_FILE));
}

#[test]
fn test_manager_from_config_reads_descriptors() {
    let models = tempfile::tempdir().unwrap();
    let descriptors = tempfile::tempdir().unwrap();
    std::fs::write(
        descriptors.path().join("denoise.json"),
        model_info().to_json().unwrap(),
    )
    .unwrap();
    std::fs::write(descriptors.path().join("broken.json"), "{ not json").unwrap();
    std::fs::write(descriptors.path().join("notes.txt"), "ignored").unwrap();

    let config = EngineConfig {
        model_dir: models.path().join("nested"),
        config_dir: Some(descriptors.path().to_path_buf()),
        ..Default::default()
    };
    let manager = ModelManager::from_config(&config).unwrap();

    assert!(models.path().join("nested").is_dir());
    assert_eq!(manager.model_names(), vec!["denoise".to_string()]);
    let info = manager.model_info("denoise").unwrap();
    assert!(info.supports(BackendKind::Onnx));
    assert_eq!(
        info.backend_info(BackendKind::Onnx).unwrap().input_name("image"),
        "input_0"
    );
}

#[test]
fn test_cached_buffers_dropped_on_refetch() {
    let fixture = Fixture::new();
    let cache = Arc::new(ModelCache::with_budget(1_000_000));
    let manager = ModelManager::new(fixture.models.path())
        .with_fetcher(Arc::new(DirectoryFetcher::new(fixture.mirror.path())))
        .with_cache(Arc::clone(&cache));

    let first = manager.load_buffers(MODEL_FILE).unwrap();
    let second = manager.load_buffers(MODEL_FILE).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.stats().entries, 1);

    manager.download_model(&model_info(), MODEL_FILE).unwrap();
    assert!(!cache.contains(MODEL_FILE));

    manager.remove_model(MODEL_FILE).unwrap();
    assert!(manager.load_buffers(MODEL_FILE).is_err());
}

/// Deleting the artifact between loads triggers one fetch on the next load.
#[test]
fn test_artifact_deleted_between_loads() {
    let fixture = Fixture::new();
    let stats = MockStats::new();
    let mut runner = fixture.runner(&stats, vec![(DeviceId::CPU, 2)], false);
    runner.load().unwrap();
    assert_eq!(stats.loads.load(Ordering::SeqCst), 1);

    std::fs::remove_file(fixture.models.path().join(MODEL_FILE)).unwrap();
    runner.load().unwrap();
    runner.initialize();

    assert_eq!(runner.backend_count(), 2);
    assert_eq!(fixture.read_local(), GOOD_WEIGHTS);
    assert_eq!(runner.available(), 2);
}

/// Runner loads go through the manager's cache, so a second load needs
/// neither the local file nor a fetch.
#[test]
fn test_runner_loads_fill_model_cache() {
    let fixture = Fixture::new();
    let cache = Arc::new(ModelCache::with_budget(1_000_000));
    let manager = Arc::new(ModelManager::new(fixture.models.path()).with_cache(Arc::clone(&cache)));
    let stats = MockStats::new();

    let mut runner = BackendRunner::new(
        mock_registry(&stats),
        manager.clone(),
        MODEL_FILE,
        BackendKind::Onnx,
        vec![(DeviceId::CPU, 2)],
        &model_info(),
        false,
    );
    runner.load().unwrap();
    assert!(cache.contains(MODEL_FILE));
    assert_eq!(cache.stats().entries, 1);

    std::fs::remove_file(fixture.models.path().join(MODEL_FILE)).unwrap();
    manager.set_allow_downloads(false);
    runner.load().unwrap();
    runner.initialize();

    assert_eq!(runner.backend_count(), 2);
    assert_eq!(stats.loads.load(Ordering::SeqCst), 2);
    assert!(!manager.model_file_exists(MODEL_FILE));
    assert!(runner.process(&ModelInput::new(0)).is_ok());
}

/// A corrupt cached artifact is evicted along with the local copy, and the
/// refetched weights replace it.
#[test]
fn test_corrupt_cached_artifact_is_replaced() {
    let fixture = Fixture::new();
    fixture.write_local(CORRUPT_WEIGHTS);
    let cache = Arc::new(ModelCache::with_budget(1_000_000));
    let manager = Arc::new(
        ModelManager::new(fixture.models.path())
            .with_fetcher(Arc::new(DirectoryFetcher::new(fixture.mirror.path())))
            .with_cache(Arc::clone(&cache)),
    );
    let stats = MockStats::new();

    let mut runner = BackendRunner::new(
        mock_registry(&stats),
        manager.clone(),
        MODEL_FILE,
        BackendKind::Onnx,
        vec![(DeviceId::CPU, 1)],
        &model_info(),
        false,
    );
    runner.load().unwrap();

    let cached = cache.fetch(MODEL_FILE).unwrap();
    assert!(cached.values().all(|data| data.as_slice() == GOOD_WEIGHTS));
    assert_eq!(fixture.read_local(), GOOD_WEIGHTS);
}
