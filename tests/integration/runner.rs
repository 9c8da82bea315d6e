//! Backend runner integration tests
//!
//! Concurrent `process` calls against mock instances: exclusivity, pinned
//! routing, error recovery, and destroy/initialize cycles.

use crate::helpers::*;
use std::sync::atomic::Ordering;
use std::time::Duration;
use vidai::prelude::*;
use vidai::runner::Error as RunnerError;

fn loaded(
    fixture: &Fixture,
    stats: &Arc<MockStats>,
    devices: Vec<(DeviceId, usize)>,
    pinned: bool,
) -> BackendRunner {
    let mut runner = fixture.runner(stats, devices, pinned);
    runner.load().unwrap();
    runner.initialize();
    runner
}

/// No instance ever runs two calls at once, and every call completes.
#[test]
fn test_concurrent_calls_never_share_instance() {
    init_tracing();
    let fixture = Fixture::new();
    let stats = MockStats::new();
    stats.set_delay(Duration::from_millis(2));
    let runner = loaded(&fixture, &stats, vec![(DeviceId::CPU, 3)], false);

    std::thread::scope(|s| {
        for t in 0..8 {
            let runner = &runner;
            s.spawn(move || {
                for i in 0..10 {
                    let mut input = runner.create_input().unwrap();
                    input.set_image("image", frame(&[t as f32, i as f32]));
                    let output = runner.process(&input).unwrap();
                    assert_eq!(output.result(0).unwrap().data(), &[2.0 * t as f32, 2.0 * i as f32]);
                }
            });
        }
    });

    assert_eq!(stats.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(stats.processed.load(Ordering::SeqCst), 80);
    assert!(stats.max_active.load(Ordering::SeqCst) <= 3);
    assert_eq!(runner.available(), 3);
}

/// Pinned inputs are handed out round-robin and served by their own instance.
#[test]
fn test_pinned_inputs_served_by_their_instance() {
    let fixture = Fixture::new();
    let stats = MockStats::new();
    let runner = loaded(&fixture, &stats, vec![(DeviceId(0), 2), (DeviceId(1), 1)], true);

    let indices: Vec<usize> = (0..7)
        .map(|_| runner.create_input().unwrap().backend_index())
        .collect();
    assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0]);

    for index in 0..3 {
        let input = ModelInput::new(index);
        let output = runner.process(&input).unwrap();
        assert_eq!(served_by(&output), index);
    }
}

/// Two callers pinned to the same instance run one after the other while
/// the other instance stays free.
#[test]
fn test_pinned_callers_wait_for_their_instance() {
    let fixture = Fixture::new();
    let stats = MockStats::new();
    stats.set_delay(Duration::from_millis(30));
    let runner = loaded(&fixture, &stats, vec![(DeviceId::CPU, 2)], true);
    let (tx, rx) = crossbeam_channel::unbounded();

    std::thread::scope(|s| {
        for _ in 0..2 {
            let runner = &runner;
            let tx = tx.clone();
            s.spawn(move || {
                let output = runner.process(&ModelInput::new(0)).unwrap();
                tx.send(served_by(&output)).unwrap();
            });
        }
    });
    drop(tx);

    let served: Vec<usize> = rx.iter().collect();
    assert_eq!(served, vec![0, 0]);
    assert_eq!(stats.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(stats.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(runner.available(), 2);
}

/// A failing adapter call still returns its instance.
#[test]
fn test_adapter_error_returns_instance() {
    let fixture = Fixture::new();
    let stats = MockStats::new();
    let runner = loaded(&fixture, &stats, vec![(DeviceId::CPU, 2)], false);

    stats.fail_process.store(true, Ordering::SeqCst);
    for _ in 0..4 {
        let result = runner.process(&ModelInput::new(0));
        assert!(matches!(
            result,
            Err(RunnerError::Core(vidai::core::Error::Inference(_)))
        ));
    }
    assert_eq!(runner.available(), 2);

    stats.fail_process.store(false, Ordering::SeqCst);
    assert!(runner.process(&ModelInput::new(0)).is_ok());
}

/// `destroy` wakes a caller blocked on a busy instance; the call already
/// running completes normally.
#[test]
fn test_destroy_wakes_blocked_callers() {
    init_tracing();
    let fixture = Fixture::new();
    let stats = MockStats::new();
    stats.set_delay(Duration::from_millis(200));
    let runner = loaded(&fixture, &stats, vec![(DeviceId::CPU, 1)], true);

    std::thread::scope(|s| {
        let running = s.spawn(|| runner.process(&ModelInput::new(0)));
        std::thread::sleep(Duration::from_millis(40));
        let blocked = s.spawn(|| runner.process(&ModelInput::new(0)));
        std::thread::sleep(Duration::from_millis(40));
        runner.destroy();

        let blocked = blocked.join().unwrap();
        assert!(matches!(
            blocked,
            Err(RunnerError::Stopped) | Err(RunnerError::NotInitialized)
        ));
        assert!(running.join().unwrap().is_ok());
    });

    // The late check-in belongs to the old generation and is dropped.
    assert_eq!(runner.available(), 0);
    runner.initialize();
    assert_eq!(runner.available(), 1);
    stats.set_delay(Duration::ZERO);
    assert!(runner.process(&ModelInput::new(0)).is_ok());
}

#[test]
fn test_load_clones_per_device() {
    let fixture = Fixture::new();
    let stats = MockStats::new();
    let mut runner = fixture.runner(&stats, vec![(DeviceId(0), 3), (DeviceId(1), 2)], true);
    runner.load().unwrap();

    assert_eq!(runner.backend_count(), 5);
    assert_eq!(stats.loads.load(Ordering::SeqCst), 2);
    assert_eq!(stats.clones.load(Ordering::SeqCst), 3);
    assert_eq!(
        runner.describe(),
        vec![
            "mock#0 on device:0",
            "mock#1 on device:0",
            "mock#2 on device:0",
            "mock#3 on device:1",
            "mock#4 on device:1",
        ]
    );
}

#[test]
fn test_acquire_buffers_reports_failures() {
    let fixture = Fixture::new();
    let stats = MockStats::new();
    let runner = loaded(&fixture, &stats, vec![(DeviceId::CPU, 2)], false);
    assert!(runner.acquire_buffers().is_ok());

    stats.fail_buffers.store(true, Ordering::SeqCst);
    assert!(matches!(
        runner.acquire_buffers(),
        Err(RunnerError::BufferAcquisition { failed: 2, total: 2 })
    ));
    runner.release_buffers();
}

/// The context picks TensorRT for an NVIDIA device and sizes replicas from
/// the catalog.
#[test]
fn test_context_auto_runner() {
    let fixture = Fixture::new();
    let stats = MockStats::new();
    let gpu = DeviceInfo::new(0, "NVIDIA GeForce RTX 4080", 16.0)
        .discrete(true)
        .with_data_type(vidai::DataType::Fp16);
    let system = SystemInfo {
        os: vidai::OsKind::Linux,
        threads: 16,
        avx: true,
        avx2: true,
        ram_total: 32.0,
        ram_free: 20.0,
        ..Default::default()
    };
    let ctx = EngineContext::builder()
        .config(EngineConfig {
            model_dir: fixture.models.path().to_path_buf(),
            mirror_dir: Some(fixture.mirror.path().to_path_buf()),
            ..Default::default()
        })
        .system(system)
        .gpus(vec![gpu])
        .registry(mock_registry(&stats))
        .build()
        .unwrap();
    assert_eq!(ctx.devices().preferred_device(), DeviceId(0));

    let mut runner = ctx
        .auto_runner(MODEL_FILE, &model_info(), DeviceId::AUTO, 0, true)
        .unwrap();
    assert_eq!(runner.kind(), BackendKind::TensorRt);
    assert_eq!(runner.device_allocation(), &[(DeviceId(0), 3)]);

    runner.load().unwrap();
    assert!(ctx.cache().contains(MODEL_FILE));
    runner.initialize();
    let mut input = runner.create_input().unwrap();
    input.set_image("image", frame(&[0.5]));
    let output = runner.process(&input).unwrap();
    assert_eq!(output.result(0).unwrap().data(), &[1.0]);
}
