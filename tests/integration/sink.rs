//! Multithreaded sink integration tests
//!
//! Sink workers drive a backend runner the way a frame pipeline does, and
//! stop cleanly when the processor asks them to.

use crate::helpers::*;
use std::sync::atomic::Ordering;
use std::time::Duration;
use vidai::prelude::*;
use vidai::MtSink;

/// Frames queued on a sink are each processed once across shared instances.
#[test]
fn test_sink_drives_runner() {
    init_tracing();
    let fixture = Fixture::new();
    let stats = MockStats::new();
    stats.set_delay(Duration::from_millis(1));
    let mut runner = fixture.runner(&stats, vec![(DeviceId::CPU, 2)], false);
    runner.load().unwrap();
    runner.initialize();
    let runner = Arc::new(runner);

    let (tx, rx) = crossbeam_channel::unbounded();
    let worker_runner = Arc::clone(&runner);
    let mut sink = MtSink::new(
        move |index: u32| {
            let Some(mut input) = worker_runner.create_input() else {
                return false;
            };
            input.set_image("image", frame(&[index as f32]));
            match worker_runner.process(&input) {
                Ok(output) => tx.send(output.result(0).unwrap().data()[0]).is_ok(),
                Err(_) => false,
            }
        },
        8,
        4,
    )
    .with_name("frame-sink")
    .with_poll_interval(Duration::from_millis(2));
    sink.initialize().unwrap();

    for index in 0..40 {
        assert!(sink.process_async(index));
    }
    sink.wait_and_destroy();
    drop(sink);

    let mut doubled: Vec<u32> = rx.iter().map(|v| v as u32).collect();
    doubled.sort_unstable();
    assert_eq!(doubled, (0..40).map(|i| i * 2).collect::<Vec<_>>());
    assert_eq!(stats.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(runner.available(), 2);
}

/// A processor returning `false` stops every worker; later items are refused.
#[test]
fn test_processor_stop_refuses_new_items() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut sink = MtSink::new(
        move |item: u32| {
            tx.send(item).unwrap();
            item != 3
        },
        2,
        2,
    );
    sink.initialize().unwrap();

    for item in 0..4 {
        sink.process_async(item);
    }
    while sink.keep_processing() {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(!sink.process_async(99));
    sink.wait_and_destroy();

    let seen: Vec<u32> = rx.try_iter().collect();
    assert!(seen.contains(&3));
    assert!(!seen.contains(&99));
}
