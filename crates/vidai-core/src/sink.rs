//! Multithreaded sink: a background worker pool draining a queue.
//!
//! Producers call [`MtSink::process_async`]; worker threads pop items and
//! hand them to a [`SinkProcessor`]. When the processor returns `false`,
//! every worker stops.

use crate::queue::BlockingQueue;
use crate::{EngineConfig, Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-item work for an [`MtSink`].
pub trait SinkProcessor<T>: Send + Sync + 'static {
    /// Handle one item. Returning `false` stops the sink.
    fn process(&self, item: T) -> bool;
}

impl<T, F> SinkProcessor<T> for F
where
    F: Fn(T) -> bool + Send + Sync + 'static,
{
    fn process(&self, item: T) -> bool {
        self(item)
    }
}

struct Shared<T, P> {
    queue: BlockingQueue<T>,
    processor: P,
    keep_processing: AtomicBool,
    /// Items currently inside `processor.process`.
    active: AtomicUsize,
    /// Items accepted by `process_async` and not yet fully processed.
    in_flight: AtomicUsize,
}

pub struct MtSink<T, P> {
    shared: Arc<Shared<T, P>>,
    threads: Vec<JoinHandle<()>>,
    thread_count: usize,
    poll_interval: Duration,
    name: String,
}

impl<T, P> MtSink<T, P>
where
    T: Send + 'static,
    P: SinkProcessor<T>,
{
    /// `max_queue_len == 0` means an unbounded queue.
    pub fn new(processor: P, max_queue_len: usize, threads: usize) -> Self {
        let queue = if max_queue_len == 0 {
            BlockingQueue::new()
        } else {
            BlockingQueue::clamped(max_queue_len)
        };
        Self {
            shared: Arc::new(Shared {
                queue,
                processor,
                keep_processing: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
            }),
            threads: Vec::new(),
            thread_count: threads.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
            name: "vidai-sink".to_string(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Apply engine settings: the drain poll interval.
    pub fn with_config(self, config: &EngineConfig) -> Self {
        self.with_poll_interval(config.sink_poll_interval())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Prefix for worker thread names.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Start the worker threads.
    pub fn initialize(&mut self) -> Result<()> {
        if !self.threads.is_empty() {
            return Ok(());
        }
        self.shared.keep_processing.store(true, Ordering::Release);
        self.shared.queue.initialize();

        for i in 0..self.thread_count {
            let shared = Arc::clone(&self.shared);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", self.name, i))
                .spawn(move || run_worker(&shared))
                .map_err(|e| {
                    Error::ThreadSpawn(format!("{} worker {}: {}", self.name, i, e))
                });
            match handle {
                Ok(handle) => self.threads.push(handle),
                Err(e) => {
                    self.destroy();
                    return Err(e);
                }
            }
        }
        tracing::debug!(sink = %self.name, threads = self.thread_count, "Sink started");
        Ok(())
    }

    /// Queue an item for a worker.
    ///
    /// Blocks while a bounded queue is full. Returns `false` if the sink has
    /// been destroyed or stopped by its processor and the item was dropped.
    pub fn process_async(&self, item: T) -> bool {
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        let accepted = !self.shared.queue.is_terminated() && self.shared.queue.push(item);
        if !accepted {
            self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
        accepted
    }

    /// Wait for every queued item to finish processing, then destroy.
    ///
    /// Returns early if processing was stopped by the processor.
    pub fn wait_and_destroy(&mut self) {
        tracing::debug!(sink = %self.name, queued = self.queued(), "Draining sink");
        while self.keep_processing() && self.shared.in_flight.load(Ordering::Acquire) > 0 {
            std::thread::sleep(self.poll_interval);
        }
        tracing::debug!(sink = %self.name, queued = self.queued(), "Sink drained");
        self.destroy();
    }

    /// Stop the workers, drop pending items and join the threads.
    pub fn destroy(&mut self) {
        self.shared.keep_processing.store(false, Ordering::Release);
        self.shared.queue.destroy();
        self.shared.queue.clear();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!(sink = %self.name, "Sink worker panicked");
            }
        }
        self.shared.in_flight.store(0, Ordering::Release);
    }

    pub fn keep_processing(&self) -> bool {
        self.shared.keep_processing.load(Ordering::Acquire)
    }

    /// Number of items being processed right now.
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn processor(&self) -> &P {
        &self.shared.processor
    }
}

impl<T, P> Drop for MtSink<T, P> {
    fn drop(&mut self) {
        self.shared.keep_processing.store(false, Ordering::Release);
        self.shared.queue.destroy();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Decrements a counter when dropped.
struct CountGuard<'a>(&'a AtomicUsize);

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Terminates the queue, then clears `keep_processing`, when a worker exits
/// (including by panic). Once `keep_processing` reads false, pushes are
/// already rejected.
struct StopOnExit<'a, T, P>(&'a Shared<T, P>);

impl<T, P> Drop for StopOnExit<'_, T, P> {
    fn drop(&mut self) {
        self.0.queue.destroy();
        self.0.keep_processing.store(false, Ordering::Release);
    }
}

fn run_worker<T, P: SinkProcessor<T>>(shared: &Shared<T, P>) {
    let _stop = StopOnExit(shared);
    while shared.keep_processing.load(Ordering::Acquire) {
        let Some(item) = shared.queue.pop() else {
            break;
        };
        let _in_flight = CountGuard(&shared.in_flight);
        if !shared.keep_processing.load(Ordering::Acquire) {
            break;
        }

        shared.active.fetch_add(1, Ordering::AcqRel);
        let _active = CountGuard(&shared.active);
        if !shared.processor.process(item) {
            tracing::debug!("Sink processor requested stop");
            break;
        }
    }
}
