//! Bounded background queue for post-download conversion of artifacts.
//!
//! The crawl path only ever calls [`ConversionQueue::try_enqueue`], which
//! never blocks: when the queue is full the file is skipped and counted.
//! A fixed pool of consumer threads drains the queue; [`ConversionQueue::shutdown`]
//! closes it and waits for the consumers to finish what was queued.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Boxed error returned by converters
pub type ConvertError = Box<dyn std::error::Error + Send + Sync>;

/// A conversion step applied to each downloaded artifact.
pub trait Converter: Send + Sync {
    fn convert(&self, path: &Path) -> Result<(), ConvertError>;
}

impl<F> Converter for F
where
    F: Fn(&Path) -> Result<(), ConvertError> + Send + Sync,
{
    fn convert(&self, path: &Path) -> Result<(), ConvertError> {
        self(path)
    }
}

/// Counters shared between producers and consumers
#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicUsize,
    dropped: AtomicUsize,
    converted: AtomicUsize,
    failed: AtomicUsize,
}

/// Final conversion statistics, returned by [`ConversionQueue::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionStats {
    pub enqueued: usize,
    pub dropped: usize,
    pub converted: usize,
    pub failed: usize,
}

/// Bounded conversion queue with a fixed consumer pool
pub struct ConversionQueue {
    sender: SyncSender<PathBuf>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for ConversionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionQueue")
            .field("workers", &self.workers.len())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl ConversionQueue {
    /// Spawn `workers` consumer threads behind a queue of `capacity` paths.
    pub fn start(
        converter: Arc<dyn Converter>,
        workers: usize,
        capacity: usize,
    ) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                let converter = converter.clone();
                let counters = counters.clone();
                std::thread::Builder::new()
                    .name(format!("convert-{i}"))
                    .spawn(move || consume(&receiver, converter.as_ref(), &counters))
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self {
            sender,
            workers: handles,
            counters,
        })
    }

    /// Queue a file for conversion without blocking.
    ///
    /// Returns `false` when the queue is full or its consumers are gone.
    pub fn try_enqueue(&self, path: PathBuf) -> bool {
        match self.sender.try_send(path) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(path)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("conversion queue full, skipping {}", path.display());
                false
            }
            Err(TrySendError::Disconnected(path)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::error!("conversion workers gone, skipping {}", path.display());
                false
            }
        }
    }

    /// Close the queue and wait for consumers to drain it.
    pub fn shutdown(self) -> ConversionStats {
        // Drop sender → channel closes → consumers exit after the backlog
        drop(self.sender);
        for handle in self.workers {
            if handle.join().is_err() {
                log::error!("conversion worker panicked");
            }
        }
        ConversionStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            converted: self.counters.converted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

fn consume(receiver: &Mutex<Receiver<PathBuf>>, converter: &dyn Converter, counters: &Counters) {
    loop {
        // Lock only around recv so other consumers can pick up the next path
        let next = match receiver.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => return,
        };
        let Ok(path) = next else { return };

        match converter.convert(&path) {
            Ok(()) => {
                counters.converted.fetch_add(1, Ordering::Relaxed);
                log::debug!("converted {}", path.display());
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                log::error!("conversion failed for {}: {e}", path.display());
            }
        }
    }
}
