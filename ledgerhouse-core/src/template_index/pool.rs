//! Worker pool for the template→file sweep.
//!
//! Decompression and decode are CPU-bound, so the pool is real OS threads.
//! Each worker is self-contained with its own decoder instance; the only
//! shared state is the batch queue on one side and the result channel on the
//! other. Cancellation is cooperative at file granularity - a worker stuck
//! inside a single file is abandoned, not interrupted.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use ledgerhouse_model::TemplateCount;
use tokio::sync::mpsc;
use tracing::debug;

use crate::decode::RecordDecoder;

/// Builds a fresh decoder per worker.
pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn RecordDecoder> + Send + Sync>;

/// One file to sweep.
#[derive(Debug, Clone)]
pub struct FileTask {
    /// Normalized path as stored in the index.
    pub rel_path: String,
    pub abs_path: PathBuf,
}

/// Result for one file: its template tallies, or a per-file error message.
/// Errors are skips, never build failures.
#[derive(Debug)]
pub struct FileOutcome {
    pub rel_path: String,
    pub result: std::result::Result<Vec<TemplateCount>, String>,
}

#[derive(Debug)]
pub struct WorkerPool {
    cancel: Arc<AtomicBool>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` threads over `batches`. Results arrive on `results`;
    /// the channel closes once every worker has drained the queue or
    /// observed cancellation.
    pub fn spawn(
        workers: usize,
        batches: Vec<Vec<FileTask>>,
        factory: DecoderFactory,
        results: mpsc::Sender<FileOutcome>,
    ) -> std::io::Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::from(batches)));
        let cancel = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(workers);

        for n in 0..workers.max(1) {
            let queue = Arc::clone(&queue);
            let worker_cancel = Arc::clone(&cancel);
            let results = results.clone();
            let decoder = factory();

            let handle = std::thread::Builder::new()
                .name(format!("template-index-{n}"))
                .spawn(move || {
                    worker_loop(&queue, &worker_cancel, decoder.as_ref(), &results);
                });
            match handle {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Let already-running workers drain and bail out.
                    cancel.store(true, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }

        Ok(Self { cancel, handles })
    }

    /// Cooperative shutdown. Threads stuck mid-file are detached; their
    /// result sends fail harmlessly once the receiver is gone.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Join workers that have already finished; leave stuck ones behind.
    pub fn shutdown(mut self) {
        self.cancel();
        for handle in self.handles.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop(
    queue: &Mutex<VecDeque<Vec<FileTask>>>,
    cancel: &AtomicBool,
    decoder: &dyn RecordDecoder,
    results: &mpsc::Sender<FileOutcome>,
) {
    loop {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        let batch = {
            let mut queue = queue.lock().expect("batch queue lock");
            queue.pop_front()
        };
        let Some(batch) = batch else { return };

        for task in batch {
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            let outcome = FileOutcome {
                rel_path: task.rel_path.clone(),
                result: sweep_file(decoder, &task),
            };
            if results.blocking_send(outcome).is_err() {
                // Receiver gone: the build moved on without us.
                return;
            }
        }
    }
}

/// Tally templates in one file: per-template event count plus first/last
/// event time.
pub fn sweep_file(
    decoder: &dyn RecordDecoder,
    task: &FileTask,
) -> std::result::Result<Vec<TemplateCount>, String> {
    let records = decoder
        .decode(&task.abs_path)
        .map_err(|err| format!("decode failed: {err}"))?;

    let mut tallies: BTreeMap<String, (i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
        BTreeMap::new();
    for record in records {
        let Some(name) = record.template_name() else {
            continue;
        };
        let ts = record.best_timestamp();
        let entry = tallies.entry(name.to_string()).or_insert((0, None, None));
        entry.0 += 1;
        if let Some(ts) = ts {
            entry.1 = Some(entry.1.map_or(ts, |first| first.min(ts)));
            entry.2 = Some(entry.2.map_or(ts, |last| last.max(ts)));
        }
    }

    if tallies.is_empty() {
        debug!("{} contained no recognized events", task.rel_path);
    }
    Ok(tallies
        .into_iter()
        .map(|(template_name, (event_count, first_event_at, last_event_at))| TemplateCount {
            template_name,
            event_count,
            first_event_at,
            last_event_at,
        })
        .collect())
}
