use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use ledgerhouse_model::{BuildPhase, BuildProgress};

/// Shared, monotonically advancing progress for one build.
///
/// `current` only ever grows within a phase; the stall clock resets on every
/// advance so the watchdog measures real forward progress, not wall time.
#[derive(Debug)]
pub struct ProgressTracker {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    progress: BuildProgress,
    last_advance: Instant,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                progress: BuildProgress::new(BuildPhase::Idle, 0, Utc::now()),
                last_advance: Instant::now(),
            }),
        }
    }

    pub fn start(&self, phase: BuildPhase, total: u64) {
        let mut inner = self.inner.lock().expect("progress lock");
        inner.progress = BuildProgress::new(phase, total, Utc::now());
        inner.last_advance = Instant::now();
    }

    pub fn set_phase(&self, phase: BuildPhase) {
        let mut inner = self.inner.lock().expect("progress lock");
        inner.progress.phase = phase;
        inner.last_advance = Instant::now();
    }

    pub fn advance(&self, n: u64) {
        let mut inner = self.inner.lock().expect("progress lock");
        inner.progress.current = inner.progress.current.saturating_add(n);
        inner.last_advance = Instant::now();
    }

    pub fn snapshot(&self) -> BuildProgress {
        self.inner.lock().expect("progress lock").progress
    }

    /// Time since the last phase change or advance.
    pub fn stalled_for(&self) -> Duration {
        self.inner.lock().expect("progress lock").last_advance.elapsed()
    }

    pub fn eta_seconds(&self) -> Option<f64> {
        self.snapshot().eta_seconds(Utc::now())
    }
}
