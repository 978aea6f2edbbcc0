use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a long-running index build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Idle,
    Scanning,
    Flushing,
    Finalizing,
    Done,
    Failed,
}

/// Monotonic progress snapshot of one build.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuildProgress {
    pub phase: BuildPhase,
    pub current: u64,
    pub total: u64,
    pub started_at: DateTime<Utc>,
}

impl BuildProgress {
    pub fn new(phase: BuildPhase, total: u64, started_at: DateTime<Utc>) -> Self {
        Self { phase, current: 0, total, started_at }
    }

    /// Estimated seconds remaining from observed throughput; `None` until
    /// there is enough signal.
    pub fn eta_seconds(&self, now: DateTime<Utc>) -> Option<f64> {
        if self.current == 0 || self.total == 0 {
            return None;
        }
        let elapsed = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return None;
        }
        let rate = self.current as f64 / elapsed;
        let remaining = self.total.saturating_sub(self.current) as f64;
        Some(remaining / rate)
    }
}

/// Lifecycle state of a supervised background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Error,
}

/// Record kept by the supervisor for each background task it started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl TaskState {
    pub fn running(now: DateTime<Utc>) -> Self {
        Self { started_at: now, completed_at: None, status: TaskStatus::Running, error: None }
    }
}
