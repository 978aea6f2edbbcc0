//! Process-local bookkeeping for background index builds.
//!
//! One supervisor owns the in-progress flag and lifecycle record of every
//! long-running task, replacing scattered global state. Cross-process
//! exclusion stays with the file-system locks; the supervisor prevents
//! overlapping starts inside one process and keeps the last outcome
//! queryable.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use ledgerhouse_model::{TaskState, TaskStatus};
use tracing::{error, info};

use crate::error::{Result, WarehouseError};

#[derive(Debug, Default)]
pub struct IndexerSupervisor {
    tasks: DashMap<String, TaskState>,
}

impl IndexerSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Begin `name`, failing with contention if it is already running.
    ///
    /// The returned token must be resolved with [`TaskToken::complete`] or
    /// [`TaskToken::fail`]; dropping it unresolved records an error so a
    /// cancelled build can never leave the flag stuck.
    pub fn try_begin(self: &Arc<Self>, name: &str) -> Result<TaskToken> {
        let mut entry = self.tasks.entry(name.to_string()).or_insert_with(|| TaskState {
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            status: TaskStatus::Completed,
            error: None,
        });
        if entry.status == TaskStatus::Running {
            return Err(WarehouseError::Contention { resource: name.to_string() });
        }
        *entry = TaskState::running(Utc::now());
        drop(entry);

        info!("task {name} started");
        Ok(TaskToken {
            supervisor: Arc::clone(self),
            name: name.to_string(),
            resolved: false,
        })
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .get(name)
            .is_some_and(|state| state.status == TaskStatus::Running)
    }

    pub fn task(&self, name: &str) -> Option<TaskState> {
        self.tasks.get(name).map(|state| state.clone())
    }

    pub fn snapshot(&self) -> BTreeMap<String, TaskState> {
        self.tasks
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn resolve(&self, name: &str, status: TaskStatus, error: Option<String>) {
        if let Some(mut state) = self.tasks.get_mut(name) {
            state.completed_at = Some(Utc::now());
            state.status = status;
            state.error = error;
        }
    }
}

/// RAII handle for one running task.
#[derive(Debug)]
pub struct TaskToken {
    supervisor: Arc<IndexerSupervisor>,
    name: String,
    resolved: bool,
}

impl TaskToken {
    pub fn complete(mut self) {
        self.resolved = true;
        self.supervisor.resolve(&self.name, TaskStatus::Completed, None);
        info!("task {} completed", self.name);
    }

    pub fn fail(mut self, message: impl Into<String>) {
        let message = message.into();
        self.resolved = true;
        self.supervisor
            .resolve(&self.name, TaskStatus::Error, Some(message.clone()));
        error!("task {} failed: {}", self.name, message);
    }
}

impl Drop for TaskToken {
    fn drop(&mut self) {
        if !self.resolved {
            self.supervisor.resolve(
                &self.name,
                TaskStatus::Error,
                Some("task dropped before completion".to_string()),
            );
        }
    }
}
