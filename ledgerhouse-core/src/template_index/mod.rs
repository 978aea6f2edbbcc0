//! The template→file inverted index.
//!
//! For every raw event file, the index records which template names appear,
//! with per-(file, template) event counts and time bounds. Projections use
//! it to confine their scans to the handful of files that can contain their
//! templates.
//!
//! Builds run under a file-system lock and are idempotent; incremental mode
//! only visits files missing from the index. The sweep itself runs either on
//! a dedicated worker pool (default) or as bounded-concurrency blocking
//! tasks on the runtime - the pool falls back to the latter on startup
//! failure or when the stall watchdog fires.

mod pool;
mod progress;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use ledgerhouse_config::{DataPaths, EngineConfig};
use ledgerhouse_model::{
    BuildMode, BuildPhase, TemplateCount, TemplateIndexState, TemplateSummary,
};
use sqlx::Row;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::decode::{FramedGzDecoder, RecordDecoder};
use crate::error::Result;
use crate::locks::FsLock;
use crate::store::{AnalyticStore, SqlValue, ts_parse, ts_text};
pub use pool::{DecoderFactory, FileOutcome, FileTask, WorkerPool, sweep_file};
pub use progress::ProgressTracker;

pub const LOCK_NAME: &str = "template_index";

/// Files handed to a worker per queue pop.
pub const FILE_BATCH: usize = 100;

/// Rows per flush statement.
const FLUSH_ROWS: usize = 500;

const UPSERT_SUFFIX: &str = "ON CONFLICT(file_path, template_name) DO UPDATE SET \
     event_count = excluded.event_count, \
     first_event_at = excluded.first_event_at, \
     last_event_at = excluded.last_event_at";

const ROW_COLUMNS: [&str; 5] = [
    "file_path",
    "template_name",
    "event_count",
    "first_event_at",
    "last_event_at",
];

#[derive(Debug, Clone)]
pub struct TemplateIndexConfig {
    pub workers: usize,
    pub concurrency: usize,
    /// Worker-pool engine by default; main-thread concurrency otherwise.
    pub use_worker_pool: bool,
    pub stall_timeout: Duration,
}

impl Default for TemplateIndexConfig {
    fn default() -> Self {
        Self {
            workers: ledgerhouse_config::engine::default_worker_count(),
            concurrency: 6,
            use_worker_pool: true,
            stall_timeout: Duration::from_secs(120),
        }
    }
}

impl TemplateIndexConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            workers: config.template_index_workers.max(1),
            concurrency: config.template_index_concurrency.max(1),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct TemplateFileIndex {
    store: AnalyticStore,
    paths: DataPaths,
    factory: DecoderFactory,
    config: TemplateIndexConfig,
    progress: Arc<ProgressTracker>,
}

impl std::fmt::Debug for TemplateFileIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateFileIndex")
            .field("config", &self.config)
            .finish()
    }
}

/// Mutable state threaded through one build.
struct BuildState {
    pending: Vec<Vec<SqlValue>>,
    processed: HashSet<String>,
    failed_files: u64,
}

impl TemplateFileIndex {
    pub fn new(store: AnalyticStore, paths: DataPaths, config: TemplateIndexConfig) -> Self {
        Self {
            store,
            paths,
            factory: Arc::new(|| Box::new(FramedGzDecoder::new()) as Box<dyn RecordDecoder>),
            config,
            progress: Arc::new(ProgressTracker::new()),
        }
    }

    /// Swap the decoder factory (tests, alternative containers).
    pub fn with_decoder_factory(mut self, factory: DecoderFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    /// Build or extend the index. Returns the refreshed state row.
    pub async fn build(&self, mode: BuildMode) -> Result<TemplateIndexState> {
        let _lock = FsLock::acquire(&self.paths, LOCK_NAME)?;
        let started = Instant::now();

        if mode == BuildMode::Force {
            self.store.exec("DELETE FROM template_file_index", vec![]).await?;
        }

        let tasks = self.target_files(mode).await?;
        let total = tasks.len() as u64;
        self.progress.start(BuildPhase::Scanning, total);
        info!("template index build ({mode:?}): {total} files to sweep");

        let mut state = BuildState {
            pending: Vec::new(),
            processed: HashSet::new(),
            failed_files: 0,
        };

        if !tasks.is_empty() {
            if self.config.use_worker_pool {
                self.run_pool(&tasks, &mut state).await?;
            } else {
                self.run_concurrent(tasks.clone(), &mut state).await?;
            }

            // Anything not processed (stall cancellation, pool failure)
            // finishes on the fallback engine.
            let remainder: Vec<FileTask> = tasks
                .iter()
                .filter(|task| !state.processed.contains(&task.rel_path))
                .cloned()
                .collect();
            if !remainder.is_empty() {
                warn!(
                    "template index: {} files left after pool run, finishing on main-thread engine",
                    remainder.len()
                );
                self.run_concurrent(remainder, &mut state).await?;
            }
        }

        self.progress.set_phase(BuildPhase::Flushing);
        self.flush(&mut state, true).await?;

        self.progress.set_phase(BuildPhase::Finalizing);
        let built_state = self.write_state(started.elapsed()).await?;
        self.progress.set_phase(BuildPhase::Done);
        info!(
            "template index build finished: {} files indexed, {} templates, {} per-file failures, {:.1}s",
            built_state.total_files_indexed,
            built_state.total_templates_found,
            state.failed_files,
            built_state.build_duration_seconds,
        );
        Ok(built_state)
    }

    /// Files the build still has to visit, as sweep tasks.
    async fn target_files(&self, mode: BuildMode) -> Result<Vec<FileTask>> {
        let sql = match mode {
            BuildMode::Force => {
                "SELECT path FROM raw_files WHERE file_type = 'events' ORDER BY file_id"
            }
            BuildMode::Incremental => {
                "SELECT path FROM raw_files
                 WHERE file_type = 'events'
                   AND path NOT IN (SELECT DISTINCT file_path FROM template_file_index)
                 ORDER BY file_id"
            }
        };
        let rows = self.store.query(sql, vec![]).await?;
        rows.iter()
            .map(|row| {
                let rel_path: String = row.try_get("path")?;
                let abs_path = self.paths.resolve_raw(&rel_path);
                Ok(FileTask { rel_path, abs_path })
            })
            .collect()
    }

    async fn run_pool(&self, tasks: &[FileTask], state: &mut BuildState) -> Result<()> {
        let batches: Vec<Vec<FileTask>> =
            tasks.chunks(FILE_BATCH).map(<[FileTask]>::to_vec).collect();
        let (tx, mut rx) = mpsc::channel::<FileOutcome>(self.config.workers * 2);

        let pool = match WorkerPool::spawn(
            self.config.workers,
            batches,
            Arc::clone(&self.factory),
            tx,
        ) {
            Ok(pool) => pool,
            Err(err) => {
                warn!("worker pool failed to start ({err}); falling back to main-thread engine");
                return Ok(());
            }
        };

        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(outcome)) => self.absorb(outcome, state).await?,
                Ok(None) => break,
                Err(_) => {
                    if self.progress.stalled_for() >= self.config.stall_timeout {
                        warn!(
                            "template index: no progress for {:?}, abandoning worker pool",
                            self.config.stall_timeout
                        );
                        rx.close();
                        pool.shutdown();
                        return Ok(());
                    }
                }
            }
        }
        pool.shutdown();
        Ok(())
    }

    async fn run_concurrent(
        &self,
        tasks: Vec<FileTask>,
        state: &mut BuildState,
    ) -> Result<()> {
        let factory = Arc::clone(&self.factory);
        let mut outcomes = futures::stream::iter(tasks.into_iter().map(move |task| {
            let factory = Arc::clone(&factory);
            tokio::task::spawn_blocking(move || {
                let decoder = factory();
                FileOutcome {
                    rel_path: task.rel_path.clone(),
                    result: sweep_file(decoder.as_ref(), &task),
                }
            })
        }))
        .buffer_unordered(self.config.concurrency.max(1));

        while let Some(joined) = outcomes.next().await {
            match joined {
                Ok(outcome) => self.absorb(outcome, state).await?,
                Err(join_err) => {
                    warn!("sweep task panicked: {join_err}");
                }
            }
        }
        Ok(())
    }

    async fn absorb(&self, outcome: FileOutcome, state: &mut BuildState) -> Result<()> {
        match outcome.result {
            Ok(counts) => {
                for count in counts {
                    state.pending.push(row_values(&outcome.rel_path, &count));
                }
            }
            Err(reason) => {
                state.failed_files += 1;
                warn!("skipping {}: {}", outcome.rel_path, reason);
            }
        }
        state.processed.insert(outcome.rel_path);
        self.progress.advance(1);
        self.flush(state, false).await
    }

    /// Flush pending rows in chunks; on a failed chunk fall back to
    /// row-by-row so partial progress survives.
    async fn flush(&self, state: &mut BuildState, force: bool) -> Result<()> {
        if state.pending.is_empty() || (!force && state.pending.len() < FLUSH_ROWS) {
            return Ok(());
        }
        let rows = std::mem::take(&mut state.pending);
        match self
            .store
            .bulk_upsert("template_file_index", &ROW_COLUMNS, UPSERT_SUFFIX, &rows, FLUSH_ROWS)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!("bulk flush failed ({err}); retrying row-by-row");
                let single = format!(
                    "INSERT INTO template_file_index ({}) VALUES (?, ?, ?, ?, ?) {}",
                    ROW_COLUMNS.join(", "),
                    UPSERT_SUFFIX
                );
                for row in rows {
                    if let Err(row_err) = self.store.exec(&single, row).await {
                        warn!("dropping one template row: {row_err}");
                    }
                }
                Ok(())
            }
        }
    }

    async fn write_state(&self, elapsed: Duration) -> Result<TemplateIndexState> {
        let total_files_indexed = self
            .store
            .query_scalar_i64(
                "SELECT COUNT(DISTINCT file_path) FROM template_file_index",
                vec![],
            )
            .await?;
        let total_templates_found = self
            .store
            .query_scalar_i64(
                "SELECT COUNT(DISTINCT template_name) FROM template_file_index",
                vec![],
            )
            .await?;
        let last_indexed_at = Utc::now();
        let duration_seconds = elapsed.as_secs_f64();

        self.store
            .exec(
                "INSERT INTO template_file_index_state
                    (id, last_indexed_at, total_files_indexed,
                     total_templates_found, build_duration_seconds)
                 VALUES (1, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    last_indexed_at = excluded.last_indexed_at,
                    total_files_indexed = excluded.total_files_indexed,
                    total_templates_found = excluded.total_templates_found,
                    build_duration_seconds = excluded.build_duration_seconds",
                vec![
                    SqlValue::Text(ts_text(last_indexed_at)),
                    SqlValue::Int(total_files_indexed),
                    SqlValue::Int(total_templates_found),
                    SqlValue::Real(duration_seconds),
                ],
            )
            .await?;

        Ok(TemplateIndexState {
            last_indexed_at: Some(last_indexed_at),
            total_files_indexed,
            total_templates_found,
            build_duration_seconds: duration_seconds,
        })
    }

    /// Absolute, OS-correct paths of files whose template names contain
    /// `pattern`.
    pub async fn files_for_template(&self, pattern: &str) -> Result<Vec<std::path::PathBuf>> {
        let rows = self
            .store
            .query(
                "SELECT DISTINCT file_path FROM template_file_index
                 WHERE template_name LIKE '%' || ? || '%'
                 ORDER BY file_path",
                vec![SqlValue::Text(pattern.to_string())],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let rel: String = row.try_get("file_path")?;
                Ok(self.paths.resolve_raw(&rel))
            })
            .collect()
    }

    /// Per-template totals across the whole index.
    pub async fn indexed_templates(&self) -> Result<Vec<TemplateSummary>> {
        let rows = self
            .store
            .query(
                "SELECT template_name,
                        SUM(event_count) AS total_events,
                        COUNT(*) AS file_count
                 FROM template_file_index
                 GROUP BY template_name
                 ORDER BY total_events DESC, template_name",
                vec![],
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(TemplateSummary {
                    template_name: row.try_get("template_name")?,
                    total_events: row.try_get("total_events")?,
                    file_count: row.try_get("file_count")?,
                })
            })
            .collect()
    }

    pub async fn is_populated(&self) -> Result<bool> {
        let count = self
            .store
            .query_scalar_i64("SELECT COUNT(*) FROM template_file_index LIMIT 1", vec![])
            .await?;
        Ok(count > 0)
    }

    pub async fn state(&self) -> Result<Option<TemplateIndexState>> {
        let row = self
            .store
            .query_one(
                "SELECT last_indexed_at, total_files_indexed,
                        total_templates_found, build_duration_seconds
                 FROM template_file_index_state WHERE id = 1",
                vec![],
            )
            .await?;
        row.map(|row| {
            Ok(TemplateIndexState {
                last_indexed_at: row
                    .try_get::<Option<String>, _>("last_indexed_at")?
                    .as_deref()
                    .and_then(ts_parse),
                total_files_indexed: row.try_get("total_files_indexed")?,
                total_templates_found: row.try_get("total_templates_found")?,
                build_duration_seconds: row.try_get("build_duration_seconds")?,
            })
        })
        .transpose()
    }
}

fn row_values(rel_path: &str, count: &TemplateCount) -> Vec<SqlValue> {
    vec![
        SqlValue::Text(rel_path.to_string()),
        SqlValue::Text(count.template_name.clone()),
        SqlValue::Int(count.event_count),
        SqlValue::from(count.first_event_at),
        SqlValue::from(count.last_event_at),
    ]
}
