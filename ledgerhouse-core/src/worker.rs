//! The periodic engine cycle: scan → ingest → aggregate → gap check.
//!
//! One cooperative scheduler drives the short cycle under per-phase
//! deadlines and never re-enters itself. Long-running index builds are
//! spawned separately at startup, guarded by the supervisor and the
//! file-system locks, and explicitly exempt from cycle deadlines.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use ledgerhouse_config::EngineConfig;
use ledgerhouse_model::{
    AggregationOutcome, BuildMode, IngestSummary, ScanSummary,
};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{debug, error, info, warn};

use crate::aggregations::Aggregations;
use crate::error::{Result, WarehouseError};
use crate::files::FileIndex;
use crate::governance::VoteRequestIndexer;
use crate::ingest::Ingestor;
use crate::store::{AnalyticStore, ts_parse};
use crate::supervisor::IndexerSupervisor;
use crate::template_index::TemplateFileIndex;

/// One detected ingestion gap: a hole in the covered time range larger than
/// the configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapReport {
    pub migration_id: Option<i64>,
    pub gap_start: DateTime<Utc>,
    pub gap_end: DateTime<Utc>,
    pub gap_ms: i64,
}

/// What one cycle accomplished. Failed phases land in `phase_errors` and
/// never abort the cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u32,
    pub scan: Option<ScanSummary>,
    pub ingest: Option<IngestSummary>,
    pub aggregations: Option<BTreeMap<String, AggregationOutcome>>,
    pub gaps: Vec<GapReport>,
    pub phase_errors: Vec<String>,
}

pub struct EngineWorker {
    config: EngineConfig,
    store: AnalyticStore,
    file_index: FileIndex,
    ingestor: Ingestor,
    aggregations: Aggregations,
    template_index: TemplateFileIndex,
    vote_indexer: VoteRequestIndexer,
    supervisor: Arc<IndexerSupervisor>,
    running: AtomicBool,
    cycle_count: AtomicU32,
}

impl std::fmt::Debug for EngineWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineWorker")
            .field("cycle_count", &self.cycle_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl EngineWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        store: AnalyticStore,
        file_index: FileIndex,
        ingestor: Ingestor,
        aggregations: Aggregations,
        template_index: TemplateFileIndex,
        vote_indexer: VoteRequestIndexer,
        supervisor: Arc<IndexerSupervisor>,
    ) -> Self {
        Self {
            config,
            store,
            file_index,
            ingestor,
            aggregations,
            template_index,
            vote_indexer,
            supervisor,
            running: AtomicBool::new(false),
            cycle_count: AtomicU32::new(0),
        }
    }

    pub fn supervisor(&self) -> Arc<IndexerSupervisor> {
        Arc::clone(&self.supervisor)
    }

    /// Run one cycle. Re-entry is refused, not queued.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WarehouseError::Contention {
                resource: "engine_cycle".to_string(),
            });
        }
        let report = self.run_cycle_inner().await;
        self.running.store(false, Ordering::SeqCst);
        Ok(report)
    }

    async fn run_cycle_inner(&self) -> CycleReport {
        let cycle = self.cycle_count.fetch_add(1, Ordering::SeqCst) + 1;
        let timeout = self.config.cycle_timeout;
        let mut report = CycleReport { cycle, ..CycleReport::default() };

        match tokio::time::timeout(timeout, self.file_index.scan_and_index()).await {
            Ok(Ok(scan)) => report.scan = Some(scan),
            Ok(Err(err)) => report.phase_errors.push(format!("scan: {err}")),
            Err(_) => report
                .phase_errors
                .push(format!("scan timed out after {}s", timeout.as_secs())),
        }

        match tokio::time::timeout(
            timeout,
            self.ingestor.ingest_new_files(self.config.files_per_cycle),
        )
        .await
        {
            Ok(Ok(ingest)) => report.ingest = Some(ingest),
            Ok(Err(err)) => report.phase_errors.push(format!("ingest: {err}")),
            Err(_) => report
                .phase_errors
                .push(format!("ingest timed out after {}s", timeout.as_secs())),
        }

        if report.ingest.is_some_and(|ingest| ingest.files > 0) {
            match tokio::time::timeout(timeout, self.aggregations.update_all()).await {
                Ok(outcomes) => report.aggregations = Some(outcomes),
                Err(_) => report.phase_errors.push(format!(
                    "aggregations timed out after {}s",
                    timeout.as_secs()
                )),
            }
        }

        if self.config.gap_check_interval > 0
            && cycle % self.config.gap_check_interval == 0
        {
            match self.detect_gaps().await {
                Ok(gaps) => {
                    for gap in &gaps {
                        warn!(
                            "ingestion gap of {}ms in migration {:?}: {} → {}",
                            gap.gap_ms, gap.migration_id, gap.gap_start, gap.gap_end
                        );
                    }
                    if !gaps.is_empty() && self.config.auto_recover_gaps {
                        // Recovery hook: re-scan so files that appeared late
                        // get picked up next ingest phase.
                        if let Err(err) = self.file_index.scan_and_index().await {
                            warn!("gap recovery scan failed: {err}");
                        }
                    }
                    report.gaps = gaps;
                }
                Err(err) => report.phase_errors.push(format!("gap check: {err}")),
            }
        }

        for phase_error in &report.phase_errors {
            error!("cycle {cycle}: {phase_error}");
        }
        debug!(
            "cycle {cycle} done: scan={:?} ingest={:?} gaps={}",
            report.scan,
            report.ingest,
            report.gaps.len()
        );
        report
    }

    /// Contiguity scan over ingested time ranges, grouped per migration.
    /// Flags holes larger than the configured threshold.
    pub async fn detect_gaps(&self) -> Result<Vec<GapReport>> {
        let rows = self
            .store
            .query(
                "SELECT migration_id, min_ts, max_ts
                 FROM raw_files
                 WHERE ingested = 1 AND min_ts IS NOT NULL AND max_ts IS NOT NULL
                 ORDER BY migration_id, min_ts",
                vec![],
            )
            .await?;

        let threshold_ms = self.config.gap_threshold.as_millis() as i64;
        let mut gaps = Vec::new();
        let mut current: Option<(Option<i64>, DateTime<Utc>)> = None;

        for row in &rows {
            let migration_id: Option<i64> = row.try_get("migration_id")?;
            let Some(min_ts) = row
                .try_get::<Option<String>, _>("min_ts")?
                .as_deref()
                .and_then(ts_parse)
            else {
                continue;
            };
            let Some(max_ts) = row
                .try_get::<Option<String>, _>("max_ts")?
                .as_deref()
                .and_then(ts_parse)
            else {
                continue;
            };

            match current {
                Some((last_migration, last_end)) if last_migration == migration_id => {
                    let gap_ms = (min_ts - last_end).num_milliseconds();
                    if gap_ms > threshold_ms {
                        gaps.push(GapReport {
                            migration_id,
                            gap_start: last_end,
                            gap_end: min_ts,
                            gap_ms,
                        });
                    }
                    current = Some((migration_id, last_end.max(max_ts)));
                }
                _ => current = Some((migration_id, max_ts)),
            }
        }
        Ok(gaps)
    }

    /// Periodic cycle loop. The first tick fires immediately, giving the
    /// startup cycle.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.cycle_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match self.run_cycle().await {
                    Ok(report) if !report.phase_errors.is_empty() => {
                        warn!(
                            "cycle {} finished with {} failed phases",
                            report.cycle,
                            report.phase_errors.len()
                        );
                    }
                    Ok(_) => {}
                    Err(WarehouseError::Contention { .. }) => {
                        warn!("previous cycle still running, skipping tick");
                    }
                    Err(err) => error!("cycle failed: {err}"),
                }
            }
        })
    }

    /// Startup builds: template→file index if unpopulated, then the
    /// vote-request projection if unpopulated. Not covered by cycle
    /// deadlines; they run to completion or failure.
    pub async fn run_startup_builds(&self) {
        match self.template_index.is_populated().await {
            Ok(true) => debug!("template index already populated"),
            Ok(false) => {
                info!("template index unpopulated, building in background");
                let token = match self.supervisor.try_begin(crate::template_index::LOCK_NAME) {
                    Ok(token) => token,
                    Err(err) => {
                        warn!("template index build not started: {err}");
                        return;
                    }
                };
                match self.template_index.build(BuildMode::Incremental).await {
                    Ok(state) => {
                        token.complete();
                        info!(
                            "startup template index build done: {} files",
                            state.total_files_indexed
                        );
                    }
                    Err(err) => {
                        token.fail(err.to_string());
                        error!("startup template index build failed: {err}");
                        return;
                    }
                }
            }
            Err(err) => {
                error!("could not check template index population: {err}");
                return;
            }
        }

        if !self.config.vote_index_build_on_startup {
            return;
        }
        let populated = match self.vote_indexer.queries().count().await {
            Ok(count) => count > 0,
            Err(err) => {
                error!("could not check vote index population: {err}");
                return;
            }
        };
        if populated {
            debug!("vote-request index already populated");
            return;
        }
        info!("vote-request index unpopulated, building in background");
        if let Err(err) = self.vote_indexer.build().await {
            error!("startup vote-request build failed: {err}");
        }
    }
}
