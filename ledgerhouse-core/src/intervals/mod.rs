//! Time-interval projections: SV membership and DSO rules epochs.
//!
//! Both follow one shape: for a given template, a created event opens an
//! interval keyed by contract id, and a consuming exercise closes it at its
//! effective time. A close observed before its create is held as a tombstone
//! and merged when the create arrives; closes that never find a create are
//! counted, not guessed at.
//!
//! Extraction failures are counted per bucket and surfaced in the final
//! build log. A build that saw events but produced zero intervals fails
//! loudly - an empty index almost always means broken extraction, not an
//! empty ledger.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledgerhouse_model::{
    DropCounters, DsoRulesInterval, Record, SvInterval, VotingThresholds,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::decode::{FramedGzDecoder, RecordDecoder};
use crate::error::{Result, WarehouseError};
use crate::payload::{extract_int, extract_party, extract_text, positional};
use crate::store::{AnalyticStore, SqlValue, ts_parse, ts_text};
use crate::supervisor::IndexerSupervisor;
use crate::template_index::{DecoderFactory, TemplateFileIndex};

/// Template suffix of SV onboarding contracts.
pub const SV_TEMPLATE: &str = "SvOnboardingConfirmed";
/// Template suffix of the DSO rules contract.
pub const DSO_RULES_TEMPLATE: &str = "DsoRules";

pub const SV_TASK_NAME: &str = "sv_intervals";
pub const DSO_TASK_NAME: &str = "dso_rules_intervals";

/// Positional field order of the SV onboarding record.
mod sv_field_order {
    pub const DSO: usize = 0;
    pub const SV_PARTY: usize = 1;
    pub const SV_NAME: usize = 2;
    pub const REWARD_WEIGHT: usize = 3;
    pub const PARTICIPANT_ID: usize = 4;
    pub const REASON: usize = 5;
}

/// Result of one interval build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntervalBuildReport {
    pub events_seen: u64,
    pub intervals_written: u64,
    pub drops: DropCounters,
}

/// Records relevant to an interval build, split by role.
struct TemplateEvents {
    creates: Vec<Record>,
    /// contract id → close time of the consuming exercise.
    closes: HashMap<String, DateTime<Utc>>,
    events_seen: u64,
}

/// Shared scaffolding for both interval indexers.
#[derive(Clone)]
struct IntervalScanner {
    template_index: TemplateFileIndex,
    factory: DecoderFactory,
}

impl IntervalScanner {
    /// Collect creates and consuming exercises of `template` from the files
    /// the inverted index names, one file at a time on blocking threads.
    async fn collect(&self, template: &'static str) -> Result<TemplateEvents> {
        let files = self.template_index.files_for_template(template).await?;
        let mut creates = Vec::new();
        let mut closes: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut events_seen = 0u64;

        for path in files {
            let factory = Arc::clone(&self.factory);
            let task_path: PathBuf = path.clone();
            let task = tokio::task::spawn_blocking(move || -> Result<Vec<Record>> {
                let decoder = factory();
                let records = decoder.decode(&task_path)?;
                Ok(records
                    .filter(|record| {
                        record
                            .template_id
                            .as_deref()
                            .is_some_and(|id| {
                                ledgerhouse_model::record::template_matches(id, template)
                            })
                            && (record.is_created() || record.is_consuming_exercise())
                    })
                    .collect())
            });
            match task.await {
                Ok(Ok(records)) => {
                    for record in records {
                        events_seen += 1;
                        if record.is_created() {
                            creates.push(record);
                        } else if let Some(contract_id) = record.contract_id.clone() {
                            if let Some(closed_at) = record.best_timestamp() {
                                // Tombstone semantics: the close is held here
                                // even when its create has not been seen yet.
                                closes.insert(contract_id, closed_at);
                            }
                        }
                    }
                }
                Ok(Err(err)) => warn!("skipping {}: {}", path.display(), err),
                Err(join_err) => {
                    warn!("scan task for {} panicked: {}", path.display(), join_err);
                }
            }
        }

        Ok(TemplateEvents { creates, closes, events_seen })
    }
}

/// SV membership intervals from onboarding contracts.
#[derive(Clone)]
pub struct SvIntervalIndexer {
    store: AnalyticStore,
    scanner: IntervalScanner,
    supervisor: Arc<IndexerSupervisor>,
}

impl std::fmt::Debug for SvIntervalIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvIntervalIndexer").finish()
    }
}

impl SvIntervalIndexer {
    pub fn new(
        store: AnalyticStore,
        template_index: TemplateFileIndex,
        supervisor: Arc<IndexerSupervisor>,
    ) -> Self {
        Self {
            store,
            scanner: IntervalScanner {
                template_index,
                factory: Arc::new(|| Box::new(FramedGzDecoder::new()) as Box<dyn RecordDecoder>),
            },
            supervisor,
        }
    }

    pub fn with_decoder_factory(mut self, factory: DecoderFactory) -> Self {
        self.scanner.factory = factory;
        self
    }

    pub fn queries(&self) -> SvIntervalQueries {
        SvIntervalQueries::new(self.store.clone())
    }

    pub async fn build(&self) -> Result<IntervalBuildReport> {
        let token = self.supervisor.try_begin(SV_TASK_NAME)?;
        let result = self.build_inner().await;
        match result {
            Ok(report) => {
                info!(
                    "sv interval build: {} events, {} intervals, dropped \
                     {{missing_party: {}, missing_start: {}, inverted: {}, incomplete: {}}}",
                    report.events_seen,
                    report.intervals_written,
                    report.drops.missing_party,
                    report.drops.missing_start,
                    report.drops.inverted,
                    report.drops.incomplete,
                );
                token.complete();
                Ok(report)
            }
            Err(err) => {
                token.fail(err.to_string());
                Err(err)
            }
        }
    }

    async fn build_inner(&self) -> Result<IntervalBuildReport> {
        let events = self.scanner.collect(SV_TEMPLATE).await?;
        let mut drops = DropCounters::default();
        let mut rows: Vec<SvInterval> = Vec::new();
        let mut closes = events.closes;

        for record in &events.creates {
            let Some(contract_id) = record.contract_id.clone() else {
                drops.incomplete += 1;
                continue;
            };
            let payload = record.payload.clone().unwrap_or(Value::Null);
            let Some(sv_party) = extract_sv_party(&payload) else {
                drops.missing_party += 1;
                continue;
            };
            let Some(active_from) = record.best_timestamp() else {
                drops.missing_start += 1;
                continue;
            };
            let active_until = closes.remove(&contract_id);
            if let Some(until) = active_until
                && until < active_from
            {
                drops.inverted += 1;
                continue;
            }
            rows.push(SvInterval {
                contract_id,
                sv_party,
                sv_name: extract_text(&payload, &["svName", "name"])
                    .or_else(|| positional_text(&payload, sv_field_order::SV_NAME)),
                sv_reward_weight: extract_int(&payload, &["svRewardWeight", "rewardWeight"])
                    .or_else(|| {
                        positional(&payload, sv_field_order::REWARD_WEIGHT)
                            .and_then(crate::payload::int_value)
                    }),
                sv_participant_id: extract_text(&payload, &["svParticipantId", "participantId"])
                    .or_else(|| positional_text(&payload, sv_field_order::PARTICIPANT_ID)),
                active_from,
                active_until,
                dso: extract_party(&payload, &["dso"])
                    .or_else(|| positional_text(&payload, sv_field_order::DSO)),
                reason: extract_text(&payload, &["reason", "body"])
                    .or_else(|| positional_text(&payload, sv_field_order::REASON)),
            });
        }
        // Whatever is left in the close map never found its create.
        drops.incomplete += closes.len() as u64;

        if events.events_seen > 0 && rows.is_empty() {
            return Err(WarehouseError::BrokenExtraction {
                indexer: SV_TASK_NAME.to_string(),
                events_seen: events.events_seen,
            });
        }

        self.store.exec("DELETE FROM sv_intervals", vec![]).await?;
        let values: Vec<Vec<SqlValue>> = rows.iter().map(sv_row_values).collect();
        self.store
            .bulk_upsert(
                "sv_intervals",
                &[
                    "contract_id",
                    "sv_party",
                    "sv_name",
                    "sv_reward_weight",
                    "sv_participant_id",
                    "active_from",
                    "active_until",
                    "dso",
                    "reason",
                ],
                "ON CONFLICT(contract_id) DO UPDATE SET \
                 active_until = excluded.active_until",
                &values,
                200,
            )
            .await?;

        Ok(IntervalBuildReport {
            events_seen: events.events_seen,
            intervals_written: rows.len() as u64,
            drops,
        })
    }
}

/// DSO rules epochs: each rules contract version is active from its create
/// until its consuming exercise.
#[derive(Clone)]
pub struct DsoRulesIndexer {
    store: AnalyticStore,
    scanner: IntervalScanner,
    supervisor: Arc<IndexerSupervisor>,
}

impl std::fmt::Debug for DsoRulesIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DsoRulesIndexer").finish()
    }
}

impl DsoRulesIndexer {
    pub fn new(
        store: AnalyticStore,
        template_index: TemplateFileIndex,
        supervisor: Arc<IndexerSupervisor>,
    ) -> Self {
        Self {
            store,
            scanner: IntervalScanner {
                template_index,
                factory: Arc::new(|| Box::new(FramedGzDecoder::new()) as Box<dyn RecordDecoder>),
            },
            supervisor,
        }
    }

    pub fn with_decoder_factory(mut self, factory: DecoderFactory) -> Self {
        self.scanner.factory = factory;
        self
    }

    pub async fn build(&self) -> Result<IntervalBuildReport> {
        let token = self.supervisor.try_begin(DSO_TASK_NAME)?;
        let result = self.build_inner().await;
        match result {
            Ok(report) => {
                info!(
                    "dso rules build: {} events, {} intervals, {} incomplete",
                    report.events_seen,
                    report.intervals_written,
                    report.drops.incomplete
                );
                token.complete();
                Ok(report)
            }
            Err(err) => {
                token.fail(err.to_string());
                Err(err)
            }
        }
    }

    async fn build_inner(&self) -> Result<IntervalBuildReport> {
        let events = self.scanner.collect(DSO_RULES_TEMPLATE).await?;
        let mut drops = DropCounters::default();
        let mut rows: Vec<DsoRulesInterval> = Vec::new();
        let mut closes = events.closes;

        for record in &events.creates {
            let Some(contract_id) = record.contract_id.clone() else {
                drops.incomplete += 1;
                continue;
            };
            let Some(active_from) = record.best_timestamp() else {
                drops.missing_start += 1;
                continue;
            };
            let active_until = closes.remove(&contract_id);
            if let Some(until) = active_until
                && until < active_from
            {
                drops.inverted += 1;
                continue;
            }
            let payload = record.payload.clone().unwrap_or(Value::Null);
            rows.push(DsoRulesInterval {
                contract_id,
                dso: extract_party(&payload, &["dso"]),
                active_from,
                active_until,
            });
        }
        drops.incomplete += closes.len() as u64;

        if events.events_seen > 0 && rows.is_empty() {
            return Err(WarehouseError::BrokenExtraction {
                indexer: DSO_TASK_NAME.to_string(),
                events_seen: events.events_seen,
            });
        }

        self.store.exec("DELETE FROM dso_rules_intervals", vec![]).await?;
        let values: Vec<Vec<SqlValue>> = rows
            .iter()
            .map(|row| {
                vec![
                    SqlValue::Text(row.contract_id.clone()),
                    SqlValue::from(row.dso.clone()),
                    SqlValue::Text(ts_text(row.active_from)),
                    SqlValue::from(row.active_until),
                ]
            })
            .collect();
        self.store
            .bulk_upsert(
                "dso_rules_intervals",
                &["contract_id", "dso", "active_from", "active_until"],
                "ON CONFLICT(contract_id) DO UPDATE SET \
                 active_until = excluded.active_until",
                &values,
                200,
            )
            .await?;

        Ok(IntervalBuildReport {
            events_seen: events.events_seen,
            intervals_written: rows.len() as u64,
            drops,
        })
    }
}

/// Read surface over SV membership intervals.
#[derive(Debug, Clone)]
pub struct SvIntervalQueries {
    store: AnalyticStore,
}

impl SvIntervalQueries {
    pub fn new(store: AnalyticStore) -> Self {
        Self { store }
    }

    /// Distinct SV parties with an interval covering `t`.
    pub async fn count_active_at(&self, t: DateTime<Utc>) -> Result<i64> {
        let ts = ts_text(t);
        self.store
            .query_scalar_i64(
                "SELECT COUNT(DISTINCT sv_party) FROM sv_intervals
                 WHERE active_from <= ?
                   AND (active_until IS NULL OR active_until > ?)",
                vec![SqlValue::Text(ts.clone()), SqlValue::Text(ts)],
            )
            .await
    }

    /// Intervals covering `t`, ordered by party.
    pub async fn list_active_at(&self, t: DateTime<Utc>) -> Result<Vec<SvInterval>> {
        let ts = ts_text(t);
        let rows = self
            .store
            .query(
                "SELECT * FROM sv_intervals
                 WHERE active_from <= ?
                   AND (active_until IS NULL OR active_until > ?)
                 ORDER BY sv_party, active_from",
                vec![SqlValue::Text(ts.clone()), SqlValue::Text(ts)],
            )
            .await?;
        rows.iter().map(sv_row_from_row).collect()
    }

    /// Most recent intervals, newest first.
    pub async fn timeline(&self, limit: i64) -> Result<Vec<SvInterval>> {
        let rows = self
            .store
            .query(
                "SELECT * FROM sv_intervals
                 ORDER BY active_from DESC, contract_id
                 LIMIT ?",
                vec![SqlValue::Int(limit.max(1))],
            )
            .await?;
        rows.iter().map(sv_row_from_row).collect()
    }

    /// Voting thresholds at `t`, derived from the active count.
    pub async fn thresholds_at(&self, t: DateTime<Utc>) -> Result<VotingThresholds> {
        Ok(VotingThresholds::for_count(self.count_active_at(t).await?))
    }
}

fn extract_sv_party(payload: &Value) -> Option<String> {
    extract_party(payload, &["svParty", "sv"])
        .or_else(|| positional_text(payload, sv_field_order::SV_PARTY))
}

fn positional_text(payload: &Value, index: usize) -> Option<String> {
    let value = positional(payload, index)?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => extract_text(value, &["party", "text", "value"]),
        _ => None,
    }
}

fn sv_row_values(row: &SvInterval) -> Vec<SqlValue> {
    vec![
        SqlValue::Text(row.contract_id.clone()),
        SqlValue::Text(row.sv_party.clone()),
        SqlValue::from(row.sv_name.clone()),
        SqlValue::from(row.sv_reward_weight),
        SqlValue::from(row.sv_participant_id.clone()),
        SqlValue::Text(ts_text(row.active_from)),
        SqlValue::from(row.active_until),
        SqlValue::from(row.dso.clone()),
        SqlValue::from(row.reason.clone()),
    ]
}

fn sv_row_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SvInterval> {
    use sqlx::Row as _;
    Ok(SvInterval {
        contract_id: row.try_get("contract_id")?,
        sv_party: row.try_get("sv_party")?,
        sv_name: row.try_get("sv_name")?,
        sv_reward_weight: row.try_get("sv_reward_weight")?,
        sv_participant_id: row.try_get("sv_participant_id")?,
        active_from: ts_parse(&row.try_get::<String, _>("active_from")?)
            .ok_or_else(|| WarehouseError::Internal("unparseable active_from".into()))?,
        active_until: row
            .try_get::<Option<String>, _>("active_until")?
            .as_deref()
            .and_then(ts_parse),
        dso: row.try_get("dso")?,
        reason: row.try_get("reason")?,
    })
}
