//! The vote-request projection: template-scoped, consumption-finalized.
//!
//! Create events of the proposal template open rows; the only authoritative
//! finalization signal is a consuming exercise on the proposal-root
//! contract, observed on the consumption template and keyed back to the root
//! by the contract reference carried in the exercise argument. Vote tallies
//! are display-only and never drive status.

pub mod payload;
pub mod queries;
pub mod status;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ledgerhouse_config::DataPaths;
use ledgerhouse_model::{Record, VoteRequestBuildReport, VoteRequestRow};
use serde_json::Value;
use tracing::{info, warn};

use crate::decode::{FramedGzDecoder, RecordDecoder};
use crate::error::{Result, WarehouseError};
use crate::locks::FsLock;
use crate::payload::get_key;
use crate::store::{AnalyticStore, SqlValue, ts_text};
use crate::supervisor::IndexerSupervisor;
use crate::template_index::{DecoderFactory, TemplateFileIndex};
pub use payload::{PayloadShape, ProposalFields, count_votes, extract_proposal_fields};
pub use queries::{CanonicalQuery, VoteRequestQueries};
pub use status::TerminalExercise;

pub const LOCK_NAME: &str = "vote_request_index";
pub const TASK_NAME: &str = "vote_request_index";

/// Template suffix of proposal-root contracts.
pub const PROPOSAL_TEMPLATE: &str = "VoteRequest";
/// Template suffix on which the terminal consuming exercises appear.
pub const CONSUMPTION_TEMPLATE: &str = "DsoRules";

/// Deadline for reading one file inside the scanner; slow files are logged
/// and skipped.
const PER_FILE_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON keys, in priority order, under which a terminal exercise argument
/// references the proposal root.
const ROOT_CID_KEYS: &[&str] = &["voteRequestCid", "requestCid", "cid"];

const ROW_COLUMNS: [&str; 20] = [
    "event_id",
    "stable_id",
    "contract_id",
    "status",
    "is_closed",
    "action_tag",
    "action_subject",
    "proposal_id",
    "semantic_key",
    "is_human",
    "requester",
    "reason_body",
    "reason_url",
    "votes",
    "accept_count",
    "reject_count",
    "vote_before",
    "effective_at",
    "tracking_cid",
    "updated_at",
];

const UPSERT_SUFFIX: &str = "ON CONFLICT(event_id) DO UPDATE SET \
     stable_id = excluded.stable_id, \
     contract_id = excluded.contract_id, \
     status = excluded.status, \
     is_closed = excluded.is_closed, \
     action_tag = excluded.action_tag, \
     action_subject = excluded.action_subject, \
     proposal_id = excluded.proposal_id, \
     semantic_key = excluded.semantic_key, \
     is_human = excluded.is_human, \
     requester = excluded.requester, \
     reason_body = excluded.reason_body, \
     reason_url = excluded.reason_url, \
     votes = excluded.votes, \
     accept_count = excluded.accept_count, \
     reject_count = excluded.reject_count, \
     vote_before = excluded.vote_before, \
     effective_at = excluded.effective_at, \
     tracking_cid = excluded.tracking_cid, \
     updated_at = excluded.updated_at";

#[derive(Clone, Copy)]
enum ScanFilter {
    CreatedOf(&'static str),
    ConsumingOf(&'static str),
}

impl ScanFilter {
    fn matches(self, record: &Record) -> bool {
        let Some(template_id) = record.template_id.as_deref() else {
            return false;
        };
        match self {
            Self::CreatedOf(suffix) => {
                record.is_created()
                    && ledgerhouse_model::record::template_matches(template_id, suffix)
            }
            Self::ConsumingOf(suffix) => {
                record.is_consuming_exercise()
                    && ledgerhouse_model::record::template_matches(template_id, suffix)
            }
        }
    }
}

#[derive(Clone)]
pub struct VoteRequestIndexer {
    store: AnalyticStore,
    paths: DataPaths,
    template_index: TemplateFileIndex,
    factory: DecoderFactory,
    supervisor: Arc<IndexerSupervisor>,
}

impl std::fmt::Debug for VoteRequestIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteRequestIndexer").finish()
    }
}

impl VoteRequestIndexer {
    pub fn new(
        store: AnalyticStore,
        paths: DataPaths,
        template_index: TemplateFileIndex,
        supervisor: Arc<IndexerSupervisor>,
    ) -> Self {
        Self {
            store,
            paths,
            template_index,
            factory: Arc::new(|| Box::new(FramedGzDecoder::new()) as Box<dyn RecordDecoder>),
            supervisor,
        }
    }

    pub fn with_decoder_factory(mut self, factory: DecoderFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn queries(&self) -> VoteRequestQueries {
        VoteRequestQueries::new(self.store.clone())
    }

    /// Build the projection. Guarded by the in-process flag and the
    /// cross-process lock; contention reports `in_progress` instead of
    /// blocking.
    pub async fn build(&self) -> Result<VoteRequestBuildReport> {
        let token = self.supervisor.try_begin(TASK_NAME)?;
        let lock = match FsLock::acquire(&self.paths, LOCK_NAME) {
            Ok(lock) => lock,
            Err(err) => {
                token.fail(err.to_string());
                return Err(err);
            }
        };

        let mut report = VoteRequestBuildReport::started(Utc::now());
        let result = self.build_inner(&mut report).await;
        drop(lock);

        report.finished_at = Some(Utc::now());
        match result {
            Ok(()) => {
                report.success = true;
                self.persist_report(&report).await?;
                token.complete();
                info!(
                    "vote-request build {}: {} creates, {} terminals, {} rows \
                     (shapes: {} named / {} positional, {} unknown choices)",
                    report.build_id,
                    report.create_events,
                    report.terminal_events,
                    report.rows_written,
                    report.named_payloads,
                    report.positional_payloads,
                    report.unknown_choices,
                );
                Ok(report)
            }
            Err(err) => {
                report.error = Some(err.to_string());
                if let Err(persist_err) = self.persist_report(&report).await {
                    warn!("could not persist failed build report: {persist_err}");
                }
                token.fail(err.to_string());
                Err(err)
            }
        }
    }

    async fn build_inner(&self, report: &mut VoteRequestBuildReport) -> Result<()> {
        // Create set: proposal-template files only, via the inverted index.
        let create_files = self
            .template_index
            .files_for_template(PROPOSAL_TEMPLATE)
            .await?;
        let creates = self
            .scan_files(&create_files, ScanFilter::CreatedOf(PROPOSAL_TEMPLATE))
            .await;
        report.create_events = creates.len() as i64;

        // Terminal set: consuming exercises on the consumption template,
        // keyed by the proposal-root contract id from the argument.
        let terminal_files = self
            .template_index
            .files_for_template(CONSUMPTION_TEMPLATE)
            .await?;
        let terminal_records = self
            .scan_files(&terminal_files, ScanFilter::ConsumingOf(CONSUMPTION_TEMPLATE))
            .await;
        let mut terminals: HashMap<String, TerminalExercise> = HashMap::new();
        for record in &terminal_records {
            match extract_root_cid(record.exercise_argument.as_ref()) {
                Some(root) => {
                    terminals.insert(
                        root,
                        TerminalExercise {
                            choice: record.choice.clone(),
                            outcome_tag: extract_outcome_tag(record.exercise_result.as_ref()),
                            effective_at: record.effective_at,
                        },
                    );
                }
                None => {
                    report.missing_roots += 1;
                    warn!(
                        "terminal exercise {} carries no proposal-root reference",
                        record.event_id.as_deref().unwrap_or("<no event id>")
                    );
                }
            }
        }
        report.terminal_events = terminals.len() as i64;

        // Row assembly and upsert.
        let now = Utc::now();
        let mut rows: Vec<Vec<SqlValue>> = Vec::with_capacity(creates.len());
        for record in &creates {
            match self.assemble_row(record, &terminals, now, report) {
                Some(row) => rows.push(row_values(&row)?),
                None => continue,
            }
        }
        report.rows_written = rows.len() as i64;
        self.store
            .bulk_upsert("vote_requests", &ROW_COLUMNS, UPSERT_SUFFIX, &rows, 100)
            .await?;

        if report.create_events > 0 && report.rows_written == 0 {
            return Err(WarehouseError::BrokenExtraction {
                indexer: TASK_NAME.to_string(),
                events_seen: report.create_events as u64,
            });
        }
        Ok(())
    }

    fn assemble_row(
        &self,
        record: &Record,
        terminals: &HashMap<String, TerminalExercise>,
        now: chrono::DateTime<Utc>,
        report: &mut VoteRequestBuildReport,
    ) -> Option<VoteRequestRow> {
        let event_id = record
            .event_id
            .clone()
            .or_else(|| record.update_id.clone())?;
        let stable_id = record
            .contract_id
            .clone()
            .unwrap_or_else(|| event_id.clone());

        let payload = record.payload.clone().unwrap_or(Value::Null);
        let (fields, shape) = extract_proposal_fields(&payload);
        match shape {
            PayloadShape::Named => report.named_payloads += 1,
            PayloadShape::Positional => report.positional_payloads += 1,
        }

        let (action_tag, action_value) = status::action_parts(fields.action.as_ref());
        let action_subject = status::action_subject(action_value.as_ref());
        let semantic_key = status::semantic_key(
            action_tag.as_deref(),
            action_subject.as_deref(),
            fields.requester.as_deref(),
        );
        let (accept_count, reject_count) = count_votes(fields.votes.as_ref());

        let terminal = record
            .contract_id
            .as_deref()
            .and_then(|cid| terminals.get(cid));
        let (vote_status, is_closed) = match terminal {
            Some(terminal) => {
                let (vote_status, unknown) = status::map_outcome(terminal);
                if unknown {
                    report.unknown_choices += 1;
                }
                (vote_status, true)
            }
            None => (status::open_status(fields.vote_before, now), false),
        };

        let proposal_id = fields
            .tracking_cid
            .clone()
            .or_else(|| record.contract_id.clone())
            .unwrap_or_else(|| stable_id.clone());

        Some(VoteRequestRow {
            event_id,
            stable_id,
            contract_id: record.contract_id.clone(),
            status: vote_status,
            is_closed,
            is_human: status::is_human(
                action_tag.as_deref(),
                fields.reason_body.as_deref(),
                fields.reason_url.as_deref(),
                accept_count + reject_count,
            ),
            action_tag,
            action_subject,
            proposal_id,
            semantic_key,
            requester: fields.requester,
            reason_body: fields.reason_body,
            reason_url: fields.reason_url,
            votes: fields.votes,
            accept_count,
            reject_count,
            vote_before: fields.vote_before,
            effective_at: record.effective_at,
            tracking_cid: fields.tracking_cid,
            updated_at: now,
        })
    }

    /// Decode and filter `files` one at a time, each under its own deadline.
    /// Per-file failures are logged and skipped, never fatal.
    async fn scan_files(&self, files: &[PathBuf], filter: ScanFilter) -> Vec<Record> {
        let mut matched = Vec::new();
        for path in files {
            let factory = Arc::clone(&self.factory);
            let task_path = path.clone();
            let task = tokio::task::spawn_blocking(move || -> Result<Vec<Record>> {
                let decoder = factory();
                let records = decoder.decode(&task_path)?;
                Ok(records.filter(|record| filter.matches(record)).collect())
            });
            match tokio::time::timeout(PER_FILE_TIMEOUT, task).await {
                Ok(Ok(Ok(mut records))) => matched.append(&mut records),
                Ok(Ok(Err(err))) => {
                    warn!("skipping {}: {}", path.display(), err);
                }
                Ok(Err(join_err)) => {
                    warn!("scan task for {} panicked: {}", path.display(), join_err);
                }
                Err(_) => {
                    warn!(
                        "skipping {}: read exceeded {:?}",
                        path.display(),
                        PER_FILE_TIMEOUT
                    );
                }
            }
        }
        matched
    }

    async fn persist_report(&self, report: &VoteRequestBuildReport) -> Result<()> {
        self.store
            .exec(
                "INSERT INTO vote_request_builds
                    (build_id, started_at, finished_at, create_events,
                     terminal_events, rows_written, named_payloads,
                     positional_payloads, unknown_choices, missing_roots,
                     success, error)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    SqlValue::Text(report.build_id.to_string()),
                    SqlValue::Text(ts_text(report.started_at)),
                    SqlValue::from(report.finished_at),
                    SqlValue::Int(report.create_events),
                    SqlValue::Int(report.terminal_events),
                    SqlValue::Int(report.rows_written),
                    SqlValue::Int(report.named_payloads),
                    SqlValue::Int(report.positional_payloads),
                    SqlValue::Int(report.unknown_choices),
                    SqlValue::Int(report.missing_roots),
                    SqlValue::Bool(report.success),
                    report.error.clone().map_or(SqlValue::Null, SqlValue::Text),
                ],
            )
            .await?;
        Ok(())
    }

    /// Clear a lock left behind by a crashed build.
    pub fn clear_stale_lock(&self, max_age: Duration) -> Result<bool> {
        FsLock::clear_stale(&self.paths, LOCK_NAME, max_age)
    }
}

fn row_values(row: &VoteRequestRow) -> Result<Vec<SqlValue>> {
    let votes = match &row.votes {
        Some(votes) => SqlValue::Text(serde_json::to_string(votes)?),
        None => SqlValue::Null,
    };
    Ok(vec![
        SqlValue::Text(row.event_id.clone()),
        SqlValue::Text(row.stable_id.clone()),
        SqlValue::from(row.contract_id.clone()),
        SqlValue::Text(row.status.as_str().to_string()),
        SqlValue::Bool(row.is_closed),
        SqlValue::from(row.action_tag.clone()),
        SqlValue::from(row.action_subject.clone()),
        SqlValue::Text(row.proposal_id.clone()),
        SqlValue::Text(row.semantic_key.clone()),
        SqlValue::Bool(row.is_human),
        SqlValue::from(row.requester.clone()),
        SqlValue::from(row.reason_body.clone()),
        SqlValue::from(row.reason_url.clone()),
        votes,
        SqlValue::Int(row.accept_count),
        SqlValue::Int(row.reject_count),
        SqlValue::from(row.vote_before),
        SqlValue::from(row.effective_at),
        SqlValue::from(row.tracking_cid.clone()),
        SqlValue::Text(ts_text(row.updated_at)),
    ])
}

/// Pull the proposal-root contract id out of a terminal exercise argument,
/// trying each known key in order.
fn extract_root_cid(argument: Option<&Value>) -> Option<String> {
    let argument = argument?;
    ROOT_CID_KEYS.iter().find_map(|key| {
        let value = get_key(argument, key)?;
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => value
                .get("contractId")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    })
}

/// The outcome tag of a terminal exercise result, wherever the result nests
/// it.
fn extract_outcome_tag(result: Option<&Value>) -> Option<String> {
    let result = result?;
    if let Some((tag, _)) = crate::payload::variant_parts(result) {
        return Some(tag.to_string());
    }
    let outcome = get_key(result, "outcome")?;
    crate::payload::variant_parts(outcome).map(|(tag, _)| tag.to_string())
}
