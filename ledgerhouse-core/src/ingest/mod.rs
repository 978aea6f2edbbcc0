//! Streaming ingestion of decoded records into the raw tables.
//!
//! Decoding runs on a blocking thread and hands fixed-size batches to the
//! async side through a bounded channel, so memory stays bounded regardless
//! of file size. Bulk inserts are the only write path for raw rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledgerhouse_config::DataPaths;
use ledgerhouse_model::{IngestSummary, RawFile, Record};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::decode::RecordDecoder;
use crate::error::{Result, WarehouseError};
use crate::files::FileIndex;
use crate::store::{AnalyticStore, SqlValue, ts_text};

/// Records accumulated before a bulk insert is issued.
pub const BATCH_SIZE: usize = 2000;

/// Rows per INSERT statement; bounded so the per-statement host-parameter
/// count stays well under SQLite's limit.
const ROWS_PER_STATEMENT: usize = 250;

pub(crate) const RAW_COLUMNS: [&str; 17] = [
    "event_id",
    "update_id",
    "contract_id",
    "template_id",
    "event_type",
    "consuming",
    "choice",
    "effective_at",
    "recorded_at",
    "signatories",
    "observers",
    "acting_parties",
    "payload",
    "exercise_argument",
    "exercise_result",
    "synchronizer_id",
    "_file_id",
];

#[derive(Clone)]
pub struct Ingestor {
    store: AnalyticStore,
    file_index: FileIndex,
    paths: DataPaths,
    decoder: Arc<dyn RecordDecoder>,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor").field("paths", &self.paths).finish()
    }
}

impl Ingestor {
    pub fn new(
        store: AnalyticStore,
        file_index: FileIndex,
        paths: DataPaths,
        decoder: Arc<dyn RecordDecoder>,
    ) -> Self {
        Self { store, file_index, paths, decoder }
    }

    /// Ingest up to `max_files` pending files, oldest record date first.
    ///
    /// A failed file is left un-finalized with its partial rows removed; the
    /// next cycle may retry it. Failures never abort the pass.
    pub async fn ingest_new_files(&self, max_files: u32) -> Result<IngestSummary> {
        let pending = self.file_index.pending_files(i64::from(max_files)).await?;
        let mut summary = IngestSummary::default();

        for file in pending {
            match self.ingest_file(&file).await {
                Ok(records) => {
                    summary.files += 1;
                    summary.records += records;
                }
                Err(err) => {
                    error!("ingest of {} failed: {}", file.path, err);
                    summary.failed += 1;
                    if let Err(cleanup) = self.discard_partial(&file).await {
                        warn!(
                            "could not discard partial rows for {}: {}",
                            file.path, cleanup
                        );
                    }
                }
            }
        }

        if summary.files > 0 {
            info!(
                "ingested {} files ({} records, {} failed)",
                summary.files, summary.records, summary.failed
            );
        }
        Ok(summary)
    }

    async fn ingest_file(&self, file: &RawFile) -> Result<u64> {
        let abs_path = self.paths.resolve_raw(&file.path);
        let decoder = Arc::clone(&self.decoder);

        let (tx, mut rx) = mpsc::channel::<Vec<Record>>(2);
        let decode_task = tokio::task::spawn_blocking(move || -> Result<()> {
            let records = decoder.decode(&abs_path)?;
            let mut batch = Vec::with_capacity(BATCH_SIZE);
            for record in records {
                batch.push(record);
                if batch.len() >= BATCH_SIZE {
                    if tx.blocking_send(std::mem::take(&mut batch)).is_err() {
                        // Receiver dropped: insert side failed, stop decoding.
                        return Ok(());
                    }
                    batch = Vec::with_capacity(BATCH_SIZE);
                }
            }
            if !batch.is_empty() {
                let _ = tx.blocking_send(batch);
            }
            Ok(())
        });

        let table = file.kind.table();
        let mut count = 0u64;
        let mut min_ts: Option<DateTime<Utc>> = None;
        let mut max_ts: Option<DateTime<Utc>> = None;

        let insert_result: Result<()> = async {
            while let Some(batch) = rx.recv().await {
                count += batch.len() as u64;
                for record in &batch {
                    if let Some(ts) = record.recorded_at.or(record.effective_at) {
                        min_ts = Some(min_ts.map_or(ts, |m| m.min(ts)));
                        max_ts = Some(max_ts.map_or(ts, |m| m.max(ts)));
                    }
                }
                let rows: Vec<Vec<SqlValue>> = batch
                    .iter()
                    .map(|record| record_to_row(record, file.file_id))
                    .collect::<Result<_>>()?;
                self.store
                    .bulk_insert(table, &RAW_COLUMNS, &rows, ROWS_PER_STATEMENT)
                    .await?;
            }
            Ok(())
        }
        .await;

        // Drain the channel before joining so the decoder cannot deadlock on
        // a full channel if the insert side bailed early.
        drop(rx);
        let decode_result = decode_task
            .await
            .map_err(|join| WarehouseError::Internal(format!("decode task panicked: {join}")))?;

        insert_result?;
        decode_result?;

        self.file_index
            .finalize_file(file.file_id, count as i64, min_ts, max_ts)
            .await?;
        Ok(count)
    }

    async fn discard_partial(&self, file: &RawFile) -> Result<()> {
        self.store
            .exec(
                &format!("DELETE FROM {} WHERE _file_id = ?", file.kind.table()),
                vec![SqlValue::Int(file.file_id)],
            )
            .await?;
        Ok(())
    }
}

fn record_to_row(record: &Record, file_id: i64) -> Result<Vec<SqlValue>> {
    let json_or_null = |value: &Option<serde_json::Value>| -> Result<SqlValue> {
        Ok(match value {
            Some(v) => SqlValue::Text(serde_json::to_string(v)?),
            None => SqlValue::Null,
        })
    };
    let parties = |list: &[String]| -> Result<SqlValue> {
        Ok(SqlValue::Text(serde_json::to_string(list)?))
    };

    Ok(vec![
        SqlValue::from(record.event_id.clone()),
        SqlValue::from(record.update_id.clone()),
        SqlValue::from(record.contract_id.clone()),
        SqlValue::from(record.template_id.clone()),
        record
            .event_type
            .as_ref()
            .map_or(SqlValue::Null, |t| SqlValue::Text(t.as_str().to_string())),
        record.consuming.map_or(SqlValue::Null, SqlValue::Bool),
        SqlValue::from(record.choice.clone()),
        record.effective_at.map_or(SqlValue::Null, |ts| SqlValue::Text(ts_text(ts))),
        record.recorded_at.map_or(SqlValue::Null, |ts| SqlValue::Text(ts_text(ts))),
        parties(&record.signatories)?,
        parties(&record.observers)?,
        parties(&record.acting_parties)?,
        json_or_null(&record.payload)?,
        json_or_null(&record.exercise_argument)?,
        json_or_null(&record.exercise_result)?,
        SqlValue::from(record.synchronizer_id.clone()),
        SqlValue::Int(file_id),
    ])
}
