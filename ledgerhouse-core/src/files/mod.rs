//! Raw-file discovery and per-file ingestion state.
//!
//! The scanner walks `<data>/raw`, recognizes record files by naming
//! convention, and upserts one `raw_files` row per path. Rows are created
//! exactly once per path; only the ingestor finalizes them, and nothing
//! deletes them during normal operation.

mod naming;

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use ledgerhouse_config::DataPaths;
use ledgerhouse_model::{FileKind, FileStatsRow, RawFile, ScanSummary};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{debug, info, warn};

use crate::error::{Result, WarehouseError};
use crate::store::{AnalyticStore, SqlValue, ts_parse, ts_text};
pub use naming::{ParsedPath, RAW_SUFFIX, parse_path};

#[derive(Debug, Clone)]
pub struct FileIndex {
    store: AnalyticStore,
    paths: DataPaths,
}

impl FileIndex {
    pub fn new(store: AnalyticStore, paths: DataPaths) -> Self {
        Self { store, paths }
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    /// Walk the raw directory and index newly discovered record files.
    ///
    /// Idempotent on an unchanged tree: a path is indexed at most once.
    pub async fn scan_and_index(&self) -> Result<ScanSummary> {
        let discovered = self.walk_raw_dir().await?;
        let known = self.known_paths().await?;

        let mut new_files = 0u64;
        for rel_path in &discovered {
            if known.contains(rel_path) {
                continue;
            }
            let Some(parsed) = naming::parse_path(rel_path) else {
                // Suffix matched but prefix did not; walk_raw_dir filters
                // these already, so this is just belt and braces.
                continue;
            };
            let inserted = self
                .store
                .exec(
                    "INSERT OR IGNORE INTO raw_files
                        (path, file_type, migration_id, record_date)
                     VALUES (?, ?, ?, ?)",
                    vec![
                        SqlValue::Text(rel_path.clone()),
                        SqlValue::Text(parsed.kind.as_str().to_string()),
                        SqlValue::from(parsed.migration_id),
                        parsed
                            .record_date
                            .map_or(SqlValue::Null, |d| SqlValue::Text(d.to_string())),
                    ],
                )
                .await?;
            new_files += inserted;
        }

        let summary = ScanSummary { total_files: discovered.len() as u64, new_files };
        if summary.new_files > 0 {
            info!(
                "scan indexed {} new files ({} total on disk)",
                summary.new_files, summary.total_files
            );
        } else {
            debug!("scan found no new files ({} total on disk)", summary.total_files);
        }
        Ok(summary)
    }

    /// Recursive walk collecting recognized record files as normalized
    /// relative paths. Unreadable subtrees are logged and skipped.
    async fn walk_raw_dir(&self) -> Result<Vec<String>> {
        let raw_root = self.paths.raw_dir();
        let mut found = Vec::new();
        if !raw_root.is_dir() {
            debug!("raw directory {} does not exist yet", raw_root.display());
            return Ok(found);
        }

        let mut stack: Vec<PathBuf> = vec![raw_root];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("skipping unreadable directory {}: {}", dir.display(), err);
                    continue;
                }
            };
            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        match entry.file_type().await {
                            Ok(ft) if ft.is_dir() => stack.push(path),
                            Ok(ft) if ft.is_file() => {
                                let rel = self.paths.normalize_for_store(&path);
                                if naming::parse_path(&rel).is_some() {
                                    found.push(rel);
                                }
                            }
                            Ok(_) => {}
                            Err(err) => {
                                warn!("skipping {}: {}", path.display(), err);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!("skipping remainder of {}: {}", dir.display(), err);
                        break;
                    }
                }
            }
        }
        found.sort();
        Ok(found)
    }

    async fn known_paths(&self) -> Result<HashSet<String>> {
        let rows = self.store.query("SELECT path FROM raw_files", vec![]).await?;
        rows.iter()
            .map(|row| Ok(row.try_get::<String, _>("path")?))
            .collect()
    }

    /// Per-(kind, ingested) counts and record totals.
    pub async fn get_file_stats(&self) -> Result<Vec<FileStatsRow>> {
        let rows = self
            .store
            .query(
                "SELECT file_type, ingested,
                        COUNT(*) AS file_count,
                        COALESCE(SUM(record_count), 0) AS record_count
                 FROM raw_files
                 GROUP BY file_type, ingested
                 ORDER BY file_type, ingested",
                vec![],
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(FileStatsRow {
                    kind: FileKind::from_str(&row.try_get::<String, _>("file_type")?)?,
                    ingested: row.try_get::<bool, _>("ingested")?,
                    file_count: row.try_get("file_count")?,
                    record_count: row.try_get("record_count")?,
                })
            })
            .collect()
    }

    pub async fn get_pending_file_count(&self) -> Result<i64> {
        self.store
            .query_scalar_i64("SELECT COUNT(*) FROM raw_files WHERE ingested = 0", vec![])
            .await
    }

    pub async fn get_file(&self, file_id: i64) -> Result<Option<RawFile>> {
        let row = self
            .store
            .query_one(
                "SELECT * FROM raw_files WHERE file_id = ?",
                vec![SqlValue::Int(file_id)],
            )
            .await?;
        row.map(|r| raw_file_from_row(&r)).transpose()
    }

    pub async fn get_file_by_path(&self, path: &str) -> Result<Option<RawFile>> {
        let row = self
            .store
            .query_one(
                "SELECT * FROM raw_files WHERE path = ?",
                vec![SqlValue::Text(path.to_string())],
            )
            .await?;
        row.map(|r| raw_file_from_row(&r)).transpose()
    }

    pub async fn list_files(&self, limit: i64, offset: i64) -> Result<Vec<RawFile>> {
        let rows = self
            .store
            .query(
                "SELECT * FROM raw_files
                 ORDER BY file_id
                 LIMIT ? OFFSET ?",
                vec![SqlValue::Int(limit), SqlValue::Int(offset)],
            )
            .await?;
        rows.iter().map(raw_file_from_row).collect()
    }

    /// Non-ingested files in ingestion order: oldest record date first,
    /// dateless files last, ties broken by discovery order.
    pub async fn pending_files(&self, limit: i64) -> Result<Vec<RawFile>> {
        let rows = self
            .store
            .query(
                "SELECT * FROM raw_files
                 WHERE ingested = 0
                 ORDER BY record_date IS NULL, record_date ASC, file_id ASC
                 LIMIT ?",
                vec![SqlValue::Int(limit)],
            )
            .await?;
        rows.iter().map(raw_file_from_row).collect()
    }

    /// Finalize a fully ingested file. The only mutation path for the
    /// `record_count`/`min_ts`/`max_ts` columns.
    pub async fn finalize_file(
        &self,
        file_id: i64,
        record_count: i64,
        min_ts: Option<chrono::DateTime<Utc>>,
        max_ts: Option<chrono::DateTime<Utc>>,
    ) -> Result<()> {
        let updated = self
            .store
            .exec(
                "UPDATE raw_files
                 SET record_count = ?, min_ts = ?, max_ts = ?,
                     ingested = 1, ingested_at = ?
                 WHERE file_id = ? AND ingested = 0",
                vec![
                    SqlValue::Int(record_count),
                    SqlValue::from(min_ts),
                    SqlValue::from(max_ts),
                    SqlValue::Text(ts_text(Utc::now())),
                    SqlValue::Int(file_id),
                ],
            )
            .await?;
        if updated == 0 {
            return Err(WarehouseError::Internal(format!(
                "file {file_id} was already finalized or does not exist"
            )));
        }
        Ok(())
    }

    /// Un-finalize a file and drop its raw rows. The only sanctioned path to
    /// re-ingestion.
    pub async fn reset_file(&self, file_id: i64) -> Result<bool> {
        let Some(file) = self.get_file(file_id).await? else {
            return Ok(false);
        };
        self.store
            .exec(
                &format!("DELETE FROM {} WHERE _file_id = ?", file.kind.table()),
                vec![SqlValue::Int(file_id)],
            )
            .await?;
        self.store
            .exec(
                "UPDATE raw_files
                 SET record_count = 0, min_ts = NULL, max_ts = NULL,
                     ingested = 0, ingested_at = NULL
                 WHERE file_id = ?",
                vec![SqlValue::Int(file_id)],
            )
            .await?;
        info!("reset file {} ({})", file_id, file.path);
        Ok(true)
    }
}

pub(crate) fn raw_file_from_row(row: &SqliteRow) -> Result<RawFile> {
    let kind = FileKind::from_str(&row.try_get::<String, _>("file_type")?)?;
    let record_date = row
        .try_get::<Option<String>, _>("record_date")?
        .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok());
    Ok(RawFile {
        file_id: row.try_get("file_id")?,
        path: row.try_get("path")?,
        kind,
        migration_id: row.try_get("migration_id")?,
        record_date,
        record_count: row.try_get("record_count")?,
        min_ts: row
            .try_get::<Option<String>, _>("min_ts")?
            .as_deref()
            .and_then(ts_parse),
        max_ts: row
            .try_get::<Option<String>, _>("max_ts")?
            .as_deref()
            .and_then(ts_parse),
        ingested: row.try_get("ingested")?,
        ingested_at: row
            .try_get::<Option<String>, _>("ingested_at")?
            .as_deref()
            .and_then(ts_parse),
    })
}
