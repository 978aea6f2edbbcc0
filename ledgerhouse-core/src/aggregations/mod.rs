//! Watermarked incremental aggregations over the raw tables.
//!
//! Each named aggregation tracks the last file id it has accounted for. An
//! update reads only rows from files in `(watermark, max_ingested]`, merges
//! the group-by into its result table, and advances the watermark inside the
//! same transaction - at-most-once accounting per file.

use std::collections::BTreeMap;

use chrono::Utc;
use ledgerhouse_model::{AggregationOutcome, EventTypeCount};
use sqlx::Row;
use tracing::{debug, info};

use crate::error::Result;
use crate::store::{AnalyticStore, SqlValue, ts_text, with_backoff};

pub const EVENT_TYPE_COUNTS: &str = "event_type_counts";
pub const DAILY_ACTIVITY: &str = "daily_activity";

/// Per-aggregation watermark access.
#[derive(Debug, Clone)]
pub struct Watermarks {
    store: AnalyticStore,
}

impl Watermarks {
    pub fn new(store: AnalyticStore) -> Self {
        Self { store }
    }

    /// Stored watermark for `name`, 0 when the aggregation never ran.
    pub async fn last_file_id(&self, name: &str) -> Result<i64> {
        self.store
            .query_scalar_i64(
                "SELECT COALESCE(
                    (SELECT last_file_id FROM aggregation_state WHERE agg_name = ?), 0)",
                vec![SqlValue::Text(name.to_string())],
            )
            .await
    }

    /// Highest ingested file id, 0 when nothing is ingested yet.
    pub async fn max_ingested_file_id(&self) -> Result<i64> {
        self.store
            .query_scalar_i64(
                "SELECT COALESCE(MAX(file_id), 0) FROM raw_files WHERE ingested = 1",
                vec![],
            )
            .await
    }

    pub async fn has_new_data(&self, name: &str) -> Result<bool> {
        Ok(self.last_file_id(name).await? < self.max_ingested_file_id().await?)
    }
}

/// The engine's cheap incremental aggregations.
#[derive(Debug, Clone)]
pub struct Aggregations {
    store: AnalyticStore,
    watermarks: Watermarks,
}

impl Aggregations {
    pub fn new(store: AnalyticStore) -> Self {
        let watermarks = Watermarks::new(store.clone());
        Self { store, watermarks }
    }

    pub fn watermarks(&self) -> &Watermarks {
        &self.watermarks
    }

    /// Merge event-type counts for newly ingested files.
    ///
    /// Returns the full current tally, or `None` when the watermark was
    /// already at the newest ingested file.
    pub async fn update_event_type_counts(&self) -> Result<Option<Vec<EventTypeCount>>> {
        let low = self.watermarks.last_file_id(EVENT_TYPE_COUNTS).await?;
        let high = self.watermarks.max_ingested_file_id().await?;
        if high <= low {
            debug!("event_type_counts: no new data (watermark {low})");
            return Ok(None);
        }

        let _guard = self.store.write_guard().await;
        let mut tx = self.store.pool().begin().await?;

        let groups = sqlx::query(
            "SELECT COALESCE(event_type, 'unknown') AS event_type,
                    COUNT(*) AS event_count
             FROM events_raw
             WHERE _file_id > ? AND _file_id <= ?
             GROUP BY COALESCE(event_type, 'unknown')",
        )
        .bind(low)
        .bind(high)
        .fetch_all(&mut *tx)
        .await?;

        for row in &groups {
            let event_type: String = row.try_get("event_type")?;
            let event_count: i64 = row.try_get("event_count")?;
            sqlx::query(
                "INSERT INTO event_type_counts (event_type, event_count)
                 VALUES (?, ?)
                 ON CONFLICT(event_type)
                 DO UPDATE SET event_count = event_count + excluded.event_count",
            )
            .bind(&event_type)
            .bind(event_count)
            .execute(&mut *tx)
            .await?;
        }

        advance_watermark(&mut tx, EVENT_TYPE_COUNTS, high).await?;
        tx.commit().await?;

        let counts = sqlx::query(
            "SELECT event_type, event_count FROM event_type_counts
             ORDER BY event_count DESC, event_type",
        )
        .fetch_all(self.store.pool())
        .await?;
        let counts = counts
            .iter()
            .map(|row| {
                Ok(EventTypeCount {
                    event_type: row.try_get("event_type")?,
                    event_count: row.try_get("event_count")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        info!(
            "event_type_counts advanced to file {high} ({} types tracked)",
            counts.len()
        );
        Ok(Some(counts))
    }

    /// Merge per-day event counts for newly ingested files. Returns the
    /// number of days touched, `None` when the watermark is current.
    pub async fn update_daily_activity(&self) -> Result<Option<i64>> {
        let low = self.watermarks.last_file_id(DAILY_ACTIVITY).await?;
        let high = self.watermarks.max_ingested_file_id().await?;
        if high <= low {
            return Ok(None);
        }

        let _guard = self.store.write_guard().await;
        let mut tx = self.store.pool().begin().await?;

        let groups = sqlx::query(
            "SELECT substr(recorded_at, 1, 10) AS day, COUNT(*) AS event_count
             FROM events_raw
             WHERE _file_id > ? AND _file_id <= ? AND recorded_at IS NOT NULL
             GROUP BY substr(recorded_at, 1, 10)",
        )
        .bind(low)
        .bind(high)
        .fetch_all(&mut *tx)
        .await?;

        for row in &groups {
            let day: String = row.try_get("day")?;
            let event_count: i64 = row.try_get("event_count")?;
            sqlx::query(
                "INSERT INTO daily_activity (day, event_count)
                 VALUES (?, ?)
                 ON CONFLICT(day)
                 DO UPDATE SET event_count = event_count + excluded.event_count",
            )
            .bind(&day)
            .bind(event_count)
            .execute(&mut *tx)
            .await?;
        }

        advance_watermark(&mut tx, DAILY_ACTIVITY, high).await?;
        tx.commit().await?;
        Ok(Some(groups.len() as i64))
    }

    /// Run every aggregation, best effort. A failed aggregation lands in the
    /// result map as an error instead of blocking the rest.
    pub async fn update_all(&self) -> BTreeMap<String, AggregationOutcome> {
        let mut outcomes = BTreeMap::new();

        let files_pending = |name: &'static str| async move {
            let low = self.watermarks.last_file_id(name).await?;
            let high = self.watermarks.max_ingested_file_id().await?;
            self.store
                .query_scalar_i64(
                    "SELECT COUNT(*) FROM raw_files
                     WHERE ingested = 1 AND file_id > ? AND file_id <= ?",
                    vec![SqlValue::Int(low), SqlValue::Int(high)],
                )
                .await
        };

        let files = files_pending(EVENT_TYPE_COUNTS).await.unwrap_or(0);
        let outcome = match with_backoff(EVENT_TYPE_COUNTS, || self.update_event_type_counts())
            .await
        {
            Ok(Some(_)) => AggregationOutcome::Updated { files },
            Ok(None) => AggregationOutcome::NoNewData,
            Err(err) => AggregationOutcome::Error(err.to_string()),
        };
        outcomes.insert(EVENT_TYPE_COUNTS.to_string(), outcome);

        let files = files_pending(DAILY_ACTIVITY).await.unwrap_or(0);
        let outcome = match with_backoff(DAILY_ACTIVITY, || self.update_daily_activity()).await
        {
            Ok(Some(_)) => AggregationOutcome::Updated { files },
            Ok(None) => AggregationOutcome::NoNewData,
            Err(err) => AggregationOutcome::Error(err.to_string()),
        };
        outcomes.insert(DAILY_ACTIVITY.to_string(), outcome);

        outcomes
    }
}

async fn advance_watermark(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    name: &str,
    file_id: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO aggregation_state (agg_name, last_file_id, updated_at)
         VALUES (?, ?, ?)
         ON CONFLICT(agg_name)
         DO UPDATE SET last_file_id = excluded.last_file_id,
                       updated_at = excluded.updated_at",
    )
    .bind(name)
    .bind(file_id)
    .bind(ts_text(Utc::now()))
    .execute(&mut **tx)
    .await?;
    Ok(())
}
