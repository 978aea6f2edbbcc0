//! Cursor-paginated read surface over the raw tables.
//!
//! The cursor is the last `recorded_at` seen; pages descend strictly below
//! it, so a consumer can walk the stream without ever re-reading a row.

use chrono::{DateTime, Utc};
use ledgerhouse_model::FileKind;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::error::Result;
use crate::store::{AnalyticStore, SqlValue, ts_parse, ts_text};

/// Filterable page request over one raw table.
#[derive(Debug, Clone)]
pub struct EventStreamRequest {
    pub kind: FileKind,
    /// Exclusive upper bound: rows strictly older than this.
    pub cursor: Option<DateTime<Utc>>,
    pub page_size: i64,
    /// Substring match on `template_id`.
    pub template_filter: Option<String>,
    pub event_type: Option<String>,
}

impl Default for EventStreamRequest {
    fn default() -> Self {
        Self {
            kind: FileKind::Events,
            cursor: None,
            page_size: 100,
            template_filter: None,
            event_type: None,
        }
    }
}

/// Slim row shape for streaming; payloads stay in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRowLite {
    pub event_id: Option<String>,
    pub update_id: Option<String>,
    pub contract_id: Option<String>,
    pub template_id: Option<String>,
    pub event_type: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
    pub effective_at: Option<DateTime<Utc>>,
    pub file_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    pub rows: Vec<EventRowLite>,
    /// Pass back as the next request's cursor; `None` when drained.
    pub next_cursor: Option<DateTime<Utc>>,
}

/// Per-template-id event tallies over one raw table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateIdCount {
    pub template_id: String,
    pub event_count: i64,
}

#[derive(Debug, Clone)]
pub struct EventQueries {
    store: AnalyticStore,
}

impl EventQueries {
    pub fn new(store: AnalyticStore) -> Self {
        Self { store }
    }

    /// One page of the stream, newest first, strictly below the cursor.
    pub async fn stream_page(&self, request: EventStreamRequest) -> Result<EventPage> {
        let mut sql = format!(
            "SELECT event_id, update_id, contract_id, template_id, event_type,
                    recorded_at, effective_at, _file_id
             FROM {}
             WHERE recorded_at IS NOT NULL",
            request.kind.table()
        );
        let mut params = Vec::new();
        if let Some(cursor) = request.cursor {
            sql.push_str(" AND recorded_at < ?");
            params.push(SqlValue::Text(ts_text(cursor)));
        }
        if let Some(template) = &request.template_filter {
            sql.push_str(" AND template_id LIKE '%' || ? || '%'");
            params.push(SqlValue::Text(template.clone()));
        }
        if let Some(event_type) = &request.event_type {
            sql.push_str(" AND event_type = ?");
            params.push(SqlValue::Text(event_type.clone()));
        }
        sql.push_str(" ORDER BY recorded_at DESC LIMIT ?");
        params.push(SqlValue::Int(request.page_size.clamp(1, 10_000)));

        let rows = self.store.query(&sql, params).await?;
        let rows: Vec<EventRowLite> = rows
            .iter()
            .map(|row| {
                Ok(EventRowLite {
                    event_id: row.try_get("event_id")?,
                    update_id: row.try_get("update_id")?,
                    contract_id: row.try_get("contract_id")?,
                    template_id: row.try_get("template_id")?,
                    event_type: row.try_get("event_type")?,
                    recorded_at: row
                        .try_get::<Option<String>, _>("recorded_at")?
                        .as_deref()
                        .and_then(ts_parse),
                    effective_at: row
                        .try_get::<Option<String>, _>("effective_at")?
                        .as_deref()
                        .and_then(ts_parse),
                    file_id: row.try_get("_file_id")?,
                })
            })
            .collect::<Result<_>>()?;

        let next_cursor = if (rows.len() as i64) < request.page_size.clamp(1, 10_000) {
            None
        } else {
            rows.last().and_then(|row| row.recorded_at)
        };
        Ok(EventPage { rows, next_cursor })
    }

    pub async fn count(
        &self,
        kind: FileKind,
        template_filter: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<i64> {
        let mut sql = format!("SELECT COUNT(*) FROM {} WHERE 1 = 1", kind.table());
        let mut params = Vec::new();
        if let Some(template) = template_filter {
            sql.push_str(" AND template_id LIKE '%' || ? || '%'");
            params.push(SqlValue::Text(template.to_string()));
        }
        if let Some(event_type) = event_type {
            sql.push_str(" AND event_type = ?");
            params.push(SqlValue::Text(event_type.to_string()));
        }
        self.store.query_scalar_i64(&sql, params).await
    }

    /// Distinct template ids with event counts, busiest first.
    pub async fn templates(&self, kind: FileKind) -> Result<Vec<TemplateIdCount>> {
        let sql = format!(
            "SELECT template_id, COUNT(*) AS event_count
             FROM {}
             WHERE template_id IS NOT NULL
             GROUP BY template_id
             ORDER BY event_count DESC, template_id",
            kind.table()
        );
        let rows = self.store.query(&sql, vec![]).await?;
        rows.iter()
            .map(|row| {
                Ok(TemplateIdCount {
                    template_id: row.try_get("template_id")?,
                    event_count: row.try_get("event_count")?,
                })
            })
            .collect()
    }
}
