//! Read surface of the vote-request projection.

use std::str::FromStr;

use ledgerhouse_model::{CanonicalProposal, VoteRequestRow, VoteStatus};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::error::Result;
use crate::store::{AnalyticStore, SqlValue, ts_parse};

/// Filter for the canonical proposal listing.
#[derive(Debug, Clone, Default)]
pub struct CanonicalQuery {
    pub status: Option<VoteStatus>,
    pub human_only: bool,
    pub limit: i64,
    pub offset: i64,
}

impl CanonicalQuery {
    pub fn page(limit: i64, offset: i64) -> Self {
        Self { limit, offset, ..Self::default() }
    }
}

#[derive(Debug, Clone)]
pub struct VoteRequestQueries {
    store: AnalyticStore,
}

impl VoteRequestQueries {
    pub fn new(store: AnalyticStore) -> Self {
        Self { store }
    }

    /// Collapse rows by proposal id, returning the latest row per proposal
    /// with group statistics attached.
    pub async fn query_canonical_proposals(
        &self,
        query: CanonicalQuery,
    ) -> Result<Vec<CanonicalProposal>> {
        let mut sql = String::from(
            "SELECT * FROM (
                SELECT v.*,
                       ROW_NUMBER() OVER w AS rn,
                       COUNT(*) OVER p AS related_count,
                       MIN(effective_at) OVER p AS first_seen,
                       MAX(effective_at) OVER p AS last_seen,
                       MAX(accept_count) OVER p AS max_accept,
                       MAX(reject_count) OVER p AS max_reject
                FROM vote_requests v
                WINDOW p AS (PARTITION BY proposal_id),
                       w AS (PARTITION BY proposal_id
                             ORDER BY effective_at DESC, event_id DESC)
             ) WHERE rn = 1",
        );
        let mut params = Vec::new();
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            params.push(SqlValue::Text(status.as_str().to_string()));
        }
        if query.human_only {
            sql.push_str(" AND is_human = 1");
        }
        sql.push_str(" ORDER BY last_seen DESC, proposal_id LIMIT ? OFFSET ?");
        params.push(SqlValue::Int(if query.limit > 0 { query.limit } else { 50 }));
        params.push(SqlValue::Int(query.offset.max(0)));

        let rows = self.store.query(&sql, params).await?;
        rows.iter()
            .map(|row| {
                Ok(CanonicalProposal {
                    row: vote_row_from_row(row)?,
                    related_count: row.try_get("related_count")?,
                    first_seen: row
                        .try_get::<Option<String>, _>("first_seen")?
                        .as_deref()
                        .and_then(ts_parse),
                    last_seen: row
                        .try_get::<Option<String>, _>("last_seen")?
                        .as_deref()
                        .and_then(ts_parse),
                    max_accept: row.try_get("max_accept")?,
                    max_reject: row.try_get("max_reject")?,
                })
            })
            .collect()
    }

    /// Every row sharing one semantic key, oldest first - the full
    /// resubmission history of a logical proposal.
    pub async fn query_proposal_timeline(
        &self,
        semantic_key: &str,
    ) -> Result<Vec<VoteRequestRow>> {
        let rows = self
            .store
            .query(
                "SELECT * FROM vote_requests
                 WHERE semantic_key = ?
                 ORDER BY effective_at ASC, event_id ASC",
                vec![SqlValue::Text(semantic_key.to_string())],
            )
            .await?;
        rows.iter().map(vote_row_from_row).collect()
    }

    pub async fn get_by_event_id(&self, event_id: &str) -> Result<Option<VoteRequestRow>> {
        let row = self
            .store
            .query_one(
                "SELECT * FROM vote_requests WHERE event_id = ?",
                vec![SqlValue::Text(event_id.to_string())],
            )
            .await?;
        row.as_ref().map(vote_row_from_row).transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        self.store
            .query_scalar_i64("SELECT COUNT(*) FROM vote_requests", vec![])
            .await
    }
}

pub(crate) fn vote_row_from_row(row: &SqliteRow) -> Result<VoteRequestRow> {
    let status = VoteStatus::from_str(&row.try_get::<String, _>("status")?)?;
    let votes = row
        .try_get::<Option<String>, _>("votes")?
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok());
    Ok(VoteRequestRow {
        event_id: row.try_get("event_id")?,
        stable_id: row.try_get("stable_id")?,
        contract_id: row.try_get("contract_id")?,
        status,
        is_closed: row.try_get("is_closed")?,
        action_tag: row.try_get("action_tag")?,
        action_subject: row.try_get("action_subject")?,
        proposal_id: row.try_get("proposal_id")?,
        semantic_key: row.try_get("semantic_key")?,
        is_human: row.try_get("is_human")?,
        requester: row.try_get("requester")?,
        reason_body: row.try_get("reason_body")?,
        reason_url: row.try_get("reason_url")?,
        votes,
        accept_count: row.try_get("accept_count")?,
        reject_count: row.try_get("reject_count")?,
        vote_before: row
            .try_get::<Option<String>, _>("vote_before")?
            .as_deref()
            .and_then(ts_parse),
        effective_at: row
            .try_get::<Option<String>, _>("effective_at")?
            .as_deref()
            .and_then(ts_parse),
        tracking_cid: row.try_get("tracking_cid")?,
        updated_at: row
            .try_get::<Option<String>, _>("updated_at")?
            .as_deref()
            .and_then(ts_parse)
            .unwrap_or_else(chrono::Utc::now),
    })
}
