use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;

/// Lifecycle of a governance proposal.
///
/// Only the presence of a consuming exercise on the proposal-root contract is
/// authoritative for the terminal states; vote tallies are display-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    InProgress,
    Executed,
    Rejected,
    Expired,
}

impl VoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Executed => "executed",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for VoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VoteStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "executed" => Ok(Self::Executed),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

/// One row per created proposal-root contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequestRow {
    pub event_id: String,
    /// Fallback identity: contract id, else event id.
    pub stable_id: String,
    pub contract_id: Option<String>,
    pub status: VoteStatus,
    /// Consumed on-ledger.
    pub is_closed: bool,
    pub action_tag: Option<String>,
    pub action_subject: Option<String>,
    /// `tracking_cid` when present, else `contract_id`; groups migrations and
    /// resubmissions of one logical proposal.
    pub proposal_id: String,
    pub semantic_key: String,
    pub is_human: bool,
    pub requester: Option<String>,
    pub reason_body: Option<String>,
    pub reason_url: Option<String>,
    /// Serialized vote list as carried by the payload.
    pub votes: Option<serde_json::Value>,
    pub accept_count: i64,
    pub reject_count: i64,
    pub vote_before: Option<DateTime<Utc>>,
    pub effective_at: Option<DateTime<Utc>>,
    pub tracking_cid: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Latest row per proposal id, with group statistics attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalProposal {
    pub row: VoteRequestRow,
    pub related_count: i64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub max_accept: i64,
    pub max_reject: i64,
}

/// Summary of one vote-request projection build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequestBuildReport {
    pub build_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub create_events: i64,
    pub terminal_events: i64,
    pub rows_written: i64,
    /// Payloads that arrived with named fields.
    pub named_payloads: i64,
    /// Payloads that arrived as positional records.
    pub positional_payloads: i64,
    /// Terminal exercises whose choice could not be mapped to an outcome.
    pub unknown_choices: i64,
    /// Terminal exercises whose argument carried no proposal-root reference.
    pub missing_roots: i64,
    pub success: bool,
    pub error: Option<String>,
}

impl VoteRequestBuildReport {
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            build_id: Uuid::now_v7(),
            started_at: now,
            finished_at: None,
            create_events: 0,
            terminal_events: 0,
            rows_written: 0,
            named_payloads: 0,
            positional_payloads: 0,
            unknown_choices: 0,
            missing_roots: 0,
            success: false,
            error: None,
        }
    }
}
