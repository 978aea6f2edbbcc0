use serde::{Deserialize, Serialize};

/// Outcome of one aggregation inside `update_all`.
///
/// A failed aggregation is captured here instead of propagating so one bad
/// aggregation cannot block the others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum AggregationOutcome {
    /// Aggregation ran and accounted `files` new files.
    Updated { files: i64 },
    /// Watermark already at the newest ingested file.
    NoNewData,
    Error(String),
}

/// One row of the event-type counts aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeCount {
    pub event_type: String,
    pub event_count: i64,
}
