use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a long-running index build treats existing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Truncate and rebuild from scratch.
    Force,
    /// Only visit files not yet present in the index.
    Incremental,
}

/// Per-template tally produced while sweeping a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCount {
    pub template_name: String,
    pub event_count: i64,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// One row of the template→file inverted index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateFileRow {
    pub file_path: String,
    pub template_name: String,
    pub event_count: i64,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Cross-file summary for one template name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub template_name: String,
    pub total_events: i64,
    pub file_count: i64,
}

/// Singleton build-state row for the template→file index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateIndexState {
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub total_files_indexed: i64,
    pub total_templates_found: i64,
    pub build_duration_seconds: f64,
}
