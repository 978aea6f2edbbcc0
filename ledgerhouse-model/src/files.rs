use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Kind of raw record file, inferred from the filename prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Events,
    Updates,
}

impl FileKind {
    /// Classify a bare filename by its prefix; `None` for unrecognized names.
    pub fn from_filename(name: &str) -> Option<Self> {
        if name.starts_with("events-") {
            Some(Self::Events)
        } else if name.starts_with("updates-") {
            Some(Self::Updates)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Updates => "updates",
        }
    }

    /// Raw table this kind of file ingests into.
    pub fn table(self) -> &'static str {
        match self {
            Self::Events => "events_raw",
            Self::Updates => "updates_raw",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "events" => Ok(Self::Events),
            "updates" => Ok(Self::Updates),
            other => Err(ModelError::InvalidFileKind(other.to_string())),
        }
    }
}

/// One discovered record file and its ingestion state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFile {
    pub file_id: i64,
    /// Normalized to forward slashes, relative to the raw root.
    pub path: String,
    pub kind: FileKind,
    pub migration_id: Option<i64>,
    pub record_date: Option<NaiveDate>,
    pub record_count: i64,
    pub min_ts: Option<DateTime<Utc>>,
    pub max_ts: Option<DateTime<Utc>>,
    pub ingested: bool,
    pub ingested_at: Option<DateTime<Utc>>,
}

/// Result of one scanner pass over the raw directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_files: u64,
    pub new_files: u64,
}

/// Per-(kind, ingested) statistics over the file index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStatsRow {
    pub kind: FileKind,
    pub ingested: bool,
    pub file_count: i64,
    pub record_count: i64,
}

/// Result of one ingest pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub files: u64,
    pub records: u64,
    pub failed: u64,
}
