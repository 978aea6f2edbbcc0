//! Core data model definitions shared across Ledgerhouse crates.
#![allow(missing_docs)]

pub mod aggregation;
pub mod error;
pub mod files;
pub mod governance;
pub mod intervals;
pub mod progress;
pub mod record;
pub mod rewards;
pub mod template;

// Intentionally curated re-exports for downstream consumers.
pub use aggregation::{AggregationOutcome, EventTypeCount};
pub use error::{ModelError, Result as ModelResult};
pub use files::{FileKind, FileStatsRow, IngestSummary, RawFile, ScanSummary};
pub use governance::{
    CanonicalProposal, VoteRequestBuildReport, VoteRequestRow, VoteStatus,
};
pub use intervals::{
    DropCounters, DsoRulesInterval, SvInterval, VotingThresholds,
};
pub use progress::{BuildPhase, BuildProgress, TaskState, TaskStatus};
pub use record::{EventType, Record};
pub use rewards::{
    BeneficiarySummary, CouponKind, IssuanceRates, RewardCoupon,
};
pub use template::{
    BuildMode, TemplateCount, TemplateFileRow, TemplateIndexState,
    TemplateSummary,
};
