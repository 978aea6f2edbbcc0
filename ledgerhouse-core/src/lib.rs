//! Core library for the Ledgerhouse warehouse engine.
//!
//! The engine discovers framed-compressed ledger record files under a raw
//! directory, streams them into an embedded analytic store, maintains a
//! template→file inverted index, and materializes governance projections
//! (vote requests, super-validator intervals, reward coupons) on top of it.
//!
//! Modules follow the data flow:
//!
//! - [`decode`] — framed record files → normalized [`Record`]s
//! - [`store`] — the embedded analytic store adapter
//! - [`files`] — raw-file discovery and per-file ingestion state
//! - [`ingest`] — streaming ingestion into the raw tables
//! - [`aggregations`] — watermarked incremental aggregations
//! - [`template_index`] — the template→file inverted index
//! - [`governance`], [`intervals`], [`rewards`] — template-scoped projections
//! - [`worker`] — the periodic engine cycle
//! - [`supervisor`], [`locks`] — background task bookkeeping and cross-process
//!   exclusion

pub mod aggregations;
pub mod decode;
pub mod error;
pub mod files;
pub mod governance;
pub mod ingest;
pub mod intervals;
pub mod locks;
pub mod payload;
pub mod queries;
pub mod rewards;
pub mod store;
pub mod supervisor;
pub mod template_index;
pub mod worker;

pub use error::{Result, WarehouseError};
pub use ledgerhouse_model::Record;
pub use store::AnalyticStore;
pub use supervisor::IndexerSupervisor;
