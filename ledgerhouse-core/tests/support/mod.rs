//! Shared fixtures: on-disk framed record files and a wired warehouse.
#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};
use tempfile::TempDir;

use ledgerhouse_config::DataPaths;
use ledgerhouse_core::aggregations::Aggregations;
use ledgerhouse_core::decode::FramedGzDecoder;
use ledgerhouse_core::files::FileIndex;
use ledgerhouse_core::governance::VoteRequestIndexer;
use ledgerhouse_core::ingest::Ingestor;
use ledgerhouse_core::store::AnalyticStore;
use ledgerhouse_core::supervisor::IndexerSupervisor;
use ledgerhouse_core::template_index::{TemplateFileIndex, TemplateIndexConfig};

/// One frame: 4-byte big-endian length + gzip of a JSON batch.
pub fn frame(records: &[Value]) -> Vec<u8> {
    let batch = json!({ "records": records });
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(batch.to_string().as_bytes())
        .expect("gzip write");
    let payload = encoder.finish().expect("gzip finish");
    let mut out = (payload.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(&payload);
    out
}

/// Write a record file under the raw root, one frame per batch.
pub fn write_record_file(paths: &DataPaths, rel: &str, batches: &[Vec<Value>]) {
    let path = paths.resolve_raw(rel);
    std::fs::create_dir_all(path.parent().expect("parent dir")).expect("mkdir");
    let mut bytes = Vec::new();
    for batch in batches {
        bytes.extend(frame(batch));
    }
    std::fs::write(path, bytes).expect("write record file");
}

pub fn created_event(
    event_id: &str,
    contract_id: &str,
    template_id: &str,
    effective_at: &str,
    payload: Value,
) -> Value {
    json!({
        "event_id": event_id,
        "contract_id": contract_id,
        "template_id": template_id,
        "event_type": "created",
        "effective_at": effective_at,
        "recorded_at": effective_at,
        "signatories": ["dso::main"],
        "payload": payload,
    })
}

pub fn exercised_event(
    event_id: &str,
    contract_id: &str,
    template_id: &str,
    choice: &str,
    effective_at: &str,
    argument: Value,
    result: Value,
) -> Value {
    json!({
        "event_id": event_id,
        "contract_id": contract_id,
        "template_id": template_id,
        "event_type": "exercised",
        "consuming": true,
        "choice": choice,
        "effective_at": effective_at,
        "recorded_at": effective_at,
        "exercise_argument": argument,
        "exercise_result": result,
    })
}

/// A wired warehouse over a temp data dir and an in-memory store.
pub struct Warehouse {
    pub dir: TempDir,
    pub paths: DataPaths,
    pub store: AnalyticStore,
    pub supervisor: Arc<IndexerSupervisor>,
    pub file_index: FileIndex,
    pub ingestor: Ingestor,
    pub aggregations: Aggregations,
    pub template_index: TemplateFileIndex,
    pub vote_indexer: VoteRequestIndexer,
}

pub async fn warehouse() -> Warehouse {
    warehouse_with(TemplateIndexConfig {
        workers: 2,
        concurrency: 2,
        use_worker_pool: true,
        stall_timeout: Duration::from_secs(120),
    })
    .await
}

pub async fn warehouse_with(template_config: TemplateIndexConfig) -> Warehouse {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = DataPaths::new(dir.path());
    std::fs::create_dir_all(paths.raw_dir()).expect("raw dir");

    let store = AnalyticStore::in_memory().await.expect("store");
    let supervisor = IndexerSupervisor::new();
    let file_index = FileIndex::new(store.clone(), paths.clone());
    let ingestor = Ingestor::new(
        store.clone(),
        file_index.clone(),
        paths.clone(),
        Arc::new(FramedGzDecoder::new()),
    );
    let aggregations = Aggregations::new(store.clone());
    let template_index =
        TemplateFileIndex::new(store.clone(), paths.clone(), template_config);
    let vote_indexer = VoteRequestIndexer::new(
        store.clone(),
        paths.clone(),
        template_index.clone(),
        Arc::clone(&supervisor),
    );

    Warehouse {
        dir,
        paths,
        store,
        supervisor,
        file_index,
        ingestor,
        aggregations,
        template_index,
        vote_indexer,
    }
}
