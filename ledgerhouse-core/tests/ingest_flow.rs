//! End-to-end ingestion: scan → ingest → aggregate.

mod support;

use ledgerhouse_model::{AggregationOutcome, BuildMode, FileKind, ScanSummary};
use serde_json::json;
use support::{created_event, warehouse, write_record_file};

fn seed_mixed_file(paths: &ledgerhouse_config::DataPaths) {
    let records: Vec<serde_json::Value> = (0..5)
        .map(|n| {
            let event_type = if n < 3 { "created" } else { "archived" };
            json!({
                "event_id": format!("ev-{n}"),
                "contract_id": format!("c-{n}"),
                "template_id": "Splice.Amulet:Amulet",
                "event_type": event_type,
                "effective_at": format!("2024-03-01T12:00:0{n}Z"),
                "recorded_at": format!("2024-03-01T12:00:0{n}Z"),
            })
        })
        .collect();
    write_record_file(
        paths,
        "migration=1/year=2024/month=03/day=01/events-2024-03-01.bin.gz",
        &[records],
    );
}

#[tokio::test]
async fn ingest_then_aggregate() {
    let wh = warehouse().await;
    seed_mixed_file(&wh.paths);

    let scan = wh.file_index.scan_and_index().await.unwrap();
    assert_eq!(scan, ScanSummary { total_files: 1, new_files: 1 });

    let ingest = wh.ingestor.ingest_new_files(1).await.unwrap();
    assert_eq!(ingest.files, 1);
    assert_eq!(ingest.records, 5);
    assert_eq!(ingest.failed, 0);

    let counts = wh
        .aggregations
        .update_event_type_counts()
        .await
        .unwrap()
        .expect("first aggregation has new data");
    assert_eq!(counts.len(), 2);
    assert_eq!(counts[0].event_type, "created");
    assert_eq!(counts[0].event_count, 3);
    assert_eq!(counts[1].event_type, "archived");
    assert_eq!(counts[1].event_count, 2);

    // No new data on the second call.
    assert!(wh.aggregations.update_event_type_counts().await.unwrap().is_none());

    let outcomes = wh.aggregations.update_all().await;
    assert_eq!(
        outcomes.get("event_type_counts"),
        Some(&AggregationOutcome::NoNewData)
    );
}

#[tokio::test]
async fn finalized_record_count_matches_raw_rows() {
    let wh = warehouse().await;
    seed_mixed_file(&wh.paths);
    wh.file_index.scan_and_index().await.unwrap();
    wh.ingestor.ingest_new_files(5).await.unwrap();

    let file = wh.file_index.list_files(10, 0).await.unwrap().remove(0);
    assert!(file.ingested);
    assert_eq!(file.kind, FileKind::Events);
    assert_eq!(file.migration_id, Some(1));
    assert!(file.min_ts.is_some());
    assert!(file.max_ts.unwrap() >= file.min_ts.unwrap());

    let raw_rows = wh
        .store
        .query_scalar_i64(
            "SELECT COUNT(*) FROM events_raw WHERE _file_id = ?",
            vec![ledgerhouse_core::store::SqlValue::Int(file.file_id)],
        )
        .await
        .unwrap();
    assert_eq!(raw_rows, file.record_count);

    let stats = wh.file_index.get_file_stats().await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].file_count, 1);
    assert_eq!(stats[0].record_count, 5);
    assert_eq!(wh.file_index.get_pending_file_count().await.unwrap(), 0);
}

#[tokio::test]
async fn reset_allows_reingestion_under_same_file_id() {
    let wh = warehouse().await;
    seed_mixed_file(&wh.paths);
    wh.file_index.scan_and_index().await.unwrap();
    wh.ingestor.ingest_new_files(1).await.unwrap();
    let file = wh.file_index.list_files(1, 0).await.unwrap().remove(0);

    assert!(wh.file_index.reset_file(file.file_id).await.unwrap());
    let pending = wh.file_index.get_pending_file_count().await.unwrap();
    assert_eq!(pending, 1);

    let ingest = wh.ingestor.ingest_new_files(1).await.unwrap();
    assert_eq!(ingest.records, 5);
    let again = wh.file_index.get_file(file.file_id).await.unwrap().unwrap();
    assert_eq!(again.file_id, file.file_id);
    assert!(again.ingested);
    assert_eq!(again.record_count, 5);
}

#[tokio::test]
async fn decoder_failure_leaves_file_unfinalized() {
    let wh = warehouse().await;
    // A torn file: valid frame followed by garbage is fine (clean EOF), but
    // an unreadable path is a real failure. Simulate by indexing a file then
    // removing it from disk.
    seed_mixed_file(&wh.paths);
    wh.file_index.scan_and_index().await.unwrap();
    std::fs::remove_file(wh.paths.resolve_raw(
        "migration=1/year=2024/month=03/day=01/events-2024-03-01.bin.gz",
    ))
    .unwrap();

    let ingest = wh.ingestor.ingest_new_files(1).await.unwrap();
    assert_eq!(ingest.files, 0);
    assert_eq!(ingest.failed, 1);

    let file = wh.file_index.list_files(1, 0).await.unwrap().remove(0);
    assert!(!file.ingested, "failed ingest must not finalize");
    assert_eq!(file.record_count, 0);
}

#[tokio::test]
async fn event_stream_cursor_pages_descend_strictly() {
    use ledgerhouse_core::queries::{EventQueries, EventStreamRequest};

    let wh = warehouse().await;
    seed_mixed_file(&wh.paths);
    // A second file, later in time.
    write_record_file(
        &wh.paths,
        "migration=1/year=2024/month=03/day=02/events-2024-03-02.bin.gz",
        &[vec![created_event(
            "ev-later",
            "c-later",
            "Splice.Amulet:Amulet",
            "2024-03-02T00:00:00Z",
            json!({}),
        )]],
    );
    wh.file_index.scan_and_index().await.unwrap();
    wh.ingestor.ingest_new_files(10).await.unwrap();

    let queries = EventQueries::new(wh.store.clone());
    let first = queries
        .stream_page(EventStreamRequest { page_size: 4, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(first.rows.len(), 4);
    assert_eq!(first.rows[0].event_id.as_deref(), Some("ev-later"));
    let cursor = first.next_cursor.expect("more pages");

    let second = queries
        .stream_page(EventStreamRequest {
            cursor: Some(cursor),
            page_size: 4,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(second.rows.len(), 2);
    assert!(second.rows.iter().all(|row| row.recorded_at.unwrap() < cursor));

    let total = queries.count(FileKind::Events, None, None).await.unwrap();
    assert_eq!(total, 6);
    let archived = queries
        .count(FileKind::Events, None, Some("archived"))
        .await
        .unwrap();
    assert_eq!(archived, 2);
}

#[tokio::test]
async fn scan_is_a_prerequisite_for_template_build_targets() {
    let wh = warehouse().await;
    seed_mixed_file(&wh.paths);
    // Without a scan the index has no raw_files rows, so a build sees zero
    // targets and the state row reflects an empty sweep.
    let state = wh.template_index.build(BuildMode::Incremental).await.unwrap();
    assert_eq!(state.total_files_indexed, 0);
}
