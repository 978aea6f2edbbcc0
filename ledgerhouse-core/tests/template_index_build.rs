//! Template→file index builds: pool engine, fallback engine, incremental
//! idempotence, and the reverse-lookup fast path.

mod support;

use std::collections::BTreeSet;
use std::time::Duration;

use ledgerhouse_model::BuildMode;
use serde_json::json;
use support::{created_event, warehouse, warehouse_with, write_record_file};

use ledgerhouse_core::template_index::TemplateIndexConfig;

async fn seed_three_files(wh: &support::Warehouse) {
    write_record_file(
        &wh.paths,
        "events-a.bin.gz",
        &[vec![
            created_event("a-1", "c-a1", "Pkg.Mod:Foo", "2024-03-01T10:00:00Z", json!({})),
            created_event("a-2", "c-a2", "Pkg.Mod:Foo", "2024-03-01T11:00:00Z", json!({})),
            created_event("a-3", "c-a3", "Pkg.Mod:Bar", "2024-03-01T12:00:00Z", json!({})),
        ]],
    );
    write_record_file(
        &wh.paths,
        "events-b.bin.gz",
        &[vec![created_event(
            "b-1",
            "c-b1",
            "Pkg.Mod:Bar",
            "2024-03-02T10:00:00Z",
            json!({}),
        )]],
    );
    // A file with zero recognized events contributes zero rows.
    write_record_file(&wh.paths, "events-c.bin.gz", &[vec![json!({ "noise": true })]]);
    wh.file_index.scan_and_index().await.unwrap();
}

#[tokio::test]
async fn pool_build_indexes_per_file_template_counts() {
    let wh = warehouse().await;
    seed_three_files(&wh).await;

    let state = wh.template_index.build(BuildMode::Force).await.unwrap();
    assert_eq!(state.total_files_indexed, 2);
    assert_eq!(state.total_templates_found, 2);
    assert!(wh.template_index.is_populated().await.unwrap());

    let templates = wh.template_index.indexed_templates().await.unwrap();
    let foo = templates.iter().find(|t| t.template_name == "Foo").unwrap();
    assert_eq!(foo.total_events, 2);
    assert_eq!(foo.file_count, 1);
    let bar = templates.iter().find(|t| t.template_name == "Bar").unwrap();
    assert_eq!(bar.total_events, 2);
    assert_eq!(bar.file_count, 2);
}

#[tokio::test]
async fn files_for_template_returns_the_exact_file_set() {
    let wh = warehouse().await;
    seed_three_files(&wh).await;
    wh.template_index.build(BuildMode::Force).await.unwrap();

    let foo_files: BTreeSet<_> = wh
        .template_index
        .files_for_template("Foo")
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(
        foo_files,
        BTreeSet::from([wh.paths.resolve_raw("events-a.bin.gz")])
    );

    let bar_files = wh.template_index.files_for_template("Bar").await.unwrap();
    assert_eq!(bar_files.len(), 2);

    assert!(wh.template_index.files_for_template("Baz").await.unwrap().is_empty());
}

#[tokio::test]
async fn incremental_rebuild_without_new_files_is_a_noop() {
    let wh = warehouse().await;
    seed_three_files(&wh).await;

    let first = wh.template_index.build(BuildMode::Incremental).await.unwrap();
    let rows_before = wh
        .store
        .query_scalar_i64("SELECT COUNT(*) FROM template_file_index", vec![])
        .await
        .unwrap();

    let second = wh.template_index.build(BuildMode::Incremental).await.unwrap();
    let rows_after = wh
        .store
        .query_scalar_i64("SELECT COUNT(*) FROM template_file_index", vec![])
        .await
        .unwrap();

    assert_eq!(first.total_files_indexed, second.total_files_indexed);
    assert_eq!(rows_before, rows_after);

    // A newly scanned file is picked up incrementally.
    write_record_file(
        &wh.paths,
        "events-d.bin.gz",
        &[vec![created_event(
            "d-1",
            "c-d1",
            "Pkg.Mod:Foo",
            "2024-03-03T10:00:00Z",
            json!({}),
        )]],
    );
    wh.file_index.scan_and_index().await.unwrap();
    let third = wh.template_index.build(BuildMode::Incremental).await.unwrap();
    assert_eq!(third.total_files_indexed, 3);
}

#[tokio::test]
async fn main_thread_engine_produces_identical_rows() {
    let pooled = warehouse().await;
    seed_three_files(&pooled).await;
    pooled.template_index.build(BuildMode::Force).await.unwrap();

    let fallback = warehouse_with(TemplateIndexConfig {
        workers: 2,
        concurrency: 2,
        use_worker_pool: false,
        stall_timeout: Duration::from_secs(120),
    })
    .await;
    seed_three_files(&fallback).await;
    fallback.template_index.build(BuildMode::Force).await.unwrap();

    async fn dump(wh: &support::Warehouse) -> Vec<(String, String, i64, Option<String>, Option<String>)> {
        wh.store
            .query(
                "SELECT file_path, template_name, event_count,
                        first_event_at, last_event_at
                 FROM template_file_index
                 ORDER BY file_path, template_name",
                vec![],
            )
            .await
            .unwrap()
            .iter()
            .map(|row| {
                use sqlx::Row as _;
                (
                    row.get::<String, _>("file_path"),
                    row.get::<String, _>("template_name"),
                    row.get::<i64, _>("event_count"),
                    row.get::<Option<String>, _>("first_event_at"),
                    row.get::<Option<String>, _>("last_event_at"),
                )
            })
            .collect::<Vec<_>>()
    }

    assert_eq!(dump(&pooled).await, dump(&fallback).await);
}

#[tokio::test]
async fn stalled_pool_falls_back_without_data_loss() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ledgerhouse_core::decode::{FramedGzDecoder, RecordDecoder, RecordIter};

    // First decoder instance hangs forever; later instances decode normally.
    // The watchdog must abandon the pool and finish on the fallback engine.
    struct HangingOnce {
        instance: usize,
    }
    impl RecordDecoder for HangingOnce {
        fn decode(&self, path: &std::path::Path) -> ledgerhouse_core::Result<RecordIter> {
            if self.instance == 0 {
                std::thread::sleep(Duration::from_secs(3600));
            }
            FramedGzDecoder::new().decode(path)
        }
    }

    let wh = warehouse_with(TemplateIndexConfig {
        workers: 1,
        concurrency: 2,
        use_worker_pool: true,
        stall_timeout: Duration::ZERO,
    })
    .await;
    write_record_file(
        &wh.paths,
        "events-a.bin.gz",
        &[vec![created_event(
            "a-1",
            "c-a1",
            "Pkg.Mod:Foo",
            "2024-03-01T10:00:00Z",
            json!({}),
        )]],
    );
    wh.file_index.scan_and_index().await.unwrap();

    let instances = Arc::new(AtomicUsize::new(0));
    let template_index = wh.template_index.clone().with_decoder_factory(Arc::new(move || {
        let instance = instances.fetch_add(1, Ordering::SeqCst);
        Box::new(HangingOnce { instance }) as Box<dyn RecordDecoder>
    }));

    let state = template_index.build(BuildMode::Force).await.unwrap();
    assert_eq!(state.total_files_indexed, 1);
    let files = template_index.files_for_template("Foo").await.unwrap();
    assert_eq!(files, vec![wh.paths.resolve_raw("events-a.bin.gz")]);
}

#[tokio::test]
async fn concurrent_builds_are_excluded_by_the_lock() {
    let wh = warehouse().await;
    seed_three_files(&wh).await;

    let _held = ledgerhouse_core::locks::FsLock::acquire(
        &wh.paths,
        ledgerhouse_core::template_index::LOCK_NAME,
    )
    .unwrap();
    let result = wh.template_index.build(BuildMode::Force).await;
    assert!(matches!(
        result,
        Err(ledgerhouse_core::WarehouseError::Contention { .. })
    ));
}
