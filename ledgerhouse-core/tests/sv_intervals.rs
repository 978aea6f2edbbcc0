//! SV membership intervals and voting thresholds.

mod support;

use chrono::{TimeDelta, Utc};
use ledgerhouse_model::{BuildMode, VotingThresholds};
use serde_json::json;
use support::{created_event, exercised_event, warehouse, write_record_file};

use ledgerhouse_core::intervals::SvIntervalIndexer;

fn sv_payload(party: &str, name: &str, weight: i64) -> serde_json::Value {
    json!({
        "dso": "dso::main",
        "svParty": party,
        "svName": name,
        "svRewardWeight": weight.to_string(),
        "svParticipantId": format!("participant::{name}"),
        "reason": "onboarding approved",
    })
}

fn indexer(wh: &support::Warehouse) -> SvIntervalIndexer {
    SvIntervalIndexer::new(
        wh.store.clone(),
        wh.template_index.clone(),
        std::sync::Arc::clone(&wh.supervisor),
    )
}

#[tokio::test]
async fn onboard_then_offboard_bounds_the_active_window() {
    let wh = warehouse().await;
    let t0 = "2024-03-01T10:00:00Z";
    let t1 = "2024-06-01T10:00:00Z";
    write_record_file(
        &wh.paths,
        "events-sv.bin.gz",
        &[vec![
            created_event(
                "ev-onboard",
                "sv-contract-1",
                "Splice.DSO.SvOnboarding:SvOnboardingConfirmed",
                t0,
                sv_payload("sv-1::party", "SV One", 10_000),
            ),
            exercised_event(
                "ev-offboard",
                "sv-contract-1",
                "Splice.DSO.SvOnboarding:SvOnboardingConfirmed",
                "SvOnboardingConfirmed_Expire",
                t1,
                json!({}),
                json!({}),
            ),
        ]],
    );
    wh.file_index.scan_and_index().await.unwrap();
    wh.template_index.build(BuildMode::Force).await.unwrap();

    let sv = indexer(&wh);
    let report = sv.build().await.unwrap();
    assert_eq!(report.intervals_written, 1);
    assert_eq!(report.drops.total(), 0);

    let queries = sv.queries();
    let t0 = t0.parse::<chrono::DateTime<Utc>>().unwrap();
    let t1 = t1.parse::<chrono::DateTime<Utc>>().unwrap();
    assert_eq!(queries.count_active_at(t0 + TimeDelta::seconds(1)).await.unwrap(), 1);
    assert_eq!(queries.count_active_at(t1 + TimeDelta::seconds(1)).await.unwrap(), 0);
    assert_eq!(queries.count_active_at(t0 - TimeDelta::seconds(1)).await.unwrap(), 0);

    let active = queries.list_active_at(t0 + TimeDelta::days(1)).await.unwrap();
    assert_eq!(active.len(), 1);
    let interval = &active[0];
    assert_eq!(interval.sv_party, "sv-1::party");
    assert_eq!(interval.sv_name.as_deref(), Some("SV One"));
    assert_eq!(interval.sv_reward_weight, Some(10_000));
    assert_eq!(interval.active_until, Some(t1));
    assert!(interval.active_until.unwrap() >= interval.active_from);
}

#[tokio::test]
async fn close_arriving_before_create_still_closes_the_interval() {
    let wh = warehouse().await;
    // Files sort lexicographically: the close lives in an earlier file than
    // its create.
    write_record_file(
        &wh.paths,
        "events-01-close.bin.gz",
        &[vec![exercised_event(
            "ev-offboard",
            "sv-contract-1",
            "Splice.DSO.SvOnboarding:SvOnboardingConfirmed",
            "SvOnboardingConfirmed_Expire",
            "2024-06-01T10:00:00Z",
            json!({}),
            json!({}),
        )]],
    );
    write_record_file(
        &wh.paths,
        "events-02-create.bin.gz",
        &[vec![created_event(
            "ev-onboard",
            "sv-contract-1",
            "Splice.DSO.SvOnboarding:SvOnboardingConfirmed",
            "2024-03-01T10:00:00Z",
            sv_payload("sv-1::party", "SV One", 10),
        )]],
    );
    wh.file_index.scan_and_index().await.unwrap();
    wh.template_index.build(BuildMode::Force).await.unwrap();

    let sv = indexer(&wh);
    let report = sv.build().await.unwrap();
    assert_eq!(report.intervals_written, 1);
    assert_eq!(report.drops.incomplete, 0);

    let timeline = sv.queries().timeline(10).await.unwrap();
    assert_eq!(timeline.len(), 1);
    assert!(timeline[0].active_until.is_some());
}

#[tokio::test]
async fn thresholds_derive_from_active_count() {
    let wh = warehouse().await;
    let records: Vec<serde_json::Value> = (0..9)
        .map(|n| {
            created_event(
                &format!("ev-{n}"),
                &format!("sv-contract-{n}"),
                "Splice.DSO.SvOnboarding:SvOnboardingConfirmed",
                "2024-03-01T10:00:00Z",
                sv_payload(&format!("sv-{n}::party"), &format!("SV {n}"), 10),
            )
        })
        .collect();
    write_record_file(&wh.paths, "events-sv.bin.gz", &[records]);
    wh.file_index.scan_and_index().await.unwrap();
    wh.template_index.build(BuildMode::Force).await.unwrap();

    let sv = indexer(&wh);
    sv.build().await.unwrap();

    let thresholds = sv
        .queries()
        .thresholds_at("2024-04-01T00:00:00Z".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(
        thresholds,
        VotingThresholds { sv_count: 9, two_thirds: 6, simple_majority: 5 }
    );
}

#[tokio::test]
async fn zero_svs_yield_the_documented_threshold_edge() {
    let wh = warehouse().await;
    wh.file_index.scan_and_index().await.unwrap();
    wh.template_index.build(BuildMode::Force).await.unwrap();

    let sv = indexer(&wh);
    // No SV events at all: the build sees nothing and writes nothing, which
    // is fine - only events-with-zero-rows is an error.
    let report = sv.build().await.unwrap();
    assert_eq!(report.events_seen, 0);

    let thresholds = sv.queries().thresholds_at(Utc::now()).await.unwrap();
    assert_eq!(
        thresholds,
        VotingThresholds { sv_count: 0, two_thirds: 0, simple_majority: 1 }
    );
}

#[tokio::test]
async fn events_without_extractable_rows_fail_the_build() {
    let wh = warehouse().await;
    // A create with no party anywhere: extraction is broken, and a silent
    // empty index would be worse than a loud failure.
    write_record_file(
        &wh.paths,
        "events-sv.bin.gz",
        &[vec![created_event(
            "ev-onboard",
            "sv-contract-1",
            "Splice.DSO.SvOnboarding:SvOnboardingConfirmed",
            "2024-03-01T10:00:00Z",
            json!({ "unexpected": "shape" }),
        )]],
    );
    wh.file_index.scan_and_index().await.unwrap();
    wh.template_index.build(BuildMode::Force).await.unwrap();

    let sv = indexer(&wh);
    let result = sv.build().await;
    assert!(matches!(
        result,
        Err(ledgerhouse_core::WarehouseError::BrokenExtraction { .. })
    ));
    let state = wh.supervisor.task("sv_intervals").unwrap();
    assert_eq!(state.status, ledgerhouse_model::TaskStatus::Error);
}
