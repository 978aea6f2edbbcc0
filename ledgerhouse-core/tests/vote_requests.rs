//! Vote-request projection: consumption-based finalization, canonical
//! collapse, and rebuild idempotence.

mod support;

use ledgerhouse_model::{BuildMode, VoteStatus};
use serde_json::json;
use support::{created_event, exercised_event, warehouse, write_record_file};

use ledgerhouse_core::governance::CanonicalQuery;

fn proposal_payload(vote_before: &str, tracking_cid: Option<&str>) -> serde_json::Value {
    let mut payload = json!({
        "dso": "dso::main",
        "requester": "sv-1::party",
        "action": { "tag": "ARC_DsoRules", "value": { "dsoAction": {
            "tag": "SRARC_OffboardSv", "value": { "sv": "sv-9::party" } } } },
        "reason": { "url": "https://lists.sync.global/g/proposals/topic/12",
                    "body": "Offboard inactive SV" },
        "voteBefore": vote_before,
        "votes": [ [ "sv-1", { "sv": "sv-1::party", "accept": true } ],
                   [ "sv-2", { "sv": "sv-2::party", "accept": true } ] ],
    });
    if let Some(cid) = tracking_cid {
        payload["trackingCid"] = json!(cid);
    }
    payload
}

async fn build_after_seeding(wh: &support::Warehouse) {
    wh.file_index.scan_and_index().await.unwrap();
    wh.template_index.build(BuildMode::Force).await.unwrap();
}

#[tokio::test]
async fn terminal_exercise_finalizes_the_proposal() {
    let wh = warehouse().await;
    write_record_file(
        &wh.paths,
        "events-proposals.bin.gz",
        &[vec![created_event(
            "ev-create-1",
            "proposal-root-1",
            "Splice.DsoRules:VoteRequest",
            "2024-03-01T10:00:00Z",
            proposal_payload("2099-01-01T00:00:00Z", None),
        )]],
    );
    write_record_file(
        &wh.paths,
        "events-dsorules.bin.gz",
        &[vec![exercised_event(
            "ev-close-1",
            "dso-rules-1",
            "Splice.DsoRules:DsoRules",
            "DsoRules_CloseVoteRequest_Accept",
            "2024-03-02T10:00:00Z",
            json!({ "voteRequestCid": "proposal-root-1" }),
            json!({ "outcome": { "tag": "VRO_Accepted", "value": {} } }),
        )]],
    );
    build_after_seeding(&wh).await;

    let report = wh.vote_indexer.build().await.unwrap();
    assert!(report.success);
    assert_eq!(report.create_events, 1);
    assert_eq!(report.terminal_events, 1);
    assert_eq!(report.rows_written, 1);
    assert_eq!(report.named_payloads, 1);
    assert_eq!(report.unknown_choices, 0);

    let canonical = wh
        .vote_indexer
        .queries()
        .query_canonical_proposals(CanonicalQuery::page(10, 0))
        .await
        .unwrap();
    assert_eq!(canonical.len(), 1);
    let proposal = &canonical[0];
    assert_eq!(proposal.row.status, VoteStatus::Executed);
    assert!(proposal.row.is_closed);
    assert_eq!(proposal.row.contract_id.as_deref(), Some("proposal-root-1"));
    assert_eq!(proposal.row.action_tag.as_deref(), Some("SRARC_OffboardSv"));
    assert_eq!(proposal.row.action_subject.as_deref(), Some("sv-9::party"));
    assert_eq!(proposal.row.accept_count, 2);
    assert!(proposal.row.is_human);
    assert_eq!(proposal.related_count, 1);
}

#[tokio::test]
async fn without_terminal_a_past_deadline_means_expired() {
    let wh = warehouse().await;
    write_record_file(
        &wh.paths,
        "events-proposals.bin.gz",
        &[vec![created_event(
            "ev-create-1",
            "proposal-root-1",
            "Splice.DsoRules:VoteRequest",
            "2024-03-01T10:00:00Z",
            proposal_payload("2024-03-05T00:00:00Z", None),
        )]],
    );
    build_after_seeding(&wh).await;

    let report = wh.vote_indexer.build().await.unwrap();
    assert_eq!(report.terminal_events, 0);

    let row = wh
        .vote_indexer
        .queries()
        .get_by_event_id("ev-create-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, VoteStatus::Expired);
    assert!(!row.is_closed, "no terminal exercise: not closed on-ledger");
}

#[tokio::test]
async fn open_proposal_stays_in_progress() {
    let wh = warehouse().await;
    write_record_file(
        &wh.paths,
        "events-proposals.bin.gz",
        &[vec![created_event(
            "ev-create-1",
            "proposal-root-1",
            "Splice.DsoRules:VoteRequest",
            "2024-03-01T10:00:00Z",
            proposal_payload("2099-01-01T00:00:00Z", None),
        )]],
    );
    build_after_seeding(&wh).await;
    wh.vote_indexer.build().await.unwrap();

    let row = wh
        .vote_indexer
        .queries()
        .get_by_event_id("ev-create-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, VoteStatus::InProgress);
    assert!(!row.is_closed);
}

#[tokio::test]
async fn tracking_cid_groups_resubmissions_canonically() {
    let wh = warehouse().await;
    write_record_file(
        &wh.paths,
        "events-proposals.bin.gz",
        &[vec![
            created_event(
                "ev-create-1",
                "proposal-root-1",
                "Splice.DsoRules:VoteRequest",
                "2024-03-01T10:00:00Z",
                proposal_payload("2099-01-01T00:00:00Z", Some("tracking-1")),
            ),
            created_event(
                "ev-create-2",
                "proposal-root-2",
                "Splice.DsoRules:VoteRequest",
                "2024-03-03T10:00:00Z",
                proposal_payload("2099-01-01T00:00:00Z", Some("tracking-1")),
            ),
        ]],
    );
    build_after_seeding(&wh).await;
    wh.vote_indexer.build().await.unwrap();

    let canonical = wh
        .vote_indexer
        .queries()
        .query_canonical_proposals(CanonicalQuery::page(10, 0))
        .await
        .unwrap();
    assert_eq!(canonical.len(), 1, "both rows share one proposal id");
    let proposal = &canonical[0];
    assert_eq!(proposal.row.event_id, "ev-create-2", "latest row wins");
    assert_eq!(proposal.related_count, 2);
    assert_eq!(proposal.max_accept, 2);

    let timeline = wh
        .vote_indexer
        .queries()
        .query_proposal_timeline(&proposal.row.semantic_key)
        .await
        .unwrap();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].event_id, "ev-create-1");
}

#[tokio::test]
async fn rebuild_is_idempotent_modulo_updated_at() {
    let wh = warehouse().await;
    write_record_file(
        &wh.paths,
        "events-proposals.bin.gz",
        &[vec![created_event(
            "ev-create-1",
            "proposal-root-1",
            "Splice.DsoRules:VoteRequest",
            "2024-03-01T10:00:00Z",
            proposal_payload("2099-01-01T00:00:00Z", None),
        )]],
    );
    build_after_seeding(&wh).await;

    wh.vote_indexer.build().await.unwrap();
    let first = wh
        .vote_indexer
        .queries()
        .get_by_event_id("ev-create-1")
        .await
        .unwrap()
        .unwrap();

    wh.vote_indexer.build().await.unwrap();
    let second = wh
        .vote_indexer
        .queries()
        .get_by_event_id("ev-create-1")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.status, second.status);
    assert_eq!(first.semantic_key, second.semantic_key);
    assert_eq!(first.proposal_id, second.proposal_id);
    assert_eq!(first.accept_count, second.accept_count);
    assert_eq!(first.is_human, second.is_human);
    assert_eq!(first.is_closed, second.is_closed);
}

#[tokio::test]
async fn positional_payloads_are_counted_and_projected() {
    let wh = warehouse().await;
    let positional = json!({ "record": { "fields": [
        { "value": "dso::main" },
        { "value": { "party": "sv-1::party" } },
        { "value": { "tag": "ARC_DsoRules", "value": { "dsoAction": {
            "tag": "SRARC_OffboardSv", "value": { "sv": "sv-9::party" } } } } },
        { "value": { "url": "https://lists.sync.global/g/p/1", "body": "off" } },
        { "value": "2099-01-01T00:00:00Z" },
        { "value": [] },
    ]}});
    write_record_file(
        &wh.paths,
        "events-proposals.bin.gz",
        &[vec![created_event(
            "ev-create-1",
            "proposal-root-1",
            "Splice.DsoRules:VoteRequest",
            "2024-03-01T10:00:00Z",
            positional,
        )]],
    );
    build_after_seeding(&wh).await;

    let report = wh.vote_indexer.build().await.unwrap();
    assert_eq!(report.positional_payloads, 1);
    assert_eq!(report.named_payloads, 0);

    let row = wh
        .vote_indexer
        .queries()
        .get_by_event_id("ev-create-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.requester.as_deref(), Some("sv-1::party"));
    assert_eq!(row.action_tag.as_deref(), Some("SRARC_OffboardSv"));
    assert_eq!(row.semantic_key, "SRARC_OffboardSv::sv-9::party");
}

#[tokio::test]
async fn in_process_overlap_reports_contention() {
    let wh = warehouse().await;
    build_after_seeding(&wh).await;

    // Hold the cross-process lock; the build must report contention, not block.
    let _held = ledgerhouse_core::locks::FsLock::acquire(
        &wh.paths,
        ledgerhouse_core::governance::LOCK_NAME,
    )
    .unwrap();
    let result = wh.vote_indexer.build().await;
    assert!(matches!(
        result,
        Err(ledgerhouse_core::WarehouseError::Contention { .. })
    ));
}
