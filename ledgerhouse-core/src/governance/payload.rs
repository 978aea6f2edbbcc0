//! Proposal payload normalization.
//!
//! Proposal payloads arrive in two shapes: named fields keyed by domain
//! attribute, or a generic record with an ordered field list. Both project
//! onto [`ProposalFields`]; the detected shape is reported so drift in the
//! upstream encoding shows up in build counters instead of as silent data
//! loss.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::payload::{
    extract_party, extract_text, extract_timestamp, get_key, positional,
    record_fields,
};

/// Positional field order of the proposal record. Fixed by the upstream
/// template definition; `tracking_cid` is a late addition and optional.
mod field_order {
    pub const DSO: usize = 0;
    pub const REQUESTER: usize = 1;
    pub const ACTION: usize = 2;
    pub const REASON: usize = 3;
    pub const VOTE_BEFORE: usize = 4;
    pub const VOTES: usize = 5;
    pub const TRACKING_CID: usize = 6;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Named,
    Positional,
}

/// The proposal attributes every downstream consumer works from.
#[derive(Debug, Clone, Default)]
pub struct ProposalFields {
    pub dso: Option<String>,
    pub requester: Option<String>,
    pub action: Option<Value>,
    pub reason_body: Option<String>,
    pub reason_url: Option<String>,
    pub vote_before: Option<DateTime<Utc>>,
    pub votes: Option<Value>,
    pub tracking_cid: Option<String>,
}

/// Structural probe: a record-with-fields payload is positional, anything
/// else is treated as named.
pub fn detect_shape(payload: &Value) -> PayloadShape {
    if record_fields(payload).is_some() {
        PayloadShape::Positional
    } else {
        PayloadShape::Named
    }
}

/// Project a payload of either shape onto [`ProposalFields`].
pub fn extract_proposal_fields(payload: &Value) -> (ProposalFields, PayloadShape) {
    let shape = detect_shape(payload);
    let fields = match shape {
        PayloadShape::Named => named_fields(payload),
        PayloadShape::Positional => positional_fields(payload),
    };
    (fields, shape)
}

fn named_fields(payload: &Value) -> ProposalFields {
    let reason = get_key(payload, "reason");
    ProposalFields {
        dso: extract_party(payload, &["dso"]),
        requester: extract_party(payload, &["requester"]),
        action: get_key(payload, "action").cloned(),
        reason_body: reason.and_then(|r| extract_text(r, &["body"])).or_else(|| {
            // Some early payloads carried a bare reason string.
            reason.and_then(Value::as_str).map(str::to_string)
        }),
        reason_url: reason.and_then(|r| extract_text(r, &["url"])),
        vote_before: extract_timestamp(payload, &["voteBefore", "vote_before", "targetEffectiveAt"]),
        votes: get_key(payload, "votes").cloned(),
        tracking_cid: extract_text(payload, &["trackingCid", "tracking_cid"]),
    }
}

fn positional_fields(payload: &Value) -> ProposalFields {
    let reason = positional(payload, field_order::REASON);
    ProposalFields {
        dso: positional(payload, field_order::DSO).and_then(value_text),
        requester: positional(payload, field_order::REQUESTER).and_then(value_text),
        action: positional(payload, field_order::ACTION).cloned(),
        reason_body: reason.and_then(|r| extract_text(r, &["body"]).or_else(|| {
            r.as_str().map(str::to_string)
        })),
        reason_url: reason.and_then(|r| extract_text(r, &["url"])),
        vote_before: positional(payload, field_order::VOTE_BEFORE)
            .and_then(crate::decode::parse_timestamp),
        votes: positional(payload, field_order::VOTES).cloned(),
        tracking_cid: positional(payload, field_order::TRACKING_CID)
            .and_then(value_text),
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => extract_text(value, &["party", "contractId", "text", "value"]),
        _ => None,
    }
}

/// Tally accept/reject votes from either votes encoding: a map rendered as
/// `[[key, vote], ...]` entries, or a plain list of vote objects.
pub fn count_votes(votes: Option<&Value>) -> (i64, i64) {
    let Some(votes) = votes else { return (0, 0) };
    let Some(entries) = votes.as_array() else { return (0, 0) };

    let mut accept = 0;
    let mut reject = 0;
    for entry in entries {
        let vote = match entry {
            Value::Array(pair) if pair.len() == 2 => &pair[1],
            other => other,
        };
        match get_key(vote, "accept").and_then(Value::as_bool) {
            Some(true) => accept += 1,
            Some(false) => reject += 1,
            None => {}
        }
    }
    (accept, reject)
}
