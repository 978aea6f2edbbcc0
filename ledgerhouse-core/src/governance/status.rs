//! Status derivation and proposal classification.
//!
//! Finalization is decided solely by the terminal exercise on the proposal
//! root; everything here maps that exercise (or its absence) onto the status
//! model and derives the display-level classification fields.

use chrono::{DateTime, Utc};
use ledgerhouse_model::VoteStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::payload::{extract_text, get_key, variant_parts};

/// Action tags that are routine parameter maintenance, not governance a
/// human debated.
const CONFIG_MAINTENANCE_TAGS: &[&str] = &[
    "CRARC_AddFutureAmuletConfigSchedule",
    "CRARC_RemoveFutureAmuletConfigSchedule",
    "CRARC_UpdateFutureAmuletConfigSchedule",
    "CRARC_SetConfig",
    "SRARC_SetConfig",
    "SRARC_UpdateSvRewardWeight",
];

static MAILING_LIST_HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(groups\.google\.com|lists\.sync\.global)/")
        .expect("static regex")
});

/// One consuming exercise that finalized a proposal root.
#[derive(Debug, Clone)]
pub struct TerminalExercise {
    pub choice: Option<String>,
    pub outcome_tag: Option<String>,
    pub effective_at: Option<DateTime<Utc>>,
}

/// Map a terminal exercise to its outcome.
///
/// The explicit outcome tag wins; otherwise the choice name decides by
/// keyword. Unmappable exercises default to executed - the contract *was*
/// consumed - and bump the unknown-choice counter.
pub fn map_outcome(terminal: &TerminalExercise) -> (VoteStatus, bool) {
    let source = terminal
        .outcome_tag
        .as_deref()
        .or(terminal.choice.as_deref())
        .unwrap_or("");
    let lowered = source.to_ascii_lowercase();
    if lowered.contains("accept") || lowered.contains("execut") {
        (VoteStatus::Executed, false)
    } else if lowered.contains("reject") {
        (VoteStatus::Rejected, false)
    } else if lowered.contains("expire") {
        (VoteStatus::Expired, false)
    } else {
        (VoteStatus::Executed, true)
    }
}

/// Status of a proposal with no terminal exercise.
pub fn open_status(vote_before: Option<DateTime<Utc>>, now: DateTime<Utc>) -> VoteStatus {
    match vote_before {
        Some(deadline) if deadline < now => VoteStatus::Expired,
        _ => VoteStatus::InProgress,
    }
}

/// Peel the action variant down to its innermost meaningful tag and value.
///
/// Outer tags (`ARC_DsoRules`, `ARC_AmuletRules`) only say which rules
/// contract the action routes through; the inner tag carries the intent.
pub fn action_parts(action: Option<&Value>) -> (Option<String>, Option<Value>) {
    let Some(action) = action else { return (None, None) };
    let Some((mut tag, mut value)) = variant_parts(action) else {
        return (None, Some(action.clone()));
    };

    // Known single-level nestings of the inner action.
    for wrapper in ["dsoAction", "amuletRulesAction", "action"] {
        if let Some(inner) = get_key(value, wrapper)
            && let Some((inner_tag, inner_value)) = variant_parts(inner)
        {
            tag = inner_tag;
            value = inner_value;
            break;
        }
    }
    // A directly nested variant value.
    if let Some((inner_tag, inner_value)) = variant_parts(value) {
        tag = inner_tag;
        value = inner_value;
    }
    (Some(tag.to_string()), Some(value.clone()))
}

/// Subject keys in priority order: the first present one names what the
/// action is about.
const SUBJECT_KEYS: &[&str] = &[
    "provider",
    "rightCid",
    "svParty",
    "sv",
    "beneficiary",
    "validator",
    "memberParty",
    "participantId",
];

/// Keys whose presence marks the action value as a config blob; the subject
/// becomes a stable hash of it so identical configs group together.
const CONFIG_KEYS: &[&str] = &["newConfig", "amuletConfig", "config", "newSchedule"];

/// Derive the action subject for the semantic key.
pub fn action_subject(value: Option<&Value>) -> Option<String> {
    let value = value?;
    if let Some(subject) = extract_text(value, SUBJECT_KEYS) {
        return Some(subject);
    }
    for key in CONFIG_KEYS {
        if let Some(blob) = get_key(value, key) {
            return Some(format!("cfg:{:016x}", stable_hash(blob)));
        }
    }
    None
}

/// Assemble the semantic key that groups re-submissions of one logical
/// proposal: `action_tag::subject`, falling back through the requester to
/// the bare tag.
pub fn semantic_key(
    action_tag: Option<&str>,
    subject: Option<&str>,
    requester: Option<&str>,
) -> String {
    let tag = action_tag.unwrap_or("unknown");
    match (subject, requester) {
        (Some(subject), _) => format!("{tag}::{subject}"),
        (None, Some(requester)) => format!("{tag}::requester:{requester}"),
        (None, None) => tag.to_string(),
    }
}

/// `NOT config-maintenance AND (narrative OR votes)`.
pub fn is_human(
    action_tag: Option<&str>,
    reason_body: Option<&str>,
    reason_url: Option<&str>,
    vote_count: i64,
) -> bool {
    let config_maintenance =
        action_tag.is_some_and(|tag| CONFIG_MAINTENANCE_TAGS.contains(&tag));
    if config_maintenance {
        return false;
    }
    let has_narrative = reason_body.is_some_and(|body| !body.trim().is_empty())
        || reason_url.is_some_and(|url| MAILING_LIST_HOST.is_match(url));
    has_narrative || vote_count > 0
}

/// FNV-1a over the canonical JSON rendering. Only used to group identical
/// config blobs, so stability matters and cryptographic strength does not.
fn stable_hash(value: &Value) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let rendered = value.to_string();
    let mut hash = OFFSET;
    for byte in rendered.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn terminal(choice: &str) -> TerminalExercise {
        TerminalExercise {
            choice: Some(choice.to_string()),
            outcome_tag: None,
            effective_at: None,
        }
    }

    #[test]
    fn outcome_by_choice_keyword() {
        assert_eq!(
            map_outcome(&terminal("DsoRules_CloseVoteRequest_Accept")),
            (VoteStatus::Executed, false)
        );
        assert_eq!(
            map_outcome(&terminal("DsoRules_CloseVoteRequest_Reject")),
            (VoteStatus::Rejected, false)
        );
        assert_eq!(
            map_outcome(&terminal("DsoRules_ExpireVoteRequest")),
            (VoteStatus::Expired, false)
        );
        let (status, unknown) = map_outcome(&terminal("DsoRules_CloseVoteRequest"));
        assert_eq!(status, VoteStatus::Executed);
        assert!(unknown);
    }

    #[test]
    fn outcome_tag_wins_over_choice() {
        let terminal = TerminalExercise {
            choice: Some("DsoRules_CloseVoteRequest".to_string()),
            outcome_tag: Some("VRO_Rejected".to_string()),
            effective_at: None,
        };
        assert_eq!(map_outcome(&terminal), (VoteStatus::Rejected, false));
    }

    #[test]
    fn open_status_expires_after_deadline() {
        let now = Utc::now();
        let past = now - chrono::TimeDelta::hours(1);
        let future = now + chrono::TimeDelta::hours(1);
        assert_eq!(open_status(Some(past), now), VoteStatus::Expired);
        assert_eq!(open_status(Some(future), now), VoteStatus::InProgress);
        assert_eq!(open_status(None, now), VoteStatus::InProgress);
    }

    #[test]
    fn inner_action_tag_is_preferred() {
        let action = json!({
            "tag": "ARC_DsoRules",
            "value": { "dsoAction": {
                "tag": "SRARC_OffboardSv",
                "value": { "sv": "sv-9::party" }
            }}
        });
        let (tag, value) = action_parts(Some(&action));
        assert_eq!(tag.as_deref(), Some("SRARC_OffboardSv"));
        assert_eq!(
            action_subject(value.as_ref()).as_deref(),
            Some("sv-9::party")
        );
    }

    #[test]
    fn config_blob_hashes_stably() {
        let value = json!({ "newConfig": { "a": 1, "b": [1, 2, 3] } });
        let first = action_subject(Some(&value)).unwrap();
        let second = action_subject(Some(&value)).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("cfg:"));
    }

    #[test]
    fn semantic_key_fallback_chain() {
        assert_eq!(
            semantic_key(Some("SRARC_OffboardSv"), Some("sv-9"), Some("req")),
            "SRARC_OffboardSv::sv-9"
        );
        assert_eq!(
            semantic_key(Some("SRARC_OffboardSv"), None, Some("req")),
            "SRARC_OffboardSv::requester:req"
        );
        assert_eq!(semantic_key(Some("SRARC_OffboardSv"), None, None), "SRARC_OffboardSv");
    }

    #[test]
    fn human_classification() {
        // Config maintenance is never human, narrative or not.
        assert!(!is_human(Some("CRARC_SetConfig"), Some("please"), None, 5));
        // Narrative body.
        assert!(is_human(Some("SRARC_OffboardSv"), Some("inactive"), None, 0));
        // Recognized mailing-list URL.
        assert!(is_human(
            Some("SRARC_OffboardSv"),
            None,
            Some("https://lists.sync.global/g/proposals/topic/9"),
            0
        ));
        // Unrecognized URL with no votes is not narrative.
        assert!(!is_human(
            Some("SRARC_OffboardSv"),
            None,
            Some("https://example.com/x"),
            0
        ));
        // Votes alone are enough.
        assert!(is_human(Some("SRARC_OffboardSv"), None, None, 2));
    }
}
