use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle classification of a decoded ledger record.
///
/// Unknown classifications are preserved verbatim so aggregations can still
/// group by the raw string instead of collapsing everything into one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Exercised,
    Archived,
    Other(String),
}

impl EventType {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "created" | "create" => Self::Created,
            "exercised" | "exercise" => Self::Exercised,
            "archived" | "archive" => Self::Archived,
            _ => Self::Other(value.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Exercised => "exercised",
            Self::Archived => "archived",
            Self::Other(raw) => raw.as_str(),
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created)
    }

    pub fn is_exercised(&self) -> bool {
        matches!(self, Self::Exercised)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// One decoded ledger record in its normalized shape.
///
/// All timestamps are UTC; the source microsecond/millisecond distinction is
/// resolved before a `Record` is constructed. Field presence mirrors what the
/// upstream batch actually carried - projections must tolerate gaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    pub event_id: Option<String>,
    pub update_id: Option<String>,
    pub contract_id: Option<String>,
    pub template_id: Option<String>,
    pub event_type: Option<EventType>,
    pub consuming: Option<bool>,
    pub choice: Option<String>,
    pub effective_at: Option<DateTime<Utc>>,
    pub recorded_at: Option<DateTime<Utc>>,
    pub signatories: Vec<String>,
    pub observers: Vec<String>,
    pub acting_parties: Vec<String>,
    pub payload: Option<serde_json::Value>,
    pub exercise_argument: Option<serde_json::Value>,
    pub exercise_result: Option<serde_json::Value>,
    pub synchronizer_id: Option<String>,
}

impl Record {
    /// Suffix of the template id after its final `:`.
    ///
    /// An `@hash` suffix is treated as part of the name.
    pub fn template_name(&self) -> Option<&str> {
        self.template_id.as_deref().map(template_name_of)
    }

    /// Best timestamp for ordering: effective time, falling back to the
    /// record time when the ledger did not stamp one.
    pub fn best_timestamp(&self) -> Option<DateTime<Utc>> {
        self.effective_at.or(self.recorded_at)
    }

    pub fn is_created(&self) -> bool {
        self.event_type.as_ref().is_some_and(EventType::is_created)
    }

    pub fn is_consuming_exercise(&self) -> bool {
        self.event_type.as_ref().is_some_and(EventType::is_exercised)
            && self.consuming == Some(true)
    }
}

/// Suffix of a template id after the final `:` separator.
pub fn template_name_of(template_id: &str) -> &str {
    template_id
        .rsplit_once(':')
        .map_or(template_id, |(_, name)| name)
}

/// True when `template_id` resolves to `suffix`, ignoring an optional
/// `@hash` tail on the name itself.
pub fn template_matches(template_id: &str, suffix: &str) -> bool {
    let name = template_name_of(template_id);
    name == suffix
        || name
            .split_once('@')
            .is_some_and(|(bare, _)| bare == suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_name_takes_suffix_after_last_colon() {
        assert_eq!(template_name_of("Splice.DsoRules:VoteRequest"), "VoteRequest");
        assert_eq!(
            template_name_of("Pkg.Mod.Sub:Deep:VoteRequest"),
            "VoteRequest"
        );
        assert_eq!(template_name_of("NoColonAtAll"), "NoColonAtAll");
    }

    #[test]
    fn hash_suffix_stays_part_of_the_name() {
        assert_eq!(
            template_name_of("Splice.DsoRules:VoteRequest@abc123"),
            "VoteRequest@abc123"
        );
        assert!(template_matches("Splice.DsoRules:VoteRequest@abc123", "VoteRequest"));
        assert!(template_matches("Splice.DsoRules:VoteRequest", "VoteRequest"));
        assert!(!template_matches("Splice.DsoRules:VoteResult", "VoteRequest"));
    }

    #[test]
    fn event_type_round_trips_unknown_values() {
        assert_eq!(EventType::parse("created"), EventType::Created);
        assert_eq!(EventType::parse("Exercised"), EventType::Exercised);
        let other = EventType::parse("witnessed");
        assert_eq!(other.as_str(), "witnessed");
    }
}
