use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Active interval of one super-validator onboarding contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvInterval {
    pub contract_id: String,
    pub sv_party: String,
    pub sv_name: Option<String>,
    pub sv_reward_weight: Option<i64>,
    pub sv_participant_id: Option<String>,
    pub active_from: DateTime<Utc>,
    pub active_until: Option<DateTime<Utc>>,
    pub dso: Option<String>,
    pub reason: Option<String>,
}

/// Epoch interval of one DSO rules contract version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DsoRulesInterval {
    pub contract_id: String,
    pub dso: Option<String>,
    pub active_from: DateTime<Utc>,
    pub active_until: Option<DateTime<Utc>>,
}

/// Events an interval build observed but could not turn into rows.
///
/// Surfaced in the final build log; a build that saw events but produced
/// zero intervals fails instead of silently writing an empty index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCounters {
    pub missing_party: u64,
    pub missing_start: u64,
    /// Intervals whose close preceded their open.
    pub inverted: u64,
    pub incomplete: u64,
}

impl DropCounters {
    pub fn total(&self) -> u64 {
        self.missing_party + self.missing_start + self.inverted + self.incomplete
    }
}

/// Voting thresholds derived from an active SV count. Never hardcoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingThresholds {
    pub sv_count: i64,
    pub two_thirds: i64,
    pub simple_majority: i64,
}

impl VotingThresholds {
    /// Thresholds for `sv_count` active super-validators.
    ///
    /// Zero SVs yields `{0, 0, 1}`: a two-thirds quorum of nobody is nobody,
    /// but a simple majority still needs at least one vote.
    pub fn for_count(sv_count: i64) -> Self {
        let sv_count = sv_count.max(0);
        Self {
            sv_count,
            two_thirds: (((sv_count * 2) as u64).div_ceil(3)) as i64,
            simple_majority: sv_count / 2 + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_for_small_counts() {
        assert_eq!(
            VotingThresholds::for_count(0),
            VotingThresholds { sv_count: 0, two_thirds: 0, simple_majority: 1 }
        );
        assert_eq!(
            VotingThresholds::for_count(1),
            VotingThresholds { sv_count: 1, two_thirds: 1, simple_majority: 1 }
        );
        assert_eq!(
            VotingThresholds::for_count(9),
            VotingThresholds { sv_count: 9, two_thirds: 6, simple_majority: 5 }
        );
        assert_eq!(
            VotingThresholds::for_count(10),
            VotingThresholds { sv_count: 10, two_thirds: 7, simple_majority: 6 }
        );
    }
}
