use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Reward coupon families tracked by the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CouponKind {
    App,
    Validator,
    Sv,
}

impl CouponKind {
    /// Classify a template name; `None` for non-coupon templates.
    pub fn from_template_name(name: &str) -> Option<Self> {
        if name.starts_with("AppRewardCoupon") {
            Some(Self::App)
        } else if name.starts_with("ValidatorRewardCoupon") {
            Some(Self::Validator)
        } else if name.starts_with("SvRewardCoupon") {
            Some(Self::Sv)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::App => "App",
            Self::Validator => "Validator",
            Self::Sv => "SV",
        }
    }
}

impl fmt::Display for CouponKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CouponKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "App" => Ok(Self::App),
            "Validator" => Ok(Self::Validator),
            "SV" => Ok(Self::Sv),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

/// Per-coupon-type issuance rates for one mining round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IssuanceRates {
    pub per_app: f64,
    pub per_validator: f64,
    pub per_sv: f64,
}

impl IssuanceRates {
    pub fn rate_for(&self, kind: CouponKind) -> f64 {
        match kind {
            CouponKind::App => self.per_app,
            CouponKind::Validator => self.per_validator,
            CouponKind::Sv => self.per_sv,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.per_app == 0.0 && self.per_validator == 0.0 && self.per_sv == 0.0
    }
}

/// One denormalized reward event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardCoupon {
    pub event_id: String,
    pub contract_id: Option<String>,
    pub template_id: Option<String>,
    pub effective_at: Option<DateTime<Utc>>,
    pub round: i64,
    pub coupon_type: CouponKind,
    pub beneficiary: Option<String>,
    pub weight: f64,
    pub cc_amount: f64,
    pub has_issuance_data: bool,
}

/// Aggregated rewards for one beneficiary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeneficiarySummary {
    pub beneficiary: String,
    pub total_cc: f64,
    pub coupon_count: i64,
    /// `(round, total_cc)` breakdown, ascending by round.
    pub by_round: Vec<(i64, f64)>,
    /// `(coupon_type, total_cc)` breakdown.
    pub by_type: Vec<(String, f64)>,
}
