//! The reward-coupon projection: denormalized reward events with on-ingest
//! value computation.
//!
//! Two passes over the template→file index. The first captures per-round
//! issuance rates from issuing-round creates; the second walks the coupon
//! templates and computes each coupon's value: an explicit payload amount
//! wins, then `weight × rate(round, type)`, then the bare weight with
//! `has_issuance_data = false`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use ledgerhouse_model::{
    BeneficiarySummary, CouponKind, IssuanceRates, Record, RewardCoupon,
};
use serde_json::Value;
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::decode::{FramedGzDecoder, RecordDecoder};
use crate::error::Result;
use crate::payload::{extract_decimal, extract_int, extract_party, get_path};
use crate::store::{AnalyticStore, SqlValue, ts_parse};
use crate::supervisor::IndexerSupervisor;
use crate::template_index::{DecoderFactory, TemplateFileIndex};

pub const TASK_NAME: &str = "reward_coupons";

/// Template suffix carrying per-round issuance rates.
pub const ISSUING_ROUND_TEMPLATE: &str = "IssuingMiningRound";

const COUPON_TEMPLATES: &[(&str, CouponKind)] = &[
    ("AppRewardCoupon", CouponKind::App),
    ("ValidatorRewardCoupon", CouponKind::Validator),
    ("SvRewardCoupon", CouponKind::Sv),
];

/// Beneficiary attribution, in priority order.
const BENEFICIARY_KEYS: &[&str] = &["provider", "beneficiary", "owner"];

const ROW_COLUMNS: [&str; 10] = [
    "event_id",
    "contract_id",
    "template_id",
    "effective_at",
    "round",
    "coupon_type",
    "beneficiary",
    "weight",
    "cc_amount",
    "has_issuance_data",
];

const UPSERT_SUFFIX: &str = "ON CONFLICT(event_id) DO UPDATE SET \
     contract_id = excluded.contract_id, \
     template_id = excluded.template_id, \
     effective_at = excluded.effective_at, \
     round = excluded.round, \
     coupon_type = excluded.coupon_type, \
     beneficiary = excluded.beneficiary, \
     weight = excluded.weight, \
     cc_amount = excluded.cc_amount, \
     has_issuance_data = excluded.has_issuance_data";

/// Result of one reward build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewardBuildReport {
    pub rounds_captured: u64,
    pub coupons_written: u64,
    pub skipped: u64,
}

#[derive(Clone)]
pub struct RewardIndexer {
    store: AnalyticStore,
    template_index: TemplateFileIndex,
    factory: DecoderFactory,
    supervisor: Arc<IndexerSupervisor>,
}

impl std::fmt::Debug for RewardIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardIndexer").finish()
    }
}

impl RewardIndexer {
    pub fn new(
        store: AnalyticStore,
        template_index: TemplateFileIndex,
        supervisor: Arc<IndexerSupervisor>,
    ) -> Self {
        Self {
            store,
            template_index,
            factory: Arc::new(|| Box::new(FramedGzDecoder::new()) as Box<dyn RecordDecoder>),
            supervisor,
        }
    }

    pub fn with_decoder_factory(mut self, factory: DecoderFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn queries(&self) -> RewardQueries {
        RewardQueries::new(self.store.clone())
    }

    pub async fn build(&self) -> Result<RewardBuildReport> {
        let token = self.supervisor.try_begin(TASK_NAME)?;
        match self.build_inner().await {
            Ok(report) => {
                info!(
                    "reward build: {} issuance rounds, {} coupons, {} skipped",
                    report.rounds_captured, report.coupons_written, report.skipped
                );
                token.complete();
                Ok(report)
            }
            Err(err) => {
                token.fail(err.to_string());
                Err(err)
            }
        }
    }

    async fn build_inner(&self) -> Result<RewardBuildReport> {
        let mut report = RewardBuildReport::default();

        let issuance = self.collect_issuance_map(&mut report).await?;
        let mut rows: Vec<Vec<SqlValue>> = Vec::new();

        for (template, kind) in COUPON_TEMPLATES {
            let creates = self.collect_creates(template).await?;
            for record in &creates {
                match coupon_from_record(record, *kind, &issuance) {
                    Some(coupon) => rows.push(coupon_row_values(&coupon)),
                    None => {
                        report.skipped += 1;
                        debug!(
                            "skipping {} create without id/round/weight: {:?}",
                            template, record.event_id
                        );
                    }
                }
            }
        }

        report.coupons_written = rows.len() as u64;
        self.store
            .bulk_upsert("reward_coupons", &ROW_COLUMNS, UPSERT_SUFFIX, &rows, 200)
            .await?;
        Ok(report)
    }

    /// Pass 1: `round → rates` from issuing-round creates, captured when
    /// non-zero.
    async fn collect_issuance_map(
        &self,
        report: &mut RewardBuildReport,
    ) -> Result<HashMap<i64, IssuanceRates>> {
        let creates = self.collect_creates(ISSUING_ROUND_TEMPLATE).await?;
        let mut issuance = HashMap::new();
        for record in &creates {
            let Some(payload) = record.payload.as_ref() else { continue };
            let Some(round) = extract_int(payload, &["round"]) else {
                warn!(
                    "issuing round {} without a round number",
                    record.contract_id.as_deref().unwrap_or("<no cid>")
                );
                continue;
            };
            let rates = IssuanceRates {
                per_app: extract_decimal(
                    payload,
                    &["issuancePerAppRewardCoupon", "perApp"],
                )
                .unwrap_or(0.0),
                per_validator: extract_decimal(
                    payload,
                    &["issuancePerValidatorRewardCoupon", "perValidator"],
                )
                .unwrap_or(0.0),
                per_sv: extract_decimal(
                    payload,
                    &["issuancePerSvRewardCoupon", "perSv"],
                )
                .unwrap_or(0.0),
            };
            if !rates.is_zero() {
                issuance.insert(round, rates);
            }
        }
        report.rounds_captured = issuance.len() as u64;
        Ok(issuance)
    }

    /// Created records of `template`, via the inverted index.
    async fn collect_creates(&self, template: &'static str) -> Result<Vec<Record>> {
        let files = self.template_index.files_for_template(template).await?;
        let mut creates = Vec::new();
        for path in files {
            let factory = Arc::clone(&self.factory);
            let task_path = path.clone();
            let task = tokio::task::spawn_blocking(move || -> Result<Vec<Record>> {
                let decoder = factory();
                let records = decoder.decode(&task_path)?;
                Ok(records
                    .filter(|record| {
                        record.is_created()
                            && record.template_id.as_deref().is_some_and(|id| {
                                ledgerhouse_model::record::template_matches(id, template)
                            })
                    })
                    .collect())
            });
            match task.await {
                Ok(Ok(mut records)) => creates.append(&mut records),
                Ok(Err(err)) => warn!("skipping {}: {}", path.display(), err),
                Err(join_err) => {
                    warn!("scan task for {} panicked: {}", path.display(), join_err);
                }
            }
        }
        Ok(creates)
    }
}

fn coupon_from_record(
    record: &Record,
    kind: CouponKind,
    issuance: &HashMap<i64, IssuanceRates>,
) -> Option<RewardCoupon> {
    let event_id = record.event_id.clone()?;
    let payload = record.payload.as_ref()?;
    let round = extract_int(payload, &["round"])?;
    let weight = extract_decimal(payload, &["weight", "amount", "initialAmount"])?;

    let beneficiary = extract_party(payload, BENEFICIARY_KEYS).or_else(|| {
        get_path(payload, "round.provider")
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    let explicit = extract_decimal(payload, &["amount", "initialAmount"])
        // `amount` doubles as the weight on some coupon shapes; only treat
        // it as an explicit value when a distinct weight field exists.
        .filter(|_| payload.get("weight").is_some() || payload.get("initialAmount").is_some());

    let (cc_amount, has_issuance_data) = if let Some(amount) = explicit {
        (amount, true)
    } else if let Some(rates) = issuance.get(&round) {
        (weight * rates.rate_for(kind), true)
    } else {
        (weight, false)
    };

    Some(RewardCoupon {
        event_id,
        contract_id: record.contract_id.clone(),
        template_id: record.template_id.clone(),
        effective_at: record.effective_at,
        round,
        coupon_type: kind,
        beneficiary,
        weight,
        cc_amount,
        has_issuance_data,
    })
}

fn coupon_row_values(coupon: &RewardCoupon) -> Vec<SqlValue> {
    vec![
        SqlValue::Text(coupon.event_id.clone()),
        SqlValue::from(coupon.contract_id.clone()),
        SqlValue::from(coupon.template_id.clone()),
        SqlValue::from(coupon.effective_at),
        SqlValue::Int(coupon.round),
        SqlValue::Text(coupon.coupon_type.as_str().to_string()),
        SqlValue::from(coupon.beneficiary.clone()),
        SqlValue::Real(coupon.weight),
        SqlValue::Real(coupon.cc_amount),
        SqlValue::Bool(coupon.has_issuance_data),
    ]
}

/// Filter for the paginated coupon listing.
#[derive(Debug, Clone, Default)]
pub struct RewardFilter {
    pub beneficiary: Option<String>,
    pub coupon_type: Option<CouponKind>,
    pub round: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct RewardQueries {
    store: AnalyticStore,
}

impl RewardQueries {
    pub fn new(store: AnalyticStore) -> Self {
        Self { store }
    }

    pub async fn list(&self, filter: RewardFilter) -> Result<Vec<RewardCoupon>> {
        let mut sql = String::from("SELECT * FROM reward_coupons WHERE 1 = 1");
        let mut params = Vec::new();
        if let Some(beneficiary) = &filter.beneficiary {
            sql.push_str(" AND beneficiary = ?");
            params.push(SqlValue::Text(beneficiary.clone()));
        }
        if let Some(kind) = filter.coupon_type {
            sql.push_str(" AND coupon_type = ?");
            params.push(SqlValue::Text(kind.as_str().to_string()));
        }
        if let Some(round) = filter.round {
            sql.push_str(" AND round = ?");
            params.push(SqlValue::Int(round));
        }
        sql.push_str(" ORDER BY effective_at DESC, event_id LIMIT ? OFFSET ?");
        params.push(SqlValue::Int(if filter.limit > 0 { filter.limit } else { 50 }));
        params.push(SqlValue::Int(filter.offset.max(0)));

        let rows = self.store.query(&sql, params).await?;
        rows.iter().map(coupon_from_row).collect()
    }

    /// Totals for one beneficiary with per-round and per-type breakdowns.
    pub async fn beneficiary_summary(
        &self,
        beneficiary: &str,
    ) -> Result<BeneficiarySummary> {
        let totals = self
            .store
            .query_one(
                "SELECT COALESCE(SUM(cc_amount), 0) AS total_cc,
                        COUNT(*) AS coupon_count
                 FROM reward_coupons WHERE beneficiary = ?",
                vec![SqlValue::Text(beneficiary.to_string())],
            )
            .await?;
        let (total_cc, coupon_count) = match &totals {
            Some(row) => (row.try_get("total_cc")?, row.try_get("coupon_count")?),
            None => (0.0, 0),
        };

        let by_round = self
            .store
            .query(
                "SELECT round, SUM(cc_amount) AS total_cc
                 FROM reward_coupons WHERE beneficiary = ?
                 GROUP BY round ORDER BY round",
                vec![SqlValue::Text(beneficiary.to_string())],
            )
            .await?
            .iter()
            .map(|row| Ok((row.try_get("round")?, row.try_get("total_cc")?)))
            .collect::<Result<Vec<(i64, f64)>>>()?;

        let by_type = self
            .store
            .query(
                "SELECT coupon_type, SUM(cc_amount) AS total_cc
                 FROM reward_coupons WHERE beneficiary = ?
                 GROUP BY coupon_type ORDER BY coupon_type",
                vec![SqlValue::Text(beneficiary.to_string())],
            )
            .await?
            .iter()
            .map(|row| Ok((row.try_get("coupon_type")?, row.try_get("total_cc")?)))
            .collect::<Result<Vec<(String, f64)>>>()?;

        Ok(BeneficiarySummary {
            beneficiary: beneficiary.to_string(),
            total_cc,
            coupon_count,
            by_round,
            by_type,
        })
    }
}

fn coupon_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RewardCoupon> {
    Ok(RewardCoupon {
        event_id: row.try_get("event_id")?,
        contract_id: row.try_get("contract_id")?,
        template_id: row.try_get("template_id")?,
        effective_at: row
            .try_get::<Option<String>, _>("effective_at")?
            .as_deref()
            .and_then(ts_parse),
        round: row.try_get("round")?,
        coupon_type: CouponKind::from_str(&row.try_get::<String, _>("coupon_type")?)?,
        beneficiary: row.try_get("beneficiary")?,
        weight: row.try_get("weight")?,
        cc_amount: row.try_get("cc_amount")?,
        has_issuance_data: row.try_get("has_issuance_data")?,
    })
}
