use crate::domain::UserId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const MAX_SCORE: u8 = 100;

/// Behavioural inputs to the risk score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSignals {
    pub chargeback_count: u32,
    pub payment_count: u32,
    pub failed_payment_count: u32,
    pub new_subscribers_last_30d: u32,
    pub new_subscribers_prior_30d: u32,
    pub pre_kyc_payout_requests: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    Chargebacks,
    HighFailureRate,
    RapidGrowth,
    PreKycPayouts,
    PayoutsBlocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub per_chargeback: u32,
    pub chargeback_cap: u32,
    /// Points at a 100% failure rate.
    pub failure_rate: u32,
    /// Minimum payments before the failure rate counts.
    pub failure_rate_min_sample: u32,
    pub growth: u32,
    pub growth_min_new: u32,
    pub growth_ratio: u32,
    pub per_pre_kyc_request: u32,
    pub pre_kyc_cap: u32,
    pub elevated_threshold: u8,
    pub high_threshold: u8,
    pub block_threshold: u8,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            per_chargeback: 15,
            chargeback_cap: 45,
            failure_rate: 30,
            failure_rate_min_sample: 5,
            growth: 15,
            growth_min_new: 20,
            growth_ratio: 3,
            per_pre_kyc_request: 5,
            pre_kyc_cap: 10,
            elevated_threshold: 30,
            high_threshold: 60,
            block_threshold: 80,
        }
    }
}

/// Pure scoring: identical signals and weights always yield the same score and flags.
pub fn score(signals: &RiskSignals, weights: &RiskWeights) -> (u8, Vec<RiskFlag>) {
    let mut flags = Vec::new();
    let mut total: u32 = 0;

    if signals.chargeback_count > 0 {
        total += (signals.chargeback_count.saturating_mul(weights.per_chargeback))
            .min(weights.chargeback_cap);
        flags.push(RiskFlag::Chargebacks);
    }

    if signals.payment_count >= weights.failure_rate_min_sample && signals.payment_count > 0 {
        let failed = signals.failed_payment_count.min(signals.payment_count);
        let points = (u64::from(failed) * u64::from(weights.failure_rate)
            + u64::from(signals.payment_count) / 2)
            / u64::from(signals.payment_count);
        if failed * 2 >= signals.payment_count {
            flags.push(RiskFlag::HighFailureRate);
        }
        total += points as u32;
    }

    let growth_floor = signals
        .new_subscribers_prior_30d
        .saturating_mul(weights.growth_ratio);
    if signals.new_subscribers_last_30d >= weights.growth_min_new
        && signals.new_subscribers_last_30d > growth_floor
    {
        total += weights.growth;
        flags.push(RiskFlag::RapidGrowth);
    }

    if signals.pre_kyc_payout_requests > 0 {
        total += (signals
            .pre_kyc_payout_requests
            .saturating_mul(weights.per_pre_kyc_request))
        .min(weights.pre_kyc_cap);
        flags.push(RiskFlag::PreKycPayouts);
    }

    let score = total.min(u32::from(MAX_SCORE)) as u8;
    if score >= weights.block_threshold {
        flags.push(RiskFlag::PayoutsBlocked);
    }
    (score, flags)
}

/// Share of the base payout limits a score keeps.
pub fn limit_factor(score: u8, weights: &RiskWeights) -> Decimal {
    if score >= weights.block_threshold {
        Decimal::ZERO
    } else if score >= weights.high_threshold {
        dec!(0.25)
    } else if score >= weights.elevated_threshold {
        dec!(0.5)
    } else {
        Decimal::ONE
    }
}

/// Current risk assessment of a creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub user_id: UserId,
    pub risk_score: u8,
    pub monthly_limit: Decimal,
    pub daily_limit: Decimal,
    pub payouts_blocked: bool,
    pub flags: Vec<RiskFlag>,
    pub signals: RiskSignals,
    pub computed_at: DateTime<Utc>,
}

impl RiskProfile {
    pub fn assess(
        user_id: UserId,
        signals: RiskSignals,
        weights: &RiskWeights,
        base_monthly: Decimal,
        base_daily: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        let (risk_score, flags) = score(&signals, weights);
        let factor = limit_factor(risk_score, weights);
        Self {
            user_id,
            risk_score,
            monthly_limit: base_monthly * factor,
            daily_limit: base_daily * factor,
            payouts_blocked: factor.is_zero(),
            flags,
            signals,
            computed_at: now,
        }
    }

    /// Whether the assessment would differ from `other` ignoring timestamps.
    pub fn same_assessment(&self, other: &RiskProfile) -> bool {
        self.risk_score == other.risk_score
            && self.monthly_limit == other.monthly_limit
            && self.daily_limit == other.daily_limit
            && self.payouts_blocked == other.payouts_blocked
            && self.flags == other.flags
            && self.signals == other.signals
    }
}
