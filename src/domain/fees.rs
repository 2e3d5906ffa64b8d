use crate::domain::payment::PaymentKind;
use crate::error::{PaymentError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

fn validate_percent(fee_percent: Decimal) -> Result<()> {
    if fee_percent < Decimal::ZERO || fee_percent > HUNDRED {
        return Err(PaymentError::ValidationError(format!(
            "Fee percent must be within [0, 100], got {}",
            fee_percent
        )));
    }
    Ok(())
}

/// `round(amount_minor * fee_percent / 100)`, midpoint away from zero.
pub fn calculate_platform_fee(amount_minor: i64, fee_percent: Decimal) -> Result<i64> {
    validate_percent(fee_percent)?;
    if amount_minor < 0 {
        return Err(PaymentError::ValidationError(
            "Amount must not be negative".to_string(),
        ));
    }
    let fee = (Decimal::from(amount_minor) * fee_percent / HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    i64::try_from(fee)
        .map_err(|_| PaymentError::ValidationError(format!("Fee {} is out of range", fee)))
}

/// Whatever the platform fee does not take. Never leaks a rounding remainder.
pub fn calculate_creator_payout(amount_minor: i64, fee_percent: Decimal) -> Result<i64> {
    Ok(amount_minor - calculate_platform_fee(amount_minor, fee_percent)?)
}

/// A fee split frozen into a payment at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub fee_percent: Decimal,
    pub platform_fee: i64,
    pub creator_earnings: i64,
}

impl FeeSplit {
    pub fn compute(amount_minor: i64, fee_percent: Decimal) -> Result<Self> {
        let platform_fee = calculate_platform_fee(amount_minor, fee_percent)?;
        Ok(Self {
            fee_percent,
            platform_fee,
            creator_earnings: amount_minor - platform_fee,
        })
    }

    pub fn total(&self) -> i64 {
        self.platform_fee + self.creator_earnings
    }
}

/// Which platform percentage applies to which kind of payment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeePolicy {
    pub standard_percent: Decimal,
    pub ai_upgrade_percent: Decimal,
}

impl FeePolicy {
    pub fn percent_for(&self, kind: &PaymentKind) -> Decimal {
        match kind {
            PaymentKind::AiUpgrade { .. } => self.ai_upgrade_percent,
            _ => self.standard_percent,
        }
    }

    pub fn split(&self, amount_minor: i64, kind: &PaymentKind) -> Result<FeeSplit> {
        FeeSplit::compute(amount_minor, self.percent_for(kind))
    }
}
