//! Engine configuration.
//!
//! Every tunable lives in [`EngineConfig`]. Services take one
//! [`ConfigHandle::snapshot`] per operation so a reload never changes the
//! numbers halfway through a payment.

use crate::domain::UserId;
use crate::domain::dunning::DunningSchedule;
use crate::domain::fees::FeePolicy;
use crate::domain::money::{CountryCode, Currency, CurrencyConverter};
use crate::domain::provider::Provider;
use crate::domain::risk::RiskWeights;
use crate::error::{PaymentError, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Country tables the provider selector falls back to when the caller
/// gives no preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingTable {
    pub mobile_money_countries: Vec<CountryCode>,
    pub regional_card_countries: Vec<CountryCode>,
}

fn countries(codes: &[&str]) -> Vec<CountryCode> {
    codes
        .iter()
        .filter_map(|code| CountryCode::new(code).ok())
        .collect()
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            mobile_money_countries: countries(&["KE", "UG", "GH", "RW", "TZ", "ZM", "CI", "SN", "CM"]),
            regional_card_countries: countries(&["NG", "ZA", "GH", "KE"]),
        }
    }
}

impl RoutingTable {
    pub fn is_mobile_money_country(&self, country: &CountryCode) -> bool {
        self.mobile_money_countries.contains(country)
    }

    pub fn is_regional_card_country(&self, country: &CountryCode) -> bool {
        self.regional_card_countries.contains(country)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Platform share of tips, PPV and subscriptions, in percent.
    pub fee_percent: Decimal,
    /// Platform share of AI upgrade purchases, in percent.
    pub ai_upgrade_platform_percent: Decimal,
    pub referral_commission_percent: Decimal,
    /// Hours between consecutive dunning attempts, first one counted from the failure.
    pub dunning_delays_hours: Vec<i64>,
    pub past_due_grace_days: i64,
    pub monthly_cycle_days: i64,
    pub yearly_cycle_days: i64,
    /// Amounts below are in `wallet_currency`.
    pub minimum_payout: Decimal,
    pub base_monthly_payout_limit: Decimal,
    pub base_daily_payout_limit: Decimal,
    pub chargeback_fees: HashMap<Provider, Decimal>,
    pub risk: RiskWeights,
    /// USD value of one major unit of each currency.
    pub usd_rates: HashMap<Currency, Decimal>,
    pub wallet_currency: Currency,
    pub routing: RoutingTable,
    /// Users notified about new chargebacks.
    pub admin_reviewers: Vec<UserId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_percent: dec!(5),
            ai_upgrade_platform_percent: dec!(100),
            referral_commission_percent: dec!(10),
            dunning_delays_hours: vec![12, 24, 72, 120],
            past_due_grace_days: 7,
            monthly_cycle_days: 30,
            yearly_cycle_days: 365,
            minimum_payout: dec!(10),
            base_monthly_payout_limit: dec!(10000),
            base_daily_payout_limit: dec!(2000),
            chargeback_fees: HashMap::from([
                (Provider::Stripe, dec!(15)),
                (Provider::Paystack, dec!(5)),
                (Provider::Flutterwave, dec!(5)),
            ]),
            risk: RiskWeights::default(),
            usd_rates: HashMap::from([
                (Currency::Eur, dec!(1.08)),
                (Currency::Gbp, dec!(1.27)),
                (Currency::Ngn, dec!(0.00065)),
                (Currency::Ghs, dec!(0.083)),
                (Currency::Kes, dec!(0.0077)),
                (Currency::Zar, dec!(0.055)),
                (Currency::Tzs, dec!(0.00039)),
                (Currency::Ugx, dec!(0.00027)),
                (Currency::Rwf, dec!(0.00077)),
                (Currency::Xof, dec!(0.0017)),
                (Currency::Xaf, dec!(0.0017)),
            ]),
            wallet_currency: Currency::Usd,
            routing: RoutingTable::default(),
            admin_reviewers: Vec::new(),
        }
    }
}

fn check_percent(name: &str, value: Decimal) -> Result<()> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(PaymentError::ValidationError(format!(
            "{} must be within [0, 100], got {}",
            name, value
        )));
    }
    Ok(())
}

impl EngineConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: EngineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_percent("fee_percent", self.fee_percent)?;
        check_percent("ai_upgrade_platform_percent", self.ai_upgrade_platform_percent)?;
        check_percent("referral_commission_percent", self.referral_commission_percent)?;
        if self.dunning_delays_hours.is_empty() || self.dunning_delays_hours.iter().any(|h| *h <= 0) {
            return Err(PaymentError::ValidationError(
                "dunning_delays_hours must be a non-empty list of positive hours".into(),
            ));
        }
        if self.past_due_grace_days < 0 || self.monthly_cycle_days <= 0 || self.yearly_cycle_days <= 0 {
            return Err(PaymentError::ValidationError(
                "Billing cycle and grace periods must be positive".into(),
            ));
        }
        if self.minimum_payout < Decimal::ZERO
            || self.base_daily_payout_limit < Decimal::ZERO
            || self.base_monthly_payout_limit < Decimal::ZERO
        {
            return Err(PaymentError::ValidationError(
                "Payout minimum and limits must not be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy {
            standard_percent: self.fee_percent,
            ai_upgrade_percent: self.ai_upgrade_platform_percent,
        }
    }

    pub fn dunning_schedule(&self) -> DunningSchedule {
        DunningSchedule::from_hours(&self.dunning_delays_hours)
    }

    pub fn converter(&self) -> CurrencyConverter {
        CurrencyConverter::new(self.usd_rates.clone())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::days(self.past_due_grace_days)
    }

    pub fn cycle_length(&self, interval: crate::domain::subscription::BillingInterval) -> Duration {
        use crate::domain::subscription::BillingInterval;
        match interval {
            BillingInterval::Monthly => Duration::days(self.monthly_cycle_days),
            BillingInterval::Yearly => Duration::days(self.yearly_cycle_days),
        }
    }

    pub fn chargeback_fee(&self, provider: Provider) -> Decimal {
        self.chargeback_fees
            .get(&provider)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Shared, reloadable configuration.
#[derive(Clone, Default)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<EngineConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// The configuration in force right now. Hold it for the whole operation.
    pub fn snapshot(&self) -> Arc<EngineConfig> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Replaces the configuration for operations started from now on.
    pub fn reload(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(config);
        tracing::info!("engine configuration reloaded");
        Ok(())
    }
}
