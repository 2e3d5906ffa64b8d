use crate::error::{PaymentError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// ISO 4217 currencies the platform settles in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Ngn,
    Ghs,
    Kes,
    Zar,
    Tzs,
    Ugx,
    Rwf,
    Xof,
    Xaf,
}

impl Currency {
    /// Number of decimal places of the currency's minor unit.
    pub fn minor_exponent(self) -> u32 {
        match self {
            Currency::Ugx | Currency::Rwf | Currency::Xof | Currency::Xaf => 0,
            _ => 2,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Ngn => "NGN",
            Currency::Ghs => "GHS",
            Currency::Kes => "KES",
            Currency::Zar => "ZAR",
            Currency::Tzs => "TZS",
            Currency::Ugx => "UGX",
            Currency::Rwf => "RWF",
            Currency::Xof => "XOF",
            Currency::Xaf => "XAF",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        let currency = match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Currency::Usd,
            "EUR" => Currency::Eur,
            "GBP" => Currency::Gbp,
            "NGN" => Currency::Ngn,
            "GHS" => Currency::Ghs,
            "KES" => Currency::Kes,
            "ZAR" => Currency::Zar,
            "TZS" => Currency::Tzs,
            "UGX" => Currency::Ugx,
            "RWF" => Currency::Rwf,
            "XOF" => Currency::Xof,
            "XAF" => Currency::Xaf,
            other => {
                return Err(PaymentError::ValidationError(format!(
                    "Unsupported currency: {}",
                    other
                )));
            }
        };
        Ok(currency)
    }
}

/// ISO 3166-1 alpha-2 country code, always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

impl CountryCode {
    pub fn new(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(PaymentError::ValidationError(format!(
                "Invalid country code: {:?}",
                code
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CountryCode {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<CountryCode> for String {
    fn from(code: CountryCode) -> Self {
        code.0
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Represents a positive monetary amount in major units.
///
/// Wallet and payout arithmetic only ever accepts `Amount`, so zero or
/// negative movements are rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Converts an integer minor-unit amount (e.g. cents) to decimal major units.
pub fn minor_to_major(minor: i64, currency: Currency) -> Decimal {
    Decimal::new(minor, currency.minor_exponent())
}

/// Converts decimal major units to integer minor units.
///
/// Values carrying more precision than the currency's minor unit are rejected
/// instead of rounded, so no fraction of a cent is silently created or lost.
pub fn major_to_minor(major: Decimal, currency: Currency) -> Result<i64> {
    let exponent = currency.minor_exponent();
    let scaled = major * Decimal::from(10_i64.pow(exponent));
    if scaled.fract() != Decimal::ZERO {
        return Err(PaymentError::ValidationError(format!(
            "{} has more than {} decimal places for {}",
            major, exponent, currency
        )));
    }
    i64::try_from(scaled.trunc()).map_err(|_| {
        PaymentError::ValidationError(format!("{} {} is out of range", major, currency))
    })
}

/// Rounds a major-unit value to the currency's minor unit.
pub fn round_to_minor(value: Decimal, currency: Currency) -> Decimal {
    value.round_dp_with_strategy(currency.minor_exponent(), RoundingStrategy::MidpointAwayFromZero)
}

/// Deterministic rate-table conversion into USD.
#[derive(Debug, Clone)]
pub struct CurrencyConverter {
    usd_per_unit: HashMap<Currency, Decimal>,
}

impl CurrencyConverter {
    pub fn new(usd_per_unit: HashMap<Currency, Decimal>) -> Self {
        Self { usd_per_unit }
    }

    /// Converts `amount` (major units of `currency`) into USD, rounded to cents
    /// with midpoint-away-from-zero.
    pub fn normalize_to_usd(&self, amount: Decimal, currency: Currency) -> Result<Decimal> {
        if currency == Currency::Usd {
            return Ok(round_to_minor(amount, Currency::Usd));
        }
        let rate = self.usd_per_unit.get(&currency).ok_or_else(|| {
            PaymentError::ValidationError(format!("No USD rate configured for {}", currency))
        })?;
        Ok(round_to_minor(amount * *rate, Currency::Usd))
    }

    /// Converts between any two configured currencies via USD.
    pub fn convert(&self, amount: Decimal, from: Currency, to: Currency) -> Result<Decimal> {
        if from == to {
            return Ok(amount);
        }
        let usd = self.normalize_to_usd(amount, from)?;
        if to == Currency::Usd {
            return Ok(usd);
        }
        let rate = self.usd_per_unit.get(&to).ok_or_else(|| {
            PaymentError::ValidationError(format!("No USD rate configured for {}", to))
        })?;
        if rate.is_zero() {
            return Err(PaymentError::ValidationError(format!(
                "USD rate for {} is zero",
                to
            )));
        }
        Ok(round_to_minor(usd / *rate, to))
    }
}
