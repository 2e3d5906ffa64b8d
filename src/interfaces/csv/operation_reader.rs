use crate::domain::chargeback::ChargebackResolution;
use crate::domain::money::Currency;
use crate::domain::subscription::Tier;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Tip,
    Ppv,
    Subscribe,
    Payout,
    Complete,
    Fail,
    Cancel,
    Chargeback,
    Resolve,
    Unfreeze,
}

/// The `method` column covers both collection and payout methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodColumn {
    Card,
    MobileMoney,
    BankTransfer,
}

/// One row of an operations file. Which columns matter depends on `op`;
/// users, payments and payouts are referred to by free-form labels.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OperationRecord {
    pub op: OperationKind,
    pub user: String,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub method: Option<MethodColumn>,
    #[serde(default)]
    pub tier: Option<Tier>,
    /// Phone number, `account_number/bank_code` or referrer label, per op.
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub outcome: Option<ChargebackResolution>,
}

/// Reads operations from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// so trailing optional columns may be left off.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows; a malformed row yields an error and reading continues.
    pub fn operations(self) -> impl Iterator<Item = Result<OperationRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
