use crate::domain::money::Currency;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// External payment providers the platform integrates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Global card processor.
    Stripe,
    /// Regional card processor.
    Paystack,
    /// Card and mobile-money processor.
    Flutterwave,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Stripe, Provider::Paystack, Provider::Flutterwave];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Stripe => "stripe",
            Provider::Paystack => "paystack",
            Provider::Flutterwave => "flutterwave",
        }
    }

    /// Static capability table used for routing.
    pub fn capabilities(self) -> ProviderCapabilities {
        use Currency::*;
        match self {
            Provider::Stripe => ProviderCapabilities {
                collects: vec![PaymentMethod::Card],
                pays_out: vec![PayoutMethod::BankTransfer],
                currencies: vec![Usd, Eur, Gbp, Zar],
            },
            Provider::Paystack => ProviderCapabilities {
                collects: vec![PaymentMethod::Card],
                pays_out: vec![PayoutMethod::BankTransfer],
                currencies: vec![Ngn, Ghs, Zar, Kes, Usd],
            },
            Provider::Flutterwave => ProviderCapabilities {
                collects: vec![PaymentMethod::Card, PaymentMethod::MobileMoney],
                pays_out: vec![PayoutMethod::BankTransfer, PayoutMethod::MobileMoney],
                currencies: vec![Ngn, Ghs, Kes, Ugx, Rwf, Tzs, Xof, Xaf, Usd],
            },
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = crate::error::PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(Provider::Stripe),
            "paystack" => Ok(Provider::Paystack),
            "flutterwave" => Ok(Provider::Flutterwave),
            other => Err(crate::error::PaymentError::ValidationError(format!(
                "Unknown provider: {}",
                other
            ))),
        }
    }
}

/// How a fan pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    MobileMoney,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Card => f.write_str("card"),
            PaymentMethod::MobileMoney => f.write_str("mobile_money"),
        }
    }
}

/// How a creator is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    BankTransfer,
    MobileMoney,
}

impl fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutMethod::BankTransfer => f.write_str("bank_transfer"),
            PayoutMethod::MobileMoney => f.write_str("mobile_money"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub collects: Vec<PaymentMethod>,
    pub pays_out: Vec<PayoutMethod>,
    pub currencies: Vec<Currency>,
}

impl ProviderCapabilities {
    pub fn can_collect(&self, method: PaymentMethod, currency: Currency) -> bool {
        self.collects.contains(&method) && self.currencies.contains(&currency)
    }

    pub fn can_pay_out(&self, method: PayoutMethod, currency: Currency) -> bool {
        self.pays_out.contains(&method) && self.currencies.contains(&currency)
    }
}

/// Request to open a hosted checkout with a provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRequest {
    /// Locally generated reference the provider echoes back in events.
    pub reference: String,
    pub amount_minor: i64,
    pub currency: Currency,
    pub payer_email: String,
    pub method: PaymentMethod,
    pub phone_number: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Where the payer completes the checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Redirect {
    Url(String),
    ClientSecret(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub reference: String,
    pub redirect: Redirect,
}

/// Authoritative status as reported by the provider's verify endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Successful,
    Failed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRequest {
    pub payout_id: uuid::Uuid,
    pub amount: rust_decimal::Decimal,
    pub currency: Currency,
    pub method: PayoutMethod,
    pub account_details: crate::domain::payout::AccountDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub payout_id: String,
    pub status: TransferStatus,
}

/// Port for a single payment provider integration.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    fn provider(&self) -> Provider;

    async fn create_session(&self, request: SessionRequest) -> Result<ProviderSession>;

    async fn verify(&self, reference: &str) -> Result<VerificationStatus>;

    async fn initiate_transfer(&self, request: TransferRequest) -> Result<Transfer>;
}
