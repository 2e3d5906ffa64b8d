use crate::domain::UserId;
use crate::domain::fees::FeeSplit;
use crate::domain::money::{Currency, minor_to_major};
use crate::domain::provider::{Provider, Redirect};
use crate::domain::subscription::{BillingInterval, Tier};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

/// What a payment pays for. Each variant carries exactly the metadata it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentKind {
    Subscription {
        subscription_id: Uuid,
        tier: Tier,
        interval: BillingInterval,
        renewal: bool,
    },
    Tip {
        message: Option<String>,
    },
    Ppv {
        content_id: String,
    },
    AiUpgrade {
        plan: String,
    },
}

impl PaymentKind {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentKind::Subscription { .. } => "subscription",
            PaymentKind::Tip { .. } => "tip",
            PaymentKind::Ppv { .. } => "ppv",
            PaymentKind::AiUpgrade { .. } => "ai_upgrade",
        }
    }

    pub fn subscription_id(&self) -> Option<Uuid> {
        match self {
            PaymentKind::Subscription {
                subscription_id, ..
            } => Some(*subscription_id),
            _ => None,
        }
    }
}

/// A single charge against a fan, with its fee split frozen at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: UserId,
    /// `None` for platform purchases such as AI upgrades.
    pub creator_id: Option<UserId>,
    pub provider: Provider,
    /// Locally generated, unique across payments.
    pub reference: String,
    /// The provider's own id for the session, when it differs from `reference`.
    #[serde(default)]
    pub provider_reference: Option<String>,
    pub amount_minor: i64,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub kind: PaymentKind,
    pub fee: FeeSplit,
    pub redirect: Option<Redirect>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Payment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: UserId,
        creator_id: Option<UserId>,
        provider: Provider,
        amount_minor: i64,
        currency: Currency,
        kind: PaymentKind,
        fee: FeeSplit,
        now: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            user_id,
            creator_id,
            provider,
            reference: format!("pay_{}", id.simple()),
            provider_reference: None,
            amount_minor,
            currency,
            status: PaymentStatus::Pending,
            kind,
            fee,
            redirect: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn matches_reference(&self, reference: &str) -> bool {
        self.reference == reference || self.provider_reference.as_deref() == Some(reference)
    }

    /// Reference to quote when asking the provider about this payment.
    pub fn verification_reference(&self) -> &str {
        self.provider_reference.as_deref().unwrap_or(&self.reference)
    }

    pub fn platform_fee(&self) -> i64 {
        self.fee.platform_fee
    }

    pub fn creator_earnings(&self) -> i64 {
        self.fee.creator_earnings
    }

    pub fn amount_major(&self) -> Decimal {
        minor_to_major(self.amount_minor, self.currency)
    }

    pub fn creator_earnings_major(&self) -> Decimal {
        minor_to_major(self.fee.creator_earnings, self.currency)
    }

    /// Success is terminal; failed payments may still be recovered by a later
    /// verification. Returns whether the status changed.
    pub fn mark_success(&mut self, now: DateTime<Utc>) -> bool {
        match self.status {
            PaymentStatus::Success => false,
            PaymentStatus::Pending | PaymentStatus::Failed => {
                self.status = PaymentStatus::Success;
                self.failure_reason = None;
                self.updated_at = now;
                true
            }
        }
    }

    /// Only a pending payment can fail. Returns whether the status changed.
    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        match self.status {
            PaymentStatus::Pending => {
                self.status = PaymentStatus::Failed;
                self.failure_reason = Some(reason.into());
                self.updated_at = now;
                true
            }
            PaymentStatus::Success | PaymentStatus::Failed => false,
        }
    }
}
