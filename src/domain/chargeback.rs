use crate::domain::UserId;
use crate::domain::money::Currency;
use crate::domain::provider::Provider;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargebackStatus {
    Open,
    Won,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargebackResolution {
    Won,
    Lost,
}

/// A payer-initiated reversal of a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chargeback {
    pub id: Uuid,
    pub user_id: UserId,
    pub creator_id: Option<UserId>,
    pub payment_id: Uuid,
    pub provider: Provider,
    /// Provider's dispute/transaction identifier; unique per provider.
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: ChargebackStatus,
    pub reason: Option<String>,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl Chargeback {
    pub fn wallet_freeze_reason(&self) -> String {
        format!("chargeback:{}", self.id)
    }

    pub fn resolve(
        &mut self,
        resolution: ChargebackResolution,
        admin_id: UserId,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status != ChargebackStatus::Open {
            return false;
        }
        self.status = match resolution {
            ChargebackResolution::Won => ChargebackStatus::Won,
            ChargebackResolution::Lost => ChargebackStatus::Lost,
        };
        self.resolved_by = Some(admin_id);
        self.resolved_at = Some(now);
        true
    }
}
