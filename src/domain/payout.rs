use crate::domain::UserId;
use crate::domain::money::{Amount, CountryCode, Currency};
use crate::domain::provider::{PayoutMethod, Provider};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PayoutStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PayoutStatus::Completed | PayoutStatus::Failed | PayoutStatus::Cancelled
        )
    }

    /// Allowed edges of the payout state machine.
    pub fn can_transition_to(self, next: PayoutStatus) -> bool {
        matches!(
            (self, next),
            (PayoutStatus::Pending, PayoutStatus::Processing)
                | (PayoutStatus::Pending, PayoutStatus::Cancelled)
                | (PayoutStatus::Pending, PayoutStatus::Failed)
                | (PayoutStatus::Processing, PayoutStatus::Completed)
                | (PayoutStatus::Processing, PayoutStatus::Failed)
        )
    }
}

/// Destination details. Which fields are required depends on the method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDetails {
    pub account_name: Option<String>,
    pub phone_number: Option<String>,
    pub account_number: Option<String>,
    pub bank_code: Option<String>,
    pub country: Option<CountryCode>,
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl AccountDetails {
    pub fn validate_for(&self, method: PayoutMethod) -> Result<()> {
        match method {
            PayoutMethod::MobileMoney if !present(&self.phone_number) => Err(
                PaymentError::ValidationError("phoneNumber is required for mobile money payouts".into()),
            ),
            PayoutMethod::BankTransfer
                if !present(&self.account_number) || !present(&self.bank_code) =>
            {
                Err(PaymentError::ValidationError(
                    "accountNumber and bankCode are required for bank transfers".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// A creator's withdrawal request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: Uuid,
    pub wallet_id: UserId,
    pub amount: Amount,
    pub currency: Currency,
    pub method: PayoutMethod,
    pub status: PayoutStatus,
    pub account_details: AccountDetails,
    pub admin_notes: Option<String>,
    pub provider: Option<Provider>,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl PayoutRequest {
    pub fn new(
        wallet_id: UserId,
        amount: Amount,
        currency: Currency,
        method: PayoutMethod,
        account_details: AccountDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            amount,
            currency,
            method,
            status: PayoutStatus::Pending,
            account_details,
            admin_notes: None,
            provider: None,
            provider_reference: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn transition(&mut self, next: PayoutStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PaymentError::Conflict(format!(
                "Payout {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Whether the request still holds a wallet reservation.
    pub fn holds_reservation(&self) -> bool {
        !self.status.is_terminal()
    }
}
