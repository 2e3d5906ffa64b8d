use crate::domain::UserId;
use crate::domain::money::{Amount, Currency};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a reserved payout ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// A creator's withdrawable funds, in decimal major units of `currency`.
///
/// `balance` counts every confirmed credit not yet paid out; `pending_payouts`
/// is the part of it reserved by open payout requests. `outstanding_debt`
/// accumulates lost chargebacks and is repaid from future credits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Decimal,
    pub pending_payouts: Decimal,
    pub outstanding_debt: Decimal,
    pub currency: Currency,
    pub frozen: bool,
    pub frozen_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Wallet {
    pub fn new(user_id: UserId, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            pending_payouts: Decimal::ZERO,
            outstanding_debt: Decimal::ZERO,
            currency,
            frozen: false,
            frozen_reason: None,
            updated_at: now,
            version: 0,
        }
    }

    /// Funds that are neither reserved nor owed.
    pub fn available(&self) -> Decimal {
        self.balance - self.pending_payouts
    }

    /// Credits confirmed earnings, repaying outstanding debt first.
    /// Returns the part that reached the balance.
    pub fn credit(&mut self, amount: Amount) -> Decimal {
        let amount = amount.value();
        let repaid = amount.min(self.outstanding_debt);
        self.outstanding_debt -= repaid;
        let credited = amount - repaid;
        self.balance += credited;
        credited
    }

    /// Reserves funds for a payout request.
    pub fn reserve(&mut self, amount: Amount) -> Result<()> {
        if self.frozen {
            return Err(PaymentError::WalletFrozen {
                wallet_id: self.user_id,
                reason: self.frozen_reason.clone().unwrap_or_default(),
            });
        }
        let available = self.available();
        if available < amount.value() {
            return Err(PaymentError::InsufficientBalance {
                requested: amount.value(),
                available,
            });
        }
        self.pending_payouts += amount.value();
        Ok(())
    }

    /// Settles a reservation. Completed payouts leave the wallet; failed or
    /// cancelled ones return to the available balance.
    pub fn settle(&mut self, amount: Amount, outcome: SettlementOutcome) -> Result<()> {
        if self.pending_payouts < amount.value() {
            return Err(PaymentError::ValidationError(format!(
                "Settlement of {} exceeds pending payouts {}",
                amount, self.pending_payouts
            )));
        }
        self.pending_payouts -= amount.value();
        if outcome == SettlementOutcome::Completed {
            self.balance -= amount.value();
        }
        Ok(())
    }

    pub fn freeze(&mut self, reason: impl Into<String>) -> bool {
        let changed = !self.frozen;
        self.frozen = true;
        self.frozen_reason = Some(reason.into());
        changed
    }

    pub fn unfreeze(&mut self) -> bool {
        let changed = self.frozen;
        self.frozen = false;
        self.frozen_reason = None;
        changed
    }

    /// Records an amount to be recovered from future credits.
    pub fn add_debt(&mut self, amount: Amount) {
        self.outstanding_debt += amount.value();
    }

    pub fn check_invariants(&self) -> Result<()> {
        if self.pending_payouts < Decimal::ZERO || self.balance < self.pending_payouts {
            return Err(PaymentError::InternalError(
                format!(
                    "Wallet {} violates balance >= pending_payouts >= 0 ({} / {})",
                    self.user_id, self.balance, self.pending_payouts
                )
                .into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Earning,
    ReferralCommission,
    PayoutDebit,
    ChargebackDebt,
}

/// Append-only record of a wallet movement. `(user_id, kind, source)` is unique,
/// which is what makes crediting from replayed events idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub currency: Currency,
    /// Business key of what caused the movement, e.g. `payment:<uuid>`.
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        user_id: UserId,
        kind: EntryKind,
        amount: Decimal,
        currency: Currency,
        source: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            currency,
            source: source.into(),
            created_at: now,
        }
    }

    pub fn key(&self) -> (UserId, EntryKind, String) {
        (self.user_id, self.kind, self.source.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    fn wallet_with(balance: Decimal) -> Wallet {
        let mut wallet = Wallet::new(Uuid::new_v4(), Currency::Usd, Utc::now());
        wallet.credit(amount(balance));
        wallet
    }

    #[test]
    fn test_reserve_success() {
        let mut wallet = wallet_with(dec!(100));
        wallet.reserve(amount(dec!(60))).unwrap();
        assert_eq!(wallet.pending_payouts, dec!(60));
        assert_eq!(wallet.available(), dec!(40));
        wallet.check_invariants().unwrap();
    }

    #[test]
    fn test_reserve_insufficient() {
        let mut wallet = wallet_with(dec!(100));
        wallet.reserve(amount(dec!(60))).unwrap();
        let result = wallet.reserve(amount(dec!(60)));
        assert!(matches!(
            result,
            Err(PaymentError::InsufficientBalance { .. })
        ));
        assert_eq!(wallet.pending_payouts, dec!(60));
    }

    #[test]
    fn test_frozen_wallet_rejects_reserve_regardless_of_balance() {
        let mut wallet = wallet_with(dec!(1000));
        wallet.freeze("chargeback:1");
        assert!(matches!(
            wallet.reserve(amount(dec!(1))),
            Err(PaymentError::WalletFrozen { .. })
        ));
    }

    #[test]
    fn test_settle_completed_debits_balance() {
        let mut wallet = wallet_with(dec!(100));
        wallet.reserve(amount(dec!(30))).unwrap();
        wallet
            .settle(amount(dec!(30)), SettlementOutcome::Completed)
            .unwrap();
        assert_eq!(wallet.balance, dec!(70));
        assert_eq!(wallet.pending_payouts, dec!(0));
    }

    #[test]
    fn test_settle_failed_returns_funds() {
        let mut wallet = wallet_with(dec!(100));
        wallet.reserve(amount(dec!(30))).unwrap();
        wallet
            .settle(amount(dec!(30)), SettlementOutcome::Failed)
            .unwrap();
        assert_eq!(wallet.balance, dec!(100));
        assert_eq!(wallet.available(), dec!(100));
    }

    #[test]
    fn test_settle_more_than_reserved_is_rejected() {
        let mut wallet = wallet_with(dec!(100));
        wallet.reserve(amount(dec!(10))).unwrap();
        assert!(
            wallet
                .settle(amount(dec!(20)), SettlementOutcome::Completed)
                .is_err()
        );
        assert_eq!(wallet.balance, dec!(100));
    }

    #[test]
    fn test_credit_repays_debt_first() {
        let mut wallet = wallet_with(dec!(0.01));
        wallet.add_debt(amount(dec!(25)));
        assert_eq!(wallet.credit(amount(dec!(10))), dec!(0));
        assert_eq!(wallet.outstanding_debt, dec!(15));
        assert_eq!(wallet.credit(amount(dec!(20))), dec!(5));
        assert_eq!(wallet.outstanding_debt, dec!(0));
        assert_eq!(wallet.balance, dec!(5.01));
    }
}
