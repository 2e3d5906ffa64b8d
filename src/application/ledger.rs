use crate::application::context::{Actor, Context};
use crate::domain::UserId;
use crate::domain::money::Amount;
use crate::domain::ports::CommitOutcome;
use crate::domain::wallet::{EntryKind, LedgerEntry, SettlementOutcome, Wallet};
use crate::error::{PaymentError, Result};
use uuid::Uuid;

/// How many times a wallet mutation is retried after losing a version race.
const MAX_COMMIT_ATTEMPTS: usize = 16;

/// Owns every wallet mutation.
///
/// Each operation is one optimistic read-modify-write: load the wallet (or a
/// fresh one), apply the change, check the balance invariants and commit it
/// together with its ledger entry. Losing the version race reloads and retries.
#[derive(Clone)]
pub struct LedgerManager {
    ctx: Context,
}

impl LedgerManager {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// The stored wallet, or an empty unsaved one.
    pub async fn wallet(&self, user_id: UserId) -> Result<Wallet> {
        match self.ctx.stores.wallets.get(user_id).await? {
            Some(wallet) => Ok(wallet),
            None => Ok(Wallet::new(
                user_id,
                self.ctx.config.snapshot().wallet_currency,
                self.ctx.clock.now(),
            )),
        }
    }

    async fn mutate<F>(&self, user_id: UserId, entry: Option<LedgerEntry>, op: F) -> Result<(Wallet, CommitOutcome)>
    where
        F: Fn(&mut Wallet) -> Result<()>,
    {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let mut wallet = self.wallet(user_id).await?;
            op(&mut wallet)?;
            wallet.check_invariants()?;
            wallet.updated_at = self.ctx.clock.now();

            match self.ctx.stores.wallets.commit(&mut wallet, entry.clone()).await? {
                CommitOutcome::Committed => return Ok((wallet, CommitOutcome::Committed)),
                CommitOutcome::DuplicateEntry => {
                    return Ok((self.wallet(user_id).await?, CommitOutcome::DuplicateEntry));
                }
                CommitOutcome::VersionConflict => {
                    tracing::debug!(wallet_id = %user_id, attempt, "wallet version conflict, retrying");
                    tokio::task::yield_now().await;
                }
            }
        }
        tracing::error!(wallet_id = %user_id, "wallet update kept conflicting");
        Err(PaymentError::ConcurrentModification(format!(
            "Wallet {} is being modified concurrently",
            user_id
        )))
    }

    /// Moves `amount` from available into `pending_payouts`.
    pub async fn reserve_for_payout(&self, wallet_id: UserId, amount: Amount) -> Result<Wallet> {
        let (wallet, _) = self
            .mutate(wallet_id, None, |wallet| wallet.reserve(amount))
            .await?;
        tracing::info!(wallet_id = %wallet_id, amount = %amount, "reserved funds for payout");
        Ok(wallet)
    }

    pub async fn settle_payout(
        &self,
        wallet_id: UserId,
        payout_id: Uuid,
        amount: Amount,
        outcome: SettlementOutcome,
    ) -> Result<Wallet> {
        let entry = (outcome == SettlementOutcome::Completed).then(|| {
            LedgerEntry::new(
                wallet_id,
                EntryKind::PayoutDebit,
                amount.value(),
                self.ctx.config.snapshot().wallet_currency,
                format!("payout:{}", payout_id),
                self.ctx.clock.now(),
            )
        });
        let (wallet, committed) = self
            .mutate(wallet_id, entry, |wallet| wallet.settle(amount, outcome))
            .await?;
        if committed == CommitOutcome::DuplicateEntry {
            tracing::warn!(wallet_id = %wallet_id, payout_id = %payout_id, "payout already settled");
        } else {
            tracing::info!(wallet_id = %wallet_id, payout_id = %payout_id, outcome = ?outcome, "payout settled");
        }
        Ok(wallet)
    }

    pub async fn freeze(&self, wallet_id: UserId, reason: &str) -> Result<Wallet> {
        let (wallet, _) = self
            .mutate(wallet_id, None, |wallet| {
                wallet.freeze(reason);
                Ok(())
            })
            .await?;
        tracing::warn!(wallet_id = %wallet_id, reason = %reason, "wallet frozen");
        Ok(wallet)
    }

    pub async fn unfreeze(&self, actor: Actor, wallet_id: UserId) -> Result<Wallet> {
        let admin_id = actor.require_admin("unfreeze wallets")?;
        let (wallet, _) = self
            .mutate(wallet_id, None, |wallet| {
                wallet.unfreeze();
                Ok(())
            })
            .await?;
        tracing::info!(wallet_id = %wallet_id, admin_id = %admin_id, "wallet unfrozen");
        Ok(wallet)
    }

    /// Credits confirmed funds once per `(user, kind, source)`. Returns false
    /// when the source was already credited.
    pub async fn credit_earnings(
        &self,
        user_id: UserId,
        kind: EntryKind,
        amount: Amount,
        source: &str,
    ) -> Result<bool> {
        let entry = LedgerEntry::new(
            user_id,
            kind,
            amount.value(),
            self.ctx.config.snapshot().wallet_currency,
            source,
            self.ctx.clock.now(),
        );
        let (_, committed) = self
            .mutate(user_id, Some(entry), |wallet| {
                wallet.credit(amount);
                Ok(())
            })
            .await?;
        let credited = committed == CommitOutcome::Committed;
        if credited {
            tracing::info!(user_id = %user_id, kind = ?kind, amount = %amount, source = %source, "wallet credited");
        } else {
            tracing::debug!(user_id = %user_id, source = %source, "credit already applied");
        }
        Ok(credited)
    }

    /// Records an amount to recover from future credits, once per source.
    pub async fn record_debt(&self, user_id: UserId, amount: Amount, source: &str) -> Result<bool> {
        let entry = LedgerEntry::new(
            user_id,
            EntryKind::ChargebackDebt,
            amount.value(),
            self.ctx.config.snapshot().wallet_currency,
            source,
            self.ctx.clock.now(),
        );
        let (_, committed) = self
            .mutate(user_id, Some(entry), |wallet| {
                wallet.add_debt(amount);
                Ok(())
            })
            .await?;
        let recorded = committed == CommitOutcome::Committed;
        if recorded {
            tracing::warn!(user_id = %user_id, amount = %amount, source = %source, "debt recorded");
        }
        Ok(recorded)
    }

    pub async fn entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        self.ctx.stores.wallets.entries(user_id).await
    }
}
