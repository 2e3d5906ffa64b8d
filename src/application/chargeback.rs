use crate::application::context::{Actor, Context};
use crate::application::ledger::LedgerManager;
use crate::application::risk::RiskEngine;
use crate::domain::chargeback::{Chargeback, ChargebackResolution, ChargebackStatus};
use crate::domain::event::DisputeEvent;
use crate::domain::money::{Amount, round_to_minor};
use crate::domain::payment::Payment;
use crate::domain::ports::{Notification, NotificationKind};
use crate::error::{PaymentError, Result};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DisputeOutcome {
    Recorded { chargeback_id: Uuid },
    AlreadyRecorded { chargeback_id: Uuid },
    /// The dispute names no payment we know. Acknowledged without side effects.
    UnknownPayment,
}

#[derive(Clone)]
pub struct ChargebackHandler {
    ctx: Context,
    ledger: LedgerManager,
    risk: RiskEngine,
}

impl ChargebackHandler {
    pub fn new(ctx: Context, ledger: LedgerManager, risk: RiskEngine) -> Self {
        Self { ctx, ledger, risk }
    }

    async fn find_payment(&self, event: &DisputeEvent) -> Result<Option<Payment>> {
        if let Some(id) = event.payment_id
            && let Some(payment) = self.ctx.stores.payments.get(id).await?
        {
            return Ok(Some(payment));
        }
        match &event.reference {
            Some(reference) => self.ctx.stores.payments.find_by_reference(reference).await,
            None => Ok(None),
        }
    }

    /// A replayed dispute finishes a freeze an earlier delivery could not apply.
    async fn refreeze_if_open(&self, chargeback: &Chargeback) -> Result<()> {
        let Some(creator_id) = chargeback.creator_id else {
            return Ok(());
        };
        if chargeback.status != ChargebackStatus::Open {
            return Ok(());
        }
        if !self.ledger.wallet(creator_id).await?.frozen {
            tracing::warn!(chargeback_id = %chargeback.id, wallet_id = %creator_id, "open chargeback without frozen wallet");
            self.ledger
                .freeze(creator_id, &chargeback.wallet_freeze_reason())
                .await?;
        }
        Ok(())
    }

    pub async fn handle_dispute(&self, event: DisputeEvent) -> Result<DisputeOutcome> {
        let Some(payment) = self.find_payment(&event).await? else {
            tracing::warn!(
                provider = %event.provider,
                transaction_id = %event.transaction_id,
                reference = ?event.reference,
                "dispute for unknown payment acknowledged"
            );
            return Ok(DisputeOutcome::UnknownPayment);
        };

        if let Some(existing) = self
            .ctx
            .stores
            .chargebacks
            .find_by_transaction(event.provider, &event.transaction_id)
            .await?
        {
            self.refreeze_if_open(&existing).await?;
            return Ok(DisputeOutcome::AlreadyRecorded {
                chargeback_id: existing.id,
            });
        }

        let (amount, currency) = match (event.amount, event.currency) {
            (Some(amount), Some(currency)) => (amount, currency),
            _ => (payment.amount_major(), payment.currency),
        };
        let chargeback = Chargeback {
            id: Uuid::new_v4(),
            user_id: payment.user_id,
            creator_id: payment.creator_id,
            payment_id: payment.id,
            provider: event.provider,
            transaction_id: event.transaction_id.clone(),
            amount,
            currency,
            status: ChargebackStatus::Open,
            reason: event.reason.clone(),
            resolved_by: None,
            resolved_at: None,
            created_at: self.ctx.clock.now(),
            version: 0,
        };
        if !self.ctx.stores.chargebacks.insert(chargeback.clone()).await? {
            let existing = self
                .ctx
                .stores
                .chargebacks
                .find_by_transaction(event.provider, &event.transaction_id)
                .await?;
            let chargeback_id = match existing {
                Some(existing) => {
                    self.refreeze_if_open(&existing).await?;
                    existing.id
                }
                None => chargeback.id,
            };
            return Ok(DisputeOutcome::AlreadyRecorded { chargeback_id });
        }
        tracing::warn!(
            chargeback_id = %chargeback.id,
            payment_id = %payment.id,
            provider = %chargeback.provider,
            amount = %chargeback.amount,
            currency = %chargeback.currency,
            "chargeback opened"
        );

        if let Some(creator_id) = chargeback.creator_id {
            self.ledger
                .freeze(creator_id, &chargeback.wallet_freeze_reason())
                .await?;
            if let Err(e) = self.risk.recompute(creator_id).await {
                tracing::error!(user_id = %creator_id, error = %e, "risk recompute after chargeback failed");
            }
            self.ctx
                .notify(Notification {
                    user_id: creator_id,
                    kind: NotificationKind::ChargebackOpened,
                    title: "Chargeback received".into(),
                    body: format!(
                        "A {} {} payment was disputed. Payouts are paused while we review it.",
                        chargeback.amount, chargeback.currency
                    ),
                    link: None,
                })
                .await;
        }

        let reviewers = self.ctx.config.snapshot().admin_reviewers.clone();
        for admin_id in reviewers {
            self.ctx
                .notify(Notification {
                    user_id: admin_id,
                    kind: NotificationKind::ChargebackReview,
                    title: "Chargeback needs review".into(),
                    body: format!("Chargeback {} on payment {}", chargeback.id, payment.id),
                    link: Some(format!("/admin/chargebacks/{}", chargeback.id)),
                })
                .await;
        }

        Ok(DisputeOutcome::Recorded {
            chargeback_id: chargeback.id,
        })
    }

    /// Closes a chargeback. A lost one turns into debt of the disputed amount
    /// plus the provider's fee. The wallet stays frozen either way.
    pub async fn resolve(
        &self,
        actor: Actor,
        chargeback_id: Uuid,
        resolution: ChargebackResolution,
    ) -> Result<Chargeback> {
        let admin_id = actor.require_admin("resolve chargebacks")?;
        let mut chargeback = self
            .ctx
            .stores
            .chargebacks
            .get(chargeback_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Chargeback {}", chargeback_id)))?;
        if !chargeback.resolve(resolution, admin_id, self.ctx.clock.now()) {
            return Err(PaymentError::Conflict(format!(
                "Chargeback {} is already resolved",
                chargeback_id
            )));
        }
        if !self.ctx.stores.chargebacks.update(&mut chargeback).await? {
            return Err(PaymentError::ConcurrentModification(format!(
                "Chargeback {} changed during resolution",
                chargeback_id
            )));
        }
        tracing::info!(chargeback_id = %chargeback.id, resolution = ?resolution, admin_id = %admin_id, "chargeback resolved");

        if resolution == ChargebackResolution::Lost
            && let Some(creator_id) = chargeback.creator_id
        {
            let config = self.ctx.config.snapshot();
            let disputed = config.converter().convert(
                chargeback.amount,
                chargeback.currency,
                config.wallet_currency,
            )?;
            let debt = round_to_minor(
                disputed + config.chargeback_fee(chargeback.provider),
                config.wallet_currency,
            );
            if let Ok(debt) = Amount::new(debt) {
                self.ledger
                    .record_debt(creator_id, debt, &format!("chargeback:{}", chargeback.id))
                    .await?;
            }
            if let Err(e) = self.risk.recompute(creator_id).await {
                tracing::error!(user_id = %creator_id, error = %e, "risk recompute after resolution failed");
            }
        }
        Ok(chargeback)
    }
}
