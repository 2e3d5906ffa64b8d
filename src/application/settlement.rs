//! What happens once a payment's outcome is known.
//!
//! Both the webhook ingestor and the dunning engine end up here. Every step
//! is safe to repeat: the payment moves by version CAS, earnings are credited
//! once per payment and subscription changes are guarded by their status.

use crate::application::context::Context;
use crate::application::ledger::LedgerManager;
use crate::domain::money::{Amount, round_to_minor};
use crate::domain::payment::{Payment, PaymentKind, PaymentStatus};
use crate::domain::ports::{Notification, NotificationKind};
use crate::domain::subscription::{Subscription, SubscriptionStatus};
use crate::domain::wallet::EntryKind;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use uuid::Uuid;

const MAX_CAS_ATTEMPTS: usize = 8;

/// Result of applying a confirmed outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
    pub payment: Payment,
    /// Whether this call moved the payment to its new status.
    pub transitioned: bool,
}

#[derive(Clone)]
pub struct PaymentSettlement {
    ctx: Context,
    ledger: LedgerManager,
}

impl PaymentSettlement {
    pub fn new(ctx: Context, ledger: LedgerManager) -> Self {
        Self { ctx, ledger }
    }

    async fn reload_payment(&self, id: Uuid) -> Result<Payment> {
        self.ctx
            .stores
            .payments
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", id)))
    }

    /// Marks the payment successful and applies its effects.
    pub async fn confirm(&self, payment: Payment) -> Result<Settled> {
        let mut payment = payment;
        let mut transitioned = false;
        for _ in 0..MAX_CAS_ATTEMPTS {
            if !payment.mark_success(self.ctx.clock.now()) {
                break;
            }
            if self.ctx.stores.payments.update(&mut payment).await? {
                transitioned = true;
                break;
            }
            payment = self.reload_payment(payment.id).await?;
        }
        if payment.status != PaymentStatus::Success {
            return Err(PaymentError::ConcurrentModification(format!(
                "Payment {} could not be confirmed",
                payment.id
            )));
        }
        if transitioned {
            tracing::info!(payment_id = %payment.id, reference = %payment.reference, kind = payment.kind.label(), "payment succeeded");
        }

        let credited = self.credit_creator(&payment).await?;

        if let PaymentKind::Subscription {
            subscription_id,
            renewal,
            ..
        } = &payment.kind
        {
            self.apply_subscription_success(&payment, *subscription_id, *renewal, transitioned)
                .await?;
        } else if credited && let Some(creator_id) = payment.creator_id {
            self.ctx
                .notify(Notification {
                    user_id: creator_id,
                    kind: NotificationKind::PaymentReceived,
                    title: format!("New {}", payment.kind.label()),
                    body: format!(
                        "You received {} {}",
                        payment.creator_earnings_major(),
                        payment.currency
                    ),
                    link: None,
                })
                .await;
        }

        Ok(Settled {
            payment,
            transitioned,
        })
    }

    /// Credits the creator's share in wallet currency. Returns false if it was
    /// already credited or there is nothing to credit.
    async fn credit_creator(&self, payment: &Payment) -> Result<bool> {
        let Some(creator_id) = payment.creator_id else {
            return Ok(false);
        };
        let Some(amount) = self.to_wallet_amount(payment.creator_earnings_major(), payment)? else {
            return Ok(false);
        };
        self.ledger
            .credit_earnings(
                creator_id,
                EntryKind::Earning,
                amount,
                &format!("payment:{}", payment.id),
            )
            .await
    }

    fn to_wallet_amount(&self, major: Decimal, payment: &Payment) -> Result<Option<Amount>> {
        let config = self.ctx.config.snapshot();
        let converted = config
            .converter()
            .convert(major, payment.currency, config.wallet_currency)?;
        let rounded = round_to_minor(converted, config.wallet_currency);
        Ok(Amount::new(rounded).ok())
    }

    async fn apply_subscription_success(
        &self,
        payment: &Payment,
        subscription_id: Uuid,
        renewal: bool,
        transitioned: bool,
    ) -> Result<()> {
        let config = self.ctx.config.snapshot();
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut subscription) = self.ctx.stores.subscriptions.get(subscription_id).await? else {
                tracing::warn!(payment_id = %payment.id, subscription_id = %subscription_id, "payment for unknown subscription");
                return Ok(());
            };
            if subscription.status == SubscriptionStatus::Cancelled {
                tracing::warn!(subscription_id = %subscription_id, payment_id = %payment.id, "payment succeeded for cancelled subscription");
                return Ok(());
            }
            let now = self.ctx.clock.now();
            let activated = subscription.activate(now);
            let extend = transitioned && renewal;
            if extend {
                subscription.extend_billing(config.cycle_length(subscription.interval), now);
            }
            if !activated && !extend {
                break;
            }
            let updated = match self.ctx.stores.subscriptions.update(&mut subscription).await {
                Ok(updated) => updated,
                Err(PaymentError::Conflict(msg)) => {
                    tracing::warn!(subscription_id = %subscription_id, payment_id = %payment.id, conflict = %msg, "subscription not activated");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if updated {
                if activated {
                    tracing::info!(subscription_id = %subscription.id, fan_id = %subscription.fan_id, creator_id = %subscription.creator_id, "subscription active");
                    self.notify_activation(&subscription).await;
                }
                break;
            }
        }

        if !renewal {
            self.award_referral(subscription_id).await?;
        }
        Ok(())
    }

    async fn notify_activation(&self, subscription: &Subscription) {
        self.ctx
            .notify(Notification {
                user_id: subscription.creator_id,
                kind: NotificationKind::SubscriptionActivated,
                title: "New subscriber".into(),
                body: format!("A fan subscribed to your {:?} tier", subscription.tier),
                link: None,
            })
            .await;
    }

    /// `tier_price × referral% × tier multiplier`, once per subscription.
    async fn award_referral(&self, subscription_id: Uuid) -> Result<()> {
        let Some(subscription) = self.ctx.stores.subscriptions.get(subscription_id).await? else {
            return Ok(());
        };
        let Some(referrer_id) = subscription.referrer_id else {
            return Ok(());
        };
        let config = self.ctx.config.snapshot();
        let commission = subscription.tier_price * config.referral_commission_percent
            / Decimal::ONE_HUNDRED
            * subscription.tier.multiplier();
        let converted = config
            .converter()
            .convert(commission, subscription.currency, config.wallet_currency)?;
        let Ok(amount) = Amount::new(round_to_minor(converted, config.wallet_currency)) else {
            return Ok(());
        };

        let credited = self
            .ledger
            .credit_earnings(
                referrer_id,
                EntryKind::ReferralCommission,
                amount,
                &format!("referral:{}", subscription.id),
            )
            .await?;
        if credited {
            self.ctx
                .notify(Notification {
                    user_id: referrer_id,
                    kind: NotificationKind::ReferralCommission,
                    title: "Referral commission".into(),
                    body: format!("You earned {} {}", amount, config.wallet_currency),
                    link: None,
                })
                .await;
        }
        Ok(())
    }

    /// Marks a pending payment failed and applies the subscription policy.
    /// Returns false when the payment had already settled either way.
    pub async fn reject(&self, payment: Payment, reason: &str) -> Result<bool> {
        let mut payment = payment;
        let mut transitioned = false;
        for _ in 0..MAX_CAS_ATTEMPTS {
            if !payment.mark_failed(reason, self.ctx.clock.now()) {
                break;
            }
            if self.ctx.stores.payments.update(&mut payment).await? {
                transitioned = true;
                break;
            }
            payment = self.reload_payment(payment.id).await?;
        }
        if !transitioned {
            tracing::debug!(payment_id = %payment.id, status = ?payment.status, "failure ignored for settled payment");
            return Ok(false);
        }
        tracing::info!(payment_id = %payment.id, reference = %payment.reference, reason = %reason, "payment failed");

        if let Some(subscription_id) = payment.kind.subscription_id() {
            self.apply_subscription_failure(subscription_id).await?;
        }
        Ok(true)
    }

    async fn apply_subscription_failure(&self, subscription_id: Uuid) -> Result<()> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut subscription) = self.ctx.stores.subscriptions.get(subscription_id).await? else {
                return Ok(());
            };
            match subscription.status {
                SubscriptionStatus::Active if !subscription.auto_renew => {
                    subscription.cancel(self.ctx.clock.now());
                    if self.ctx.stores.subscriptions.update(&mut subscription).await? {
                        tracing::info!(subscription_id = %subscription.id, "subscription cancelled after failed payment");
                        self.ctx
                            .notify(Notification {
                                user_id: subscription.fan_id,
                                kind: NotificationKind::SubscriptionCancelled,
                                title: "Subscription ended".into(),
                                body: "Your payment failed and the subscription was cancelled".into(),
                                link: None,
                            })
                            .await;
                        return Ok(());
                    }
                }
                SubscriptionStatus::Active => {
                    tracing::info!(subscription_id = %subscription.id, "failed renewal left for dunning");
                    return Ok(());
                }
                _ => return Ok(()),
            }
        }
        Err(PaymentError::ConcurrentModification(format!(
            "Subscription {} is being modified concurrently",
            subscription_id
        )))
    }
}
