//! Retries for failed recurring payments.
//!
//! Everything here is driven by [`DunningEngine::sweep`], which an outside
//! scheduler calls periodically. State lives in the stores, so a sweep can be
//! interrupted or run from several workers at once.

use crate::application::context::Context;
use crate::application::settlement::PaymentSettlement;
use crate::domain::dunning::{AttemptStatus, DunningAttempt, DunningSchedule};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{Notification, NotificationKind};
use crate::domain::provider::VerificationStatus;
use crate::domain::subscription::{Subscription, SubscriptionStatus};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

const MAX_CAS_ATTEMPTS: usize = 8;

/// A claimed attempt that never finished becomes claimable again after this long.
const CLAIM_TIMEOUT_MINUTES: i64 = 15;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scheduled: usize,
    pub attempted: usize,
    pub recovered: usize,
    pub failed: usize,
    pub past_due: usize,
    pub cancelled: usize,
}

#[derive(Clone)]
pub struct DunningEngine {
    ctx: Context,
    settlement: PaymentSettlement,
}

impl DunningEngine {
    pub fn new(ctx: Context, settlement: PaymentSettlement) -> Self {
        Self { ctx, settlement }
    }

    /// Schedules first retries, runs due attempts and expires lapsed grace windows.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let config = self.ctx.config.snapshot();
        let schedule = config.dunning_schedule();
        let grace = config.grace_period();
        let mut report = SweepReport::default();

        self.schedule_first_attempts(&schedule, now, &mut report).await?;

        for attempt in self.ctx.stores.dunning.list_pending().await? {
            if !claimable(&attempt, now) {
                continue;
            }
            let attempt_id = attempt.id;
            if let Err(e) = self.execute(attempt, &schedule, grace, now, &mut report).await {
                tracing::error!(attempt_id = %attempt_id, error = %e, "dunning attempt failed to run");
            }
        }

        self.expire_grace_windows(now, &mut report).await?;

        tracing::info!(
            scheduled = report.scheduled,
            attempted = report.attempted,
            recovered = report.recovered,
            failed = report.failed,
            past_due = report.past_due,
            cancelled = report.cancelled,
            "dunning sweep finished"
        );
        Ok(report)
    }

    async fn schedule_first_attempts(
        &self,
        schedule: &DunningSchedule,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        let Some(first_delay) = schedule.delay_before(1) else {
            return Ok(());
        };
        let stores = &self.ctx.stores;
        for subscription in stores.subscriptions.list_by_status(SubscriptionStatus::Active).await? {
            if !subscription.auto_renew || subscription.next_billing_date > now {
                continue;
            }
            let Some(payment) = stores.payments.get(subscription.payment_id).await? else {
                continue;
            };
            if payment.status != PaymentStatus::Failed {
                continue;
            }
            if !stores
                .dunning
                .list_for_cycle(subscription.id, payment.id)
                .await?
                .is_empty()
            {
                continue;
            }
            let attempt = DunningAttempt::new(
                subscription.id,
                payment.id,
                1,
                payment.updated_at + first_delay,
            );
            let scheduled_at = attempt.scheduled_at;
            if stores.dunning.insert(attempt).await? {
                report.scheduled += 1;
                tracing::info!(
                    subscription_id = %subscription.id,
                    payment_id = %payment.id,
                    scheduled_at = %scheduled_at,
                    "dunning started"
                );
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        attempt: DunningAttempt,
        schedule: &DunningSchedule,
        grace: Duration,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        let mut attempt = attempt;
        attempt.attempted_at = Some(now);
        if !self.ctx.stores.dunning.update(&mut attempt).await? {
            tracing::debug!(attempt_id = %attempt.id, "attempt claimed by another sweep");
            return Ok(());
        }
        report.attempted += 1;

        let payment = self
            .ctx
            .stores
            .payments
            .get(attempt.payment_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", attempt.payment_id)))?;
        let subscription = self
            .ctx
            .stores
            .subscriptions
            .get(attempt.subscription_id)
            .await?
            .ok_or_else(|| {
                PaymentError::NotFound(format!("Subscription {}", attempt.subscription_id))
            })?;

        if subscription.status == SubscriptionStatus::Cancelled {
            attempt.status = AttemptStatus::Failed;
            self.ctx.stores.dunning.update(&mut attempt).await?;
            tracing::info!(subscription_id = %subscription.id, "dunning stopped for cancelled subscription");
            return Ok(());
        }

        let outcome = self.check_payment(&payment).await;
        tracing::info!(
            subscription_id = %subscription.id,
            payment_id = %payment.id,
            attempt = attempt.attempt_number,
            outcome = ?outcome,
            "dunning attempt"
        );

        if outcome == VerificationStatus::Successful {
            attempt.status = AttemptStatus::Success;
            self.ctx.stores.dunning.update(&mut attempt).await?;
            self.settlement.confirm(payment).await?;
            report.recovered += 1;
            return Ok(());
        }

        attempt.status = AttemptStatus::Failed;
        self.ctx.stores.dunning.update(&mut attempt).await?;
        report.failed += 1;

        let next_number = attempt.attempt_number + 1;
        match schedule.delay_before(next_number) {
            Some(delay) if !schedule.is_final(attempt.attempt_number) => {
                let next = DunningAttempt::new(subscription.id, payment.id, next_number, now + delay);
                if self.ctx.stores.dunning.insert(next).await? {
                    tracing::debug!(subscription_id = %subscription.id, attempt = next_number, "next retry scheduled");
                }
            }
            _ => {
                if self.mark_past_due(subscription.id, grace, now).await? {
                    report.past_due += 1;
                }
            }
        }
        Ok(())
    }

    /// Asks the provider again. Provider errors count as a failed attempt.
    async fn check_payment(&self, payment: &Payment) -> VerificationStatus {
        if payment.status == PaymentStatus::Success {
            return VerificationStatus::Successful;
        }
        let gateway = match self.ctx.providers.get(payment.provider) {
            Ok(gateway) => gateway,
            Err(e) => {
                tracing::error!(payment_id = %payment.id, error = %e, "no gateway for retry");
                return VerificationStatus::Failed;
            }
        };
        match gateway.verify(payment.verification_reference()).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(payment_id = %payment.id, provider = %payment.provider, error = %e, "retry verification failed");
                VerificationStatus::Failed
            }
        }
    }

    async fn mark_past_due(&self, subscription_id: Uuid, grace: Duration, now: DateTime<Utc>) -> Result<bool> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut subscription) = self.ctx.stores.subscriptions.get(subscription_id).await? else {
                return Ok(false);
            };
            if !subscription.mark_past_due(now, grace) {
                return Ok(false);
            }
            if self.ctx.stores.subscriptions.update(&mut subscription).await? {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    grace_until = ?subscription.grace_until,
                    "subscription past due"
                );
                self.notify_fan(
                    &subscription,
                    NotificationKind::SubscriptionPastDue,
                    "Payment method needs updating",
                    "We could not charge your payment method. Update it to keep your subscription.",
                )
                .await;
                return Ok(true);
            }
        }
        Err(PaymentError::ConcurrentModification(format!(
            "Subscription {} is being modified concurrently",
            subscription_id
        )))
    }

    async fn expire_grace_windows(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        let overdue = self
            .ctx
            .stores
            .subscriptions
            .list_by_status(SubscriptionStatus::PastDue)
            .await?;
        for mut subscription in overdue {
            if !subscription.grace_expired(now) || !subscription.cancel(now) {
                continue;
            }
            match self.ctx.stores.subscriptions.update(&mut subscription).await {
                Ok(true) => {
                    report.cancelled += 1;
                    tracing::info!(subscription_id = %subscription.id, "subscription cancelled after grace period");
                    self.notify_fan(
                        &subscription,
                        NotificationKind::SubscriptionCancelled,
                        "Subscription ended",
                        "Your subscription was cancelled because payment could not be collected.",
                    )
                    .await;
                }
                // Changed since listing; the next sweep looks again.
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(subscription_id = %subscription.id, error = %e, "could not expire subscription")
                }
            }
        }
        Ok(())
    }

    async fn notify_fan(&self, subscription: &Subscription, kind: NotificationKind, title: &str, body: &str) {
        self.ctx
            .notify(Notification {
                user_id: subscription.fan_id,
                kind,
                title: title.into(),
                body: body.into(),
                link: None,
            })
            .await;
    }
}

fn claimable(attempt: &DunningAttempt, now: DateTime<Utc>) -> bool {
    if !attempt.is_due(now) {
        return false;
    }
    match attempt.attempted_at {
        None => true,
        Some(claimed) => now - claimed >= Duration::minutes(CLAIM_TIMEOUT_MINUTES),
    }
}
