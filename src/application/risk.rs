use crate::application::context::Context;
use crate::domain::UserId;
use crate::domain::payment::PaymentStatus;
use crate::domain::risk::{RiskProfile, RiskSignals};
use crate::error::Result;
use chrono::Duration;

#[derive(Clone)]
pub struct RiskEngine {
    ctx: Context,
}

impl RiskEngine {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Collects the behavioural signals for a creator as of now.
    pub async fn signals(&self, user_id: UserId) -> Result<RiskSignals> {
        let now = self.ctx.clock.now();
        let stores = &self.ctx.stores;

        let chargeback_count = stores.chargebacks.list_by_creator(user_id).await?.len() as u32;

        let payments = stores.payments.list_by_creator(user_id).await?;
        let settled = payments
            .iter()
            .filter(|p| p.status != PaymentStatus::Pending)
            .count() as u32;
        let failed = payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Failed)
            .count() as u32;

        let window = Duration::days(30);
        let (mut recent, mut prior) = (0u32, 0u32);
        for subscription in stores.subscriptions.list_by_creator(user_id).await? {
            let Some(started) = subscription.start_date else {
                continue;
            };
            if started > now - window {
                recent += 1;
            } else if started > now - window * 2 {
                prior += 1;
            }
        }

        Ok(RiskSignals {
            chargeback_count,
            payment_count: settled,
            failed_payment_count: failed,
            new_subscribers_last_30d: recent,
            new_subscribers_prior_30d: prior,
            pre_kyc_payout_requests: stores.risk.pre_kyc_requests(user_id).await?,
        })
    }

    /// Recomputes and stores the profile. Unchanged assessments are not rewritten.
    pub async fn recompute(&self, user_id: UserId) -> Result<RiskProfile> {
        let config = self.ctx.config.snapshot();
        let signals = self.signals(user_id).await?;
        let profile = RiskProfile::assess(
            user_id,
            signals,
            &config.risk,
            config.base_monthly_payout_limit,
            config.base_daily_payout_limit,
            self.ctx.clock.now(),
        );

        let previous = self.ctx.stores.risk.get(user_id).await?;
        if let Some(previous) = previous.as_ref()
            && previous.same_assessment(&profile)
        {
            return Ok(previous.clone());
        }

        if profile.payouts_blocked && !previous.as_ref().is_some_and(|p| p.payouts_blocked) {
            tracing::warn!(user_id = %user_id, score = profile.risk_score, "payouts blocked by risk score");
        } else {
            tracing::info!(user_id = %user_id, score = profile.risk_score, flags = ?profile.flags, "risk profile updated");
        }
        self.ctx.stores.risk.save(profile.clone()).await?;
        Ok(profile)
    }

    /// The stored profile, computing one on first use.
    pub async fn profile(&self, user_id: UserId) -> Result<RiskProfile> {
        match self.ctx.stores.risk.get(user_id).await? {
            Some(profile) => Ok(profile),
            None => self.recompute(user_id).await,
        }
    }

    /// Recomputes every wallet owner. Returns how many profiles were evaluated.
    pub async fn sweep(&self) -> Result<usize> {
        let wallets = self.ctx.stores.wallets.list().await?;
        let mut evaluated = 0;
        for wallet in wallets {
            match self.recompute(wallet.user_id).await {
                Ok(_) => evaluated += 1,
                Err(e) => {
                    tracing::error!(user_id = %wallet.user_id, error = %e, "risk recompute failed")
                }
            }
        }
        Ok(evaluated)
    }
}
