use crate::application::context::{Actor, Context};
use crate::application::ledger::LedgerManager;
use crate::application::risk::RiskEngine;
use crate::application::router::{PayoutRouteRequest, select_payout_provider};
use crate::domain::UserId;
use crate::domain::money::{Amount, Currency};
use crate::domain::payout::{AccountDetails, PayoutRequest, PayoutStatus};
use crate::domain::ports::{KycStatus, Notification, NotificationKind};
use crate::domain::provider::{PayoutMethod, Provider, TransferRequest};
use crate::domain::wallet::SettlementOutcome;
use crate::error::{ErrorResponse, PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

const MAX_CAS_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutInput {
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: Currency,
    pub method: PayoutMethod,
    pub account_details: AccountDetails,
}

/// Flattened payout result handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoutRoute {
    pub success: bool,
    pub provider: Option<Provider>,
    pub status: Option<PayoutStatus>,
    pub payout_id: Option<Uuid>,
    pub error: Option<ErrorResponse>,
}

impl From<Result<PayoutRequest>> for PayoutRoute {
    fn from(result: Result<PayoutRequest>) -> Self {
        match result {
            Ok(payout) => Self {
                success: true,
                provider: payout.provider,
                status: Some(payout.status),
                payout_id: Some(payout.id),
                error: None,
            },
            Err(e) => Self {
                success: false,
                provider: None,
                status: None,
                payout_id: None,
                error: Some(ErrorResponse::from(&e)),
            },
        }
    }
}

fn counts_against_limits(payout: &PayoutRequest) -> bool {
    !matches!(payout.status, PayoutStatus::Failed | PayoutStatus::Cancelled)
}

#[derive(Clone)]
pub struct PayoutWorkflow {
    ctx: Context,
    ledger: LedgerManager,
    risk: RiskEngine,
}

impl PayoutWorkflow {
    pub fn new(ctx: Context, ledger: LedgerManager, risk: RiskEngine) -> Self {
        Self { ctx, ledger, risk }
    }

    /// Pre-flight check for a withdrawal. `None` means the request may proceed.
    pub async fn withdrawal_guard(&self, user_id: UserId, amount: Decimal, currency: Currency) -> Option<ErrorResponse> {
        match self.check_withdrawal(user_id, amount, currency).await {
            Ok(()) => None,
            Err(e) => {
                tracing::info!(user_id = %user_id, amount = %amount, error = %e, "withdrawal rejected");
                Some(ErrorResponse::from(&e))
            }
        }
    }

    async fn check_withdrawal(&self, user_id: UserId, amount: Decimal, currency: Currency) -> Result<()> {
        let config = self.ctx.config.snapshot();
        let amount = Amount::new(amount)?;
        if amount.value() < config.minimum_payout {
            return Err(PaymentError::ValidationError(format!(
                "Minimum payout is {} {}",
                config.minimum_payout, config.wallet_currency
            )));
        }

        let kyc = self.ctx.kyc.kyc_status(user_id).await?;
        if kyc != KycStatus::Approved {
            self.ctx.stores.risk.record_pre_kyc_request(user_id).await?;
            if let Err(e) = self.risk.recompute(user_id).await {
                tracing::error!(user_id = %user_id, error = %e, "risk recompute after pre-KYC request failed");
            }
            return Err(PaymentError::KycRequired(kyc.to_string()));
        }

        let wallet = self.ledger.wallet(user_id).await?;
        if currency != wallet.currency {
            return Err(PaymentError::ValidationError(format!(
                "Payout currency {} does not match wallet currency {}",
                currency, wallet.currency
            )));
        }
        if wallet.frozen {
            return Err(PaymentError::WalletFrozen {
                wallet_id: user_id,
                reason: wallet.frozen_reason.clone().unwrap_or_default(),
            });
        }
        if wallet.available() < amount.value() {
            return Err(PaymentError::InsufficientBalance {
                requested: amount.value(),
                available: wallet.available(),
            });
        }

        let profile = self.risk.profile(user_id).await?;
        if profile.payouts_blocked {
            return Err(PaymentError::PayoutsBlocked(format!(
                "Risk score {} blocks payouts for {}",
                profile.risk_score, user_id
            )));
        }
        let now = self.ctx.clock.now();
        let history = self.ctx.stores.payouts.list_by_wallet(user_id).await?;
        let requested_since = |since: DateTime<Utc>| -> Decimal {
            history
                .iter()
                .filter(|p| counts_against_limits(p) && p.created_at > since)
                .map(|p| p.amount.value())
                .sum()
        };
        if requested_since(now - Duration::days(1)) + amount.value() > profile.daily_limit {
            return Err(PaymentError::RateLimited(format!(
                "Daily payout limit of {} reached",
                profile.daily_limit
            )));
        }
        if requested_since(now - Duration::days(30)) + amount.value() > profile.monthly_limit {
            return Err(PaymentError::RateLimited(format!(
                "Monthly payout limit of {} reached",
                profile.monthly_limit
            )));
        }
        Ok(())
    }

    /// Validates, reserves and records a withdrawal request.
    pub async fn request_payout(&self, input: PayoutInput) -> Result<PayoutRequest> {
        self.create(input, false).await
    }

    /// Requests a payout and picks the provider that will send it.
    pub async fn route_payout(&self, input: PayoutInput) -> PayoutRoute {
        PayoutRoute::from(self.create(input, true).await)
    }

    /// Nothing is reserved or stored until every check, routing included, has passed.
    async fn create(&self, input: PayoutInput, route: bool) -> Result<PayoutRequest> {
        input.account_details.validate_for(input.method)?;
        self.check_withdrawal(input.user_id, input.amount, input.currency)
            .await?;
        let provider = if route {
            Some(self.route_for(input.currency, &input.account_details, input.method)?)
        } else {
            None
        };

        let amount = Amount::new(input.amount)?;
        self.ledger.reserve_for_payout(input.user_id, amount).await?;

        let mut payout = PayoutRequest::new(
            input.user_id,
            amount,
            input.currency,
            input.method,
            input.account_details,
            self.ctx.clock.now(),
        );
        payout.provider = provider;
        if let Err(e) = self.ctx.stores.payouts.insert(payout.clone()).await {
            tracing::error!(wallet_id = %payout.wallet_id, error = %e, "payout not stored, releasing reservation");
            self.ledger
                .settle_payout(payout.wallet_id, payout.id, amount, SettlementOutcome::Cancelled)
                .await?;
            return Err(e);
        }
        tracing::info!(
            payout_id = %payout.id,
            wallet_id = %payout.wallet_id,
            amount = %payout.amount,
            method = %payout.method,
            "payout requested"
        );
        Ok(payout)
    }

    fn route_for(&self, currency: Currency, account: &AccountDetails, method: PayoutMethod) -> Result<Provider> {
        let config = self.ctx.config.snapshot();
        select_payout_provider(
            &config.routing,
            &PayoutRouteRequest {
                currency,
                country: account.country.clone(),
                method,
                preferences: Vec::new(),
            },
        )
    }

    async fn load(&self, payout_id: Uuid) -> Result<PayoutRequest> {
        self.ctx
            .stores
            .payouts
            .get(payout_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Payout {}", payout_id)))
    }

    async fn save(&self, payout: &mut PayoutRequest) -> Result<()> {
        if !self.ctx.stores.payouts.update(payout).await? {
            return Err(PaymentError::ConcurrentModification(format!(
                "Payout {} was changed by someone else",
                payout.id
            )));
        }
        Ok(())
    }

    async fn notify_owner(&self, payout: &PayoutRequest) {
        self.ctx
            .notify(Notification {
                user_id: payout.wallet_id,
                kind: NotificationKind::PayoutUpdated,
                title: "Payout update".into(),
                body: format!("Your payout of {} {} is {:?}", payout.amount, payout.currency, payout.status),
                link: None,
            })
            .await;
    }

    /// Claims the payout for `processing`, then sends the transfer through the
    /// routed provider. Only the admin whose claim lands reaches the provider.
    pub async fn start_processing(&self, actor: Actor, payout_id: Uuid) -> Result<PayoutRequest> {
        let admin_id = actor.require_admin("process payouts")?;
        let mut payout = self.load(payout_id).await?;
        if !payout.status.can_transition_to(PayoutStatus::Processing) {
            return Err(PaymentError::Conflict(format!(
                "Payout {} is {:?}",
                payout_id, payout.status
            )));
        }

        let provider = match payout.provider {
            Some(provider) => provider,
            None => self.route_for(payout.currency, &payout.account_details, payout.method)?,
        };
        let gateway = self.ctx.providers.get(provider)?;
        payout.provider = Some(provider);
        payout.transition(PayoutStatus::Processing, self.ctx.clock.now())?;
        self.save(&mut payout).await?;

        let transfer = gateway
            .initiate_transfer(TransferRequest {
                payout_id: payout.id,
                amount: payout.amount.value(),
                currency: payout.currency,
                method: payout.method,
                account_details: payout.account_details.clone(),
            })
            .await;
        let transfer = match transfer {
            Ok(transfer) => transfer,
            Err(e) => {
                tracing::error!(payout_id = %payout_id, provider = %provider, error = %e, "transfer failed, reverting payout to pending");
                payout.status = PayoutStatus::Pending;
                payout.updated_at = self.ctx.clock.now();
                if let Err(revert) = self.save(&mut payout).await {
                    tracing::error!(payout_id = %payout_id, error = %revert, "payout revert failed");
                }
                return Err(e);
            }
        };

        for _ in 0..MAX_CAS_ATTEMPTS {
            payout.provider_reference = Some(transfer.payout_id.clone());
            payout.updated_at = self.ctx.clock.now();
            if self.ctx.stores.payouts.update(&mut payout).await? {
                break;
            }
            payout = self.load(payout_id).await?;
            if payout.status != PayoutStatus::Processing {
                tracing::error!(payout_id = %payout_id, status = ?payout.status, transfer = %transfer.payout_id, "payout moved on while the transfer was in flight");
                break;
            }
        }
        tracing::info!(payout_id = %payout_id, provider = %provider, admin_id = %admin_id, "payout processing");
        self.notify_owner(&payout).await;
        Ok(payout)
    }

    /// Marks the payout completed, then debits the wallet. If the debit fails
    /// the status is put back to `processing`.
    pub async fn complete(&self, actor: Actor, payout_id: Uuid) -> Result<PayoutRequest> {
        let admin_id = actor.require_admin("complete payouts")?;
        let mut payout = self.load(payout_id).await?;
        payout.transition(PayoutStatus::Completed, self.ctx.clock.now())?;
        self.save(&mut payout).await?;

        if let Err(e) = self
            .ledger
            .settle_payout(payout.wallet_id, payout.id, payout.amount, SettlementOutcome::Completed)
            .await
        {
            tracing::error!(payout_id = %payout_id, error = %e, "settlement failed, reverting payout to processing");
            payout.status = PayoutStatus::Processing;
            payout.updated_at = self.ctx.clock.now();
            if let Err(revert) = self.save(&mut payout).await {
                tracing::error!(payout_id = %payout_id, error = %revert, "payout revert failed");
            }
            return Err(e);
        }
        tracing::info!(payout_id = %payout_id, admin_id = %admin_id, "payout completed");
        self.notify_owner(&payout).await;
        Ok(payout)
    }

    pub async fn fail(&self, actor: Actor, payout_id: Uuid, notes: Option<String>) -> Result<PayoutRequest> {
        self.release(actor, payout_id, PayoutStatus::Failed, notes).await
    }

    pub async fn cancel(&self, actor: Actor, payout_id: Uuid, notes: Option<String>) -> Result<PayoutRequest> {
        self.release(actor, payout_id, PayoutStatus::Cancelled, notes).await
    }

    async fn release(
        &self,
        actor: Actor,
        payout_id: Uuid,
        next: PayoutStatus,
        notes: Option<String>,
    ) -> Result<PayoutRequest> {
        let admin_id = actor.require_admin("change payouts")?;
        let mut payout = self.load(payout_id).await?;
        let previous = payout.status;
        payout.transition(next, self.ctx.clock.now())?;
        if notes.is_some() {
            payout.admin_notes = notes;
        }
        self.save(&mut payout).await?;

        let outcome = if next == PayoutStatus::Failed {
            SettlementOutcome::Failed
        } else {
            SettlementOutcome::Cancelled
        };
        if let Err(e) = self
            .ledger
            .settle_payout(payout.wallet_id, payout.id, payout.amount, outcome)
            .await
        {
            tracing::error!(payout_id = %payout_id, error = %e, "reservation release failed, reverting payout");
            payout.status = previous;
            if let Err(revert) = self.save(&mut payout).await {
                tracing::error!(payout_id = %payout_id, error = %revert, "payout revert failed");
            }
            return Err(e);
        }
        tracing::info!(payout_id = %payout_id, status = ?next, admin_id = %admin_id, "payout closed");
        self.notify_owner(&payout).await;
        Ok(payout)
    }
}
