use crate::application::chargeback::{ChargebackHandler, DisputeOutcome};
use crate::application::checkout::{
    CheckoutOutcome, CheckoutService, OneTimePaymentRequest, PayerDetails, SubscriptionRequest,
};
use crate::application::context::{Actor, Context};
use crate::application::dunning::{DunningEngine, SweepReport};
use crate::application::ledger::LedgerManager;
use crate::application::payout::{PayoutInput, PayoutRoute, PayoutWorkflow};
use crate::application::risk::RiskEngine;
use crate::application::settlement::PaymentSettlement;
use crate::application::webhook::{WebhookIngestor, WebhookOutcome};
use crate::config::EngineConfig;
use crate::domain::UserId;
use crate::domain::chargeback::{Chargeback, ChargebackResolution};
use crate::domain::event::DisputeEvent;
use crate::domain::money::Currency;
use crate::domain::payout::PayoutRequest;
use crate::domain::provider::Provider;
use crate::domain::risk::RiskProfile;
use crate::domain::wallet::{LedgerEntry, Wallet};
use crate::error::{ErrorResponse, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

/// The main entry point of the payments core.
///
/// `PaymentEngine` wires the services over one shared [`Context`] and exposes
/// the operations callers need. It holds no state of its own: everything
/// lives in the stores, so several engines over the same stores can run side
/// by side.
#[derive(Clone)]
pub struct PaymentEngine {
    ctx: Context,
    ledger: LedgerManager,
    risk: RiskEngine,
    checkout: CheckoutService,
    webhooks: WebhookIngestor,
    chargebacks: ChargebackHandler,
    payouts: PayoutWorkflow,
    dunning: DunningEngine,
}

impl PaymentEngine {
    /// Creates a new `PaymentEngine` over `ctx`.
    pub fn new(ctx: Context) -> Self {
        let ledger = LedgerManager::new(ctx.clone());
        let risk = RiskEngine::new(ctx.clone());
        let settlement = PaymentSettlement::new(ctx.clone(), ledger.clone());
        let chargebacks = ChargebackHandler::new(ctx.clone(), ledger.clone(), risk.clone());
        Self {
            checkout: CheckoutService::new(ctx.clone()),
            webhooks: WebhookIngestor::new(ctx.clone(), settlement.clone(), chargebacks.clone()),
            payouts: PayoutWorkflow::new(ctx.clone(), ledger.clone(), risk.clone()),
            dunning: DunningEngine::new(ctx.clone(), settlement),
            chargebacks,
            ledger,
            risk,
            ctx,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub async fn start_one_time_payment(&self, request: OneTimePaymentRequest) -> CheckoutOutcome {
        CheckoutOutcome::from(self.checkout.start_one_time_payment(request).await)
    }

    pub async fn start_subscription(&self, request: SubscriptionRequest) -> CheckoutOutcome {
        CheckoutOutcome::from(self.checkout.start_subscription(request).await)
    }

    pub async fn start_renewal(&self, subscription_id: Uuid, payer: &PayerDetails) -> CheckoutOutcome {
        CheckoutOutcome::from(self.checkout.start_renewal(subscription_id, payer).await)
    }

    /// Applies a raw provider webhook body.
    pub async fn handle_webhook(&self, provider: Provider, payload: &Value) -> Result<WebhookOutcome> {
        self.webhooks.ingest(provider, payload).await
    }

    /// Re-checks a payment with its provider, as the post-redirect return does.
    pub async fn verify_payment(&self, provider: Provider, reference: &str) -> Result<WebhookOutcome> {
        self.webhooks.verify(provider, reference).await
    }

    pub async fn handle_dispute(&self, event: DisputeEvent) -> Result<DisputeOutcome> {
        self.chargebacks.handle_dispute(event).await
    }

    pub async fn resolve_chargeback(
        &self,
        actor: Actor,
        chargeback_id: Uuid,
        resolution: ChargebackResolution,
    ) -> Result<Chargeback> {
        self.chargebacks.resolve(actor, chargeback_id, resolution).await
    }

    pub async fn withdrawal_guard(&self, user_id: UserId, amount: Decimal, currency: Currency) -> Option<ErrorResponse> {
        self.payouts.withdrawal_guard(user_id, amount, currency).await
    }

    pub async fn request_payout(&self, input: PayoutInput) -> Result<PayoutRequest> {
        self.payouts.request_payout(input).await
    }

    pub async fn route_payout(&self, input: PayoutInput) -> PayoutRoute {
        self.payouts.route_payout(input).await
    }

    pub async fn start_payout_processing(&self, actor: Actor, payout_id: Uuid) -> Result<PayoutRequest> {
        self.payouts.start_processing(actor, payout_id).await
    }

    pub async fn complete_payout(&self, actor: Actor, payout_id: Uuid) -> Result<PayoutRequest> {
        self.payouts.complete(actor, payout_id).await
    }

    pub async fn fail_payout(&self, actor: Actor, payout_id: Uuid, notes: Option<String>) -> Result<PayoutRequest> {
        self.payouts.fail(actor, payout_id, notes).await
    }

    pub async fn cancel_payout(&self, actor: Actor, payout_id: Uuid, notes: Option<String>) -> Result<PayoutRequest> {
        self.payouts.cancel(actor, payout_id, notes).await
    }

    pub async fn unfreeze_wallet(&self, actor: Actor, wallet_id: UserId) -> Result<Wallet> {
        self.ledger.unfreeze(actor, wallet_id).await
    }

    pub async fn wallet(&self, user_id: UserId) -> Result<Wallet> {
        self.ledger.wallet(user_id).await
    }

    /// All stored wallets, ordered by owner id.
    pub async fn wallets(&self) -> Result<Vec<Wallet>> {
        let mut wallets = self.ctx.stores.wallets.list().await?;
        wallets.sort_by_key(|w| w.user_id);
        Ok(wallets)
    }

    pub async fn ledger_entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        self.ledger.entries(user_id).await
    }

    pub async fn risk_profile(&self, user_id: UserId) -> Result<RiskProfile> {
        self.risk.profile(user_id).await
    }

    pub async fn recompute_risk(&self, user_id: UserId) -> Result<RiskProfile> {
        self.risk.recompute(user_id).await
    }

    pub async fn run_risk_sweep(&self) -> Result<usize> {
        self.risk.sweep().await
    }

    pub async fn run_dunning(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.dunning.sweep(now).await
    }

    /// Swaps the configuration. Operations already running keep their snapshot.
    pub fn reload_config(&self, config: EngineConfig) -> Result<()> {
        self.ctx.config.reload(config)
    }
}
