use crate::application::context::Context;
use crate::application::router::{RouteRequest, select_provider};
use crate::domain::UserId;
use crate::domain::money::{CountryCode, Currency, major_to_minor};
use crate::domain::payment::{Payment, PaymentKind};
use crate::domain::provider::{PaymentMethod, Provider, Redirect, SessionRequest};
use crate::domain::subscription::{BillingInterval, Subscription, SubscriptionStatus, Tier};
use crate::error::{ErrorResponse, PaymentError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

const MAX_CAS_ATTEMPTS: usize = 8;

/// How the payer pays and which market they are in.
#[derive(Debug, Clone, PartialEq)]
pub struct PayerDetails {
    pub email: String,
    pub country: CountryCode,
    pub method: PaymentMethod,
    pub phone_number: Option<String>,
    /// Providers to try first, in order.
    pub preferences: Vec<Provider>,
}

/// A tip, pay-per-view unlock or AI upgrade.
#[derive(Debug, Clone, PartialEq)]
pub struct OneTimePaymentRequest {
    pub user_id: UserId,
    /// Required for tips and PPV, absent for platform purchases.
    pub creator_id: Option<UserId>,
    pub amount_minor: i64,
    pub currency: Currency,
    pub kind: PaymentKind,
    pub payer: PayerDetails,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    pub fan_id: UserId,
    pub creator_id: UserId,
    pub tier: Tier,
    /// Major units of `currency`.
    pub tier_price: Decimal,
    pub currency: Currency,
    pub interval: BillingInterval,
    pub auto_renew: bool,
    pub referrer_id: Option<UserId>,
    pub payer: PayerDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutSession {
    pub payment_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub provider: Provider,
    pub reference: String,
    pub redirect: Redirect,
}

/// Flattened checkout result handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutOutcome {
    pub success: bool,
    pub provider: Option<Provider>,
    pub reference: Option<String>,
    pub redirect_url: Option<String>,
    pub client_secret: Option<String>,
    pub error: Option<ErrorResponse>,
}

impl From<Result<CheckoutSession>> for CheckoutOutcome {
    fn from(result: Result<CheckoutSession>) -> Self {
        match result {
            Ok(session) => {
                let (redirect_url, client_secret) = match session.redirect {
                    Redirect::Url(url) => (Some(url), None),
                    Redirect::ClientSecret(secret) => (None, Some(secret)),
                };
                Self {
                    success: true,
                    provider: Some(session.provider),
                    reference: Some(session.reference),
                    redirect_url,
                    client_secret,
                    error: None,
                }
            }
            Err(e) => Self {
                success: false,
                provider: None,
                reference: None,
                redirect_url: None,
                client_secret: None,
                error: Some(ErrorResponse::from(&e)),
            },
        }
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    ctx: Context,
}

impl CheckoutService {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    fn route(&self, amount_minor: i64, currency: Currency, payer: &PayerDetails) -> Result<Provider> {
        let config = self.ctx.config.snapshot();
        select_provider(
            &config.routing,
            &RouteRequest {
                amount_minor,
                currency,
                country: payer.country.clone(),
                method: payer.method,
                phone_number: payer.phone_number.clone(),
                preferences: payer.preferences.clone(),
            },
        )
    }

    pub async fn start_one_time_payment(&self, request: OneTimePaymentRequest) -> Result<CheckoutSession> {
        match (&request.kind, request.creator_id) {
            (PaymentKind::Subscription { .. }, _) => {
                return Err(PaymentError::ValidationError(
                    "Subscriptions are started with start_subscription".into(),
                ));
            }
            (PaymentKind::Tip { .. } | PaymentKind::Ppv { .. }, None) => {
                return Err(PaymentError::ValidationError(format!(
                    "A {} needs a creator",
                    request.kind.label()
                )));
            }
            (_, Some(creator_id)) if creator_id == request.user_id => {
                return Err(PaymentError::ValidationError(
                    "Creators cannot pay themselves".into(),
                ));
            }
            _ => {}
        }

        let provider = self.route(request.amount_minor, request.currency, &request.payer)?;
        let config = self.ctx.config.snapshot();
        let fee = config.fee_policy().split(request.amount_minor, &request.kind)?;
        let creator_id = match request.kind {
            PaymentKind::AiUpgrade { .. } => None,
            _ => request.creator_id,
        };
        let payment = Payment::new(
            request.user_id,
            creator_id,
            provider,
            request.amount_minor,
            request.currency,
            request.kind,
            fee,
            self.ctx.clock.now(),
        );
        self.ctx.stores.payments.insert(payment.clone()).await?;
        tracing::info!(
            payment_id = %payment.id,
            provider = %provider,
            kind = payment.kind.label(),
            amount_minor = payment.amount_minor,
            currency = %payment.currency,
            "checkout started"
        );

        self.open_session(payment, None, &request.payer).await
    }

    pub async fn start_subscription(&self, request: SubscriptionRequest) -> Result<CheckoutSession> {
        if request.fan_id == request.creator_id {
            return Err(PaymentError::ValidationError(
                "Creators cannot subscribe to themselves".into(),
            ));
        }
        if request.referrer_id == Some(request.fan_id) {
            return Err(PaymentError::ValidationError(
                "Fans cannot refer themselves".into(),
            ));
        }
        if request.tier_price <= Decimal::ZERO {
            return Err(PaymentError::ValidationError(
                "Tier price must be positive".into(),
            ));
        }
        if self
            .ctx
            .stores
            .subscriptions
            .find_active(request.fan_id, request.creator_id)
            .await?
            .is_some()
        {
            return Err(PaymentError::Conflict(format!(
                "Fan {} already has an active subscription to creator {}",
                request.fan_id, request.creator_id
            )));
        }

        let amount_minor = major_to_minor(request.tier_price, request.currency)?;
        let provider = self.route(amount_minor, request.currency, &request.payer)?;
        let config = self.ctx.config.snapshot();
        let now = self.ctx.clock.now();

        let subscription_id = Uuid::new_v4();
        let kind = PaymentKind::Subscription {
            subscription_id,
            tier: request.tier,
            interval: request.interval,
            renewal: false,
        };
        let fee = config.fee_policy().split(amount_minor, &kind)?;
        let payment = Payment::new(
            request.fan_id,
            Some(request.creator_id),
            provider,
            amount_minor,
            request.currency,
            kind,
            fee,
            now,
        );
        let subscription = Subscription {
            id: subscription_id,
            fan_id: request.fan_id,
            creator_id: request.creator_id,
            tier: request.tier,
            tier_price: request.tier_price,
            currency: request.currency,
            interval: request.interval,
            status: SubscriptionStatus::Pending,
            provider,
            reference: payment.reference.clone(),
            payment_id: payment.id,
            auto_renew: request.auto_renew,
            referrer_id: request.referrer_id,
            start_date: None,
            next_billing_date: now + config.cycle_length(request.interval),
            past_due_since: None,
            grace_until: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        self.ctx.stores.payments.insert(payment.clone()).await?;
        self.ctx.stores.subscriptions.insert(subscription).await?;
        tracing::info!(
            subscription_id = %subscription_id,
            payment_id = %payment.id,
            provider = %provider,
            tier = ?request.tier,
            "subscription checkout started"
        );

        self.open_session(payment, Some(subscription_id), &request.payer).await
    }

    /// Opens the next billing cycle's payment for an active, auto-renewing subscription.
    pub async fn start_renewal(&self, subscription_id: Uuid, payer: &PayerDetails) -> Result<CheckoutSession> {
        let mut subscription = self
            .ctx
            .stores
            .subscriptions
            .get(subscription_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Subscription {}", subscription_id)))?;
        if !subscription.is_active() || !subscription.auto_renew {
            return Err(PaymentError::Conflict(format!(
                "Subscription {} is not an active auto-renewing subscription",
                subscription_id
            )));
        }

        let amount_minor = major_to_minor(subscription.tier_price, subscription.currency)?;
        let kind = PaymentKind::Subscription {
            subscription_id,
            tier: subscription.tier,
            interval: subscription.interval,
            renewal: true,
        };
        let fee = self.ctx.config.snapshot().fee_policy().split(amount_minor, &kind)?;
        let now = self.ctx.clock.now();
        let payment = Payment::new(
            subscription.fan_id,
            Some(subscription.creator_id),
            subscription.provider,
            amount_minor,
            subscription.currency,
            kind,
            fee,
            now,
        );
        self.ctx.stores.payments.insert(payment.clone()).await?;

        subscription.payment_id = payment.id;
        subscription.reference = payment.reference.clone();
        subscription.updated_at = now;
        if !self.ctx.stores.subscriptions.update(&mut subscription).await? {
            let mut orphan = payment;
            orphan.mark_failed("subscription changed while renewing", now);
            self.ctx.stores.payments.update(&mut orphan).await?;
            return Err(PaymentError::ConcurrentModification(format!(
                "Subscription {} changed while renewing",
                subscription_id
            )));
        }
        tracing::info!(subscription_id = %subscription_id, payment_id = %payment.id, "renewal started");

        self.open_session(payment, Some(subscription_id), payer).await
    }

    /// Asks the provider for a session. On failure the pending payment is
    /// marked failed so it never lingers.
    async fn open_session(
        &self,
        payment: Payment,
        subscription_id: Option<Uuid>,
        payer: &PayerDetails,
    ) -> Result<CheckoutSession> {
        let mut payment = payment;
        let gateway = self.ctx.providers.get(payment.provider);
        let mut metadata = HashMap::from([
            ("payment_id".to_string(), payment.id.to_string()),
            ("type".to_string(), payment.kind.label().to_string()),
        ]);
        if let Some(subscription_id) = subscription_id {
            metadata.insert("subscription_id".to_string(), subscription_id.to_string());
        }
        let request = SessionRequest {
            reference: payment.reference.clone(),
            amount_minor: payment.amount_minor,
            currency: payment.currency,
            payer_email: payer.email.clone(),
            method: payer.method,
            phone_number: payer.phone_number.clone(),
            metadata,
        };

        let session = match gateway {
            Ok(gateway) => gateway.create_session(request).await,
            Err(e) => Err(e),
        };
        let session = match session {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(payment_id = %payment.id, provider = %payment.provider, error = %e, "provider session failed");
                payment.mark_failed(format!("provider session failed: {}", e), self.ctx.clock.now());
                if let Err(store_err) = self.ctx.stores.payments.update(&mut payment).await {
                    tracing::error!(payment_id = %payment.id, error = %store_err, "could not mark payment failed");
                }
                return Err(e);
            }
        };

        let provider_reference = (session.reference != payment.reference).then(|| session.reference.clone());
        for _ in 0..MAX_CAS_ATTEMPTS {
            payment.redirect = Some(session.redirect.clone());
            if provider_reference.is_some() {
                payment.provider_reference = provider_reference.clone();
            }
            payment.updated_at = self.ctx.clock.now();
            if self.ctx.stores.payments.update(&mut payment).await? {
                break;
            }
            // Settled by a webhook in the meantime.
            tracing::debug!(payment_id = %payment.id, "payment changed before session was stored");
            payment = match self.ctx.stores.payments.get(payment.id).await? {
                Some(current) => current,
                None => break,
            };
        }

        Ok(CheckoutSession {
            payment_id: payment.id,
            subscription_id,
            provider: payment.provider,
            reference: session.reference,
            redirect: session.redirect,
        })
    }
}
