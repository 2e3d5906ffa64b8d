//! Replays an operations file against the engine.
//!
//! Rows name users, payments and payouts by label. User labels map to
//! deterministic v5 UUIDs so the same label resolves to the same wallet
//! across runs over a persistent store. Payments are confirmed right away
//! through the provider verify path, as a fan completing checkout would.

use crate::application::chargeback::DisputeOutcome;
use crate::application::checkout::{
    CheckoutOutcome, OneTimePaymentRequest, PayerDetails, SubscriptionRequest,
};
use crate::application::context::Actor;
use crate::application::engine::PaymentEngine;
use crate::application::payout::PayoutInput;
use crate::domain::UserId;
use crate::domain::chargeback::ChargebackResolution;
use crate::domain::event::DisputeEvent;
use crate::domain::money::{CountryCode, Currency, major_to_minor};
use crate::domain::payment::PaymentKind;
use crate::domain::payout::AccountDetails;
use crate::domain::provider::{PaymentMethod, PayoutMethod, Provider};
use crate::domain::subscription::BillingInterval;
use crate::domain::wallet::Wallet;
use crate::error::{ErrorResponse, PaymentError};
use crate::interfaces::csv::operation_reader::{MethodColumn, OperationKind, OperationRecord};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

const ADMIN_LABEL: &str = "admin";
const DEFAULT_COUNTRY: &str = "US";

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("{op:?} requires the {field} column")]
    MissingField { op: OperationKind, field: &'static str },

    #[error("Unknown {kind} label: {label}")]
    UnknownLabel { kind: &'static str, label: String },

    #[error("Rejected with {}: {}", .0.code, .0.message)]
    Rejected(ErrorResponse),

    #[error(transparent)]
    Engine(#[from] PaymentError),
}

type ReplayResult<T> = std::result::Result<T, ReplayError>;

#[derive(Debug, Clone)]
struct PaymentHandle {
    provider: Provider,
    reference: String,
}

/// Stateful driver mapping labelled rows to engine operations.
pub struct Replayer {
    engine: PaymentEngine,
    users: HashMap<UserId, String>,
    payments: HashMap<String, PaymentHandle>,
    payouts: HashMap<String, Uuid>,
    chargebacks: HashMap<String, Uuid>,
}

pub fn user_id(label: &str) -> UserId {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, label.as_bytes())
}

fn require<T>(value: Option<T>, op: OperationKind, field: &'static str) -> ReplayResult<T> {
    value.ok_or(ReplayError::MissingField { op, field })
}

impl Replayer {
    pub fn new(engine: PaymentEngine) -> Self {
        Self {
            engine,
            users: HashMap::new(),
            payments: HashMap::new(),
            payouts: HashMap::new(),
            chargebacks: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &PaymentEngine {
        &self.engine
    }

    fn user(&mut self, label: &str) -> UserId {
        let id = user_id(label);
        self.users.entry(id).or_insert_with(|| label.to_string());
        id
    }

    fn admin(&mut self) -> Actor {
        Actor::Admin(self.user(ADMIN_LABEL))
    }

    pub async fn apply(&mut self, record: OperationRecord) -> ReplayResult<()> {
        match record.op {
            OperationKind::Tip | OperationKind::Ppv => self.one_time(record).await,
            OperationKind::Subscribe => self.subscribe(record).await,
            OperationKind::Payout => self.payout(record).await,
            OperationKind::Complete | OperationKind::Fail | OperationKind::Cancel => {
                self.close_payout(record).await
            }
            OperationKind::Chargeback => self.chargeback(record).await,
            OperationKind::Resolve => self.resolve(record).await,
            OperationKind::Unfreeze => {
                let wallet_id = self.user(&record.user);
                let admin = self.admin();
                self.engine.unfreeze_wallet(admin, wallet_id).await?;
                Ok(())
            }
        }
    }

    fn payer(&self, record: &OperationRecord) -> ReplayResult<PayerDetails> {
        let method = match record.method {
            None | Some(MethodColumn::Card) => PaymentMethod::Card,
            Some(MethodColumn::MobileMoney) => PaymentMethod::MobileMoney,
            Some(MethodColumn::BankTransfer) => {
                return Err(PaymentError::ValidationError(
                    "bank_transfer is not a payment method".into(),
                )
                .into());
            }
        };
        let country = CountryCode::new(record.country.as_deref().unwrap_or(DEFAULT_COUNTRY))?;
        Ok(PayerDetails {
            email: format!("{}@replay.invalid", record.user),
            country,
            method,
            phone_number: record.account.clone(),
            preferences: Vec::new(),
        })
    }

    async fn one_time(&mut self, record: OperationRecord) -> ReplayResult<()> {
        let op = record.op;
        let creator_label = require(record.counterparty.clone(), op, "counterparty")?;
        let label = require(record.reference.clone(), op, "reference")?;
        let amount = require(record.amount, op, "amount")?;
        let currency = record.currency.unwrap_or(Currency::Usd);
        let kind = if op == OperationKind::Tip {
            PaymentKind::Tip { message: None }
        } else {
            PaymentKind::Ppv {
                content_id: label.clone(),
            }
        };
        let request = OneTimePaymentRequest {
            user_id: self.user(&record.user),
            creator_id: Some(self.user(&creator_label)),
            amount_minor: major_to_minor(amount, currency)?,
            currency,
            kind,
            payer: self.payer(&record)?,
        };
        let outcome = self.engine.start_one_time_payment(request).await;
        self.settle_checkout(label, outcome).await
    }

    async fn subscribe(&mut self, record: OperationRecord) -> ReplayResult<()> {
        let op = record.op;
        let creator_label = require(record.counterparty.clone(), op, "counterparty")?;
        let label = require(record.reference.clone(), op, "reference")?;
        let tier = require(record.tier, op, "tier")?;
        let price = require(record.amount, op, "amount")?;
        let referrer_id = record.account.as_deref().map(|referrer| self.user(referrer));
        let mut payer = self.payer(&record)?;
        payer.phone_number = None;
        let request = SubscriptionRequest {
            fan_id: self.user(&record.user),
            creator_id: self.user(&creator_label),
            tier,
            tier_price: price,
            currency: record.currency.unwrap_or(Currency::Usd),
            interval: BillingInterval::Monthly,
            auto_renew: true,
            referrer_id,
            payer,
        };
        let outcome = self.engine.start_subscription(request).await;
        self.settle_checkout(label, outcome).await
    }

    async fn settle_checkout(
        &mut self,
        label: String,
        outcome: CheckoutOutcome,
    ) -> ReplayResult<()> {
        if let Some(error) = outcome.error {
            return Err(ReplayError::Rejected(error));
        }
        let (Some(provider), Some(reference)) = (outcome.provider, outcome.reference) else {
            return Err(PaymentError::InternalError("checkout returned no session".into()).into());
        };
        self.engine.verify_payment(provider, &reference).await?;
        self.payments
            .insert(label, PaymentHandle { provider, reference });
        Ok(())
    }

    async fn payout(&mut self, record: OperationRecord) -> ReplayResult<()> {
        let op = record.op;
        let label = require(record.reference.clone(), op, "reference")?;
        let amount = require(record.amount, op, "amount")?;
        let country = record.country.as_deref().map(CountryCode::new).transpose()?;
        let (method, account_details) = match record.method {
            Some(MethodColumn::MobileMoney) => (
                PayoutMethod::MobileMoney,
                AccountDetails {
                    phone_number: record.account.clone(),
                    country,
                    ..Default::default()
                },
            ),
            None | Some(MethodColumn::BankTransfer) => {
                let (number, bank) = match record.account.as_deref() {
                    Some(account) => match account.split_once('/') {
                        Some((number, bank)) => (Some(number.to_string()), Some(bank.to_string())),
                        None => (Some(account.to_string()), None),
                    },
                    None => (None, None),
                };
                (
                    PayoutMethod::BankTransfer,
                    AccountDetails {
                        account_name: Some(record.user.clone()),
                        account_number: number,
                        bank_code: bank,
                        country,
                        ..Default::default()
                    },
                )
            }
            Some(MethodColumn::Card) => {
                return Err(PaymentError::ValidationError("card is not a payout method".into()).into());
            }
        };
        let input = PayoutInput {
            user_id: self.user(&record.user),
            amount,
            currency: record.currency.unwrap_or(Currency::Usd),
            method,
            account_details,
        };
        let route = self.engine.route_payout(input).await;
        match (route.error, route.payout_id) {
            (Some(error), _) => Err(ReplayError::Rejected(error)),
            (None, Some(payout_id)) => {
                self.payouts.insert(label, payout_id);
                Ok(())
            }
            (None, None) => Err(PaymentError::InternalError("payout returned no id".into()).into()),
        }
    }

    async fn close_payout(&mut self, record: OperationRecord) -> ReplayResult<()> {
        let label = require(record.reference.clone(), record.op, "reference")?;
        let payout_id = *self.payouts.get(&label).ok_or_else(|| ReplayError::UnknownLabel {
            kind: "payout",
            label: label.clone(),
        })?;
        let admin = self.admin();
        match record.op {
            OperationKind::Complete => {
                let payout = self.engine.start_payout_processing(admin, payout_id).await;
                if let Err(e) = payout
                    && !matches!(e, PaymentError::Conflict(_))
                {
                    return Err(e.into());
                }
                self.engine.complete_payout(admin, payout_id).await?;
            }
            OperationKind::Fail => {
                self.engine
                    .fail_payout(admin, payout_id, Some("failed by replay".into()))
                    .await?;
            }
            _ => {
                self.engine.cancel_payout(admin, payout_id, None).await?;
            }
        }
        Ok(())
    }

    async fn chargeback(&mut self, record: OperationRecord) -> ReplayResult<()> {
        let label = require(record.reference.clone(), record.op, "reference")?;
        let event = match self.payments.get(&label) {
            Some(handle) => DisputeEvent {
                provider: handle.provider,
                transaction_id: format!("dp_{}", label),
                reference: Some(handle.reference.clone()),
                payment_id: None,
                amount: record.amount,
                currency: record.currency,
                reason: Some("replayed dispute".into()),
            },
            // Acknowledged by the engine without side effects.
            None => DisputeEvent {
                provider: Provider::Stripe,
                transaction_id: format!("dp_{}", label),
                reference: Some(label.clone()),
                payment_id: None,
                amount: None,
                currency: None,
                reason: None,
            },
        };
        if let DisputeOutcome::Recorded { chargeback_id }
        | DisputeOutcome::AlreadyRecorded { chargeback_id } = self.engine.handle_dispute(event).await?
        {
            self.chargebacks.insert(label, chargeback_id);
        }
        Ok(())
    }

    async fn resolve(&mut self, record: OperationRecord) -> ReplayResult<()> {
        let label = require(record.reference.clone(), record.op, "reference")?;
        let resolution: ChargebackResolution = require(record.outcome, record.op, "outcome")?;
        let chargeback_id = *self.chargebacks.get(&label).ok_or_else(|| ReplayError::UnknownLabel {
            kind: "chargeback",
            label: label.clone(),
        })?;
        let admin = self.admin();
        self.engine
            .resolve_chargeback(admin, chargeback_id, resolution)
            .await?;
        Ok(())
    }

    /// Final wallets keyed by label, ordered by label. Wallets of users not
    /// named in this run are keyed by their id.
    pub async fn wallets(&self) -> ReplayResult<Vec<(String, Wallet)>> {
        let mut rows: Vec<(String, Wallet)> = self
            .engine
            .wallets()
            .await?
            .into_iter()
            .map(|wallet| {
                let label = self
                    .users
                    .get(&wallet.user_id)
                    .cloned()
                    .unwrap_or_else(|| wallet.user_id.to_string());
                (label, wallet)
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::context::{Context, ProviderRegistry};
    use crate::config::EngineConfig;
    use crate::domain::ports::KycStatus;
    use crate::infrastructure::in_memory::in_memory_stores;
    use crate::infrastructure::notifier::StaticKycDirectory;
    use crate::interfaces::csv::operation_reader::OperationReader;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn replayer() -> Replayer {
        let ctx = Context::new(in_memory_stores(), ProviderRegistry::sandbox(), EngineConfig::default())
            .with_kyc(Arc::new(StaticKycDirectory::new(KycStatus::Approved)));
        Replayer::new(PaymentEngine::new(ctx))
    }

    async fn run(replayer: &mut Replayer, rows: &str) -> Vec<String> {
        let data = format!(
            "op,user,counterparty,reference,amount,currency,country,method,tier,account,outcome\n{}",
            rows
        );
        let mut errors = Vec::new();
        for record in OperationReader::new(data.as_bytes()).operations() {
            match record {
                Ok(record) => {
                    if let Err(e) = replayer.apply(record).await {
                        errors.push(e.to_string());
                    }
                }
                Err(e) => errors.push(e.to_string()),
            }
        }
        errors
    }

    #[test]
    fn test_labels_map_to_stable_ids() {
        assert_eq!(user_id("alice"), user_id("alice"));
        assert_ne!(user_id("alice"), user_id("bob"));
    }

    #[tokio::test]
    async fn test_tip_then_payout() {
        let mut replayer = replayer();
        let errors = run(
            &mut replayer,
            "tip,fan,creator,t1,100.00,USD,US,card,,,\npayout,creator,,p1,50,USD,US,bank_transfer,,0123/044,\ncomplete,admin,,p1,,,,,,,",
        )
        .await;
        assert!(errors.is_empty(), "{:?}", errors);

        let wallets = replayer.wallets().await.unwrap();
        let (label, wallet) = &wallets[0];
        assert_eq!(label, "creator");
        assert_eq!(wallet.balance, dec!(45));
        assert_eq!(wallet.pending_payouts, dec!(0));
    }

    #[tokio::test]
    async fn test_chargeback_freezes_and_blocks_payout() {
        let mut replayer = replayer();
        let errors = run(
            &mut replayer,
            "tip,fan,creator,t1,100,USD,US,card,,,\nchargeback,fan,,t1,,,,,,,\npayout,creator,,p1,20,USD,US,bank_transfer,,0123/044,",
        )
        .await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("wallet_frozen"), "{}", errors[0]);
        let wallet = replayer.engine().wallet(user_id("creator")).await.unwrap();
        assert!(wallet.frozen);
    }

    #[tokio::test]
    async fn test_unknown_payout_label_is_reported() {
        let mut replayer = replayer();
        let errors = run(&mut replayer, "cancel,admin,,missing,,,,,,,").await;
        assert_eq!(errors, vec!["Unknown payout label: missing".to_string()]);
    }
}
