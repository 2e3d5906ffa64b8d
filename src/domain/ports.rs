use super::UserId;
use super::chargeback::Chargeback;
use super::dunning::DunningAttempt;
use super::payment::Payment;
use super::payout::PayoutRequest;
use super::provider::Provider;
use super::risk::RiskProfile;
use super::subscription::{Subscription, SubscriptionStatus};
use super::wallet::{LedgerEntry, Wallet};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

// Versioned updates: `update` persists the entity only if the stored version
// still equals `entity.version`, bumps the version in place and returns true.
// A `false` return means another writer got there first.

/// Entities persisted with optimistic concurrency control.
pub trait Versioned {
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

macro_rules! versioned {
    ($($ty:ty),* $(,)?) => {
        $(impl Versioned for $ty {
            fn version(&self) -> u64 {
                self.version
            }

            fn set_version(&mut self, version: u64) {
                self.version = version;
            }
        })*
    };
}

versioned!(Payment, Subscription, Wallet, PayoutRequest, DunningAttempt, Chargeback);

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: Payment) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Payment>>;
    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>>;
    async fn update(&self, payment: &mut Payment) -> Result<bool>;
    async fn list_by_creator(&self, creator_id: UserId) -> Result<Vec<Payment>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert(&self, subscription: Subscription) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Subscription>>;
    /// Fails with `Conflict` if the update would give a fan a second active
    /// subscription to the same creator.
    async fn update(&self, subscription: &mut Subscription) -> Result<bool>;
    async fn find_active(&self, fan_id: UserId, creator_id: UserId) -> Result<Option<Subscription>>;
    async fn list_by_status(&self, status: SubscriptionStatus) -> Result<Vec<Subscription>>;
    async fn list_by_creator(&self, creator_id: UserId) -> Result<Vec<Subscription>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    VersionConflict,
    /// The ledger entry was already recorded; nothing was written.
    DuplicateEntry,
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn get(&self, user_id: UserId) -> Result<Option<Wallet>>;
    /// Atomically writes the wallet together with its optional ledger entry.
    /// A wallet at version 0 that does not exist yet is inserted.
    async fn commit(&self, wallet: &mut Wallet, entry: Option<LedgerEntry>) -> Result<CommitOutcome>;
    async fn entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>>;
    async fn list(&self) -> Result<Vec<Wallet>>;
}

#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn insert(&self, payout: PayoutRequest) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<PayoutRequest>>;
    async fn update(&self, payout: &mut PayoutRequest) -> Result<bool>;
    async fn list_by_wallet(&self, wallet_id: UserId) -> Result<Vec<PayoutRequest>>;
}

#[async_trait]
pub trait DunningStore: Send + Sync {
    /// Returns false if an attempt with the same (subscription, payment,
    /// attempt_number) already exists.
    async fn insert(&self, attempt: DunningAttempt) -> Result<bool>;
    async fn update(&self, attempt: &mut DunningAttempt) -> Result<bool>;
    /// Attempts of one billing cycle, ordered by attempt number.
    async fn list_for_cycle(&self, subscription_id: Uuid, payment_id: Uuid) -> Result<Vec<DunningAttempt>>;
    async fn list_pending(&self) -> Result<Vec<DunningAttempt>>;
}

#[async_trait]
pub trait ChargebackStore: Send + Sync {
    /// Returns false if the provider transaction was already recorded.
    async fn insert(&self, chargeback: Chargeback) -> Result<bool>;
    async fn get(&self, id: Uuid) -> Result<Option<Chargeback>>;
    async fn find_by_transaction(&self, provider: Provider, transaction_id: &str) -> Result<Option<Chargeback>>;
    async fn update(&self, chargeback: &mut Chargeback) -> Result<bool>;
    async fn list_by_creator(&self, creator_id: UserId) -> Result<Vec<Chargeback>>;
}

#[async_trait]
pub trait RiskStore: Send + Sync {
    async fn get(&self, user_id: UserId) -> Result<Option<RiskProfile>>;
    async fn save(&self, profile: RiskProfile) -> Result<()>;
    /// Increments and returns the number of payout attempts made before KYC approval.
    async fn record_pre_kyc_request(&self, user_id: UserId) -> Result<u32>;
    async fn pre_kyc_requests(&self, user_id: UserId) -> Result<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KycStatus {
    Approved,
    Pending,
    Rejected,
    None,
}

impl fmt::Display for KycStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KycStatus::Approved => "approved",
            KycStatus::Pending => "pending",
            KycStatus::Rejected => "rejected",
            KycStatus::None => "none",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait KycDirectory: Send + Sync {
    async fn kyc_status(&self, user_id: UserId) -> Result<KycStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentReceived,
    SubscriptionActivated,
    SubscriptionCancelled,
    SubscriptionPastDue,
    ReferralCommission,
    ChargebackOpened,
    ChargebackReview,
    PayoutUpdated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
}

/// Fire-and-forget user notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type SubscriptionStoreRef = Arc<dyn SubscriptionStore>;
pub type WalletStoreRef = Arc<dyn WalletStore>;
pub type PayoutStoreRef = Arc<dyn PayoutStore>;
pub type DunningStoreRef = Arc<dyn DunningStore>;
pub type ChargebackStoreRef = Arc<dyn ChargebackStore>;
pub type RiskStoreRef = Arc<dyn RiskStore>;

/// Every repository the engine needs, shared across services.
#[derive(Clone)]
pub struct Stores {
    pub payments: PaymentStoreRef,
    pub subscriptions: SubscriptionStoreRef,
    pub wallets: WalletStoreRef,
    pub payouts: PayoutStoreRef,
    pub dunning: DunningStoreRef,
    pub chargebacks: ChargebackStoreRef,
    pub risk: RiskStoreRef,
}
