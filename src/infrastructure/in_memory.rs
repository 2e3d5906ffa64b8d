use crate::domain::UserId;
use crate::domain::chargeback::Chargeback;
use crate::domain::dunning::{AttemptStatus, DunningAttempt};
use crate::domain::payment::Payment;
use crate::domain::payout::PayoutRequest;
use crate::domain::ports::{
    ChargebackStore, CommitOutcome, DunningStore, PaymentStore, PayoutStore, RiskStore, Stores,
    SubscriptionStore, Versioned, WalletStore,
};
use crate::domain::provider::Provider;
use crate::domain::risk::RiskProfile;
use crate::domain::subscription::{Subscription, SubscriptionStatus};
use crate::domain::wallet::{EntryKind, LedgerEntry, Wallet};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

fn insert_new<K, V>(rows: &mut HashMap<K, V>, key: K, value: V, what: &str) -> Result<()>
where
    K: Hash + Eq + std::fmt::Display,
{
    if rows.contains_key(&key) {
        return Err(PaymentError::Conflict(format!("{} {} already exists", what, key)));
    }
    rows.insert(key, value);
    Ok(())
}

/// Compare-and-swap on the version field.
fn cas_update<K, V>(rows: &mut HashMap<K, V>, key: K, entity: &mut V, what: &str) -> Result<bool>
where
    K: Hash + Eq + std::fmt::Display,
    V: Versioned + Clone,
{
    match rows.get(&key) {
        Some(stored) if stored.version() == entity.version() => {
            entity.set_version(entity.version() + 1);
            rows.insert(key, entity.clone());
            Ok(true)
        }
        Some(_) => Ok(false),
        None => Err(PaymentError::NotFound(format!("{} {}", what, key))),
    }
}

/// Payments keyed by id.
///
/// Uses `Arc<RwLock<HashMap<..>>>` for shared concurrent access; references
/// are looked up by scanning, which is fine at in-memory scale.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<Uuid, Payment>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let mut payments = self.payments.write().await;
        if payments.values().any(|p| p.reference == payment.reference) {
            return Err(PaymentError::Conflict(format!(
                "Payment reference {} already exists",
                payment.reference
            )));
        }
        insert_new(&mut payments, payment.id, payment, "Payment")
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.payments.read().await.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments.values().find(|p| p.matches_reference(reference)).cloned())
    }

    async fn update(&self, payment: &mut Payment) -> Result<bool> {
        let mut payments = self.payments.write().await;
        cas_update(&mut payments, payment.id, payment, "Payment")
    }

    async fn list_by_creator(&self, creator_id: UserId) -> Result<Vec<Payment>> {
        let payments = self.payments.read().await;
        let mut found: Vec<Payment> = payments
            .values()
            .filter(|p| p.creator_id == Some(creator_id))
            .cloned()
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }
}

#[derive(Default, Clone)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<Uuid, Subscription>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ensure_single_active(rows: &HashMap<Uuid, Subscription>, candidate: &Subscription) -> Result<()> {
    if candidate.status != SubscriptionStatus::Active {
        return Ok(());
    }
    let clash = rows.values().any(|s| {
        s.id != candidate.id
            && s.fan_id == candidate.fan_id
            && s.creator_id == candidate.creator_id
            && s.status == SubscriptionStatus::Active
    });
    if clash {
        return Err(PaymentError::Conflict(format!(
            "Fan {} already has an active subscription to creator {}",
            candidate.fan_id, candidate.creator_id
        )));
    }
    Ok(())
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn insert(&self, subscription: Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        ensure_single_active(&subscriptions, &subscription)?;
        insert_new(&mut subscriptions, subscription.id, subscription, "Subscription")
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.read().await.get(&id).cloned())
    }

    async fn update(&self, subscription: &mut Subscription) -> Result<bool> {
        let mut subscriptions = self.subscriptions.write().await;
        ensure_single_active(&subscriptions, subscription)?;
        cas_update(&mut subscriptions, subscription.id, subscription, "Subscription")
    }

    async fn find_active(&self, fan_id: UserId, creator_id: UserId) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .values()
            .find(|s| s.fan_id == fan_id && s.creator_id == creator_id && s.is_active())
            .cloned())
    }

    async fn list_by_status(&self, status: SubscriptionStatus) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn list_by_creator(&self, creator_id: UserId) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .values()
            .filter(|s| s.creator_id == creator_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct WalletTables {
    wallets: HashMap<UserId, Wallet>,
    entries: Vec<LedgerEntry>,
    entry_keys: HashSet<(UserId, EntryKind, String)>,
}

/// Wallets and their ledger share one lock so a balance change and its entry
/// are always written together.
#[derive(Default, Clone)]
pub struct InMemoryWalletStore {
    tables: Arc<RwLock<WalletTables>>,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn get(&self, user_id: UserId) -> Result<Option<Wallet>> {
        Ok(self.tables.read().await.wallets.get(&user_id).cloned())
    }

    async fn commit(&self, wallet: &mut Wallet, entry: Option<LedgerEntry>) -> Result<CommitOutcome> {
        let mut tables = self.tables.write().await;
        if let Some(entry) = &entry
            && tables.entry_keys.contains(&entry.key())
        {
            return Ok(CommitOutcome::DuplicateEntry);
        }
        let stored_version = tables.wallets.get(&wallet.user_id).map(|w| w.version);
        if stored_version.unwrap_or(0) != wallet.version {
            return Ok(CommitOutcome::VersionConflict);
        }
        wallet.version += 1;
        tables.wallets.insert(wallet.user_id, wallet.clone());
        if let Some(entry) = entry {
            tables.entry_keys.insert(entry.key());
            tables.entries.push(entry);
        }
        Ok(CommitOutcome::Committed)
    }

    async fn entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<Wallet>> {
        Ok(self.tables.read().await.wallets.values().cloned().collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPayoutStore {
    payouts: Arc<RwLock<HashMap<Uuid, PayoutRequest>>>,
}

impl InMemoryPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutStore for InMemoryPayoutStore {
    async fn insert(&self, payout: PayoutRequest) -> Result<()> {
        let mut payouts = self.payouts.write().await;
        insert_new(&mut payouts, payout.id, payout, "Payout")
    }

    async fn get(&self, id: Uuid) -> Result<Option<PayoutRequest>> {
        Ok(self.payouts.read().await.get(&id).cloned())
    }

    async fn update(&self, payout: &mut PayoutRequest) -> Result<bool> {
        let mut payouts = self.payouts.write().await;
        cas_update(&mut payouts, payout.id, payout, "Payout")
    }

    async fn list_by_wallet(&self, wallet_id: UserId) -> Result<Vec<PayoutRequest>> {
        let payouts = self.payouts.read().await;
        let mut found: Vec<PayoutRequest> = payouts
            .values()
            .filter(|p| p.wallet_id == wallet_id)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryDunningStore {
    attempts: Arc<RwLock<HashMap<Uuid, DunningAttempt>>>,
}

impl InMemoryDunningStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DunningStore for InMemoryDunningStore {
    async fn insert(&self, attempt: DunningAttempt) -> Result<bool> {
        let mut attempts = self.attempts.write().await;
        let duplicate = attempts.values().any(|a| {
            a.subscription_id == attempt.subscription_id
                && a.payment_id == attempt.payment_id
                && a.attempt_number == attempt.attempt_number
        });
        if duplicate {
            return Ok(false);
        }
        attempts.insert(attempt.id, attempt);
        Ok(true)
    }

    async fn update(&self, attempt: &mut DunningAttempt) -> Result<bool> {
        let mut attempts = self.attempts.write().await;
        cas_update(&mut attempts, attempt.id, attempt, "Dunning attempt")
    }

    async fn list_for_cycle(&self, subscription_id: Uuid, payment_id: Uuid) -> Result<Vec<DunningAttempt>> {
        let attempts = self.attempts.read().await;
        let mut found: Vec<DunningAttempt> = attempts
            .values()
            .filter(|a| a.subscription_id == subscription_id && a.payment_id == payment_id)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.attempt_number);
        Ok(found)
    }

    async fn list_pending(&self) -> Result<Vec<DunningAttempt>> {
        let attempts = self.attempts.read().await;
        let mut found: Vec<DunningAttempt> = attempts
            .values()
            .filter(|a| a.status == AttemptStatus::Pending)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.scheduled_at);
        Ok(found)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryChargebackStore {
    chargebacks: Arc<RwLock<HashMap<Uuid, Chargeback>>>,
}

impl InMemoryChargebackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChargebackStore for InMemoryChargebackStore {
    async fn insert(&self, chargeback: Chargeback) -> Result<bool> {
        let mut chargebacks = self.chargebacks.write().await;
        let duplicate = chargebacks.values().any(|c| {
            c.provider == chargeback.provider && c.transaction_id == chargeback.transaction_id
        });
        if duplicate {
            return Ok(false);
        }
        chargebacks.insert(chargeback.id, chargeback);
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Chargeback>> {
        Ok(self.chargebacks.read().await.get(&id).cloned())
    }

    async fn find_by_transaction(&self, provider: Provider, transaction_id: &str) -> Result<Option<Chargeback>> {
        let chargebacks = self.chargebacks.read().await;
        Ok(chargebacks
            .values()
            .find(|c| c.provider == provider && c.transaction_id == transaction_id)
            .cloned())
    }

    async fn update(&self, chargeback: &mut Chargeback) -> Result<bool> {
        let mut chargebacks = self.chargebacks.write().await;
        cas_update(&mut chargebacks, chargeback.id, chargeback, "Chargeback")
    }

    async fn list_by_creator(&self, creator_id: UserId) -> Result<Vec<Chargeback>> {
        let chargebacks = self.chargebacks.read().await;
        Ok(chargebacks
            .values()
            .filter(|c| c.creator_id == Some(creator_id))
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryRiskStore {
    profiles: Arc<RwLock<HashMap<UserId, RiskProfile>>>,
    pre_kyc_requests: Arc<RwLock<HashMap<UserId, u32>>>,
}

impl InMemoryRiskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RiskStore for InMemoryRiskStore {
    async fn get(&self, user_id: UserId) -> Result<Option<RiskProfile>> {
        Ok(self.profiles.read().await.get(&user_id).cloned())
    }

    async fn save(&self, profile: RiskProfile) -> Result<()> {
        self.profiles.write().await.insert(profile.user_id, profile);
        Ok(())
    }

    async fn record_pre_kyc_request(&self, user_id: UserId) -> Result<u32> {
        let mut counters = self.pre_kyc_requests.write().await;
        let count = counters.entry(user_id).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn pre_kyc_requests(&self, user_id: UserId) -> Result<u32> {
        Ok(self
            .pre_kyc_requests
            .read()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or(0))
    }
}

/// A fresh, empty set of in-memory stores.
pub fn in_memory_stores() -> Stores {
    Stores {
        payments: Arc::new(InMemoryPaymentStore::new()),
        subscriptions: Arc::new(InMemorySubscriptionStore::new()),
        wallets: Arc::new(InMemoryWalletStore::new()),
        payouts: Arc::new(InMemoryPayoutStore::new()),
        dunning: Arc::new(InMemoryDunningStore::new()),
        chargebacks: Arc::new(InMemoryChargebackStore::new()),
        risk: Arc::new(InMemoryRiskStore::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fees::FeeSplit;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::payment::PaymentKind;
    use crate::domain::subscription::{BillingInterval, Tier};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn tip() -> Payment {
        Payment::new(
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            Provider::Stripe,
            1000,
            Currency::Usd,
            PaymentKind::Tip { message: None },
            FeeSplit::compute(1000, dec!(5)).unwrap(),
            Utc::now(),
        )
    }

    fn subscription(fan: UserId, creator: UserId, status: SubscriptionStatus) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            fan_id: fan,
            creator_id: creator,
            tier: Tier::Basic,
            tier_price: dec!(5),
            currency: Currency::Usd,
            interval: BillingInterval::Monthly,
            status,
            provider: Provider::Stripe,
            reference: format!("pay_{}", Uuid::new_v4().simple()),
            payment_id: Uuid::new_v4(),
            auto_renew: true,
            referrer_id: None,
            start_date: None,
            next_billing_date: now + Duration::days(30),
            past_due_since: None,
            grace_until: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_payment_cas_update() {
        let store = InMemoryPaymentStore::new();
        let payment = tip();
        store.insert(payment.clone()).await.unwrap();

        let mut first = payment.clone();
        let mut stale = payment.clone();
        first.mark_success(Utc::now());
        assert!(store.update(&mut first).await.unwrap());
        assert_eq!(first.version, 1);

        stale.mark_failed("late", Utc::now());
        assert!(!store.update(&mut stale).await.unwrap());

        let stored = store.find_by_reference(&payment.reference).await.unwrap().unwrap();
        assert_eq!(stored, first);
    }

    #[tokio::test]
    async fn test_duplicate_payment_rejected() {
        let store = InMemoryPaymentStore::new();
        let payment = tip();
        store.insert(payment.clone()).await.unwrap();
        assert!(matches!(
            store.insert(payment).await,
            Err(PaymentError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_single_active_subscription_per_pair() {
        let store = InMemorySubscriptionStore::new();
        let (fan, creator) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .insert(subscription(fan, creator, SubscriptionStatus::Active))
            .await
            .unwrap();

        let mut pending = subscription(fan, creator, SubscriptionStatus::Pending);
        store.insert(pending.clone()).await.unwrap();
        pending.activate(Utc::now());
        assert!(matches!(
            store.update(&mut pending).await,
            Err(PaymentError::Conflict(_))
        ));
        assert!(store.find_active(fan, creator).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_wallet_commit_is_idempotent_per_entry() {
        let store = InMemoryWalletStore::new();
        let user = Uuid::new_v4();
        let now = Utc::now();
        let entry = LedgerEntry::new(user, EntryKind::Earning, dec!(9.5), Currency::Usd, "payment:1", now);

        let mut wallet = Wallet::new(user, Currency::Usd, now);
        wallet.credit(Amount::new(dec!(9.5)).unwrap());
        assert_eq!(
            store.commit(&mut wallet, Some(entry.clone())).await.unwrap(),
            CommitOutcome::Committed
        );

        let mut replay = store.get(user).await.unwrap().unwrap();
        replay.credit(Amount::new(dec!(9.5)).unwrap());
        assert_eq!(
            store.commit(&mut replay, Some(entry)).await.unwrap(),
            CommitOutcome::DuplicateEntry
        );
        assert_eq!(store.get(user).await.unwrap().unwrap().balance, dec!(9.5));
        assert_eq!(store.entries(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wallet_version_conflict() {
        let store = InMemoryWalletStore::new();
        let user = Uuid::new_v4();
        let mut a = Wallet::new(user, Currency::Usd, Utc::now());
        let mut b = a.clone();
        assert_eq!(store.commit(&mut a, None).await.unwrap(), CommitOutcome::Committed);
        assert_eq!(
            store.commit(&mut b, None).await.unwrap(),
            CommitOutcome::VersionConflict
        );
    }

    #[tokio::test]
    async fn test_dunning_attempt_uniqueness() {
        let store = InMemoryDunningStore::new();
        let (sub, payment) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        assert!(store.insert(DunningAttempt::new(sub, payment, 1, now)).await.unwrap());
        assert!(!store.insert(DunningAttempt::new(sub, payment, 1, now)).await.unwrap());
        assert!(store.insert(DunningAttempt::new(sub, payment, 2, now)).await.unwrap());
        let cycle = store.list_for_cycle(sub, payment).await.unwrap();
        assert_eq!(
            cycle.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn test_pre_kyc_counter() {
        let store = InMemoryRiskStore::new();
        let user = Uuid::new_v4();
        assert_eq!(store.pre_kyc_requests(user).await.unwrap(), 0);
        assert_eq!(store.record_pre_kyc_request(user).await.unwrap(), 1);
        assert_eq!(store.record_pre_kyc_request(user).await.unwrap(), 2);
    }
}
