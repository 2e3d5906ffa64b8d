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
use crate::domain::wallet::{LedgerEntry, Wallet};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CF_PAYMENTS: &str = "payments";
pub const CF_SUBSCRIPTIONS: &str = "subscriptions";
pub const CF_WALLETS: &str = "wallets";
pub const CF_LEDGER: &str = "ledger";
pub const CF_PAYOUTS: &str = "payouts";
pub const CF_DUNNING: &str = "dunning";
pub const CF_CHARGEBACKS: &str = "chargebacks";
pub const CF_RISK: &str = "risk";
pub const CF_COUNTERS: &str = "counters";

const COLUMN_FAMILIES: [&str; 9] = [
    CF_PAYMENTS,
    CF_SUBSCRIPTIONS,
    CF_WALLETS,
    CF_LEDGER,
    CF_PAYOUTS,
    CF_DUNNING,
    CF_CHARGEBACKS,
    CF_RISK,
    CF_COUNTERS,
];

/// A persistent store implementation using RocksDB.
///
/// One column family per entity, values encoded as JSON. Every
/// read-check-write sequence (version CAS, uniqueness checks, wallet commits)
/// runs under a single write gate; plain reads go straight to the database.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_gate: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating any
    /// missing column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    /// All repositories backed by this database.
    pub fn stores(&self) -> Stores {
        Stores {
            payments: Arc::new(self.clone()),
            subscriptions: Arc::new(self.clone()),
            wallets: Arc::new(self.clone()),
            payouts: Arc::new(self.clone()),
            dunning: Arc::new(self.clone()),
            chargebacks: Arc::new(self.clone()),
            risk: Arc::new(self.clone()),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::StorageError(format!("Column family {} not found", name)))
    }

    fn put<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    fn insert_new<T: Serialize>(&self, cf_name: &str, id: Uuid, value: &T, what: &str) -> Result<()> {
        if self.db.get_pinned_cf(self.cf(cf_name)?, id.as_bytes())?.is_some() {
            return Err(PaymentError::Conflict(format!("{} {} already exists", what, id)));
        }
        self.put(cf_name, id.as_bytes(), value)
    }

    /// Version compare-and-swap. Callers must hold the write gate.
    fn cas_update<T>(&self, cf_name: &str, id: Uuid, entity: &mut T, what: &str) -> Result<bool>
    where
        T: Versioned + Serialize + DeserializeOwned,
    {
        let stored: T = self
            .load(cf_name, id.as_bytes())?
            .ok_or_else(|| PaymentError::NotFound(format!("{} {}", what, id)))?;
        if stored.version() != entity.version() {
            return Ok(false);
        }
        entity.set_version(entity.version() + 1);
        self.put(cf_name, id.as_bytes(), entity)?;
        Ok(true)
    }

    fn ensure_single_active(&self, candidate: &Subscription) -> Result<()> {
        if candidate.status != SubscriptionStatus::Active {
            return Ok(());
        }
        let clash = self
            .scan::<Subscription>(CF_SUBSCRIPTIONS)?
            .into_iter()
            .any(|s| {
                s.id != candidate.id
                    && s.fan_id == candidate.fan_id
                    && s.creator_id == candidate.creator_id
                    && s.is_active()
            });
        if clash {
            return Err(PaymentError::Conflict(format!(
                "Fan {} already has an active subscription to creator {}",
                candidate.fan_id, candidate.creator_id
            )));
        }
        Ok(())
    }
}

fn ledger_key(entry: &LedgerEntry) -> Vec<u8> {
    let (user, kind, source) = entry.key();
    format!("{}:{:?}:{}", user, kind, source).into_bytes()
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        if self.find_by_reference(&payment.reference).await?.is_some() {
            return Err(PaymentError::Conflict(format!(
                "Payment reference {} already exists",
                payment.reference
            )));
        }
        self.insert_new(CF_PAYMENTS, payment.id, &payment, "Payment")
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>> {
        self.load(CF_PAYMENTS, id.as_bytes())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        Ok(self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .find(|p| p.matches_reference(reference)))
    }

    async fn update(&self, payment: &mut Payment) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        self.cas_update(CF_PAYMENTS, payment.id, payment, "Payment")
    }

    async fn list_by_creator(&self, creator_id: UserId) -> Result<Vec<Payment>> {
        let mut found: Vec<Payment> = self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| p.creator_id == Some(creator_id))
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }
}

#[async_trait]
impl SubscriptionStore for RocksDBStore {
    async fn insert(&self, subscription: Subscription) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        self.ensure_single_active(&subscription)?;
        self.insert_new(CF_SUBSCRIPTIONS, subscription.id, &subscription, "Subscription")
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>> {
        self.load(CF_SUBSCRIPTIONS, id.as_bytes())
    }

    async fn update(&self, subscription: &mut Subscription) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        self.ensure_single_active(subscription)?;
        self.cas_update(CF_SUBSCRIPTIONS, subscription.id, subscription, "Subscription")
    }

    async fn find_active(&self, fan_id: UserId, creator_id: UserId) -> Result<Option<Subscription>> {
        Ok(self
            .scan::<Subscription>(CF_SUBSCRIPTIONS)?
            .into_iter()
            .find(|s| s.fan_id == fan_id && s.creator_id == creator_id && s.is_active()))
    }

    async fn list_by_status(&self, status: SubscriptionStatus) -> Result<Vec<Subscription>> {
        Ok(self
            .scan::<Subscription>(CF_SUBSCRIPTIONS)?
            .into_iter()
            .filter(|s| s.status == status)
            .collect())
    }

    async fn list_by_creator(&self, creator_id: UserId) -> Result<Vec<Subscription>> {
        Ok(self
            .scan::<Subscription>(CF_SUBSCRIPTIONS)?
            .into_iter()
            .filter(|s| s.creator_id == creator_id)
            .collect())
    }
}

#[async_trait]
impl WalletStore for RocksDBStore {
    async fn get(&self, user_id: UserId) -> Result<Option<Wallet>> {
        self.load(CF_WALLETS, user_id.as_bytes())
    }

    async fn commit(&self, wallet: &mut Wallet, entry: Option<LedgerEntry>) -> Result<CommitOutcome> {
        let _gate = self.write_gate.lock().await;
        let ledger_cf = self.cf(CF_LEDGER)?;
        if let Some(entry) = &entry
            && self.db.get_pinned_cf(ledger_cf, ledger_key(entry))?.is_some()
        {
            return Ok(CommitOutcome::DuplicateEntry);
        }
        let stored: Option<Wallet> = self.load(CF_WALLETS, wallet.user_id.as_bytes())?;
        if stored.map(|w| w.version).unwrap_or(0) != wallet.version {
            return Ok(CommitOutcome::VersionConflict);
        }

        wallet.version += 1;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_WALLETS)?,
            wallet.user_id.as_bytes(),
            serde_json::to_vec(wallet)?,
        );
        if let Some(entry) = &entry {
            batch.put_cf(ledger_cf, ledger_key(entry), serde_json::to_vec(entry)?);
        }
        if let Err(e) = self.db.write(batch) {
            wallet.version -= 1;
            return Err(e.into());
        }
        Ok(CommitOutcome::Committed)
    }

    async fn entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        let mut found: Vec<LedgerEntry> = self
            .scan::<LedgerEntry>(CF_LEDGER)?
            .into_iter()
            .filter(|e| e.user_id == user_id)
            .collect();
        found.sort_by_key(|e| e.created_at);
        Ok(found)
    }

    async fn list(&self) -> Result<Vec<Wallet>> {
        self.scan(CF_WALLETS)
    }
}

#[async_trait]
impl PayoutStore for RocksDBStore {
    async fn insert(&self, payout: PayoutRequest) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        self.insert_new(CF_PAYOUTS, payout.id, &payout, "Payout")
    }

    async fn get(&self, id: Uuid) -> Result<Option<PayoutRequest>> {
        self.load(CF_PAYOUTS, id.as_bytes())
    }

    async fn update(&self, payout: &mut PayoutRequest) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        self.cas_update(CF_PAYOUTS, payout.id, payout, "Payout")
    }

    async fn list_by_wallet(&self, wallet_id: UserId) -> Result<Vec<PayoutRequest>> {
        let mut found: Vec<PayoutRequest> = self
            .scan::<PayoutRequest>(CF_PAYOUTS)?
            .into_iter()
            .filter(|p| p.wallet_id == wallet_id)
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }
}

#[async_trait]
impl DunningStore for RocksDBStore {
    async fn insert(&self, attempt: DunningAttempt) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        let duplicate = self
            .scan::<DunningAttempt>(CF_DUNNING)?
            .into_iter()
            .any(|a| {
                a.subscription_id == attempt.subscription_id
                    && a.payment_id == attempt.payment_id
                    && a.attempt_number == attempt.attempt_number
            });
        if duplicate {
            return Ok(false);
        }
        self.put(CF_DUNNING, attempt.id.as_bytes(), &attempt)?;
        Ok(true)
    }

    async fn update(&self, attempt: &mut DunningAttempt) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        self.cas_update(CF_DUNNING, attempt.id, attempt, "Dunning attempt")
    }

    async fn list_for_cycle(&self, subscription_id: Uuid, payment_id: Uuid) -> Result<Vec<DunningAttempt>> {
        let mut found: Vec<DunningAttempt> = self
            .scan::<DunningAttempt>(CF_DUNNING)?
            .into_iter()
            .filter(|a| a.subscription_id == subscription_id && a.payment_id == payment_id)
            .collect();
        found.sort_by_key(|a| a.attempt_number);
        Ok(found)
    }

    async fn list_pending(&self) -> Result<Vec<DunningAttempt>> {
        let mut found: Vec<DunningAttempt> = self
            .scan::<DunningAttempt>(CF_DUNNING)?
            .into_iter()
            .filter(|a| a.status == AttemptStatus::Pending)
            .collect();
        found.sort_by_key(|a| a.scheduled_at);
        Ok(found)
    }
}

#[async_trait]
impl ChargebackStore for RocksDBStore {
    async fn insert(&self, chargeback: Chargeback) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        if self
            .find_by_transaction(chargeback.provider, &chargeback.transaction_id)
            .await?
            .is_some()
        {
            return Ok(false);
        }
        self.put(CF_CHARGEBACKS, chargeback.id.as_bytes(), &chargeback)?;
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Chargeback>> {
        self.load(CF_CHARGEBACKS, id.as_bytes())
    }

    async fn find_by_transaction(&self, provider: Provider, transaction_id: &str) -> Result<Option<Chargeback>> {
        Ok(self
            .scan::<Chargeback>(CF_CHARGEBACKS)?
            .into_iter()
            .find(|c| c.provider == provider && c.transaction_id == transaction_id))
    }

    async fn update(&self, chargeback: &mut Chargeback) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        self.cas_update(CF_CHARGEBACKS, chargeback.id, chargeback, "Chargeback")
    }

    async fn list_by_creator(&self, creator_id: UserId) -> Result<Vec<Chargeback>> {
        Ok(self
            .scan::<Chargeback>(CF_CHARGEBACKS)?
            .into_iter()
            .filter(|c| c.creator_id == Some(creator_id))
            .collect())
    }
}

#[async_trait]
impl RiskStore for RocksDBStore {
    async fn get(&self, user_id: UserId) -> Result<Option<RiskProfile>> {
        self.load(CF_RISK, user_id.as_bytes())
    }

    async fn save(&self, profile: RiskProfile) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        self.put(CF_RISK, profile.user_id.as_bytes(), &profile)
    }

    async fn record_pre_kyc_request(&self, user_id: UserId) -> Result<u32> {
        let _gate = self.write_gate.lock().await;
        let count = self
            .load::<u32>(CF_COUNTERS, user_id.as_bytes())?
            .unwrap_or(0)
            + 1;
        self.put(CF_COUNTERS, user_id.as_bytes(), &count)?;
        Ok(count)
    }

    async fn pre_kyc_requests(&self, user_id: UserId) -> Result<u32> {
        Ok(self.load(CF_COUNTERS, user_id.as_bytes())?.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fees::FeeSplit;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::payment::PaymentKind;
    use crate::domain::wallet::EntryKind;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");
        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_payment_cas() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let payment = Payment::new(
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            Provider::Paystack,
            5000,
            Currency::Ngn,
            PaymentKind::Tip { message: None },
            FeeSplit::compute(5000, dec!(5)).unwrap(),
            Utc::now(),
        );
        PaymentStore::insert(&store, payment.clone()).await.unwrap();

        let mut winner = payment.clone();
        winner.mark_success(Utc::now());
        assert!(PaymentStore::update(&store, &mut winner).await.unwrap());
        let mut loser = payment.clone();
        assert!(!PaymentStore::update(&store, &mut loser).await.unwrap());

        let stored = store.find_by_reference(&payment.reference).await.unwrap().unwrap();
        assert_eq!(stored, winner);
    }

    #[tokio::test]
    async fn test_rocksdb_wallet_survives_reopen() {
        let dir = tempdir().unwrap();
        let user = Uuid::new_v4();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            let now = Utc::now();
            let mut wallet = Wallet::new(user, Currency::Usd, now);
            wallet.credit(Amount::new(dec!(42)).unwrap());
            let entry = LedgerEntry::new(user, EntryKind::Earning, dec!(42), Currency::Usd, "payment:x", now);
            assert_eq!(
                store.commit(&mut wallet, Some(entry.clone())).await.unwrap(),
                CommitOutcome::Committed
            );
            assert_eq!(
                store.commit(&mut wallet, Some(entry)).await.unwrap(),
                CommitOutcome::DuplicateEntry
            );
        }
        let store = RocksDBStore::open(dir.path()).unwrap();
        let wallet = WalletStore::get(&store, user).await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(42));
        assert_eq!(wallet.version, 1);
        assert_eq!(store.entries(user).await.unwrap().len(), 1);
    }
}
