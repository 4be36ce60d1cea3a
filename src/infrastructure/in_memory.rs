use crate::domain::category::Category;
use crate::domain::collection::{Collection, CollectionStatus};
use crate::domain::collector::{AssignOutcome, Collector};
use crate::domain::money::Money;
use crate::domain::payment::{PaymentRecord, WalletEntry, WalletEntryKind};
use crate::domain::ports::{
    CategoryCatalog, CollectionStore, CollectorDirectory, CreateOutcome, PaymentGateway,
    StagingCache, WalletService,
};
use crate::error::{Result, SagaError};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// In-process staging cache with per-key expiry.
///
/// Expired entries are invisible to `get` immediately and are physically
/// removed on the next read of that key or by the periodic `purge_expired`.
#[derive(Default, Clone)]
pub struct InMemoryStagingCache {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl InMemoryStagingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl StagingCache for InMemoryStagingCache {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(before - entries.len())
    }
}

#[derive(Default)]
struct CollectionTable {
    by_id: HashMap<String, Collection>,
    /// payment id -> collection id
    by_payment: HashMap<String, String>,
}

/// A thread-safe in-memory collection store.
///
/// A single lock covers both the records and the payment index so `create`
/// is atomic with respect to duplicate payment events.
#[derive(Default, Clone)]
pub struct InMemoryCollectionStore {
    table: Arc<RwLock<CollectionTable>>,
}

impl InMemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut collections: Vec<Collection>) -> Vec<Collection> {
    collections.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.collection_id.cmp(&b.collection_id))
    });
    collections
}

#[async_trait]
impl CollectionStore for InMemoryCollectionStore {
    async fn create(&self, collection: Collection) -> Result<CreateOutcome> {
        let mut table = self.table.write().await;
        if let Some(existing) = table.by_id.get(&collection.collection_id) {
            return Ok(CreateOutcome::AlreadyExists(existing.clone()));
        }
        if let Some(existing) = table
            .by_payment
            .get(&collection.payment_id)
            .and_then(|id| table.by_id.get(id))
        {
            return Ok(CreateOutcome::AlreadyExists(existing.clone()));
        }
        table.by_payment.insert(
            collection.payment_id.clone(),
            collection.collection_id.clone(),
        );
        table
            .by_id
            .insert(collection.collection_id.clone(), collection);
        Ok(CreateOutcome::Created)
    }

    async fn get(&self, collection_id: &str) -> Result<Option<Collection>> {
        let table = self.table.read().await;
        Ok(table.by_id.get(collection_id).cloned())
    }

    async fn find_by_payment(&self, payment_id: &str) -> Result<Option<Collection>> {
        let table = self.table.read().await;
        Ok(table
            .by_payment
            .get(payment_id)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn find_by_status(&self, status: CollectionStatus) -> Result<Vec<Collection>> {
        let table = self.table.read().await;
        Ok(sorted(
            table
                .by_id
                .values()
                .filter(|c| c.status == status)
                .cloned()
                .collect(),
        ))
    }

    async fn all(&self) -> Result<Vec<Collection>> {
        let table = self.table.read().await;
        Ok(sorted(table.by_id.values().cloned().collect()))
    }

    async fn replace_if_status(
        &self,
        collection: Collection,
        expected: CollectionStatus,
    ) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.by_id.get_mut(&collection.collection_id) {
            Some(current) if current.status == expected => {
                *current = collection;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(SagaError::CollectionNotFound(collection.collection_id)),
        }
    }
}

/// In-memory collector directory.
///
/// Commits and reverts run entirely under the write lock, which makes the
/// capacity check and the increment a single atomic step.
#[derive(Default, Clone)]
pub struct InMemoryCollectorDirectory {
    collectors: Arc<Mutex<HashMap<String, Collector>>>,
}

impl InMemoryCollectorDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectorDirectory for InMemoryCollectorDirectory {
    async fn register(&self, collector: Collector) -> Result<bool> {
        let mut collectors = self.collectors.lock().await;
        if collectors.contains_key(&collector.collector_id) {
            return Ok(false);
        }
        collectors.insert(collector.collector_id.clone(), collector);
        Ok(true)
    }

    async fn upsert(&self, collector: Collector) -> Result<()> {
        let mut collectors = self.collectors.lock().await;
        collectors.insert(collector.collector_id.clone(), collector);
        Ok(())
    }

    async fn get(&self, collector_id: &str) -> Result<Option<Collector>> {
        let collectors = self.collectors.lock().await;
        Ok(collectors.get(collector_id).cloned())
    }

    async fn find_by_area(&self, service_area: &str) -> Result<Vec<Collector>> {
        let collectors = self.collectors.lock().await;
        Ok(collectors
            .values()
            .filter(|c| c.service_area == service_area)
            .cloned()
            .collect())
    }

    async fn commit_assignment(
        &self,
        collector_id: &str,
        collection_id: &str,
        date: NaiveDate,
    ) -> Result<AssignOutcome> {
        let mut collectors = self.collectors.lock().await;
        let collector = collectors
            .get_mut(collector_id)
            .ok_or_else(|| SagaError::CollectorNotFound(collector_id.to_string()))?;
        collector.try_assign(collection_id, date)
    }

    async fn revert_assignment(
        &self,
        collector_id: &str,
        collection_id: &str,
        date: NaiveDate,
    ) -> Result<bool> {
        let mut collectors = self.collectors.lock().await;
        let collector = collectors
            .get_mut(collector_id)
            .ok_or_else(|| SagaError::CollectorNotFound(collector_id.to_string()))?;
        Ok(collector.revert(collection_id, date))
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCategoryCatalog {
    categories: Arc<RwLock<HashMap<String, Category>>>,
}

impl InMemoryCategoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, category: Category) {
        let mut categories = self.categories.write().await;
        categories.insert(category.category_id.clone(), category);
    }
}

#[async_trait]
impl CategoryCatalog for InMemoryCategoryCatalog {
    async fn resolve(&self, category_id: &str) -> Result<Option<Category>> {
        let categories = self.categories.read().await;
        Ok(categories.get(category_id).cloned())
    }
}

/// Stand-in for the payment service's read API.
#[derive(Default, Clone)]
pub struct InMemoryPaymentGateway {
    payments: Arc<RwLock<HashMap<String, PaymentRecord>>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, payment: PaymentRecord) {
        let mut payments = self.payments.write().await;
        payments.insert(payment.payment_id.clone(), payment);
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn get_payment(&self, payment_id: &str) -> Result<Option<PaymentRecord>> {
        let payments = self.payments.read().await;
        Ok(payments.get(payment_id).cloned())
    }
}

#[derive(Default)]
struct Ledger {
    balances: HashMap<String, Money>,
    entries: Vec<WalletEntry>,
    /// (user, reason) pairs already applied
    applied: HashSet<(String, String)>,
}

/// In-memory wallet whose operations are idempotent on `(user, reason)`.
#[derive(Default, Clone)]
pub struct InMemoryWallet {
    ledger: Arc<Mutex<Ledger>>,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self, user_id: &str) -> Vec<WalletEntry> {
        let ledger = self.ledger.lock().await;
        ledger
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WalletService for InMemoryWallet {
    async fn credit(&self, user_id: &str, amount: Money, reason: &str) -> Result<bool> {
        if !amount.is_positive() {
            return Err(SagaError::Validation(
                "Credit amount must be positive".to_string(),
            ));
        }
        let mut ledger = self.ledger.lock().await;
        if !ledger
            .applied
            .insert((user_id.to_string(), reason.to_string()))
        {
            return Ok(false);
        }
        *ledger.balances.entry(user_id.to_string()).or_default() += amount;
        ledger.entries.push(WalletEntry {
            user_id: user_id.to_string(),
            kind: WalletEntryKind::Credit,
            amount,
            reason: reason.to_string(),
        });
        Ok(true)
    }

    async fn debit(&self, user_id: &str, amount: Money, reason: &str) -> Result<bool> {
        if !amount.is_positive() {
            return Err(SagaError::Validation(
                "Debit amount must be positive".to_string(),
            ));
        }
        let mut ledger = self.ledger.lock().await;
        let key = (user_id.to_string(), reason.to_string());
        if ledger.applied.contains(&key) {
            return Ok(false);
        }
        let balance = ledger.balances.get(user_id).copied().unwrap_or_default();
        if balance < amount {
            return Err(SagaError::Validation("Insufficient funds".to_string()));
        }
        ledger.applied.insert(key);
        ledger
            .balances
            .insert(user_id.to_string(), balance - amount);
        ledger.entries.push(WalletEntry {
            user_id: user_id.to_string(),
            kind: WalletEntryKind::Debit,
            amount,
            reason: reason.to_string(),
        });
        Ok(true)
    }

    async fn balance(&self, user_id: &str) -> Result<Money> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.balances.get(user_id).copied().unwrap_or_default())
    }
}
