use super::category::Category;
use super::collection::{Collection, CollectionStatus};
use super::collector::{AssignOutcome, Collector};
use super::money::Money;
use super::payment::PaymentRecord;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Short-lived key-value store. Entries disappear silently after their TTL.
#[async_trait]
pub trait StagingCache: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Drops every expired entry and returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

#[derive(Debug, PartialEq, Clone)]
pub enum CreateOutcome {
    Created,
    /// A collection with the same id or payment id is already stored.
    AlreadyExists(Collection),
}

#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Inserts atomically, unique on both collection id and payment id.
    async fn create(&self, collection: Collection) -> Result<CreateOutcome>;
    async fn get(&self, collection_id: &str) -> Result<Option<Collection>>;
    async fn find_by_payment(&self, payment_id: &str) -> Result<Option<Collection>>;
    async fn find_by_status(&self, status: CollectionStatus) -> Result<Vec<Collection>>;
    async fn all(&self) -> Result<Vec<Collection>>;
    /// Replaces the stored record only if it is still in `expected`.
    async fn replace_if_status(
        &self,
        collection: Collection,
        expected: CollectionStatus,
    ) -> Result<bool>;
}

#[async_trait]
pub trait CollectorDirectory: Send + Sync {
    /// Inserts the collector unless one with the same id exists. Returns
    /// whether it was inserted.
    async fn register(&self, collector: Collector) -> Result<bool>;
    async fn upsert(&self, collector: Collector) -> Result<()>;
    async fn get(&self, collector_id: &str) -> Result<Option<Collector>>;
    async fn find_by_area(&self, service_area: &str) -> Result<Vec<Collector>>;
    /// Appends the collection and increments the date counter in one step,
    /// failing with `CapacityExceeded` at the ceiling.
    async fn commit_assignment(
        &self,
        collector_id: &str,
        collection_id: &str,
        date: NaiveDate,
    ) -> Result<AssignOutcome>;
    /// Inverse of `commit_assignment`; false when there was nothing to revert.
    async fn revert_assignment(
        &self,
        collector_id: &str,
        collection_id: &str,
        date: NaiveDate,
    ) -> Result<bool>;
}

/// The collector service's synchronous allocation API.
#[async_trait]
pub trait CollectorAllocator: Send + Sync {
    async fn get_available_collector(
        &self,
        service_area: &str,
        date: NaiveDate,
    ) -> Result<Option<Collector>>;
    async fn assign_collection(
        &self,
        collector_id: &str,
        collection_id: &str,
        date: NaiveDate,
    ) -> Result<AssignOutcome>;
    /// The collector in `service_area` already holding `collection_id`, if any.
    async fn assigned_collector(
        &self,
        service_area: &str,
        collection_id: &str,
    ) -> Result<Option<Collector>>;
}

#[async_trait]
pub trait CategoryCatalog: Send + Sync {
    async fn resolve(&self, category_id: &str) -> Result<Option<Category>>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn get_payment(&self, payment_id: &str) -> Result<Option<PaymentRecord>>;
}

/// Wallet operations are idempotent on `reason`: repeating one returns
/// `false` and leaves the balance untouched.
#[async_trait]
pub trait WalletService: Send + Sync {
    async fn credit(&self, user_id: &str, amount: Money, reason: &str) -> Result<bool>;
    async fn debit(&self, user_id: &str, amount: Money, reason: &str) -> Result<bool>;
    async fn balance(&self, user_id: &str) -> Result<Money>;
}

/// A message as stored by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: String,
    pub queue: String,
    pub payload: Vec<u8>,
    /// Retry header: deliveries already attempted and nacked.
    pub attempts: u32,
    pub published_at: DateTime<Utc>,
}

/// A message handed to a consumer and awaiting ack or nack.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tag: u64,
    pub envelope: Envelope,
}

/// Durable named queues with at-least-once delivery.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()>;
    /// Waits up to `wait` for a ready message.
    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>>;
    async fn ack(&self, delivery: &Delivery) -> Result<()>;
    /// `requeue = true` redelivers after a backoff until the attempt bound is
    /// reached, then dead-letters; `requeue = false` dead-letters at once.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()>;
    /// Ready, delayed and unacknowledged messages on `queue`.
    async fn pending(&self, queue: &str) -> Result<usize>;
}

pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}.dead-letter")
}

pub type StagingCacheRef = Arc<dyn StagingCache>;
pub type CollectionStoreRef = Arc<dyn CollectionStore>;
pub type CollectorDirectoryRef = Arc<dyn CollectorDirectory>;
pub type CollectorAllocatorRef = Arc<dyn CollectorAllocator>;
pub type CategoryCatalogRef = Arc<dyn CategoryCatalog>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type WalletServiceRef = Arc<dyn WalletService>;
pub type MessageBusRef = Arc<dyn MessageBus>;
