use crate::domain::collection::{Collection, CollectionStatus};
use crate::domain::collector::{AssignOutcome, Collector};
use crate::domain::ports::{CollectionStore, CollectorDirectory, CreateOutcome};
use crate::error::{Result, SagaError};
use async_trait::async_trait;
use chrono::NaiveDate;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Column Family for collection records, keyed by collection id.
pub const CF_COLLECTIONS: &str = "collections";
/// Column Family mapping payment id to collection id.
pub const CF_PAYMENT_INDEX: &str = "payment_index";
/// Column Family for collectors, keyed by collector id.
pub const CF_COLLECTORS: &str = "collectors";

/// A persistent store for collections and collectors using RocksDB.
///
/// RocksDB has no conditional put, so every read-check-write sequence
/// (unique create, status compare-and-set, capacity-bounded commit) runs under
/// `write_guard`. This makes them atomic for every handle cloned from the same
/// `open` call, which is the single-process deployment the CLI uses.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_guard: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path` with the required column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_COLLECTIONS, CF_PAYMENT_INDEX, CF_COLLECTORS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self {
            db: Arc::new(db),
            write_guard: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| SagaError::Storage(format!("{name} column family not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_guard
            .lock()
            .map_err(|e| SagaError::Storage(format!("write guard poisoned: {e}")))
    }

    fn create_sync(&self, collection: Collection) -> Result<CreateOutcome> {
        let _guard = self.lock()?;
        if let Some(existing) = self.read::<Collection>(CF_COLLECTIONS, &collection.collection_id)? {
            return Ok(CreateOutcome::AlreadyExists(existing));
        }
        if let Some(existing) = self.find_by_payment_sync(&collection.payment_id)? {
            return Ok(CreateOutcome::AlreadyExists(existing));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_COLLECTIONS)?,
            collection.collection_id.as_bytes(),
            serde_json::to_vec(&collection)?,
        );
        batch.put_cf(
            self.cf(CF_PAYMENT_INDEX)?,
            collection.payment_id.as_bytes(),
            collection.collection_id.as_bytes(),
        );
        self.db.write(batch)?;
        Ok(CreateOutcome::Created)
    }

    fn find_by_payment_sync(&self, payment_id: &str) -> Result<Option<Collection>> {
        let cf = self.cf(CF_PAYMENT_INDEX)?;
        let Some(id) = self.db.get_pinned_cf(cf, payment_id.as_bytes())? else {
            return Ok(None);
        };
        let id = String::from_utf8_lossy(&id).into_owned();
        self.read(CF_COLLECTIONS, &id)
    }

    fn replace_if_status_sync(
        &self,
        collection: Collection,
        expected: CollectionStatus,
    ) -> Result<bool> {
        let _guard = self.lock()?;
        let Some(current) = self.read::<Collection>(CF_COLLECTIONS, &collection.collection_id)?
        else {
            return Err(SagaError::CollectionNotFound(collection.collection_id));
        };
        if current.status != expected {
            return Ok(false);
        }
        self.write(CF_COLLECTIONS, &collection.collection_id, &collection)?;
        Ok(true)
    }

    fn update_collector<T>(
        &self,
        collector_id: &str,
        apply: impl FnOnce(&mut Collector) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.lock()?;
        let mut collector = self
            .read::<Collector>(CF_COLLECTORS, collector_id)?
            .ok_or_else(|| SagaError::CollectorNotFound(collector_id.to_string()))?;
        let outcome = apply(&mut collector)?;
        self.write(CF_COLLECTORS, collector_id, &collector)?;
        Ok(outcome)
    }

    fn register_sync(&self, collector: Collector) -> Result<bool> {
        let _guard = self.lock()?;
        if self
            .read::<Collector>(CF_COLLECTORS, &collector.collector_id)?
            .is_some()
        {
            return Ok(false);
        }
        self.write(CF_COLLECTORS, &collector.collector_id, &collector)?;
        Ok(true)
    }
}

#[async_trait]
impl CollectionStore for RocksDBStore {
    async fn create(&self, collection: Collection) -> Result<CreateOutcome> {
        self.create_sync(collection)
    }

    async fn get(&self, collection_id: &str) -> Result<Option<Collection>> {
        self.read(CF_COLLECTIONS, collection_id)
    }

    async fn find_by_payment(&self, payment_id: &str) -> Result<Option<Collection>> {
        self.find_by_payment_sync(payment_id)
    }

    async fn find_by_status(&self, status: CollectionStatus) -> Result<Vec<Collection>> {
        let mut collections: Vec<Collection> = self.scan(CF_COLLECTIONS)?;
        collections.retain(|c| c.status == status);
        collections.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(collections)
    }

    async fn all(&self) -> Result<Vec<Collection>> {
        let mut collections: Vec<Collection> = self.scan(CF_COLLECTIONS)?;
        collections.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(collections)
    }

    async fn replace_if_status(
        &self,
        collection: Collection,
        expected: CollectionStatus,
    ) -> Result<bool> {
        self.replace_if_status_sync(collection, expected)
    }
}

#[async_trait]
impl CollectorDirectory for RocksDBStore {
    async fn register(&self, collector: Collector) -> Result<bool> {
        self.register_sync(collector)
    }

    async fn upsert(&self, collector: Collector) -> Result<()> {
        let _guard = self.lock()?;
        self.write(CF_COLLECTORS, &collector.collector_id, &collector)
    }

    async fn get(&self, collector_id: &str) -> Result<Option<Collector>> {
        self.read(CF_COLLECTORS, collector_id)
    }

    async fn find_by_area(&self, service_area: &str) -> Result<Vec<Collector>> {
        let mut collectors: Vec<Collector> = self.scan(CF_COLLECTORS)?;
        collectors.retain(|c| c.service_area == service_area);
        Ok(collectors)
    }

    async fn commit_assignment(
        &self,
        collector_id: &str,
        collection_id: &str,
        date: NaiveDate,
    ) -> Result<AssignOutcome> {
        self.update_collector(collector_id, |collector| {
            collector.try_assign(collection_id, date)
        })
    }

    async fn revert_assignment(
        &self,
        collector_id: &str,
        collection_id: &str,
        date: NaiveDate,
    ) -> Result<bool> {
        self.update_collector(collector_id, |collector| {
            Ok(collector.revert(collection_id, date))
        })
    }
}
