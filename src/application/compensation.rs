use crate::domain::collection::{Collection, CollectionStatus};
use crate::domain::events::{CollectorCancellation, PaymentCancellation, Rollback};
use crate::domain::ports::{
    CollectionStoreRef, CollectorDirectoryRef, PaymentGatewayRef, WalletServiceRef,
};
use crate::error::{Result, SagaError};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

/// Wallet reason, and idempotency key, of the refund for a cancelled collection.
pub fn refund_reason(collection_id: &str) -> String {
    format!("refund:{collection_id}")
}

/// Whether `collection` holds, or may still take, a slot on `collector_id`.
///
/// A pending collection reuses a slot committed for it on its next schedule
/// attempt, so the slot stays. The answer is false only for states the
/// collection never leaves, which keeps the read and the revert race-free.
fn may_use_slot(collection: &Collection, collector_id: &str) -> bool {
    match collection.status {
        CollectionStatus::Pending => true,
        CollectionStatus::Scheduled | CollectionStatus::Completed => {
            collection.collector_id.as_deref() == Some(collector_id)
        }
        CollectionStatus::Cancelled => false,
    }
}

/// What a rollback actually undid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub reverted: bool,
    pub refunded: bool,
}

/// Consumes the compensation queues on behalf of the collector and payment
/// services. Every operation is safe to repeat.
pub struct CompensationHandler {
    directory: CollectorDirectoryRef,
    collections: CollectionStoreRef,
    payments: PaymentGatewayRef,
    wallet: WalletServiceRef,
}

impl CompensationHandler {
    pub fn new(
        directory: CollectorDirectoryRef,
        collections: CollectionStoreRef,
        payments: PaymentGatewayRef,
        wallet: WalletServiceRef,
    ) -> Self {
        Self {
            directory,
            collections,
            payments,
            wallet,
        }
    }

    /// Releases the collector's slot. Returns false if it was already released.
    #[tracing::instrument(skip(self, event), fields(collection_id = %event.collection_id, collector_id = %event.collector_id))]
    pub async fn revert_collector(&self, event: &CollectorCancellation) -> Result<bool> {
        self.revert(&event.collector_id, &event.collection_id, event.date)
            .await
    }

    /// Credits the advance payment back to the user's wallet. Returns false if
    /// the refund was already applied or there was nothing settled to refund.
    #[tracing::instrument(skip(self, event), fields(collection_id = %event.collection_id, payment_id = %event.payment_id))]
    pub async fn refund_payment(&self, event: &PaymentCancellation) -> Result<bool> {
        self.refund(&event.collection_id, &event.user_id, &event.payment_id)
            .await
    }

    /// Undoes the side effects named in the rollback, checked against the
    /// collection's current state: only a cancelled collection is refunded,
    /// and a slot is released only once the collection can never use it.
    #[tracing::instrument(skip(self, event), fields(collection_id = %event.collection_id))]
    pub async fn apply_rollback(&self, event: &Rollback) -> Result<RollbackReport> {
        let collection = self.collections.get(&event.collection_id).await?;
        let mut report = RollbackReport::default();

        if let (Some(collector_id), Some(date)) = (&event.collector_id, event.date) {
            let owner = collection
                .as_ref()
                .is_some_and(|c| may_use_slot(c, collector_id));
            if owner {
                debug!(collector_id = %collector_id, "Slot is or may become live, keeping it");
            } else {
                report.reverted = self
                    .revert(collector_id, &event.collection_id, date)
                    .await?;
            }
        }

        if let Some(payment_id) = &event.payment_id {
            match &collection {
                Some(c) if c.status == CollectionStatus::Cancelled => {
                    let user_id = event.user_id.as_deref().unwrap_or(&c.user_id);
                    report.refunded = self
                        .refund(&event.collection_id, user_id, payment_id)
                        .await?;
                }
                Some(c) => {
                    warn!(status = %c.status, "Rollback asked for a refund of a collection that is not cancelled");
                }
                None => {
                    warn!("Rollback asked for a refund of an unknown collection");
                }
            }
        }

        info!(
            reverted = report.reverted,
            refunded = report.refunded,
            "Rollback applied"
        );
        Ok(report)
    }

    async fn revert(&self, collector_id: &str, collection_id: &str, date: NaiveDate) -> Result<bool> {
        let reverted = self
            .directory
            .revert_assignment(collector_id, collection_id, date)
            .await?;
        if reverted {
            info!(collector_id, collection_id, %date, "Collector assignment reverted");
        } else {
            debug!(collector_id, collection_id, "Nothing to revert");
        }
        Ok(reverted)
    }

    async fn refund(&self, collection_id: &str, user_id: &str, payment_id: &str) -> Result<bool> {
        let payment = self
            .payments
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| SagaError::PaymentNotFound(payment_id.to_string()))?;
        if !payment.is_settled() {
            warn!(payment_id, status = %payment.status, "Payment never settled, nothing to refund");
            return Ok(false);
        }

        let refunded = self
            .wallet
            .credit(user_id, payment.amount, &refund_reason(collection_id))
            .await?;
        if refunded {
            info!(user_id, amount = %payment.amount, "Advance payment refunded to wallet");
        } else {
            debug!(user_id, "Refund already applied");
        }
        Ok(refunded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collection::{Collection, PaymentMethod, PaymentStatus};
    use crate::domain::collector::Collector;
    use crate::domain::money::Money;
    use crate::domain::payment::{PaymentRecord, PaymentRecordStatus};
    use crate::domain::ports::{
        CollectionStore, CollectorDirectory, CreateOutcome, WalletService,
    };
    use crate::infrastructure::in_memory::{
        InMemoryCollectionStore, InMemoryCollectorDirectory, InMemoryPaymentGateway,
        InMemoryWallet,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
    }

    struct Fixture {
        handler: CompensationHandler,
        directory: Arc<InMemoryCollectorDirectory>,
        store: Arc<InMemoryCollectionStore>,
        wallet: Arc<InMemoryWallet>,
    }

    async fn fixture() -> Fixture {
        let directory = Arc::new(InMemoryCollectorDirectory::new());
        let store = Arc::new(InMemoryCollectionStore::new());
        let payments = Arc::new(InMemoryPaymentGateway::new());
        let wallet = Arc::new(InMemoryWallet::new());

        directory
            .register(Collector::new("c1", "north", 5))
            .await
            .unwrap();
        directory.commit_assignment("c1", "col-1", date()).await.unwrap();
        payments
            .record(PaymentRecord {
                payment_id: "p1".to_string(),
                user_id: "u1".to_string(),
                amount: Money::new(dec!(60)),
                status: PaymentRecordStatus::Success,
                method: PaymentMethod::Digital,
            })
            .await;

        let handler = CompensationHandler::new(
            directory.clone(),
            store.clone(),
            payments,
            wallet.clone(),
        );
        Fixture {
            handler,
            directory,
            store,
            wallet,
        }
    }

    fn collection(status: CollectionStatus, collector_id: &str) -> Collection {
        let now = Utc::now();
        Collection {
            collection_id: "col-1".to_string(),
            user_id: "u1".to_string(),
            items: vec![],
            estimated_cost: Money::new(dec!(60)),
            service_area: "north".to_string(),
            preferred_date: date(),
            payment_id: "p1".to_string(),
            payment_status: PaymentStatus::Paid,
            collector_id: Some(collector_id.to_string()),
            status,
            cancellation_reason: None,
            compensated: false,
            completion: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn store_collection(fx: &Fixture, status: CollectionStatus) {
        fx.store.create(collection(status, "c1")).await.unwrap();
    }

    fn rollback() -> Rollback {
        Rollback {
            collection_id: "col-1".to_string(),
            collector_id: Some("c1".to_string()),
            payment_id: Some("p1".to_string()),
            user_id: Some("u1".to_string()),
            date: Some(date()),
        }
    }

    #[tokio::test]
    async fn test_revert_collector_is_idempotent() {
        let fx = fixture().await;
        let event = CollectorCancellation {
            collection_id: "col-1".to_string(),
            collector_id: "c1".to_string(),
            date: date(),
        };

        assert!(fx.handler.revert_collector(&event).await.unwrap());
        assert!(!fx.handler.revert_collector(&event).await.unwrap());

        let collector = fx.directory.get("c1").await.unwrap().unwrap();
        assert_eq!(collector.tasks_on(date()), 0);
        assert!(collector.assigned_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_refund_credits_wallet_once() {
        let fx = fixture().await;
        let event = PaymentCancellation {
            collection_id: "col-1".to_string(),
            user_id: "u1".to_string(),
            payment_id: "p1".to_string(),
        };

        assert!(fx.handler.refund_payment(&event).await.unwrap());
        assert!(!fx.handler.refund_payment(&event).await.unwrap());

        assert_eq!(fx.wallet.balance("u1").await.unwrap(), Money::new(dec!(60)));
        let entries = fx.wallet.entries("u1").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, "refund:col-1");
    }

    #[tokio::test]
    async fn test_refund_of_unknown_payment_fails() {
        let fx = fixture().await;
        let event = PaymentCancellation {
            collection_id: "col-1".to_string(),
            user_id: "u1".to_string(),
            payment_id: "missing".to_string(),
        };
        let err = fx.handler.refund_payment(&event).await.unwrap_err();
        assert!(matches!(err, SagaError::PaymentNotFound(_)));
    }

    #[tokio::test]
    async fn test_rollback_on_cancelled_collection_undoes_everything() {
        let fx = fixture().await;
        store_collection(&fx, CollectionStatus::Cancelled).await;

        let report = fx.handler.apply_rollback(&rollback()).await.unwrap();
        assert_eq!(
            report,
            RollbackReport {
                reverted: true,
                refunded: true
            }
        );

        let again = fx.handler.apply_rollback(&rollback()).await.unwrap();
        assert_eq!(again, RollbackReport::default());
        assert_eq!(fx.wallet.balance("u1").await.unwrap(), Money::new(dec!(60)));
    }

    #[tokio::test]
    async fn test_rollback_keeps_live_assignment_and_skips_refund() {
        let fx = fixture().await;
        store_collection(&fx, CollectionStatus::Scheduled).await;

        let report = fx.handler.apply_rollback(&rollback()).await.unwrap();
        assert_eq!(report, RollbackReport::default());

        let collector = fx.directory.get("c1").await.unwrap().unwrap();
        assert_eq!(collector.tasks_on(date()), 1);
        assert_eq!(fx.wallet.balance("u1").await.unwrap(), Money::ZERO);
    }

    #[tokio::test]
    async fn test_rollback_releases_slot_of_collection_scheduled_elsewhere() {
        let fx = fixture().await;
        fx.store
            .create(collection(CollectionStatus::Scheduled, "c2"))
            .await
            .unwrap();
        let event = Rollback {
            payment_id: None,
            user_id: None,
            ..rollback()
        };

        let report = fx.handler.apply_rollback(&event).await.unwrap();
        assert!(report.reverted);
        assert!(!report.refunded);
        let collector = fx.directory.get("c1").await.unwrap().unwrap();
        assert_eq!(collector.tasks_on(date()), 0);
    }

    #[tokio::test]
    async fn test_rollback_keeps_slot_of_pending_collection() {
        let fx = fixture().await;
        let mut pending = collection(CollectionStatus::Pending, "c1");
        pending.collector_id = None;
        fx.store.create(pending).await.unwrap();

        let report = fx.handler.apply_rollback(&rollback()).await.unwrap();
        assert_eq!(report, RollbackReport::default());
        let collector = fx.directory.get("c1").await.unwrap().unwrap();
        assert_eq!(collector.tasks_on(date()), 1);
    }

    /// Lets another handler schedule the collection on `c1` right after the
    /// first read of it, the way a redelivered payment event can.
    struct SchedulesAfterRead {
        inner: Arc<InMemoryCollectionStore>,
        fired: AtomicBool,
    }

    #[async_trait]
    impl CollectionStore for SchedulesAfterRead {
        async fn create(&self, collection: Collection) -> Result<CreateOutcome> {
            self.inner.create(collection).await
        }
        async fn get(&self, collection_id: &str) -> Result<Option<Collection>> {
            let read = self.inner.get(collection_id).await?;
            if let Some(current) = &read
                && !self.fired.swap(true, Ordering::SeqCst)
            {
                let mut scheduled = current.clone();
                scheduled.assign("c1")?;
                assert!(
                    self.inner
                        .replace_if_status(scheduled, CollectionStatus::Pending)
                        .await?
                );
            }
            Ok(read)
        }
        async fn find_by_payment(&self, payment_id: &str) -> Result<Option<Collection>> {
            self.inner.find_by_payment(payment_id).await
        }
        async fn find_by_status(&self, status: CollectionStatus) -> Result<Vec<Collection>> {
            self.inner.find_by_status(status).await
        }
        async fn all(&self) -> Result<Vec<Collection>> {
            self.inner.all().await
        }
        async fn replace_if_status(
            &self,
            collection: Collection,
            expected: CollectionStatus,
        ) -> Result<bool> {
            self.inner.replace_if_status(collection, expected).await
        }
    }

    #[tokio::test]
    async fn test_rollback_racing_a_schedule_keeps_the_slot_counted() {
        let fx = fixture().await;
        let mut pending = collection(CollectionStatus::Pending, "c1");
        pending.collector_id = None;
        fx.store.create(pending).await.unwrap();
        let racing = Arc::new(SchedulesAfterRead {
            inner: fx.store.clone(),
            fired: AtomicBool::new(false),
        });
        let handler = CompensationHandler::new(
            fx.directory.clone(),
            racing,
            Arc::new(InMemoryPaymentGateway::new()),
            fx.wallet.clone(),
        );

        let report = handler
            .apply_rollback(&Rollback {
                payment_id: None,
                user_id: None,
                ..rollback()
            })
            .await
            .unwrap();
        assert!(!report.reverted);

        let current = fx.store.get("col-1").await.unwrap().unwrap();
        assert_eq!(current.status, CollectionStatus::Scheduled);
        assert_eq!(current.collector_id.as_deref(), Some("c1"));
        let collector = fx.directory.get("c1").await.unwrap().unwrap();
        assert_eq!(collector.tasks_on(date()), 1);
        assert_eq!(collector.assigned_tasks, vec!["col-1".to_string()]);
    }
}
