use crate::config::Config;
use crate::domain::collection::{
    Collection, CollectionStatus, Completion, LineItem, PaymentMethod, PaymentStatus, PricedItem,
};
use crate::domain::events::{
    CollectorCancellation, FinalPaymentSettled, Notification, PaymentCancellation,
    PaymentCompleted, PaymentInitiated, Rollback, SagaMessage,
};
use crate::domain::money::Money;
use crate::domain::ports::{
    CategoryCatalogRef, CollectionStoreRef, CollectorAllocatorRef, CreateOutcome, MessageBusRef,
    PaymentGatewayRef, StagingCacheRef,
};
use crate::domain::staged::{StagedCollection, staging_key};
use crate::error::{Result, SagaError};
use crate::observability::collection_span;
use chrono::{NaiveDate, Utc};
use std::time::Duration;
use tracing::{Instrument, debug, error, info, warn};

/// Compare-and-set attempts a cancellation makes before giving up on a
/// collection whose status keeps moving.
const CANCEL_CAS_ATTEMPTS: usize = 3;

/// The collaborators the saga talks to.
#[derive(Clone)]
pub struct SagaPorts {
    pub staging: StagingCacheRef,
    pub collections: CollectionStoreRef,
    pub allocator: CollectorAllocatorRef,
    pub catalog: CategoryCatalogRef,
    pub payments: PaymentGatewayRef,
    pub bus: MessageBusRef,
}

#[derive(Debug, Clone)]
pub struct SagaSettings {
    pub staging_ttl: Duration,
    pub allocation_attempts: u32,
}

impl Default for SagaSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SagaSettings {
    fn from(config: &Config) -> Self {
        Self {
            staging_ttl: config.staging_ttl,
            allocation_attempts: config.allocation_attempts,
        }
    }
}

/// A user's pickup request as submitted, before pricing.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRequest {
    pub user_id: String,
    pub items: Vec<LineItem>,
    pub service_area: String,
    pub preferred_date: NaiveDate,
}

/// What the user is asked to pay in advance.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub collection_id: String,
    pub items: Vec<PricedItem>,
    pub estimated_cost: Money,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MaterializeOutcome {
    Created(Collection),
    /// The payment was already turned into a collection; this is that one.
    Duplicate(Collection),
}

impl MaterializeOutcome {
    pub fn collection(&self) -> &Collection {
        match self {
            MaterializeOutcome::Created(c) | MaterializeOutcome::Duplicate(c) => c,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, MaterializeOutcome::Created(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled { collector_id: String },
    AlreadyScheduled { collector_id: String },
    /// Nobody can take the pickup right now; the collection stays pending.
    Deferred,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentCompletedOutcome {
    pub collection_id: String,
    pub created: bool,
    /// `None` when the collection was no longer pending.
    pub schedule: Option<ScheduleOutcome>,
}

/// Evidence submitted by the collector when closing a pickup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionReport {
    pub proofs: Vec<String>,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Completed(Collection),
    /// Completed earlier; the settlement was published again.
    AlreadyCompleted(Collection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// `compensations` counts the side effects handed over for undoing.
    Cancelled { compensations: usize },
    AlreadyCancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub scheduled: usize,
    pub deferred: usize,
    pub failed: usize,
    /// Expired staged drafts dropped from the cache.
    pub purged: usize,
}

/// Drives a collection from priced draft to a terminal state.
///
/// Every transition re-reads the persisted status and commits through
/// `replace_if_status`, so concurrent handlers working on the same collection
/// resolve to one winner and the loser observes `InvalidTransition`.
pub struct CollectionSaga {
    ports: SagaPorts,
    settings: SagaSettings,
}

impl CollectionSaga {
    pub fn new(ports: SagaPorts, settings: SagaSettings) -> Self {
        Self { ports, settings }
    }

    pub fn bus(&self) -> &MessageBusRef {
        &self.ports.bus
    }

    /// Prices the request against the category catalog and stages the draft
    /// under the user's key. Nothing is staged if any line is invalid.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn validate_and_price(&self, request: CollectionRequest) -> Result<PriceQuote> {
        if request.user_id.trim().is_empty() {
            return Err(SagaError::Validation("user id is required".to_string()));
        }
        if request.service_area.trim().is_empty() {
            return Err(SagaError::Validation("service area is required".to_string()));
        }
        if request.items.is_empty() {
            return Err(SagaError::Validation(
                "a collection needs at least one item".to_string(),
            ));
        }

        let mut priced = Vec::with_capacity(request.items.len());
        for item in &request.items {
            if item.qty == 0 {
                return Err(SagaError::Validation(format!(
                    "quantity for category {} must be positive",
                    item.category_id
                )));
            }
            let category = self
                .ports
                .catalog
                .resolve(&item.category_id)
                .await?
                .ok_or_else(|| SagaError::UnknownCategory(item.category_id.clone()))?;
            priced.push(PricedItem::new(
                item.category_id.clone(),
                item.qty,
                category.rate,
            ));
        }
        let estimated_cost: Money = priced.iter().map(|item| item.subtotal).sum();

        let staged = StagedCollection {
            collection_id: uuid::Uuid::new_v4().to_string(),
            user_id: request.user_id,
            items: priced,
            estimated_cost,
            service_area: request.service_area,
            preferred_date: request.preferred_date,
            payment_id: None,
            staged_at: Utc::now(),
        };
        self.stage(&staged).await?;

        info!(
            collection_id = %staged.collection_id,
            %estimated_cost,
            "Collection priced and staged"
        );
        Ok(PriceQuote {
            collection_id: staged.collection_id,
            items: staged.items,
            estimated_cost,
        })
    }

    /// Ties the draft to its payment and restarts the TTL for the payment window.
    #[tracing::instrument(skip(self, event), fields(user_id = %event.user_id, payment_id = %event.payment_id))]
    pub async fn on_payment_initiated(&self, event: &PaymentInitiated) -> Result<()> {
        let mut staged = self
            .read_staged(&event.user_id)
            .await?
            .ok_or_else(|| SagaError::StagedMissing(event.user_id.clone()))?;
        if staged.estimated_cost != event.amount {
            warn!(
                expected = %staged.estimated_cost,
                initiated = %event.amount,
                "Initiated payment amount differs from the quoted price"
            );
        }
        staged.payment_id = Some(event.payment_id.clone());
        self.stage(&staged).await?;
        debug!(collection_id = %staged.collection_id, "Staged collection refreshed");
        Ok(())
    }

    /// Promotes the user's staged draft to a persisted, paid, pending
    /// collection. Repeated payment events resolve to the collection created
    /// the first time, whatever its status is now.
    #[tracing::instrument(skip(self))]
    pub async fn materialize(&self, user_id: &str, payment_id: &str) -> Result<MaterializeOutcome> {
        if let Some(existing) = self.ports.collections.find_by_payment(payment_id).await? {
            debug!(collection_id = %existing.collection_id, "Payment already materialized");
            return Ok(MaterializeOutcome::Duplicate(existing));
        }

        let Some(staged) = self.read_staged(user_id).await? else {
            // A concurrent delivery may have created it and dropped the draft meanwhile.
            if let Some(existing) = self.ports.collections.find_by_payment(payment_id).await? {
                return Ok(MaterializeOutcome::Duplicate(existing));
            }
            return Err(SagaError::StagedMissing(user_id.to_string()));
        };
        if let Some(initiated) = &staged.payment_id
            && initiated != payment_id
        {
            // The captured payment wins over whichever attempt was initiated last.
            warn!(initiated = %initiated, "Draft was initiated under another payment");
        }
        if let Some(existing) = self.ports.collections.get(&staged.collection_id).await? {
            return Ok(MaterializeOutcome::Duplicate(existing));
        }

        let now = Utc::now();
        let collection = Collection {
            collection_id: staged.collection_id,
            user_id: staged.user_id,
            items: staged.items,
            estimated_cost: staged.estimated_cost,
            service_area: staged.service_area,
            preferred_date: staged.preferred_date,
            payment_id: payment_id.to_string(),
            payment_status: PaymentStatus::Paid,
            collector_id: None,
            status: CollectionStatus::Pending,
            cancellation_reason: None,
            compensated: false,
            completion: None,
            created_at: now,
            updated_at: now,
        };

        let outcome = match self.ports.collections.create(collection.clone()).await? {
            CreateOutcome::Created => MaterializeOutcome::Created(collection),
            CreateOutcome::AlreadyExists(existing) => {
                return Ok(MaterializeOutcome::Duplicate(existing));
            }
        };

        if let Err(e) = self.ports.staging.delete(&staging_key(user_id)).await {
            warn!(error = %e, "Failed to delete staged collection; it will expire on its own");
        }
        info!(
            collection_id = %outcome.collection().collection_id,
            "Collection created from staged draft"
        );
        Ok(outcome)
    }

    /// Materializes the paid collection and schedules it if it is still
    /// pending, which also covers a crash between the two steps.
    #[tracing::instrument(skip(self, event), fields(user_id = %event.user_id, payment_id = %event.payment_id))]
    pub async fn on_payment_completed(
        &self,
        event: &PaymentCompleted,
    ) -> Result<PaymentCompletedOutcome> {
        let outcome = self.materialize(&event.user_id, &event.payment_id).await?;
        let collection = outcome.collection();
        if let Some(amount) = event.amount
            && amount != collection.estimated_cost
        {
            warn!(
                collection_id = %collection.collection_id,
                expected = %collection.estimated_cost,
                paid = %amount,
                "Paid amount differs from the quoted price"
            );
        }

        let schedule = if collection.status == CollectionStatus::Pending {
            Some(
                self.schedule(
                    &collection.collection_id,
                    &collection.user_id,
                    &collection.service_area,
                    collection.preferred_date,
                )
                .await?,
            )
        } else {
            None
        };

        Ok(PaymentCompletedOutcome {
            collection_id: collection.collection_id.clone(),
            created: outcome.is_created(),
            schedule,
        })
    }

    /// Assigns the best eligible collector and moves the collection to
    /// `scheduled`. Having no eligible collector is not an error: the
    /// collection stays pending for the sweep.
    #[tracing::instrument(skip(self, user_id))]
    pub async fn schedule(
        &self,
        collection_id: &str,
        user_id: &str,
        service_area: &str,
        preferred_date: NaiveDate,
    ) -> Result<ScheduleOutcome> {
        let collection = self.load(collection_id).await?;
        match collection.status {
            CollectionStatus::Pending => {}
            CollectionStatus::Scheduled => {
                return Ok(ScheduleOutcome::AlreadyScheduled {
                    collector_id: collection.collector_id.unwrap_or_default(),
                });
            }
            from => {
                return Err(SagaError::InvalidTransition {
                    collection_id: collection_id.to_string(),
                    from,
                    to: CollectionStatus::Scheduled,
                });
            }
        }

        // A previous attempt may have committed the slot and died before the update.
        let held = self
            .ports
            .allocator
            .assigned_collector(service_area, collection_id)
            .await?;
        let collector_id = match held {
            Some(collector) => collector.collector_id,
            None => match self
                .allocate(collection_id, service_area, preferred_date)
                .await?
            {
                Some(collector_id) => collector_id,
                None => {
                    warn!(service_area, %preferred_date, "No eligible collector, collection stays pending");
                    return Ok(ScheduleOutcome::Deferred);
                }
            },
        };

        let mut updated = collection;
        updated.assign(&collector_id)?;

        match self
            .ports
            .collections
            .replace_if_status(updated, CollectionStatus::Pending)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                let current = self.load(collection_id).await?;
                if current.status == CollectionStatus::Scheduled
                    && current.collector_id.as_deref() == Some(collector_id.as_str())
                {
                    return Ok(ScheduleOutcome::AlreadyScheduled { collector_id });
                }
                // Scheduled elsewhere or terminal: this slot can never be used.
                warn!(status = %current.status, "Collection changed while scheduling, releasing collector");
                self.publish_rollback(&Rollback {
                    collection_id: collection_id.to_string(),
                    collector_id: Some(collector_id.clone()),
                    payment_id: None,
                    user_id: None,
                    date: Some(preferred_date),
                })
                .await?;
                return Err(SagaError::InvalidTransition {
                    collection_id: collection_id.to_string(),
                    from: current.status,
                    to: CollectionStatus::Scheduled,
                });
            }
            Err(e) => {
                error!(error = %e, collector_id = %collector_id, "Failed to persist assignment");
                // Rollback keeps the slot while the collection is pending, so a
                // retry reuses it. Its own publish failure is already logged.
                let _ = self
                    .publish_rollback(&Rollback {
                        collection_id: collection_id.to_string(),
                        collector_id: Some(collector_id.clone()),
                        payment_id: None,
                        user_id: None,
                        date: Some(preferred_date),
                    })
                    .await;
                return Err(e);
            }
        }

        info!(collector_id = %collector_id, "Collection scheduled");
        self.notify(Notification {
            user_id: user_id.to_string(),
            title: "Pickup scheduled".to_string(),
            message: format!("A collector will pick up your scrap on {preferred_date}."),
            url: collection_url(collection_id),
        })
        .await;
        Ok(ScheduleOutcome::Scheduled { collector_id })
    }

    /// Picks and commits a collector, moving on to the next best whenever the
    /// chosen one fills up between the read and the commit.
    async fn allocate(
        &self,
        collection_id: &str,
        service_area: &str,
        date: NaiveDate,
    ) -> Result<Option<String>> {
        for attempt in 1..=self.settings.allocation_attempts {
            let Some(candidate) = self
                .ports
                .allocator
                .get_available_collector(service_area, date)
                .await?
            else {
                return Ok(None);
            };
            match self
                .ports
                .allocator
                .assign_collection(&candidate.collector_id, collection_id, date)
                .await
            {
                Ok(_) => return Ok(Some(candidate.collector_id)),
                Err(e) if e.is_capacity() => {
                    warn!(
                        attempt,
                        collector_id = %candidate.collector_id,
                        "Collector filled up before commit, trying the next best"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Completes a pickup paid in cash. The amount reported by the collector
    /// is trusted as the final payment.
    #[tracing::instrument(skip(self, report))]
    pub async fn complete_with_cash_payment(
        &self,
        collection_id: &str,
        report: CompletionReport,
        amount: Money,
    ) -> Result<CompletionOutcome> {
        if amount < Money::ZERO {
            return Err(SagaError::Validation(
                "cash amount cannot be negative".to_string(),
            ));
        }
        let collection = self.load(collection_id).await?;
        if let Some(done) = self.resettle_if_completed(&collection).await? {
            return Ok(done);
        }
        self.finish(collection, report, PaymentMethod::Cash, amount, None)
            .await
    }

    /// Completes a pickup whose final payment went through the payment
    /// service. The payment must already be settled.
    #[tracing::instrument(skip(self, report))]
    pub async fn complete_with_digital_payment(
        &self,
        collection_id: &str,
        report: CompletionReport,
        payment_id: &str,
    ) -> Result<CompletionOutcome> {
        let collection = self.load(collection_id).await?;
        if let Some(done) = self.resettle_if_completed(&collection).await? {
            return Ok(done);
        }

        let payment = self
            .ports
            .payments
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| SagaError::PaymentNotFound(payment_id.to_string()))?;
        if !payment.is_settled() {
            return Err(SagaError::PaymentNotSettled {
                payment_id: payment_id.to_string(),
                status: payment.status.to_string(),
            });
        }
        self.finish(
            collection,
            report,
            PaymentMethod::Digital,
            payment.amount,
            Some(payment_id.to_string()),
        )
        .await
    }

    async fn resettle_if_completed(
        &self,
        collection: &Collection,
    ) -> Result<Option<CompletionOutcome>> {
        if collection.status != CollectionStatus::Completed {
            return Ok(None);
        }
        if let Some(settlement) = settlement_for(collection) {
            debug!("Collection already completed, publishing settlement again");
            self.publish(&settlement).await?;
        }
        Ok(Some(CompletionOutcome::AlreadyCompleted(collection.clone())))
    }

    async fn finish(
        &self,
        collection: Collection,
        report: CompletionReport,
        method: PaymentMethod,
        amount: Money,
        payment_id: Option<String>,
    ) -> Result<CompletionOutcome> {
        let collection_id = collection.collection_id.clone();
        let mut updated = collection;
        updated.complete(Completion {
            proofs: report.proofs,
            feedback: report.feedback,
            method,
            amount,
            payment_id,
            completed_at: Utc::now(),
        })?;

        if !self
            .ports
            .collections
            .replace_if_status(updated.clone(), CollectionStatus::Scheduled)
            .await?
        {
            let current = self.load(&collection_id).await?;
            warn!(status = %current.status, "Collection changed before completion could commit");
            return Err(SagaError::InvalidTransition {
                collection_id,
                from: current.status,
                to: CollectionStatus::Completed,
            });
        }
        info!(%method, %amount, "Collection completed");

        if let Some(settlement) = settlement_for(&updated) {
            self.publish(&settlement).await?;
        }
        self.notify(Notification {
            user_id: updated.user_id.clone(),
            title: "Pickup completed".to_string(),
            message: format!("Your pickup was completed. Final amount: {amount}."),
            url: collection_url(&collection_id),
        })
        .await;
        Ok(CompletionOutcome::Completed(updated))
    }

    /// Cancels a pending or scheduled collection and hands its side effects
    /// (collector slot, advance payment) to the compensation consumers.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, collection_id: &str, reason: &str) -> Result<CancelOutcome> {
        for _ in 0..CANCEL_CAS_ATTEMPTS {
            let collection = self.load(collection_id).await?;
            match collection.status {
                CollectionStatus::Cancelled if collection.compensated => {
                    return Ok(CancelOutcome::AlreadyCancelled);
                }
                CollectionStatus::Cancelled => {
                    warn!("Cancelled collection was never compensated, compensating now");
                    let compensations = self.compensate(&collection).await?;
                    self.mark_compensated(collection).await?;
                    return Ok(CancelOutcome::Cancelled { compensations });
                }
                CollectionStatus::Completed => {
                    return Err(SagaError::InvalidTransition {
                        collection_id: collection_id.to_string(),
                        from: CollectionStatus::Completed,
                        to: CollectionStatus::Cancelled,
                    });
                }
                expected @ (CollectionStatus::Pending | CollectionStatus::Scheduled) => {
                    let mut updated = collection;
                    updated.cancel(reason)?;
                    if !self
                        .ports
                        .collections
                        .replace_if_status(updated.clone(), expected)
                        .await?
                    {
                        debug!(from = %expected, "Status moved under cancellation, retrying");
                        continue;
                    }
                    info!(from = %expected, "Collection cancelled");

                    let compensations = self.compensate(&updated).await?;
                    let user_id = updated.user_id.clone();
                    self.mark_compensated(updated).await?;
                    self.notify(Notification {
                        user_id,
                        title: "Pickup cancelled".to_string(),
                        message: format!("Your pickup was cancelled: {reason}"),
                        url: collection_url(collection_id),
                    })
                    .await;
                    return Ok(CancelOutcome::Cancelled { compensations });
                }
            }
        }
        Err(SagaError::Unavailable(format!(
            "collection {collection_id} kept changing during cancellation"
        )))
    }

    /// Publishes one compensating event per attached side effect. If any of
    /// them cannot be published, a rollback naming all of them goes out
    /// instead; if that fails too the caller gets `Compensation`.
    ///
    /// Besides the recorded collector, any collector still holding a slot for
    /// the collection is released: a schedule attempt may have committed one
    /// and died before recording it.
    async fn compensate(&self, collection: &Collection) -> Result<usize> {
        let mut collectors: Vec<String> = collection.collector_id.iter().cloned().collect();
        if let Some(holder) = self
            .ports
            .allocator
            .assigned_collector(&collection.service_area, &collection.collection_id)
            .await?
            && !collectors.contains(&holder.collector_id)
        {
            warn!(collector_id = %holder.collector_id, "Releasing a slot the collection never recorded");
            collectors.push(holder.collector_id);
        }

        let mut compensations = 0;
        let mut failed = false;

        for collector_id in &collectors {
            compensations += 1;
            let event = CollectorCancellation {
                collection_id: collection.collection_id.clone(),
                collector_id: collector_id.clone(),
                date: collection.preferred_date,
            };
            if let Err(e) = self.publish(&event).await {
                error!(error = %e, collector_id = %collector_id, "Failed to publish collector cancellation");
                failed = true;
            }
        }

        let paid = collection.payment_status == PaymentStatus::Paid;
        if paid {
            compensations += 1;
            let event = PaymentCancellation {
                collection_id: collection.collection_id.clone(),
                user_id: collection.user_id.clone(),
                payment_id: collection.payment_id.clone(),
            };
            if let Err(e) = self.publish(&event).await {
                error!(error = %e, payment_id = %collection.payment_id, "Failed to publish payment cancellation");
                failed = true;
            }
        }

        if failed {
            // A rollback names one collector, so extra holders get their own.
            let mut holders = collectors.into_iter();
            self.publish_rollback(&Rollback {
                collection_id: collection.collection_id.clone(),
                collector_id: holders.next(),
                payment_id: paid.then(|| collection.payment_id.clone()),
                user_id: Some(collection.user_id.clone()),
                date: Some(collection.preferred_date),
            })
            .await?;
            for collector_id in holders {
                self.publish_rollback(&Rollback {
                    collection_id: collection.collection_id.clone(),
                    collector_id: Some(collector_id),
                    payment_id: None,
                    user_id: None,
                    date: Some(collection.preferred_date),
                })
                .await?;
            }
        }
        Ok(compensations)
    }

    async fn mark_compensated(&self, mut collection: Collection) -> Result<()> {
        collection.compensated = true;
        if !self
            .ports
            .collections
            .replace_if_status(collection, CollectionStatus::Cancelled)
            .await?
        {
            warn!("Cancelled collection changed status before it was marked compensated");
        }
        Ok(())
    }

    /// Retries scheduling for every collection still waiting for a collector
    /// and drops expired drafts from the staging cache.
    pub async fn sweep_pending(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        match self.ports.staging.purge_expired().await {
            Ok(purged) => report.purged = purged,
            Err(e) => warn!(error = %e, "Could not purge expired drafts"),
        }

        let pending = self
            .ports
            .collections
            .find_by_status(CollectionStatus::Pending)
            .await?;

        for collection in pending {
            report.attempted += 1;
            let result = self
                .schedule(
                    &collection.collection_id,
                    &collection.user_id,
                    &collection.service_area,
                    collection.preferred_date,
                )
                .instrument(collection_span("sweep", &collection.collection_id))
                .await;
            match result {
                Ok(ScheduleOutcome::Scheduled { .. } | ScheduleOutcome::AlreadyScheduled { .. }) => {
                    report.scheduled += 1;
                }
                Ok(ScheduleOutcome::Deferred) => report.deferred += 1,
                Err(e) => {
                    warn!(collection_id = %collection.collection_id, error = %e, "Sweep could not schedule collection");
                    report.failed += 1;
                }
            }
        }

        if report.attempted > 0 || report.purged > 0 {
            info!(
                purged = report.purged,
                attempted = report.attempted,
                scheduled = report.scheduled,
                deferred = report.deferred,
                failed = report.failed,
                "Pending sweep finished"
            );
        }
        Ok(report)
    }

    /// Current state of a collection.
    pub async fn collection(&self, collection_id: &str) -> Result<Collection> {
        self.load(collection_id).await
    }

    async fn load(&self, collection_id: &str) -> Result<Collection> {
        self.ports
            .collections
            .get(collection_id)
            .await?
            .ok_or_else(|| SagaError::CollectionNotFound(collection_id.to_string()))
    }

    async fn stage(&self, staged: &StagedCollection) -> Result<()> {
        self.ports
            .staging
            .set(
                &staging_key(&staged.user_id),
                serde_json::to_string(staged)?,
                self.settings.staging_ttl,
            )
            .await
    }

    async fn read_staged(&self, user_id: &str) -> Result<Option<StagedCollection>> {
        match self.ports.staging.get(&staging_key(user_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn publish<M: SagaMessage>(&self, message: &M) -> Result<()> {
        self.ports.bus.publish(M::QUEUE, message.encode()?).await
    }

    async fn publish_rollback(&self, rollback: &Rollback) -> Result<()> {
        self.publish(rollback).await.map_err(|e| {
            error!(
                collection_id = %rollback.collection_id,
                error = %e,
                "Failed to publish rollback"
            );
            SagaError::Compensation(format!(
                "rollback for collection {} not published: {e}",
                rollback.collection_id
            ))
        })
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.publish(&notification).await {
            warn!(user_id = %notification.user_id, error = %e, "Notification dropped");
        }
    }
}

fn collection_url(collection_id: &str) -> String {
    format!("/collections/{collection_id}")
}

fn settlement_for(collection: &Collection) -> Option<FinalPaymentSettled> {
    let completion = collection.completion.as_ref()?;
    Some(FinalPaymentSettled {
        collection_id: collection.collection_id.clone(),
        user_id: collection.user_id.clone(),
        collector_id: collection.collector_id.clone()?,
        payment_id: completion.payment_id.clone(),
        amount: completion.amount,
        method: completion.method,
    })
}
