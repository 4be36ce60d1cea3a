//! Queue consumers and the runtime that hosts them.
//!
//! Each consumed queue gets a pool of worker tasks. A worker acks a delivery
//! only after its handler returned, and maps handler failures onto the bus
//! through [`SagaError::disposition`]. A ticker re-runs the pending sweep.

use super::compensation::CompensationHandler;
use super::orchestrator::CollectionSaga;
use crate::config::Config;
use crate::domain::events::{
    CollectorCancellation, Notification, PaymentCancellation, PaymentCompleted, PaymentInitiated,
    Rollback, SagaMessage,
};
use crate::domain::ports::{Delivery, MessageBus, MessageBusRef};
use crate::error::{Disposition, Result, SagaError};
use crate::observability::delivery_span;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Consecutive empty polls `wait_idle` needs before it trusts the bus is quiet.
const IDLE_CONFIRMATIONS: u32 = 2;
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Handles the payloads of one queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn queue(&self) -> &'static str;
    async fn handle(&self, payload: &[u8]) -> Result<()>;
}

pub struct PaymentInitiatedHandler(pub Arc<CollectionSaga>);

#[async_trait]
impl MessageHandler for PaymentInitiatedHandler {
    fn queue(&self) -> &'static str {
        PaymentInitiated::QUEUE
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        self.0
            .on_payment_initiated(&PaymentInitiated::decode(payload)?)
            .await
    }
}

pub struct PaymentCompletedHandler(pub Arc<CollectionSaga>);

#[async_trait]
impl MessageHandler for PaymentCompletedHandler {
    fn queue(&self) -> &'static str {
        PaymentCompleted::QUEUE
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        self.0
            .on_payment_completed(&PaymentCompleted::decode(payload)?)
            .await
            .map(|_| ())
    }
}

pub struct CollectorCancellationHandler(pub Arc<CompensationHandler>);

#[async_trait]
impl MessageHandler for CollectorCancellationHandler {
    fn queue(&self) -> &'static str {
        CollectorCancellation::QUEUE
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        self.0
            .revert_collector(&CollectorCancellation::decode(payload)?)
            .await
            .map(|_| ())
    }
}

pub struct PaymentCancellationHandler(pub Arc<CompensationHandler>);

#[async_trait]
impl MessageHandler for PaymentCancellationHandler {
    fn queue(&self) -> &'static str {
        PaymentCancellation::QUEUE
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        self.0
            .refund_payment(&PaymentCancellation::decode(payload)?)
            .await
            .map(|_| ())
    }
}

pub struct RollbackHandler(pub Arc<CompensationHandler>);

#[async_trait]
impl MessageHandler for RollbackHandler {
    fn queue(&self) -> &'static str {
        Rollback::QUEUE
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        self.0
            .apply_rollback(&Rollback::decode(payload)?)
            .await
            .map(|_| ())
    }
}

/// Delivers notifications to the log. Stands in for the push/email service.
pub struct NotificationLogger;

#[async_trait]
impl MessageHandler for NotificationLogger {
    fn queue(&self) -> &'static str {
        Notification::QUEUE
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let notification = Notification::decode(payload)?;
        info!(
            user_id = %notification.user_id,
            title = %notification.title,
            url = %notification.url,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Runs `handler` on one delivery and settles it with the broker.
pub async fn dispatch(bus: &dyn MessageBus, handler: &dyn MessageHandler, delivery: Delivery) {
    let settled = match handler.handle(&delivery.envelope.payload).await {
        Ok(()) => bus.ack(&delivery).await,
        Err(e) => settle_failure(bus, &delivery, &e).await,
    };
    if let Err(e) = settled {
        error!(error = %e, "Failed to settle delivery with the broker");
    }
}

async fn settle_failure(bus: &dyn MessageBus, delivery: &Delivery, err: &SagaError) -> Result<()> {
    match err.disposition() {
        Disposition::Ack => {
            warn!(error = %err, "Discarding message");
            bus.ack(delivery).await
        }
        Disposition::Requeue => {
            warn!(error = %err, "Handler failed, requeueing");
            bus.nack(delivery, true).await
        }
        Disposition::DeadLetter => {
            error!(error = %err, "Handler failed permanently, dead-lettering");
            bus.nack(delivery, false).await
        }
    }
}

async fn consume(
    bus: MessageBusRef,
    handler: Arc<dyn MessageHandler>,
    receive_timeout: Duration,
    shutdown: CancellationToken,
) {
    let queue = handler.queue();
    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = bus.receive(queue, receive_timeout) => received,
        };
        match received {
            Ok(Some(delivery)) => {
                let span = delivery_span(queue, &delivery.envelope.id, delivery.envelope.attempts);
                dispatch(bus.as_ref(), handler.as_ref(), delivery)
                    .instrument(span)
                    .await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(queue, error = %e, "Receive failed");
                tokio::time::sleep(receive_timeout).await;
            }
        }
    }
    debug!(queue, "Worker stopped");
}

async fn sweep_ticker(saga: Arc<CollectionSaga>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    // Skip the first immediate tick
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = saga.sweep_pending().await {
                    warn!(error = %e, "Pending sweep failed");
                }
            }
        }
    }
    debug!("Sweep ticker stopped");
}

/// Hosts the worker pools and the sweep ticker.
///
/// The runtime builds nothing itself: the saga, the compensation handler and
/// the bus are handed in, already wired to their stores.
pub struct SagaRuntime {
    bus: MessageBusRef,
    queues: Vec<&'static str>,
    tasks: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl SagaRuntime {
    /// The standard handler set: payment events into the saga, compensations
    /// into the coordinator, notifications to the log.
    pub fn handlers(
        saga: &Arc<CollectionSaga>,
        compensation: &Arc<CompensationHandler>,
    ) -> Vec<Arc<dyn MessageHandler>> {
        vec![
            Arc::new(PaymentInitiatedHandler(saga.clone())),
            Arc::new(PaymentCompletedHandler(saga.clone())),
            Arc::new(CollectorCancellationHandler(compensation.clone())),
            Arc::new(PaymentCancellationHandler(compensation.clone())),
            Arc::new(RollbackHandler(compensation.clone())),
            Arc::new(NotificationLogger),
        ]
    }

    pub fn start(
        saga: Arc<CollectionSaga>,
        compensation: Arc<CompensationHandler>,
        bus: MessageBusRef,
        config: &Config,
    ) -> Self {
        let handlers = Self::handlers(&saga, &compensation);
        Self::with_handlers(saga, handlers, bus, config)
    }

    /// Starts `workers_per_queue` consumers for each handler plus the sweep ticker.
    pub fn with_handlers(
        saga: Arc<CollectionSaga>,
        handlers: Vec<Arc<dyn MessageHandler>>,
        bus: MessageBusRef,
        config: &Config,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();
        let mut queues = Vec::new();

        for handler in handlers {
            queues.push(handler.queue());
            for _ in 0..config.workers_per_queue {
                tasks.push(tokio::spawn(consume(
                    bus.clone(),
                    handler.clone(),
                    config.receive_timeout,
                    shutdown.clone(),
                )));
            }
        }
        tasks.push(tokio::spawn(sweep_ticker(
            saga,
            config.sweep_interval,
            shutdown.clone(),
        )));

        info!(
            queues = queues.len(),
            workers_per_queue = config.workers_per_queue,
            "Saga runtime started"
        );
        Self {
            bus,
            queues,
            tasks,
            shutdown,
        }
    }

    /// Waits until every consumed queue has nothing ready, delayed or in flight.
    pub async fn wait_idle(&self) -> Result<()> {
        let mut quiet = 0;
        while quiet < IDLE_CONFIRMATIONS {
            let mut pending = 0;
            for queue in &self.queues {
                pending += self.bus.pending(queue).await?;
            }
            quiet = if pending == 0 { quiet + 1 } else { 0 };
            tokio::time::sleep(IDLE_POLL).await;
        }
        Ok(())
    }

    /// Stops receiving and waits for in-flight handlers to finish.
    pub async fn shutdown(mut self) {
        info!("Shutting down saga runtime");
        self.shutdown.cancel();

        for handle in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                error!("Saga worker task panicked: {}", e);
            }
        }
        info!("Saga runtime stopped");
    }
}
