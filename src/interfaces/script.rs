use crate::application::orchestrator::{CollectionRequest, CollectionSaga, CompletionReport};
use crate::domain::collection::{Collection, PaymentMethod};
use crate::domain::events::{PaymentCompleted, PaymentInitiated, SagaMessage};
use crate::domain::money::Money;
use crate::domain::payment::{PaymentRecord, PaymentRecordStatus};
use crate::domain::ports::{CollectionStoreRef, MessageBusRef, WalletServiceRef};
use crate::error::{Result, SagaError};
use crate::infrastructure::in_memory::InMemoryPaymentGateway;
use crate::interfaces::csv::command_reader::{FinalPayment, ScriptCommand};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Plays script commands against an in-process saga, standing in for the
/// user app, the payment service and the collector app.
pub struct ScriptDriver {
    saga: Arc<CollectionSaga>,
    bus: MessageBusRef,
    payments: Arc<InMemoryPaymentGateway>,
    wallet: WalletServiceRef,
    collections: CollectionStoreRef,
    /// Last quoted price per user, used when a payment row leaves `amount` empty.
    quotes: HashMap<String, Money>,
}

impl ScriptDriver {
    pub fn new(
        saga: Arc<CollectionSaga>,
        bus: MessageBusRef,
        payments: Arc<InMemoryPaymentGateway>,
        wallet: WalletServiceRef,
        collections: CollectionStoreRef,
    ) -> Self {
        Self {
            saga,
            bus,
            payments,
            wallet,
            collections,
            quotes: HashMap::new(),
        }
    }

    pub async fn apply(&mut self, command: ScriptCommand) -> Result<()> {
        match command {
            ScriptCommand::Request {
                user_id,
                items,
                service_area,
                preferred_date,
            } => {
                let quote = self
                    .saga
                    .validate_and_price(CollectionRequest {
                        user_id: user_id.clone(),
                        items,
                        service_area,
                        preferred_date,
                    })
                    .await?;
                self.quotes.insert(user_id, quote.estimated_cost);
            }
            ScriptCommand::Initiate {
                user_id,
                payment_id,
                amount,
            } => {
                let amount = self.amount_for(&user_id, amount)?;
                let event = PaymentInitiated {
                    user_id,
                    payment_id,
                    amount,
                };
                self.bus
                    .publish(PaymentInitiated::QUEUE, event.encode()?)
                    .await?;
            }
            ScriptCommand::Pay {
                user_id,
                payment_id,
                amount,
                method,
            } => {
                let amount = self.amount_for(&user_id, amount)?;
                if method == PaymentMethod::Wallet {
                    let reason = format!("advance:{payment_id}");
                    if !self.wallet.debit(&user_id, amount, &reason).await? {
                        info!(payment_id = %payment_id, "Wallet advance already debited");
                    }
                }
                self.record(&user_id, &payment_id, amount, method).await;
                let event = PaymentCompleted {
                    user_id,
                    payment_id,
                    amount: Some(amount),
                };
                self.bus
                    .publish(PaymentCompleted::QUEUE, event.encode()?)
                    .await?;
            }
            ScriptCommand::Settle {
                user_id,
                payment_id,
                amount,
            } => {
                self.record(&user_id, &payment_id, amount, PaymentMethod::Digital)
                    .await;
            }
            ScriptCommand::Complete {
                payment_id,
                payment,
                feedback,
            } => {
                let collection = self.by_payment(&payment_id).await?;
                let report = CompletionReport {
                    proofs: Vec::new(),
                    feedback,
                };
                let outcome = match payment {
                    FinalPayment::Cash { amount } => {
                        self.saga
                            .complete_with_cash_payment(&collection.collection_id, report, amount)
                            .await?
                    }
                    FinalPayment::Digital { payment_id } => {
                        self.saga
                            .complete_with_digital_payment(
                                &collection.collection_id,
                                report,
                                &payment_id,
                            )
                            .await?
                    }
                };
                debug!(?outcome, "Completion applied");
            }
            ScriptCommand::Cancel { payment_id, reason } => {
                let collection = self.by_payment(&payment_id).await?;
                let outcome = self.saga.cancel(&collection.collection_id, &reason).await?;
                debug!(?outcome, "Cancellation applied");
            }
            ScriptCommand::Sweep => {
                self.saga.sweep_pending().await?;
            }
        }
        Ok(())
    }

    fn amount_for(&self, user_id: &str, amount: Option<Money>) -> Result<Money> {
        amount
            .or_else(|| self.quotes.get(user_id).copied())
            .ok_or_else(|| {
                SagaError::Validation(format!("no amount given and no quote for user {user_id}"))
            })
    }

    async fn record(
        &self,
        user_id: &str,
        payment_id: &str,
        amount: Money,
        method: PaymentMethod,
    ) {
        self.payments
            .record(PaymentRecord {
                payment_id: payment_id.to_string(),
                user_id: user_id.to_string(),
                amount,
                status: PaymentRecordStatus::Success,
                method,
            })
            .await;
    }

    async fn by_payment(&self, payment_id: &str) -> Result<Collection> {
        self.collections
            .find_by_payment(payment_id)
            .await?
            .ok_or_else(|| {
                SagaError::CollectionNotFound(format!("(no collection for payment {payment_id})"))
            })
    }
}
