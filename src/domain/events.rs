//! Messages exchanged between the saga participants, one type per queue.

use super::collection::PaymentMethod;
use super::money::Money;
use crate::error::{Result, SagaError};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const PAYMENT_INITIATED: &str = "payment.initiated";
pub const PAYMENT_COMPLETED: &str = "payment.completed";
pub const FINAL_PAYMENT: &str = "collection.finalPayment";
pub const CANCELLED_PAYMENT: &str = "collection.cancelled.payment";
pub const CANCELLED_COLLECTOR: &str = "collection.cancelled.collector";
pub const ROLLBACK: &str = "rollback.cancellation";
pub const NOTIFICATION: &str = "notification";

/// A payload bound to the queue it travels on.
pub trait SagaMessage: Serialize + DeserializeOwned + Send + Sync {
    const QUEUE: &'static str;

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decoding failures are permanent: the same bytes will never parse.
    fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| SagaError::MalformedMessage {
            queue: Self::QUEUE.to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiated {
    pub user_id: String,
    pub payment_id: String,
    pub amount: Money,
}

impl SagaMessage for PaymentInitiated {
    const QUEUE: &'static str = PAYMENT_INITIATED;
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompleted {
    pub user_id: String,
    pub payment_id: String,
    #[serde(default)]
    pub amount: Option<Money>,
}

impl SagaMessage for PaymentCompleted {
    const QUEUE: &'static str = PAYMENT_COMPLETED;
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FinalPaymentSettled {
    pub collection_id: String,
    pub user_id: String,
    pub collector_id: String,
    pub payment_id: Option<String>,
    pub amount: Money,
    pub method: PaymentMethod,
}

impl SagaMessage for FinalPaymentSettled {
    const QUEUE: &'static str = FINAL_PAYMENT;
}

/// Asks the payment side to refund the advance of a cancelled collection.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCancellation {
    pub collection_id: String,
    pub user_id: String,
    pub payment_id: String,
}

impl SagaMessage for PaymentCancellation {
    const QUEUE: &'static str = CANCELLED_PAYMENT;
}

/// Asks the collector side to release the task of a cancelled collection.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CollectorCancellation {
    pub collection_id: String,
    pub collector_id: String,
    pub date: NaiveDate,
}

impl SagaMessage for CollectorCancellation {
    const QUEUE: &'static str = CANCELLED_COLLECTOR;
}

/// Undo whatever side effects are named, for a collection whose saga step
/// failed after committing them.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Rollback {
    pub collection_id: String,
    #[serde(default)]
    pub collector_id: Option<String>,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl SagaMessage for Rollback {
    const QUEUE: &'static str = ROLLBACK;
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub url: String,
}

impl SagaMessage for Notification {
    const QUEUE: &'static str = NOTIFICATION;
}
