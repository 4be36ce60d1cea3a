use super::money::{Money, Rate};
use crate::error::SagaError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted lifecycle status of a collection.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Pending,
    Scheduled,
    Cancelled,
    Completed,
}

impl CollectionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CollectionStatus::Cancelled | CollectionStatus::Completed)
    }

    /// The only edges of the lifecycle graph.
    pub fn can_transition_to(&self, next: CollectionStatus) -> bool {
        matches!(
            (self, next),
            (CollectionStatus::Pending, CollectionStatus::Scheduled)
                | (CollectionStatus::Pending, CollectionStatus::Cancelled)
                | (CollectionStatus::Scheduled, CollectionStatus::Completed)
                | (CollectionStatus::Scheduled, CollectionStatus::Cancelled)
        )
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollectionStatus::Pending => "pending",
            CollectionStatus::Scheduled => "scheduled",
            CollectionStatus::Cancelled => "cancelled",
            CollectionStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Status of the advance payment that created the collection.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Digital,
    /// Advance drawn from the user's wallet balance.
    Wallet,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Cash => f.write_str("cash"),
            PaymentMethod::Digital => f.write_str("digital"),
            PaymentMethod::Wallet => f.write_str("wallet"),
        }
    }
}

/// A requested line item before pricing.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub category_id: String,
    pub qty: u32,
}

/// A line item with its rate frozen at validation time.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PricedItem {
    pub category_id: String,
    pub qty: u32,
    pub rate: Rate,
    pub subtotal: Money,
}

impl PricedItem {
    pub fn new(category_id: String, qty: u32, rate: Rate) -> Self {
        Self {
            subtotal: rate.price(qty),
            category_id,
            qty,
            rate,
        }
    }
}

/// Evidence and settlement data recorded when a pickup is completed.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub proofs: Vec<String>,
    pub feedback: Option<String>,
    pub method: PaymentMethod,
    pub amount: Money,
    pub payment_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// One pickup request, from payment confirmation to a terminal state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub collection_id: String,
    pub user_id: String,
    pub items: Vec<PricedItem>,
    pub estimated_cost: Money,
    pub service_area: String,
    pub preferred_date: NaiveDate,
    pub payment_id: String,
    pub payment_status: PaymentStatus,
    pub collector_id: Option<String>,
    pub status: CollectionStatus,
    pub cancellation_reason: Option<String>,
    /// Set once the compensations of a cancellation have been handed to the bus.
    #[serde(default)]
    pub compensated: bool,
    pub completion: Option<Completion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    fn ensure_transition(&self, next: CollectionStatus) -> Result<(), SagaError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(SagaError::InvalidTransition {
                collection_id: self.collection_id.clone(),
                from: self.status,
                to: next,
            })
        }
    }

    /// pending -> scheduled with the given collector.
    pub fn assign(&mut self, collector_id: &str) -> Result<(), SagaError> {
        self.ensure_transition(CollectionStatus::Scheduled)?;
        self.collector_id = Some(collector_id.to_string());
        self.status = CollectionStatus::Scheduled;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// scheduled -> completed.
    pub fn complete(&mut self, completion: Completion) -> Result<(), SagaError> {
        self.ensure_transition(CollectionStatus::Completed)?;
        self.completion = Some(completion);
        self.status = CollectionStatus::Completed;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// pending|scheduled -> cancelled. The collector id is kept so the
    /// compensation knows whose task count to revert.
    pub fn cancel(&mut self, reason: &str) -> Result<(), SagaError> {
        self.ensure_transition(CollectionStatus::Cancelled)?;
        self.cancellation_reason = Some(reason.to_string());
        self.status = CollectionStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending_collection() -> Collection {
        let rate = Rate::new(dec!(30)).unwrap();
        let now = Utc::now();
        Collection {
            collection_id: "col-1".to_string(),
            user_id: "u1".to_string(),
            items: vec![PricedItem::new("A".to_string(), 2, rate)],
            estimated_cost: Money::new(dec!(60)),
            service_area: "north".to_string(),
            preferred_date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            payment_id: "p1".to_string(),
            payment_status: PaymentStatus::Paid,
            collector_id: None,
            status: CollectionStatus::Pending,
            cancellation_reason: None,
            compensated: false,
            completion: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn cash_completion() -> Completion {
        Completion {
            proofs: vec!["photo-1".to_string()],
            feedback: None,
            method: PaymentMethod::Cash,
            amount: Money::new(dec!(60)),
            payment_id: None,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_priced_item_subtotal() {
        let item = PricedItem::new("A".to_string(), 2, Rate::new(dec!(30)).unwrap());
        assert_eq!(item.subtotal, Money::new(dec!(60)));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut collection = pending_collection();
        collection.assign("c1").unwrap();
        assert_eq!(collection.status, CollectionStatus::Scheduled);
        assert_eq!(collection.collector_id.as_deref(), Some("c1"));

        collection.complete(cash_completion()).unwrap();
        assert_eq!(collection.status, CollectionStatus::Completed);
    }

    #[test]
    fn test_cannot_complete_pending() {
        let mut collection = pending_collection();
        let result = collection.complete(cash_completion());
        assert!(matches!(
            result,
            Err(SagaError::InvalidTransition {
                from: CollectionStatus::Pending,
                to: CollectionStatus::Completed,
                ..
            })
        ));
        assert_eq!(collection.status, CollectionStatus::Pending);
    }

    #[test]
    fn test_cancellation_is_terminal() {
        let mut collection = pending_collection();
        collection.cancel("changed my mind").unwrap();
        assert_eq!(collection.status, CollectionStatus::Cancelled);
        assert_eq!(
            collection.cancellation_reason.as_deref(),
            Some("changed my mind")
        );

        assert!(collection.assign("c1").is_err());
        assert!(collection.cancel("again").is_err());
    }

    #[test]
    fn test_completed_cannot_be_cancelled() {
        let mut collection = pending_collection();
        collection.assign("c1").unwrap();
        collection.complete(cash_completion()).unwrap();
        assert!(collection.cancel("too late").is_err());
    }

    #[test]
    fn test_serializes_with_camel_case_and_lowercase_status() {
        let json = serde_json::to_value(pending_collection()).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["paymentStatus"], "paid");
        assert_eq!(json["estimatedCost"], "60");
        assert_eq!(json["preferredDate"], "2026-10-20");
    }
}
