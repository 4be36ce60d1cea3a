use super::collection::PaymentMethod;
use super::money::Money;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRecordStatus {
    Initiated,
    Success,
    Failed,
}

impl fmt::Display for PaymentRecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentRecordStatus::Initiated => "initiated",
            PaymentRecordStatus::Success => "success",
            PaymentRecordStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A payment as reported by the payment service.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub payment_id: String,
    pub user_id: String,
    pub amount: Money,
    pub status: PaymentRecordStatus,
    pub method: PaymentMethod,
}

impl PaymentRecord {
    pub fn is_settled(&self) -> bool {
        self.status == PaymentRecordStatus::Success
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum WalletEntryKind {
    Credit,
    Debit,
}

/// One line of a user's wallet ledger. `reason` doubles as the idempotency key.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WalletEntry {
    pub user_id: String,
    pub kind: WalletEntryKind,
    pub amount: Money,
    pub reason: String,
}
