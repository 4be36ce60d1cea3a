use super::collection::PricedItem;
use super::money::Money;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Cache key under which a user's unconfirmed draft lives.
pub fn staging_key(user_id: &str) -> String {
    format!("collection:{user_id}")
}

/// A priced collection waiting for its advance payment.
///
/// The price is frozen here and carried unchanged into the persisted
/// collection.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StagedCollection {
    pub collection_id: String,
    pub user_id: String,
    pub items: Vec<PricedItem>,
    pub estimated_cost: Money,
    pub service_area: String,
    pub preferred_date: NaiveDate,
    /// Set once the payment service reports the payment as initiated.
    #[serde(default)]
    pub payment_id: Option<String>,
    pub staged_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_key_is_per_user() {
        assert_eq!(staging_key("u1"), "collection:u1");
    }
}
