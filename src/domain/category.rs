use super::money::Rate;
use serde::{Deserialize, Serialize};

/// A scrap category and its per-unit rate.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub category_id: String,
    pub name: String,
    pub rate: Rate,
}
