use crate::domain::category::Category;
use crate::domain::collector::{Collector, VerificationStatus};
use crate::domain::money::Rate;
use crate::error::{Result, SagaError};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;

fn csv_reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(source)
}

#[derive(Debug, Deserialize)]
struct CategoryRecord {
    category_id: String,
    name: String,
    rate: Decimal,
}

impl TryFrom<CategoryRecord> for Category {
    type Error = SagaError;

    fn try_from(record: CategoryRecord) -> Result<Self> {
        let rate = Rate::new(record.rate).map_err(|_| {
            SagaError::Validation(format!(
                "category {} has a non-positive rate {}",
                record.category_id, record.rate
            ))
        })?;
        Ok(Category {
            category_id: record.category_id,
            name: record.name,
            rate,
        })
    }
}

/// Reads `category_id,name,rate` rows.
pub struct CategoryReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CategoryReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: csv_reader(source),
        }
    }

    pub fn categories(self) -> impl Iterator<Item = Result<Category>> {
        self.reader
            .into_deserialize::<CategoryRecord>()
            .map(|result| result.map_err(SagaError::from).and_then(Category::try_from))
    }
}

#[derive(Debug, Deserialize)]
struct CollectorRecord {
    collector_id: String,
    service_area: String,
    max_capacity: u32,
    #[serde(default)]
    blocked: Option<bool>,
    #[serde(default)]
    verification: Option<VerificationStatus>,
}

impl From<CollectorRecord> for Collector {
    fn from(record: CollectorRecord) -> Self {
        Collector {
            collector_id: record.collector_id,
            service_area: record.service_area,
            max_capacity: record.max_capacity,
            daily_task_counts: BTreeMap::new(),
            assigned_tasks: Vec::new(),
            blocked: record.blocked.unwrap_or(false),
            verification: record.verification.unwrap_or(VerificationStatus::Approved),
        }
    }
}

/// Reads `collector_id,service_area,max_capacity,blocked,verification` rows.
/// The last two columns may be left empty (unblocked, approved).
pub struct CollectorReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CollectorReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: csv_reader(source),
        }
    }

    pub fn collectors(self) -> impl Iterator<Item = Result<Collector>> {
        self.reader
            .into_deserialize::<CollectorRecord>()
            .map(|result| result.map(Collector::from).map_err(SagaError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_categories_parse_with_whitespace() {
        let data = "category_id, name, rate\nA, Paper, 30\nB, Metal, 12.5";
        let categories: Vec<Category> = CategoryReader::new(data.as_bytes())
            .categories()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].category_id, "A");
        assert_eq!(categories[1].rate.value(), dec!(12.5));
    }

    #[test]
    fn test_non_positive_rate_is_rejected() {
        let data = "category_id,name,rate\nA,Paper,0";
        let results: Vec<Result<Category>> =
            CategoryReader::new(data.as_bytes()).categories().collect();
        assert!(matches!(results[0], Err(SagaError::Validation(_))));
    }

    #[test]
    fn test_collectors_default_to_approved_and_unblocked() {
        let data = "collector_id,service_area,max_capacity,blocked,verification\n\
                    c1,north,5,,\n\
                    c2,north,3,true,pending";
        let collectors: Vec<Collector> = CollectorReader::new(data.as_bytes())
            .collectors()
            .collect::<Result<_>>()
            .unwrap();

        assert!(!collectors[0].blocked);
        assert_eq!(collectors[0].verification, VerificationStatus::Approved);
        assert!(collectors[1].blocked);
        assert_eq!(collectors[1].verification, VerificationStatus::Pending);
    }

    #[test]
    fn test_malformed_collector_row() {
        let data = "collector_id,service_area,max_capacity\nc1,north,lots";
        let results: Vec<Result<Collector>> =
            CollectorReader::new(data.as_bytes()).collectors().collect();
        assert!(matches!(results[0], Err(SagaError::Csv(_))));
    }
}
