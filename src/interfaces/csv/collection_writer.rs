use crate::domain::collection::Collection;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct CollectionRow<'a> {
    user_id: &'a str,
    payment_id: &'a str,
    status: String,
    collector_id: &'a str,
    estimated_cost: String,
    preferred_date: String,
    collection_id: &'a str,
}

impl<'a> From<&'a Collection> for CollectionRow<'a> {
    fn from(collection: &'a Collection) -> Self {
        Self {
            user_id: &collection.user_id,
            payment_id: &collection.payment_id,
            status: collection.status.to_string(),
            collector_id: collection.collector_id.as_deref().unwrap_or(""),
            estimated_cost: collection.estimated_cost.to_string(),
            preferred_date: collection.preferred_date.to_string(),
            collection_id: &collection.collection_id,
        }
    }
}

/// Writes the final state of every collection as CSV.
pub struct CollectionWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CollectionWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Rows come out ordered by payment id so output is stable across runs.
    pub fn write_collections(&mut self, mut collections: Vec<Collection>) -> Result<()> {
        collections.sort_by(|a, b| a.payment_id.cmp(&b.payment_id));
        if collections.is_empty() {
            self.writer.write_record([
                "user_id",
                "payment_id",
                "status",
                "collector_id",
                "estimated_cost",
                "preferred_date",
                "collection_id",
            ])?;
        }
        for collection in &collections {
            self.writer.serialize(CollectionRow::from(collection))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
