use crate::domain::collector::{AssignOutcome, Collector};
use crate::domain::ports::{CollectorAllocator, CollectorDirectoryRef};
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::cmp::Reverse;
use tracing::debug;

/// Chooses collectors for pickups and commits assignments.
///
/// Reads are advisory: two requests may both see the same collector as
/// eligible. Only `commit_assignment`, which the directory applies atomically
/// against the capacity ceiling, decides who actually gets the slot.
pub struct AllocationEngine {
    directory: CollectorDirectoryRef,
}

impl AllocationEngine {
    pub fn new(directory: CollectorDirectoryRef) -> Self {
        Self { directory }
    }

    /// Collectors serving `service_area` that are unblocked, approved and still
    /// below capacity on `date`, best first.
    pub async fn find_eligible(&self, service_area: &str, date: NaiveDate) -> Result<Vec<Collector>> {
        let mut eligible: Vec<Collector> = self
            .directory
            .find_by_area(service_area)
            .await?
            .into_iter()
            .filter(|c| c.is_eligible(service_area, date))
            .collect();
        eligible.sort_by(|a, b| {
            Reverse(Self::score(a, date))
                .cmp(&Reverse(Self::score(b, date)))
                .then_with(|| a.collector_id.cmp(&b.collector_id))
        });
        Ok(eligible)
    }

    pub fn score(collector: &Collector, date: NaiveDate) -> i64 {
        collector.score(date)
    }

    /// Highest score wins; ties go to the lowest collector id.
    pub async fn pick_best(&self, service_area: &str, date: NaiveDate) -> Result<Option<Collector>> {
        let best = self.find_eligible(service_area, date).await?.into_iter().next();
        debug!(
            service_area,
            %date,
            collector_id = best.as_ref().map(|c| c.collector_id.as_str()),
            "Picked best collector"
        );
        Ok(best)
    }

    pub async fn commit_assignment(
        &self,
        collector_id: &str,
        collection_id: &str,
        date: NaiveDate,
    ) -> Result<AssignOutcome> {
        self.directory
            .commit_assignment(collector_id, collection_id, date)
            .await
    }

    pub async fn revert_assignment(
        &self,
        collector_id: &str,
        collection_id: &str,
        date: NaiveDate,
    ) -> Result<bool> {
        self.directory
            .revert_assignment(collector_id, collection_id, date)
            .await
    }
}

#[async_trait]
impl CollectorAllocator for AllocationEngine {
    async fn get_available_collector(
        &self,
        service_area: &str,
        date: NaiveDate,
    ) -> Result<Option<Collector>> {
        self.pick_best(service_area, date).await
    }

    async fn assign_collection(
        &self,
        collector_id: &str,
        collection_id: &str,
        date: NaiveDate,
    ) -> Result<AssignOutcome> {
        self.commit_assignment(collector_id, collection_id, date).await
    }

    async fn assigned_collector(
        &self,
        service_area: &str,
        collection_id: &str,
    ) -> Result<Option<Collector>> {
        Ok(self
            .directory
            .find_by_area(service_area)
            .await?
            .into_iter()
            .find(|c| c.is_assigned(collection_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collector::VerificationStatus;
    use crate::domain::ports::CollectorDirectory;
    use crate::infrastructure::in_memory::InMemoryCollectorDirectory;
    use std::sync::Arc;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
    }

    async fn engine_with(collectors: Vec<Collector>) -> AllocationEngine {
        let directory = Arc::new(InMemoryCollectorDirectory::new());
        for collector in collectors {
            directory.upsert(collector).await.unwrap();
        }
        AllocationEngine::new(directory)
    }

    #[tokio::test]
    async fn test_pick_best_prefers_least_loaded() {
        let mut busy = Collector::new("a-busy", "north", 5);
        busy.try_assign("x1", date()).unwrap();
        busy.try_assign("x2", date()).unwrap();
        let light = Collector::new("b-light", "north", 5);

        let engine = engine_with(vec![busy, light]).await;
        let best = engine.pick_best("north", date()).await.unwrap().unwrap();
        assert_eq!(best.collector_id, "b-light");
    }

    #[tokio::test]
    async fn test_ties_break_by_collector_id() {
        let engine = engine_with(vec![
            Collector::new("c3", "north", 5),
            Collector::new("c1", "north", 5),
            Collector::new("c2", "north", 5),
        ])
        .await;
        let ids: Vec<String> = engine
            .find_eligible("north", date())
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.collector_id)
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn test_ineligible_collectors_are_skipped() {
        let mut blocked = Collector::new("c1", "north", 5);
        blocked.blocked = true;
        let mut unverified = Collector::new("c2", "north", 5);
        unverified.verification = VerificationStatus::Rejected;
        let mut full = Collector::new("c3", "north", 1);
        full.try_assign("x1", date()).unwrap();
        let elsewhere = Collector::new("c4", "south", 5);

        let engine = engine_with(vec![blocked, unverified, full, elsewhere]).await;
        assert!(engine.pick_best("north", date()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assigned_collector_finds_existing_holder() {
        let engine = engine_with(vec![
            Collector::new("c1", "north", 5),
            Collector::new("c2", "north", 5),
        ])
        .await;
        engine.assign_collection("c2", "col-9", date()).await.unwrap();

        let holder = engine.assigned_collector("north", "col-9").await.unwrap();
        assert_eq!(holder.map(|c| c.collector_id).as_deref(), Some("c2"));
        assert!(engine.assigned_collector("north", "col-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_absent_date_counts_as_zero() {
        let mut collector = Collector::new("c1", "north", 1);
        collector
            .try_assign("x1", date().pred_opt().unwrap())
            .unwrap();
        let engine = engine_with(vec![collector]).await;
        assert!(engine.pick_best("north", date()).await.unwrap().is_some());
    }
}
