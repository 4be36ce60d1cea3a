use crate::error::SagaError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Base score of a collector with no tasks on the target date.
pub const BASE_SCORE: i64 = 100;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// Result of a successful commit.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AssignOutcome {
    Assigned,
    /// The collection was already on this collector's list; nothing changed.
    AlreadyAssigned,
}

/// A pickup agent and their per-day workload.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Collector {
    pub collector_id: String,
    pub service_area: String,
    pub max_capacity: u32,
    #[serde(default)]
    pub daily_task_counts: BTreeMap<NaiveDate, u32>,
    #[serde(default)]
    pub assigned_tasks: Vec<String>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub verification: VerificationStatus,
}

impl Collector {
    pub fn new(collector_id: &str, service_area: &str, max_capacity: u32) -> Self {
        Self {
            collector_id: collector_id.to_string(),
            service_area: service_area.to_string(),
            max_capacity,
            daily_task_counts: BTreeMap::new(),
            assigned_tasks: Vec::new(),
            blocked: false,
            verification: VerificationStatus::Approved,
        }
    }

    pub fn tasks_on(&self, date: NaiveDate) -> u32 {
        self.daily_task_counts.get(&date).copied().unwrap_or(0)
    }

    pub fn has_capacity_on(&self, date: NaiveDate) -> bool {
        self.tasks_on(date) < self.max_capacity
    }

    pub fn is_eligible(&self, service_area: &str, date: NaiveDate) -> bool {
        self.service_area == service_area
            && !self.blocked
            && self.verification == VerificationStatus::Approved
            && self.has_capacity_on(date)
    }

    /// Higher is better; strictly decreasing in the date's task count.
    pub fn score(&self, date: NaiveDate) -> i64 {
        BASE_SCORE - i64::from(self.tasks_on(date))
    }

    pub fn is_assigned(&self, collection_id: &str) -> bool {
        self.assigned_tasks.iter().any(|t| t == collection_id)
    }

    /// Adds the collection and bumps the date counter, refusing to cross
    /// `max_capacity`. Callers must run this under the directory's write lock.
    pub fn try_assign(
        &mut self,
        collection_id: &str,
        date: NaiveDate,
    ) -> Result<AssignOutcome, SagaError> {
        if self.is_assigned(collection_id) {
            return Ok(AssignOutcome::AlreadyAssigned);
        }
        if !self.has_capacity_on(date) {
            return Err(SagaError::CapacityExceeded {
                collector_id: self.collector_id.clone(),
                date,
            });
        }
        self.assigned_tasks.push(collection_id.to_string());
        *self.daily_task_counts.entry(date).or_insert(0) += 1;
        Ok(AssignOutcome::Assigned)
    }

    /// Removes the collection and decrements the date counter (floored at 0).
    /// Returns false, changing nothing, if the collection was not assigned.
    pub fn revert(&mut self, collection_id: &str, date: NaiveDate) -> bool {
        let Some(pos) = self.assigned_tasks.iter().position(|t| t == collection_id) else {
            return false;
        };
        self.assigned_tasks.remove(pos);
        if let Some(count) = self.daily_task_counts.get_mut(&date) {
            *count = count.saturating_sub(1);
        }
        true
    }
}
