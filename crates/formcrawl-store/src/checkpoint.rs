//! Checkpoint: durable progress record for one unit of crawl work

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::partition::PartitionKey;

/// Bump when the on-disk layout changes incompatibly.
pub const CURRENT_FORMAT_VERSION: u32 = 1;

/// Address of a checkpoint: one per (partition, unit number).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckpointId {
    pub partition: PartitionKey,
    pub unit: u32,
}

impl CheckpointId {
    pub fn new(partition: PartitionKey, unit: u32) -> Self {
        Self { partition, unit }
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:04}", self.partition, self.unit)
    }
}

/// Per-item tag inside a running unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Completed,
    Failed,
}

/// Lifecycle of a unit as seen from its checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// No item attempted yet
    New,
    Running,
    Completed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => f.write_str("NEW"),
            Self::Running => f.write_str("RUNNING"),
            Self::Completed => f.write_str("COMPLETED"),
        }
    }
}

/// Durable progress record for one unit.
///
/// The only mutators are [`record_success`](Self::record_success) and
/// [`record_failure`](Self::record_failure); both keep `completed_items` and
/// `failed_items` disjoint, never move `last_processed_item` backwards and
/// keep `is_completed == (last_processed_item >= end_item)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub partition_key: PartitionKey,
    pub unit_number: u32,
    /// Nominal items per unit
    pub size_hint: u32,
    /// Ceiling bound for the partition
    pub total_items_in_partition: u32,
    pub start_item: u32,
    /// Inclusive
    pub end_item: u32,
    /// High-water mark of successfully processed items; 0 = nothing yet
    pub last_processed_item: u32,
    pub completed_items: BTreeSet<u32>,
    pub failed_items: BTreeSet<u32>,
    /// Failed attempts per item, cleared when the item completes
    pub retry_counts: BTreeMap<u32, u32>,
    pub total_links_found: u64,
    pub total_artifacts_fetched: u64,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Zero-progress record for a unit covering `start_item..=end_item`.
    pub fn new(
        partition_key: PartitionKey,
        unit_number: u32,
        start_item: u32,
        end_item: u32,
        size_hint: u32,
        total_items_in_partition: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            partition_key,
            unit_number,
            size_hint,
            total_items_in_partition,
            start_item,
            end_item,
            last_processed_item: 0,
            completed_items: BTreeSet::new(),
            failed_items: BTreeSet::new(),
            retry_counts: BTreeMap::new(),
            total_links_found: 0,
            total_artifacts_fetched: 0,
            is_completed: false,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn id(&self) -> CheckpointId {
        CheckpointId::new(self.partition_key.clone(), self.unit_number)
    }

    /// Number of items in the unit's range
    pub fn item_count(&self) -> u32 {
        match self.end_item.checked_sub(self.start_item) {
            Some(span) => span.saturating_add(1),
            None => 0,
        }
    }

    pub fn contains(&self, item: u32) -> bool {
        (self.start_item..=self.end_item).contains(&item)
    }

    pub fn item_state(&self, item: u32) -> ItemState {
        if self.completed_items.contains(&item) {
            ItemState::Completed
        } else if self.failed_items.contains(&item) {
            ItemState::Failed
        } else {
            ItemState::Pending
        }
    }

    pub fn unit_state(&self) -> UnitState {
        if self.is_completed {
            UnitState::Completed
        } else if self.last_processed_item == 0
            && self.completed_items.is_empty()
            && self.failed_items.is_empty()
        {
            UnitState::New
        } else {
            UnitState::Running
        }
    }

    /// Failed attempts recorded for `item`
    pub fn retries_of(&self, item: u32) -> u32 {
        self.retry_counts.get(&item).copied().unwrap_or(0)
    }

    /// First item of the sequential sweep.
    ///
    /// A zero high-water mark means nothing was done yet, even when the
    /// record exists; otherwise resume right after it.
    pub fn resume_from(&self) -> u32 {
        if self.last_processed_item == 0 {
            self.start_item
        } else {
            self.start_item.max(self.last_processed_item.saturating_add(1))
        }
    }

    /// Items currently failed and not completed, ascending
    pub fn backlog(&self) -> Vec<u32> {
        self.failed_items
            .iter()
            .copied()
            .filter(|i| !self.completed_items.contains(i))
            .collect()
    }

    /// Fold a successful attempt of `item` into the record.
    ///
    /// Links are counted once per item: re-recording an already completed
    /// item only adds its artifacts.
    pub fn record_success(&mut self, item: u32, links_found: usize, artifacts_fetched: usize) {
        if self.completed_items.insert(item) {
            self.total_links_found += links_found as u64;
        }
        self.failed_items.remove(&item);
        self.retry_counts.remove(&item);
        if item > self.last_processed_item {
            self.last_processed_item = item;
        }
        self.total_artifacts_fetched += artifacts_fetched as u64;
        self.refresh_completion();
    }

    /// Fold a failed attempt of `item` into the record; returns its new retry count.
    ///
    /// A failure never demotes an item that already completed.
    pub fn record_failure(&mut self, item: u32) -> u32 {
        if self.completed_items.contains(&item) {
            return 0;
        }
        self.failed_items.insert(item);
        let count = self.retry_counts.entry(item).or_insert(0);
        *count += 1;
        let count = *count;
        self.refresh_completion();
        count
    }

    pub fn refresh_completion(&mut self) {
        self.is_completed = self.last_processed_item >= self.end_item;
    }

    /// Share of the unit's items completed, 0–100
    pub fn progress_percent(&self) -> f64 {
        let total = self.item_count();
        if total == 0 {
            return 100.0;
        }
        self.completed_items.len() as f64 * 100.0 / f64::from(total)
    }

    /// Check structural invariants of a record read from disk.
    pub fn validate(&self) -> Result<(), String> {
        if self.start_item == 0 || self.start_item > self.end_item {
            return Err(format!(
                "bad item range {}..={}",
                self.start_item, self.end_item
            ));
        }
        if let Some(item) = self.completed_items.intersection(&self.failed_items).next() {
            return Err(format!("item {item} is both completed and failed"));
        }
        if let Some(item) = self
            .retry_counts
            .keys()
            .find(|i| self.completed_items.contains(i))
        {
            return Err(format!("completed item {item} still has a retry count"));
        }
        if self.is_completed != (self.last_processed_item >= self.end_item) {
            return Err("is_completed disagrees with last_processed_item".to_string());
        }
        Ok(())
    }
}
