//! Bounded in-memory history of terminal task outcomes
//!
//! Every task that reaches Completed, Failed, or Cancelled gets exactly one
//! [`HistoryRecord`] here. The store is a ring bounded by
//! `max_history`: when full, the oldest record is evicted. Queries support
//! filtering, stable sorting, and offset/limit pagination.

use crate::types::{HistoryRecord, HistoryStats, Page, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Field to sort history query results by
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Terminal timestamp (default)
    #[default]
    Timestamp,
    /// Input file display name
    FileName,
    /// Terminal status
    Status,
}

/// Sort direction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDir {
    /// Ascending
    Asc,
    /// Descending (default: newest first)
    #[default]
    Desc,
}

/// Filter, sort, and pagination parameters for history queries
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Only records with this terminal status
    #[serde(default)]
    pub status: Option<TaskStatus>,

    /// Only records with this output format (case-insensitive)
    #[serde(default)]
    pub output_format: Option<String>,

    /// Only records owned by this user
    #[serde(default)]
    pub user_id: Option<String>,

    /// Sort field
    #[serde(default)]
    pub sort_by: SortField,

    /// Sort direction
    #[serde(default)]
    pub sort_dir: SortDir,

    /// Maximum records per page (default: 50)
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Records to skip before the page starts
    #[serde(default)]
    pub offset: usize,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            status: None,
            output_format: None,
            user_id: None,
            sort_by: SortField::default(),
            sort_dir: SortDir::default(),
            limit: default_limit(),
            offset: 0,
        }
    }
}

fn default_limit() -> usize {
    50
}

/// Bounded store of terminal task records
#[derive(Debug)]
pub struct HistoryStore {
    records: RwLock<VecDeque<HistoryRecord>>,
    max_records: usize,
}

impl HistoryStore {
    /// Create a store retaining at most `max_records` records
    pub fn new(max_records: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            max_records: max_records.max(1),
        }
    }

    /// Append a terminal record, evicting the oldest if the store is full
    pub async fn record(&self, record: HistoryRecord) {
        let mut records = self.records.write().await;
        if records.len() >= self.max_records {
            records.pop_front();
        }
        tracing::debug!(
            task_id = %record.id,
            status = %record.status,
            duration_ms = record.duration.as_millis(),
            "recording task outcome"
        );
        records.push_back(record);
    }

    /// Look up a record by task ID
    pub async fn get(&self, id: &TaskId) -> Option<HistoryRecord> {
        let records = self.records.read().await;
        records.iter().find(|r| &r.id == id).cloned()
    }

    /// Filter, sort, and paginate records
    ///
    /// `total` on the returned page counts all records matching the filter,
    /// not just those in the page.
    pub async fn query(&self, query: &HistoryQuery) -> Page<HistoryRecord> {
        let records = self.records.read().await;

        let mut matched: Vec<HistoryRecord> = records
            .iter()
            .filter(|r| {
                if let Some(status) = query.status
                    && r.status != status
                {
                    return false;
                }
                if let Some(format) = &query.output_format
                    && !r.output_format.eq_ignore_ascii_case(format)
                {
                    return false;
                }
                if let Some(user_id) = &query.user_id
                    && &r.user_id != user_id
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        // Stable sort so records equal under the key keep insertion order
        match query.sort_by {
            SortField::Timestamp => matched.sort_by_key(|r| r.timestamp),
            SortField::FileName => matched.sort_by(|a, b| a.file_name.cmp(&b.file_name)),
            SortField::Status => matched.sort_by_key(|r| status_rank(r.status)),
        }
        if query.sort_dir == SortDir::Desc {
            matched.reverse();
        }

        let total = matched.len();
        let items: Vec<HistoryRecord> = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();

        Page {
            items,
            total,
            limit: query.limit,
            offset: query.offset,
        }
    }

    /// Aggregate statistics over all records
    pub async fn aggregate(&self) -> HistoryStats {
        let records = self.records.read().await;
        let total = records.len();
        if total == 0 {
            return HistoryStats {
                total: 0,
                success_count: 0,
                failed_count: 0,
                success_rate: 0.0,
                avg_duration_ms: 0.0,
                avg_memory_mb: 0.0,
                avg_cpu_percent: 0.0,
            };
        }

        let success_count = records
            .iter()
            .filter(|r| r.status == TaskStatus::Completed)
            .count();
        let failed_count = records
            .iter()
            .filter(|r| r.status == TaskStatus::Failed)
            .count();
        let sum_duration_ms: f64 = records
            .iter()
            .map(|r| r.duration.as_secs_f64() * 1000.0)
            .sum();
        let sum_memory: f64 = records.iter().map(|r| r.memory_usage_mb).sum();
        let sum_cpu: f64 = records.iter().map(|r| r.cpu_usage_percent).sum();

        HistoryStats {
            total,
            success_count,
            failed_count,
            success_rate: success_count as f64 / total as f64,
            avg_duration_ms: sum_duration_ms / total as f64,
            avg_memory_mb: sum_memory / total as f64,
            avg_cpu_percent: sum_cpu / total as f64,
        }
    }

    /// Delete one record by ID
    ///
    /// If `user_id` is given, the record is only deleted when it belongs to
    /// that user. Returns whether a record was removed.
    pub async fn delete(&self, id: &TaskId, user_id: Option<&str>) -> bool {
        let mut records = self.records.write().await;
        let position = records.iter().position(|r| {
            &r.id == id && user_id.is_none_or(|user| r.user_id == user)
        });
        match position {
            Some(index) => {
                records.remove(index);
                true
            }
            None => false,
        }
    }

    /// Delete all records, or all records owned by one user
    ///
    /// Returns the number of records removed.
    pub async fn clear(&self, user_id: Option<&str>) -> usize {
        let mut records = self.records.write().await;
        match user_id {
            Some(user) => {
                let before = records.len();
                records.retain(|r| r.user_id != user);
                before - records.len()
            }
            None => {
                let removed = records.len();
                records.clear();
                removed
            }
        }
    }

    /// Number of records currently stored
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

// Pending/Processing never appear in history, rank covers all variants anyway
fn status_rank(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Pending => 0,
        TaskStatus::Processing => 1,
        TaskStatus::Completed => 2,
        TaskStatus::Failed => 3,
        TaskStatus::Cancelled => 4,
    }
}
