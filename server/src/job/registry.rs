//! In-memory job status registry

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::types::{JobError, JobRecord};

/// Case id -> latest job record.
///
/// Records are immutable snapshots; every write swaps in a whole new `Arc`,
/// so a reader never observes a half-updated record.
#[derive(Debug, Default)]
pub struct JobRegistry {
    records: DashMap<String, Arc<JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record, or the `unknown` sentinel. Never fails.
    pub fn get(&self, case: &str) -> Arc<JobRecord> {
        self.records
            .get(case)
            .map(|r| Arc::clone(r.value()))
            .unwrap_or_else(|| Arc::new(JobRecord::unknown()))
    }

    pub fn contains(&self, case: &str) -> bool {
        self.records.contains_key(case)
    }

    pub fn replace(&self, case: &str, record: JobRecord) {
        self.records.insert(case.to_string(), Arc::new(record));
    }

    /// Read-modify-replace of an existing record; no-op for unseen cases
    pub fn update<F>(&self, case: &str, f: F)
    where
        F: FnOnce(&mut JobRecord),
    {
        if let Some(mut entry) = self.records.get_mut(case) {
            let mut record = JobRecord::clone(entry.value());
            f(&mut record);
            *entry.value_mut() = Arc::new(record);
        }
    }

    /// Mark a case `processing` unless a job is already underway or done.
    ///
    /// Check and set happen under the shard lock; a refused start leaves the
    /// existing record untouched.
    pub fn try_begin(&self, case: &str) -> Result<(), JobError> {
        match self.records.entry(case.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().status.blocks_start() {
                    return Err(JobError::AlreadyRunning(case.to_string()));
                }
                entry.insert(Arc::new(JobRecord::processing()));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(JobRecord::processing()));
            }
        }
        Ok(())
    }

    pub fn remove(&self, case: &str) -> Option<Arc<JobRecord>> {
        self.records.remove(case).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
