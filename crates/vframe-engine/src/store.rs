//! In-process job store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use vframe_models::{JobId, JobRecord};

use crate::error::{EngineError, EngineResult};

/// In-process mapping from job ID to job record.
///
/// Updates are serialized per job; reads return an immutable snapshot taken
/// under the same per-job lock, so a reader observing a terminal status also
/// observes the result or error populated before the status flip. Records
/// are retained for the process lifetime.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<JobRecord>>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh record. Fails if the ID is already present.
    pub fn insert(&self, record: JobRecord) -> EngineResult<()> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        if jobs.contains_key(&record.id) {
            return Err(EngineError::DuplicateJob(record.id.to_string()));
        }
        jobs.insert(record.id.clone(), Arc::new(Mutex::new(record)));
        Ok(())
    }

    /// Apply a mutation to one job's record under its exclusive lock.
    ///
    /// The critical section is short and never blocks other jobs.
    pub fn update<F>(&self, id: &JobId, mutate: F) -> EngineResult<()>
    where
        F: FnOnce(&mut JobRecord),
    {
        let slot = self.slot(id)?;
        let mut record = slot.lock().expect("job record lock poisoned");
        mutate(&mut record);
        Ok(())
    }

    /// Read a consistent snapshot of one job's record.
    pub fn read(&self, id: &JobId) -> EngineResult<JobRecord> {
        let slot = self.slot(id)?;
        let record = slot.lock().expect("job record lock poisoned");
        Ok(record.clone())
    }

    fn slot(&self, id: &JobId) -> EngineResult<Arc<Mutex<JobRecord>>> {
        let jobs = self.jobs.read().expect("job store lock poisoned");
        jobs.get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }
}
