use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One mutex per repository so runs against the same repository serialize
/// while different repositories proceed in parallel.
#[derive(Debug, Default)]
pub struct RunLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guards no data, so a poisoned map or entry is still usable.
    pub fn lock_for(&self, repo: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(repo.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
