use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use strata_core::{Commit, DiffSnapshot, EvolutionAnalysisResult};

use crate::{
    CommitStore, EvolutionResultStore, RepositoryRecord, SnapshotCache, StoreError,
    unix_timestamp_secs,
};

type SnapshotKey = (String, String, String);

#[derive(Debug, Default)]
struct MemoryState {
    commits: HashMap<String, (i64, Vec<Commit>)>,
    snapshots: HashMap<SnapshotKey, DiffSnapshot>,
    results: HashMap<String, EvolutionAnalysisResult>,
}

/// Process-local store with the same contracts as [`crate::SqliteStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.snapshots.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|err| StoreError::LockPoisoned(err.to_string()))
    }
}

impl CommitStore for MemoryStore {
    fn replace_commits(&self, repo: &str, commits: &[Commit]) -> Result<(), StoreError> {
        self.lock()?
            .commits
            .insert(repo.to_owned(), (unix_timestamp_secs(), commits.to_vec()));
        Ok(())
    }

    fn list_commits(&self, repo: &str) -> Result<Vec<Commit>, StoreError> {
        match self.lock()?.commits.get(repo) {
            Some((_, commits)) if !commits.is_empty() => Ok(commits.clone()),
            _ => Err(StoreError::RepoNotFetched(repo.to_owned())),
        }
    }

    fn list_repositories(&self) -> Result<Vec<RepositoryRecord>, StoreError> {
        let state = self.lock()?;
        let mut records: Vec<RepositoryRecord> = state
            .commits
            .iter()
            .map(|(repo, (fetched_at, commits))| RepositoryRecord {
                repo: repo.clone(),
                fetched_at: *fetched_at,
                commit_count: commits.len(),
            })
            .collect();
        records.sort_by(|left, right| left.repo.cmp(&right.repo));
        Ok(records)
    }
}

impl SnapshotCache for MemoryStore {
    fn get_snapshot(
        &self,
        repo: &str,
        file_path: &str,
        commit_hash: &str,
    ) -> Result<Option<DiffSnapshot>, StoreError> {
        let key = (
            repo.to_owned(),
            file_path.to_owned(),
            commit_hash.to_owned(),
        );
        Ok(self.lock()?.snapshots.get(&key).cloned())
    }

    fn put_snapshot(&self, repo: &str, snapshot: &DiffSnapshot) -> Result<(), StoreError> {
        let key = (
            repo.to_owned(),
            snapshot.file_path.clone(),
            snapshot.commit_hash.clone(),
        );
        self.lock()?.snapshots.insert(key, snapshot.clone());
        Ok(())
    }

    fn list_snapshots(&self, repo: &str, file_path: &str) -> Result<Vec<DiffSnapshot>, StoreError> {
        let state = self.lock()?;
        let mut snapshots: Vec<DiffSnapshot> = state
            .snapshots
            .iter()
            .filter(|((stored_repo, stored_path, _), _)| {
                stored_repo == repo && stored_path == file_path
            })
            .map(|(_, snapshot)| snapshot.clone())
            .collect();
        snapshots.sort_by(|left, right| {
            left.timestamp
                .cmp(&right.timestamp)
                .then_with(|| left.commit_hash.cmp(&right.commit_hash))
        });
        Ok(snapshots)
    }
}

impl EvolutionResultStore for MemoryStore {
    fn get_evolution_result(
        &self,
        repo: &str,
    ) -> Result<Option<EvolutionAnalysisResult>, StoreError> {
        Ok(self.lock()?.results.get(repo).cloned())
    }

    fn put_evolution_result(
        &self,
        repo: &str,
        result: &EvolutionAnalysisResult,
    ) -> Result<(), StoreError> {
        self.lock()?
            .results
            .insert(repo.to_owned(), result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use strata_core::{SNAPSHOT_SCHEMA_VERSION, parse_timestamp};

    use super::*;

    fn snapshot(hash: &str, date: &str, diff: &str) -> DiffSnapshot {
        DiffSnapshot {
            file_path: "lib/db.ts".to_owned(),
            commit_hash: hash.to_owned(),
            message: String::new(),
            diff: diff.to_owned(),
            timestamp: parse_timestamp(date).expect("date"),
            schema_tag: Some(SNAPSHOT_SCHEMA_VERSION),
            model_id: None,
        }
    }

    #[test]
    fn snapshot_put_is_idempotent_and_overwrites_by_key() {
        let store = MemoryStore::new();

        store
            .put_snapshot("demo", &snapshot("a1", "2024-01-02", "+x"))
            .expect("put");
        store
            .put_snapshot("demo", &snapshot("a1", "2024-01-02", "+x"))
            .expect("put again");
        assert_eq!(store.snapshot_count().expect("count"), 1);

        store
            .put_snapshot("demo", &snapshot("a1", "2024-01-02", "+y"))
            .expect("overwrite");
        store
            .put_snapshot("demo", &snapshot("z9", "2024-01-01", "+z"))
            .expect("put older");

        let listed = store.list_snapshots("demo", "lib/db.ts").expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].commit_hash, "z9");
        assert_eq!(listed[1].diff, "+y");
    }

    #[test]
    fn empty_history_counts_as_not_fetched() {
        let store = MemoryStore::new();
        store.replace_commits("demo", &[]).expect("replace");

        assert!(matches!(
            store.list_commits("demo"),
            Err(StoreError::RepoNotFetched(_))
        ));
        assert_eq!(store.list_repositories().expect("repos").len(), 1);
    }
}
