use std::time::{SystemTime, UNIX_EPOCH};

use strata_core::{Commit, DiffSnapshot, EvolutionAnalysisResult};
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SQLITE_FILE_NAME, SqliteStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    pub repo: String,
    pub fetched_at: i64,
    pub commit_count: usize,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("payload encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("repository {0} has not been fetched")]
    RepoNotFetched(String),
    #[error("failed to lock shared store state: {0}")]
    LockPoisoned(String),
}

/// Ordered commit history per repository. Only the ingestion step writes it.
pub trait CommitStore {
    /// Replaces the stored history for `repo` wholesale.
    fn replace_commits(&self, repo: &str, commits: &[Commit]) -> Result<(), StoreError>;

    /// Fails with [`StoreError::RepoNotFetched`] when nothing is stored.
    fn list_commits(&self, repo: &str) -> Result<Vec<Commit>, StoreError>;

    fn list_repositories(&self) -> Result<Vec<RepositoryRecord>, StoreError>;
}

/// Per (repo, file, commit) diff snapshots. Writes are durable once `put`
/// returns; staleness is the caller's call.
pub trait SnapshotCache {
    fn get_snapshot(
        &self,
        repo: &str,
        file_path: &str,
        commit_hash: &str,
    ) -> Result<Option<DiffSnapshot>, StoreError>;

    fn put_snapshot(&self, repo: &str, snapshot: &DiffSnapshot) -> Result<(), StoreError>;

    fn list_snapshots(&self, repo: &str, file_path: &str) -> Result<Vec<DiffSnapshot>, StoreError>;
}

pub trait EvolutionResultStore {
    fn get_evolution_result(
        &self,
        repo: &str,
    ) -> Result<Option<EvolutionAnalysisResult>, StoreError>;

    fn put_evolution_result(
        &self,
        repo: &str,
        result: &EvolutionAnalysisResult,
    ) -> Result<(), StoreError>;
}

/// Everything the analysis pipeline reads and writes.
pub trait EvolutionStore: CommitStore + SnapshotCache + EvolutionResultStore {}

impl<T> EvolutionStore for T where T: CommitStore + SnapshotCache + EvolutionResultStore {}

fn unix_timestamp_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}
