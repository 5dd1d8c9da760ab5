use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use strata_config::STRATA_DIR_NAME;
use strata_core::{Commit, DiffSnapshot, EvolutionAnalysisResult};

use crate::{
    CommitStore, EvolutionResultStore, RepositoryRecord, SnapshotCache, StoreError,
    unix_timestamp_secs,
};

pub const SQLITE_FILE_NAME: &str = "strata.sqlite";

pub struct SqliteStore {
    conn: Connection,
    strata_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let workspace_root = workspace_root.as_ref();
        let strata_dir = workspace_root.join(STRATA_DIR_NAME);
        let sqlite_path = strata_dir.join(SQLITE_FILE_NAME);

        fs::create_dir_all(&strata_dir)?;

        let conn = Connection::open(sqlite_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self { conn, strata_dir })
    }

    pub fn strata_dir(&self) -> &Path {
        &self.strata_dir
    }
}

impl CommitStore for SqliteStore {
    fn replace_commits(&self, repo: &str, commits: &[Commit]) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM commits WHERE repo = ?1", params![repo])?;
        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO commits (repo, ordinal, hash, payload)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for (ordinal, commit) in commits.iter().enumerate() {
                let payload = serde_json::to_string(commit)?;
                insert.execute(params![repo, ordinal as i64, commit.hash, payload])?;
            }
        }
        tx.execute(
            r#"
            INSERT INTO repositories (repo, fetched_at, commit_count)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(repo) DO UPDATE SET
                fetched_at = excluded.fetched_at,
                commit_count = excluded.commit_count
            "#,
            params![repo, unix_timestamp_secs(), commits.len() as i64],
        )?;
        tx.commit()?;

        tracing::debug!(repo, commits = commits.len(), "replaced stored commits");
        Ok(())
    }

    fn list_commits(&self, repo: &str) -> Result<Vec<Commit>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT payload
            FROM commits
            WHERE repo = ?1
            ORDER BY ordinal ASC
            "#,
        )?;

        let rows = stmt.query_map(params![repo], |row| row.get::<_, String>(0))?;
        let payloads = rows.collect::<Result<Vec<_>, _>>()?;
        if payloads.is_empty() {
            return Err(StoreError::RepoNotFetched(repo.to_owned()));
        }

        let commits = payloads
            .iter()
            .map(|payload| serde_json::from_str::<Commit>(payload))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(commits)
    }

    fn list_repositories(&self) -> Result<Vec<RepositoryRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT repo, fetched_at, commit_count
            FROM repositories
            ORDER BY repo ASC
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(RepositoryRecord {
                repo: row.get(0)?,
                fetched_at: row.get(1)?,
                commit_count: row.get::<_, i64>(2)?.max(0) as usize,
            })
        })?;

        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl SnapshotCache for SqliteStore {
    fn get_snapshot(
        &self,
        repo: &str,
        file_path: &str,
        commit_hash: &str,
    ) -> Result<Option<DiffSnapshot>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT payload
            FROM diff_snapshots
            WHERE repo = ?1 AND file_path = ?2 AND commit_hash = ?3
            "#,
        )?;

        let payload = stmt
            .query_row(params![repo, file_path, commit_hash], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;

        payload
            .map(|payload| serde_json::from_str::<DiffSnapshot>(&payload))
            .transpose()
            .map_err(Into::into)
    }

    fn put_snapshot(&self, repo: &str, snapshot: &DiffSnapshot) -> Result<(), StoreError> {
        let payload = serde_json::to_string(snapshot)?;
        self.conn.execute(
            r#"
            INSERT INTO diff_snapshots (
                repo, file_path, commit_hash, schema_tag, timestamp_unix, payload, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(repo, file_path, commit_hash) DO UPDATE SET
                schema_tag = excluded.schema_tag,
                timestamp_unix = excluded.timestamp_unix,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
            params![
                repo,
                snapshot.file_path,
                snapshot.commit_hash,
                snapshot.schema_tag.map(i64::from),
                snapshot.timestamp.timestamp(),
                payload,
                unix_timestamp_secs(),
            ],
        )?;

        Ok(())
    }

    fn list_snapshots(&self, repo: &str, file_path: &str) -> Result<Vec<DiffSnapshot>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT payload
            FROM diff_snapshots
            WHERE repo = ?1 AND file_path = ?2
            ORDER BY timestamp_unix ASC, commit_hash ASC
            "#,
        )?;

        let rows = stmt.query_map(params![repo, file_path], |row| row.get::<_, String>(0))?;
        let payloads = rows.collect::<Result<Vec<_>, _>>()?;
        let snapshots = payloads
            .iter()
            .map(|payload| serde_json::from_str::<DiffSnapshot>(payload))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }
}

impl EvolutionResultStore for SqliteStore {
    fn get_evolution_result(
        &self,
        repo: &str,
    ) -> Result<Option<EvolutionAnalysisResult>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT payload
            FROM evolution_results
            WHERE repo = ?1
            "#,
        )?;

        let payload = stmt
            .query_row(params![repo], |row| row.get::<_, String>(0))
            .optional()?;

        payload
            .map(|payload| serde_json::from_str::<EvolutionAnalysisResult>(&payload))
            .transpose()
            .map_err(Into::into)
    }

    fn put_evolution_result(
        &self,
        repo: &str,
        result: &EvolutionAnalysisResult,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(result)?;
        self.conn.execute(
            r#"
            INSERT INTO evolution_results (repo, generated_at, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(repo) DO UPDATE SET
                generated_at = excluded.generated_at,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
            params![
                repo,
                result.generated_at.map(|value| value.to_rfc3339()),
                payload,
                unix_timestamp_secs(),
            ],
        )?;

        Ok(())
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            repo TEXT PRIMARY KEY,
            fetched_at INTEGER NOT NULL,
            commit_count INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS commits (
            repo TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            hash TEXT NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (repo, ordinal)
        );

        CREATE TABLE IF NOT EXISTS diff_snapshots (
            repo TEXT NOT NULL,
            file_path TEXT NOT NULL,
            commit_hash TEXT NOT NULL,
            schema_tag INTEGER,
            timestamp_unix INTEGER NOT NULL,
            payload TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (repo, file_path, commit_hash)
        );

        CREATE TABLE IF NOT EXISTS evolution_results (
            repo TEXT PRIMARY KEY,
            generated_at TEXT,
            payload TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;

    Ok(())
}
