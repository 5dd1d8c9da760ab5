use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::git::{GitError, run_git};

const RECORD_SEPARATOR: char = '\u{1e}';

#[derive(Debug, Error)]
pub enum DiffSourceError {
    #[error("git error: {0}")]
    Git(#[from] GitError),
    #[error("{0}")]
    Unavailable(String),
}

/// Supplies file-scoped diff text for a batch of commits.
pub trait DiffSource: Send + Sync {
    /// Returns diff text keyed by commit hash. Hashes the source knows
    /// nothing about may be missing from the map.
    fn fetch_file_diffs(
        &self,
        repo: &str,
        file_path: &str,
        hashes: &[String],
    ) -> Result<BTreeMap<String, String>, DiffSourceError>;
}

/// Diff source backed by a local checkout of the repository.
#[derive(Debug, Clone)]
pub struct GitDiffSource {
    checkout: PathBuf,
}

impl GitDiffSource {
    pub fn new(checkout: impl Into<PathBuf>) -> Self {
        Self {
            checkout: checkout.into(),
        }
    }
}

impl DiffSource for GitDiffSource {
    fn fetch_file_diffs(
        &self,
        repo: &str,
        file_path: &str,
        hashes: &[String],
    ) -> Result<BTreeMap<String, String>, DiffSourceError> {
        if hashes.is_empty() {
            return Ok(BTreeMap::new());
        }

        let format = format!("--format={RECORD_SEPARATOR}%H");
        let mut args = vec![
            "show",
            format.as_str(),
            "--no-color",
            "--no-ext-diff",
            "--patch",
        ];
        args.extend(hashes.iter().map(String::as_str));
        args.push("--");
        args.push(file_path);

        let output = run_git(&self.checkout, &args)?;
        let diffs = split_show_output(&output);

        tracing::debug!(
            repo,
            file = file_path,
            requested = hashes.len(),
            returned = diffs.len(),
            "fetched file diffs"
        );
        Ok(diffs)
    }
}

/// Splits `git show` output whose records start with a separator byte
/// followed by the full commit hash.
fn split_show_output(output: &str) -> BTreeMap<String, String> {
    output
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
        .filter_map(|record| {
            let (hash, body) = record.split_once('\n').unwrap_or((record, ""));
            let hash = hash.trim().to_ascii_lowercase();
            if hash.is_empty() {
                return None;
            }
            Some((hash, body.trim_matches('\n').to_owned()))
        })
        .collect()
}
