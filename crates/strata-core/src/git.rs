use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::time::timestamp_from_unix_secs;
use crate::{ChangeStatus, Commit, CommitStats, FileChange};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{path} is not a git repository: {message}")]
    NotARepository { path: PathBuf, message: String },
    #[error("git {command} failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("failed to read git history: {0}")]
    History(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryOptions {
    pub max_commits: usize,
    pub include_diffs: bool,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            max_commits: 100,
            include_diffs: false,
        }
    }
}

/// Reads commit history from a local checkout. Metadata comes from the
/// object database, per-file stats from `git diff-tree`.
pub struct GitHistory {
    repo: gix::Repository,
    workdir: PathBuf,
}

impl GitHistory {
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = gix::discover(path).map_err(|err| GitError::NotARepository {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.to_path_buf());

        Ok(Self { repo, workdir })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn head_commit_hash(&self) -> Option<String> {
        let head_id = self.repo.head_id().ok()?.detach();
        Some(head_id.to_string().to_ascii_lowercase())
    }

    /// Newest `max_commits` commits reachable from HEAD, newest first. An
    /// unborn HEAD yields an empty history.
    pub fn read_commits(&self, options: HistoryOptions) -> Result<Vec<Commit>, GitError> {
        if options.max_commits == 0 {
            return Ok(Vec::new());
        }

        let Some(head_id) = self.repo.head_id().ok().map(|id| id.detach()) else {
            return Ok(Vec::new());
        };

        let walk = self
            .repo
            .rev_walk([head_id])
            .sorting(gix::revision::walk::Sorting::ByCommitTime(
                gix::traverse::commit::simple::CommitTimeOrder::NewestFirst,
            ))
            .all()
            .map_err(|err| GitError::History(err.to_string()))?;

        let mut commits = Vec::with_capacity(options.max_commits);
        for entry in walk {
            let info = entry.map_err(|err| GitError::History(err.to_string()))?;
            let mut commit = self.commit_record(info.id)?;
            if options.include_diffs {
                commit.diff = Some(self.commit_diff(&commit.hash)?);
            }
            commits.push(commit);
            if commits.len() >= options.max_commits {
                break;
            }
        }

        tracing::debug!(
            workdir = %self.workdir.display(),
            commits = commits.len(),
            "read git history"
        );
        Ok(commits)
    }

    fn commit_record(&self, id: gix::ObjectId) -> Result<Commit, GitError> {
        let hash = id.to_string().to_ascii_lowercase();
        let commit = self
            .repo
            .find_commit(id)
            .map_err(|err| GitError::History(format!("commit {hash}: {err}")))?;

        let (author, author_email) = commit
            .author()
            .ok()
            .map(|signature| {
                (
                    decode_text(signature.name.as_ref()),
                    Some(decode_text(signature.email.as_ref())).filter(|email| !email.is_empty()),
                )
            })
            .unwrap_or_default();

        let message = first_line(commit.message_raw_sloppy().as_ref());
        let seconds = commit.time().ok().map(|time| time.seconds).unwrap_or(0);
        let date = timestamp_from_unix_secs(seconds)
            .ok_or_else(|| GitError::History(format!("commit {hash} has invalid time")))?;

        let files = self.changed_files(&hash)?;
        Ok(Commit {
            stats: CommitStats::from_files(&files),
            hash,
            author,
            author_email,
            date,
            message,
            files,
            diff: None,
        })
    }

    fn changed_files(&self, hash: &str) -> Result<Vec<FileChange>, GitError> {
        let numstat = run_git(
            &self.workdir,
            &[
                "diff-tree",
                "--numstat",
                "--no-commit-id",
                "-r",
                "--root",
                "-M",
                hash,
            ],
        )?;
        let name_status = run_git(
            &self.workdir,
            &[
                "diff-tree",
                "--name-status",
                "--no-commit-id",
                "-r",
                "--root",
                "-M",
                hash,
            ],
        )?;

        let statuses: Vec<ChangeStatus> = name_status
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let code = line.split('\t').next().unwrap_or_default();
                ChangeStatus::parse(&code.chars().take(1).collect::<String>())
            })
            .collect();

        let mut files = Vec::new();
        for (index, line) in numstat
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
        {
            let Some(mut change) = parse_numstat_line(line) else {
                continue;
            };
            if let Some(status) = statuses.get(index) {
                change.status = *status;
            }
            files.push(change);
        }

        Ok(files)
    }

    fn commit_diff(&self, hash: &str) -> Result<String, GitError> {
        run_git(
            &self.workdir,
            &["show", "--format=", "--no-color", "--no-ext-diff", hash],
        )
    }
}

pub(crate) fn run_git(workdir: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = Command::new("git").arg("-C").arg(workdir).args(args).output()?;
    if !output.status.success() {
        return Err(GitError::Command {
            command: args.first().copied().unwrap_or_default().to_owned(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parses one `--numstat` line. Binary files report `-` counts, read as zero.
fn parse_numstat_line(line: &str) -> Option<FileChange> {
    let mut parts = line.splitn(3, '\t');
    let added = parts.next()?.trim();
    let removed = parts.next()?.trim();
    let raw_path = parts.next()?.trim();
    if raw_path.is_empty() {
        return None;
    }

    let renamed = raw_path.contains(" => ");
    Some(FileChange {
        path: resolve_rename_target(raw_path),
        additions: added.parse().unwrap_or(0),
        deletions: removed.parse().unwrap_or(0),
        status: if renamed {
            ChangeStatus::Renamed
        } else {
            ChangeStatus::Modified
        },
    })
}

/// `src/{old => new}/a.rs` becomes `src/new/a.rs`, `a.rs => b.rs` becomes `b.rs`.
fn resolve_rename_target(raw_path: &str) -> String {
    if let (Some(open), Some(close)) = (raw_path.find('{'), raw_path.rfind('}'))
        && open < close
    {
        let inner = &raw_path[open + 1..close];
        if let Some((_, target)) = inner.split_once(" => ") {
            let joined = format!("{}{}{}", &raw_path[..open], target, &raw_path[close + 1..]);
            return joined.replace("//", "/");
        }
    }

    match raw_path.split_once(" => ") {
        Some((_, target)) => target.trim().to_owned(),
        None => raw_path.to_owned(),
    }
}

fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_owned()
}

fn first_line(bytes: &[u8]) -> String {
    let line = bytes
        .split(|byte| *byte == b'\n')
        .next()
        .unwrap_or_default();
    decode_text(line)
}
