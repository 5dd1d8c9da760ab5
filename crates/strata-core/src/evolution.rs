use std::collections::HashMap;

use crate::{Commit, CommitRef, FileChange, FileEvolution};

/// Folds a commit stream into per-file change histories, ranked by how often
/// each file changed. Ties keep the order in which files were first seen.
pub fn aggregate(commits: &[Commit]) -> Vec<FileEvolution> {
    let mut evolutions: Vec<FileEvolution> = Vec::new();
    let mut slot_by_path: HashMap<&str, usize> = HashMap::new();

    for commit in commits {
        for change in &commit.files {
            let slot = match slot_by_path.get(change.path.as_str()) {
                Some(slot) => *slot,
                None => {
                    evolutions.push(FileEvolution {
                        path: change.path.clone(),
                        change_count: 0,
                        last_changed: commit.date,
                        authors: Vec::new(),
                        commits: Vec::new(),
                    });
                    slot_by_path.insert(change.path.as_str(), evolutions.len() - 1);
                    evolutions.len() - 1
                }
            };

            record_change(&mut evolutions[slot], commit, change);
        }
    }

    // `sort_by` is stable, which keeps first-seen order among equal counts.
    evolutions.sort_by(|left, right| right.change_count.cmp(&left.change_count));
    evolutions
}

/// Paths of the `limit` most frequently changed files.
pub fn top_paths(evolutions: &[FileEvolution], limit: usize) -> Vec<String> {
    evolutions
        .iter()
        .take(limit)
        .map(|evolution| evolution.path.clone())
        .collect()
}

fn record_change(evolution: &mut FileEvolution, commit: &Commit, change: &FileChange) {
    evolution.change_count += 1;

    if commit.date > evolution.last_changed {
        evolution.last_changed = commit.date;
    }

    if !evolution.authors.iter().any(|author| author == &commit.author) {
        evolution.authors.push(commit.author.clone());
    }

    evolution.commits.push(CommitRef {
        hash: commit.hash.clone(),
        date: commit.date,
        message: commit.message.clone(),
        additions: change.additions,
        deletions: change.deletions,
    });
}
