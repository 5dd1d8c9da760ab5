//! Pure steps of an analysis run: snapshot freshness, file selection, the
//! repository context line, verdict classification and lesson ranking.

use std::collections::HashSet;

use strata_core::{
    ArchitecturalLesson, DiffSnapshot, FileEvolution, FoundationEntry, HotspotEntry,
    JourneyVerdict, top_paths,
};

pub const DEFAULT_REINFORCEMENT: &str = "Stable core logic";
pub const CONTEXT_PREFIX: &str = "Active files in this repo: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFreshness {
    Fresh,
    Missing,
    StaleSchema,
    ForcedRefresh,
}

impl SnapshotFreshness {
    pub fn needs_fetch(self) -> bool {
        !matches!(self, Self::Fresh)
    }
}

pub fn snapshot_freshness(existing: Option<&DiffSnapshot>, force_refresh: bool) -> SnapshotFreshness {
    match existing {
        None => SnapshotFreshness::Missing,
        Some(_) if force_refresh => SnapshotFreshness::ForcedRefresh,
        Some(snapshot) if !snapshot.has_current_schema() => SnapshotFreshness::StaleSchema,
        Some(_) => SnapshotFreshness::Fresh,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSelection {
    /// Paths to analyse, in request order (or ranking order by default).
    pub files: Vec<String>,
    /// Requested paths with no history in the repository.
    pub unknown: Vec<String>,
}

/// Resolves the files a run analyses. Without an explicit, non-empty request
/// the `default_count` most changed files are taken.
pub fn select_target_files(
    evolutions: &[FileEvolution],
    requested: Option<&[String]>,
    default_count: usize,
) -> FileSelection {
    let requested = match requested {
        Some(requested) if !requested.is_empty() => requested,
        _ => {
            return FileSelection {
                files: top_paths(evolutions, default_count),
                unknown: Vec::new(),
            };
        }
    };

    let known: HashSet<&str> = evolutions
        .iter()
        .map(|evolution| evolution.path.as_str())
        .collect();
    let mut seen = HashSet::new();
    let mut selection = FileSelection::default();

    for path in requested {
        let path = path.trim();
        if path.is_empty() || !seen.insert(path) {
            continue;
        }
        if known.contains(path) {
            selection.files.push(path.to_owned());
        } else {
            selection.unknown.push(path.to_owned());
        }
    }

    selection
}

pub fn build_repository_context(evolutions: &[FileEvolution], limit: usize) -> String {
    format!("{CONTEXT_PREFIX}{}", top_paths(evolutions, limit).join(", "))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub foundations: Vec<FoundationEntry>,
    pub hotspots: Vec<HotspotEntry>,
}

pub fn classify_journeys(verdicts: &[JourneyVerdict]) -> Classification {
    let mut classification = Classification::default();
    for verdict in verdicts {
        if verdict.is_hotspot {
            classification.hotspots.push(HotspotEntry {
                path: verdict.path.clone(),
                evolutionary_lessons: verdict.evolutionary_lessons.clone(),
            });
        } else {
            classification.foundations.push(FoundationEntry {
                path: verdict.path.clone(),
                description: verdict.description.clone(),
                reinforcement: verdict
                    .reinforcement
                    .as_deref()
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                    .unwrap_or(DEFAULT_REINFORCEMENT)
                    .to_owned(),
            });
        }
    }
    classification
}

/// Stable sort by impact, highest first, then cap.
pub fn rank_lessons(mut lessons: Vec<ArchitecturalLesson>, max_lessons: usize) -> Vec<ArchitecturalLesson> {
    lessons.sort_by_key(|lesson| lesson.impact.rank());
    lessons.truncate(max_lessons);
    lessons
}
