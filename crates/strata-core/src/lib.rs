use serde::{Deserialize, Serialize};

mod diff;
mod evolution;
mod git;
mod time;

pub use diff::{DiffSource, DiffSourceError, GitDiffSource};
pub use evolution::{aggregate, top_paths};
pub use git::{GitError, GitHistory, HistoryOptions};
pub use time::{Timestamp, now_timestamp, parse_timestamp, timestamp_from_unix_secs};

/// Current layout of [`DiffSnapshot`] records. Bump whenever the snapshot
/// payload changes shape so cached entries are refetched.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum ChangeStatus {
    Added,
    #[default]
    Modified,
    Deleted,
    Renamed,
}

impl ChangeStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "added" | "add" | "a" => Self::Added,
            "deleted" | "removed" | "delete" | "d" => Self::Deleted,
            "renamed" | "copied" | "rename" | "r" => Self::Renamed,
            _ => Self::Modified,
        }
    }
}

impl From<String> for ChangeStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    #[serde(default)]
    pub additions: u32,
    #[serde(default)]
    pub deletions: u32,
    #[serde(default)]
    pub status: ChangeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommitStats {
    pub files_changed: u32,
    pub additions: u32,
    pub deletions: u32,
}

impl CommitStats {
    pub fn from_files(files: &[FileChange]) -> Self {
        files.iter().fold(Self::default(), |mut stats, file| {
            stats.files_changed = stats.files_changed.saturating_add(1);
            stats.additions = stats.additions.saturating_add(file.additions);
            stats.deletions = stats.deletions.saturating_add(file.deletions);
            stats
        })
    }
}

/// One commit as captured at fetch time. Never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub hash: String,
    pub author: String,
    #[serde(default, alias = "email", skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
    #[serde(with = "time::rfc3339")]
    pub date: Timestamp,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub files: Vec<FileChange>,
    #[serde(default)]
    pub stats: CommitStats,
    #[serde(default, alias = "fullDiff", skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRef {
    pub hash: String,
    #[serde(with = "time::rfc3339")]
    pub date: Timestamp,
    pub message: String,
    pub additions: u32,
    pub deletions: u32,
}

/// Per-file view over the commit history. Always derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEvolution {
    pub path: String,
    pub change_count: usize,
    #[serde(with = "time::rfc3339")]
    pub last_changed: Timestamp,
    pub authors: Vec<String>,
    pub commits: Vec<CommitRef>,
}

/// Cached diff of one file at one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSnapshot {
    pub file_path: String,
    pub commit_hash: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub diff: String,
    #[serde(with = "time::rfc3339")]
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_tag: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl DiffSnapshot {
    pub fn has_current_schema(&self) -> bool {
        self.schema_tag == Some(SNAPSHOT_SCHEMA_VERSION)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }

    pub fn accumulate(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.input_tokens.saturating_add(self.output_tokens);
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyVerdict {
    pub path: String,
    pub description: String,
    pub is_hotspot: bool,
    #[serde(default)]
    pub evolutionary_lessons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reinforcement: Option<String>,
    #[serde(default)]
    pub tokens: TokenUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    #[default]
    Medium,
    Low,
}

impl Impact {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Maps free-text impact labels onto the closed set. Anything
    /// unrecognised lands on [`Impact::Medium`].
    pub fn normalize(raw: &str) -> Self {
        let value = raw.trim().to_ascii_lowercase();
        if value.contains("high") || value.contains("critical") {
            return Self::High;
        }
        if value.contains("low") || value.contains("minor") {
            return Self::Low;
        }
        Self::Medium
    }

    /// Sort key, higher impact first.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchitecturalLesson {
    pub title: String,
    pub lesson: String,
    pub impact: Impact,
    #[serde(default)]
    pub affected_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedPiece {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisVerdict {
    pub summary: String,
    #[serde(default)]
    pub architectural_lessons: Vec<ArchitecturalLesson>,
    #[serde(default)]
    pub named_pieces: Vec<NamedPiece>,
    #[serde(default)]
    pub tokens: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundationEntry {
    pub path: String,
    pub description: String,
    pub reinforcement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotspotEntry {
    pub path: String,
    pub evolutionary_lessons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionAnalysisResult {
    #[serde(alias = "repoUrl")]
    pub repo: String,
    #[serde(
        default,
        with = "time::rfc3339_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub generated_at: Option<Timestamp>,
    #[serde(default)]
    pub file_evolutions: Vec<FileEvolution>,
    #[serde(default)]
    pub foundations: Vec<FoundationEntry>,
    #[serde(default)]
    pub hotspots: Vec<HotspotEntry>,
    #[serde(default)]
    pub architectural_lessons: Vec<ArchitecturalLesson>,
    #[serde(default)]
    pub named_pieces: Vec<NamedPiece>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tokens: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl EvolutionAnalysisResult {
    /// Result shape used before any full analysis exists: fresh statistics,
    /// empty narrative.
    pub fn statistics_only(repo: impl Into<String>, file_evolutions: Vec<FileEvolution>) -> Self {
        Self {
            repo: repo.into(),
            generated_at: None,
            file_evolutions,
            foundations: Vec::new(),
            hotspots: Vec::new(),
            architectural_lessons: Vec::new(),
            named_pieces: Vec::new(),
            summary: String::new(),
            tokens: TokenUsage::default(),
            model_id: None,
        }
    }
}
