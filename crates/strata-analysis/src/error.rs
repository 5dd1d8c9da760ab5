use std::fmt;

use strata_core::DiffSourceError;
use strata_infer::InferError;
use strata_store::StoreError;
use thiserror::Error;

/// Which oracle call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleStage {
    Journey,
    Synthesis,
}

impl OracleStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Journey => "journey",
            Self::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for OracleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no commit history for {repo}; fetch the repository first")]
    NoHistory { repo: String },
    #[error("no selected file has history in {repo}: {}", .unknown.join(", "))]
    NoSelectedFiles { repo: String, unknown: Vec<String> },
    #[error("{}", context_window_diagnostic(.stage, .file_path.as_deref()))]
    ContextWindowExceeded {
        stage: OracleStage,
        file_path: Option<String>,
        message: String,
    },
    #[error("{stage} oracle failed for {}: {message}", .file_path.as_deref().unwrap_or("repository"))]
    Oracle {
        stage: OracleStage,
        file_path: Option<String>,
        message: String,
    },
    #[error("diff source failed for {file_path}: {source}")]
    DiffSource {
        file_path: String,
        #[source]
        source: DiffSourceError,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] strata_config::ConfigError),
    #[error("failed to load oracle provider: {0}")]
    OracleSetup(#[source] InferError),
    #[error("analysis run was cancelled")]
    Cancelled,
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl AnalysisError {
    /// True for every failure raised by an oracle, context window overflows
    /// included.
    pub fn is_oracle_error(&self) -> bool {
        matches!(
            self,
            Self::Oracle { .. } | Self::ContextWindowExceeded { .. }
        )
    }

    pub fn is_context_window_exceeded(&self) -> bool {
        matches!(self, Self::ContextWindowExceeded { .. })
    }

    pub(crate) fn from_oracle(stage: OracleStage, file_path: Option<&str>, err: InferError) -> Self {
        let file_path = file_path.map(str::to_owned);
        if err.is_context_window_exceeded() {
            return Self::ContextWindowExceeded {
                stage,
                file_path,
                message: err.to_string(),
            };
        }

        Self::Oracle {
            stage,
            file_path,
            message: err.to_string(),
        }
    }
}

fn context_window_diagnostic(stage: &OracleStage, file_path: Option<&str>) -> String {
    match file_path {
        Some(file_path) => format!(
            "context window exceeded for {file_path}: this file has too much history for the current model"
        ),
        None => format!(
            "context window exceeded during {stage}: the combined journeys are too large for the current model"
        ),
    }
}
