mod analyzer;
mod error;
mod locks;
mod staging;

pub use analyzer::{
    AnalysisSettings, AnalysisView, EvolutionAnalyzer, EvolutionRunRequest, load_analysis,
};
pub use error::{AnalysisError, OracleStage};
pub use locks::RunLocks;
pub use staging::{
    CONTEXT_PREFIX, Classification, DEFAULT_REINFORCEMENT, FileSelection, SnapshotFreshness,
    build_repository_context, classify_journeys, rank_lessons, select_target_files,
    snapshot_freshness,
};
pub use tokio_util::sync::CancellationToken;
