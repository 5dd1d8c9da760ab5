use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use strata_config::{AnalysisConfig, ensure_workspace_config};
use strata_core::{
    CommitRef, DiffSnapshot, DiffSource, EvolutionAnalysisResult, FileEvolution, JourneyVerdict,
    SNAPSHOT_SCHEMA_VERSION, SynthesisVerdict, TokenUsage, aggregate, now_timestamp,
};
use strata_infer::{
    JourneyOracle, JourneyRequest, JourneySnapshot, LoadedOracle, ProviderOverrides,
    SynthesisOracle, SynthesisRequest, load_oracle_from_env_or_mock,
};
use strata_store::{CommitStore, EvolutionResultStore, EvolutionStore, StoreError};
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{AnalysisError, OracleStage};
use crate::locks::RunLocks;
use crate::staging::{
    Classification, build_repository_context, classify_journeys, rank_lessons,
    select_target_files, snapshot_freshness,
};

/// Tunables for one analyzer, resolved from `[analysis]` in the workspace
/// config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSettings {
    pub default_file_count: usize,
    pub context_file_count: usize,
    pub journey_concurrency: usize,
    pub oracle_timeout: Duration,
    pub max_lessons: usize,
    pub max_named_pieces: usize,
}

impl From<&AnalysisConfig> for AnalysisSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            default_file_count: config.default_file_count,
            context_file_count: config.context_file_count,
            journey_concurrency: config.effective_journey_concurrency(),
            oracle_timeout: Duration::from_secs(config.effective_oracle_timeout_secs()),
            max_lessons: config.max_lessons,
            max_named_pieces: config.max_named_pieces,
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvolutionRunRequest {
    pub repo: String,
    /// `None` (or an empty list) analyses the top-ranked files.
    pub selected_files: Option<Vec<String>>,
    pub force_refresh: bool,
    /// Overrides the loaded model for this run.
    pub model_id: Option<String>,
}

impl EvolutionRunRequest {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            selected_files: None,
            force_refresh: false,
            model_id: None,
        }
    }
}

/// What the read path serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisView {
    pub has_full_analysis: bool,
    pub result: EvolutionAnalysisResult,
}

/// Serves the latest stored analysis with freshly aggregated file
/// evolutions. Never calls an oracle and never writes.
pub fn load_analysis<S>(store: &S, repo: &str) -> Result<AnalysisView, AnalysisError>
where
    S: CommitStore + EvolutionResultStore + ?Sized,
{
    let file_evolutions = match store.list_commits(repo) {
        Ok(commits) => aggregate(&commits),
        Err(StoreError::RepoNotFetched(_)) => Vec::new(),
        Err(err) => return Err(err.into()),
    };

    match store.get_evolution_result(repo)? {
        Some(mut result) => {
            result.file_evolutions = file_evolutions;
            Ok(AnalysisView {
                has_full_analysis: true,
                result,
            })
        }
        None => Ok(AnalysisView {
            has_full_analysis: false,
            result: EvolutionAnalysisResult::statistics_only(repo, file_evolutions),
        }),
    }
}

struct JourneyJob {
    index: usize,
    request: JourneyRequest,
}

/// Drives a staged analysis run: snapshot reconciliation, per-file journeys,
/// cross-file synthesis, then one wholesale write of the composed result.
///
/// The analyzer owns a tokio runtime and must not be driven from inside
/// another runtime.
pub struct EvolutionAnalyzer {
    journey_oracle: Arc<dyn JourneyOracle>,
    synthesis_oracle: Arc<dyn SynthesisOracle>,
    diff_source: Arc<dyn DiffSource>,
    provider_name: String,
    model_name: String,
    settings: AnalysisSettings,
    runtime: Runtime,
    locks: RunLocks,
}

impl EvolutionAnalyzer {
    pub fn new(
        workspace_root: impl AsRef<Path>,
        diff_source: Arc<dyn DiffSource>,
        overrides: ProviderOverrides,
    ) -> Result<Self, AnalysisError> {
        let workspace_root = workspace_root.as_ref();
        let config = ensure_workspace_config(workspace_root)?;
        let loaded = load_oracle_from_env_or_mock(workspace_root, overrides)
            .map_err(AnalysisError::OracleSetup)?;

        Self::new_with_oracles(AnalysisSettings::from(&config.analysis), loaded, diff_source)
    }

    pub fn new_with_oracles(
        settings: AnalysisSettings,
        loaded: LoadedOracle,
        diff_source: Arc<dyn DiffSource>,
    ) -> Result<Self, AnalysisError> {
        let concurrency = settings.journey_concurrency.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(concurrency)
            .enable_all()
            .build()
            .map_err(|err| AnalysisError::Runtime(format!("failed to build analysis runtime: {err}")))?;

        Ok(Self {
            journey_oracle: loaded.journey,
            synthesis_oracle: loaded.synthesis,
            diff_source,
            provider_name: loaded.provider_name,
            model_name: loaded.model_name,
            settings: AnalysisSettings {
                journey_concurrency: concurrency,
                ..settings
            },
            runtime,
            locks: RunLocks::new(),
        })
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn load_analysis<S>(&self, store: &S, repo: &str) -> Result<AnalysisView, AnalysisError>
    where
        S: CommitStore + EvolutionResultStore + ?Sized,
    {
        load_analysis(store, repo)
    }

    /// Runs a full analysis and persists the composed result. Any failure
    /// aborts the run before the result store is touched.
    pub fn run<S>(
        &self,
        store: &S,
        request: &EvolutionRunRequest,
        cancel: &CancellationToken,
    ) -> Result<EvolutionAnalysisResult, AnalysisError>
    where
        S: EvolutionStore + ?Sized,
    {
        let repo = request.repo.as_str();
        let repo_lock = self.locks.lock_for(repo);
        let _run_guard = repo_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let commits = match store.list_commits(repo) {
            Ok(commits) if !commits.is_empty() => commits,
            Ok(_) | Err(StoreError::RepoNotFetched(_)) => {
                return Err(AnalysisError::NoHistory {
                    repo: repo.to_owned(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let evolutions = aggregate(&commits);
        let model_id = request
            .model_id
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(&self.model_name)
            .to_owned();

        let selection = select_target_files(
            &evolutions,
            request.selected_files.as_deref(),
            self.settings.default_file_count,
        );
        for path in &selection.unknown {
            tracing::warn!(repo, file = %path, "selected file has no history, skipping");
        }
        if selection.files.is_empty() {
            return Err(AnalysisError::NoSelectedFiles {
                repo: repo.to_owned(),
                unknown: selection.unknown,
            });
        }
        let context = build_repository_context(&evolutions, self.settings.context_file_count);

        tracing::info!(
            repo,
            commits = commits.len(),
            files = selection.files.len(),
            model = %model_id,
            force_refresh = request.force_refresh,
            "starting evolution analysis"
        );

        let by_path: HashMap<&str, &FileEvolution> = evolutions
            .iter()
            .map(|evolution| (evolution.path.as_str(), evolution))
            .collect();

        let mut jobs = Vec::with_capacity(selection.files.len());
        for path in &selection.files {
            ensure_not_cancelled(cancel)?;
            let Some(evolution) = by_path.get(path.as_str()) else {
                continue;
            };

            let snapshots =
                self.reconcile_snapshots(store, repo, evolution, request.force_refresh, &model_id)?;
            jobs.push(JourneyJob {
                index: jobs.len(),
                request: JourneyRequest {
                    file_path: evolution.path.clone(),
                    snapshots: snapshots
                        .into_iter()
                        .map(|snapshot| JourneySnapshot {
                            message: snapshot.message,
                            diff: snapshot.diff,
                            date: snapshot.timestamp,
                        })
                        .collect(),
                    context: context.clone(),
                    model_id: model_id.clone(),
                },
            });
        }

        ensure_not_cancelled(cancel)?;
        let verdicts = self.runtime.block_on(run_journey_jobs(
            self.journey_oracle.clone(),
            jobs,
            self.settings.journey_concurrency,
            self.settings.oracle_timeout,
            cancel.clone(),
        ))?;

        let mut tokens = TokenUsage::default();
        for verdict in &verdicts {
            tokens.accumulate(verdict.tokens);
        }
        let Classification {
            foundations,
            hotspots,
        } = classify_journeys(&verdicts);

        ensure_not_cancelled(cancel)?;
        let synthesis = self.runtime.block_on(run_synthesis(
            self.synthesis_oracle.clone(),
            SynthesisRequest {
                repo: repo.to_owned(),
                verdicts,
                model_id: model_id.clone(),
            },
            self.settings.oracle_timeout,
            cancel.clone(),
        ))?;
        tokens.accumulate(synthesis.tokens);

        let SynthesisVerdict {
            summary,
            architectural_lessons,
            mut named_pieces,
            ..
        } = synthesis;
        named_pieces.truncate(self.settings.max_named_pieces);

        let result = EvolutionAnalysisResult {
            repo: repo.to_owned(),
            generated_at: Some(now_timestamp()),
            file_evolutions: evolutions,
            foundations,
            hotspots,
            architectural_lessons: rank_lessons(architectural_lessons, self.settings.max_lessons),
            named_pieces,
            summary,
            tokens,
            model_id: Some(model_id),
        };

        ensure_not_cancelled(cancel)?;
        store.put_evolution_result(repo, &result)?;

        tracing::info!(
            repo,
            hotspots = result.hotspots.len(),
            foundations = result.foundations.len(),
            lessons = result.architectural_lessons.len(),
            tokens = result.tokens.total_tokens,
            "stored evolution analysis"
        );
        Ok(result)
    }

    /// Brings the cached snapshots of one file up to date and returns them
    /// oldest first.
    fn reconcile_snapshots<S>(
        &self,
        store: &S,
        repo: &str,
        evolution: &FileEvolution,
        force_refresh: bool,
        model_id: &str,
    ) -> Result<Vec<DiffSnapshot>, AnalysisError>
    where
        S: EvolutionStore + ?Sized,
    {
        let mut snapshots = Vec::with_capacity(evolution.commits.len());
        let mut pending: Vec<&CommitRef> = Vec::new();

        for commit in evolution.commits.iter().rev() {
            let existing = store.get_snapshot(repo, &evolution.path, &commit.hash)?;
            match (snapshot_freshness(existing.as_ref(), force_refresh), existing) {
                (freshness, Some(snapshot)) if !freshness.needs_fetch() => snapshots.push(snapshot),
                _ => pending.push(commit),
            }
        }

        if !pending.is_empty() {
            let hashes: Vec<String> = pending.iter().map(|commit| commit.hash.clone()).collect();
            let diffs = self
                .diff_source
                .fetch_file_diffs(repo, &evolution.path, &hashes)
                .map_err(|source| AnalysisError::DiffSource {
                    file_path: evolution.path.clone(),
                    source,
                })?;

            for commit in pending {
                let snapshot = DiffSnapshot {
                    file_path: evolution.path.clone(),
                    commit_hash: commit.hash.clone(),
                    message: commit.message.clone(),
                    diff: lookup_diff(&diffs, &commit.hash),
                    timestamp: commit.date,
                    schema_tag: Some(SNAPSHOT_SCHEMA_VERSION),
                    model_id: Some(model_id.to_owned()),
                };
                store.put_snapshot(repo, &snapshot)?;
                snapshots.push(snapshot);
            }

            tracing::debug!(
                repo,
                file = %evolution.path,
                hashes = hashes.len(),
                cached = evolution.commits.len().saturating_sub(hashes.len()),
                "refreshed diff snapshots"
            );
        }

        // Same-second commits keep their history order.
        let history_order: HashMap<&str, usize> = evolution
            .commits
            .iter()
            .rev()
            .enumerate()
            .map(|(position, commit)| (commit.hash.as_str(), position))
            .collect();
        snapshots.sort_by_key(|snapshot| {
            (
                snapshot.timestamp,
                history_order
                    .get(snapshot.commit_hash.as_str())
                    .copied()
                    .unwrap_or(usize::MAX),
            )
        });
        Ok(snapshots)
    }
}

fn lookup_diff(diffs: &BTreeMap<String, String>, hash: &str) -> String {
    diffs
        .get(hash)
        .or_else(|| diffs.get(&hash.to_ascii_lowercase()))
        .cloned()
        .unwrap_or_default()
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), AnalysisError> {
    if cancel.is_cancelled() {
        return Err(AnalysisError::Cancelled);
    }
    Ok(())
}

/// Journey calls bounded by a semaphore. Verdicts come back in job order and
/// the first failure abandons the remaining calls.
async fn run_journey_jobs(
    oracle: Arc<dyn JourneyOracle>,
    jobs: Vec<JourneyJob>,
    concurrency: usize,
    call_timeout: Duration,
    cancel: CancellationToken,
) -> Result<Vec<JourneyVerdict>, AnalysisError> {
    let total = jobs.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set = JoinSet::new();

    for job in jobs {
        let oracle = oracle.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();

        join_set.spawn(async move {
            let JourneyJob { index, request } = job;
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return (
                        index,
                        Err(AnalysisError::Runtime("journey semaphore closed".to_owned())),
                    );
                }
            };
            if cancel.is_cancelled() {
                return (index, Err(AnalysisError::Cancelled));
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
                called = timeout(call_timeout, oracle.analyze_journey(&request)) => match called {
                    Ok(Ok(mut verdict)) => {
                        verdict.path = request.file_path.clone();
                        tracing::debug!(
                            file = %request.file_path,
                            hotspot = verdict.is_hotspot,
                            tokens = verdict.tokens.total_tokens,
                            "journey verdict received"
                        );
                        Ok(verdict)
                    }
                    Ok(Err(err)) => Err(AnalysisError::from_oracle(
                        OracleStage::Journey,
                        Some(&request.file_path),
                        err,
                    )),
                    Err(_) => Err(AnalysisError::Oracle {
                        stage: OracleStage::Journey,
                        file_path: Some(request.file_path.clone()),
                        message: format!("timed out after {}s", call_timeout.as_secs()),
                    }),
                },
            };
            (index, outcome)
        });
    }

    let mut slots: Vec<Option<JourneyVerdict>> = vec![None; total];
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, Ok(verdict))) => slots[index] = Some(verdict),
            Ok((_, Err(err))) => {
                join_set.abort_all();
                if let AnalysisError::Oracle { file_path, .. }
                | AnalysisError::ContextWindowExceeded { file_path, .. } = &err
                {
                    tracing::warn!(file = ?file_path, error = %err, "journey analysis failed");
                }
                return Err(err);
            }
            Err(err) => {
                join_set.abort_all();
                return Err(AnalysisError::Runtime(format!("journey task join error: {err}")));
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| {
            slot.ok_or_else(|| AnalysisError::Runtime("journey verdict missing".to_owned()))
        })
        .collect()
}

async fn run_synthesis(
    oracle: Arc<dyn SynthesisOracle>,
    request: SynthesisRequest,
    call_timeout: Duration,
    cancel: CancellationToken,
) -> Result<SynthesisVerdict, AnalysisError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
        called = timeout(call_timeout, oracle.synthesize(&request)) => match called {
            Ok(Ok(verdict)) => Ok(verdict),
            Ok(Err(err)) => {
                tracing::warn!(repo = %request.repo, error = %err, "synthesis failed");
                Err(AnalysisError::from_oracle(OracleStage::Synthesis, None, err))
            }
            Err(_) => Err(AnalysisError::Oracle {
                stage: OracleStage::Synthesis,
                file_path: None,
                message: format!("timed out after {}s", call_timeout.as_secs()),
            }),
        },
    }
}
