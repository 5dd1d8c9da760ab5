use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use strata_analysis::{CancellationToken, EvolutionAnalyzer, EvolutionRunRequest, load_analysis};
use strata_config::StrataConfig;
use strata_core::{Commit, EvolutionAnalysisResult, GitDiffSource, GitHistory, HistoryOptions, aggregate};
use strata_infer::ProviderOverrides;
use strata_store::{CommitStore, SnapshotCache, SqliteStore};

use crate::cli::{
    AnalysisRunArgs, AnalysisShowArgs, FetchArgs, FilesArgs, ImportCommitsArgs, OutputFormat,
    ReposArgs, SnapshotsArgs,
};

#[derive(Debug, Deserialize)]
struct ImportedRepository {
    #[serde(default)]
    commits: Vec<Commit>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredHistory<'a> {
    repo_id: &'a str,
    commits: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryOutput<'a> {
    repo_id: &'a str,
    fetched_at: i64,
    commits: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisViewOutput<'a> {
    has_full_analysis: bool,
    result: &'a EvolutionAnalysisResult,
}

pub fn run_fetch(
    workspace: &Path,
    config: &StrataConfig,
    args: FetchArgs,
    out: &mut impl Write,
) -> Result<()> {
    let history = GitHistory::open(&args.repo)
        .with_context(|| format!("failed to open git repository at {}", args.repo.display()))?;
    let repo_id = args
        .repo_id
        .unwrap_or_else(|| history.workdir().display().to_string());

    let commits = history
        .read_commits(HistoryOptions {
            max_commits: args.max_commits.unwrap_or(config.history.max_commits),
            include_diffs: config.history.include_diffs,
        })
        .context("failed to read git history")?;

    let store = open_store(workspace)?;
    store
        .replace_commits(&repo_id, &commits)
        .with_context(|| format!("failed to store commits for {repo_id}"))?;

    tracing::info!(repo = %repo_id, commits = commits.len(), "stored commit history");
    write_json(
        out,
        &StoredHistory {
            repo_id: &repo_id,
            commits: commits.len(),
        },
    )
}

pub fn run_import_commits(
    workspace: &Path,
    args: ImportCommitsArgs,
    out: &mut impl Write,
) -> Result<()> {
    let raw = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let repositories: BTreeMap<String, ImportedRepository> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse commit dump {}", args.file.display()))?;

    let store = open_store(workspace)?;
    let mut imported = Vec::with_capacity(repositories.len());
    for (repo_id, repository) in &repositories {
        store
            .replace_commits(repo_id, &repository.commits)
            .with_context(|| format!("failed to store commits for {repo_id}"))?;
        tracing::info!(repo = %repo_id, commits = repository.commits.len(), "imported commit history");
        imported.push(StoredHistory {
            repo_id,
            commits: repository.commits.len(),
        });
    }

    write_json(out, &imported)
}

pub fn run_repos(workspace: &Path, args: ReposArgs, out: &mut impl Write) -> Result<()> {
    let store = open_store(workspace)?;
    let repositories = store
        .list_repositories()
        .context("failed to list stored repositories")?;

    match args.output {
        OutputFormat::Json => {
            let rows: Vec<_> = repositories
                .iter()
                .map(|record| RepositoryOutput {
                    repo_id: &record.repo,
                    fetched_at: record.fetched_at,
                    commits: record.commit_count,
                })
                .collect();
            write_json(out, &rows)
        }
        OutputFormat::Table => {
            writeln!(out, "{:>7}  {:>12}  REPOSITORY", "COMMITS", "FETCHED AT")?;
            for record in &repositories {
                writeln!(
                    out,
                    "{:>7}  {:>12}  {}",
                    record.commit_count, record.fetched_at, record.repo
                )?;
            }
            Ok(())
        }
    }
}

pub fn run_files(workspace: &Path, args: FilesArgs, out: &mut impl Write) -> Result<()> {
    let store = open_store(workspace)?;
    let commits = store
        .list_commits(&args.repo_id)
        .with_context(|| format!("no stored history for {}", args.repo_id))?;
    let mut evolutions = aggregate(&commits);
    evolutions.truncate(args.limit);

    match args.output {
        OutputFormat::Json => write_json(out, &evolutions),
        OutputFormat::Table => {
            writeln!(out, "{:>7}  {:<25}  {:>7}  PATH", "CHANGES", "LAST CHANGED", "AUTHORS")?;
            for evolution in &evolutions {
                writeln!(
                    out,
                    "{:>7}  {:<25}  {:>7}  {}",
                    evolution.change_count,
                    evolution.last_changed.to_rfc3339(),
                    evolution.authors.len(),
                    evolution.path
                )?;
            }
            Ok(())
        }
    }
}

pub fn run_analysis_show(
    workspace: &Path,
    args: AnalysisShowArgs,
    out: &mut impl Write,
) -> Result<()> {
    let store = open_store(workspace)?;
    let view = load_analysis(&store, &args.repo_id)
        .with_context(|| format!("failed to load analysis for {}", args.repo_id))?;

    write_json(
        out,
        &AnalysisViewOutput {
            has_full_analysis: view.has_full_analysis,
            result: &view.result,
        },
    )
}

pub fn run_analysis(
    workspace: &Path,
    args: AnalysisRunArgs,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    let checkout = resolve_checkout(&args)?;
    let analyzer = EvolutionAnalyzer::new(
        workspace,
        Arc::new(GitDiffSource::new(checkout)),
        ProviderOverrides {
            provider: args.inference_provider,
            model: args.model.clone(),
            endpoint: args.inference_endpoint.clone(),
            api_key_env: args.inference_api_key_env.clone(),
        },
    )
    .context("failed to initialize evolution analyzer")?;

    tracing::info!(
        provider = analyzer.provider_name(),
        model = analyzer.model_name(),
        "loaded analysis oracle"
    );

    let store = open_store(workspace)?;
    let request = EvolutionRunRequest {
        selected_files: (!args.files.is_empty()).then(|| args.files.clone()),
        force_refresh: args.force_refresh,
        ..EvolutionRunRequest::new(args.repo_id.clone())
    };

    let result = analyzer
        .run(&store, &request, cancel)
        .with_context(|| format!("evolution analysis failed for {}", args.repo_id))?;
    write_json(out, &result)
}

pub fn run_snapshots(workspace: &Path, args: SnapshotsArgs, out: &mut impl Write) -> Result<()> {
    let store = open_store(workspace)?;
    let snapshots = store
        .list_snapshots(&args.repo_id, &args.file)
        .with_context(|| format!("failed to list snapshots for {}", args.file))?;
    write_json(out, &snapshots)
}

fn resolve_checkout(args: &AnalysisRunArgs) -> Result<PathBuf> {
    if let Some(checkout) = &args.checkout {
        return Ok(checkout.clone());
    }

    let candidate = PathBuf::from(&args.repo_id);
    if candidate.is_dir() {
        return Ok(candidate);
    }
    bail!(
        "repository id {} is not a local directory, pass --checkout <path>",
        args.repo_id
    )
}

fn open_store(workspace: &Path) -> Result<SqliteStore> {
    SqliteStore::open(workspace)
        .with_context(|| format!("failed to open store under {}", workspace.display()))
}

fn write_json(out: &mut impl Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("failed to encode output")?;
    writeln!(out)?;
    Ok(())
}
