use std::ffi::OsStr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use strata_config::InferenceProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid output format '{other}', expected one of: table, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct FetchArgs {
    #[arg(long, default_value = ".", help = "Path inside the git checkout to read")]
    pub repo: PathBuf,

    #[arg(
        long,
        help = "Identifier to store the history under (defaults to the checkout path)"
    )]
    pub repo_id: Option<String>,

    #[arg(
        long,
        help = "Newest commits to keep (defaults to history.max_commits)"
    )]
    pub max_commits: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ImportCommitsArgs {
    #[arg(help = "JSON file keyed by repository id: {\"<id>\": {\"commits\": [...]}}")]
    pub file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ReposArgs {
    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct FilesArgs {
    #[arg(long, help = "Repository id used when the history was stored")]
    pub repo_id: String,

    #[arg(long, default_value_t = 20, help = "Number of ranked files to list")]
    pub limit: usize,

    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct AnalysisShowArgs {
    #[arg(long, help = "Repository id used when the history was stored")]
    pub repo_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct AnalysisRunArgs {
    #[arg(long, help = "Repository id used when the history was stored")]
    pub repo_id: String,

    #[arg(
        long = "file",
        value_name = "PATH",
        help = "File to analyse (repeatable, defaults to the most changed files)"
    )]
    pub files: Vec<String>,

    #[arg(long, help = "Refetch every diff snapshot even when cached")]
    pub force_refresh: bool,

    #[arg(
        long,
        help = "Git checkout that diffs are read from (defaults to the repository id as a path)"
    )]
    pub checkout: Option<PathBuf>,

    #[arg(long, help = "Model id override for this run")]
    pub model: Option<String>,

    #[arg(long, value_parser = parse_inference_provider)]
    pub inference_provider: Option<InferenceProviderKind>,

    #[arg(long)]
    pub inference_endpoint: Option<String>,

    #[arg(long)]
    pub inference_api_key_env: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum AnalysisCommands {
    /// Print the stored analysis with fresh file statistics
    Show(AnalysisShowArgs),
    /// Run a full evolution analysis and store the result
    Run(AnalysisRunArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct SnapshotsArgs {
    #[arg(long, help = "Repository id used when the history was stored")]
    pub repo_id: String,

    #[arg(long, help = "Repository-relative file path")]
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Read git history from a checkout and replace the stored commits
    Fetch(FetchArgs),
    /// Import commit histories from a JSON dump
    ImportCommits(ImportCommitsArgs),
    /// List stored repositories with their fetch time
    Repos(ReposArgs),
    /// List files ranked by how often they changed
    Files(FilesArgs),
    /// Show or run the evolution analysis
    #[command(subcommand)]
    Analysis(AnalysisCommands),
    /// List cached diff snapshots for one file
    Snapshots(SnapshotsArgs),
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "STRATA evolutionary file-journey analysis")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .strata/"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_inference_provider(value: &str) -> Result<InferenceProviderKind, String> {
    value.parse()
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse()
}
