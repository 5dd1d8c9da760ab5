mod cli;
mod commands;

use anyhow::{Context, Result};
use strata_analysis::CancellationToken;
use strata_config::{CONFIG_FILE_NAME, STRATA_DIR_NAME, ensure_workspace_config, validate_config};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{AnalysisCommands, Cli, Commands, LogFormat, parse_cli};

fn main() -> Result<()> {
    let cli = parse_cli();
    init_tracing(cli.log_format);
    run(cli)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Human => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn run(cli: Cli) -> Result<()> {
    std::fs::create_dir_all(&cli.workspace).with_context(|| {
        format!("failed to create workspace {}", cli.workspace.display())
    })?;
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    let config = ensure_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load or create workspace config at {}",
            workspace
                .join(STRATA_DIR_NAME)
                .join(CONFIG_FILE_NAME)
                .display()
        )
    })?;
    for warning in validate_config(&config) {
        tracing::warn!(code = warning.code, "{}", warning.message);
    }

    let mut out = std::io::stdout().lock();
    match cli.command {
        Commands::Fetch(args) => commands::run_fetch(&workspace, &config, args, &mut out),
        Commands::ImportCommits(args) => commands::run_import_commits(&workspace, args, &mut out),
        Commands::Repos(args) => commands::run_repos(&workspace, args, &mut out),
        Commands::Files(args) => commands::run_files(&workspace, args, &mut out),
        Commands::Analysis(AnalysisCommands::Show(args)) => {
            commands::run_analysis_show(&workspace, args, &mut out)
        }
        Commands::Analysis(AnalysisCommands::Run(args)) => {
            let cancel = CancellationToken::new();
            cancel_on_interrupt(cancel.clone());
            commands::run_analysis(&workspace, args, &cancel, &mut out)
        }
        Commands::Snapshots(args) => commands::run_snapshots(&workspace, args, &mut out),
    }
}

/// Cancels `cancel` on Ctrl-C. The watcher thread dies with the process.
fn cancel_on_interrupt(cancel: CancellationToken) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::warn!(error = %err, "interrupt handler unavailable");
                return;
            }
        };

        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling analysis run");
                cancel.cancel();
            }
        });
    });
}
