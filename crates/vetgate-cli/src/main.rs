use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vetgate_core::{Collaborators, GithubContext, ScanOrchestrator, ScanSettings};

#[derive(Parser, Debug)]
#[command(
    name = "vetgate",
    author,
    version,
    about = "Differential dependency-scan gate for CI"
)]
struct Cli {
    /// TOML settings file; VETGATE_* environment variables override it
    #[arg(long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scan pipeline for the triggering CI event
    Run {
        /// Policy filter suite, overriding the embedded default
        #[arg(long, value_name = "FILE")]
        policy: Option<PathBuf>,

        /// Scanner binary to use instead of searching PATH
        #[arg(long = "scanner-path", value_name = "FILE")]
        scanner_path: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run {
        policy: None,
        scanner_path: None,
    }) {
        Commands::Run {
            policy,
            scanner_path,
        } => run(cli.config.as_deref(), policy, scanner_path).await?,
    }
    Ok(())
}

async fn run(
    config_file: Option<&Path>,
    policy: Option<PathBuf>,
    scanner_path: Option<PathBuf>,
) -> Result<()> {
    let mut settings = load_settings(config_file)?;
    if policy.is_some() {
        settings.policy = policy;
    }
    if scanner_path.is_some() {
        settings.scanner_path = scanner_path;
    }

    let context = GithubContext::from_env().context("failed to read the CI environment")?;
    let collaborators = Collaborators::production(&settings, &context)?;
    let orchestrator = ScanOrchestrator::new(settings, context, collaborators);

    match orchestrator.run().await {
        Ok(outcome) => {
            let report = outcome
                .sarif
                .as_deref()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            println!("{}", serde_json::json!({ "report": report }));
            Ok(())
        }
        Err(err) if err.is_policy_violation() => {
            tracing::error!(error = %err, "policy violation");
            Err(err.into())
        }
        Err(err) => Err(err).context("scan pipeline failed"),
    }
}

fn load_settings(config_file: Option<&Path>) -> Result<ScanSettings> {
    let mut builder = config::Config::builder();
    if let Some(path) = config_file {
        builder = builder.add_source(config::File::from(path.to_path_buf()));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("VETGATE")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("trusted_registries")
            .with_list_parse_key("exclude_patterns"),
    );
    builder
        .build()
        .context("failed to load vetgate settings")?
        .try_deserialize()
        .context("invalid vetgate settings")
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
