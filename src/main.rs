use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use migrate_doctor::agent::{FixAgent, FixRequest};
use migrate_doctor::cache::ResponseCache;
use migrate_doctor::config::Config;
use migrate_doctor::error::ProviderError;
use migrate_doctor::llm::{Completion, CompletionRequest, OpenRouterProvider, ReasoningProvider};
use migrate_doctor::types::{ErrorCategory, FailureSignature};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "MIGRATE_DOCTOR_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "migrate-doctor",
    about = "Diagnose and repair build failures left behind by a framework migration",
    version
)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Produce a fix for one failure and print it as JSON
    Fix(FixArgs),
    /// Inspect or empty the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Args, Debug)]
struct FixArgs {
    /// Project root (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// The error message reported by the build
    #[arg(long)]
    message: String,
    #[arg(long)]
    file: Option<String>,
    #[arg(long)]
    line: Option<u32>,
    #[arg(long)]
    column: Option<u32>,
    /// Error category, e.g. import, template, type-system
    #[arg(long, default_value = "unknown")]
    category: String,
    /// File holding the full build output
    #[arg(long)]
    output_file: Option<PathBuf>,
    /// File holding extra project context for the reasoning provider
    #[arg(long)]
    context_file: Option<PathBuf>,
    /// Skip reading and writing the response cache
    #[arg(long)]
    no_cache: bool,
    /// Override the iteration budget
    #[arg(long)]
    max_iterations: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Print entry count, size and age range as JSON
    Stats {
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
    /// Delete every cached entry
    Clear {
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

/// Stands in when no API key is configured, so cache and fast path still work.
struct Unconfigured;

#[async_trait]
impl ReasoningProvider for Unconfigured {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, ProviderError> {
        Err(ProviderError::MissingApiKey)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    match cli.command {
        Commands::Fix(args) => run_fix(args, config).await,
        Commands::Cache { action } => run_cache(action, &config),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run_fix(args: FixArgs, mut config: Config) -> Result<ExitCode> {
    let root = canonical_root(&args.root)?;
    if let Some(max) = args.max_iterations {
        config.max_iterations = max;
    }

    let mut signature = FailureSignature::new(args.message, ErrorCategory::parse(&args.category));
    if let Some(file) = args.file {
        signature = signature.with_location(file, args.line, args.column);
    }
    if let Some(path) = &args.output_file {
        let output = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read build output from {}", path.display()))?;
        signature = signature.with_raw_output(output);
    }

    let mut request = FixRequest::new(signature);
    if let Some(path) = &args.context_file {
        let context = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project context from {}", path.display()))?;
        request = request.with_context(context);
    }
    if args.no_cache {
        request = request.without_cache();
    }

    let provider: Arc<dyn ReasoningProvider> = match OpenRouterProvider::from_config(&config) {
        Ok(provider) => Arc::new(provider),
        Err(err) => {
            tracing::warn!(error = %err, "reasoning provider unavailable; only cache and fast path can answer");
            Arc::new(Unconfigured)
        }
    };

    let agent = FixAgent::new(root, config, provider);
    let result = agent.request_fix(&request).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_cache(action: CacheAction, config: &Config) -> Result<ExitCode> {
    match action {
        CacheAction::Stats { root } => {
            let cache = ResponseCache::new(&canonical_root(&root)?, &config.cache);
            let stats = cache.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        CacheAction::Clear { root } => {
            let cache = ResponseCache::new(&canonical_root(&root)?, &config.cache);
            let removed = cache.clear()?;
            println!("{}", serde_json::json!({ "removed": removed }));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn canonical_root(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("Project root {} does not exist", path.display()))
}
