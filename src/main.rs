//! Stratus CLI entrypoint.
//!
//! This is the main entrypoint for the stratus command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use stratus_reconcile::cli::{Cli, Commands, OutputFormatter};
use stratus_reconcile::config::{
    ClusterConfig, ConfigHasher, ConfigParser, ConfigValidator, OutputBackend, ValidationResult,
    find_config_file,
};
use stratus_reconcile::error::{ConfigError, Result, StratusError};
use stratus_reconcile::output::{
    DocumentSink, LocalDocumentSink, S3DocumentSink, generate_holder_id,
};
use stratus_reconcile::planner::TaskGraph;
use stratus_reconcile::provider::{HttpProvider, InMemoryProvider, ProviderAdapter, ProviderFixture};
use stratus_reconcile::reconciler::Reconciler;
use stratus_reconcile::target::{DirectApply, EmissionTarget, Target, TargetKind};

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the verbosity flag when set.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();
    let fixture = cli.fixture.as_deref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Graph => cmd_graph(config_path, &formatter),
        Commands::Plan => cmd_plan(config_path, fixture, &formatter).await,
        Commands::Apply { yes } => {
            let (config, _) = load_config(config_path)?;
            config.engine.require_target(TargetKind::Direct)?;
            cmd_apply(&config, fixture, yes, &formatter).await
        }
        Commands::Emit { out } => {
            let (config, _) = load_config(config_path)?;
            cmd_emit(&config, fixture, out.as_deref(), &formatter).await
        }
        Commands::Reconcile { yes, out } => {
            let (config, _) = load_config(config_path)?;
            info!("Reconciling with the {} target", config.engine.target);
            match config.engine.target {
                TargetKind::Direct => cmd_apply(&config, fixture, yes, &formatter).await,
                TargetKind::Declarative => cmd_emit(&config, fixture, out.as_deref(), &formatter).await,
            }
        }
    }
}

/// Validate configuration.
fn cmd_validate(config_path: Option<&Path>, show_warnings: bool, formatter: &OutputFormatter) -> Result<()> {
    let (config, validation) = load_config(config_path)?;

    // Cycles are only visible once the graph is built
    TaskGraph::build(&config.task_set()?)?;

    eprintln!("{}", formatter.format_validation(&validation, show_warnings));
    eprintln!("Configuration summary:");
    eprintln!("  Cluster: {}", config.cluster.name);
    eprintln!("  Target: {}", config.engine.target);
    eprintln!("  Shared resources: {}", config.shared.len());
    eprintln!("  Compute groups: {}", config.groups.len());
    Ok(())
}

/// Print the execution order.
fn cmd_graph(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let (config, _) = load_config(config_path)?;
    let graph = TaskGraph::build(&config.task_set()?)?;
    eprintln!("{}", formatter.format_graph(&graph));
    Ok(())
}

/// Show the pass plan.
async fn cmd_plan(config_path: Option<&Path>, fixture: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let (config, _) = load_config(config_path)?;
    let tasks = config.task_set()?;
    let provider = create_provider(fixture)?;

    let plan = Reconciler::new(&provider, &tasks)?.plan().await?;
    eprintln!("{}", formatter.format_plan(&plan));
    Ok(())
}

/// Reconcile through provider calls.
async fn cmd_apply(
    config: &ClusterConfig,
    fixture: Option<&Path>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let tasks = config.task_set()?;
    let provider = create_provider(fixture)?;
    let sink = create_sink(config, None).await?;

    let plan = Reconciler::new(&provider, &tasks)?.plan().await?;
    if plan.is_noop() && !plan.has_blockers() {
        eprintln!("{}", formatter.format_plan(&plan));
        return Ok(());
    }
    eprintln!("{}", formatter.format_plan(&plan));

    // Confirm
    if !auto_approve {
        eprint!("Do you want to apply this plan? [y/N]: ");
        std::io::stderr().flush()?;
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    // A fresh reconciler, so nothing discovered while planning carries over.
    let mut reconciler = Reconciler::new(&provider, &tasks)?;
    let lock = sink.acquire_lock(&generate_holder_id()).await?;
    let mut target = Target::Direct(DirectApply::new(&provider, config.engine.retry.policy()));
    let result = reconciler.run(&mut target).await;

    if let Err(e) = sink.release_lock(&lock.lock_id).await {
        error!("Failed to release pass lock {}: {e}", lock.lock_id);
    }

    let report = result?;
    eprintln!("{}", formatter.format_report(&report));
    Ok(())
}

/// Render the declarative document.
async fn cmd_emit(
    config: &ClusterConfig,
    fixture: Option<&Path>,
    out: Option<&Path>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let tasks = config.task_set()?;
    let provider = create_provider(fixture)?;
    let sink = create_sink(config, out).await?;

    let mut reconciler = Reconciler::new(&provider, &tasks)?;
    let mut target = Target::Declarative(EmissionTarget::new(&provider, &tasks));
    let report = reconciler.run(&mut target).await?;
    debug!("Emission pass {} covered {} tasks", report.pass_id, report.outcomes.len());

    let document = target
        .into_document()?
        .ok_or_else(|| StratusError::internal("Declarative target produced no document"))?;

    let changed = match sink.stored_digest().await? {
        Some(stored) if ConfigHasher::hashes_match(&stored, &document.digest) => {
            info!("Document unchanged ({})", ConfigHasher::short_hash(&stored));
            false
        }
        _ => {
            sink.write(&document).await?;
            true
        }
    };

    eprintln!("{}", formatter.format_emitted(&document, &sink.location(), changed));
    Ok(())
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = config_path {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()?;
    find_config_file(cwd)
}

/// Loads, overrides, and validates the configuration.
fn load_config(config_path: Option<&Path>) -> Result<(ClusterConfig, ValidationResult)> {
    let config_file = resolve_config_path(config_path)?;

    let parser = ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let validation = ConfigValidator::new().validate(&config)?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }
    Ok((config, validation))
}

/// Creates the provider adapter.
fn create_provider(fixture: Option<&Path>) -> Result<Box<dyn ProviderAdapter>> {
    if let Some(path) = fixture {
        info!("Using provider fixture: {}", path.display());
        let fixture = ProviderFixture::load(path)?;
        return Ok(Box::new(InMemoryProvider::from_fixture(fixture)));
    }

    let credentials = ConfigParser::provider_credentials()?;
    debug!("Using provider API at {}", credentials.url);
    Ok(Box::new(HttpProvider::new(&credentials.url, &credentials.token)?))
}

/// Creates the document sink, preferring an explicit output directory.
async fn create_sink(config: &ClusterConfig, out: Option<&Path>) -> Result<Box<dyn DocumentSink>> {
    if let Some(dir) = out {
        return Ok(Box::new(LocalDocumentSink::with_base_dir(dir)));
    }

    let output = &config.engine.output;
    match output.backend {
        OutputBackend::Local => {
            let sink = match &output.path {
                Some(path) => LocalDocumentSink::with_base_dir(path),
                None => LocalDocumentSink::new()?,
            };
            Ok(Box::new(sink))
        }
        OutputBackend::S3 => {
            let bucket = output.bucket.as_deref().ok_or_else(|| {
                StratusError::Config(ConfigError::validation(
                    "S3 bucket name is required when using S3 backend",
                    "engine.output.bucket",
                ))
            })?;
            let sink = S3DocumentSink::new(bucket, output.prefix.as_deref(), output.region.as_deref()).await?;
            Ok(Box::new(sink))
        }
    }
}
