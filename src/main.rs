use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use validate_schematron::cli::{Cli, VerbosityLevel};
use validate_schematron::config::{Config, ConfigManager};
use validate_schematron::error::Result;
use validate_schematron::file_discovery::PathExpander;
use validate_schematron::output::Output;
use validate_schematron::schema_validator::LibXml2SchemaEngine;
use validate_schematron::schematron::SchematronCompiler;
use validate_schematron::validator::{BatchReport, ValidationOrchestrator};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    if let Err(message) = cli.validate() {
        eprintln!("Error: {}", message);
        return ExitCode::from(2);
    }

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(config: &Config) {
    let default_level = if config.validation.debug {
        "debug"
    } else if config.output.verbose {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn verbosity(config: &Config) -> VerbosityLevel {
    if config.output.quiet {
        VerbosityLevel::Quiet
    } else if config.output.verbose {
        VerbosityLevel::Verbose
    } else {
        VerbosityLevel::Normal
    }
}

/// Returns whether every document passed
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = ConfigManager::load_config(&cli)
        .await
        .context("failed to load configuration")?;
    init_tracing(&config);
    debug!(?config, "effective configuration");

    let output = Output::new(verbosity(&config), config.output.format.into());
    let paths = cli.paths.clone();

    // The libxml2 engine and the blocking HTTP client must stay off the async runtime.
    let outcome = tokio::task::spawn_blocking(move || validate_inputs(&config, &paths))
        .await
        .context("validation task failed")?;

    match outcome {
        Ok(report) => {
            print!("{}", output.format_report(&report)?);
            Ok(report.is_success())
        }
        Err(error) => {
            println!("{}", output.format_fatal(&error));
            Ok(false)
        }
    }
}

fn validate_inputs(config: &Config, paths: &[String]) -> Result<BatchReport> {
    let documents = PathExpander::new().expand(paths)?;

    let schema_engine = LibXml2SchemaEngine::from_policy(
        ConfigManager::catalog_policy(config),
        ConfigManager::http_client_config(config),
    )?;
    let transform_engine = Arc::new(ConfigManager::transform_engine(config));
    let compiler = SchematronCompiler::new(
        ConfigManager::cache_store(config),
        Arc::clone(&transform_engine),
    );

    let orchestrator = ValidationOrchestrator::new(
        Arc::new(schema_engine),
        Arc::new(compiler),
        transform_engine,
    )
    .with_workers(ConfigManager::get_worker_count(config));

    orchestrator.validate_batch(&documents, config.schematron.rules.as_deref())
}
