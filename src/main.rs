use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use apicheck::cli::{
    Cli, Command, ExitStatus, FeatureCommand, ImportArgs, ImportCommand, OutputFormat, ProgressObserver, RunOptions,
    render_text,
};
use apicheck::collections::ApiCollection;
use apicheck::config::Settings;
use apicheck::engine::{ApiTestEngine, ApiTestRun, CancelHandle, NoopObserver, RunConfig, RunObserver};
use apicheck::environment::ApiEnvironment;
use apicheck::error::{FeatureSyntaxError, LoadError, UnsupportedFormatError};
use apicheck::http::ApiHttpClient;
use apicheck::import_export::{self, ExportFormat};
use apicheck::karate::{KarateConverter, KarateFeatureParser, KarateOrchestrator, TagFilter};
use apicheck::storage;
use clap::Parser;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "APICHECK_LOG";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match Settings::discover(cli.config.as_deref(), Path::new(".")) {
        Ok(settings) => settings,
        Err(err) => {
            init_tracing(cli.verbose, None);
            eprintln!("error: {err}");
            return ExitCode::from(ExitStatus::InvalidInput.code());
        }
    };
    init_tracing(cli.verbose, settings.log.as_deref());

    let cancel = CancelHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    match dispatch(cli.command, &settings, &cancel).await {
        Ok(status) => ExitCode::from(status.code()),
        Err(err) => {
            eprintln!("error: {err:#}");
            let invalid = err.chain().any(|cause| {
                cause.is::<LoadError>() || cause.is::<FeatureSyntaxError>() || cause.is::<UnsupportedFormatError>()
            });
            let status = if invalid { ExitStatus::InvalidInput } else { ExitStatus::Error };
            ExitCode::from(status.code())
        }
    }
}

/// `APICHECK_LOG`, then `RUST_LOG`, then the verbosity flag or the settings
/// file, then `warn`.
fn init_tracing(verbose: u8, configured: Option<&str>) {
    let fallback = match verbose {
        0 => configured.unwrap_or("warn"),
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(command: Command, settings: &Settings, cancel: &CancelHandle) -> Result<ExitStatus> {
    match command {
        Command::Run(args) => {
            let collection = storage::load_collection(&args.collection)?;
            let Prepared { engine, environment, config } = prepare(&args.options, settings)?;
            let run = engine
                .run_with(&collection, environment.as_ref(), &config, &cancel.signal(), observer(&args.options))
                .await;
            finish(&run, &args.options)
        }
        Command::Feature(FeatureCommand::Run { file, tags, options }) => {
            let text = storage::load_text(&file)?;
            let feature = KarateFeatureParser::new()
                .parse(&text)
                .with_context(|| format!("in `{}`", file.display()))?;
            let Prepared { engine, environment, config } = prepare(&options, settings)?;
            let run = KarateOrchestrator::new(engine)
                .run_with(
                    &feature,
                    &TagFilter::parse(&tags),
                    environment.as_ref(),
                    &config,
                    &cancel.signal(),
                    observer(&options),
                )
                .await;
            finish(&run, &options)
        }
        Command::Feature(FeatureCommand::ToCollection { file, output }) => {
            let text = storage::load_text(&file)?;
            let feature = KarateFeatureParser::new()
                .parse(&text)
                .with_context(|| format!("in `{}`", file.display()))?;
            let collection = KarateConverter::new().to_collection(&feature);
            if collection.needs_review() {
                tracing::warn!("some steps could not be converted and are kept as passthrough");
            }
            write_collection(&collection, output.as_deref())?;
            Ok(ExitStatus::Passed)
        }
        Command::Feature(FeatureCommand::FromCollection { collection, output }) => {
            let collection = storage::load_collection(&collection)?;
            let text = import_export::export_collection(&collection, ExportFormat::Karate)
                .map_err(anyhow::Error::msg)?;
            emit(&text, output.as_deref())?;
            Ok(ExitStatus::Passed)
        }
        Command::Import(ImportCommand::Postman(args)) => {
            let text = storage::load_text(&args.file)?;
            write_collection(&import_export::import_postman(&text)?, args.output.as_deref())?;
            Ok(ExitStatus::Passed)
        }
        Command::Import(ImportCommand::Openapi(args)) => {
            let text = storage::load_text(&args.file)?;
            write_collection(&import_export::import_openapi(&text)?, args.output.as_deref())?;
            Ok(ExitStatus::Passed)
        }
        Command::Import(ImportCommand::PostmanEnv(ImportArgs { file, output })) => {
            let text = storage::load_text(&file)?;
            let environment = import_export::import_postman_environment(&text)?;
            match output {
                Some(path) => storage::save_environment(&path, &environment)?,
                None => println!("{}", serde_json::to_string_pretty(&environment)?),
            }
            Ok(ExitStatus::Passed)
        }
    }
}

struct Prepared {
    engine: ApiTestEngine,
    environment: Option<ApiEnvironment>,
    config: RunConfig,
}

fn prepare(options: &RunOptions, settings: &Settings) -> Result<Prepared> {
    let environment = match &options.env {
        Some(path) => Some(storage::load_environment(path)?),
        None => None,
    };
    let client = ApiHttpClient::new(&settings.client).context("building the HTTP client")?;
    Ok(Prepared {
        engine: ApiTestEngine::new(client),
        environment: options.environment(environment),
        config: options.run_config(settings),
    })
}

fn observer(options: &RunOptions) -> &'static dyn RunObserver {
    match options.format {
        OutputFormat::Text => &ProgressObserver,
        OutputFormat::Json => &NoopObserver,
    }
}

fn finish(run: &ApiTestRun, options: &RunOptions) -> Result<ExitStatus> {
    match options.format {
        OutputFormat::Text => print!("{}", render_text(run)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(run)?),
    }
    if let Some(path) = &options.report {
        storage::save_report(path, run)?;
    }
    Ok(ExitStatus::from(run.status()))
}

fn write_collection(collection: &ApiCollection, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => storage::save_collection(path, collection)?,
        None => println!("{}", serde_json::to_string_pretty(collection)?),
    }
    Ok(())
}

fn emit(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => storage::save_text(path, text)?,
        None => print!("{text}"),
    }
    Ok(())
}
