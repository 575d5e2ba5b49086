use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use doorbell::cli::{Cli, Commands, ConfigAction};
use doorbell::config::Config;
use doorbell::service::{RunOutcome, ServiceCoordinator};
use doorbell::stream::MediaEngine;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Exit code when a subsystem faulted after startup.
const EXIT_SUBSYSTEM_FAULT: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = doorbell::logging::init_tracing(cli.verbose, cli.quiet, cli.log_file.as_deref())
    {
        eprintln!("doorbell: {e}");
    }

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    match cli.command() {
        Commands::Run => run_service(cli),
        Commands::Pipeline => {
            let config = load_config(cli)?;
            let description = doorbell::stream::build(&config.stream_config()?)?;
            if let Some(degraded) = description.degraded {
                warn!("{degraded}");
            }
            println!("{}", description.graph);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config {
            action: ConfigAction::Dump,
        } => {
            print!("{}", Config::dump_template()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            print!("{}", load_config(cli)?.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut <Cli as CommandFactory>::command(), "doorbell", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_service(cli: &Cli) -> Result<ExitCode> {
    let config = load_config(cli)?;
    let stream = config.stream_config()?;
    let engine = media_engine()?;

    info!(
        "Smart Video Doorbell {} ({} engine)",
        doorbell::version_string(),
        engine.name()
    );

    let mut coordinator =
        ServiceCoordinator::for_stream(engine, stream).with_features(config.features());
    if let Some(interval) = cli.poll_interval {
        coordinator = coordinator.with_poll_interval(interval);
    }

    match coordinator.run()? {
        RunOutcome::ShutdownRequested => {
            info!("Doorbell service exited cleanly");
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::SubsystemFailed { subsystem, detail } => {
            error!("Doorbell service stopped: {subsystem} failed: {detail}");
            Ok(ExitCode::from(EXIT_SUBSYSTEM_FAULT))
        }
    }
}

/// File (explicit path must exist, default path may be missing), then
/// environment, then command-line flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::default(),
        },
    };
    config = config.with_env_overrides()?;
    cli.apply_overrides(&mut config);
    Ok(config)
}

#[cfg(feature = "gst")]
fn media_engine() -> Result<Arc<dyn MediaEngine>> {
    Ok(Arc::new(doorbell::stream::GstEngine::new()))
}

#[cfg(not(feature = "gst"))]
fn media_engine() -> Result<Arc<dyn MediaEngine>> {
    anyhow::bail!(
        "doorbell was built without a media engine (media engine: {}); rebuild with --features gst",
        doorbell::defaults::media_engine()
    )
}
