//! CLI entry point for stream-warden
//!
//! Parses command line arguments, initializes logging and runs the daemon
//! until Ctrl-C.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use stream_warden::config::JobEntry;
use stream_warden::{Config, Daemon};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "stream-warden.toml";

/// stream-warden - supervise and auto-restart stream capture jobs
#[derive(Parser, Debug)]
#[command(name = "stream-warden")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Add a job as NAME=URL (repeatable)
    #[arg(short, long = "job", value_parser = parse_job_arg)]
    jobs: Vec<(String, String)>,

    /// Restart delay in minutes for jobs given with --job (0 disables auto-restart)
    #[arg(short, long, default_value_t = 1)]
    delay: u32,

    /// Start jobs given with --job right away
    #[arg(long, default_value = "false")]
    autostart: bool,

    /// Do not serve the status API
    #[arg(long, default_value = "false")]
    no_server: bool,
}

fn parse_job_arg(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
            Ok((name.trim().to_string(), url.trim().to_string()))
        }
        _ => Err(format!("expected NAME=URL, got '{}'", raw)),
    }
}

/// Load the config file. A missing file at the default location means
/// "all defaults"; an explicitly named file must exist.
fn load_config(path: &Path) -> Result<Config, String> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        tracing::info!("{} not found, using defaults", DEFAULT_CONFIG);
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate().map_err(|e| e.to_string())?;
        return Ok(config);
    }
    Config::load(path).map_err(|e| format!("{}: {}", path.display(), e))
}

fn apply_args(config: &mut Config, args: &Args) {
    for (name, url) in &args.jobs {
        config.jobs.push(JobEntry {
            name: name.clone(),
            url: url.clone(),
            delay_minutes: args.delay,
            quality: None,
            autostart: args.autostart,
        });
    }
    if args.no_server {
        config.server.enabled = false;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("stream-warden starting, config file: {}", args.config.display());

    let mut config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    apply_args(&mut config, &args);

    let daemon = match Daemon::new(config) {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!("Failed to initialize daemon: {}", e);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("Recording to {}", daemon.config.output.root.display());

    if let Err(e) = daemon.run().await {
        tracing::error!("Daemon error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
