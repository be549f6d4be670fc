//! CLI entry point (A7): parses flags, initializes structured logging, loads
//! config, and runs the server.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// Adaptive admission control reverse proxy for LLM inference APIs.
#[derive(Parser, Debug)]
#[command(name = "cerebras-admission-proxy", about, version)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Overrides `log_level` from the config file.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match cerebras_admission_proxy::config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config from {}: {err}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = cerebras_admission_proxy::server::run(config).await {
        tracing::error!(error = %err, "server exited with error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
