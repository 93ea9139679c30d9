mod commands;
mod config;
mod conversation;
mod llm;
mod prompts;
mod streaming;
mod transcript;
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "healthpal")]
#[command(version)]
#[command(about = "Wellness chat assistant that streams replies from Gemini", long_about = None)]
struct Cli {
    /// Path to config.toml (default: ~/.healthpal/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model to use instead of the configured one
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question and print the streamed answer
    Ask {
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    /// Show the resolved configuration
    Config {
        /// Write a config file with the current settings
        #[arg(long)]
        write: bool,
    },
}

/// Where log output goes
enum LogTarget {
    /// The TUI owns the screen, so logs go to a file
    File,
    Stderr,
}

fn init_tracing(config: &Config, target: LogTarget, fallback: &str) -> Result<()> {
    let filter = EnvFilter::try_from_env("HEALTHPAL_LOG")
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match target {
        LogTarget::File => {
            fs::create_dir_all(&config.home).context("Failed to create .healthpal directory")?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(config.log_path())
                .context("Failed to open log file")?;
            subscriber.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        LogTarget::Stderr => {
            subscriber.with_writer(std::io::stderr).init();
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.model = model;
    }

    match cli.command {
        None => {
            init_tracing(&config, LogTarget::File, &config.log_level)?;
            tracing::info!(version = env!("CARGO_PKG_VERSION"), model = %config.model, "healthpal starting");
            commands::run_chat(&config).await
        }
        Some(Commands::Ask { prompt }) => {
            init_tracing(&config, LogTarget::Stderr, "warn")?;
            commands::ask(&config, &prompt.join(" ")).await
        }
        Some(Commands::Config { write }) => commands::show_config(&config, write),
    }
}
