use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{insights, serve, show_config, ServeParams};

#[derive(Parser)]
#[command(
    name = "trendcast",
    version,
    about = "Analytics cache, trend insights and realtime snapshot broadcasting",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); falls back to LOG_FORMAT
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analytics HTTP server
    Serve {
        /// TOML configuration file (environment is used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON fixture backing the aggregation store
        #[arg(short, long)]
        fixture: Option<PathBuf>,

        /// Bind address, e.g. 127.0.0.1:3004
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Compute trend insights from a JSON array of weekly points
    Insights {
        /// Input file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config {
        /// TOML configuration file (environment is used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_format = cli
        .log_format
        .or_else(|| std::env::var("LOG_FORMAT").ok())
        .unwrap_or_else(|| String::from("text"));
    setup_tracing(&log_format, cli.verbose)?;

    match cli.command {
        Commands::Serve {
            config,
            fixture,
            bind,
        } => {
            tracing::info!(
                config = ?config,
                fixture = ?fixture,
                bind = ?bind,
                "Starting serve command"
            );
            serve(ServeParams {
                config_path: config,
                fixture,
                bind,
            })
            .await?;
        }

        Commands::Insights { input } => {
            tracing::debug!(input = %input.display(), "Starting insights command");
            insights(input).await?;
        }

        Commands::Config { config } => {
            show_config(config)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("trendcast=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL")
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trendcast=info,warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
