mod config;
mod continuation;
mod engine;
mod runner;
mod scheduler;
mod status;
mod store;
mod task;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{AgentConfig, ReleaseVersion};
use continuation::ContinuationSupervisor;
use engine::Engine;
use runner::SystemRunner;
use std::path::PathBuf;
use std::sync::Arc;
use store::{Database, Options, TaskQueue};
use task::{HandlerContext, HandlerRegistry};

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Stamped by the image build; absent in local builds
const COMMIT: Option<&str> = option_env!("EDGEBOX_COMMIT");
const BUILD_DATE: Option<&str> = option_env!("EDGEBOX_BUILD_DATE");

#[derive(Debug, Parser)]
#[command(name = "edgebox-agent", about = "Edgebox device agent", disable_version_flag = true)]
struct Cli {
    /// Print version, commit and build date
    #[arg(short = 'v', long)]
    version: bool,

    /// Print the database location and exit
    #[arg(long)]
    database: bool,

    /// Service name used in logs
    #[arg(long)]
    name: Option<String>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the SQLite database path
    #[arg(long)]
    database_path: Option<PathBuf>,

    #[arg(long, value_enum)]
    release: Option<ReleaseVersion>,

    /// Pause between ticks, in milliseconds
    #[arg(long)]
    tick_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Insert a task into the queue and exit
    Enqueue {
        /// Task kind, e.g. install_edgeapp
        kind: String,
        /// JSON arguments
        args: Option<String>,
    },
}

fn print_version() {
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Commit: {}", COMMIT.unwrap_or("unknown"));
    println!("Build date: {}", BUILD_DATE.unwrap_or("unknown"));
}

fn load_config(cli: &Cli) -> Result<AgentConfig> {
    let mut config = AgentConfig::load(cli.config.as_deref())?;
    if let Some(name) = &cli.name {
        config.name = name.clone();
    }
    if let Some(path) = &cli.database_path {
        config.database_path = path.clone();
    }
    if let Some(release) = cli.release {
        config.release = release;
    }
    if let Some(ms) = cli.tick_interval_ms {
        config.timing.tick_interval_ms = ms;
    }
    Ok(config)
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown requested, finishing current tick");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    if cli.version {
        print_version();
        return Ok(());
    }

    let config = Arc::new(load_config(&cli)?);
    if cli.database {
        println!("Database: {}", config.database_path.display());
        return Ok(());
    }

    let db = Arc::new(
        Database::open(&config.database_path)
            .with_context(|| format!("open database {}", config.database_path.display()))?,
    );

    if let Some(Command::Enqueue { kind, args }) = &cli.command {
        let id = db.enqueue(kind, args.as_deref())?;
        println!("Enqueued task {} ({})", id, kind);
        return Ok(());
    }

    info!("{} agent starting", config.name);
    info!("  Release: {}", config.release.as_str());
    info!("  Database: {}", config.database_path.display());
    info!("  Workspace: {}", config.paths.ws_path.display());

    let options = Options::new(db.clone());
    let ctx = HandlerContext {
        config: config.clone(),
        runner: Arc::new(SystemRunner::new()),
        options: options.clone(),
        continuations: ContinuationSupervisor::new(options),
    };
    let registry = Arc::new(HandlerRegistry::standard());
    info!("  Handlers: {}", registry.kinds().join(", "));

    let mut engine = Engine::new(db, registry, ctx);
    engine.run(shutdown_signal()).await;

    Ok(())
}
