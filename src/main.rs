//! Weir CLI entry point.
//!
//! `serve` runs the policy service; `query` and `observe` talk to a running
//! one; `check-config` validates configuration without binding anything.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use weir::config::{TagBootstrap, WeirConfig};
use weir::kernel::authority::{InMemoryLabelAuthority, LabelAuthority};
use weir::kernel::manager::WeirManager;
use weir::kernel::store::{TagCreation, TagStore};
use weir::logging::{self, LoggingGuard};
use weir::server::cache::HostCache;
use weir::server::egress::EgressPolicy;
use weir::server::{send_observation, send_query, PolicyServer};

/// Weir: label-based egress policy service.
#[derive(Parser)]
#[command(name = "weir", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the policy service on the query and DNS sockets.
    Serve {
        /// Config file (defaults to `$WEIR_CONFIG_PATH` or `./weir.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Send one request line to a running service and print the decision.
    Query {
        /// Request line, e.g. `socket;203.0.113.5;10050;4242;42`.
        line: String,
        /// Query socket (defaults to the configured one).
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Send one observation line to a running service.
    Observe {
        /// Observation line, e.g. `getaddrinfo;203.0.113.5;example.com`.
        line: String,
        /// DNS socket (defaults to the configured one).
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Load and validate configuration, then exit.
    CheckConfig {
        /// Config file (defaults to `$WEIR_CONFIG_PATH` or `./weir.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => handle_serve(config.as_deref()).await,
        Command::Query { line, socket } => handle_query(&line, socket).await,
        Command::Observe { line, socket } => handle_observe(&line, socket).await,
        Command::CheckConfig { config } => handle_check_config(config.as_deref()),
    }
}

/// Run the service until interrupted.
async fn handle_serve(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = WeirConfig::load(config_path).context("failed to load configuration")?;
    config.validate()?;
    let _logging_guard = init_logging(&config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "weir starting");

    let store = Arc::new(TagStore::new());
    let authority: Arc<dyn LabelAuthority> = Arc::new(InMemoryLabelAuthority::new());
    let manager = WeirManager::new(Arc::clone(&store), authority, config.namespace.naming);
    bootstrap_tags(&manager, &config.tags)?;

    let policy = EgressPolicy::new(Arc::clone(manager.store()), Arc::new(HostCache::new()));
    let server = PolicyServer::bind(&config.sockets, policy)?;
    info!(
        query = %server.query_path().display(),
        dns = %server.dns_path().display(),
        tags = store.tag_count(),
        "weir ready"
    );

    tokio::select! {
        () = server.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("shutdown signal received");
        }
    }
    Ok(())
}

fn init_logging(config: &WeirConfig) -> anyhow::Result<Option<LoggingGuard>> {
    let level = config.service.log_level.as_str();
    match &config.service.logs_dir {
        Some(dir) => Ok(Some(logging::init_production(dir, level)?)),
        None => {
            logging::init_cli(level);
            Ok(None)
        }
    }
}

fn bootstrap_tags(manager: &WeirManager, tags: &[TagBootstrap]) -> anyhow::Result<()> {
    for tag in tags {
        let (owner, request) = tag.to_request();
        let creation = manager
            .create_tag(&owner, None, &request)
            .with_context(|| format!("failed to bootstrap tag {}:{}", tag.owner, tag.name))?;
        match creation {
            TagCreation::Created { name, value } => {
                info!(tag = %name, %value, "bootstrap tag created");
            }
            TagCreation::AlreadyExists { name, .. } => {
                debug!(tag = %name, "bootstrap tag already present");
            }
        }
    }
    Ok(())
}

fn socket_or_configured(
    socket: Option<PathBuf>,
    pick: impl FnOnce(WeirConfig) -> PathBuf,
) -> anyhow::Result<PathBuf> {
    match socket {
        Some(path) => Ok(path),
        None => Ok(pick(WeirConfig::load(None)?)),
    }
}

/// Print the decision code (`0` allow, `1` deny) for one request line.
async fn handle_query(line: &str, socket: Option<PathBuf>) -> anyhow::Result<()> {
    logging::init_cli("warn");
    let path = socket_or_configured(socket, |c| c.sockets.query)?;
    let decision = send_query(&path, line).await?;
    println!("{decision}");
    Ok(())
}

/// Deliver one observation line.
async fn handle_observe(line: &str, socket: Option<PathBuf>) -> anyhow::Result<()> {
    logging::init_cli("warn");
    let path = socket_or_configured(socket, |c| c.sockets.dns)?;
    send_observation(&path, line).await?;
    Ok(())
}

/// Validate configuration and print a summary.
fn handle_check_config(config_path: Option<&Path>) -> anyhow::Result<()> {
    logging::init_cli("warn");
    let config = WeirConfig::load(config_path).context("failed to load configuration")?;
    config.validate()?;
    println!("config OK");
    println!("  query socket: {}", config.sockets.query.display());
    println!("  dns socket:   {}", config.sockets.dns.display());
    println!("  naming:       {:?}", config.namespace.naming);
    println!("  bootstrap tags: {}", config.tags.len());
    Ok(())
}
