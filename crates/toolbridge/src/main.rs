//! toolbridge - connect to tool endpoints over HTTP or subprocess stdio.
//!
//! Main entry point for the toolbridge CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{call, connect, health, servers, session, tools};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// toolbridge - connect to tool endpoints over HTTP or subprocess stdio
#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Development mode: allow loop-back and private network addresses
    #[arg(long, global = true)]
    pub dev: bool,

    /// Config directory (default: platform config dir)
    #[arg(long, global = true, env = "TOOLBRIDGE_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to an endpoint, show what it offers, disconnect
    Connect(connect::ConnectArgs),

    /// Call one tool on an endpoint
    Call(call::CallArgs),

    /// List an endpoint's tools
    Tools(tools::ToolsArgs),

    /// Check endpoints and report their health
    Health(health::HealthArgs),

    /// List configured servers
    Servers(servers::ServersArgs),

    /// Interactive session against one long-lived connection table
    Session(session::SessionArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing: console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "toolbridge=debug,toolbridge_mcp=debug,toolbridge_config=debug,info"
    } else {
        "toolbridge=info,toolbridge_mcp=warn,warn"
    };

    let log_dir = cli
        .config_dir
        .clone()
        .or_else(toolbridge_config::user_config_dir)
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "toolbridge.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "toolbridge=trace,toolbridge_mcp=trace,toolbridge_config=trace,info",
                )),
        )
        .init();

    let ctx = commands::Context::load(cli.config_dir.as_deref(), cli.json, cli.verbose, cli.dev)?;

    match cli.command {
        Commands::Connect(args) => connect::run(args, &ctx).await,
        Commands::Call(args) => call::run(args, &ctx).await,
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::Health(args) => health::run(args, &ctx).await,
        Commands::Servers(args) => servers::run(args, &ctx).await,
        Commands::Session(args) => session::run(args, &ctx).await,
    }
}
