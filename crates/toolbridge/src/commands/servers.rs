//! `toolbridge servers`: list configured servers.

use anyhow::Result;
use clap::Args;

use super::{Context, print_json, truncate};

/// Arguments for `toolbridge servers`.
#[derive(Args, Debug)]
pub struct ServersArgs {
    /// Include disabled servers
    #[arg(long)]
    pub all: bool,
}

/// Run `toolbridge servers`.
pub async fn run(args: ServersArgs, ctx: &Context) -> Result<()> {
    let servers: Vec<_> = ctx
        .config
        .servers
        .iter()
        .filter(|s| args.all || s.enabled)
        .collect();

    if ctx.json_output {
        return print_json(&servers);
    }

    if servers.is_empty() {
        println!("No servers configured.");
        println!();
        println!("Add one to toolbridge.toml or the user config file:");
        println!("  [[server]]");
        println!("  name = \"calc\"");
        println!("  address = \"calc-server --stdio\"");
        return Ok(());
    }

    println!("{:<20} {:<10} {:<10} {:<40}", "NAME", "TRANSPORT", "ENABLED", "ADDRESS");
    println!("{}", "-".repeat(80));
    for server in servers {
        let transport = if server.is_network() { "network" } else { "stream" };
        let enabled = if server.enabled { "yes" } else { "no" };
        println!(
            "{:<20} {:<10} {:<10} {:<40}",
            server.name,
            transport,
            enabled,
            truncate(&server.address, 40)
        );
    }
    Ok(())
}
