//! `toolbridge connect`: connect, describe the endpoint, disconnect.

use anyhow::Result;
use clap::Args;
use console::Style;
use serde_json::json;

use super::{Context, print_dim, print_json, truncate};

/// Arguments for `toolbridge connect`.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Configured server name, URL, or command line
    pub target: String,

    /// Display name for the connection
    #[arg(long)]
    pub name: Option<String>,
}

/// Run `toolbridge connect`.
pub async fn run(args: ConnectArgs, ctx: &Context) -> Result<()> {
    let (address, configured_name) = ctx.resolve_target(&args.target);
    let name = args.name.or(configured_name);
    let manager = ctx.manager();

    let result = manager.connect(&address, name.as_deref()).await;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            manager.disconnect_all().await;
            return Err(e.into());
        }
    };
    let conn = manager.get(&outcome.id)?;

    if ctx.json_output {
        print_json(&json!({
            "connection": conn,
        }))?;
    } else {
        let green = Style::new().green();
        println!(
            "{} Connected to {} via {}",
            green.apply_to("✓"),
            conn.display_name,
            conn.transport
        );
        if let Some(ref info) = conn.server_info {
            println!("  Server: {} {}", info.name, info.version);
        }
        println!("  Connection: {}", conn.id);

        if conn.tools.is_empty() {
            print_dim("  No tools discovered");
        } else {
            println!("  Tools ({}):", conn.tools.len());
            for tool in &conn.tools {
                let desc = tool.description.as_deref().unwrap_or("");
                println!("    {:<24} {}", tool.name, truncate(desc, 60));
            }
        }
    }

    manager.disconnect_all().await;
    Ok(())
}
