//! `toolbridge tools`: list an endpoint's tools.

use anyhow::Result;
use clap::Args;

use super::{Context, print_dim, print_json, truncate};

/// Arguments for `toolbridge tools`.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Configured server name, URL, or command line
    pub target: String,

    /// Show full input schemas
    #[arg(long)]
    pub full: bool,
}

/// Run `toolbridge tools`.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let (address, name) = ctx.resolve_target(&args.target);
    let manager = ctx.manager();

    let result = match manager.connect(&address, name.as_deref()).await {
        Ok(outcome) => manager.tools(&outcome.id),
        Err(e) => Err(e),
    };
    manager.disconnect_all().await;
    let tools = result?;

    if ctx.json_output {
        return print_json(&tools);
    }

    if tools.is_empty() {
        print_dim("No tools available");
        return Ok(());
    }

    println!("{:<24} {:<56}", "TOOL", "DESCRIPTION");
    println!("{}", "-".repeat(80));
    for tool in &tools {
        let desc = tool.description.as_deref().unwrap_or("");
        println!("{:<24} {:<56}", tool.name, truncate(desc, 56));
        if args.full
            && let Some(ref schema) = tool.input_schema
        {
            let pretty = serde_json::to_string_pretty(schema)?;
            for line in pretty.lines() {
                println!("    {}", line);
            }
        }
    }
    Ok(())
}
