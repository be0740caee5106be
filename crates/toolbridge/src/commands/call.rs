//! `toolbridge call`: one tool call against one endpoint.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde_json::{Map, Value, json};
use toolbridge_mcp::Dispatcher;

use super::{Context, print_json};

/// Arguments for `toolbridge call`.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Configured server name, URL, or command line
    pub target: String,

    /// Tool name
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(long, default_value = "{}")]
    pub args: String,
}

/// Run `toolbridge call`.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments = parse_arguments(&args.args)?;
    let (address, name) = ctx.resolve_target(&args.target);
    let manager = ctx.manager();

    let result = async {
        let outcome = manager.connect(&address, name.as_deref()).await?;
        Dispatcher::new(manager.clone())
            .call_tool(&outcome.id, &args.tool, arguments)
            .await
    }
    .await;
    manager.disconnect_all().await;

    let output = result?;
    if ctx.json_output {
        print_json(&json!({
            "tool": args.tool,
            "is_error": output.is_error,
            "result": output.raw,
        }))?;
    } else {
        println!("{}", output.text);
    }

    if output.is_error {
        bail!("tool '{}' reported an error", args.tool);
    }
    Ok(())
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw).context("--args must be valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        other => bail!("--args must be a JSON object, got {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        let map = parse_arguments(r#"{"a": 1, "b": "two"}"#).unwrap();
        assert_eq!(map.len(), 2);
        assert!(parse_arguments("{}").unwrap().is_empty());
        assert!(parse_arguments("[1, 2]").is_err());
        assert!(parse_arguments("not json").is_err());
    }
}
