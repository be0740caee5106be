//! `toolbridge session`: interactive loop over one connection table.
//!
//! Each line is `<action> [input]`, executed through [`McpCapability`],
//! so the session exposes exactly the actions an agent would see.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use toolbridge_mcp::{Action, ActionInput, HealthMonitor, McpCapability};

use super::{Context, print_dim};

/// Arguments for `toolbridge session`.
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Check connections in the background every N seconds
    #[arg(long, value_name = "SECS")]
    pub health_interval: Option<u64>,

    /// Connect to these servers or addresses before the first prompt
    #[arg(long = "connect", value_name = "TARGET")]
    pub connect: Vec<String>,
}

enum ControlFlow {
    Continue,
    Exit,
}

/// Run `toolbridge session`.
pub async fn run(args: SessionArgs, ctx: &Context) -> Result<()> {
    let capability = McpCapability::new(ctx.manager());

    let cancel = CancellationToken::new();
    let monitor = args.health_interval.filter(|secs| *secs > 0).map(|secs| {
        HealthMonitor::new(capability.manager().clone())
            .spawn_periodic(Duration::from_secs(secs), cancel.clone())
    });

    let mut session = Session::new(capability.clone(), ctx.verbose)?;
    for target in &args.connect {
        let (address, name) = ctx.resolve_target(target);
        let mut params = Map::new();
        params.insert("address".to_string(), Value::String(address));
        if let Some(name) = name {
            params.insert("name".to_string(), Value::String(name));
        }
        session.run_action("connect", ActionInput::Structured(params)).await;
    }
    let result = session.run().await;

    cancel.cancel();
    if let Some(handle) = monitor {
        let _ = handle.await;
    }
    let closed = capability.manager().disconnect_all().await;
    tracing::debug!(closed, "session ended");
    result
}

struct Session {
    capability: McpCapability,
    editor: Editor<(), DefaultHistory>,
    verbose: bool,
}

impl Session {
    fn new(capability: McpCapability, verbose: bool) -> Result<Self> {
        let config = Config::builder()
            .history_ignore_space(true)
            .auto_add_history(true)
            .build();
        let editor = Editor::with_config(config)?;

        Ok(Self {
            capability,
            editor,
            verbose,
        })
    }

    async fn run(&mut self) -> Result<()> {
        print_welcome();

        loop {
            let prompt = format!("{} ", style("toolbridge>").cyan().bold());
            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match self.handle_line(line).await {
                        ControlFlow::Continue => continue,
                        ControlFlow::Exit => break,
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!();
                    print_dim("(Interrupted - type quit to exit)");
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(e) => {
                    print_error(&format!("Input error: {}", e));
                    break;
                }
            }
        }

        print_dim("Goodbye!");
        Ok(())
    }

    async fn handle_line(&self, line: &str) -> ControlFlow {
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "quit" | "q" | "exit" => return ControlFlow::Exit,
            "help" | "h" | "?" => print_help(),
            _ => {
                self.run_action(command, ActionInput::from_parts(None, Some(rest)))
                    .await
            }
        }
        ControlFlow::Continue
    }

    async fn run_action(&self, action: &str, input: ActionInput) {
        match self.capability.execute(action, input).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                print_error(&e.to_string());
                if self.verbose {
                    print_dim(&format!("  ({:?})", e));
                }
            }
        }
    }
}

fn print_welcome() {
    let dim = Style::new().dim();
    println!();
    println!("{}", style("toolbridge session").bold().cyan());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("{}", dim.apply_to("Type an action and press Enter."));
    println!("{}", dim.apply_to("Use help for actions, Ctrl+D to exit."));
    println!();
}

fn print_help() {
    let dim = Style::new().dim();
    println!();
    println!("{}", style("Actions").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    for action in Action::ALL {
        println!("  {:<34} {}", style(usage(action)).cyan(), describe(action));
    }
    println!("  {:<34} {}", style("quit").cyan(), "Disconnect everything and exit");
    println!();
    println!(
        "{}",
        dim.apply_to("Arguments may also be a JSON object, e.g. call_tool {\"connection_id\": ...}")
    );
    println!();
}

fn usage(action: Action) -> &'static str {
    match action {
        Action::Connect => "connect <address>",
        Action::Disconnect => "disconnect <connection_id>",
        Action::ListTools => "list_tools <connection_id>",
        Action::CallTool => "call_tool {json}",
        Action::ListServers => "list_servers",
        Action::HealthCheck => "health_check",
    }
}

fn describe(action: Action) -> &'static str {
    match action {
        Action::Connect => "Open or reuse a connection",
        Action::Disconnect => "Close a connection",
        Action::ListTools => "Show a connection's tools",
        Action::CallTool => "Invoke a tool",
        Action::ListServers => "Show every connection",
        Action::HealthCheck => "Ping every ready connection",
    }
}

fn print_error(msg: &str) {
    let red = Style::new().red();
    println!("{} {}", red.apply_to("Error:"), msg);
}
