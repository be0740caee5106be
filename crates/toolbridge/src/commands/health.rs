//! `toolbridge health`: connect, check, report.

use anyhow::{Result, bail};
use clap::Args;
use console::Style;
use serde_json::json;
use toolbridge_mcp::{HealthMonitor, HealthStatus};

use super::{Context, print_json};

/// Arguments for `toolbridge health`.
#[derive(Args, Debug)]
pub struct HealthArgs {
    /// Servers or addresses to check (default: all enabled configured servers)
    pub targets: Vec<String>,
}

/// Run `toolbridge health`.
pub async fn run(args: HealthArgs, ctx: &Context) -> Result<()> {
    let targets: Vec<(String, Option<String>)> = if args.targets.is_empty() {
        ctx.config
            .enabled_servers()
            .map(|s| (s.address.clone(), Some(s.name.clone())))
            .collect()
    } else {
        args.targets.iter().map(|t| ctx.resolve_target(t)).collect()
    };
    if targets.is_empty() {
        bail!("nothing to check: pass a target or configure servers");
    }

    let manager = ctx.manager();
    let mut failures = Vec::new();
    for (address, name) in &targets {
        if let Err(e) = manager.connect(address, name.as_deref()).await {
            tracing::debug!(address = %address, error = %e, "connect failed");
            failures.push((name.clone().unwrap_or_else(|| address.clone()), e.to_string()));
        }
    }

    let reports = HealthMonitor::new(manager.clone()).check().await;
    manager.disconnect_all().await;

    if ctx.json_output {
        let unreachable: Vec<_> = failures
            .iter()
            .map(|(target, error)| json!({"target": target, "error": error}))
            .collect();
        print_json(&json!({"reports": reports, "unreachable": unreachable}))?;
    } else {
        let green = Style::new().green();
        let red = Style::new().red();
        let yellow = Style::new().yellow();
        for report in &reports {
            let marker = match report.status {
                HealthStatus::Healthy => green.apply_to("●"),
                HealthStatus::Unhealthy => yellow.apply_to("●"),
                HealthStatus::Disconnected => red.apply_to("●"),
            };
            let detail = match (report.latency, &report.error) {
                (Some(latency), _) => format!("{}ms", latency.as_millis()),
                (None, Some(err)) => err.clone(),
                (None, None) => String::new(),
            };
            println!("{} {:<20} {:<13} {}", marker, report.name, report.status, detail);
        }
        for (target, error) in &failures {
            println!("{} {:<20} {:<13} {}", red.apply_to("●"), target, "unreachable", error);
        }
    }

    let healthy = reports
        .iter()
        .filter(|r| r.status == HealthStatus::Healthy)
        .count();
    if healthy < targets.len() {
        bail!("{} of {} endpoint(s) healthy", healthy, targets.len());
    }
    Ok(())
}
