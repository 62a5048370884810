use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::Config;
use crate::sandbox::SessionState;
use crate::tool::CodeTool;

pub(crate) async fn run(config: &Config, gateway: Option<&str>) -> Result<()> {
    let tool = CodeTool::from_config(&config.tool, gateway)?;
    let health = tool
        .health()
        .await
        .context("Execution gateway is not reachable")?;

    println!("\n{}", "━".repeat(50).dimmed());
    println!("{}", "   codebox Session Status".yellow().bold());
    println!("{}", "━".repeat(50).dimmed());

    let state = match health.state {
        SessionState::Ready => health.state.to_string().green().bold(),
        SessionState::Executing | SessionState::Starting => health.state.to_string().yellow(),
        SessionState::ShuttingDown | SessionState::Dead => health.state.to_string().red(),
    };
    println!("  State:      {state}");
    println!(
        "  Session:    {}",
        health.session_id.as_deref().unwrap_or("none").cyan()
    );
    println!("  Workspace:  {}", tool.workspace().display().to_string().cyan());

    println!("{}", "━".repeat(50).dimmed());
    Ok(())
}
