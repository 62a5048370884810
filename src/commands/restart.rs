use anyhow::Result;
use colored::Colorize;

use crate::config::Config;
use crate::tool::CodeTool;

/// Restarts the remote session; any failure exits non-zero.
pub(crate) async fn run(config: &Config, gateway: Option<&str>) -> Result<()> {
    let tool = CodeTool::from_config(&config.tool, gateway)?;
    let response = tool.restart().await?;
    println!("{} {}", "✓".green().bold(), response.message);
    Ok(())
}
