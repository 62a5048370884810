//! Run code through the gateway the way an agent tool would.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::tool::{extract_images, is_error, CodeTool};

/// Submits code and prints the rendered result. Execution outcomes never
/// fail the command; only unreadable input does.
pub(crate) async fn run(
    config: &Config,
    gateway: Option<&str>,
    file: Option<PathBuf>,
    code: Option<String>,
) -> Result<()> {
    let code = read_code(file.as_deref(), code, || {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read code from stdin")?;
        Ok(buf)
    })?;

    let tool = CodeTool::from_config(&config.tool, gateway)?;
    let output = tool.run(&code).await;
    println!("{output}");

    if is_error(&output) {
        eprintln!("{} Execution did not complete", "✗".red().bold());
    }
    for path in extract_images(&output, tool.workspace()) {
        eprintln!("{} {}", "🖼".cyan(), path.display());
    }

    Ok(())
}

/// Picks the code source: `-c` text, then a file (`-` for stdin), then stdin.
fn read_code<F>(file: Option<&Path>, code: Option<String>, read_stdin: F) -> Result<String>
where
    F: FnOnce() -> Result<String>,
{
    if let Some(code) = code {
        return Ok(code);
    }
    match file {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => read_stdin(),
    }
}
