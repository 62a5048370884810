//! Initialize a codebox deployment directory.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::config::CONFIG_FILE;
use crate::templates;

/// Directory created next to the config for datasets and artifacts.
const WORKSPACE_DIR: &str = "workspace";

/// What happened to the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigOutcome {
    Created,
    Overwritten,
    Kept,
}

#[derive(Debug, PartialEq, Eq)]
struct InitReport {
    config: ConfigOutcome,
    workspace_created: bool,
}

/// Runs the init command in the current directory.
pub(crate) fn run(force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    info!("Initializing codebox in {}", cwd.display());

    let report = init_in(&cwd, force)?;
    print!("{}", render(&report));
    Ok(())
}

/// Writes the default config (unless present and not forced) and creates the
/// workspace directory.
fn init_in(dir: &Path, force: bool) -> Result<InitReport> {
    let config_path = dir.join(CONFIG_FILE);
    let existed = config_path.exists();

    let config = if existed && !force {
        ConfigOutcome::Kept
    } else {
        fs::write(&config_path, templates::CODEBOX_TOML)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        if existed {
            ConfigOutcome::Overwritten
        } else {
            ConfigOutcome::Created
        }
    };

    let workspace = dir.join(WORKSPACE_DIR);
    let workspace_created = !workspace.is_dir();
    fs::create_dir_all(&workspace)
        .with_context(|| format!("Failed to create directory: {}", workspace.display()))?;

    Ok(InitReport {
        config,
        workspace_created,
    })
}

fn render(report: &InitReport) -> String {
    let mut out = format!("\n{} codebox initialized successfully!\n\n", "✓".green().bold());

    let _ = match report.config {
        ConfigOutcome::Created => writeln!(out, "  {} - configuration", CONFIG_FILE.cyan()),
        ConfigOutcome::Overwritten => {
            writeln!(out, "  {} {CONFIG_FILE} (overwritten)", "↻".blue())
        }
        ConfigOutcome::Kept => writeln!(
            out,
            "  {} {CONFIG_FILE} (already exists, use --force to overwrite)",
            "⊘".yellow()
        ),
    };
    if report.workspace_created {
        let _ = writeln!(out, "  {}/ - shared workspace", WORKSPACE_DIR.cyan());
    }

    let _ = writeln!(out, "\n{}", "Next steps:".yellow().bold());
    let _ = writeln!(out, "  1. Run {} to start the gateway", "codebox serve".green());
    let _ = writeln!(
        out,
        "  2. Run {} to try it",
        "codebox exec -c 'print(1 + 1)'".green()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_creates_config_and_workspace() {
        let dir = tempdir().unwrap();

        let report = init_in(dir.path(), false).unwrap();
        assert_eq!(
            report,
            InitReport {
                config: ConfigOutcome::Created,
                workspace_created: true,
            }
        );
        assert_eq!(
            fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap(),
            templates::CODEBOX_TOML
        );
        assert!(dir.path().join(WORKSPACE_DIR).is_dir());
    }

    #[test]
    fn test_init_keeps_existing_config_without_force() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "# mine").unwrap();
        fs::create_dir(dir.path().join(WORKSPACE_DIR)).unwrap();

        let report = init_in(dir.path(), false).unwrap();
        assert_eq!(report.config, ConfigOutcome::Kept);
        assert!(!report.workspace_created);
        assert_eq!(
            fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap(),
            "# mine"
        );
        assert!(render(&report).contains("--force"));
    }

    #[test]
    fn test_init_force_overwrites_config() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "# mine").unwrap();

        let report = init_in(dir.path(), true).unwrap();
        assert_eq!(report.config, ConfigOutcome::Overwritten);
        assert!(report.workspace_created);
        assert!(fs::read_to_string(dir.path().join(CONFIG_FILE))
            .unwrap()
            .contains("[session]"));
        assert!(render(&report).contains("overwritten"));
    }
}
