use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod gateway;
mod logging;
mod protocol;
mod sandbox;
mod templates;
mod tool;

use config::Config;

#[derive(Parser)]
#[command(name = "codebox")]
#[command(
    author,
    version,
    about = "Persistent, isolated code-execution sandbox for autonomous agents"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ./codebox.toml)
    #[arg(long, global = true, env = "CODEBOX_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize codebox files in the current directory
    Init {
        /// Force overwrite existing files
        #[arg(short, long)]
        force: bool,
    },

    /// Run the execution gateway and its kernel session
    Serve {
        /// Listen address (overrides [server] bind)
        #[arg(long, env = "CODEBOX_BIND")]
        bind: Option<String>,
    },

    /// Execute code through the gateway and print the tool result
    Exec {
        /// File containing the code ("-" for stdin)
        file: Option<PathBuf>,

        /// Code to execute
        #[arg(short, long, conflicts_with = "file")]
        code: Option<String>,

        /// Gateway URL (overrides [tool] gateway_url)
        #[arg(long, env = "CODEBOX_GATEWAY")]
        gateway: Option<String>,
    },

    /// Restart the remote session, discarding all interpreter state
    Restart {
        /// Gateway URL (overrides [tool] gateway_url)
        #[arg(long, env = "CODEBOX_GATEWAY")]
        gateway: Option<String>,
    },

    /// Show the remote session state
    Status {
        /// Gateway URL (overrides [tool] gateway_url)
        #[arg(long, env = "CODEBOX_GATEWAY")]
        gateway: Option<String>,
    },

    /// Manage the kernel container image
    Image {
        #[command(subcommand)]
        action: commands::image::ImageAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::resolve(cli.config.as_deref())?;
    let _log_guard = logging::init(cli.verbose, &config.log)?;

    match cli.command {
        Commands::Init { force } => {
            commands::init::run(force)?;
        }
        Commands::Serve { bind } => {
            commands::serve::run(&config, bind).await?;
        }
        Commands::Exec {
            file,
            code,
            gateway,
        } => {
            commands::exec::run(&config, gateway.as_deref(), file, code).await?;
        }
        Commands::Restart { gateway } => {
            commands::restart::run(&config, gateway.as_deref()).await?;
        }
        Commands::Status { gateway } => {
            commands::status::run(&config, gateway.as_deref()).await?;
        }
        Commands::Image { action } => {
            commands::image::run(&config, action).await?;
        }
    }

    Ok(())
}
