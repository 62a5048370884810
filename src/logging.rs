//! Tracing subscriber setup.
//!
//! Logs go to stderr so `codebox exec` keeps stdout for the tool result.
//! With `[log] dir` set, a daily-rolling file is written as well.

use anyhow::{Context, Result};
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::{self, time::ChronoUtc, MakeWriter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{expand_path, LogConfig, LogFormat};

const LOG_FILE_PREFIX: &str = "codebox.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global subscriber. The returned guard must live as long as
/// file logging is wanted.
pub(crate) fn init(verbose: bool, config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = vec![layer(config.format, std::io::stderr, true)];

    let guard = match &config.dir {
        Some(dir) => {
            let dir = expand_path(dir)?;
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory at {dir}"))?;
            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(&dir, LOG_FILE_PREFIX));
            layers.push(layer(config.format, writer, false));
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(verbose))
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(guard)
}

fn layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Text => fmt::layer()
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(writer)
            .boxed(),
    }
}

/// `--verbose` wins over `RUST_LOG`; otherwise `RUST_LOG` wins over the
/// default.
fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new(default_directive(true));
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(false)))
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "codebox=debug,tower_http=debug"
    } else {
        "codebox=info,tower_http=info"
    }
}
