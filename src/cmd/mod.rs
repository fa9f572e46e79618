//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `serve`    | `Serve`          |
//! | `generate` | `Generate`       |
//!
//! Configuration is layered here: defaults, then `foundry.toml`, then
//! `FOUNDRY_*` environment variables, then command-line flags.

pub mod generate;
pub mod serve;

pub use generate::cmd_generate;
pub use serve::cmd_serve;

use anyhow::{Result, bail};
use app_foundry::config::{FoundryConfig, LoggingSection};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{Cli, Commands};

pub fn load_config(cli: &Cli) -> Result<FoundryConfig> {
    let mut config = FoundryConfig::resolve(cli.config.as_deref())?;

    if let Some(root) = &cli.projects_root {
        config.projects.root = root.clone();
    }
    if cli.log_json {
        config.logging.json = true;
    }
    if let Commands::Serve { port, host, dev } = &cli.command {
        if let Some(port) = port {
            config.server.port = *port;
        }
        if let Some(host) = host {
            config.server.host = host.clone();
        }
        if *dev {
            config.server.dev_mode = true;
        }
    }

    let problems = config.validate();
    if !problems.is_empty() {
        bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
    }
    Ok(config)
}

/// Install the global subscriber. Logs go to stderr, and additionally to a
/// daily-rotated file when `log_dir` is set. Keep the guard alive for the
/// life of the process or buffered file output is lost.
pub fn init_tracing(verbose: bool, logging: &LoggingSection) -> Result<Option<WorkerGuard>> {
    let default_level = if verbose {
        "app_foundry=debug"
    } else {
        "app_foundry=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (json_layer, text_layer) = if logging.json {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (None, Some(fmt::layer().with_writer(std::io::stderr)))
    };

    let (file_layer, guard) = match &logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "app-foundry.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
