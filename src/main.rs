use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use app_foundry::registry::Template;

mod cmd;

#[derive(Parser)]
#[command(name = "app-foundry")]
#[command(version, about = "Generate web apps from a prompt with live progress streaming")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to foundry.toml. Defaults to ./foundry.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory that holds one subdirectory per project. Overrides foundry.toml.
    #[arg(long, global = true)]
    pub projects_root: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and WebSocket server
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
        /// Enable permissive CORS for a local frontend
        #[arg(long)]
        dev: bool,
    },
    /// Generate one project and stream its events to stdout
    Generate {
        prompt: String,
        #[arg(long)]
        template: Option<Template>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cmd::load_config(&cli)?;
    let _log_guard = cmd::init_tracing(cli.verbose, &config.logging)?;

    match &cli.command {
        Commands::Serve { .. } => cmd::cmd_serve(config).await?,
        Commands::Generate { prompt, template } => {
            cmd::cmd_generate(config, prompt, *template).await?
        }
    }

    Ok(())
}
