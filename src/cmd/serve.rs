//! API server command, `app-foundry serve`.

use std::sync::Arc;

use anyhow::Result;
use app_foundry::Foundry;
use app_foundry::config::FoundryConfig;

pub async fn cmd_serve(config: FoundryConfig) -> Result<()> {
    let foundry = Arc::new(Foundry::from_config(config));
    app_foundry::server::start_server(foundry).await
}
