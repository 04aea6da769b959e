use anyhow::Result;
use taskdeck_core::tracing_setup::init_tracing_with_service;
use taskdeck_server::{run_server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing_with_service("taskdeck-server", "info")?;
    let config = ServerConfig::load()?;
    run_server(config).await
}
