use anyhow::Result;

use logkeeper::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    let service = logkeeper::init(config).await;

    tracing::info!("Logging to: {}", service.logs_dir().display());
    if let Some(addr) = service.bridge_addr() {
        tracing::info!("Log bridge accepting requests on {}", addr);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
