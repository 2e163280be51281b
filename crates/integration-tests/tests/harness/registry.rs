//! Registry startup helpers

use infer_chat::ProviderRegistry;
use infer_config::Config;

/// Build and initialize every provider in the configuration
pub async fn start(config: &Config) -> anyhow::Result<ProviderRegistry> {
    let registry = ProviderRegistry::from_config(&config.inference)?;
    registry.initialize().await?;
    Ok(registry)
}
