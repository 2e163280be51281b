use std::collections::HashMap;
use std::path::Path;

use crate::{Config, ProviderConfig};

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a placeholder cannot be
    /// expanded, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing, or validation fails
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if no provider is configured, a provider is
    /// misconfigured, or two providers claim the same model
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.inference.providers.is_empty() {
            anyhow::bail!("at least one inference provider must be configured");
        }

        let mut owners: HashMap<&str, &str> = HashMap::new();

        for (name, provider) in &self.inference.providers {
            if provider.models().is_empty() {
                anyhow::bail!("provider '{name}' must serve at least one model");
            }

            for model in provider.models() {
                if let Some(previous) = owners.insert(model.as_str(), name.as_str()) {
                    anyhow::bail!("model '{model}' is served by both '{previous}' and '{name}'");
                }
            }

            match provider {
                ProviderConfig::Scripted(scripted) => {
                    for rule in &scripted.scripts {
                        regex::Regex::new(&rule.pattern)
                            .map_err(|e| anyhow::anyhow!("invalid script pattern for provider '{name}': {e}"))?;
                    }

                    if scripted.max_concurrent_generations == 0 {
                        anyhow::bail!("provider '{name}': max_concurrent_generations must be greater than 0");
                    }

                    if scripted.max_tokens == 0 {
                        anyhow::bail!("provider '{name}': max_tokens must be greater than 0");
                    }
                }
                ProviderConfig::OpenaiCompatible(remote) => {
                    if !matches!(remote.base_url.scheme(), "http" | "https") {
                        anyhow::bail!("provider '{name}': base_url must use http or https");
                    }

                    for model in remote.model_map.keys() {
                        if !remote.models.contains(model) {
                            anyhow::bail!("provider '{name}': model_map entry '{model}' is not a served model");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
