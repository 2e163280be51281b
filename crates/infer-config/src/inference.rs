use std::collections::HashMap;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Top-level inference configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InferenceConfig {
    /// Inference providers keyed by name
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
}

/// Configuration for a single inference provider
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Local engine replaying scripted raw model output
    Scripted(ScriptedProviderConfig),
    /// Remote OpenAI-compatible chat completions API
    OpenaiCompatible(OpenAiCompatibleConfig),
}

impl ProviderConfig {
    /// Model identifiers served by this provider
    pub fn models(&self) -> &[String] {
        match self {
            Self::Scripted(config) => &config.models,
            Self::OpenaiCompatible(config) => &config.models,
        }
    }
}

/// Scripted provider configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptedProviderConfig {
    /// Model identifiers this provider answers for
    pub models: Vec<String>,
    /// Rules tried in order against the last message of the conversation
    #[serde(default)]
    pub scripts: Vec<ScriptRule>,
    /// Raw output used when no rule matches
    #[serde(default)]
    pub fallback: Option<String>,
    /// Token budget when the request does not set one
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Number of generations allowed to run at once
    #[serde(default = "default_max_concurrent_generations")]
    pub max_concurrent_generations: usize,
    /// Pause between emitted tokens, in milliseconds
    #[serde(default)]
    pub token_delay_ms: Option<u64>,
}

/// A single scripted response
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptRule {
    /// Regex matched against the last message text
    pub pattern: String,
    /// Raw model output, special tokens included
    pub output: String,
}

/// Remote OpenAI-compatible provider configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiCompatibleConfig {
    /// API base URL, including the version segment (e.g. `https://api.together.xyz/v1`)
    pub base_url: Url,
    /// Bearer token for the upstream API
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Model identifiers this provider answers for
    pub models: Vec<String>,
    /// Upstream model id per served model, when the names differ
    #[serde(default)]
    pub model_map: HashMap<String, String>,
    /// Request timeout in seconds
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

const fn default_max_tokens() -> u32 {
    512
}

const fn default_max_concurrent_generations() -> usize {
    1
}
