//! Programmatic configuration builder for integration tests

use infer_config::{
    Config, InferenceConfig, OpenAiCompatibleConfig, ProviderConfig, ScriptRule, ScriptedProviderConfig,
};
use secrecy::SecretString;

/// Model served by the scripted Llama provider
pub const LLAMA_MODEL: &str = "Llama3.1-8B-Instruct";

/// Model served by the mock OpenAI-compatible provider
pub const REMOTE_MODEL: &str = "Llama3.1-70B-Instruct";

/// Upstream id the remote model is mapped to
pub const UPSTREAM_MODEL: &str = "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo";

/// API key configured for the mock provider
pub const TEST_API_KEY: &str = "test-key";

/// Raw outputs covering the conversational scenarios
fn llama_scripts() -> Vec<ScriptRule> {
    [
        (
            "Barack Obama",
            "The 44th president of the United States was Barack Obama.<|eot_id|>",
        ),
        (
            "(?i)capital of france",
            "The capital of France is Paris.<|eot_id|>",
        ),
        (
            "(?i)boiling point",
            "<function=get_boiling_point>{\"liquid_name\": \"polyjuice\", \"celcius\": true}</function><|eot_id|>",
        ),
        (
            "(?i)president",
            "<|python_tag|>brave_search.call(query=\"current US President\")<|eom_id|>",
        ),
        (
            "(?i)broken tool",
            "<|python_tag|>brave_search.call(query=\"unterminated<|eom_id|>",
        ),
        (
            "(?i)count slowly",
            "one two three four five six seven eight nine ten<|eot_id|>",
        ),
    ]
    .into_iter()
    .map(|(pattern, output)| ScriptRule {
        pattern: pattern.to_owned(),
        output: output.to_owned(),
    })
    .collect()
}

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with no providers
    pub fn new() -> Self {
        Self {
            config: Config {
                inference: InferenceConfig::default(),
                logging: None,
            },
        }
    }

    /// Add the scripted Llama provider
    pub fn with_scripted_llama(self, name: &str) -> Self {
        self.with_scripted(name, |_| {})
    }

    /// Add the scripted Llama provider with adjusted settings
    pub fn with_scripted(mut self, name: &str, adjust: impl FnOnce(&mut ScriptedProviderConfig)) -> Self {
        let mut scripted = ScriptedProviderConfig {
            models: vec![LLAMA_MODEL.to_owned()],
            scripts: llama_scripts(),
            fallback: None,
            max_tokens: 512,
            max_concurrent_generations: 1,
            token_delay_ms: None,
        };
        adjust(&mut scripted);

        self.config
            .inference
            .providers
            .insert(name.to_owned(), ProviderConfig::Scripted(scripted));
        self
    }

    /// Add an OpenAI-compatible provider pointed at a mock backend
    pub fn with_openai_provider(mut self, name: &str, base_url: &str) -> Self {
        self.config.inference.providers.insert(
            name.to_owned(),
            ProviderConfig::OpenaiCompatible(OpenAiCompatibleConfig {
                base_url: base_url.parse().expect("valid URL"),
                api_key: Some(SecretString::from(TEST_API_KEY)),
                models: vec![REMOTE_MODEL.to_owned()],
                model_map: [(REMOTE_MODEL.to_owned(), UPSTREAM_MODEL.to_owned())].into_iter().collect(),
                timeout_seconds: Some(10),
            }),
        );
        self
    }

    /// Finish building, validating like a loaded file
    pub fn build(self) -> Config {
        self.config.validate().expect("valid test configuration");
        self.config
    }
}
