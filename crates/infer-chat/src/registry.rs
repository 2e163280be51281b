//! Registry of configured providers and the models they serve

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use infer_config::InferenceConfig;

use crate::error::InferenceError;
use crate::handle::ProviderHandle;
use crate::provider::{self, Provider};
use crate::stream::ChunkStream;
use crate::types::{ChatCompletionRequest, CompletionMessage};

/// A model resolved to the provider that serves it
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    /// Handle of the serving provider
    pub handle: ProviderHandle,
    /// Model id with any `provider/` prefix removed
    pub model: String,
}

/// Maps provider names to handles and model ids to providers
///
/// Built once from configuration; lookups never construct providers.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: IndexMap<String, ProviderHandle>,
    models: HashMap<String, String>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured provider
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if a provider cannot be built or a model is
    /// served by two providers
    pub fn from_config(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let mut registry = Self::new();

        for (name, provider_config) in &config.providers {
            let provider = provider::from_config(name, provider_config)?;
            registry.register(provider, provider_config.models())?;
        }

        tracing::debug!(
            providers = registry.providers.len(),
            models = registry.models.len(),
            "provider registry built"
        );

        Ok(registry)
    }

    /// Add a provider serving `models`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the provider name is taken or a model is
    /// already served by another provider
    pub fn register(&mut self, provider: Arc<dyn Provider>, models: &[String]) -> Result<(), InferenceError> {
        let name = provider.name().to_owned();

        if self.providers.contains_key(&name) {
            return Err(InferenceError::Configuration(format!("provider '{name}' is registered twice")));
        }

        for model in models {
            if let Some(existing) = self.models.get(model) {
                return Err(InferenceError::Configuration(format!(
                    "model '{model}' is served by both '{existing}' and '{name}'"
                )));
            }
        }

        for model in models {
            self.models.insert(model.clone(), name.clone());
        }
        self.providers.insert(name, ProviderHandle::new(provider));

        Ok(())
    }

    /// Handle for a provider by name
    pub fn provider(&self, name: &str) -> Option<&ProviderHandle> {
        self.providers.get(name)
    }

    /// All provider handles, in configuration order
    pub fn providers(&self) -> impl Iterator<Item = &ProviderHandle> {
        self.providers.values()
    }

    /// Served model ids with their provider names, sorted by model
    pub fn list_models(&self) -> Vec<(&str, &str)> {
        let mut models: Vec<_> = self
            .models
            .iter()
            .map(|(model, provider)| (model.as_str(), provider.as_str()))
            .collect();
        models.sort_unstable();
        models
    }

    /// Resolve `provider/model` or a bare model id
    ///
    /// # Errors
    ///
    /// Returns `ProviderNotFound` for an unknown prefix and `ModelNotFound`
    /// when no provider serves the model
    pub fn resolve(&self, model: &str) -> Result<ResolvedModel, InferenceError> {
        if let Some(served_by) = self.models.get(model) {
            return Ok(self.resolved(served_by, model));
        }

        if let Some((provider_name, bare)) = model.split_once('/') {
            if !self.providers.contains_key(provider_name) {
                return Err(InferenceError::ProviderNotFound {
                    provider: provider_name.to_owned(),
                });
            }
            if self.models.get(bare).is_some_and(|served_by| served_by == provider_name) {
                return Ok(self.resolved(provider_name, bare));
            }
        }

        Err(InferenceError::ModelNotFound {
            model: model.to_owned(),
        })
    }

    fn resolved(&self, provider_name: &str, model: &str) -> ResolvedModel {
        ResolvedModel {
            handle: self.providers[provider_name].clone(),
            model: model.to_owned(),
        }
    }

    /// Initialize every provider
    ///
    /// # Errors
    ///
    /// Returns the first provider error
    pub async fn initialize(&self) -> Result<(), InferenceError> {
        for handle in self.providers.values() {
            handle.initialize().await?;
        }
        Ok(())
    }

    /// Shut every provider down, continuing past failures
    ///
    /// # Errors
    ///
    /// Returns the first provider error after all providers were shut down
    pub async fn shutdown(&self) -> Result<(), InferenceError> {
        let mut first_error = None;

        for handle in self.providers.values() {
            if let Err(e) = handle.shutdown().await {
                tracing::warn!(provider = %handle.name(), error = %e, "provider shutdown failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Route a chat completion to the provider serving `request.model`
    ///
    /// # Errors
    ///
    /// See [`resolve`](Self::resolve) and [`ProviderHandle::chat_completion`]
    pub async fn chat_completion(&self, mut request: ChatCompletionRequest) -> Result<ChunkStream, InferenceError> {
        let resolved = self.resolve(&request.model)?;
        request.model = resolved.model;
        resolved.handle.chat_completion(request).await
    }

    /// Route a request and return the aggregated message
    ///
    /// # Errors
    ///
    /// See [`resolve`](Self::resolve) and [`ProviderHandle::complete`]
    pub async fn complete(&self, mut request: ChatCompletionRequest) -> Result<CompletionMessage, InferenceError> {
        let resolved = self.resolve(&request.model)?;
        request.model = resolved.model;
        resolved.handle.complete(request).await
    }
}
