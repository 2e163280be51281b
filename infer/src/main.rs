#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;
mod output;

use anyhow::Context;
use args::Args;
use clap::Parser;
use infer_chat::ProviderRegistry;
use infer_chat::types::{ChatCompletionRequest, Message, SamplingParams, ToolDefinition};
use infer_config::Config;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    // Initialize logging
    infer_telemetry::init(config.logging.as_ref(), "warn")?;

    let registry = ProviderRegistry::from_config(&config.inference)?;

    if args.list_models {
        for (model, provider) in registry.list_models() {
            println!("{provider}/{model}");
        }
        return Ok(());
    }

    let request = build_request(&args)?;

    tracing::info!(
        config_path = %args.config.display(),
        model = %request.model,
        stream = request.stream,
        "starting completion"
    );

    registry.initialize().await?;

    // Set up cancellation
    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_clone.cancel();
    });

    let outcome = until_canceled(output::run(&registry, request), &shutdown).await;

    registry.shutdown().await?;

    outcome
}

/// Drive `work` to completion unless `shutdown` fires first
///
/// A canceled completion is an error so the process exits non-zero.
async fn until_canceled(
    work: impl Future<Output = anyhow::Result<()>>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    tokio::select! {
        result = work => result,
        () = shutdown.cancelled() => {
            tracing::warn!("completion canceled");
            Err(anyhow::anyhow!("completion canceled"))
        }
    }
}

/// Assemble the request from command-line arguments
fn build_request(args: &Args) -> anyhow::Result<ChatCompletionRequest> {
    let model = args.model.clone().context("a model is required (--model or INFER_MODEL)")?;
    let prompt = args.prompt.clone().context("a prompt is required")?;

    let mut messages = Vec::new();
    if let Some(system) = &args.system {
        messages.push(Message::system(system.clone()));
    }
    messages.push(Message::user(prompt));

    let mut request = ChatCompletionRequest::new(model, messages)
        .streaming(args.stream)
        .with_sampling_params(SamplingParams {
            temperature: args.temperature,
            max_tokens: args.max_tokens,
            ..SamplingParams::default()
        });

    if let Some(path) = &args.tools {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tools file: {}", path.display()))?;
        let tools: Vec<ToolDefinition> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse tools file: {}", path.display()))?;
        request = request.with_tools(tools);
    }

    if let Some(format) = args.tool_prompt_format {
        request = request.with_tool_prompt_format(format);
    }

    Ok(request)
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
