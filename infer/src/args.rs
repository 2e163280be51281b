use std::path::PathBuf;

use clap::Parser;
use infer_chat::types::ToolPromptFormat;

/// Run chat completions against configured inference providers
#[derive(Debug, Parser)]
#[command(name = "infer", about = "Streaming chat completions with tool calling")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "infer.toml", env = "INFER_CONFIG")]
    pub config: PathBuf,

    /// Model id, optionally prefixed with `provider/`
    #[arg(short, long, env = "INFER_MODEL")]
    pub model: Option<String>,

    /// Print events as they arrive instead of the final message
    #[arg(long)]
    pub stream: bool,

    /// System message prepended to the conversation
    #[arg(long)]
    pub system: Option<String>,

    /// JSON file holding an array of tool definitions
    #[arg(long)]
    pub tools: Option<PathBuf>,

    /// How custom tools are presented to the model
    #[arg(long)]
    pub tool_prompt_format: Option<ToolPromptFormat>,

    /// Maximum tokens to generate
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f64>,

    /// List served models and exit
    #[arg(long)]
    pub list_models: bool,

    /// User prompt
    pub prompt: Option<String>,
}
