use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{MapPreventDuplicates, serde_as};
use strum::{AsRefStr, Display, EnumString};

/// Tools the model was trained to call natively
///
/// Built-in calls are emitted after `<|python_tag|>` and end the message with
/// `<|eom_id|>` so the caller can run the tool and resume the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BuiltinTool {
    /// Web search
    BraveSearch,
    /// Computational knowledge engine
    WolframAlpha,
    /// Image generation
    #[serde(rename = "photogen")]
    #[strum(serialize = "photogen")]
    PhotoGen,
    /// Python code execution
    CodeInterpreter,
}

impl BuiltinTool {
    /// Name of the single string argument the tool takes
    pub const fn primary_parameter(self) -> &'static str {
        match self {
            Self::CodeInterpreter => "code",
            Self::BraveSearch | Self::WolframAlpha | Self::PhotoGen => "query",
        }
    }
}

/// Name of a tool, either built-in or caller-defined
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolName {
    /// One of the natively supported tools
    Builtin(BuiltinTool),
    /// Free-form function name
    Custom(String),
}

impl ToolName {
    /// Resolve a name, preferring the built-in tool of the same name
    pub fn parse(name: &str) -> Self {
        name.parse::<BuiltinTool>()
            .map_or_else(|_| Self::Custom(name.to_owned()), Self::Builtin)
    }

    /// String form of the name
    pub fn as_str(&self) -> &str {
        match self {
            Self::Builtin(tool) => tool.as_ref(),
            Self::Custom(name) => name,
        }
    }

    /// Whether this names a built-in tool
    pub const fn is_builtin(&self) -> bool {
        matches!(self, Self::Builtin(_))
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<BuiltinTool> for ToolName {
    fn from(tool: BuiltinTool) -> Self {
        Self::Builtin(tool)
    }
}

impl From<&str> for ToolName {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

/// Description of one tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParamDefinition {
    /// Declared type (e.g. `str`, `int`, `boolean`)
    pub param_type: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the model must supply this parameter
    #[serde(default = "default_required")]
    pub required: bool,
    /// Value used when the parameter is omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ArgumentValue>,
}

impl ToolParamDefinition {
    /// Required parameter of the given type
    pub fn new(param_type: impl Into<String>) -> Self {
        Self {
            param_type: param_type.into(),
            description: None,
            required: true,
            default: None,
        }
    }

    /// Attach a description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the parameter optional
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

const fn default_required() -> bool {
    true
}

/// Definition of a tool the model may call
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub tool_name: ToolName,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parameters by name, in declaration order
    #[serde_as(as = "MapPreventDuplicates<_, _>")]
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, ToolParamDefinition>,
}

impl ToolDefinition {
    /// Definition for a built-in tool
    pub fn builtin(tool: BuiltinTool) -> Self {
        Self {
            tool_name: ToolName::Builtin(tool),
            description: None,
            parameters: IndexMap::new(),
        }
    }

    /// Definition for a custom function
    pub fn custom(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            tool_name: ToolName::Custom(name.into()),
            description: Some(description.into()),
            parameters: IndexMap::new(),
        }
    }

    /// Add a parameter, replacing any parameter of the same name
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, definition: ToolParamDefinition) -> Self {
        self.parameters.insert(name.into(), definition);
        self
    }
}

/// How custom tool definitions are presented to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolPromptFormat {
    /// `{"type": "function", "name": ..., "parameters": {...}}`
    Json,
    /// `<function=name>{...}</function>`
    FunctionTag,
    /// `[name(arg=value)]`
    PythonList,
}

/// Typed value of a tool-call argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    /// JSON null / Python `None`
    Null,
    /// Boolean
    Bool(bool),
    /// Integer that fits in `i64`
    Integer(i64),
    /// Any other number
    Float(f64),
    /// String
    String(String),
    /// Ordered list
    List(Vec<ArgumentValue>),
    /// Nested mapping
    Map(IndexMap<String, ArgumentValue>),
}

impl ArgumentValue {
    /// Borrow the string value, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for ArgumentValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Integer),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Into::into).collect()),
            serde_json::Value::Object(map) => Self::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl From<&str> for ArgumentValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Arguments of a resolved tool call, in the order the model emitted them
pub type ToolArguments = IndexMap<String, ArgumentValue>;

/// A tool invocation resolved from model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier the tool response must echo back
    pub call_id: String,
    /// Tool being invoked
    pub tool_name: ToolName,
    /// Parsed arguments
    pub arguments: ToolArguments,
}

impl ToolCall {
    /// Create a call with a freshly generated id
    pub fn new(tool_name: impl Into<ToolName>, arguments: ToolArguments) -> Self {
        Self {
            call_id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            arguments,
        }
    }

    /// Whether two calls invoke the same tool with the same arguments
    pub fn same_invocation(&self, other: &Self) -> bool {
        self.tool_name == other.tool_name && self.arguments == other.arguments
    }
}
