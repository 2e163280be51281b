//! Tool-call parsing from raw model text
//!
//! Understands the three syntaxes Llama 3.1 models emit:
//!
//! 1. **Built-in calls** after `<|python_tag|>`:
//!    ```text
//!    brave_search.call(query="current US president")
//!    ```
//!    Text that is not a `.call(...)` on a built-in tool is code for
//!    `code_interpreter`.
//!
//! 2. **Function tags** for custom tools:
//!    ```text
//!    <function=get_boiling_point>{"liquid_name": "polyjuice"}</function>
//!    ```
//!
//! 3. **JSON** for custom tools:
//!    ```text
//!    {"type": "function", "name": "get_boiling_point", "parameters": {"liquid_name": "polyjuice"}}
//!    ```
//!
//! A `[name(arg=value), ...]` python list is accepted as well. Anything that
//! looks like a call but cannot be turned into a name and an argument map is a
//! `MalformedToolCall`; nothing is silently dropped.

use crate::error::InferenceError;
use crate::types::{ArgumentValue, BuiltinTool, ToolArguments, ToolCall, ToolName};

/// Opening marker of a function tag
pub const FUNCTION_TAG_OPEN: &str = "<function=";
/// Closing marker of a function tag
pub const FUNCTION_TAG_CLOSE: &str = "</function>";

/// Parse accumulated tool-call text of any supported syntax
///
/// # Errors
///
/// Returns `MalformedToolCall` if the text is empty or cannot be parsed
pub fn parse_tool_calls(text: &str) -> Result<Vec<ToolCall>, InferenceError> {
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Err(InferenceError::malformed(text, "empty tool call"));
    }

    if trimmed.starts_with(FUNCTION_TAG_OPEN) {
        let (prose, calls) = extract_function_tags(trimmed)?;
        if !prose.trim().is_empty() {
            return Err(InferenceError::malformed(text, "unexpected text around function tag"));
        }
        return Ok(calls);
    }

    if trimmed.starts_with('{') {
        return parse_json_call(trimmed).map(|call| vec![call]);
    }

    if trimmed.starts_with('[') {
        return parse_python_list(trimmed);
    }

    parse_builtin_call(trimmed).map(|call| vec![call])
}

/// Split text into prose and the function-tag calls embedded in it
///
/// Text outside the tags is returned unchanged, with trailing whitespace
/// removed when at least one tag was found.
///
/// # Errors
///
/// Returns `MalformedToolCall` if a tag is unterminated or its body is not a
/// JSON object
pub fn extract_function_tags(text: &str) -> Result<(String, Vec<ToolCall>), InferenceError> {
    let mut prose = String::with_capacity(text.len());
    let mut calls = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find(FUNCTION_TAG_OPEN) {
        let start = cursor + offset;
        prose.push_str(&text[cursor..start]);

        let Some(close_offset) = text[start..].find(FUNCTION_TAG_CLOSE) else {
            return Err(InferenceError::malformed(&text[start..], "unterminated function tag"));
        };
        let end = start + close_offset + FUNCTION_TAG_CLOSE.len();

        calls.push(parse_function_tag(&text[start..end])?);
        cursor = end;
    }

    prose.push_str(&text[cursor..]);

    if !calls.is_empty() {
        prose.truncate(prose.trim_end().len());
    }

    Ok((prose, calls))
}

/// Parse a single `<function=name>{...}</function>` tag
///
/// # Errors
///
/// Returns `MalformedToolCall` if the tag structure, name, or body is invalid
pub fn parse_function_tag(tag: &str) -> Result<ToolCall, InferenceError> {
    let inner = tag
        .trim()
        .strip_prefix(FUNCTION_TAG_OPEN)
        .and_then(|rest| rest.strip_suffix(FUNCTION_TAG_CLOSE))
        .ok_or_else(|| InferenceError::malformed(tag, "not a function tag"))?;

    let Some((name, body)) = inner.split_once('>') else {
        return Err(InferenceError::malformed(tag, "function tag name is not closed with '>'"));
    };

    let name = name.trim();
    if !is_tool_name(name) {
        return Err(InferenceError::malformed(tag, format!("invalid function name '{name}'")));
    }

    let arguments = parse_arguments_json(body).map_err(|reason| InferenceError::malformed(tag, reason))?;

    Ok(ToolCall::new(ToolName::parse(name), arguments))
}

/// Parse a JSON tool call (`{"name": ..., "parameters": {...}}`)
///
/// # Errors
///
/// Returns `MalformedToolCall` if the JSON is invalid or lacks a name
pub fn parse_json_call(text: &str) -> Result<ToolCall, InferenceError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| InferenceError::malformed(text, format!("invalid JSON: {e}")))?;

    let serde_json::Value::Object(mut object) = value else {
        return Err(InferenceError::malformed(text, "tool call must be a JSON object"));
    };

    let name = match object.remove("name") {
        Some(serde_json::Value::String(name)) if is_tool_name(name.trim()) => name.trim().to_owned(),
        _ => return Err(InferenceError::malformed(text, "tool call has no valid \"name\"")),
    };

    let raw_arguments = object
        .remove("parameters")
        .or_else(|| object.remove("arguments"))
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));

    let arguments = match raw_arguments {
        serde_json::Value::Object(map) => map.into_iter().map(|(k, v)| (k, v.into())).collect(),
        // Some models double-encode the arguments
        serde_json::Value::String(encoded) => {
            parse_arguments_json(&encoded).map_err(|reason| InferenceError::malformed(text, reason))?
        }
        _ => return Err(InferenceError::malformed(text, "tool call parameters must be an object")),
    };

    Ok(ToolCall::new(ToolName::parse(&name), arguments))
}

/// Parse a JSON object of arguments; blank input is an empty map
///
/// # Errors
///
/// Returns a description of the problem if the text is not a JSON object
pub fn parse_arguments_json(raw: &str) -> Result<ToolArguments, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(ToolArguments::new());
    }

    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        Ok(_) => Err("arguments must be a JSON object".to_owned()),
        Err(e) => Err(format!("invalid JSON arguments: {e}")),
    }
}

/// Parse the body that follows `<|python_tag|>`
///
/// # Errors
///
/// Returns `MalformedToolCall` if a built-in `.call(...)` expression is
/// malformed
pub fn parse_builtin_call(text: &str) -> Result<ToolCall, InferenceError> {
    let text = text.trim();

    if let Some((name, rest)) = text.split_once(".call(")
        && let Ok(tool) = name.trim().parse::<BuiltinTool>()
    {
        let Some(args) = rest.trim_end().strip_suffix(')') else {
            return Err(InferenceError::malformed(text, "unterminated call expression"));
        };

        let arguments = parse_kwargs(args).map_err(|reason| InferenceError::malformed(text, reason))?;
        return Ok(ToolCall::new(tool, arguments));
    }

    if text.is_empty() {
        return Err(InferenceError::malformed(text, "empty tool call"));
    }

    let mut arguments = ToolArguments::new();
    arguments.insert(
        BuiltinTool::CodeInterpreter.primary_parameter().to_owned(),
        ArgumentValue::String(text.to_owned()),
    );

    Ok(ToolCall::new(BuiltinTool::CodeInterpreter, arguments))
}

/// Parse `[name(arg=value), other(arg=value)]`
///
/// # Errors
///
/// Returns `MalformedToolCall` if the list or any call in it is malformed
pub fn parse_python_list(text: &str) -> Result<Vec<ToolCall>, InferenceError> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| InferenceError::malformed(text, "unterminated call list"))?;

    let expressions = split_top_level(inner).map_err(|reason| InferenceError::malformed(text, reason))?;

    let calls = expressions
        .into_iter()
        .filter(|expr| !expr.trim().is_empty())
        .map(|expr| parse_call_expression(expr).map_err(|reason| InferenceError::malformed(text, reason)))
        .collect::<Result<Vec<_>, _>>()?;

    if calls.is_empty() {
        return Err(InferenceError::malformed(text, "empty call list"));
    }

    Ok(calls)
}

fn parse_call_expression(expr: &str) -> Result<ToolCall, String> {
    let expr = expr.trim();

    let Some((name, rest)) = expr.split_once('(') else {
        return Err(format!("'{expr}' is not a call expression"));
    };

    let name = name.trim();
    if !is_tool_name(name) {
        return Err(format!("invalid function name '{name}'"));
    }

    let Some(args) = rest.strip_suffix(')') else {
        return Err(format!("unterminated call to '{name}'"));
    };

    Ok(ToolCall::new(ToolName::parse(name), parse_kwargs(args)?))
}

/// Parse Python-style keyword arguments: `key="value", n=3, flag=True`
fn parse_kwargs(raw: &str) -> Result<ToolArguments, String> {
    let mut arguments = ToolArguments::new();

    for pair in split_top_level(raw)? {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("expected key=value, found '{pair}'"));
        };

        let key = key.trim();
        if !is_identifier(key) {
            return Err(format!("invalid argument name '{key}'"));
        }

        if arguments.insert(key.to_owned(), parse_literal(value)?).is_some() {
            return Err(format!("argument '{key}' given twice"));
        }
    }

    Ok(arguments)
}

fn parse_literal(raw: &str) -> Result<ArgumentValue, String> {
    let raw = raw.trim();

    if let Some(quote) = raw.chars().next().filter(|c| *c == '"' || *c == '\'') {
        return unquote(raw, quote).map(ArgumentValue::String);
    }

    match raw {
        "True" | "true" => return Ok(ArgumentValue::Bool(true)),
        "False" | "false" => return Ok(ArgumentValue::Bool(false)),
        "None" | "null" => return Ok(ArgumentValue::Null),
        _ => {}
    }

    if let Some(inner) = raw.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        return split_top_level(inner)?
            .into_iter()
            .filter(|item| !item.trim().is_empty())
            .map(parse_literal)
            .collect::<Result<Vec<_>, _>>()
            .map(ArgumentValue::List);
    }

    if raw.starts_with('{') {
        return serde_json::from_str::<serde_json::Value>(raw)
            .map(ArgumentValue::from)
            .map_err(|e| format!("invalid mapping literal: {e}"));
    }

    let numeric = !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'));
    if numeric {
        if let Ok(n) = raw.parse::<i64>() {
            return Ok(ArgumentValue::Integer(n));
        }
        if let Ok(n) = raw.parse::<f64>() {
            return Ok(ArgumentValue::Float(n));
        }
    }

    Err(format!("unsupported argument value '{raw}'"))
}

fn unquote(raw: &str, quote: char) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().skip(1);

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => return Err("dangling escape in string literal".to_owned()),
            },
            c if c == quote => {
                return if chars.next().is_none() {
                    Ok(out)
                } else {
                    Err(format!("unexpected text after string literal in '{raw}'"))
                };
            }
            c => out.push(c),
        }
    }

    Err(format!("unterminated string literal '{raw}'"))
}

/// Split on commas that are outside quotes and brackets
fn split_top_level(raw: &str) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth: usize = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (index, c) in raw.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced '{c}' in '{raw}'"))?;
            }
            ',' if depth == 0 => {
                parts.push(&raw[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err(format!("unterminated string literal in '{raw}'"));
    }
    if depth != 0 {
        return Err(format!("unbalanced brackets in '{raw}'"));
    }

    parts.push(&raw[start..]);
    Ok(parts)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_tool_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
