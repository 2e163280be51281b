use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Matches `{{ env.NAME }}` and `{{ env.NAME | default("value") }}`
fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*([A-Za-z0-9_.]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
            .expect("placeholder pattern is valid")
    })
}

/// Substitute environment placeholders in raw config text
///
/// Runs before TOML parsing so every string field can reference the
/// environment. Comment lines are copied through untouched, which lets a
/// config keep examples of variables that are not set.
pub fn expand_env(input: &str) -> anyhow::Result<String> {
    let mut output = String::with_capacity(input.len());

    for (index, line) in input.split('\n').enumerate() {
        if index > 0 {
            output.push('\n');
        }

        if line.trim_start().starts_with('#') {
            output.push_str(line);
        } else {
            output.push_str(&expand_line(line)?);
        }
    }

    Ok(output)
}

fn expand_line(line: &str) -> anyhow::Result<String> {
    let mut expanded = String::with_capacity(line.len());
    let mut cursor = 0;

    for captures in placeholder().captures_iter(line) {
        let Some(whole) = captures.get(0) else { continue };

        expanded.push_str(&line[cursor..whole.start()]);
        expanded.push_str(&resolve(&captures)?);
        cursor = whole.end();
    }

    expanded.push_str(&line[cursor..]);
    Ok(expanded)
}

fn resolve(captures: &Captures<'_>) -> anyhow::Result<String> {
    let key = captures.get(1).map_or("", |m| m.as_str());
    let fallback = captures.get(2).map(|m| m.as_str());

    let Some(name) = key.strip_prefix("env.").filter(|name| !name.contains('.')) else {
        anyhow::bail!("only variables scoped with 'env.' are supported: `{key}`");
    };

    match (std::env::var(name), fallback) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(fallback)) => Ok(fallback.to_owned()),
        (Err(_), None) => anyhow::bail!("environment variable not found: `{name}`"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let input = "model = \"Llama3.1-8B-Instruct\"\n";
        assert_eq!(expand_env(input).unwrap(), input);
    }

    #[test]
    fn substitutes_set_variable() {
        temp_env::with_var("INFER_TEST_KEY", Some("sk-123"), || {
            let result = expand_env("api_key = \"{{ env.INFER_TEST_KEY }}\"").unwrap();
            assert_eq!(result, "api_key = \"sk-123\"");
        });
    }

    #[test]
    fn substitutes_several_variables_across_lines() {
        let vars = [("INFER_A", Some("a")), ("INFER_B", Some("b"))];
        temp_env::with_vars(vars, || {
            let result = expand_env("a = \"{{ env.INFER_A }}\"\nb = \"{{env.INFER_B}}\"").unwrap();
            assert_eq!(result, "a = \"a\"\nb = \"b\"");
        });
    }

    #[test]
    fn missing_variable_is_an_error() {
        temp_env::with_var_unset("INFER_MISSING", || {
            let err = expand_env("key = \"{{ env.INFER_MISSING }}\"").unwrap_err();
            assert!(err.to_string().contains("INFER_MISSING"));
        });
    }

    #[test]
    fn default_applies_only_when_unset() {
        temp_env::with_var_unset("INFER_OPTIONAL", || {
            let result = expand_env("key = \"{{ env.INFER_OPTIONAL | default(\"fallback\") }}\"").unwrap();
            assert_eq!(result, "key = \"fallback\"");
        });

        temp_env::with_var("INFER_OPTIONAL", Some("set"), || {
            let result = expand_env("key = \"{{ env.INFER_OPTIONAL | default(\"fallback\") }}\"").unwrap();
            assert_eq!(result, "key = \"set\"");
        });
    }

    #[test]
    fn rejects_unscoped_placeholder() {
        let err = expand_env("key = \"{{ vars.NAME }}\"").unwrap_err();
        assert!(err.to_string().contains("only variables scoped with 'env.'"));
    }

    #[test]
    fn comment_lines_are_not_expanded() {
        temp_env::with_var_unset("INFER_MISSING", || {
            let input = "  # api_key = \"{{ env.INFER_MISSING }}\"\nkey = 1";
            assert_eq!(expand_env(input).unwrap(), input);
        });
    }
}
