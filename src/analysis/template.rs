//! The `{{ var }}` / `{{ var | default(other) }}` template grammar.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static BLOCK_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{[^}]+\}\}").unwrap());
static BRACKET_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\[\s*['"]([A-Za-z0-9_\-]+)['"]\s*\]"#).unwrap());

/// One `{{ ... }}` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateBlock {
    /// The block exactly as written, braces included.
    pub text: String,
    /// Primary variable name, spaces removed, `a['b']` folded to `a.b`.
    pub name: String,
    /// Bareword argument of a `default(...)` filter.
    pub default: Option<String>,
}

pub fn has_template(text: &str) -> bool {
    BLOCK_PATTERN.is_match(text)
}

/// Every block in `text`, in order of appearance.
pub fn blocks(text: &str) -> Vec<TemplateBlock> {
    BLOCK_PATTERN
        .find_iter(text)
        .filter_map(|m| parse_block(m.as_str()))
        .collect()
}

fn parse_block(raw: &str) -> Option<TemplateBlock> {
    let inner = raw.trim_start_matches("{{").trim_end_matches("}}");
    let mut parts = inner.split('|');
    let name: String = parts.next()?.chars().filter(|c| !c.is_whitespace()).collect();
    if name.is_empty() {
        return None;
    }
    let name = if name.starts_with("hostvars[") || name.starts_with("groups[") {
        name
    } else {
        BRACKET_INDEX.replace_all(&name, ".$1").into_owned()
    };
    let default = parts.find_map(|filter| parse_default(filter.trim()));
    Some(TemplateBlock {
        text: raw.to_string(),
        name,
        default,
    })
}

/// `default(x)` / `d(x)` with a bareword `x`. Quoted and numeric literals
/// are not variable references and yield `None`.
fn parse_default(filter: &str) -> Option<String> {
    let args = filter
        .strip_prefix("default(")
        .or_else(|| filter.strip_prefix("d("))?
        .strip_suffix(')')?;
    let first = args.split(',').next()?.trim();
    let starts_literal = first
        .chars()
        .next()
        .map_or(true, |c| c == '"' || c == '\'' || c.is_ascii_digit());
    if starts_literal {
        return None;
    }
    Some(first.chars().filter(|c| !c.is_whitespace()).collect())
}

/// Variable names referenced by `text`, defaults included, deduplicated.
pub fn variable_names(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for block in blocks(text) {
        for name in std::iter::once(block.name).chain(block.default) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// String form used when a value is spliced into surrounding text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_name_and_default() {
        let b = blocks("{{ pkg_url | default(fallback_url) }}");
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].name, "pkg_url");
        assert_eq!(b[0].default.as_deref(), Some("fallback_url"));
    }

    #[test]
    fn literal_defaults_are_rejected() {
        assert_eq!(blocks("{{ a | default('x') }}")[0].default, None);
        assert_eq!(blocks("{{ a | default(\"x\") }}")[0].default, None);
        assert_eq!(blocks("{{ a | default(3) }}")[0].default, None);
        assert_eq!(blocks("{{ a | lower | d(b) }}")[0].default.as_deref(), Some("b"));
    }

    #[test]
    fn bracket_index_folds_to_dots() {
        assert_eq!(blocks("{{ cfg['paths'][\"bin\"] }}")[0].name, "cfg.paths.bin");
        assert_eq!(blocks("{{ hostvars['web1'].ip }}")[0].name, "hostvars['web1'].ip");
    }

    #[test]
    fn collects_all_names_once() {
        let names = variable_names("{{ a }}/{{ b | default(c) }}/{{ a }}");
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(variable_names("plain").is_empty());
        assert!(has_template("x {{ y }}"));
    }

    #[test]
    fn renders_values_for_splicing() {
        assert_eq!(render_value(&json!("x")), "x");
        assert_eq!(render_value(&json!(8080)), "8080");
        assert_eq!(render_value(&json!(null)), "");
    }
}
