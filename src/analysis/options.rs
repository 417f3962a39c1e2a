//! Loop expansion and per-iteration module option resolution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::context::Context;
use super::template::{self, TemplateBlock};
use crate::ir::{LoopSpec, ResolvedVariable, Task, VariableSource};

/// Module options of one task, resolved once per loop iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionResolution {
    /// One resolved payload per iteration; a task without a loop has one.
    pub iterations: Vec<Value>,
    /// Every variable consulted, first observation per name.
    pub variables: Vec<ResolvedVariable>,
    /// Option key (`""` for a free-form payload) -> mutable variable names
    /// consulted for it.
    pub mutable_vars: BTreeMap<String, Vec<String>>,
}

impl OptionResolution {
    fn observe(&mut self, key: &str, value: &Value, source: VariableSource) {
        if self.variables.iter().any(|v| v.key == key) {
            return;
        }
        self.variables.push(ResolvedVariable {
            key: key.to_string(),
            value: value.clone(),
            source,
        });
    }

    fn mark_mutable(&mut self, option_key: &str, name: &str) {
        let names = self.mutable_vars.entry(option_key.to_string()).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    /// Mutable variables consulted for `option_key`.
    pub fn mutable_for(&self, option_key: &str) -> &[String] {
        self.mutable_vars
            .get(option_key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Value bound to the loop variable for one iteration, plus the variable
/// the loop source was resolved from.
#[derive(Debug, Clone)]
struct LoopBinding {
    var: String,
    value: Value,
    origin: Option<(String, VariableSource)>,
}

impl LoopBinding {
    fn lookup(&self, name: &str) -> Option<Value> {
        if name == self.var {
            return Some(self.value.clone());
        }
        let rest = name.strip_prefix(&self.var)?.strip_prefix('.')?;
        rest.split('.')
            .try_fold(&self.value, |current, segment| match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
            .cloned()
    }
}

fn fan_out(var: &str, value: Value, origin: Option<(String, VariableSource)>) -> Vec<LoopBinding> {
    let bind = |value| LoopBinding {
        var: var.to_string(),
        value,
        origin: origin.clone(),
    };
    match value {
        Value::Array(items) => items.into_iter().map(bind).collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| {
                let mut entry = Map::new();
                entry.insert("key".into(), Value::String(key));
                entry.insert("value".into(), value);
                bind(Value::Object(entry))
            })
            .collect(),
        scalar => vec![bind(scalar)],
    }
}

/// Resolve the first block of a loop expression and fan it out.
fn expand_loop_item(
    ctx: &Context<'_>,
    var: &str,
    text: &str,
    block: &TemplateBlock,
    out: &mut OptionResolution,
) -> Vec<LoopBinding> {
    let (name, resolved) = resolve_with_default(ctx, block);
    out.observe(name, &resolved.value, resolved.source);
    if resolved.is_failed() {
        return vec![LoopBinding {
            var: var.to_string(),
            value: Value::String(text.to_string()),
            origin: Some((name.to_string(), resolved.source)),
        }];
    }
    fan_out(var, resolved.value, Some((name.to_string(), resolved.source)))
}

fn loop_bindings(ctx: &Context<'_>, spec: &LoopSpec, out: &mut OptionResolution) -> Vec<LoopBinding> {
    let var = spec.var.as_str();
    match &spec.source {
        Value::String(text) => match template::blocks(text).first() {
            Some(block) => expand_loop_item(ctx, var, text, block, out),
            None => fan_out(var, Value::String(text.clone()), None),
        },
        Value::Array(items) => items
            .iter()
            .flat_map(|item| match item {
                Value::String(text) => match template::blocks(text).first() {
                    Some(block) => expand_loop_item(ctx, var, text, block, out),
                    None => fan_out(var, item.clone(), None),
                },
                other => vec![LoopBinding {
                    var: var.to_string(),
                    value: other.clone(),
                    origin: None,
                }],
            })
            .collect(),
        other => fan_out(var, other.clone(), None),
    }
}

fn resolve_with_default<'b>(
    ctx: &Context<'_>,
    block: &'b TemplateBlock,
) -> (&'b str, super::context::Resolved) {
    let primary = ctx.resolve_variable(&block.name, &[]);
    if primary.is_failed() {
        if let Some(default) = &block.default {
            let fallback = ctx.resolve_variable(default, &[]);
            if !fallback.is_failed() {
                return (default.as_str(), fallback);
            }
        }
    }
    (block.name.as_str(), primary)
}

/// Resolve one option value for one iteration. Blocks that fail stay in
/// the text; the others are substituted.
fn resolve_option(
    ctx: &Context<'_>,
    option_key: &str,
    value: &Value,
    binding: Option<&LoopBinding>,
    out: &mut OptionResolution,
) -> Value {
    let text = match value {
        Value::String(text) => text,
        Value::Array(items) => {
            return Value::Array(
                items
                    .iter()
                    .map(|item| resolve_option(ctx, option_key, item, binding, out))
                    .collect(),
            )
        }
        Value::Object(map) => {
            return Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), resolve_option(ctx, option_key, v, binding, out)))
                    .collect(),
            )
        }
        other => return other.clone(),
    };

    let mut resolved_text = text.clone();
    for block in template::blocks(text) {
        let looped = binding.and_then(|b| b.lookup(&block.name).map(|v| (b, v)));
        let value = match looped {
            Some((b, value)) => {
                out.observe(&block.name, &value, VariableSource::Loop);
                if let Some((origin, source)) = &b.origin {
                    if source.is_mutable() {
                        out.mark_mutable(option_key, origin);
                    }
                }
                value
            }
            None => {
                let (name, resolved) = resolve_with_default(ctx, &block);
                out.observe(name, &resolved.value, resolved.source);
                if resolved.source.is_mutable() {
                    out.mark_mutable(option_key, name);
                }
                if resolved.is_failed() {
                    continue;
                }
                resolved.value
            }
        };
        if block.text == *text {
            return value;
        }
        resolved_text = resolved_text.replacen(&block.text, &template::render_value(&value), 1);
    }
    Value::String(resolved_text)
}

/// Resolve a task's module options under `ctx`, once per loop iteration.
pub fn resolve_module_options(ctx: &Context<'_>, task: &Task) -> OptionResolution {
    let mut out = OptionResolution::default();
    let bindings = match &task.loop_spec {
        Some(spec) => loop_bindings(ctx, spec, &mut out),
        None => Vec::new(),
    };

    let payload = &task.module_options;
    let resolve_payload = |binding: Option<&LoopBinding>, out: &mut OptionResolution| match payload {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_option(ctx, k, v, binding, out)))
                .collect(),
        ),
        Value::String(_) => resolve_option(ctx, "", payload, binding, out),
        other => other.clone(),
    };

    if task.loop_spec.is_none() {
        let resolved = resolve_payload(None, &mut out);
        out.iterations.push(resolved);
    } else {
        for binding in &bindings {
            let resolved = resolve_payload(Some(binding), &mut out);
            out.iterations.push(resolved);
        }
    }
    out
}
