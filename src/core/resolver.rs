//! Parameter binding and `{{params.key}}` template resolution.
//!
//! Supplied values are validated and coerced to the declared type, so a
//! CLI string like `"3"` binds as the integer 3 for an `int` parameter.
//! Templates are substituted on the raw document value and parsed afterwards.

use super::error::{ExecutionError, ExprError};
use super::expr::Expr;
use super::grammar::{expr_from_value, quote_item};
use super::query::{Condition, Query};
use super::temporal::DateSpec;
use super::types::{ParamSpec, ParamType};
use indexmap::IndexMap;
use serde_json::Value as Json;
use serde_yaml_ng::Value;

/// Bound parameter values, keyed by name.
pub type Params = IndexMap<String, Json>;

const PREFIX: &str = "params.";

/// Whether any string inside `value` carries a `{{` placeholder.
pub fn contains_template(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains("{{"),
        Value::Sequence(items) => items.iter().any(contains_template),
        Value::Mapping(map) => map.values().any(contains_template),
        Value::Tagged(tagged) => contains_template(&tagged.value),
        _ => false,
    }
}

/// Names of every parameter referenced by placeholders in `value`.
pub fn template_params(value: &Value) -> Result<Vec<String>, String> {
    let mut names = Vec::new();
    collect_params(value, &mut names)?;
    Ok(names)
}

fn collect_params(value: &Value, names: &mut Vec<String>) -> Result<(), String> {
    match value {
        Value::String(s) => {
            for (_, _, key) in placeholders(s)? {
                if !names.contains(&key) {
                    names.push(key);
                }
            }
        }
        Value::Sequence(items) => {
            for item in items {
                collect_params(item, names)?;
            }
        }
        Value::Mapping(map) => {
            for item in map.values() {
                collect_params(item, names)?;
            }
        }
        Value::Tagged(tagged) => collect_params(&tagged.value, names)?,
        _ => {}
    }
    Ok(())
}

/// Locate placeholders as `(open, close, param)` byte ranges.
fn placeholders(template: &str) -> Result<Vec<(usize, usize, String)>, String> {
    let mut found = Vec::new();
    let mut start = 0;
    while let Some(open) = template[start..].find("{{") {
        let open = start + open;
        let close = template[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = template[open + 2..close - 2].trim();
        let name = key
            .strip_prefix(PREFIX)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| format!("unknown template variable: {}", key))?;
        found.push((open, close, name.to_string()));
        start = close;
    }
    Ok(found)
}

/// Replace every placeholder in `template` with its textual value.
pub fn resolve_template(template: &str, params: &Params) -> Result<String, String> {
    let mut result = String::with_capacity(template.len());
    let mut last = 0;
    for (open, close, name) in placeholders(template)? {
        let value = params
            .get(&name)
            .ok_or_else(|| format!("unknown param: {}", name))?;
        result.push_str(&template[last..open]);
        result.push_str(&render_text(value));
        last = close;
    }
    result.push_str(&template[last..]);
    Ok(result)
}

fn render_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Array(items) => {
            let items: Vec<String> = items.iter().map(|i| quote_item(&render_text(i))).collect();
            format!("[{}]", items.join(", "))
        }
        other => other.to_string(),
    }
}

/// Substitute placeholders throughout a document value.
///
/// A string that is exactly one placeholder takes the parameter's native
/// value, so a list parameter becomes an implicit `any`.
pub fn substitute(value: &Value, params: &Params) -> Result<Value, String> {
    match value {
        Value::String(s) => {
            let slots = placeholders(s)?;
            if let [(0, close, name)] = slots.as_slice() {
                if *close == s.len() {
                    let bound = params
                        .get(name)
                        .ok_or_else(|| format!("unknown param: {}", name))?;
                    return serde_yaml_ng::to_value(bound).map_err(|e| e.to_string());
                }
            }
            resolve_template(s, params).map(Value::String)
        }
        Value::Sequence(items) => items
            .iter()
            .map(|item| substitute(item, params))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence),
        Value::Mapping(map) => {
            let mut out = serde_yaml_ng::Mapping::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), substitute(v, params)?);
            }
            Ok(Value::Mapping(out))
        }
        Value::Tagged(tagged) => substitute(&tagged.value, params),
        other => Ok(other.clone()),
    }
}

/// Turn a condition into an expression, substituting bound parameters.
pub fn resolve_condition(condition: &Condition, params: &Params) -> Result<Expr, ExprError> {
    match condition {
        Condition::Expr(e) => Ok(e.clone()),
        Condition::Template(raw) => {
            let fragment = || condition.to_string();
            let value = substitute(raw, params)
                .map_err(|reason| ExprError::new(fragment(), reason))?;
            expr_from_value(&value)
        }
    }
}

// ============================================================================
// Parameter binding
// ============================================================================

/// A declaration is valid when its default conforms to its type.
pub fn check_param_spec(name: &str, spec: &ParamSpec) -> Result<(), String> {
    if !spec.choices.is_empty() && !matches!(spec.ty, ParamType::String | ParamType::List) {
        return Err(format!("choices are only allowed for string or list, not {}", spec.ty));
    }
    if let Some(default) = &spec.default {
        coerce(name, spec, default).map_err(|e| format!("default: {}", e))?;
    }
    Ok(())
}

/// Bind every declared parameter: supplied value, else default, else error.
pub fn bind_params(query: &Query, supplied: &Params) -> Result<Params, ExecutionError> {
    let mut bound = Params::new();
    for (name, spec) in &query.params {
        let value = match (supplied.get(name), &spec.default) {
            (Some(v), _) => v,
            (None, Some(default)) => default,
            (None, None) => {
                return Err(ExecutionError::MissingParameter {
                    query: query.name.clone(),
                    param: name.clone(),
                })
            }
        };
        let coerced = coerce(name, spec, value).map_err(|reason| ExecutionError::InvalidParameter {
            query: query.name.clone(),
            param: name.clone(),
            reason,
        })?;
        bound.insert(name.clone(), coerced);
    }
    Ok(bound)
}

/// Validate a single value against its declared type and coerce it.
pub fn coerce(name: &str, spec: &ParamSpec, value: &Json) -> Result<Json, String> {
    let coerced = match spec.ty {
        ParamType::String => match value {
            Json::String(_) => value.clone(),
            Json::Number(_) | Json::Bool(_) => Json::String(value.to_string()),
            _ => return Err(format!("'{}' must be a string", name)),
        },
        ParamType::Int => match value {
            Json::Number(n) if n.is_i64() => value.clone(),
            Json::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Json::from)
                .map_err(|_| format!("'{}' must be an integer, got {:?}", name, s))?,
            _ => return Err(format!("'{}' must be an integer", name)),
        },
        ParamType::Float => {
            let f = match value {
                Json::Number(n) => n.as_f64(),
                Json::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            f.filter(|f| f.is_finite())
                .and_then(serde_json::Number::from_f64)
                .map(Json::Number)
                .ok_or_else(|| format!("'{}' must be a number", name))?
        }
        ParamType::Bool => match value {
            Json::Bool(_) => value.clone(),
            Json::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Json::Bool(true),
                "false" => Json::Bool(false),
                _ => return Err(format!("'{}' must be a boolean", name)),
            },
            _ => return Err(format!("'{}' must be a boolean", name)),
        },
        ParamType::Date => match value {
            Json::String(s) => {
                DateSpec::parse(s).map_err(|e| format!("'{}': {}", name, e.reason))?;
                value.clone()
            }
            Json::Number(n) if n.is_i64() => value.clone(),
            _ => return Err(format!("'{}' must be a date", name)),
        },
        ParamType::List => match value {
            Json::Array(items) => {
                if items.iter().any(|i| i.is_array() || i.is_object()) {
                    return Err(format!("'{}' must be a list of scalars", name));
                }
                value.clone()
            }
            Json::String(s) => Json::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| Json::String(item.to_string()))
                    .collect(),
            ),
            _ => return Err(format!("'{}' must be a list", name)),
        },
    };

    if !spec.choices.is_empty() {
        let values: Vec<String> = match &coerced {
            Json::Array(items) => items.iter().map(render_text).collect(),
            other => vec![render_text(other)],
        };
        if let Some(bad) = values.iter().find(|v| !spec.choices.contains(v)) {
            return Err(format!(
                "'{}' must be one of: {} (got {:?})",
                name,
                spec.choices.join(", "),
                bad
            ));
        }
    }
    Ok(coerced)
}
