//! In-memory predicate evaluation and value ordering.
//!
//! This evaluator defines the meaning of every expression; store pushdown
//! must agree with it. Type mismatches never raise: the predicate simply
//! does not hold.

use super::expr::{CollectionMode, CompareOp, Existence, Expr, LogicOp, Scalar, StringOp};
use super::schema::Schema;
use super::temporal::{parse_date_text, parse_day, parse_instant};
use super::types::{FieldRef, FieldType};
use crate::store::{lookup, Row};
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use std::cmp::Ordering;

static NULL: Json = Json::Null;

/// A field condition with every template already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundPredicate {
    pub field: FieldRef,
    pub expr: Expr,
}

impl BoundPredicate {
    pub fn new(field: FieldRef, expr: Expr) -> Self {
        Self { field, expr }
    }

    pub fn matches(&self, row: &Row, schema: &Schema, now: DateTime<Utc>) -> bool {
        let value = lookup(row, &self.field).unwrap_or(&NULL);
        evaluate(&self.expr, value, schema.field_type(&self.field), now)
    }
}

impl std::fmt::Display for BoundPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.expr)
    }
}

/// Evaluate `expr` against one field value. Missing fields are `null`.
pub fn evaluate(expr: &Expr, value: &Json, ty: Option<FieldType>, now: DateTime<Utc>) -> bool {
    match expr {
        Expr::Literal(scalar) => literal_matches(scalar, value, ty),
        Expr::Comparison(op, scalar) => comparison_holds(*op, scalar, value, ty),
        Expr::Temporal(temporal) => {
            any_element(value, |v| parse_instant(v).is_some_and(|at| temporal.holds(at, now)))
        }
        Expr::Collection(mode, patterns) => collection_holds(*mode, patterns, value),
        Expr::StringOp(op) => any_element(value, |v| match v {
            Json::String(s) => string_op_holds(op, s),
            _ => false,
        }),
        Expr::Existence(Existence::Exists) => is_present(value),
        Expr::Existence(Existence::Missing) => !is_present(value),
        Expr::Existence(Existence::Has(names)) => match value {
            Json::Object(map) => names
                .iter()
                .all(|n| map.get(n).is_some_and(is_present)),
            Json::Array(items) => names
                .iter()
                .all(|n| items.iter().any(|i| i.as_str() == Some(n.as_str()))),
            _ => false,
        },
        Expr::Compound(LogicOp::And, children) => {
            children.iter().all(|c| evaluate(c, value, ty, now))
        }
        Expr::Compound(LogicOp::Or, children) => {
            children.iter().any(|c| evaluate(c, value, ty, now))
        }
        Expr::Compound(LogicOp::Not, children) => {
            !children.iter().all(|c| evaluate(c, value, ty, now))
        }
    }
}

/// Lists satisfy element-wise conditions when any element does.
fn any_element(value: &Json, test: impl Fn(&Json) -> bool) -> bool {
    match value {
        Json::Array(items) => items.iter().any(test),
        other => test(other),
    }
}

/// Not null, not an empty string, not an empty list or object.
pub fn is_present(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::String(s) => !s.is_empty(),
        Json::Array(items) => !items.is_empty(),
        Json::Object(map) => !map.is_empty(),
        _ => true,
    }
}

// ============================================================================
// Equality
// ============================================================================

fn literal_matches(scalar: &Scalar, value: &Json, ty: Option<FieldType>) -> bool {
    if *scalar == Scalar::Null {
        return value.is_null();
    }
    if ty == Some(FieldType::Date) {
        if let Scalar::Str(text) = scalar {
            let Some(at) = parse_instant(value) else {
                return false;
            };
            if let Some(day) = parse_day(text) {
                return at.date_naive() == day;
            }
            if let Some(expected) = parse_date_text(text) {
                return at == expected;
            }
        }
    }
    any_element(value, |v| loose_eq(v, scalar))
}

fn numeric(value: &Json) -> Option<f64> {
    match value {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn scalar_numeric(scalar: &Scalar) -> Option<f64> {
    match scalar {
        Scalar::Int(i) => Some(*i as f64),
        Scalar::Float(f) => Some(*f),
        Scalar::Str(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn bool_text(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Loose equality: numeric across types and numeric strings, bool text.
fn loose_eq(value: &Json, scalar: &Scalar) -> bool {
    match (value, scalar) {
        (Json::Null, Scalar::Null) => true,
        (Json::Null, _) | (_, Scalar::Null) => false,
        (Json::Bool(b), Scalar::Bool(s)) => b == s,
        (Json::Bool(b), Scalar::Str(s)) => bool_text(s) == Some(*b),
        (Json::String(v), Scalar::Bool(s)) => bool_text(v) == Some(*s),
        (Json::String(v), Scalar::Str(s)) if v == s => true,
        (Json::Bool(_), _) | (_, Scalar::Bool(_)) => false,
        _ => match (numeric(value), scalar_numeric(scalar)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

// ============================================================================
// Ordering comparisons
// ============================================================================

fn comparison_holds(op: CompareOp, scalar: &Scalar, value: &Json, ty: Option<FieldType>) -> bool {
    if *scalar == Scalar::Null {
        return match op {
            CompareOp::Eq => value.is_null(),
            CompareOp::Ne => !value.is_null(),
            _ => false,
        };
    }
    any_element(value, |v| {
        compare_scalar(v, scalar, ty).is_some_and(|ordering| op.holds(ordering))
    })
}

/// Typed comparison of a value against an operand; `None` on mismatch.
fn compare_scalar(value: &Json, scalar: &Scalar, ty: Option<FieldType>) -> Option<Ordering> {
    if value.is_null() {
        return None;
    }
    let ty = ty.filter(|t| *t != FieldType::List).or_else(|| infer_type(value));
    match ty? {
        FieldType::Int | FieldType::Float => compare_numeric(value, scalar),
        FieldType::Date => {
            let at = parse_instant(value)?;
            let other = match scalar {
                Scalar::Str(s) => parse_date_text(s)?,
                Scalar::Int(secs) => DateTime::from_timestamp(*secs, 0)?,
                _ => return None,
            };
            Some(at.cmp(&other))
        }
        FieldType::Text => match (value, scalar) {
            (Json::String(v), Scalar::Str(s)) => Some(v.as_bytes().cmp(s.as_bytes())),
            _ => None,
        },
        FieldType::Bool => match (value, scalar) {
            (Json::Bool(v), Scalar::Bool(s)) => Some(v.cmp(s)),
            _ => None,
        },
        FieldType::List | FieldType::Object => None,
    }
}

fn infer_type(value: &Json) -> Option<FieldType> {
    match value {
        Json::Number(n) if n.is_i64() => Some(FieldType::Int),
        Json::Number(_) => Some(FieldType::Float),
        Json::String(_) => Some(FieldType::Text),
        Json::Bool(_) => Some(FieldType::Bool),
        _ => None,
    }
}

fn compare_numeric(value: &Json, scalar: &Scalar) -> Option<Ordering> {
    if let (Some(a), Scalar::Int(b)) = (value.as_i64(), scalar) {
        return Some(a.cmp(b));
    }
    let a = match value {
        Json::Number(n) => n.as_f64()?,
        _ => return None,
    };
    let b = match scalar {
        Scalar::Int(i) => *i as f64,
        Scalar::Float(f) => *f,
        _ => return None,
    };
    a.partial_cmp(&b)
}

// ============================================================================
// Collections and strings
// ============================================================================

/// Items of a hierarchical-string set: a list, or a single scalar.
fn set_items(value: &Json) -> Vec<String> {
    let text = |v: &Json| match v {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    };
    match value {
        Json::Array(items) => items.iter().filter_map(text).collect(),
        other => text(other).into_iter().collect(),
    }
}

/// Exact match, or `prefix/*` matching anything strictly under `prefix/`.
pub fn pattern_matches(pattern: &str, item: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) if prefix.ends_with('/') => item.starts_with(prefix),
        _ => item == pattern,
    }
}

fn collection_holds(mode: CollectionMode, patterns: &[String], value: &Json) -> bool {
    let items = set_items(value);
    let hit = |p: &String| items.iter().any(|item| pattern_matches(p, item));
    match mode {
        CollectionMode::Any => patterns.iter().any(hit),
        CollectionMode::All => patterns.iter().all(hit),
        CollectionMode::None => !patterns.iter().any(hit),
    }
}

fn string_op_holds(op: &StringOp, text: &str) -> bool {
    match op {
        StringOp::Contains(needle) => text.to_lowercase().contains(&needle.to_lowercase()),
        StringOp::StartsWith(prefix) => text.to_lowercase().starts_with(&prefix.to_lowercase()),
        StringOp::Matches(pattern) => pattern.is_match(text),
        StringOp::Under(path) => {
            let path = path.trim_end_matches('/');
            text == path
                || text
                    .strip_prefix(path)
                    .is_some_and(|rest| rest.starts_with('/'))
        }
    }
}

// ============================================================================
// Sorting
// ============================================================================

/// Total order of two non-null values of one field, by field type.
pub fn order_values(a: &Json, b: &Json, ty: Option<FieldType>) -> Ordering {
    match ty.or_else(|| infer_type(a)) {
        Some(FieldType::Date) => match (parse_instant(a), parse_instant(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => order_fallback(a, b),
        },
        Some(FieldType::Int | FieldType::Float) => match (a, b) {
            (Json::Number(x), Json::Number(y)) => match (x.as_i64(), y.as_i64()) {
                (Some(i), Some(j)) => i.cmp(&j),
                _ => {
                    let x = x.as_f64().unwrap_or(f64::NAN);
                    let y = y.as_f64().unwrap_or(f64::NAN);
                    x.total_cmp(&y)
                }
            },
            _ => order_fallback(a, b),
        },
        Some(FieldType::Text) => match (a, b) {
            (Json::String(x), Json::String(y)) => x.as_bytes().cmp(y.as_bytes()),
            _ => order_fallback(a, b),
        },
        Some(FieldType::Bool) => match (a, b) {
            (Json::Bool(x), Json::Bool(y)) => x.cmp(y),
            _ => order_fallback(a, b),
        },
        _ => order_fallback(a, b),
    }
}

/// Mixed or structured values: rank by kind, then by serialized form.
fn order_fallback(a: &Json, b: &Json) -> Ordering {
    fn rank(v: &Json) -> u8 {
        match v {
            Json::Null => 0,
            Json::Bool(_) => 1,
            Json::Number(_) => 2,
            Json::String(_) => 3,
            Json::Array(_) => 4,
            Json::Object(_) => 5,
        }
    }
    rank(a)
        .cmp(&rank(b))
        .then_with(|| a.to_string().cmp(&b.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grammar::parse_expr;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        parse_date_text("2024-02-01T00:00:00Z").unwrap()
    }

    fn holds(expr: &str, value: Json, ty: Option<FieldType>) -> bool {
        evaluate(&parse_expr(expr).unwrap(), &value, ty, now())
    }

    #[test]
    fn test_eval_wildcard_collection() {
        let tags = json!(["ai/nlp", "rust"]);
        assert!(holds("any [ai/*]", tags.clone(), Some(FieldType::List)));
        assert!(!holds("any [ai/*]", json!(["ai"]), Some(FieldType::List)));
        assert!(!holds("any [ai/*]", json!(["aix/foo"]), Some(FieldType::List)));
        assert!(holds("all [ai/*, rust]", tags.clone(), Some(FieldType::List)));
        assert!(!holds("all [ai/*, go]", tags.clone(), Some(FieldType::List)));
        assert!(holds("none [go, python/*]", tags.clone(), Some(FieldType::List)));
        assert!(holds("any [rust]", json!("rust"), Some(FieldType::List)));
    }

    #[test]
    fn test_eval_temporal_against_now() {
        let date = Some(FieldType::Date);
        assert!(holds("within 7 days", json!("2024-01-25"), date));
        assert!(!holds("within 7 days", json!("2024-01-24"), date));
        assert!(holds("before 2024-01-01", json!("2023-12-31T23:59:59Z"), date));
        assert!(holds("since 2024-01-01", json!("2024-01-01"), date));
        assert!(!holds("after 2024-01-01", json!(null), date));
        assert!(!holds("after 2024-01-01", json!("garbage"), date));
    }

    #[test]
    fn test_eval_string_ops() {
        let text = Some(FieldType::Text);
        assert!(holds("contains \"RUST\"", json!("Learning Rust"), text));
        assert!(holds("starts_with https", json!("HTTPS://x"), text));
        assert!(holds("matches \"^a.c$\"", json!("abc"), text));
        assert!(holds("under projects", json!("projects/web"), text));
        assert!(holds("under projects", json!("projects"), text));
        assert!(!holds("under projects", json!("projectsx"), text));
        assert!(holds("contains nlp", json!(["ai/nlp"]), Some(FieldType::List)));
        assert!(!holds("contains 1", json!(1), Some(FieldType::Int)));
    }

    #[test]
    fn test_eval_existence() {
        assert!(holds("exists", json!("x"), None));
        assert!(!holds("exists", json!(""), None));
        assert!(holds("missing", json!([]), None));
        assert!(holds("missing", json!({}), None));
        assert!(holds("has [summary]", json!({"summary": "s", "words": 0}), None));
        assert!(!holds("has [summary, lang]", json!({"summary": "s", "lang": ""}), None));
        assert!(holds("has [rust]", json!(["rust", "go"]), None));
    }

    #[test]
    fn test_eval_loose_literal() {
        let lit = |s: Scalar, v: Json, ty| evaluate(&Expr::Literal(s), &v, ty, now());
        assert!(lit(Scalar::Int(3), json!(3.0), Some(FieldType::Int)));
        assert!(lit(Scalar::Str("3".into()), json!(3), Some(FieldType::Int)));
        assert!(lit(Scalar::Bool(true), json!("TRUE"), None));
        assert!(lit(Scalar::Str("false".into()), json!(false), Some(FieldType::Bool)));
        assert!(lit(Scalar::Null, json!(null), None));
        assert!(!lit(Scalar::Null, json!(0), None));
        assert!(lit(Scalar::Str("rust".into()), json!(["go", "rust"]), None));
        assert!(!lit(Scalar::Str("Rust".into()), json!("rust"), Some(FieldType::Text)));
    }

    #[test]
    fn test_eval_date_literal_whole_day() {
        let date = Some(FieldType::Date);
        assert!(holds("2024-01-15", json!("2024-01-15T18:30:00Z"), date));
        assert!(!holds("2024-01-15", json!("2024-01-16T00:00:00Z"), date));
    }

    #[test]
    fn test_eval_comparisons_typed() {
        let int = Some(FieldType::Int);
        assert!(holds(">= 3", json!(3), int));
        assert!(holds("> 2.5", json!(3), int));
        assert!(!holds("> 2", json!("5"), int));
        assert!(!holds("> 2", json!(null), int));
        assert!(holds("!= null", json!(1), int));
        assert!(holds("== null", json!(null), int));
        assert!(holds("< \"b\"", json!("a"), Some(FieldType::Text)));
        assert!(!holds("< 5", json!("a"), Some(FieldType::Text)));
        assert!(holds(">= 2024-01-01", json!("2024-01-02"), Some(FieldType::Date)));
        assert!(holds("> 1", json!(2), None));
    }

    #[test]
    fn test_eval_compound() {
        let e = Expr::all_of([parse_expr(">= 3").unwrap(), parse_expr("< 10").unwrap()]);
        assert!(evaluate(&e, &json!(5), Some(FieldType::Int), now()));
        assert!(!evaluate(&e, &json!(10), Some(FieldType::Int), now()));
        assert!(evaluate(&!e, &json!(10), Some(FieldType::Int), now()));
    }

    #[test]
    fn test_order_values_by_type() {
        assert_eq!(order_values(&json!(2), &json!(10), Some(FieldType::Int)), Ordering::Less);
        assert_eq!(
            order_values(&json!("2024-01-02"), &json!("2023-12-31T00:00:00Z"), Some(FieldType::Date)),
            Ordering::Greater
        );
        assert_eq!(order_values(&json!("B"), &json!("a"), Some(FieldType::Text)), Ordering::Less);
        assert_eq!(order_values(&json!(1.5), &json!(1), None), Ordering::Greater);
    }
}
