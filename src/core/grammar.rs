//! String grammar for predicate values.
//!
//! Resolution order for a string: keyword form, comparison prefix, bracketed
//! list, quoted literal, bare literal. A leading token that looks like a
//! misspelt keyword is an error rather than a silent literal.

use super::error::ExprError;
use super::expr::{CollectionMode, CompareOp, Existence, Expr, LogicOp, Pattern, Scalar, StringOp};
use super::temporal::{DateSpec, Span, Temporal};
use serde_yaml_ng::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Within,
    Before,
    After,
    Since,
    Any,
    All,
    None,
    Contains,
    StartsWith,
    Matches,
    Under,
    Exists,
    Missing,
    Has,
}

const KEYWORDS: [(&str, Keyword); 14] = [
    ("within", Keyword::Within),
    ("before", Keyword::Before),
    ("after", Keyword::After),
    ("since", Keyword::Since),
    ("any", Keyword::Any),
    ("all", Keyword::All),
    ("none", Keyword::None),
    ("contains", Keyword::Contains),
    ("starts_with", Keyword::StartsWith),
    ("matches", Keyword::Matches),
    ("under", Keyword::Under),
    ("exists", Keyword::Exists),
    ("missing", Keyword::Missing),
    ("has", Keyword::Has),
];

impl Keyword {
    fn lookup(token: &str) -> Option<Self> {
        let lower = token.to_lowercase();
        KEYWORDS
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, kw)| *kw)
    }

    /// Whether `rest` has the operand shape this keyword expects.
    fn operand_shape_fits(&self, rest: &str) -> bool {
        match self {
            Self::Within => Span::parse(rest).is_ok(),
            Self::Before | Self::After | Self::Since => DateSpec::parse(rest).is_ok(),
            Self::Any | Self::All | Self::None | Self::Has => {
                rest.starts_with('[') && rest.ends_with(']')
            }
            Self::Contains | Self::StartsWith | Self::Matches | Self::Under => {
                rest.len() >= 2 && rest.starts_with('"') && rest.ends_with('"')
            }
            Self::Exists | Self::Missing => rest.is_empty(),
        }
    }
}

/// Parse one predicate value written in the string grammar.
pub fn parse_expr(text: &str) -> Result<Expr, ExprError> {
    let trimmed = text.trim();
    let (head, rest) = split_head(trimmed);

    if let Some(keyword) = Keyword::lookup(head) {
        return parse_keyword(keyword, rest, trimmed);
    }

    for op in CompareOp::ALL {
        if let Some(operand) = trimmed.strip_prefix(op.symbol()) {
            let operand = operand.trim();
            if operand.is_empty() {
                return Err(ExprError::new(trimmed, format!("missing operand after '{}'", op.symbol())));
            }
            return Ok(Expr::Comparison(op, parse_scalar(operand, trimmed)?));
        }
    }

    if trimmed.starts_with('[') || trimmed.ends_with(']') {
        return Ok(Expr::Collection(CollectionMode::Any, parse_list(trimmed, trimmed)?));
    }

    if trimmed.starts_with('"') {
        return Ok(Expr::Literal(Scalar::Str(unquote(trimmed, trimmed)?)));
    }

    reject_lookalike(head, rest, trimmed)?;
    Ok(Expr::Literal(Scalar::Str(trimmed.to_string())))
}

fn split_head(text: &str) -> (&str, &str) {
    match text.find(char::is_whitespace) {
        Some(pos) => (&text[..pos], text[pos..].trim()),
        None => (text, ""),
    }
}

fn parse_keyword(keyword: Keyword, rest: &str, whole: &str) -> Result<Expr, ExprError> {
    let relocate = |e: ExprError| ExprError::new(whole, e.reason);
    match keyword {
        Keyword::Within => Span::parse(rest)
            .map(|s| Expr::Temporal(Temporal::Within(s)))
            .map_err(relocate),
        Keyword::Before | Keyword::After | Keyword::Since => {
            let operand = if rest.starts_with('"') {
                unquote(rest, whole)?
            } else {
                rest.to_string()
            };
            let spec = DateSpec::parse(&operand).map_err(relocate)?;
            Ok(Expr::Temporal(match keyword {
                Keyword::Before => Temporal::Before(spec),
                Keyword::After => Temporal::After(spec),
                _ => Temporal::Since(spec),
            }))
        }
        Keyword::Any | Keyword::All | Keyword::None => {
            let mode = match keyword {
                Keyword::Any => CollectionMode::Any,
                Keyword::All => CollectionMode::All,
                _ => CollectionMode::None,
            };
            Ok(Expr::Collection(mode, parse_list(rest, whole)?))
        }
        Keyword::Contains | Keyword::StartsWith | Keyword::Matches | Keyword::Under => {
            let operand = if rest.starts_with('"') {
                unquote(rest, whole)?
            } else {
                rest.to_string()
            };
            if operand.is_empty() {
                return Err(ExprError::new(whole, "missing text operand"));
            }
            let op = match keyword {
                Keyword::Contains => StringOp::Contains(operand),
                Keyword::StartsWith => StringOp::StartsWith(operand),
                Keyword::Under => StringOp::Under(operand),
                _ => StringOp::Matches(
                    Pattern::new(&operand)
                        .map_err(|e| ExprError::new(whole, format!("invalid regex: {}", e)))?,
                ),
            };
            Ok(Expr::StringOp(op))
        }
        Keyword::Exists | Keyword::Missing => {
            if !rest.is_empty() {
                return Err(ExprError::new(whole, "takes no operand"));
            }
            Ok(Expr::Existence(if keyword == Keyword::Exists {
                Existence::Exists
            } else {
                Existence::Missing
            }))
        }
        Keyword::Has => {
            let fields = parse_list(rest, whole)?;
            if fields.is_empty() {
                return Err(ExprError::new(whole, "'has' needs at least one field"));
            }
            Ok(Expr::Existence(Existence::Has(fields)))
        }
    }
}

/// Error when `head` is a near-miss of a keyword and `rest` fits its operand.
fn reject_lookalike(head: &str, rest: &str, whole: &str) -> Result<(), ExprError> {
    if head.is_empty() {
        return Ok(());
    }
    let lower = head.to_lowercase();
    let squashed: String = lower.chars().filter(|c| *c != '_' && *c != '-').collect();
    for (name, keyword) in KEYWORDS {
        let name_squashed: String = name.chars().filter(|c| *c != '_').collect();
        let variant = squashed == name_squashed;
        let typo = name.len() >= 5 && edit_distance(&lower, name) == 1;
        if (variant || typo) && keyword.operand_shape_fits(rest) {
            return Err(ExprError::new(
                whole,
                format!("'{}' looks like the keyword '{}'", head, name),
            ));
        }
    }
    Ok(())
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}

/// Parse a comparison operand.
pub fn parse_scalar(text: &str, whole: &str) -> Result<Scalar, ExprError> {
    let text = text.trim();
    if text.starts_with('"') {
        return unquote(text, whole).map(Scalar::Str);
    }
    match text.to_ascii_lowercase().as_str() {
        "true" => return Ok(Scalar::Bool(true)),
        "false" => return Ok(Scalar::Bool(false)),
        "null" => return Ok(Scalar::Null),
        _ => {}
    }
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Scalar::Int(i));
    }
    if looks_numeric(text) {
        if let Ok(f) = text.parse::<f64>() {
            if f.is_finite() {
                return Ok(Scalar::Float(f));
            }
        }
    }
    Ok(Scalar::Str(text.to_string()))
}

fn looks_numeric(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
}

/// Parse a `"..."` string with `\"` and `\\` escapes; nothing may follow.
fn unquote(text: &str, whole: &str) -> Result<String, ExprError> {
    let mut chars = text.chars();
    if chars.next() != Some('"') {
        return Err(ExprError::new(whole, "expected a quoted string"));
    }
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => out.push(next),
                None => break,
            },
            '"' => {
                if !chars.as_str().trim().is_empty() {
                    return Err(ExprError::new(whole, "unexpected text after closing quote"));
                }
                return Ok(out);
            }
            _ => out.push(c),
        }
    }
    Err(ExprError::new(whole, "unbalanced quote"))
}

/// Parse `[a, "b c", d/*]` into its items.
fn parse_list(text: &str, whole: &str) -> Result<Vec<String>, ExprError> {
    let text = text.trim();
    let inner = match (text.strip_prefix('['), text.ends_with(']')) {
        (Some(open), true) => &open[..open.len() - 1],
        (None, false) => return Err(ExprError::new(whole, "expected a bracketed list")),
        _ => return Err(ExprError::new(whole, "unbalanced brackets")),
    };

    let mut items = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quote = false;
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if in_quote {
            match c {
                '\\' => match chars.next() {
                    Some(next) => current.push(next),
                    None => return Err(ExprError::new(whole, "unbalanced quote")),
                },
                '"' => in_quote = false,
                _ => current.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                if quoted || !current.trim().is_empty() {
                    return Err(ExprError::new(whole, "unexpected quote inside list item"));
                }
                current.clear();
                quoted = true;
                in_quote = true;
            }
            ',' => {
                items.push(finish_item(&current, quoted, whole)?);
                current.clear();
                quoted = false;
            }
            '[' | ']' => return Err(ExprError::new(whole, "unbalanced brackets")),
            c if quoted => {
                if !c.is_whitespace() {
                    return Err(ExprError::new(whole, "unexpected text after closing quote"));
                }
            }
            c => current.push(c),
        }
    }
    if in_quote {
        return Err(ExprError::new(whole, "unbalanced quote"));
    }
    if !(items.is_empty() && !quoted && current.trim().is_empty()) {
        items.push(finish_item(&current, quoted, whole)?);
    }
    Ok(items)
}

fn finish_item(current: &str, quoted: bool, whole: &str) -> Result<String, ExprError> {
    if quoted {
        return Ok(current.to_string());
    }
    let item = current.trim();
    if item.is_empty() {
        return Err(ExprError::new(whole, "empty list item"));
    }
    Ok(item.to_string())
}

/// Quote a string operand, escaping `"` and `\`.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Render a list item, quoting only when a bare item would not re-parse.
pub fn quote_item(item: &str) -> String {
    let plain = !item.is_empty()
        && item.trim() == item
        && !item.contains(['"', ',', '[', ']']);
    if plain {
        item.to_string()
    } else {
        quote(item)
    }
}

/// Render a string literal so that it parses back to the same literal.
pub fn render_literal(text: &str) -> String {
    if text.starts_with('"') {
        return quote(text);
    }
    match parse_expr(text) {
        Ok(Expr::Literal(Scalar::Str(s))) if s == text => text.to_string(),
        _ => quote(text),
    }
}

// ============================================================================
// Native YAML values
// ============================================================================

/// Build an expression from a document value.
///
/// Scalars are equality literals, sequences an implicit `any`, mappings
/// either an explicit `and`/`or`/`not` or a set of `op: operand` entries
/// that are ANDed.
pub fn expr_from_value(value: &Value) -> Result<Expr, ExprError> {
    match value {
        Value::Null => Ok(Expr::Literal(Scalar::Null)),
        Value::Bool(b) => Ok(Expr::Literal(Scalar::Bool(*b))),
        Value::Number(n) => Ok(Expr::Literal(number_scalar(n))),
        Value::String(s) => parse_expr(s),
        Value::Sequence(items) => Ok(Expr::Collection(
            CollectionMode::Any,
            items.iter().map(list_item_text).collect::<Result<_, _>>()?,
        )),
        Value::Mapping(map) => mapping_expr(map),
        Value::Tagged(tagged) => expr_from_value(&tagged.value),
    }
}

fn number_scalar(n: &serde_yaml_ng::Number) -> Scalar {
    match n.as_i64() {
        Some(i) => Scalar::Int(i),
        None => Scalar::Float(n.as_f64().unwrap_or(f64::NAN)),
    }
}

fn list_item_text(value: &Value) -> Result<String, ExprError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ExprError::new(
            compact(other),
            "list items must be scalars",
        )),
    }
}

fn mapping_expr(map: &serde_yaml_ng::Mapping) -> Result<Expr, ExprError> {
    if map.is_empty() {
        return Err(ExprError::new("{}", "empty condition mapping"));
    }
    let mut children = Vec::with_capacity(map.len());
    for (key, value) in map {
        let Some(key) = key.as_str() else {
            return Err(ExprError::new(compact(key), "operator keys must be strings"));
        };
        children.push(entry_expr(key, value)?);
    }
    if children.len() == 1 {
        return Ok(children.remove(0));
    }
    Ok(Expr::Compound(LogicOp::And, children))
}

fn entry_expr(key: &str, value: &Value) -> Result<Expr, ExprError> {
    let lower = key.trim().to_lowercase();
    match lower.as_str() {
        "and" | "or" => {
            let Value::Sequence(items) = value else {
                return Err(ExprError::new(compact(value), format!("'{}' expects a list", lower)));
            };
            let op = if lower == "and" { LogicOp::And } else { LogicOp::Or };
            let children = items.iter().map(expr_from_value).collect::<Result<_, _>>()?;
            return Ok(Expr::Compound(op, children));
        }
        "not" => return Ok(Expr::negate(expr_from_value(value)?)),
        "exists" | "missing" => {
            if let Value::Bool(flag) = value {
                let exists = (lower == "exists") == *flag;
                return Ok(Expr::Existence(if exists {
                    Existence::Exists
                } else {
                    Existence::Missing
                }));
            }
        }
        _ => {}
    }

    let keyword = Keyword::lookup(&lower);
    let is_comparison = CompareOp::ALL.iter().any(|op| op.symbol() == key.trim());
    if keyword.is_none() && !is_comparison {
        return Err(ExprError::new(key, format!("unknown operator '{}'", key)));
    }
    let operand = match value {
        Value::String(s) => match keyword {
            Some(Keyword::Within | Keyword::Before | Keyword::After | Keyword::Since) => s.clone(),
            _ => quote(s),
        },
        Value::Sequence(items) => {
            let items: Vec<String> = items
                .iter()
                .map(|v| list_item_text(v).map(|s| quote_item(&s)))
                .collect::<Result<_, _>>()?;
            format!("[{}]", items.join(", "))
        }
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_scalar(n).to_string(),
        other => {
            return Err(ExprError::new(
                compact(other),
                format!("invalid operand for '{}'", key),
            ))
        }
    };
    parse_expr(&format!("{} {}", key.trim(), operand))
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("{:?}", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::temporal::TimeUnit;

    fn yaml(text: &str) -> Value {
        serde_yaml_ng::from_str(text).unwrap()
    }

    #[test]
    fn test_grammar_keywords() {
        assert_eq!(
            parse_expr("within 30 days").unwrap(),
            Expr::Temporal(Temporal::Within(Span::new(30, TimeUnit::Days)))
        );
        assert_eq!(
            parse_expr("ANY [ai, ml/*]").unwrap(),
            Expr::any(["ai", "ml/*"])
        );
        assert_eq!(
            parse_expr("contains \"rust \\\"lang\\\"\"").unwrap(),
            Expr::StringOp(StringOp::Contains("rust \"lang\"".into()))
        );
        assert_eq!(
            parse_expr("starts_with https").unwrap(),
            Expr::StringOp(StringOp::StartsWith("https".into()))
        );
        assert_eq!(parse_expr("exists").unwrap(), Expr::Existence(Existence::Exists));
        assert_eq!(
            parse_expr("has [summary, words]").unwrap(),
            Expr::Existence(Existence::Has(vec!["summary".into(), "words".into()]))
        );
    }

    #[test]
    fn test_grammar_comparisons() {
        assert_eq!(
            parse_expr(">= 3").unwrap(),
            Expr::Comparison(CompareOp::Ge, Scalar::Int(3))
        );
        assert_eq!(
            parse_expr(">3").unwrap(),
            Expr::Comparison(CompareOp::Gt, Scalar::Int(3))
        );
        assert_eq!(
            parse_expr("!= null").unwrap(),
            Expr::Comparison(CompareOp::Ne, Scalar::Null)
        );
        assert_eq!(
            parse_expr("< 2.5").unwrap(),
            Expr::Comparison(CompareOp::Lt, Scalar::Float(2.5))
        );
        assert_eq!(
            parse_expr("== \"42\"").unwrap(),
            Expr::Comparison(CompareOp::Eq, Scalar::Str("42".into()))
        );
        assert_eq!(
            parse_expr("< abc").unwrap(),
            Expr::Comparison(CompareOp::Lt, Scalar::Str("abc".into()))
        );
    }

    #[test]
    fn test_grammar_bare_list_and_literal() {
        assert_eq!(parse_expr("[a,b]").unwrap(), Expr::any(["a", "b"]));
        assert_eq!(
            parse_expr("example.com").unwrap(),
            Expr::Literal(Scalar::Str("example.com".into()))
        );
        assert_eq!(
            parse_expr("\"within reach\"").unwrap(),
            Expr::Literal(Scalar::Str("within reach".into()))
        );
    }

    #[test]
    fn test_grammar_errors() {
        for bad in [
            "within three days",
            "within 3 fortnights",
            "before someday",
            "any a, b",
            "[a, b",
            "contains \"open",
            "matches \"(unclosed\"",
            "has []",
            "exists now",
            ">=",
            "[a, , b]",
        ] {
            assert!(parse_expr(bad).is_err(), "{} should fail", bad);
        }
    }

    #[test]
    fn test_grammar_lookalike_keywords() {
        assert!(parse_expr("withn 3 days").is_err());
        assert!(parse_expr("starts-with \"x\"").is_err());
        assert!(parse_expr("startswith \"x\"").is_err());
        assert!(parse_expr("contain \"x\"").is_err());
        assert!(parse_expr("exist").is_err());
        // Lookalike head with the wrong operand shape stays a literal.
        assert_eq!(
            parse_expr("contain yourself").unwrap(),
            Expr::Literal(Scalar::Str("contain yourself".into()))
        );
    }

    #[test]
    fn test_grammar_display_round_trip() {
        for text in [
            "within 1 day",
            "within 3 weeks",
            "before 2024-01-01",
            "after yesterday",
            "since 2 months ago",
            "any [ai, ml/*]",
            "all [\"a, b\", c]",
            "none [x]",
            "contains \"Rust\"",
            "matches \"^https?://\"",
            "under \"projects/web\"",
            "exists",
            "missing",
            "has [summary]",
            ">= 3",
            "< 1.5",
            "!= \"draft\"",
            "== true",
            "rust",
            "\"within reach\"",
        ] {
            let parsed = parse_expr(text).unwrap();
            let rendered = parsed.to_string();
            assert_eq!(parse_expr(&rendered).unwrap(), parsed, "{}", text);
        }
        assert_eq!(parse_expr("[a,b]").unwrap().to_string(), "any [a, b]");
    }

    #[test]
    fn test_value_scalars_and_lists() {
        assert_eq!(expr_from_value(&yaml("3")).unwrap(), Expr::Literal(Scalar::Int(3)));
        assert_eq!(expr_from_value(&yaml("true")).unwrap(), Expr::Literal(Scalar::Bool(true)));
        assert_eq!(expr_from_value(&yaml("~")).unwrap(), Expr::Literal(Scalar::Null));
        assert_eq!(
            expr_from_value(&yaml("[ai, 2]")).unwrap(),
            Expr::any(["ai", "2"])
        );
        assert!(expr_from_value(&yaml("[[a]]")).is_err());
    }

    #[test]
    fn test_value_mapping_implicit_and() {
        let e = expr_from_value(&yaml("{'>=': 3, '<': 10}")).unwrap();
        assert_eq!(
            e,
            Expr::all_of([
                Expr::Comparison(CompareOp::Ge, Scalar::Int(3)),
                Expr::Comparison(CompareOp::Lt, Scalar::Int(10)),
            ])
        );
    }

    #[test]
    fn test_value_mapping_keyword_operands() {
        assert_eq!(
            expr_from_value(&yaml("{within: 3 days}")).unwrap(),
            parse_expr("within 3 days").unwrap()
        );
        assert_eq!(
            expr_from_value(&yaml("{contains: foo bar}")).unwrap(),
            Expr::StringOp(StringOp::Contains("foo bar".into()))
        );
        assert_eq!(
            expr_from_value(&yaml("{all: [a, b/*]}")).unwrap(),
            Expr::Collection(CollectionMode::All, vec!["a".into(), "b/*".into()])
        );
        assert_eq!(
            expr_from_value(&yaml("{exists: false}")).unwrap(),
            Expr::Existence(Existence::Missing)
        );
        assert!(expr_from_value(&yaml("{frobnicate: 1}")).is_err());
    }

    #[test]
    fn test_value_explicit_compounds() {
        let e = expr_from_value(&yaml("{or: ['>= 4', {not: missing}]}")).unwrap();
        assert_eq!(
            e,
            Expr::any_of([
                Expr::Comparison(CompareOp::Ge, Scalar::Int(4)),
                Expr::negate(Expr::Existence(Existence::Missing)),
            ])
        );
        assert!(expr_from_value(&yaml("{and: x}")).is_err());
    }
}
