//! Predicate expression AST.
//!
//! An `Expr` describes a condition on one field value. Exprs are immutable
//! and `Send + Sync`; they are evaluated by `core::eval` and rendered back
//! to the string grammar by `Display`.

use super::grammar;
use super::temporal::Temporal;
use std::fmt;

// ============================================================================
// Scalars
// ============================================================================

/// A literal operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Str(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Convert a JSON scalar. Arrays and objects have no scalar form.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Int(i)),
                None => n.as_f64().map(Self::Float),
            },
            serde_json::Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Operand rendering: strings are quoted, floats keep their decimal point.
    pub fn render(&self) -> String {
        match self {
            Self::Str(s) => grammar::quote(s),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{:?}", x),
            Self::Str(s) => write!(f, "{}", s),
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
    Eq,
}

impl CompareOp {
    /// Longest-first so that `>=` wins over `>`.
    pub const ALL: [CompareOp; 6] = [
        CompareOp::Ge,
        CompareOp::Le,
        CompareOp::Ne,
        CompareOp::Eq,
        CompareOp::Gt,
        CompareOp::Lt,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Ne => "!=",
            Self::Eq => "==",
        }
    }

    pub fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Lt => ordering == Less,
            Self::Le => ordering != Greater,
            Self::Gt => ordering == Greater,
            Self::Ge => ordering != Less,
            Self::Ne => ordering != Equal,
            Self::Eq => ordering == Equal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionMode {
    Any,
    All,
    None,
}

impl CollectionMode {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::All => "all",
            Self::None => "none",
        }
    }
}

/// A compiled regular expression, compared by source text.
#[derive(Debug, Clone)]
pub struct Pattern(regex::Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        regex::Regex::new(source).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringOp {
    Contains(String),
    StartsWith(String),
    Matches(Pattern),
    Under(String),
}

impl StringOp {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Contains(_) => "contains",
            Self::StartsWith(_) => "starts_with",
            Self::Matches(_) => "matches",
            Self::Under(_) => "under",
        }
    }

    pub fn operand(&self) -> &str {
        match self {
            Self::Contains(s) | Self::StartsWith(s) | Self::Under(s) => s,
            Self::Matches(p) => p.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existence {
    Exists,
    Missing,
    Has(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Or,
    Not,
}

// ============================================================================
// Expr
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Scalar),
    Comparison(CompareOp, Scalar),
    Temporal(Temporal),
    Collection(CollectionMode, Vec<String>),
    StringOp(StringOp),
    Existence(Existence),
    Compound(LogicOp, Vec<Expr>),
}

impl Expr {
    pub fn all_of(children: impl IntoIterator<Item = Expr>) -> Self {
        Self::Compound(LogicOp::And, children.into_iter().collect())
    }

    pub fn any_of(children: impl IntoIterator<Item = Expr>) -> Self {
        Self::Compound(LogicOp::Or, children.into_iter().collect())
    }

    pub fn negate(child: Expr) -> Self {
        Self::Compound(LogicOp::Not, vec![child])
    }

    pub fn equals(value: Scalar) -> Self {
        Self::Literal(value)
    }

    pub fn compare(op: CompareOp, value: Scalar) -> Self {
        Self::Comparison(op, value)
    }

    pub fn any(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Collection(
            CollectionMode::Any,
            patterns.into_iter().map(Into::into).collect(),
        )
    }

    fn render_child(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compound(..) => write!(f, "({})", self),
            other => write!(f, "{}", other),
        }
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::negate(self)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[String]) -> fmt::Result {
    let rendered: Vec<String> = items.iter().map(|s| grammar::quote_item(s)).collect();
    write!(f, "[{}]", rendered.join(", "))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(Scalar::Str(s)) => write!(f, "{}", grammar::render_literal(s)),
            Self::Literal(other) => write!(f, "{}", other),
            Self::Comparison(op, value) => write!(f, "{} {}", op.symbol(), value.render()),
            Self::Temporal(t) => write!(f, "{}", t),
            Self::Collection(mode, items) => {
                write!(f, "{} ", mode.keyword())?;
                write_list(f, items)
            }
            Self::StringOp(op) => write!(f, "{} {}", op.keyword(), grammar::quote(op.operand())),
            Self::Existence(Existence::Exists) => write!(f, "exists"),
            Self::Existence(Existence::Missing) => write!(f, "missing"),
            Self::Existence(Existence::Has(fields)) => {
                write!(f, "has ")?;
                write_list(f, fields)
            }
            Self::Compound(LogicOp::Not, children) => {
                write!(f, "not ")?;
                match children.as_slice() {
                    [only] => only.render_child(f),
                    many => write!(f, "({})", Expr::all_of(many.to_vec())),
                }
            }
            Self::Compound(op, children) => {
                let sep = if *op == LogicOp::Or { " or " } else { " and " };
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{}", sep)?;
                    }
                    child.render_child(f)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::temporal::{Span, TimeUnit};

    #[test]
    fn test_expr_display_forms() {
        assert_eq!(Expr::compare(CompareOp::Ge, Scalar::Int(3)).to_string(), ">= 3");
        assert_eq!(Expr::compare(CompareOp::Lt, Scalar::Float(2.0)).to_string(), "< 2.0");
        assert_eq!(
            Expr::compare(CompareOp::Eq, Scalar::Str("a b".into())).to_string(),
            "== \"a b\""
        );
        assert_eq!(Expr::any(["ai", "ml/*"]).to_string(), "any [ai, ml/*]");
        assert_eq!(
            Expr::Temporal(Temporal::Within(Span::new(1, TimeUnit::Days))).to_string(),
            "within 1 day"
        );
        assert_eq!(
            Expr::Existence(Existence::Has(vec!["summary".into()])).to_string(),
            "has [summary]"
        );
    }

    #[test]
    fn test_compound_display() {
        let e = Expr::all_of([
            Expr::compare(CompareOp::Ge, Scalar::Int(3)),
            !Expr::Existence(Existence::Missing),
        ]);
        assert_eq!(e.to_string(), ">= 3 and (not missing)");
    }

    #[test]
    fn test_pattern_equality_by_source() {
        let a = Pattern::new("^rust").unwrap();
        let b = Pattern::new("^rust").unwrap();
        assert_eq!(a, b);
        assert!(a.is_match("rustacean"));
    }

    #[test]
    fn test_scalar_json_conversions() {
        assert_eq!(Scalar::from_json(&serde_json::json!(3)), Some(Scalar::Int(3)));
        assert_eq!(Scalar::from_json(&serde_json::json!([1])), None);
        assert_eq!(Scalar::Float(1.5).to_json(), serde_json::json!(1.5));
    }

    #[test]
    fn test_compare_op_holds() {
        use std::cmp::Ordering;
        assert!(CompareOp::Ge.holds(Ordering::Equal));
        assert!(!CompareOp::Gt.holds(Ordering::Equal));
        assert!(CompareOp::Ne.holds(Ordering::Less));
    }

    #[test]
    fn test_expr_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Expr>();
    }
}
