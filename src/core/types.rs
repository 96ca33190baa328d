//! Query AST building blocks: entities, field references, sort, compute, params.

use super::error::ExprError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Entities
// ============================================================================

/// The four fixed record shapes a query can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Bookmark,
    Tag,
    Stats,
    Edge,
}

impl EntityType {
    /// Parse an entity name. Accepts singular and plural, any case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bookmark" | "bookmarks" => Some(Self::Bookmark),
            "tag" | "tags" => Some(Self::Tag),
            "stats" | "stat" => Some(Self::Stats),
            "edge" | "edges" => Some(Self::Edge),
            _ => None,
        }
    }

    /// Entity whose stored rows feed this entity. Stats aggregate bookmarks.
    pub fn stored(&self) -> Self {
        match self {
            Self::Stats => Self::Bookmark,
            other => *other,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bookmark => write!(f, "bookmark"),
            Self::Tag => write!(f, "tag"),
            Self::Stats => write!(f, "stats"),
            Self::Edge => write!(f, "edge"),
        }
    }
}

/// Declared type of an entity field. Drives comparison and sort semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    Float,
    Text,
    Bool,
    Date,
    List,
    Object,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Text => write!(f, "text"),
            Self::Bool => write!(f, "bool"),
            Self::Date => write!(f, "date"),
            Self::List => write!(f, "list"),
            Self::Object => write!(f, "object"),
        }
    }
}

// ============================================================================
// Field references
// ============================================================================

/// Dotted path to a (possibly nested) field, e.g. `content.has`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef(Vec<String>);

impl FieldRef {
    pub fn parse(path: &str) -> Result<Self, ExprError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(ExprError::new(path, "empty field reference"));
        }
        let segments: Vec<String> = path.split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ExprError::new(path, "empty segment in field reference"));
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// First segment, the entity-level field name.
    pub fn head(&self) -> &str {
        &self.0[0]
    }

    pub fn is_nested(&self) -> bool {
        self.0.len() > 1
    }

    /// Column name used for this field in aggregated rows.
    pub fn column(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

// ============================================================================
// Sort
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    #[default]
    Last,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: FieldRef,
    pub direction: Direction,
    pub nulls: NullsOrder,
}

impl SortSpec {
    pub fn asc(field: FieldRef) -> Self {
        Self {
            field,
            direction: Direction::Asc,
            nulls: NullsOrder::Last,
        }
    }

    pub fn desc(field: FieldRef) -> Self {
        Self {
            field,
            direction: Direction::Desc,
            nulls: NullsOrder::Last,
        }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        };
        let nulls = match self.nulls {
            NullsOrder::First => "first",
            NullsOrder::Last => "last",
        };
        write!(f, "{} {} nulls {}", self.field, dir, nulls)
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Whitelisted aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFn {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count => write!(f, "count"),
            Self::Sum => write!(f, "sum"),
            Self::Avg => write!(f, "avg"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
        }
    }
}

/// A named aggregate output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeSpec {
    pub name: String,
    pub func: AggregateFn,
    pub field: Option<FieldRef>,
}

impl ComputeSpec {
    pub fn count(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: AggregateFn::Count,
            field: None,
        }
    }

    /// Default output name: `count`, or `<fn>_<field>` with dots as underscores.
    pub fn default_name(func: AggregateFn, field: Option<&FieldRef>) -> String {
        match field {
            None => func.to_string(),
            Some(f) => format!("{}_{}", func, f.segments().join("_")),
        }
    }
}

impl fmt::Display for ComputeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}: {}({})", self.name, self.func, field),
            None => write!(f, "{}: {}()", self.name, self.func),
        }
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Declared type of a query parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParamType {
    #[default]
    String,
    Int,
    Float,
    Bool,
    Date,
    List,
}

impl ParamType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Some(Self::String),
            "int" | "integer" => Some(Self::Int),
            "float" | "number" => Some(Self::Float),
            "bool" | "boolean" => Some(Self::Bool),
            "date" => Some(Self::Date),
            "list" => Some(Self::List),
            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
            Self::Date => write!(f, "date"),
            Self::List => write!(f, "list"),
        }
    }
}

/// A parameter declaration: type, optional default, optional choices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSpec {
    pub ty: ParamType,
    pub default: Option<serde_json::Value>,
    pub description: Option<String>,
    pub choices: Vec<String>,
}

impl ParamSpec {
    /// A required parameter of the given type.
    pub fn required(ty: ParamType) -> Self {
        Self {
            ty,
            ..Self::default()
        }
    }

    /// An optional parameter; the type is inferred from the default.
    pub fn with_default(default: serde_json::Value) -> Self {
        let ty = match &default {
            serde_json::Value::Bool(_) => ParamType::Bool,
            serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => ParamType::Int,
            serde_json::Value::Number(_) => ParamType::Float,
            serde_json::Value::Array(_) => ParamType::List,
            _ => ParamType::String,
        };
        Self {
            ty,
            default: Some(default),
            ..Self::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
