//! The `Query` AST and its fluent builder.

use super::error::{ExprError, ParseError};
use super::expr::Expr;
use super::grammar::{expr_from_value, parse_expr};
use super::resolver;
use super::types::*;
use indexmap::IndexMap;
use std::fmt;

/// Name given to queries built without `named`.
pub const ANONYMOUS: &str = "<anonymous>";

/// A predicate value: parsed, or a template parsed once params are bound.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Expr(Expr),
    Template(serde_yaml_ng::Value),
}

impl Condition {
    /// Parse a string condition; text with `{{...}}` placeholders is kept raw.
    pub fn parse_str(text: &str) -> Result<Self, ExprError> {
        if text.contains("{{") {
            return Ok(Self::Template(serde_yaml_ng::Value::String(text.to_string())));
        }
        parse_expr(text).map(Self::Expr)
    }

    /// Build a condition from a document value.
    pub fn from_value(value: &serde_yaml_ng::Value) -> Result<Self, ExprError> {
        if resolver::contains_template(value) {
            return Ok(Self::Template(value.clone()));
        }
        expr_from_value(value).map(Self::Expr)
    }

    pub fn as_expr(&self) -> Option<&Expr> {
        match self {
            Self::Expr(e) => Some(e),
            Self::Template(_) => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expr(e) => write!(f, "{}", e),
            Self::Template(serde_yaml_ng::Value::String(s)) => write!(f, "{}", s),
            Self::Template(v) => write!(
                f,
                "{}",
                serde_json::to_string(v).unwrap_or_else(|_| format!("{:?}", v))
            ),
        }
    }
}

/// A condition on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: FieldRef,
    pub condition: Condition,
}

impl Predicate {
    pub fn new(field: FieldRef, expr: Expr) -> Self {
        Self {
            field,
            condition: Condition::Expr(expr),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.condition)
    }
}

/// One query: target, predicates, shaping, aggregation, composition.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub name: String,
    pub description: Option<String>,
    pub entity: Option<EntityType>,
    pub source: Option<String>,
    pub filters: Vec<Predicate>,
    pub sort: Vec<SortSpec>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub group_by: Vec<FieldRef>,
    pub compute: Vec<ComputeSpec>,
    pub having: Vec<Predicate>,
    pub exclude: Vec<Predicate>,
    pub union: Vec<String>,
    pub intersect: Vec<String>,
    pub params: IndexMap<String, ParamSpec>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            name: ANONYMOUS.to_string(),
            description: None,
            entity: None,
            source: None,
            filters: Vec::new(),
            sort: Vec::new(),
            limit: None,
            offset: 0,
            group_by: Vec::new(),
            compute: Vec::new(),
            having: Vec::new(),
            exclude: Vec::new(),
            union: Vec::new(),
            intersect: Vec::new(),
            params: IndexMap::new(),
        }
    }
}

impl Query {
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// Grouping or compute makes this an aggregating (STATS) query.
    pub fn is_aggregate(&self) -> bool {
        !self.group_by.is_empty() || !self.compute.is_empty()
    }

    pub fn is_composed(&self) -> bool {
        self.source.is_some() || !self.union.is_empty() || !self.intersect.is_empty()
    }

    /// Every view this query references, first-seen order, no duplicates.
    pub fn references(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = Vec::new();
        let all = self
            .source
            .iter()
            .chain(self.union.iter())
            .chain(self.intersect.iter());
        for name in all {
            if !refs.contains(&name.as_str()) {
                refs.push(name);
            }
        }
        refs
    }

    /// Structural checks shared by the builder and the document parser.
    pub fn validate(&self) -> Result<(), ParseError> {
        if let Some(entity) = self.entity {
            if entity != EntityType::Stats && self.is_aggregate() {
                return Err(ParseError::definition(
                    &self.name,
                    format!("group/compute requires entity stats, found {}", entity),
                ));
            }
        }

        let mut seen: Vec<&str> = Vec::new();
        for spec in &self.compute {
            let invalid = |reason: &str| ParseError::Compute {
                query: self.name.clone(),
                spec: spec.to_string(),
                reason: reason.to_string(),
            };
            match (spec.func, &spec.field) {
                (AggregateFn::Count, Some(_)) => return Err(invalid("count() takes no field")),
                (AggregateFn::Count, None) | (_, Some(_)) => {}
                (_, None) => return Err(invalid("aggregate requires a field")),
            }
            if seen.contains(&spec.name.as_str()) {
                return Err(invalid("duplicate output name"));
            }
            if self.group_by.iter().any(|g| g.column() == spec.name) {
                return Err(invalid("output name collides with a group field"));
            }
            seen.push(&spec.name);
        }

        for (i, group) in self.group_by.iter().enumerate() {
            if self.group_by[..i].contains(group) {
                return Err(ParseError::definition(
                    &self.name,
                    format!("duplicate group field '{}'", group),
                ));
            }
        }

        for (name, spec) in &self.params {
            resolver::check_param_spec(name, spec).map_err(|reason| ParseError::InvalidParam {
                query: self.name.clone(),
                param: name.clone(),
                reason,
            })?;
        }

        let predicates = self
            .filters
            .iter()
            .chain(self.having.iter())
            .chain(self.exclude.iter());
        for predicate in predicates {
            let Condition::Template(value) = &predicate.condition else {
                continue;
            };
            let names = resolver::template_params(value).map_err(|reason| {
                ParseError::Predicate {
                    query: self.name.clone(),
                    field: predicate.field.to_string(),
                    source: ExprError::new(predicate.condition.to_string(), reason),
                }
            })?;
            for name in names {
                if !self.params.contains_key(&name) {
                    return Err(ParseError::InvalidParam {
                        query: self.name.clone(),
                        param: name,
                        reason: "referenced by a template but not declared".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Sort and compute clause text
// ============================================================================

/// Parse `field [asc|desc] [nulls first|last]`, comma-separated.
pub fn parse_sort(text: &str) -> Result<Vec<SortSpec>, String> {
    text.split(',').map(parse_sort_clause).collect()
}

fn parse_sort_clause(clause: &str) -> Result<SortSpec, String> {
    let tokens: Vec<&str> = clause.split_whitespace().collect();
    let Some((field, rest)) = tokens.split_first() else {
        return Err("empty sort clause".to_string());
    };
    let field = FieldRef::parse(field).map_err(|e| e.reason)?;
    let mut spec = SortSpec::asc(field);
    let mut rest = rest.iter().map(|t| t.to_ascii_lowercase());
    let mut pending = rest.next();
    if let Some(token) = pending.as_deref() {
        match token {
            "asc" => {
                spec.direction = Direction::Asc;
                pending = rest.next();
            }
            "desc" => {
                spec.direction = Direction::Desc;
                pending = rest.next();
            }
            _ => {}
        }
    }
    if let Some(token) = pending {
        if token != "nulls" {
            return Err(format!("unexpected token '{}'", token));
        }
        spec.nulls = match rest.next().as_deref() {
            Some("first") => NullsOrder::First,
            Some("last") => NullsOrder::Last,
            _ => return Err("expected 'nulls first' or 'nulls last'".to_string()),
        };
    }
    if let Some(extra) = rest.next() {
        return Err(format!("unexpected token '{}'", extra));
    }
    Ok(spec)
}

/// Parse `fn(field?)`; a bare `count` is accepted.
pub fn parse_aggregate(text: &str) -> Result<(AggregateFn, Option<FieldRef>), String> {
    let text = text.trim();
    let (func, inner) = match text.find('(') {
        Some(open) => {
            let Some(inner) = text[open + 1..].strip_suffix(')') else {
                return Err("expected closing ')'".to_string());
            };
            (&text[..open], inner.trim())
        }
        None => (text, ""),
    };
    let func = AggregateFn::parse(func)
        .ok_or_else(|| format!("unknown aggregate '{}' (count, sum, avg, min, max)", func.trim()))?;
    let field = if inner.is_empty() {
        None
    } else {
        Some(FieldRef::parse(inner).map_err(|e| e.reason)?)
    };
    Ok((func, field))
}

// ============================================================================
// Builder
// ============================================================================

/// Fluent construction of a `Query`. Syntax errors surface from `build`.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    query: Query,
    error: Option<ParseError>,
}

impl QueryBuilder {
    fn fail(&mut self, err: ParseError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn predicate(&mut self, field: &str, condition: Result<Condition, ExprError>) -> Option<Predicate> {
        let parsed = FieldRef::parse(field).and_then(|f| condition.map(|c| (f, c)));
        match parsed {
            Ok((field, condition)) => Some(Predicate { field, condition }),
            Err(source) => {
                let err = ParseError::Predicate {
                    query: self.query.name.clone(),
                    field: field.to_string(),
                    source,
                };
                self.fail(err);
                None
            }
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.query.name = name.into();
        self
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.query.description = Some(text.into());
        self
    }

    pub fn entity(mut self, entity: EntityType) -> Self {
        if self.query.entity.is_some_and(|e| e != entity) {
            let err = ParseError::definition(&self.query.name, "conflicting entity declarations");
            self.fail(err);
        }
        self.query.entity = Some(entity);
        self
    }

    /// An entity name selects the entity; anything else is a source view.
    pub fn from(self, name: &str) -> Self {
        match EntityType::parse(name) {
            Some(entity) => self.entity(entity),
            None => {
                let mut this = self;
                this.query.source = Some(name.trim().to_string());
                this
            }
        }
    }

    pub fn filter(mut self, field: &str, expr: &str) -> Self {
        if let Some(p) = self.predicate(field, Condition::parse_str(expr)) {
            self.query.filters.push(p);
        }
        self
    }

    pub fn filter_expr(mut self, field: &str, expr: Expr) -> Self {
        if let Some(p) = self.predicate(field, Ok(Condition::Expr(expr))) {
            self.query.filters.push(p);
        }
        self
    }

    /// Sort clause text, e.g. `stars desc nulls first, title`.
    pub fn sort(mut self, spec: &str) -> Self {
        match parse_sort(spec) {
            Ok(specs) => self.query.sort.extend(specs),
            Err(reason) => {
                let err = ParseError::Sort {
                    query: self.query.name.clone(),
                    clause: spec.to_string(),
                    reason,
                };
                self.fail(err);
            }
        }
        self
    }

    pub fn sort_by(mut self, spec: SortSpec) -> Self {
        self.query.sort.push(spec);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = offset;
        self
    }

    pub fn group_by<'a>(mut self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        for field in fields {
            match FieldRef::parse(field) {
                Ok(f) => self.query.group_by.push(f),
                Err(e) => {
                    let err = ParseError::definition(&self.query.name, e.to_string());
                    self.fail(err);
                }
            }
        }
        self
    }

    /// Named aggregate, e.g. `compute("total", "sum(stars)")`.
    pub fn compute(mut self, name: &str, aggregate: &str) -> Self {
        match parse_aggregate(aggregate) {
            Ok((func, field)) => self.query.compute.push(ComputeSpec {
                name: name.to_string(),
                func,
                field,
            }),
            Err(reason) => {
                let err = ParseError::Compute {
                    query: self.query.name.clone(),
                    spec: aggregate.to_string(),
                    reason,
                };
                self.fail(err);
            }
        }
        self
    }

    pub fn having(mut self, field: &str, expr: &str) -> Self {
        if let Some(p) = self.predicate(field, Condition::parse_str(expr)) {
            self.query.having.push(p);
        }
        self
    }

    pub fn exclude(mut self, field: &str, expr: &str) -> Self {
        if let Some(p) = self.predicate(field, Condition::parse_str(expr)) {
            self.query.exclude.push(p);
        }
        self
    }

    pub fn union(mut self, view: &str) -> Self {
        self.query.union.push(view.trim().to_string());
        self
    }

    pub fn intersect(mut self, view: &str) -> Self {
        self.query.intersect.push(view.trim().to_string());
        self
    }

    pub fn param(mut self, name: &str, spec: ParamSpec) -> Self {
        self.query.params.insert(name.to_string(), spec);
        self
    }

    pub fn build(self) -> Result<Query, ParseError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.query.validate()?;
        Ok(self.query)
    }
}
