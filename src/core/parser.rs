//! Declarative view documents: a YAML mapping of view name to definition.
//!
//! Two passes. The structural pass deserializes each definition into
//! [`QueryDefinition`] (unknown keys and alias collisions fail here). The
//! semantic pass builds a [`Query`], checks it, and checks the document as
//! a whole against the registry before anything is registered.

use super::error::{ExprError, ParseError};
use super::query::{parse_aggregate, parse_sort, Condition, Predicate, Query};
use super::registry::{cycle_members, QueryRegistry};
use super::types::*;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_yaml_ng::Value;
use std::path::Path;
use tracing::debug;

/// One view definition, as written.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct QueryDefinition {
    /// Free text shown by `list`.
    pub description: Option<String>,
    /// bookmark, tag, stats or edge (plural accepted).
    pub entity: Option<String>,
    /// An entity name, or a view whose rows form the base.
    #[serde(alias = "base")]
    pub from: Option<String>,
    #[serde(alias = "where")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub filter: Option<Value>,
    /// `field [asc|desc] [nulls first|last]`, comma-separated or a list.
    #[serde(alias = "order")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub sort: Option<Value>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(alias = "group_by")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub group: Option<Value>,
    #[schemars(with = "Option<serde_json::Value>")]
    pub compute: Option<Value>,
    #[schemars(with = "Option<serde_json::Value>")]
    pub having: Option<Value>,
    #[schemars(with = "Option<serde_json::Value>")]
    pub exclude: Option<Value>,
    #[schemars(with = "Option<serde_json::Value>")]
    pub union: Option<Value>,
    #[schemars(with = "Option<serde_json::Value>")]
    pub intersect: Option<Value>,
    #[schemars(with = "Option<serde_json::Value>")]
    pub params: Option<Value>,
}

/// JSON schema of a whole view document.
pub fn document_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(IndexMap<String, QueryDefinition>);
    serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
}

// ============================================================================
// Single definitions
// ============================================================================

/// Build the query `name` from one definition value.
pub fn parse_definition(def: &Value, name: &str) -> Result<Query, ParseError> {
    let raw: QueryDefinition = match def {
        Value::Null => QueryDefinition::default(),
        other => serde_yaml_ng::from_value(other.clone())
            .map_err(|e| ParseError::definition(name, e.to_string()))?,
    };

    let mut query = Query {
        name: name.to_string(),
        description: raw.description,
        ..Query::default()
    };

    if let Some(entity) = &raw.entity {
        query.entity = Some(EntityType::parse(entity).ok_or_else(|| ParseError::UnknownEntity {
            query: name.to_string(),
            entity: entity.clone(),
        })?);
    }

    let mut from_entity = false;
    if let Some(from) = &raw.from {
        match EntityType::parse(from) {
            Some(entity) if query.entity.is_some_and(|e| e != entity) => {
                return Err(ParseError::definition(
                    name,
                    format!("from '{}' conflicts with entity '{}'", from, raw.entity.as_deref().unwrap_or_default()),
                ));
            }
            Some(entity) => {
                query.entity = Some(entity);
                from_entity = raw.entity.is_none();
            }
            None if from.trim().is_empty() => {
                return Err(ParseError::definition(name, "from must not be empty"));
            }
            None => query.source = Some(from.trim().to_string()),
        }
    }

    query.filters = predicates(name, "filter", raw.filter.as_ref())?;
    query.having = predicates(name, "having", raw.having.as_ref())?;
    query.exclude = predicates(name, "exclude", raw.exclude.as_ref())?;

    if let Some(sort) = &raw.sort {
        for clause in strings(name, "sort", sort)? {
            let specs = parse_sort(&clause).map_err(|reason| ParseError::Sort {
                query: name.to_string(),
                clause: clause.clone(),
                reason,
            })?;
            query.sort.extend(specs);
        }
    }

    query.limit = raw
        .limit
        .map(|n| non_negative(name, "limit", n))
        .transpose()?;
    query.offset = raw
        .offset
        .map(|n| non_negative(name, "offset", n))
        .transpose()?
        .unwrap_or(0);

    if let Some(group) = &raw.group {
        for field in strings(name, "group", group)?
            .iter()
            .flat_map(|s| s.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let field = FieldRef::parse(field).map_err(|e| ParseError::definition(name, e.to_string()))?;
            query.group_by.push(field);
        }
    }

    if let Some(compute) = &raw.compute {
        query.compute = computes(name, compute)?;
    }
    if let Some(union) = &raw.union {
        query.union = strings(name, "union", union)?;
    }
    if let Some(intersect) = &raw.intersect {
        query.intersect = strings(name, "intersect", intersect)?;
    }
    if let Some(params) = &raw.params {
        query.params = param_specs(name, params)?;
    }

    // `from: bookmarks` on an aggregating view names its input rows.
    if from_entity && query.entity == Some(EntityType::Bookmark) && query.is_aggregate() {
        query.entity = None;
    }

    query.validate()?;
    Ok(query)
}

fn non_negative(query: &str, key: &str, n: i64) -> Result<usize, ParseError> {
    usize::try_from(n).map_err(|_| ParseError::definition(query, format!("{} must be non-negative, got {}", key, n)))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A string, or a list of strings.
fn strings(query: &str, key: &str, value: &Value) -> Result<Vec<String>, ParseError> {
    let invalid = || ParseError::definition(query, format!("{} must be a string or a list of strings", key));
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items
            .iter()
            .map(|item| scalar_text(item).map(|s| s.trim().to_string()).ok_or_else(invalid))
            .collect(),
        other => scalar_text(other)
            .map(|s| vec![s.trim().to_string()])
            .ok_or_else(invalid),
    }
}

/// `field: value` mappings, or a list of them; everything ANDs.
fn predicates(query: &str, key: &str, value: Option<&Value>) -> Result<Vec<Predicate>, ParseError> {
    let mut out = Vec::new();
    let Some(value) = value else {
        return Ok(out);
    };
    let blocks: Vec<&serde_yaml_ng::Mapping> = match value {
        Value::Null => Vec::new(),
        Value::Mapping(map) => vec![map],
        Value::Sequence(items) => items
            .iter()
            .map(|item| match item {
                Value::Mapping(map) => Ok(map),
                _ => Err(ParseError::definition(
                    query,
                    format!("{} list entries must be mappings", key),
                )),
            })
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(ParseError::definition(
                query,
                format!("{} must be a mapping or a list of mappings", key),
            ))
        }
    };

    for block in blocks {
        for (field, condition) in block {
            let field_text = scalar_text(field).unwrap_or_else(|| format!("{:?}", field));
            let wrap = |source: ExprError| ParseError::Predicate {
                query: query.to_string(),
                field: field_text.clone(),
                source,
            };
            let field = FieldRef::parse(&field_text).map_err(wrap)?;
            let condition = Condition::from_value(condition).map_err(wrap)?;
            out.push(Predicate { field, condition });
        }
    }
    Ok(out)
}

/// Mapping `name: fn(field)`, list of bare or single-entry items, or one
/// comma-separated string.
fn computes(query: &str, value: &Value) -> Result<Vec<ComputeSpec>, ParseError> {
    let build = |name: Option<&str>, text: &str| -> Result<ComputeSpec, ParseError> {
        let (func, field) = parse_aggregate(text).map_err(|reason| ParseError::Compute {
            query: query.to_string(),
            spec: text.to_string(),
            reason,
        })?;
        let name = match name {
            Some(n) => n.to_string(),
            None => ComputeSpec::default_name(func, field.as_ref()),
        };
        Ok(ComputeSpec { name, func, field })
    };
    let not_text = |v: &Value| ParseError::Compute {
        query: query.to_string(),
        spec: format!("{:?}", v),
        reason: "expected an aggregate such as sum(stars)".to_string(),
    };

    let mut out = Vec::new();
    match value {
        Value::Null => {}
        Value::String(text) => {
            for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                out.push(build(None, part)?);
            }
        }
        Value::Mapping(map) => {
            for (name, text) in map {
                let name = scalar_text(name).ok_or_else(|| not_text(name))?;
                let text = scalar_text(text).ok_or_else(|| not_text(text))?;
                out.push(build(Some(&name), &text)?);
            }
        }
        Value::Sequence(items) => {
            for item in items {
                match item {
                    Value::String(text) => out.push(build(None, text)?),
                    Value::Mapping(map) if map.len() == 1 => {
                        for (name, text) in map {
                            let name = scalar_text(name).ok_or_else(|| not_text(name))?;
                            let text = scalar_text(text).ok_or_else(|| not_text(text))?;
                            out.push(build(Some(&name), &text)?);
                        }
                    }
                    other => return Err(not_text(other)),
                }
            }
        }
        other => return Err(not_text(other)),
    }
    Ok(out)
}

fn to_json(value: &Value) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Parameter declarations: a list of names, or a mapping of name to type
/// name, default value, or `{type, default, description, choices}`.
fn param_specs(query: &str, value: &Value) -> Result<IndexMap<String, ParamSpec>, ParseError> {
    let invalid = |param: &str, reason: String| ParseError::InvalidParam {
        query: query.to_string(),
        param: param.to_string(),
        reason,
    };

    let mut out = IndexMap::new();
    match value {
        Value::Null => {}
        Value::Sequence(items) => {
            for item in items {
                let name = scalar_text(item)
                    .ok_or_else(|| invalid("?", "parameter list entries must be names".to_string()))?;
                out.insert(name, ParamSpec::required(ParamType::String));
            }
        }
        Value::Mapping(map) => {
            for (name, decl) in map {
                let name = scalar_text(name)
                    .ok_or_else(|| invalid("?", "parameter names must be strings".to_string()))?;
                let spec = param_spec(decl).map_err(|reason| invalid(&name, reason))?;
                out.insert(name, spec);
            }
        }
        _ => return Err(invalid("?", "params must be a mapping or a list of names".to_string())),
    }
    Ok(out)
}

fn param_spec(decl: &Value) -> Result<ParamSpec, String> {
    match decl {
        Value::Null => Ok(ParamSpec::required(ParamType::String)),
        Value::String(s) => match ParamType::parse(s) {
            Some(ty) => Ok(ParamSpec::required(ty)),
            None => Ok(ParamSpec::with_default(serde_json::Value::String(s.clone()))),
        },
        Value::Mapping(map) => {
            let mut ty = None;
            let mut default = None;
            let mut spec = ParamSpec::default();
            for (key, value) in map {
                match key.as_str().unwrap_or_default() {
                    "type" => {
                        let name = value.as_str().ok_or("type must be a string")?;
                        ty = Some(ParamType::parse(name).ok_or_else(|| format!("unknown type '{}'", name))?);
                    }
                    "default" => default = Some(to_json(value)?),
                    "description" => spec.description = scalar_text(value),
                    "choices" => {
                        let Value::Sequence(items) = value else {
                            return Err("choices must be a list".to_string());
                        };
                        spec.choices = items
                            .iter()
                            .map(|i| scalar_text(i).ok_or_else(|| "choices must be scalars".to_string()))
                            .collect::<Result<_, _>>()?;
                    }
                    other => return Err(format!("unknown key '{}'", other)),
                }
            }
            let base = match (ty, default) {
                (Some(ty), default) => ParamSpec {
                    ty,
                    default,
                    ..ParamSpec::default()
                },
                (None, Some(default)) => ParamSpec::with_default(default),
                (None, None) => ParamSpec::required(ParamType::String),
            };
            Ok(ParamSpec {
                description: spec.description,
                choices: spec.choices,
                ..base
            })
        }
        other => Ok(ParamSpec::with_default(to_json(other)?)),
    }
}

// ============================================================================
// Documents
// ============================================================================

/// Parses whole documents into a registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentParser {
    strict: bool,
}

impl DocumentParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report references to views that are neither registered nor in the
    /// document, instead of deferring them to execution.
    pub fn strict() -> Self {
        Self { strict: true }
    }

    /// Parse every definition, then register all of them or none.
    pub fn parse_document(
        &self,
        doc: &Value,
        registry: &mut QueryRegistry,
    ) -> Result<IndexMap<String, Query>, ParseError> {
        let entries = match doc {
            Value::Null => return Ok(IndexMap::new()),
            Value::Mapping(map) => map,
            _ => {
                return Err(ParseError::definition(
                    "<document>",
                    "a view document must be a mapping of name to definition",
                ))
            }
        };

        let mut parsed: IndexMap<String, Query> = IndexMap::new();
        for (key, def) in entries {
            let name = scalar_text(key)
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ParseError::definition("<document>", "view names must be non-empty strings"))?;
            if registry.contains(&name) || parsed.contains_key(&name) {
                return Err(ParseError::DuplicateView(name));
            }
            let query = parse_definition(def, &name)?;
            debug!(view = %name, references = query.references().len(), "parsed view");
            parsed.insert(name, query);
        }

        if self.strict {
            for query in parsed.values() {
                for view in query.references() {
                    if !parsed.contains_key(view) && !registry.contains(view) {
                        return Err(ParseError::UnresolvedView {
                            query: query.name.clone(),
                            view: view.to_string(),
                        });
                    }
                }
            }
        }

        let graph: IndexMap<&str, Vec<&str>> = registry
            .iter()
            .chain(parsed.iter().map(|(k, v)| (k.as_str(), v)))
            .map(|(name, q)| (name, q.references()))
            .collect();
        let members = cycle_members(&graph);
        if !members.is_empty() {
            return Err(ParseError::CyclicReference(members));
        }

        for query in parsed.values() {
            registry.register(query.clone())?;
        }
        Ok(parsed)
    }

    pub fn parse_str(&self, text: &str, registry: &mut QueryRegistry) -> Result<IndexMap<String, Query>, ParseError> {
        let doc: Value = serde_yaml_ng::from_str(text)?;
        self.parse_document(&doc, registry)
    }

    pub fn parse_file(&self, path: &Path, registry: &mut QueryRegistry) -> Result<IndexMap<String, Query>, ParseError> {
        let text = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.parse_str(&text, registry)
    }
}

/// Parse a document value with deferred view resolution.
pub fn parse_document(doc: &Value, registry: &mut QueryRegistry) -> Result<IndexMap<String, Query>, ParseError> {
    DocumentParser::new().parse_document(doc, registry)
}

pub fn parse_document_str(text: &str, registry: &mut QueryRegistry) -> Result<IndexMap<String, Query>, ParseError> {
    DocumentParser::new().parse_str(text, registry)
}

pub fn parse_document_file(path: &Path, registry: &mut QueryRegistry) -> Result<IndexMap<String, Query>, ParseError> {
    DocumentParser::new().parse_file(path, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::{CollectionMode, CompareOp, Expr, Scalar};

    fn yaml(text: &str) -> Value {
        serde_yaml_ng::from_str(text).unwrap()
    }

    fn definition(text: &str) -> Result<Query, ParseError> {
        parse_definition(&yaml(text), "v")
    }

    #[test]
    fn test_parser_full_definition() {
        let q = definition(
            r#"
description: Starred AI reading
from: bookmarks
filter:
  tags: [ai/*, ml]
  stars: ">= 3"
  created_at: within 30 days
sort: stars desc nulls first, title
limit: 10
offset: 2
"#,
        )
        .unwrap();
        assert_eq!(q.entity, Some(EntityType::Bookmark));
        assert_eq!(q.description.as_deref(), Some("Starred AI reading"));
        assert_eq!(q.filters.len(), 3);
        assert_eq!(
            q.filters[0].condition.as_expr(),
            Some(&Expr::Collection(CollectionMode::Any, vec!["ai/*".into(), "ml".into()]))
        );
        assert_eq!(
            q.filters[1].condition.as_expr(),
            Some(&Expr::Comparison(CompareOp::Ge, Scalar::Int(3)))
        );
        assert_eq!(q.sort.len(), 2);
        assert_eq!(q.sort[0].nulls, NullsOrder::First);
        assert_eq!((q.limit, q.offset), (Some(10), 2));
    }

    #[test]
    fn test_parser_aliases_and_collisions() {
        let q = definition("base: recent\nwhere:\n  stars: 5\norder: [title]\ngroup_by: domain\n").unwrap();
        assert_eq!(q.source.as_deref(), Some("recent"));
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.sort.len(), 1);
        assert_eq!(q.group_by.len(), 1);

        assert!(definition("from: bookmarks\nbase: recent\n").is_err());
        assert!(definition("filter: {a: 1}\nwhere: {b: 2}\n").is_err());
        assert!(definition("colour: red\n").is_err());
    }

    #[test]
    fn test_parser_list_of_filter_blocks() {
        let q = definition("filter:\n  - stars: '>= 2'\n  - stars: '< 5'\n").unwrap();
        assert_eq!(q.filters.len(), 2);
        assert!(definition("filter: [stars]\n").is_err());
    }

    #[test]
    fn test_parser_mapping_value_ands_operators() {
        let q = definition("filter:\n  stars: {'>=': 2, '<': 5}\n").unwrap();
        let Some(Expr::Compound(_, children)) = q.filters[0].condition.as_expr() else {
            panic!("expected compound");
        };
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn test_parser_compute_forms() {
        let q = definition("group: domain\ncompute:\n  total: sum(stars)\n  n: count()\n").unwrap();
        assert_eq!(q.entity, None);
        assert_eq!(q.compute[0].name, "total");
        assert_eq!(q.compute[1].func, AggregateFn::Count);

        let q = definition("compute: [count, avg(content.words), {best: max(stars)}]\n").unwrap();
        let names: Vec<_> = q.compute.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["count", "avg_content_words", "best"]);

        let q = definition("compute: count(), sum(stars)\n").unwrap();
        assert_eq!(q.compute[1].name, "sum_stars");

        assert!(matches!(
            definition("compute: median(stars)\n"),
            Err(ParseError::Compute { .. })
        ));
        assert!(matches!(
            definition("group: domain\ncompute: {domain: count()}\n"),
            Err(ParseError::Compute { .. })
        ));
        assert!(definition("entity: tags\ngroup: name\n").is_err());
        let q = definition("from: bookmarks\ngroup: domain\n").unwrap();
        assert_eq!(q.entity, None);
        assert!(definition("entity: bookmarks\ngroup: domain\n").is_err());
    }

    #[test]
    fn test_parser_params() {
        let q = definition(
            r#"
params:
  min_stars: int
  topic: {type: list, default: [ai], choices: [ai, rust]}
  since: "2024-01-01"
  archived: false
filter:
  stars: ">= {{params.min_stars}}"
  tags: "{{params.topic}}"
"#,
        )
        .unwrap();
        assert_eq!(q.params["min_stars"], ParamSpec::required(ParamType::Int));
        assert_eq!(q.params["topic"].ty, ParamType::List);
        assert_eq!(q.params["topic"].choices, vec!["ai", "rust"]);
        assert_eq!(q.params["since"].ty, ParamType::String);
        assert_eq!(q.params["archived"].ty, ParamType::Bool);
        assert!(matches!(q.filters[0].condition, Condition::Template(_)));

        let listed = definition("params: [q]\nfilter: {title: 'contains {{params.q}}'}\n").unwrap();
        assert_eq!(listed.params["q"], ParamSpec::required(ParamType::String));

        assert!(matches!(
            definition("filter: {stars: '>= {{params.nope}}'}\n"),
            Err(ParseError::InvalidParam { .. })
        ));
        assert!(matches!(
            definition("params: {n: {type: int, default: abc}}\n"),
            Err(ParseError::InvalidParam { .. })
        ));
    }

    #[test]
    fn test_parser_rejects_bad_values() {
        assert!(matches!(definition("entity: widgets\n"), Err(ParseError::UnknownEntity { .. })));
        assert!(definition("limit: -1\n").is_err());
        assert!(matches!(definition("sort: stars sideways\n"), Err(ParseError::Sort { .. })));
        assert!(matches!(
            definition("filter: {created_at: withn 3 days}\n"),
            Err(ParseError::Predicate { .. })
        ));
        assert!(definition("entity: tags\nfrom: bookmarks\n").is_err());
    }

    #[test]
    fn test_document_registers_all() {
        let mut reg = QueryRegistry::new();
        let parsed = parse_document_str(
            "recent:\n  filter: {created_at: within 7 days}\nstarred:\n  from: recent\n  filter: {stars: '>= 4'}\n",
            &mut reg,
        )
        .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["recent", "starred"]);
    }

    #[test]
    fn test_document_is_transactional() {
        let mut reg = QueryRegistry::new();
        parse_document_str("base_view: {}\n", &mut reg).unwrap();
        let err = parse_document_str("ok: {}\nbroken: {limit: -2}\n", &mut reg);
        assert!(err.is_err());
        assert_eq!(reg.len(), 1);

        let dup = parse_document_str("base_view: {}\n", &mut reg).unwrap_err();
        assert!(matches!(dup, ParseError::DuplicateView(_)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_document_cycle_and_strict() {
        let mut reg = QueryRegistry::new();
        let err = parse_document_str("a: {from: b}\nb: {from: a}\n", &mut reg).unwrap_err();
        assert!(matches!(err, ParseError::CyclicReference(ref m) if m == &["a", "b"]));
        assert!(reg.is_empty());

        parse_document_str("later: {from: not_yet}\n", &mut reg).unwrap();
        let strict = DocumentParser::strict().parse_str("other: {union: [missing]}\n", &mut reg);
        assert!(matches!(strict, Err(ParseError::UnresolvedView { .. })));
    }

    #[test]
    fn test_document_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("views.yaml");
        std::fs::write(&path, "tags_in_use:\n  entity: tags\n  filter: {count: '> 0'}\n").unwrap();
        let mut reg = QueryRegistry::new();
        parse_document_file(&path, &mut reg).unwrap();
        assert_eq!(reg.get("tags_in_use").and_then(|q| q.entity), Some(EntityType::Tag));
        assert!(matches!(
            parse_document_file(&dir.path().join("nope.yaml"), &mut reg),
            Err(ParseError::Io { .. })
        ));

        let schema = document_schema();
        assert!(schema.to_string().contains("QueryDefinition"));
    }
}
