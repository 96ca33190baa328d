//! Query execution: prepare, compose, filter, aggregate, sort, paginate.
//!
//! Preparation touches no store: it resolves every referenced view
//! (depth-first, cycle-checked along the resolution stack), resolves each
//! query's shape, validates fields, binds parameters and parses templates.
//! Only then does the run phase fetch rows. Views are run at most once per
//! execution.

use super::aggregate::aggregate;
use super::error::{ExecutionError, ParseError, QueryError};
use super::eval::{order_values, BoundPredicate};
use super::planner::{self, PushdownPlan};
use super::query::{Predicate, Query};
use super::registry::QueryRegistry;
use super::resolver::{bind_params, resolve_condition, Params};
use super::result::QueryResult;
use super::schema::{Schema, Shape};
use super::types::*;
use crate::store::{lookup, RecordStore, Row};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

/// Everything one execution reads: records, views, the clock, and whether
/// predicates may be pushed to the store.
#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub store: &'a dyn RecordStore,
    pub registry: &'a QueryRegistry,
    pub now: DateTime<Utc>,
    pub pushdown: bool,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(store: &'a dyn RecordStore, registry: &'a QueryRegistry) -> Self {
        Self {
            store,
            registry,
            now: Utc::now(),
            pushdown: true,
        }
    }

    /// Evaluate temporal predicates against a fixed instant.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Evaluate every predicate in memory.
    pub fn without_pushdown(mut self) -> Self {
        self.pushdown = false;
        self
    }
}

/// Run `query` and wrap its rows in the container for its entity.
pub fn execute(query: &Query, ctx: &ExecutionContext<'_>, params: &Params) -> Result<QueryResult, QueryError> {
    let (top, views) = prepare(query, ctx.registry, params)?;
    let mut cache = FxHashMap::default();
    let rows = run(&top, &views, ctx, &mut cache)?;
    debug!(query = %query.name, entity = %top.shape.entity, rows = rows.len(), "query complete");
    Ok(QueryResult::from_rows(top.shape.entity, rows, &top.group_columns))
}

/// Run a registered view by name.
pub fn execute_view(name: &str, ctx: &ExecutionContext<'_>, params: &Params) -> Result<QueryResult, QueryError> {
    let query = ctx.registry.get(name).ok_or_else(|| ExecutionError::MissingView {
        query: name.to_string(),
        view: name.to_string(),
    })?;
    execute(query, ctx, params)
}

// ============================================================================
// Preparation
// ============================================================================

/// A query ready to run: shape resolved, every predicate bound.
#[derive(Debug, Clone)]
struct Prepared<'q> {
    query: &'q Query,
    shape: Shape,
    /// Output columns that identify a stats row.
    group_columns: Vec<String>,
    filters: Vec<BoundPredicate>,
    exclude: Vec<BoundPredicate>,
    having: Vec<BoundPredicate>,
}

type Views<'q> = IndexMap<String, Prepared<'q>>;

fn prepare<'q>(
    query: &'q Query,
    registry: &'q QueryRegistry,
    params: &Params,
) -> Result<(Prepared<'q>, Views<'q>), QueryError> {
    let mut prep = Preparation {
        registry,
        params,
        views: IndexMap::new(),
        shapes: IndexMap::new(),
    };
    let mut stack = vec![query.name.clone()];
    let top = prep.prepare(query, &mut stack)?;
    Ok((top, prep.views))
}

struct Preparation<'q, 'p> {
    registry: &'q QueryRegistry,
    params: &'p Params,
    views: Views<'q>,
    shapes: IndexMap<String, Shape>,
}

impl<'q> Preparation<'q, '_> {
    fn prepare(&mut self, query: &'q Query, stack: &mut Vec<String>) -> Result<Prepared<'q>, QueryError> {
        for name in query.references() {
            if let Some(pos) = stack.iter().position(|s| s == name) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(name.to_string());
                return Err(ExecutionError::CyclicReference(cycle).into());
            }
            if self.views.contains_key(name) {
                continue;
            }
            let view = self.registry.get(name).ok_or_else(|| ExecutionError::MissingView {
                query: query.name.clone(),
                view: name.to_string(),
            })?;
            stack.push(name.to_string());
            let prepared = self.prepare(view, stack)?;
            stack.pop();
            debug!(view = name, entity = %prepared.shape.entity, "resolved view");
            self.shapes.insert(name.to_string(), prepared.shape.clone());
            self.views.insert(name.to_string(), prepared);
        }

        let shape = Shape::resolve(query, &self.shapes)?;
        shape.validate_fields(query)?;
        let params = bind_params(query, self.params)?;

        let group_columns = if shape.is_aggregate() {
            query.group_by.iter().map(FieldRef::column).collect()
        } else if shape.entity == EntityType::Stats {
            query
                .references()
                .first()
                .and_then(|name| self.views.get(*name))
                .map(|up| up.group_columns.clone())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        Ok(Prepared {
            query,
            filters: bind(query, &query.filters, &params)?,
            exclude: bind(query, &query.exclude, &params)?,
            having: bind(query, &query.having, &params)?,
            shape,
            group_columns,
        })
    }
}

fn bind(query: &Query, predicates: &[Predicate], params: &Params) -> Result<Vec<BoundPredicate>, QueryError> {
    predicates
        .iter()
        .map(|p| {
            resolve_condition(&p.condition, params)
                .map(|expr| BoundPredicate::new(p.field.clone(), expr))
                .map_err(|source| {
                    QueryError::from(ParseError::Predicate {
                        query: query.name.clone(),
                        field: p.field.to_string(),
                        source,
                    })
                })
        })
        .collect()
}

// ============================================================================
// Run
// ============================================================================

type Cache = FxHashMap<String, Vec<Row>>;

fn view_rows(name: &str, views: &Views<'_>, ctx: &ExecutionContext<'_>, cache: &mut Cache) -> Result<Vec<Row>, QueryError> {
    if let Some(rows) = cache.get(name) {
        debug!(view = name, "view cache hit");
        return Ok(rows.clone());
    }
    let prepared = views.get(name).ok_or_else(|| ExecutionError::MissingView {
        query: name.to_string(),
        view: name.to_string(),
    })?;
    let rows = run(prepared, views, ctx, cache)?;
    debug!(view = name, rows = rows.len(), "view materialized");
    cache.insert(name.to_string(), rows.clone());
    Ok(rows)
}

fn run(prep: &Prepared<'_>, views: &Views<'_>, ctx: &ExecutionContext<'_>, cache: &mut Cache) -> Result<Vec<Row>, QueryError> {
    let query = prep.query;
    let input = &prep.shape.input;

    let mut rows = if query.is_composed() {
        let rows = compose(prep, views, ctx, cache)?;
        filter(rows, &prep.filters, input, ctx.now)
    } else {
        let entity = input.entity.stored();
        let plan = if ctx.pushdown {
            planner::plan(ctx.store, entity, &prep.filters)
        } else {
            PushdownPlan::in_memory(prep.filters.clone())
        };
        let fetched = ctx.store.fetch(entity, &plan.pushed)?;
        debug!(
            query = %query.name,
            %entity,
            fetched = fetched.len(),
            pushed = plan.pushed.len(),
            residual = plan.residual.len(),
            "fetched base rows"
        );
        filter(fetched, &plan.residual, input, ctx.now)
    };

    if !prep.exclude.is_empty() {
        rows.retain(|row| !prep.exclude.iter().any(|p| p.matches(row, input, ctx.now)));
    }

    if prep.shape.is_aggregate() {
        rows = aggregate(&rows, &query.group_by, &prep.shape.compute, input);
        rows = filter(rows, &prep.having, &prep.shape.output, ctx.now);
    } else if !prep.having.is_empty() {
        rows = filter(rows, &prep.having, &prep.shape.output, ctx.now);
    }

    sort_rows(&mut rows, &query.sort, &prep.shape.output);
    Ok(paginate(rows, query.offset, query.limit))
}

fn filter(rows: Vec<Row>, predicates: &[BoundPredicate], schema: &Schema, now: DateTime<Utc>) -> Vec<Row> {
    if predicates.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| predicates.iter().all(|p| p.matches(row, schema, now)))
        .collect()
}

/// Skip `offset` rows, then keep at most `limit`.
pub fn paginate(rows: Vec<Row>, offset: usize, limit: Option<usize>) -> Vec<Row> {
    rows.into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

// ============================================================================
// Composition
// ============================================================================

/// Identity of a row for union and intersect.
fn identity_key(entity: EntityType, row: &Row, group_columns: &[String]) -> String {
    let pick = |keys: &[&str]| -> Value {
        Value::Array(
            keys.iter()
                .map(|k| row.get(*k).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    };
    let present = |k: &str| row.get(k).is_some_and(|v| !v.is_null());
    let key = match entity {
        EntityType::Bookmark if present("id") => pick(&["id"]),
        EntityType::Bookmark if present("url") => pick(&["url"]),
        EntityType::Tag if present("name") => pick(&["name"]),
        EntityType::Edge => pick(&["source", "target", "relation"]),
        EntityType::Stats => {
            let columns: Vec<&str> = group_columns.iter().map(String::as_str).collect();
            pick(&columns)
        }
        _ => Value::Object(row.clone()),
    };
    format!("{}:{}", entity, key)
}

fn compose(prep: &Prepared<'_>, views: &Views<'_>, ctx: &ExecutionContext<'_>, cache: &mut Cache) -> Result<Vec<Row>, QueryError> {
    let query = prep.query;
    let group_columns = |name: &str| -> Vec<String> {
        views
            .get(name)
            .map(|v| v.group_columns.clone())
            .unwrap_or_default()
    };
    let keyed = |name: &str, rows: Vec<Row>| -> Vec<(String, Row)> {
        let entity = views.get(name).map(|v| v.shape.entity).unwrap_or(EntityType::Bookmark);
        let columns = group_columns(name);
        rows.into_iter()
            .map(|row| (identity_key(entity, &row, &columns), row))
            .collect()
    };

    let mut base: Option<Vec<(String, Row)>> = match &query.source {
        Some(source) => Some(keyed(source, view_rows(source, views, ctx, cache)?)),
        None => None,
    };

    if !query.union.is_empty() {
        let mut combined = base.take().unwrap_or_default();
        for member in &query.union {
            combined.extend(keyed(member, view_rows(member, views, ctx, cache)?));
        }
        let mut seen: FxHashSet<String> = FxHashSet::default();
        combined.retain(|(key, _)| seen.insert(key.clone()));
        base = Some(combined);
    }

    let mut members = query.intersect.iter();
    if base.is_none() {
        if let Some(first) = members.next() {
            base = Some(keyed(first, view_rows(first, views, ctx, cache)?));
        }
    }
    let mut rows = base.unwrap_or_default();
    for member in members {
        let keys: FxHashSet<String> = keyed(member, view_rows(member, views, ctx, cache)?)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        rows.retain(|(key, _)| keys.contains(key));
    }

    debug!(query = %query.name, rows = rows.len(), "composed base rows");
    Ok(rows.into_iter().map(|(_, row)| row).collect())
}

// ============================================================================
// Sorting
// ============================================================================

/// Stable multi-key sort. Nulls go first or last regardless of direction.
pub fn sort_rows(rows: &mut [Row], specs: &[SortSpec], schema: &Schema) {
    if specs.is_empty() {
        return;
    }
    let types: Vec<Option<FieldType>> = specs.iter().map(|s| schema.field_type(&s.field)).collect();
    rows.sort_by(|a, b| {
        for (spec, ty) in specs.iter().zip(&types) {
            let ordering = compare_for_sort(spec, *ty, a, b);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn compare_for_sort<'r>(spec: &SortSpec, ty: Option<FieldType>, a: &'r Row, b: &'r Row) -> Ordering {
    let value = |row: &'r Row| lookup(row, &spec.field).filter(|v| !v.is_null());
    match (value(a), value(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => match spec.nulls {
            NullsOrder::First => Ordering::Less,
            NullsOrder::Last => Ordering::Greater,
        },
        (Some(_), None) => match spec.nulls {
            NullsOrder::First => Ordering::Greater,
            NullsOrder::Last => Ordering::Less,
        },
        (Some(x), Some(y)) => {
            let ordering = order_values(x, y, ty);
            match spec.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        }
    }
}

// ============================================================================
// Explain
// ============================================================================

/// What an execution would do, without fetching anything.
#[derive(Debug, Clone)]
pub struct Explanation {
    pub query: String,
    pub entity: EntityType,
    pub input: EntityType,
    pub columns: Vec<String>,
    pub compute: Vec<ComputeSpec>,
    /// Views in resolution order, dependencies first.
    pub views: Vec<String>,
    /// `None` when rows come from views rather than the store.
    pub plan: Option<PushdownPlan>,
    pub filters: Vec<BoundPredicate>,
    pub exclude: Vec<BoundPredicate>,
    pub having: Vec<BoundPredicate>,
    pub sort: Vec<SortSpec>,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// Prepare `query` and report its shape, dependencies and pushdown split.
pub fn explain(query: &Query, ctx: &ExecutionContext<'_>, params: &Params) -> Result<Explanation, QueryError> {
    let (top, views) = prepare(query, ctx.registry, params)?;
    let plan = (!query.is_composed()).then(|| {
        if ctx.pushdown {
            planner::plan(ctx.store, top.shape.input.entity.stored(), &top.filters)
        } else {
            PushdownPlan::in_memory(top.filters.clone())
        }
    });
    Ok(Explanation {
        query: query.name.clone(),
        entity: top.shape.entity,
        input: top.shape.input.entity,
        columns: top.shape.output.columns().map(|(c, _)| c.to_string()).collect(),
        compute: top.shape.compute.clone(),
        views: views.keys().cloned().collect(),
        plan,
        filters: top.filters,
        exclude: top.exclude,
        having: top.having,
        sort: query.sort.clone(),
        offset: query.offset,
        limit: query.limit,
    })
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "query: {}", self.query)?;
        writeln!(f, "entity: {} (input: {})", self.entity, self.input)?;
        writeln!(f, "columns: {}", self.columns.join(", "))?;
        if !self.compute.is_empty() {
            let specs: Vec<String> = self.compute.iter().map(|c| c.to_string()).collect();
            writeln!(f, "compute: {}", specs.join(", "))?;
        }
        if !self.views.is_empty() {
            writeln!(f, "views: {}", self.views.join(" -> "))?;
        }
        match &self.plan {
            Some(plan) => write!(f, "{}", plan)?,
            None => {
                writeln!(f, "in-memory filters ({}):", self.filters.len())?;
                for p in &self.filters {
                    writeln!(f, "  {}", p)?;
                }
            }
        }
        for (label, predicates) in [("exclude", &self.exclude), ("having", &self.having)] {
            if !predicates.is_empty() {
                writeln!(f, "{} ({}):", label, predicates.len())?;
                for p in predicates {
                    writeln!(f, "  {}", p)?;
                }
            }
        }
        if !self.sort.is_empty() {
            let specs: Vec<String> = self.sort.iter().map(|s| s.to_string()).collect();
            writeln!(f, "sort: {}", specs.join(", "))?;
        }
        match self.limit {
            Some(limit) => writeln!(f, "page: offset {}, limit {}", self.offset, limit),
            None => writeln!(f, "page: offset {}, no limit", self.offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_document_str;
    use crate::core::temporal::parse_date_text;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        parse_date_text("2024-02-01T12:00:00Z").unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::from_values(
            vec![
                json!({"id": 1, "url": "https://a.com/1", "domain": "a.com", "stars": 5,
                       "tags": ["ai/nlp", "rust"], "created_at": "2024-01-30", "title": "Alpha"}),
                json!({"id": 2, "url": "https://b.com/2", "domain": "b.com", "stars": 3,
                       "tags": ["ai"], "created_at": "2024-01-10", "title": "Beta"}),
                json!({"id": 3, "url": "https://a.com/3", "domain": "a.com",
                       "tags": ["go"], "created_at": "2024-01-31", "title": "Gamma"}),
                json!({"id": 4, "url": "https://c.com/4", "domain": "c.com", "stars": 1,
                       "tags": ["ai/vision"], "created_at": "2023-12-01", "title": "Delta",
                       "archived": true}),
            ],
            vec![
                json!({"source": 1, "target": 2, "relation": "cites"}),
                json!({"source": 2, "target": 3, "relation": "cites"}),
            ],
        )
    }

    fn ids(result: &QueryResult) -> Vec<i64> {
        result
            .bookmarks()
            .unwrap()
            .iter()
            .filter_map(|b| b.id)
            .collect()
    }

    fn run_query(q: &Query, reg: &QueryRegistry, s: &MemoryStore) -> Result<QueryResult, QueryError> {
        let ctx = ExecutionContext::new(s, reg).with_now(now());
        execute(q, &ctx, &Params::new())
    }

    #[test]
    fn test_executor_wildcard_filter() {
        let q = Query::builder().filter("tags", "any [ai/*]").build().unwrap();
        let s = store();
        let result = run_query(&q, &QueryRegistry::new(), &s).unwrap();
        assert_eq!(ids(&result), vec![1, 4]);
    }

    #[test]
    fn test_executor_temporal_boundary() {
        let q = Query::builder().filter("created_at", "within 7 days").build().unwrap();
        let result = run_query(&q, &QueryRegistry::new(), &store()).unwrap();
        assert_eq!(ids(&result), vec![1, 3]);
    }

    #[test]
    fn test_executor_sort_nulls_and_pagination() {
        let s = store();
        let reg = QueryRegistry::new();
        let q = Query::builder().sort("stars desc").build().unwrap();
        assert_eq!(ids(&run_query(&q, &reg, &s).unwrap()), vec![1, 2, 4, 3]);

        let q = Query::builder().sort("stars desc nulls first").build().unwrap();
        assert_eq!(ids(&run_query(&q, &reg, &s).unwrap()), vec![3, 1, 2, 4]);

        let q = Query::builder().sort("stars").offset(1).limit(2).build().unwrap();
        assert_eq!(ids(&run_query(&q, &reg, &s).unwrap()), vec![2, 1]);

        let q = Query::builder().offset(10).build().unwrap();
        assert!(run_query(&q, &reg, &s).unwrap().is_empty());
    }

    #[test]
    fn test_executor_aggregation_example() {
        let q = Query::builder()
            .group_by(["domain"])
            .compute("count", "count()")
            .compute("sum_stars", "sum(stars)")
            .sort("domain")
            .build()
            .unwrap();
        let result = run_query(&q, &QueryRegistry::new(), &store()).unwrap();
        assert_eq!(result.entity(), EntityType::Stats);
        assert_eq!(
            result.to_value(),
            json!([
                {"domain": "a.com", "count": 2, "sum_stars": 5},
                {"domain": "b.com", "count": 1, "sum_stars": 3},
                {"domain": "c.com", "count": 1, "sum_stars": 1},
            ])
        );
        let stats = result.stats().unwrap();
        assert_eq!(stats[0].group["domain"], json!("a.com"));
    }

    #[test]
    fn test_executor_nested_group_sort_and_having() {
        let s = MemoryStore::from_values(
            vec![
                json!({"id": 1, "url": "u1", "content": {"lang": "en"}}),
                json!({"id": 2, "url": "u2", "content": {"lang": "fr"}}),
                json!({"id": 3, "url": "u3", "content": {"lang": "en"}}),
                json!({"id": 4, "url": "u4", "content": {"lang": "de"}}),
            ],
            vec![],
        );
        let reg = QueryRegistry::new();

        let sorted = Query::builder()
            .group_by(["content.lang"])
            .compute("n", "count()")
            .sort("content.lang desc")
            .build()
            .unwrap();
        assert_eq!(
            run_query(&sorted, &reg, &s).unwrap().to_value(),
            json!([
                {"content.lang": "fr", "n": 1},
                {"content.lang": "en", "n": 2},
                {"content.lang": "de", "n": 1},
            ])
        );

        let kept = Query::builder()
            .group_by(["content.lang"])
            .compute("n", "count()")
            .having("content.lang", "any [en, de]")
            .sort("content.lang desc")
            .build()
            .unwrap();
        assert_eq!(
            run_query(&kept, &reg, &s).unwrap().to_value(),
            json!([
                {"content.lang": "en", "n": 2},
                {"content.lang": "de", "n": 1},
            ])
        );
    }

    #[test]
    fn test_executor_having_and_exclude() {
        let q = Query::builder()
            .exclude("archived", "true")
            .group_by(["domain"])
            .compute("n", "count()")
            .having("n", ">= 2")
            .build()
            .unwrap();
        let result = run_query(&q, &QueryRegistry::new(), &store()).unwrap();
        assert_eq!(result.to_value(), json!([{"domain": "a.com", "n": 2}]));
    }

    #[test]
    fn test_executor_composition() {
        let mut reg = QueryRegistry::new();
        parse_document_str(
            r#"
recent:
  filter: {created_at: within 30 days}
starred:
  filter: {stars: ">= 3"}
either:
  union: [recent, starred]
both:
  intersect: [recent, starred]
recent_ai:
  from: recent
  filter: {tags: "any [ai, ai/*]"}
"#,
            &mut reg,
        )
        .unwrap();
        let s = store();
        let ctx = ExecutionContext::new(&s, &reg).with_now(now());
        let p = Params::new();
        assert_eq!(ids(&execute_view("either", &ctx, &p).unwrap()), vec![1, 2, 3]);
        assert_eq!(ids(&execute_view("both", &ctx, &p).unwrap()), vec![1, 2]);
        assert_eq!(ids(&execute_view("recent_ai", &ctx, &p).unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_executor_views_run_once() {
        let mut reg = QueryRegistry::new();
        parse_document_str("base: {}\nboth: {union: [base, base], intersect: [base]}\n", &mut reg).unwrap();
        let s = store();
        let ctx = ExecutionContext::new(&s, &reg).with_now(now());
        let result = execute_view("both", &ctx, &Params::new()).unwrap();
        assert_eq!(result.len(), 4);
        assert_eq!(s.fetch_count(), 1);
    }

    #[test]
    fn test_executor_cycle_error() {
        let mut reg = QueryRegistry::new();
        reg.register(Query::builder().named("a").from("b").build().unwrap()).unwrap();
        reg.register(Query::builder().named("b").from("a").build().unwrap()).unwrap();
        let s = store();
        let ctx = ExecutionContext::new(&s, &reg);
        let err = execute_view("a", &ctx, &Params::new()).unwrap_err();
        assert!(matches!(
            err,
            QueryError::Execution(ExecutionError::CyclicReference(ref path)) if path == &["a", "b", "a"]
        ));
        assert_eq!(s.fetch_count(), 0);
    }

    #[test]
    fn test_executor_validation_before_fetch() {
        let s = store();
        let reg = QueryRegistry::new();
        let q = Query::builder().named("q").filter("karma", "> 1").build().unwrap();
        assert!(matches!(
            run_query(&q, &reg, &s),
            Err(QueryError::Execution(ExecutionError::UnknownField { .. }))
        ));
        let q = Query::builder().named("q").from("nowhere").build().unwrap();
        assert!(matches!(
            run_query(&q, &reg, &s),
            Err(QueryError::Execution(ExecutionError::MissingView { .. }))
        ));
        assert_eq!(s.fetch_count(), 0);
    }

    #[test]
    fn test_executor_parameters() {
        let mut reg = QueryRegistry::new();
        parse_document_str(
            "by_stars:\n  params: {min: int, topic: {type: list, default: [ai]}}\n  filter:\n    stars: '>= {{params.min}}'\n    tags: '{{params.topic}}'\n",
            &mut reg,
        )
        .unwrap();
        let s = store();
        let ctx = ExecutionContext::new(&s, &reg).with_now(now());

        let missing = execute_view("by_stars", &ctx, &Params::new()).unwrap_err();
        assert!(matches!(
            missing,
            QueryError::Execution(ExecutionError::MissingParameter { .. })
        ));

        let mut p = Params::new();
        p.insert("min".into(), json!("2"));
        assert_eq!(ids(&execute_view("by_stars", &ctx, &p).unwrap()), vec![2]);

        p.insert("topic".into(), json!(["rust", "ai"]));
        assert_eq!(ids(&execute_view("by_stars", &ctx, &p).unwrap()), vec![1, 2]);

        p.insert("min".into(), json!("lots"));
        assert!(matches!(
            execute_view("by_stars", &ctx, &p),
            Err(QueryError::Execution(ExecutionError::InvalidParameter { .. }))
        ));
    }

    #[test]
    fn test_executor_pushdown_is_transparent() {
        let q = Query::builder()
            .filter("stars", ">= 3")
            .filter("title", "contains a")
            .build()
            .unwrap();
        let reg = QueryRegistry::new();
        let pushed_store = store();
        let pushed = execute(&q, &ExecutionContext::new(&pushed_store, &reg), &Params::new()).unwrap();
        assert_eq!(pushed_store.pushed_clauses().len(), 1);

        let memory_store = store();
        let ctx = ExecutionContext::new(&memory_store, &reg).without_pushdown();
        let in_memory = execute(&q, &ctx, &Params::new()).unwrap();
        assert!(memory_store.pushed_clauses().is_empty());
        assert_eq!(pushed, in_memory);
    }

    #[test]
    fn test_executor_tags_and_edges() {
        let reg = QueryRegistry::new();
        let s = store();
        let q = Query::builder()
            .entity(EntityType::Tag)
            .filter("name", "under ai")
            .sort("name")
            .build()
            .unwrap();
        let tags = run_query(&q, &reg, &s).unwrap();
        let names: Vec<_> = tags.tags().unwrap().iter().filter_map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["ai", "ai/nlp", "ai/vision"]);

        let q = Query::builder().entity(EntityType::Edge).filter("source", "2").build().unwrap();
        let edges = run_query(&q, &reg, &s).unwrap();
        assert_eq!(edges.edges().unwrap()[0].target, Some(3));
    }

    #[test]
    fn test_explain_reports_split() {
        let mut reg = QueryRegistry::new();
        parse_document_str("recent: {filter: {created_at: within 7 days}}\n", &mut reg).unwrap();
        let s = store();
        let ctx = ExecutionContext::new(&s, &reg);

        let q = Query::builder()
            .named("q")
            .filter("stars", ">= 3")
            .filter("created_at", "within 3 days")
            .build()
            .unwrap();
        let explained = explain(&q, &ctx, &Params::new()).unwrap();
        let plan = explained.plan.as_ref().unwrap();
        assert_eq!((plan.pushed.len(), plan.residual.len()), (1, 1));
        assert!(explained.to_string().contains("pushed (1):"));

        let composed = Query::builder().named("c").from("recent").build().unwrap();
        let explained = explain(&composed, &ctx, &Params::new()).unwrap();
        assert!(explained.plan.is_none());
        assert_eq!(explained.views, vec!["recent"]);
        assert_eq!(s.fetch_count(), 0);
    }
}
