//! Entity field tables and per-query shape resolution.
//!
//! A query's shape is its result entity plus the schema its predicates see
//! before aggregation (input) and after (output). Field existence is checked
//! against these schemas before any store access.

use super::error::ExecutionError;
use super::query::Query;
use super::types::*;
use indexmap::IndexMap;

const BOOKMARK_FIELDS: &[(&str, FieldType)] = &[
    ("id", FieldType::Int),
    ("url", FieldType::Text),
    ("title", FieldType::Text),
    ("description", FieldType::Text),
    ("domain", FieldType::Text),
    ("tags", FieldType::List),
    ("stars", FieldType::Int),
    ("visit_count", FieldType::Int),
    ("created_at", FieldType::Date),
    ("updated_at", FieldType::Date),
    ("last_visited", FieldType::Date),
    ("archived", FieldType::Bool),
    ("pinned", FieldType::Bool),
    ("http_status", FieldType::Int),
    ("notes", FieldType::Text),
    ("content", FieldType::Object),
];

const TAG_FIELDS: &[(&str, FieldType)] = &[
    ("name", FieldType::Text),
    ("count", FieldType::Int),
    ("depth", FieldType::Int),
    ("parent", FieldType::Text),
    ("first_used", FieldType::Date),
    ("last_used", FieldType::Date),
];

const EDGE_FIELDS: &[(&str, FieldType)] = &[
    ("source", FieldType::Int),
    ("target", FieldType::Int),
    ("relation", FieldType::Text),
    ("weight", FieldType::Float),
    ("created_at", FieldType::Date),
];

/// Known columns of a row set. `None` marks a column whose type follows
/// the values (nested or derived fields).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub entity: EntityType,
    columns: IndexMap<String, Option<FieldType>>,
}

impl Schema {
    /// The fixed schema of a stored entity. Stats start empty.
    pub fn of(entity: EntityType) -> Self {
        let table: &[(&str, FieldType)] = match entity {
            EntityType::Bookmark => BOOKMARK_FIELDS,
            EntityType::Tag => TAG_FIELDS,
            EntityType::Edge => EDGE_FIELDS,
            EntityType::Stats => &[],
        };
        Self {
            entity,
            columns: table
                .iter()
                .map(|(name, ty)| (name.to_string(), Some(*ty)))
                .collect(),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, Option<FieldType>)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// A field exists when it names a column, or sits under an object column.
    pub fn contains(&self, field: &FieldRef) -> bool {
        if self.columns.contains_key(&field.column()) {
            return true;
        }
        field.is_nested() && self.columns.get(field.head()) == Some(&Some(FieldType::Object))
    }

    /// Declared type of a field; `None` for dynamically typed fields.
    pub fn field_type(&self, field: &FieldRef) -> Option<FieldType> {
        self.columns.get(&field.column()).copied().flatten()
    }

    fn insert(&mut self, column: String, ty: Option<FieldType>) {
        self.columns.insert(column, ty);
    }
}

/// Resolved result entity and schemas of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub entity: EntityType,
    pub input: Schema,
    pub output: Schema,
    /// Effective aggregates; empty when the query does not aggregate.
    pub compute: Vec<ComputeSpec>,
}

impl Shape {
    pub fn is_aggregate(&self) -> bool {
        !self.compute.is_empty()
    }

    /// Resolve the shape of `query`, given the shapes of the views it references.
    pub fn resolve(query: &Query, views: &IndexMap<String, Shape>) -> Result<Self, ExecutionError> {
        let upstream = query
            .source
            .iter()
            .chain(query.union.iter())
            .chain(query.intersect.iter())
            .next()
            .and_then(|name| views.get(name));

        let entity = match query.entity {
            Some(entity) => entity,
            None if query.is_aggregate() => EntityType::Stats,
            None => upstream.map(|s| s.entity).unwrap_or(EntityType::Bookmark),
        };

        let input = match (entity, upstream) {
            (EntityType::Stats, Some(up)) => up.output.clone(),
            (EntityType::Stats, None) => Schema::of(EntityType::Bookmark),
            (other, _) => Schema::of(other),
        };

        let shape = if entity == EntityType::Stats
            && !(input.entity == EntityType::Stats && !query.is_aggregate())
        {
            let compute = if query.compute.is_empty() {
                vec![ComputeSpec::count("count")]
            } else {
                query.compute.clone()
            };
            let mut output = Schema::of(EntityType::Stats);
            for group in &query.group_by {
                output.insert(group.column(), input.field_type(group));
            }
            for spec in &compute {
                output.insert(spec.name.clone(), compute_type(spec, &input));
            }
            Shape {
                entity,
                input,
                output,
                compute,
            }
        } else {
            Shape {
                entity,
                output: input.clone(),
                input,
                compute: Vec::new(),
            }
        };

        shape.check_members(query, views)?;
        Ok(shape)
    }

    /// Every referenced view must yield the rows this query consumes.
    fn check_members(&self, query: &Query, views: &IndexMap<String, Shape>) -> Result<(), ExecutionError> {
        for name in query.references() {
            let Some(member) = views.get(name) else {
                continue;
            };
            if member.entity != self.input.entity {
                return Err(ExecutionError::EntityMismatch {
                    query: query.name.clone(),
                    view: name.to_string(),
                    expected: self.input.entity.to_string(),
                    found: member.entity.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Check every field a query names against the schema it applies to.
    pub fn validate_fields(&self, query: &Query) -> Result<(), ExecutionError> {
        let unknown = |field: &FieldRef, schema: &Schema| ExecutionError::UnknownField {
            query: query.name.clone(),
            field: field.to_string(),
            entity: schema.entity.to_string(),
        };

        let input_fields = query
            .filters
            .iter()
            .chain(query.exclude.iter())
            .map(|p| &p.field)
            .chain(query.group_by.iter());
        for field in input_fields {
            if !self.input.contains(field) {
                return Err(unknown(field, &self.input));
            }
        }

        for spec in &query.compute {
            if let Some(field) = &spec.field {
                if !self.input.contains(field) {
                    return Err(ExecutionError::InvalidAggregate {
                        query: query.name.clone(),
                        compute: spec.name.clone(),
                        field: field.to_string(),
                    });
                }
            }
        }

        let output_fields = query
            .having
            .iter()
            .map(|p| &p.field)
            .chain(query.sort.iter().map(|s| &s.field));
        for field in output_fields {
            if !self.output.contains(field) {
                return Err(unknown(field, &self.output));
            }
        }
        Ok(())
    }
}

fn compute_type(spec: &ComputeSpec, input: &Schema) -> Option<FieldType> {
    let field_type = spec.field.as_ref().and_then(|f| input.field_type(f));
    match spec.func {
        AggregateFn::Count => Some(FieldType::Int),
        AggregateFn::Avg => Some(FieldType::Float),
        AggregateFn::Sum => match field_type {
            Some(FieldType::Int) => Some(FieldType::Int),
            Some(FieldType::Float) => Some(FieldType::Float),
            _ => None,
        },
        AggregateFn::Min | AggregateFn::Max => field_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(path: &str) -> FieldRef {
        FieldRef::parse(path).unwrap()
    }

    #[test]
    fn test_schema_nested_only_under_object() {
        let s = Schema::of(EntityType::Bookmark);
        assert!(s.contains(&field("content.has")));
        assert!(s.contains(&field("stars")));
        assert!(!s.contains(&field("title.length")));
        assert!(!s.contains(&field("nope")));
        assert_eq!(s.field_type(&field("created_at")), Some(FieldType::Date));
        assert_eq!(s.field_type(&field("content.words")), None);
    }

    #[test]
    fn test_shape_plain_bookmark() {
        let q = Query::builder().build().unwrap();
        let shape = Shape::resolve(&q, &IndexMap::new()).unwrap();
        assert_eq!(shape.entity, EntityType::Bookmark);
        assert!(!shape.is_aggregate());
    }

    #[test]
    fn test_shape_stats_defaults_to_count() {
        let q = Query::builder().entity(EntityType::Stats).build().unwrap();
        let shape = Shape::resolve(&q, &IndexMap::new()).unwrap();
        assert_eq!(shape.compute, vec![ComputeSpec::count("count")]);
        assert!(shape.output.contains(&field("count")));
    }

    #[test]
    fn test_shape_group_output_columns() {
        let q = Query::builder()
            .group_by(["domain"])
            .compute("sum_stars", "sum(stars)")
            .build()
            .unwrap();
        let shape = Shape::resolve(&q, &IndexMap::new()).unwrap();
        assert_eq!(shape.entity, EntityType::Stats);
        assert_eq!(shape.input.entity, EntityType::Bookmark);
        assert_eq!(shape.output.field_type(&field("domain")), Some(FieldType::Text));
        assert_eq!(shape.output.field_type(&field("sum_stars")), Some(FieldType::Int));
    }

    #[test]
    fn test_shape_inherits_source_entity() {
        let mut views = IndexMap::new();
        let tags = Query::builder().entity(EntityType::Tag).build().unwrap();
        views.insert("tags".to_string(), Shape::resolve(&tags, &IndexMap::new()).unwrap());
        let q = Query::builder().from("tags").union("tags").build().unwrap();
        let shape = Shape::resolve(&q, &views).unwrap();
        assert_eq!(shape.entity, EntityType::Tag);
    }

    #[test]
    fn test_shape_entity_mismatch() {
        let mut views = IndexMap::new();
        let tags = Query::builder().entity(EntityType::Tag).build().unwrap();
        views.insert("tags".to_string(), Shape::resolve(&tags, &IndexMap::new()).unwrap());
        let q = Query::builder()
            .entity(EntityType::Bookmark)
            .union("tags")
            .build()
            .unwrap();
        let err = Shape::resolve(&q, &views).unwrap_err();
        assert!(matches!(err, ExecutionError::EntityMismatch { .. }));
    }

    #[test]
    fn test_validate_fields_split_by_phase() {
        let q = Query::builder()
            .named("q")
            .group_by(["domain"])
            .compute("n", "count()")
            .having("n", ">= 2")
            .sort("n desc")
            .build()
            .unwrap();
        let shape = Shape::resolve(&q, &IndexMap::new()).unwrap();
        shape.validate_fields(&q).unwrap();

        let bad = Query::builder()
            .named("q")
            .group_by(["domain"])
            .sort("stars")
            .build()
            .unwrap();
        let shape = Shape::resolve(&bad, &IndexMap::new()).unwrap();
        assert!(matches!(
            shape.validate_fields(&bad),
            Err(ExecutionError::UnknownField { ref field, .. }) if field == "stars"
        ));
    }

    #[test]
    fn test_validate_compute_field() {
        let q = Query::builder()
            .named("q")
            .compute("s", "sum(karma)")
            .build()
            .unwrap();
        let shape = Shape::resolve(&q, &IndexMap::new()).unwrap();
        assert!(matches!(
            shape.validate_fields(&q),
            Err(ExecutionError::InvalidAggregate { .. })
        ));
    }
}
