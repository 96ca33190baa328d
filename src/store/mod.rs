//! Record-store collaborators: in-memory, snapshot files, SQLite.
//!
//! The engine only ever reads: `fetch` returns every row of an entity that
//! satisfies all the pushed clauses. Clauses a store cannot translate with
//! exactly the evaluator's semantics must be declined through `accepts`.

pub mod memory;
pub mod snapshot;
pub mod sqlite;

use crate::core::error::StoreError;
use crate::core::expr::{CompareOp, Existence, Expr, Scalar};
use crate::core::types::{EntityType, FieldRef};
use std::fmt;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// One record: field name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Walk a (possibly nested) field reference into a row.
///
/// Stats rows carry nested group fields under their dotted column name,
/// so a nested reference that does not walk falls back to that key.
pub fn lookup<'a>(row: &'a Row, field: &FieldRef) -> Option<&'a serde_json::Value> {
    let (head, rest) = field.segments().split_first()?;
    let mut current = row.get(head);
    for segment in rest {
        current = current.and_then(|v| v.as_object()).and_then(|map| map.get(segment));
    }
    match current {
        Some(value) => Some(value),
        None if !rest.is_empty() => row.get(&field.column()),
        None => None,
    }
}

/// A store-level filter operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ClauseOp {
    Compare(CompareOp, Scalar),
    Equals(Scalar),
    Present,
    Absent,
    AnyOf(Vec<String>),
}

/// A filter the store applies during `fetch`. Clauses are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreClause {
    pub field: FieldRef,
    pub op: ClauseOp,
}

impl StoreClause {
    pub fn new(field: FieldRef, op: ClauseOp) -> Self {
        Self { field, op }
    }

    /// The expression with identical meaning, for stores that evaluate in memory.
    pub fn to_expr(&self) -> Expr {
        match &self.op {
            ClauseOp::Compare(op, value) => Expr::Comparison(*op, value.clone()),
            ClauseOp::Equals(value) => Expr::Literal(value.clone()),
            ClauseOp::Present => Expr::Existence(Existence::Exists),
            ClauseOp::Absent => Expr::Existence(Existence::Missing),
            ClauseOp::AnyOf(values) => Expr::any(values.iter().cloned()),
        }
    }
}

impl fmt::Display for StoreClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.to_expr())
    }
}

/// Read access to stored records.
pub trait RecordStore: Send + Sync {
    /// Rows of `entity` satisfying every clause.
    fn fetch(&self, entity: EntityType, clauses: &[StoreClause]) -> Result<Vec<Row>, StoreError>;

    /// Whether the store applies `clause` with the evaluator's exact semantics.
    fn accepts(&self, entity: EntityType, clause: &StoreClause) -> bool;
}

impl<S: RecordStore + ?Sized> RecordStore for &S {
    fn fetch(&self, entity: EntityType, clauses: &[StoreClause]) -> Result<Vec<Row>, StoreError> {
        (**self).fetch(entity, clauses)
    }

    fn accepts(&self, entity: EntityType, clause: &StoreClause) -> bool {
        (**self).accepts(entity, clause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested() {
        let row = json!({"content": {"lang": "en", "meta": {"words": 10}}, "stars": 3});
        let row = row.as_object().unwrap();
        let words = FieldRef::parse("content.meta.words").unwrap();
        assert_eq!(lookup(row, &words), Some(&json!(10)));
        let stars = FieldRef::parse("stars").unwrap();
        assert_eq!(lookup(row, &stars), Some(&json!(3)));
        let missing = FieldRef::parse("stars.deep").unwrap();
        assert_eq!(lookup(row, &missing), None);
    }

    #[test]
    fn test_lookup_dotted_column() {
        let row = json!({"content.lang": "en", "n": 2});
        let row = row.as_object().unwrap();
        let lang = FieldRef::parse("content.lang").unwrap();
        assert_eq!(lookup(row, &lang), Some(&json!("en")));

        let both = json!({"content": {"lang": "fr"}, "content.lang": "en"});
        assert_eq!(lookup(both.as_object().unwrap(), &lang), Some(&json!("fr")));
    }

    #[test]
    fn test_clause_to_expr() {
        let clause = StoreClause::new(
            FieldRef::parse("tags").unwrap(),
            ClauseOp::AnyOf(vec!["ai".into()]),
        );
        assert_eq!(clause.to_expr(), Expr::any(["ai"]));
        assert_eq!(clause.to_string(), "tags: any [ai]");
    }
}
