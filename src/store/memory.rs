//! In-memory record store.
//!
//! Evaluates pushed clauses with the shared evaluator, so it accepts every
//! clause. Tag rows are derived from bookmark tags unless given explicitly.

use super::{RecordStore, Row, StoreClause};
use crate::core::error::StoreError;
use crate::core::eval::evaluate;
use crate::core::schema::Schema;
use crate::core::types::EntityType;
use crate::store::lookup;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

static NULL: Value = Value::Null;

#[derive(Debug, Default)]
pub struct MemoryStore {
    bookmarks: Vec<Row>,
    tags: Option<Vec<Row>>,
    edges: Vec<Row>,
    fetches: AtomicUsize,
    pushed: Mutex<Vec<StoreClause>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bookmarks(mut self, rows: Vec<Row>) -> Self {
        self.bookmarks = rows;
        self
    }

    pub fn with_tags(mut self, rows: Vec<Row>) -> Self {
        self.tags = Some(rows);
        self
    }

    pub fn with_edges(mut self, rows: Vec<Row>) -> Self {
        self.edges = rows;
        self
    }

    /// Build from JSON values; non-object values are skipped.
    pub fn from_values(bookmarks: Vec<Value>, edges: Vec<Value>) -> Self {
        let rows = |values: Vec<Value>| -> Vec<Row> {
            values
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect()
        };
        Self::new().with_bookmarks(rows(bookmarks)).with_edges(rows(edges))
    }

    pub fn bookmarks(&self) -> &[Row] {
        &self.bookmarks
    }

    pub fn edges(&self) -> &[Row] {
        &self.edges
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Every clause pushed to this store, in arrival order.
    pub fn pushed_clauses(&self) -> Vec<StoreClause> {
        match self.pushed.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Tag rows: explicit, or derived from bookmark tags.
    pub fn tag_rows(&self) -> Vec<Row> {
        match &self.tags {
            Some(rows) => rows.clone(),
            None => derive_tags(&self.bookmarks),
        }
    }

    fn rows(&self, entity: EntityType) -> Vec<Row> {
        match entity {
            EntityType::Bookmark | EntityType::Stats => self.bookmarks.clone(),
            EntityType::Tag => self.tag_rows(),
            EntityType::Edge => self.edges.clone(),
        }
    }
}

impl RecordStore for MemoryStore {
    fn fetch(&self, entity: EntityType, clauses: &[StoreClause]) -> Result<Vec<Row>, StoreError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if !clauses.is_empty() {
            let mut log = self
                .pushed
                .lock()
                .map_err(|_| StoreError::Other("clause log poisoned".to_string()))?;
            log.extend(clauses.iter().cloned());
        }

        let schema = Schema::of(entity.stored());
        let now = chrono::Utc::now();
        let exprs: Vec<_> = clauses.iter().map(|c| (c, c.to_expr())).collect();
        Ok(self
            .rows(entity)
            .into_iter()
            .filter(|row| {
                exprs.iter().all(|(clause, expr)| {
                    let value = lookup(row, &clause.field).unwrap_or(&NULL);
                    evaluate(expr, value, schema.field_type(&clause.field), now)
                })
            })
            .collect())
    }

    fn accepts(&self, _entity: EntityType, _clause: &StoreClause) -> bool {
        true
    }
}

/// Aggregate tag usage from bookmark rows, in first-seen order.
pub fn derive_tags(bookmarks: &[Row]) -> Vec<Row> {
    struct Usage {
        count: i64,
        first: Option<String>,
        last: Option<String>,
    }

    let mut usage: IndexMap<String, Usage> = IndexMap::new();
    for bookmark in bookmarks {
        let Some(Value::Array(tags)) = bookmark.get("tags") else {
            continue;
        };
        let created = bookmark
            .get("created_at")
            .and_then(Value::as_str)
            .map(str::to_string);
        for tag in tags.iter().filter_map(Value::as_str) {
            let entry = usage.entry(tag.to_string()).or_insert(Usage {
                count: 0,
                first: None,
                last: None,
            });
            entry.count += 1;
            if let Some(at) = &created {
                if entry.first.as_ref().is_none_or(|f| at < f) {
                    entry.first = Some(at.clone());
                }
                if entry.last.as_ref().is_none_or(|l| at > l) {
                    entry.last = Some(at.clone());
                }
            }
        }
    }

    usage
        .into_iter()
        .map(|(name, u)| tag_row(&name, u.count, u.first, u.last))
        .collect()
}

/// A tag row with hierarchy fields derived from its name.
pub fn tag_row(name: &str, count: i64, first: Option<String>, last: Option<String>) -> Row {
    let mut row = Row::new();
    let depth = name.matches('/').count() as i64;
    let parent = name
        .rsplit_once('/')
        .map(|(p, _)| Value::String(p.to_string()))
        .unwrap_or(Value::Null);
    row.insert("name".into(), Value::String(name.to_string()));
    row.insert("count".into(), Value::from(count));
    row.insert("depth".into(), Value::from(depth));
    row.insert("parent".into(), parent);
    row.insert("first_used".into(), first.map(Value::String).unwrap_or(Value::Null));
    row.insert("last_used".into(), last.map(Value::String).unwrap_or(Value::Null));
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::{CompareOp, Scalar};
    use crate::core::types::FieldRef;
    use crate::store::ClauseOp;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::from_values(
            vec![
                json!({"id": 1, "stars": 5, "tags": ["ai/nlp", "rust"], "created_at": "2024-01-02"}),
                json!({"id": 2, "stars": 1, "tags": ["rust"], "created_at": "2024-01-01"}),
                json!("not a row"),
            ],
            vec![],
        )
    }

    #[test]
    fn test_memory_fetch_applies_clauses() {
        let s = store();
        let clause = StoreClause::new(
            FieldRef::parse("stars").unwrap(),
            ClauseOp::Compare(CompareOp::Ge, Scalar::Int(3)),
        );
        let rows = s.fetch(EntityType::Bookmark, &[clause.clone()]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(s.fetch_count(), 1);
        assert_eq!(s.pushed_clauses(), vec![clause]);
    }

    #[test]
    fn test_memory_derives_tags() {
        let tags = store().tag_rows();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0]["name"], json!("ai/nlp"));
        assert_eq!(tags[0]["depth"], json!(1));
        assert_eq!(tags[0]["parent"], json!("ai"));
        assert_eq!(tags[1]["name"], json!("rust"));
        assert_eq!(tags[1]["count"], json!(2));
        assert_eq!(tags[1]["first_used"], json!("2024-01-01"));
        assert_eq!(tags[1]["last_used"], json!("2024-01-02"));
        assert_eq!(tags[1]["parent"], json!(null));
    }

    #[test]
    fn test_memory_explicit_tags_win() {
        let s = store().with_tags(vec![tag_row("solo", 9, None, None)]);
        let rows = s.fetch(EntityType::Tag, &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["count"], json!(9));
    }
}
