//! SQLite reference store.
//!
//! Pushed clauses become bound `WHERE` fragments over a per-entity base
//! select. A clause is accepted only when SQLite's semantics for it equal
//! the evaluator's: typed column/operand pairs, no dates, no nested fields,
//! tag membership through `EXISTS`.
//!
//! Column affinity does not stop a row from storing text in an `INTEGER`
//! column, so every typed fragment is guarded on `typeof()` and only holds
//! for values of the storage class the evaluator would compare.

use super::{ClauseOp, RecordStore, Row, StoreClause};
use crate::core::error::StoreError;
use crate::core::expr::{CompareOp, Scalar};
use crate::core::types::{EntityType, FieldType};
use crate::store::memory::tag_row;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS bookmarks (
    id INTEGER PRIMARY KEY,
    url TEXT NOT NULL,
    title TEXT,
    description TEXT,
    domain TEXT,
    stars INTEGER,
    visit_count INTEGER,
    created_at TEXT,
    updated_at TEXT,
    last_visited TEXT,
    archived INTEGER,
    pinned INTEGER,
    http_status INTEGER,
    notes TEXT,
    content TEXT
);
CREATE TABLE IF NOT EXISTS bookmark_tags (
    bookmark_id INTEGER NOT NULL REFERENCES bookmarks(id),
    position INTEGER NOT NULL,
    tag TEXT NOT NULL,
    PRIMARY KEY (bookmark_id, position)
);
CREATE INDEX IF NOT EXISTS bookmark_tags_tag ON bookmark_tags(tag);
CREATE TABLE IF NOT EXISTS edges (
    source INTEGER NOT NULL,
    target INTEGER NOT NULL,
    relation TEXT NOT NULL,
    weight REAL,
    created_at TEXT
);
"#;

const BOOKMARK_SELECT: &str = "SELECT b.id, b.url, b.title, b.description, b.domain, b.stars, \
     b.visit_count, b.created_at, b.updated_at, b.last_visited, b.archived, b.pinned, \
     b.http_status, b.notes, b.content, \
     (SELECT group_concat(tag, char(31)) FROM \
        (SELECT tag FROM bookmark_tags bt WHERE bt.bookmark_id = b.id ORDER BY position)) AS tags \
     FROM bookmarks b";

const TAG_SELECT: &str = "SELECT bt.tag AS name, COUNT(*) AS count, \
     MIN(b.created_at) AS first_used, MAX(b.created_at) AS last_used \
     FROM bookmark_tags bt JOIN bookmarks b ON b.id = bt.bookmark_id GROUP BY bt.tag";

const EDGE_SELECT: &str = "SELECT rowid AS edge_order, source, target, relation, weight, created_at FROM edges";

/// Columns written by `insert_bookmark`, in table order.
const BOOKMARK_COLUMNS: &[&str] = &[
    "id",
    "url",
    "title",
    "description",
    "domain",
    "stars",
    "visit_count",
    "created_at",
    "updated_at",
    "last_visited",
    "archived",
    "pinned",
    "http_status",
    "notes",
    "content",
];

const EDGE_COLUMNS: &[&str] = &["source", "target", "relation", "weight", "created_at"];

const TAG_SEPARATOR: char = '\u{1f}';

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(Connection::open(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Other("sqlite connection poisoned".to_string()))
    }

    /// Create the reference tables if they do not exist.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert one bookmark row and its tags.
    pub fn insert_bookmark(&self, row: &Row) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let placeholders: Vec<String> = (1..=BOOKMARK_COLUMNS.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO bookmarks ({}) VALUES ({})",
            BOOKMARK_COLUMNS.join(", "),
            placeholders.join(", ")
        );
        let values = BOOKMARK_COLUMNS
            .iter()
            .map(|c| column_value(EntityType::Bookmark, c, row.get(*c)));
        tx.execute(&sql, params_from_iter(values))?;
        let id = tx.last_insert_rowid();

        if let Some(Value::Array(tags)) = row.get("tags") {
            for (position, tag) in tags.iter().filter_map(Value::as_str).enumerate() {
                tx.execute(
                    "INSERT INTO bookmark_tags (bookmark_id, position, tag) VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, position as i64, tag],
                )?;
            }
        }
        tx.commit()?;
        Ok(id)
    }

    pub fn insert_edge(&self, row: &Row) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let values = EDGE_COLUMNS
            .iter()
            .map(|c| column_value(EntityType::Edge, c, row.get(*c)));
        conn.execute(
            "INSERT INTO edges (source, target, relation, weight, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params_from_iter(values),
        )?;
        Ok(())
    }
}

fn to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

/// Numeric text in numeric columns and bool text in flag columns are
/// stored as numbers, so every text value left in a typed column is one
/// the evaluator can never compare or equate.
fn column_value(entity: EntityType, column: &str, value: Option<&Value>) -> SqlValue {
    let Some(Value::String(text)) = value else {
        return to_sql(value);
    };
    let trimmed = text.trim();
    match column_type(entity, column) {
        Some(FieldType::Int | FieldType::Float) => {
            if let Ok(i) = trimmed.parse::<i64>() {
                return SqlValue::Integer(i);
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() => SqlValue::Real(f),
                _ => SqlValue::Text(text.clone()),
            }
        }
        Some(FieldType::Bool) => match trimmed.to_ascii_lowercase().as_str() {
            "true" => SqlValue::Integer(1),
            "false" => SqlValue::Integer(0),
            _ => SqlValue::Text(text.clone()),
        },
        _ => SqlValue::Text(text.clone()),
    }
}

fn scalar_to_sql(scalar: &Scalar) -> SqlValue {
    match scalar {
        Scalar::Null => SqlValue::Null,
        Scalar::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Scalar::Int(i) => SqlValue::Integer(*i),
        Scalar::Float(f) => SqlValue::Real(*f),
        Scalar::Str(s) => SqlValue::Text(s.clone()),
    }
}

/// Pushable columns per entity. Dates, lists, objects, and derived
/// tag hierarchy fields are absent on purpose.
fn column_type(entity: EntityType, column: &str) -> Option<FieldType> {
    let ty = match (entity.stored(), column) {
        (EntityType::Bookmark, "id" | "stars" | "visit_count" | "http_status") => FieldType::Int,
        (EntityType::Bookmark, "url" | "title" | "description" | "domain" | "notes") => FieldType::Text,
        (EntityType::Bookmark, "archived" | "pinned") => FieldType::Bool,
        (EntityType::Bookmark, "tags") => FieldType::List,
        (EntityType::Tag, "name") => FieldType::Text,
        (EntityType::Tag, "count") => FieldType::Int,
        (EntityType::Edge, "source" | "target") => FieldType::Int,
        (EntityType::Edge, "relation") => FieldType::Text,
        (EntityType::Edge, "weight") => FieldType::Float,
        _ => return None,
    };
    Some(ty)
}

fn typed_operand(ty: FieldType, scalar: &Scalar) -> bool {
    matches!(
        (ty, scalar),
        (FieldType::Text, Scalar::Str(_))
            | (FieldType::Int | FieldType::Float, Scalar::Int(_) | Scalar::Float(_))
            | (FieldType::Bool, Scalar::Bool(_))
    )
}

/// `(fragment, params)` for a clause, or `None` when it cannot be pushed.
fn translate(entity: EntityType, clause: &StoreClause) -> Option<(String, Vec<SqlValue>)> {
    if clause.field.is_nested() {
        return None;
    }
    let column = clause.field.head();
    let ty = column_type(entity, column)?;
    let col = format!("t.\"{}\"", column);

    if ty == FieldType::List {
        let ClauseOp::AnyOf(patterns) = &clause.op else {
            return None;
        };
        let (cond, params) = pattern_condition("bt.tag", patterns)?;
        return Some((
            format!(
                "EXISTS (SELECT 1 FROM bookmark_tags bt WHERE bt.bookmark_id = t.id AND ({}))",
                cond
            ),
            params,
        ));
    }

    let (guard, operand) = match ty {
        FieldType::Int | FieldType::Float => (
            format!("typeof({}) IN ('integer', 'real')", col),
            col.clone(),
        ),
        FieldType::Bool => (format!("typeof({}) = 'integer'", col), format!("({} <> 0)", col)),
        _ => (format!("typeof({}) = 'text'", col), col.clone()),
    };

    match &clause.op {
        ClauseOp::Compare(CompareOp::Eq, Scalar::Null) | ClauseOp::Equals(Scalar::Null) => {
            Some((format!("{} IS NULL", col), vec![]))
        }
        ClauseOp::Compare(CompareOp::Ne, Scalar::Null) => Some((format!("{} IS NOT NULL", col), vec![])),
        ClauseOp::Compare(op, scalar) if typed_operand(ty, scalar) => Some((
            format!("{} AND {} {} ?", guard, operand, sql_op(*op)),
            vec![scalar_to_sql(scalar)],
        )),
        ClauseOp::Equals(scalar) if typed_operand(ty, scalar) => {
            if let Scalar::Str(s) = scalar {
                // Numeric-looking strings compare loosely in memory.
                if s.trim().parse::<f64>().is_ok() {
                    return None;
                }
            }
            Some((format!("{} AND {} = ?", guard, operand), vec![scalar_to_sql(scalar)]))
        }
        ClauseOp::Present => Some((
            format!("{0} IS NOT NULL AND NOT (typeof({0}) = 'text' AND {0} = '')", col),
            vec![],
        )),
        ClauseOp::Absent => Some((
            format!("{0} IS NULL OR (typeof({0}) = 'text' AND {0} = '')", col),
            vec![],
        )),
        ClauseOp::AnyOf(patterns) if ty == FieldType::Text => pattern_condition(&col, patterns),
        _ => None,
    }
}

fn sql_op(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "=",
        other => other.symbol(),
    }
}

/// Exact or `prefix/*` matches of `expr` against any pattern.
fn pattern_condition(expr: &str, patterns: &[String]) -> Option<(String, Vec<SqlValue>)> {
    if patterns.is_empty() {
        return None;
    }
    let mut parts = Vec::with_capacity(patterns.len());
    let mut params = Vec::new();
    for pattern in patterns {
        match pattern.strip_suffix('*').filter(|p| p.ends_with('/')) {
            Some(prefix) => {
                parts.push(format!("substr({}, 1, ?) = ?", expr));
                params.push(SqlValue::Integer(prefix.chars().count() as i64));
                params.push(SqlValue::Text(prefix.to_string()));
            }
            None => {
                parts.push(format!("{} = ?", expr));
                params.push(SqlValue::Text(pattern.clone()));
            }
        }
    }
    Some((parts.join(" OR "), params))
}

fn base_select(entity: EntityType) -> (&'static str, &'static str) {
    match entity.stored() {
        EntityType::Tag => (TAG_SELECT, "t.name"),
        EntityType::Edge => (EDGE_SELECT, "t.edge_order"),
        _ => (BOOKMARK_SELECT, "t.id"),
    }
}

fn read_row(entity: EntityType, row: &rusqlite::Row<'_>, names: &[String]) -> Result<Row, StoreError> {
    let mut out = Row::new();
    for (i, name) in names.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null | ValueRef::Blob(_) => continue,
            ValueRef::Integer(v) => Value::from(v),
            ValueRef::Real(v) => serde_json::Number::from_f64(v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        };
        out.insert(name.clone(), value);
    }

    match entity.stored() {
        EntityType::Bookmark => {
            let tags: Vec<Value> = match out.get("tags") {
                Some(Value::String(joined)) => joined
                    .split(TAG_SEPARATOR)
                    .map(|t| Value::String(t.to_string()))
                    .collect(),
                _ => Vec::new(),
            };
            out.insert("tags".into(), Value::Array(tags));
            for flag in ["archived", "pinned"] {
                if let Some(v) = out.get(flag).and_then(Value::as_i64) {
                    out.insert(flag.into(), Value::Bool(v != 0));
                }
            }
            if let Some(Value::String(raw)) = out.get("content") {
                if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
                    out.insert("content".into(), parsed);
                }
            }
        }
        EntityType::Tag => {
            let name = out.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let count = out.get("count").and_then(Value::as_i64).unwrap_or(0);
            let text = |key: &str| out.get(key).and_then(Value::as_str).map(str::to_string);
            out = tag_row(&name, count, text("first_used"), text("last_used"));
        }
        _ => {
            out.shift_remove("edge_order");
        }
    }
    Ok(out)
}

impl RecordStore for SqliteStore {
    fn fetch(&self, entity: EntityType, clauses: &[StoreClause]) -> Result<Vec<Row>, StoreError> {
        let (base, order) = base_select(entity);
        let mut fragments = Vec::new();
        let mut params = Vec::new();
        for clause in clauses {
            let (fragment, values) = translate(entity, clause).ok_or_else(|| {
                StoreError::Other(format!("clause not supported by sqlite: {}", clause))
            })?;
            fragments.push(format!("({})", fragment));
            params.extend(values);
        }
        let mut sql = format!("SELECT * FROM ({}) AS t", base);
        if !fragments.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&fragments.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(order);
        debug!(%entity, clauses = clauses.len(), sql = %sql, "sqlite fetch");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_row(entity, row, &names)?);
        }
        Ok(out)
    }

    fn accepts(&self, entity: EntityType, clause: &StoreClause) -> bool {
        translate(entity, clause).is_some()
    }
}
