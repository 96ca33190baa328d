//! Typed result containers, one per entity kind.
//!
//! Items keep every field of the source row: known fields land in typed
//! slots when the value fits, anything else is kept verbatim in `extra`.
//! Serializing an item therefore reproduces its row.

use super::types::EntityType;
use crate::store::Row;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::ops::Index;

/// Move `key` out of `extra` when it converts to `T` and back unchanged.
fn take<T: DeserializeOwned + Serialize>(extra: &mut Row, key: &str) -> Option<T> {
    let value = extra.get(key)?;
    let typed: T = serde_json::from_value(value.clone()).ok()?;
    if serde_json::to_value(&typed).ok().as_ref() != Some(value) {
        return None;
    }
    extra.shift_remove(key);
    Some(typed)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BookmarkItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stars: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(flatten)]
    pub extra: Row,
}

impl BookmarkItem {
    pub fn from_row(row: Row) -> Self {
        let mut extra = row;
        Self {
            id: take(&mut extra, "id"),
            url: take(&mut extra, "url"),
            title: take(&mut extra, "title"),
            domain: take(&mut extra, "domain"),
            tags: take(&mut extra, "tags"),
            stars: take(&mut extra, "stars"),
            created_at: take(&mut extra, "created_at"),
            archived: take(&mut extra, "archived"),
            extra,
        }
    }

    /// Tags, or an empty slice when the row has none.
    pub fn tag_list(&self) -> &[String] {
        self.tags.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(flatten)]
    pub extra: Row,
}

impl TagItem {
    pub fn from_row(row: Row) -> Self {
        let mut extra = row;
        Self {
            name: take(&mut extra, "name"),
            count: take(&mut extra, "count"),
            extra,
        }
    }

    /// Hierarchy segments of a `parent/child` name; `None` for flat tags.
    pub fn segments(&self) -> Option<Vec<&str>> {
        let name = self.name.as_deref()?;
        name.contains('/').then(|| name.split('/').collect())
    }
}

/// One aggregated row: group values, then computed values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsRow {
    #[serde(flatten)]
    pub group: IndexMap<String, Value>,
    #[serde(flatten)]
    pub values: IndexMap<String, Value>,
}

impl StatsRow {
    /// Split a row on the group field names; everything else is a value.
    pub fn from_row(row: Row, group_fields: &[String]) -> Self {
        let mut out = Self::default();
        for (key, value) in row {
            if group_fields.contains(&key) {
                out.group.insert(key, value);
            } else {
                out.values.insert(key, value);
            }
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.group.get(key).or_else(|| self.values.get(key))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Edge {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(flatten)]
    pub extra: Row,
}

impl Edge {
    pub fn from_row(row: Row) -> Self {
        let mut extra = row;
        Self {
            source: take(&mut extra, "source"),
            target: take(&mut extra, "target"),
            relation: take(&mut extra, "relation"),
            weight: take(&mut extra, "weight"),
            extra,
        }
    }
}

/// An ordered, read-only sequence of items.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultSet<T> {
    items: Vec<T>,
}

impl<T> ResultSet<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }
}

impl<T> Default for ResultSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Index<usize> for ResultSet<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<T> IntoIterator for ResultSet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a ResultSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// The typed outcome of one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Bookmarks(ResultSet<BookmarkItem>),
    Tags(ResultSet<TagItem>),
    Stats(ResultSet<StatsRow>),
    Edges(ResultSet<Edge>),
}

impl QueryResult {
    /// Wrap final rows in the container for `entity`.
    pub fn from_rows(entity: EntityType, rows: Vec<Row>, group_fields: &[String]) -> Self {
        match entity {
            EntityType::Bookmark => {
                Self::Bookmarks(ResultSet::new(rows.into_iter().map(BookmarkItem::from_row).collect()))
            }
            EntityType::Tag => Self::Tags(ResultSet::new(rows.into_iter().map(TagItem::from_row).collect())),
            EntityType::Stats => Self::Stats(ResultSet::new(
                rows.into_iter()
                    .map(|r| StatsRow::from_row(r, group_fields))
                    .collect(),
            )),
            EntityType::Edge => Self::Edges(ResultSet::new(rows.into_iter().map(Edge::from_row).collect())),
        }
    }

    pub fn entity(&self) -> EntityType {
        match self {
            Self::Bookmarks(_) => EntityType::Bookmark,
            Self::Tags(_) => EntityType::Tag,
            Self::Stats(_) => EntityType::Stats,
            Self::Edges(_) => EntityType::Edge,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Bookmarks(r) => r.len(),
            Self::Tags(r) => r.len(),
            Self::Stats(r) => r.len(),
            Self::Edges(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Plain JSON array of row objects.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Array(Vec::new()))
    }

    /// One JSON object per item, in result order.
    pub fn rows(&self) -> Vec<Row> {
        match self.to_value() {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn bookmarks(&self) -> Option<&ResultSet<BookmarkItem>> {
        match self {
            Self::Bookmarks(r) => Some(r),
            _ => None,
        }
    }

    pub fn tags(&self) -> Option<&ResultSet<TagItem>> {
        match self {
            Self::Tags(r) => Some(r),
            _ => None,
        }
    }

    pub fn stats(&self) -> Option<&ResultSet<StatsRow>> {
        match self {
            Self::Stats(r) => Some(r),
            _ => None,
        }
    }

    pub fn edges(&self) -> Option<&ResultSet<Edge>> {
        match self {
            Self::Edges(r) => Some(r),
            _ => None,
        }
    }
}
