//! markql: a typed, composable query language for personal bookmark stores.
//!
//! Queries target bookmarks, tags, edges, or aggregated stats. They are
//! written as YAML view documents or built in code, reference each other
//! by name, and push eligible predicates down to the record store.
//!
//! ```no_run
//! use markql::core::executor::{execute_view, ExecutionContext};
//! use markql::core::parser::parse_document_str;
//! use markql::core::registry::QueryRegistry;
//! use markql::core::resolver::Params;
//! use markql::store::snapshot;
//!
//! let mut registry = QueryRegistry::new();
//! parse_document_str("recent_ai:\n  filter: {tags: 'any [ai/*]', created_at: within 7 days}\n", &mut registry)?;
//! let store = snapshot::load(std::path::Path::new("records.yaml"))?.into_store();
//! let ctx = ExecutionContext::new(&store, &registry);
//! let result = execute_view("recent_ai", &ctx, &Params::new())?;
//! println!("{}", result.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod store;

pub use crate::core::error::{ExecutionError, ExprError, ParseError, QueryError, StoreError};
pub use crate::core::executor::{execute, execute_view, explain, ExecutionContext};
pub use crate::core::query::{Query, QueryBuilder};
pub use crate::core::registry::QueryRegistry;
pub use crate::core::result::QueryResult;
