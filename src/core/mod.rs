//! Query engine: expressions, query AST, documents, planning, execution.

pub mod aggregate;
pub mod error;
pub mod eval;
pub mod executor;
pub mod expr;
pub mod grammar;
pub mod parser;
pub mod planner;
pub mod query;
pub mod registry;
pub mod resolver;
pub mod result;
pub mod schema;
pub mod temporal;
pub mod types;
