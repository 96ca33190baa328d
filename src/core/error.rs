//! Error taxonomy: expression, document parse, execution, and store failures.
//!
//! Every variant carries enough context (query name, field, fragment) to
//! locate the offending definition without re-parsing it.

use thiserror::Error;

/// A malformed fragment of the predicate mini-language.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid expression {fragment:?}: {reason}")]
pub struct ExprError {
    pub fragment: String,
    pub reason: String,
}

impl ExprError {
    pub fn new(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }
}

/// Raised while turning documents, strings, or builder calls into queries.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("query '{query}': field '{field}': {source}")]
    Predicate {
        query: String,
        field: String,
        #[source]
        source: ExprError,
    },

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error("query '{query}': unknown entity '{entity}'")]
    UnknownEntity { query: String, entity: String },

    #[error("query '{query}': unresolved view reference '{view}'")]
    UnresolvedView { query: String, view: String },

    #[error("duplicate view '{0}'")]
    DuplicateView(String),

    #[error("query '{query}': invalid parameter '{param}': {reason}")]
    InvalidParam {
        query: String,
        param: String,
        reason: String,
    },

    #[error("cyclic view reference involving: {}", .0.join(", "))]
    CyclicReference(Vec<String>),

    #[error("query '{query}': invalid sort clause {clause:?}: {reason}")]
    Sort {
        query: String,
        clause: String,
        reason: String,
    },

    #[error("query '{query}': invalid compute {spec:?}: {reason}")]
    Compute {
        query: String,
        spec: String,
        reason: String,
    },

    #[error("query '{query}': {message}")]
    Definition { query: String, message: String },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ParseError {
    pub(crate) fn definition(query: &str, message: impl Into<String>) -> Self {
        Self::Definition {
            query: query.to_string(),
            message: message.into(),
        }
    }
}

/// Raised by the engine for a syntactically valid query that cannot run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("query '{query}': unknown field '{field}' for {entity}")]
    UnknownField {
        query: String,
        field: String,
        entity: String,
    },

    #[error("query '{query}': view '{view}' is not registered")]
    MissingView { query: String, view: String },

    #[error("query '{query}': required parameter '{param}' was not supplied")]
    MissingParameter { query: String, param: String },

    #[error("query '{query}': parameter '{param}': {reason}")]
    InvalidParameter {
        query: String,
        param: String,
        reason: String,
    },

    #[error("query '{query}': compute '{compute}' references unknown field '{field}'")]
    InvalidAggregate {
        query: String,
        compute: String,
        field: String,
    },

    #[error("query '{query}': view '{view}' yields {found}, expected {expected}")]
    EntityMismatch {
        query: String,
        view: String,
        expected: String,
        found: String,
    },

    #[error("cyclic view reference: {}", .0.join(" -> "))]
    CyclicReference(Vec<String>),
}

/// Failure reported by a record-store collaborator. Never retried here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid snapshot {path}: {message}")]
    Snapshot { path: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Umbrella error returned by `execute`.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_error_display() {
        let e = ExprError::new("withn 3 days", "unknown keyword 'withn'");
        assert_eq!(
            e.to_string(),
            "invalid expression \"withn 3 days\": unknown keyword 'withn'"
        );
    }

    #[test]
    fn test_predicate_error_carries_context() {
        let e = ParseError::Predicate {
            query: "recent".to_string(),
            field: "created_at".to_string(),
            source: ExprError::new("within x days", "bad amount"),
        };
        let msg = e.to_string();
        assert!(msg.contains("recent"));
        assert!(msg.contains("created_at"));
        assert!(msg.contains("within x days"));
    }

    #[test]
    fn test_cycle_display() {
        let e = ExecutionError::CyclicReference(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(e.to_string(), "cyclic view reference: a -> b -> a");
    }

    #[test]
    fn test_query_error_from_execution() {
        let e: QueryError = ExecutionError::MissingParameter {
            query: "q".into(),
            param: "min".into(),
        }
        .into();
        assert!(matches!(e, QueryError::Execution(_)));
        assert!(e.to_string().contains("min"));
    }
}
