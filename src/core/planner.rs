//! Pushdown planning: split bound predicates into store clauses and residuals.
//!
//! A predicate is pushed only when it translates to a clause and the store
//! accepts that clause. Everything else stays in memory. The result rows are
//! identical either way; only the amount of data the store returns differs.

use super::eval::BoundPredicate;
use super::expr::{CollectionMode, Existence, Expr, LogicOp};
use super::types::EntityType;
use crate::store::{ClauseOp, RecordStore, StoreClause};
use std::fmt;
use tracing::{debug, warn};

/// How the filters of one query are split between store and memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushdownPlan {
    pub pushed: Vec<StoreClause>,
    pub residual: Vec<BoundPredicate>,
}

impl PushdownPlan {
    /// Everything evaluated in memory.
    pub fn in_memory(predicates: Vec<BoundPredicate>) -> Self {
        Self {
            pushed: Vec::new(),
            residual: predicates,
        }
    }
}

impl fmt::Display for PushdownPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pushed ({}):", self.pushed.len())?;
        for clause in &self.pushed {
            writeln!(f, "  {}", clause)?;
        }
        writeln!(f, "residual ({}):", self.residual.len())?;
        for predicate in &self.residual {
            writeln!(f, "  {}", predicate)?;
        }
        Ok(())
    }
}

/// Split top-level `and` compounds into one predicate per child.
pub fn flatten(predicates: &[BoundPredicate]) -> Vec<BoundPredicate> {
    fn walk(field: &super::types::FieldRef, expr: &Expr, out: &mut Vec<BoundPredicate>) {
        match expr {
            Expr::Compound(LogicOp::And, children) => {
                for child in children {
                    walk(field, child, out);
                }
            }
            other => out.push(BoundPredicate::new(field.clone(), other.clone())),
        }
    }

    let mut out = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        walk(&predicate.field, &predicate.expr, &mut out);
    }
    out
}

/// The clause with the same meaning as `predicate`, if one exists.
pub fn to_clause(predicate: &BoundPredicate) -> Option<StoreClause> {
    let op = match &predicate.expr {
        Expr::Literal(value) => ClauseOp::Equals(value.clone()),
        Expr::Comparison(op, value) => ClauseOp::Compare(*op, value.clone()),
        Expr::Existence(Existence::Exists) => ClauseOp::Present,
        Expr::Existence(Existence::Missing) => ClauseOp::Absent,
        Expr::Collection(CollectionMode::Any, patterns) if !patterns.is_empty() => {
            ClauseOp::AnyOf(patterns.clone())
        }
        _ => return None,
    };
    Some(StoreClause::new(predicate.field.clone(), op))
}

/// Decide which filters of a store-backed query the store applies.
pub fn plan(store: &dyn RecordStore, entity: EntityType, filters: &[BoundPredicate]) -> PushdownPlan {
    let mut result = PushdownPlan::default();
    let mut candidates = 0usize;

    for predicate in flatten(filters) {
        match to_clause(&predicate) {
            Some(clause) => {
                candidates += 1;
                if store.accepts(entity, &clause) {
                    debug!(%entity, clause = %clause, "pushing clause to store");
                    result.pushed.push(clause);
                } else {
                    debug!(%entity, clause = %clause, "store declined clause");
                    result.residual.push(predicate);
                }
            }
            None => result.residual.push(predicate),
        }
    }

    if candidates > 0 && result.pushed.is_empty() {
        warn!(%entity, candidates, "store declined every pushdown clause");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::StoreError;
    use crate::core::expr::{CompareOp, Scalar};
    use crate::core::grammar::parse_expr;
    use crate::core::types::FieldRef;
    use crate::store::{MemoryStore, Row};

    fn bound(field: &str, expr: &str) -> BoundPredicate {
        BoundPredicate::new(FieldRef::parse(field).unwrap(), parse_expr(expr).unwrap())
    }

    struct Refusing;

    impl RecordStore for Refusing {
        fn fetch(&self, _: EntityType, _: &[StoreClause]) -> Result<Vec<Row>, StoreError> {
            Ok(Vec::new())
        }

        fn accepts(&self, _: EntityType, _: &StoreClause) -> bool {
            false
        }
    }

    #[test]
    fn test_planner_translates_eligible_forms() {
        assert_eq!(
            to_clause(&bound("stars", ">= 3")).map(|c| c.op),
            Some(ClauseOp::Compare(CompareOp::Ge, Scalar::Int(3)))
        );
        assert_eq!(
            to_clause(&bound("domain", "github.com")).map(|c| c.op),
            Some(ClauseOp::Equals(Scalar::Str("github.com".into())))
        );
        assert_eq!(to_clause(&bound("title", "exists")).map(|c| c.op), Some(ClauseOp::Present));
        assert_eq!(
            to_clause(&bound("tags", "any [ai/*]")).map(|c| c.op),
            Some(ClauseOp::AnyOf(vec!["ai/*".into()]))
        );
        assert!(to_clause(&bound("created_at", "within 3 days")).is_none());
        assert!(to_clause(&bound("title", "contains rust")).is_none());
        assert!(to_clause(&bound("tags", "all [a, b]")).is_none());
        assert!(to_clause(&bound("content", "has [summary]")).is_none());
    }

    #[test]
    fn test_planner_flattens_and_keeps_or() {
        let both = BoundPredicate::new(
            FieldRef::parse("stars").unwrap(),
            Expr::all_of([parse_expr(">= 3").unwrap(), parse_expr("< 5").unwrap()]),
        );
        assert_eq!(flatten(&[both]).len(), 2);

        let either = BoundPredicate::new(
            FieldRef::parse("stars").unwrap(),
            Expr::any_of([parse_expr("1").unwrap(), parse_expr("2").unwrap()]),
        );
        let plan = plan(&MemoryStore::new(), EntityType::Bookmark, &[either]);
        assert!(plan.pushed.is_empty());
        assert_eq!(plan.residual.len(), 1);
    }

    #[test]
    fn test_planner_respects_accepts() {
        let filters = [bound("stars", ">= 3"), bound("title", "contains rust")];
        let pushed = plan(&MemoryStore::new(), EntityType::Bookmark, &filters);
        assert_eq!(pushed.pushed.len(), 1);
        assert_eq!(pushed.residual.len(), 1);

        let refused = plan(&Refusing, EntityType::Bookmark, &filters);
        assert!(refused.pushed.is_empty());
        assert_eq!(refused.residual.len(), 2);
    }

    #[test]
    fn test_plan_display() {
        let p = plan(&MemoryStore::new(), EntityType::Bookmark, &[bound("stars", ">= 3")]);
        let text = p.to_string();
        assert!(text.contains("pushed (1):"));
        assert!(text.contains("stars: >= 3"));
        assert!(text.contains("residual (0):"));
    }
}
