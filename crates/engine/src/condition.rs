//! Condition evaluator — pure evaluation of a boolean expression tree over
//! the execution context.
//!
//! Leaf predicates compare a context field (dotted-path lookup) against a
//! literal. Missing fields evaluate their predicate to `false` rather than
//! raising; absence is not an error in this domain. AND/OR short-circuit, but
//! evaluation has no observable side effects, so sibling ordering is not
//! semantically significant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator for a leaf predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
}

/// A boolean expression tree over the execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// True when every child is true. Short-circuits on the first false child.
    And { all: Vec<Condition> },
    /// True when any child is true. Short-circuits on the first true child.
    Or { any: Vec<Condition> },
    /// Negates its child.
    Not { not: Box<Condition> },
    /// Leaf comparison against a context field.
    Predicate {
        /// Dotted path into the context, e.g. `lead.status`.
        field: String,
        op: Operator,
        #[serde(default)]
        value: Value,
    },
}

impl Condition {
    /// Evaluate the tree against `context`. Pure; never fails.
    pub fn eval(&self, context: &Value) -> bool {
        match self {
            Self::And { all } => all.iter().all(|c| c.eval(context)),
            Self::Or { any } => any.iter().any(|c| c.eval(context)),
            Self::Not { not } => !not.eval(context),
            Self::Predicate { field, op, value } => {
                eval_predicate(lookup(context, field), *op, value)
            }
        }
    }

    /// Convenience constructor for a leaf predicate.
    pub fn predicate(field: impl Into<String>, op: Operator, value: Value) -> Self {
        Self::Predicate { field: field.into(), op, value }
    }
}

/// Resolve a dotted path (`a.b.c`) inside a JSON object tree.
fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn eval_predicate(field: Option<&Value>, op: Operator, literal: &Value) -> bool {
    if op == Operator::Exists {
        return field.is_some_and(|v| !v.is_null());
    }

    // Missing fields fail every comparison instead of raising.
    let Some(field) = field else { return false };

    match op {
        Operator::Equals => field == literal,
        Operator::NotEquals => field != literal,
        Operator::Contains => match (field, literal) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.contains(needle),
            _ => false,
        },
        Operator::GreaterThan => compare(field, literal).is_some_and(std::cmp::Ordering::is_gt),
        Operator::LessThan => compare(field, literal).is_some_and(std::cmp::Ordering::is_lt),
        Operator::Exists => unreachable!("handled above"),
    }
}

/// Ordering between two JSON scalars; `None` when the values are not
/// comparable (mixed or non-scalar types).
fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.as_str().cmp(r.as_str())),
        _ => None,
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "status": "new",
            "score": 42,
            "lead": { "email": "ada@example.com", "tags": ["vip", "webinar"] },
        })
    }

    #[test]
    fn equals_and_not_equals() {
        let eq = Condition::predicate("status", Operator::Equals, json!("new"));
        let ne = Condition::predicate("status", Operator::NotEquals, json!("old"));
        assert!(eq.eval(&ctx()));
        assert!(ne.eval(&ctx()));
    }

    #[test]
    fn dotted_path_lookup() {
        let cond = Condition::predicate("lead.email", Operator::Contains, json!("@example"));
        assert!(cond.eval(&ctx()));
    }

    #[test]
    fn missing_field_is_false_not_an_error() {
        let cond = Condition::predicate("lead.phone", Operator::Equals, json!("555"));
        assert!(!cond.eval(&ctx()));

        // ... even under negation the predicate itself was false.
        let not = Condition::Not { not: Box::new(cond) };
        assert!(not.eval(&ctx()));
    }

    #[test]
    fn exists_checks_presence() {
        assert!(Condition::predicate("lead.email", Operator::Exists, Value::Null).eval(&ctx()));
        assert!(!Condition::predicate("lead.phone", Operator::Exists, Value::Null).eval(&ctx()));
    }

    #[test]
    fn numeric_comparison() {
        assert!(Condition::predicate("score", Operator::GreaterThan, json!(40)).eval(&ctx()));
        assert!(Condition::predicate("score", Operator::LessThan, json!(100)).eval(&ctx()));
        assert!(!Condition::predicate("score", Operator::GreaterThan, json!(42)).eval(&ctx()));
    }

    #[test]
    fn mixed_type_comparison_is_false() {
        assert!(!Condition::predicate("status", Operator::GreaterThan, json!(1)).eval(&ctx()));
    }

    #[test]
    fn array_contains() {
        let cond = Condition::predicate("lead.tags", Operator::Contains, json!("vip"));
        assert!(cond.eval(&ctx()));
    }

    #[test]
    fn and_or_not_composition() {
        let tree = Condition::And {
            all: vec![
                Condition::predicate("status", Operator::Equals, json!("new")),
                Condition::Or {
                    any: vec![
                        Condition::predicate("score", Operator::GreaterThan, json!(100)),
                        Condition::predicate("lead.tags", Operator::Contains, json!("vip")),
                    ],
                },
            ],
        };
        assert!(tree.eval(&ctx()));
    }

    #[test]
    fn evaluation_is_pure() {
        let context = ctx();
        let before = context.clone();
        let tree = Condition::And {
            all: vec![
                Condition::predicate("status", Operator::Equals, json!("new")),
                Condition::predicate("score", Operator::GreaterThan, json!(1)),
            ],
        };

        let first = tree.eval(&context);
        let second = tree.eval(&context);

        assert_eq!(first, second);
        assert_eq!(context, before);
    }

    #[test]
    fn serde_round_trip_of_tagged_tree() {
        let raw = json!({
            "type": "and",
            "all": [
                { "type": "predicate", "field": "status", "op": "equals", "value": "new" },
                { "type": "not", "not": { "type": "predicate", "field": "spam", "op": "exists" } }
            ]
        });
        let tree: Condition = serde_json::from_value(raw).expect("valid condition JSON");
        assert!(tree.eval(&ctx()));
    }
}
