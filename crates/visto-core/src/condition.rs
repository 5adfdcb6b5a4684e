// Condition evaluation against the frozen entity snapshot.
//
// Pure and side-effect free: all fields a condition may touch are pre-resolved
// into the snapshot at instance-start time. Clauses combine with AND; an empty
// clause list is true. A field missing from the snapshot makes its clause false
// (the `no` branch) rather than an error, so a condicion node always resolves.

use serde_json::Value;

use crate::graph::{ConditionClause, ConditionOperator};

/// Evaluate a clause list against an entity snapshot.
pub fn evaluate(clauses: &[ConditionClause], snapshot: &Value) -> bool {
    clauses.iter().all(|clause| {
        let field = match lookup(snapshot, &clause.field) {
            Some(v) => v,
            None => {
                tracing::warn!(field = %clause.field, "condition field missing from snapshot");
                return false;
            }
        };
        apply(clause.operator, field, &clause.value)
    })
}

/// Dotted-path lookup into the snapshot object.
fn lookup<'a>(snapshot: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = snapshot;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn apply(op: ConditionOperator, field: &Value, expected: &Value) -> bool {
    match op {
        ConditionOperator::Eq => field == expected,
        ConditionOperator::Ne => field != expected,
        ConditionOperator::Gt => compare(field, expected).map(|o| o.is_gt()).unwrap_or(false),
        ConditionOperator::Gte => compare(field, expected).map(|o| o.is_ge()).unwrap_or(false),
        ConditionOperator::Lt => compare(field, expected).map(|o| o.is_lt()).unwrap_or(false),
        ConditionOperator::Lte => compare(field, expected).map(|o| o.is_le()).unwrap_or(false),
        ConditionOperator::In => match expected {
            Value::Array(items) => items.contains(field),
            _ => false,
        },
    }
}

/// Ordering for numbers and strings; mixed or unordered types compare as None.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn clause(field: &str, operator: ConditionOperator, value: Value) -> ConditionClause {
        ConditionClause {
            field: field.into(),
            operator,
            value,
        }
    }

    #[test]
    fn equality_and_inequality() {
        let snapshot = json!({"moneda": "MXN"});
        assert!(evaluate(
            &[clause("moneda", ConditionOperator::Eq, json!("MXN"))],
            &snapshot
        ));
        assert!(evaluate(
            &[clause("moneda", ConditionOperator::Ne, json!("USD"))],
            &snapshot
        ));
    }

    #[test]
    fn numeric_comparison() {
        let snapshot = json!({"total": 15000.50});
        assert!(evaluate(
            &[clause("total", ConditionOperator::Gt, json!(10000))],
            &snapshot
        ));
        assert!(!evaluate(
            &[clause("total", ConditionOperator::Lte, json!(10000))],
            &snapshot
        ));
    }

    #[test]
    fn set_membership() {
        let snapshot = json!({"sucursal": "norte"});
        assert!(evaluate(
            &[clause(
                "sucursal",
                ConditionOperator::In,
                json!(["norte", "centro"])
            )],
            &snapshot
        ));
        assert!(!evaluate(
            &[clause("sucursal", ConditionOperator::In, json!(["sur"]))],
            &snapshot
        ));
    }

    #[test]
    fn clauses_combine_with_and() {
        let snapshot = json!({"total": 500, "moneda": "MXN"});
        let clauses = vec![
            clause("total", ConditionOperator::Gte, json!(100)),
            clause("moneda", ConditionOperator::Eq, json!("USD")),
        ];
        assert!(!evaluate(&clauses, &snapshot));
    }

    #[test]
    fn empty_clause_list_is_true() {
        assert!(evaluate(&[], &json!({})));
    }

    #[test]
    fn missing_field_is_false_not_error() {
        let snapshot = json!({"total": 500});
        assert!(!evaluate(
            &[clause("descuento", ConditionOperator::Eq, json!(0))],
            &snapshot
        ));
    }

    #[test]
    fn dotted_path_reaches_nested_fields() {
        let snapshot = json!({"proveedor": {"pais": "MX"}});
        assert!(evaluate(
            &[clause("proveedor.pais", ConditionOperator::Eq, json!("MX"))],
            &snapshot
        ));
    }

    #[test]
    fn mixed_types_never_order() {
        let snapshot = json!({"total": "mucho"});
        assert!(!evaluate(
            &[clause("total", ConditionOperator::Gt, json!(10))],
            &snapshot
        ));
    }
}
