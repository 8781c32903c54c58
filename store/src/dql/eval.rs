//! Expression evaluation against documents.

use super::{Args, CompareOp, Expr, OrderTerm, Operand};
use crate::Document;
use serde_json::Value;
use std::cmp::Ordering;

static NULL: Value = Value::Null;

impl Operand {
    /// Resolve the operand. Missing fields and arguments resolve to null.
    pub(crate) fn resolve<'a>(&'a self, doc: Option<&'a Document>, args: &'a Args) -> &'a Value {
        match self {
            Operand::Path(path) => doc.and_then(|d| d.get(path)).unwrap_or(&NULL),
            Operand::Param(name) => args.get(name).unwrap_or(&NULL),
            Operand::Literal(value) => value,
        }
    }
}

impl Expr {
    /// Evaluate the expression for a document.
    pub fn matches(&self, doc: &Document, args: &Args) -> bool {
        match self {
            Expr::Or(items) => items.iter().any(|e| e.matches(doc, args)),
            Expr::And(items) => items.iter().all(|e| e.matches(doc, args)),
            Expr::Not(inner) => !inner.matches(doc, args),
            Expr::Truthy(operand) => operand.resolve(Some(doc), args) == &Value::Bool(true),
            Expr::Compare { left, op, right } => {
                let left = left.resolve(Some(doc), args);
                let right = right.resolve(Some(doc), args);
                compare(left, *op, right)
            }
        }
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        // Ordering comparisons only hold between values of the same kind
        _ if rank(left) != rank(right) || left.is_null() => false,
        CompareOp::Lt => compare_values(left, right) == Ordering::Less,
        CompareOp::Le => compare_values(left, right) != Ordering::Greater,
        CompareOp::Gt => compare_values(left, right) == Ordering::Greater,
        CompareOp::Ge => compare_values(left, right) != Ordering::Less,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    rank(left) == rank(right) && compare_values(left, right) == Ordering::Equal
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values used by `ORDER BY`.
///
/// null < bool < number < string < array < object. Strings compare by bytes,
/// arrays element-wise, objects by their serialized form.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => {
                    let a = a.as_f64().unwrap_or(0.0);
                    let b = b.as_f64().unwrap_or(0.0);
                    a.total_cmp(&b)
                }
            }
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                match compare_values(x, y) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(_), Value::Object(_)) => left.to_string().cmp(&right.to_string()),
        _ => rank(left).cmp(&rank(right)),
    }
}

/// Order documents by the given terms. Ties keep their id order.
pub(crate) fn sort_documents(docs: &mut [&Document], order_by: &[OrderTerm]) {
    docs.sort_by(|a, b| {
        for term in order_by {
            let left = a.get(&term.path).unwrap_or(&NULL);
            let right = b.get(&term.path).unwrap_or(&NULL);
            let ordering = compare_values(left, right);
            let ordering = if term.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id().cmp(b.id())
    });
}

#[cfg(test)]
mod tests {
    use super::super::parse;
    use super::super::Statement;
    use super::*;
    use crate::Revision;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value, Revision::new("n", 1), 0).unwrap()
    }

    fn filter(stmt: &str) -> Expr {
        match parse(stmt).unwrap() {
            Statement::Select(s) => s.filter.unwrap(),
            _ => panic!("expected select"),
        }
    }

    #[test]
    fn not_matches_missing_field() {
        let expr = filter("SELECT * FROM m WHERE NOT deleted");
        let args = Args::new();
        assert!(expr.matches(&doc(json!({"_id": "1"})), &args));
        assert!(expr.matches(&doc(json!({"_id": "1", "deleted": false})), &args));
        assert!(expr.matches(&doc(json!({"_id": "1", "deleted": null})), &args));
        assert!(!expr.matches(&doc(json!({"_id": "1", "deleted": true})), &args));
    }

    #[test]
    fn equality_with_params() {
        let expr = filter("SELECT * FROM m WHERE _id = :id");
        let mut args = Args::new();
        args.insert("id".into(), json!("abc"));
        assert!(expr.matches(&doc(json!({"_id": "abc"})), &args));
        assert!(!expr.matches(&doc(json!({"_id": "abd"})), &args));
    }

    #[test]
    fn numeric_equality_ignores_representation() {
        let expr = filter("SELECT * FROM m WHERE runtime = 120");
        let args = Args::new();
        assert!(expr.matches(&doc(json!({"runtime": 120.0})), &args));
        assert!(!expr.matches(&doc(json!({"runtime": "120"})), &args));
    }

    #[test]
    fn ordering_comparisons_require_same_kind() {
        let expr = filter("SELECT * FROM m WHERE year > 2000");
        let args = Args::new();
        assert!(expr.matches(&doc(json!({"year": 2016})), &args));
        assert!(!expr.matches(&doc(json!({"year": 1999})), &args));
        assert!(!expr.matches(&doc(json!({"year": "2016"})), &args));
        assert!(!expr.matches(&doc(json!({})), &args));
    }

    #[test]
    fn value_ordering() {
        assert_eq!(compare_values(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(compare_values(&json!(1), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!(1.5), &json!(1)), Ordering::Greater);
        assert_eq!(compare_values(&json!("B"), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!([1, 2]), &json!([1])), Ordering::Greater);
    }

    #[test]
    fn sort_by_title_then_id() {
        let a = doc(json!({"_id": "2", "title": "Arrival"}));
        let b = doc(json!({"_id": "1", "title": "Arrival"}));
        let c = doc(json!({"_id": "3", "title": "Alien"}));
        let d = doc(json!({"_id": "4"}));
        let mut docs = vec![&a, &b, &c, &d];
        sort_documents(
            &mut docs,
            &[OrderTerm {
                path: "title".into(),
                ascending: true,
            }],
        );
        let ids: Vec<_> = docs.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["4", "3", "1", "2"]);
    }
}
