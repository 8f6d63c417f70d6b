use std::collections::BTreeSet;
use std::ops::Bound;

use bson::{Bson, Document};

use crate::criteria::{Criteria, CriteriaError};
use crate::criterion::Criterion;
use crate::range::Range;
use crate::value::Value;

/// Parse error for filter documents.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParseError(pub String);

impl std::fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "filter parse error: {}", self.0)
    }
}

impl std::error::Error for FilterParseError {}

/// Parse a BSON filter document into criteria.
///
/// Follows MongoDB query syntax:
/// - Top-level document is an implicit AND of all entries
/// - `{ "field": value }` is implicit `$eq`
/// - `{ "field": { "$gt": v } }` uses operator sub-documents; `$gt`, `$gte`,
///   `$lt` and `$lte` on one field collapse into a single range
/// - `{ "$or": [...] }` / `{ "$and": [...] }` for explicit logical ops
/// - `"owner.id"` constrains the `id` field of the related `owner`
pub fn parse_filter(doc: &Document) -> Result<Criteria, FilterParseError> {
    let mut children = Vec::new();

    for (key, value) in doc {
        match key.as_str() {
            "$and" => children.push(parse_logical_array(value, |items| Criteria::and(items))?),
            "$or" => children.push(parse_logical_array(value, |items| Criteria::or(items))?),
            k if k.starts_with('$') => {
                return Err(FilterParseError(format!("unknown top-level operator: {k}")));
            }
            _ => children.push(parse_field_condition(key, value)?),
        }
    }

    children
        .into_iter()
        .reduce(Criteria::and_also)
        .ok_or_else(|| FilterParseError("empty filter document".into()))
}

fn parse_logical_array(
    value: &Bson,
    make: fn(Vec<Criteria>) -> Result<Criteria, CriteriaError>,
) -> Result<Criteria, FilterParseError> {
    let Bson::Array(arr) = value else {
        return Err(FilterParseError("$and/$or value must be an array".into()));
    };

    let mut children = Vec::with_capacity(arr.len());
    for elem in arr {
        match elem {
            Bson::Document(sub_doc) => children.push(parse_filter(sub_doc)?),
            _ => {
                return Err(FilterParseError(
                    "$and/$or array elements must be documents".into(),
                ));
            }
        }
    }

    if children.is_empty() {
        return Err(FilterParseError("$and/$or array must not be empty".into()));
    }

    make(children).map_err(|e| FilterParseError(e.to_string()))
}

/// Parse a field condition: either implicit $eq or an operator sub-document.
fn parse_field_condition(field: &str, value: &Bson) -> Result<Criteria, FilterParseError> {
    if let Bson::Document(sub_doc) = value
        && sub_doc.keys().next().is_some_and(|k| k.starts_with('$'))
    {
        return parse_operator_doc(field, sub_doc);
    }
    let value = scalar(field, "$eq", value)?;
    Ok(Criteria::field(field, Criterion::Equals(value)))
}

fn scalar(field: &str, op: &str, value: &Bson) -> Result<Value, FilterParseError> {
    match value {
        Bson::Document(_) => Err(FilterParseError(format!(
            "{field}: embedded documents cannot be compared, use dotted paths"
        ))),
        Bson::Array(_) => Err(FilterParseError(format!(
            "{field}: {op} value must be a scalar"
        ))),
        other => Value::from_bson(other).ok_or_else(|| {
            FilterParseError(format!("{field}: unsupported {op} value: {other}"))
        }),
    }
}

fn scalar_set(field: &str, op: &str, value: &Bson) -> Result<BTreeSet<Value>, FilterParseError> {
    let Bson::Array(items) = value else {
        return Err(FilterParseError(format!("{field}: {op} value must be an array")));
    };
    items.iter().map(|v| scalar(field, op, v)).collect()
}

/// Parse an operator sub-document like `{ "$gt": 21, "$lte": 100 }`.
fn parse_operator_doc(field: &str, doc: &Document) -> Result<Criteria, FilterParseError> {
    let mut conditions: Vec<Criterion> = Vec::new();
    let mut from = Bound::Unbounded;
    let mut to = Bound::Unbounded;

    for (op_key, op_value) in doc {
        let op = op_key.as_str();
        match op {
            "$eq" => conditions.push(Criterion::Equals(scalar(field, op, op_value)?)),
            "$ne" => conditions.push(Criterion::NotEquals(scalar(field, op, op_value)?)),
            "$in" => conditions.push(Criterion::InSet(scalar_set(field, op, op_value)?)),
            "$nin" => conditions.push(Criterion::NotInSet(scalar_set(field, op, op_value)?)),
            "$gt" | "$gte" | "$lt" | "$lte" => {
                let value = scalar(field, op, op_value)?;
                if value.kind().is_none() {
                    return Err(FilterParseError(format!("{field}: {op} value must not be null")));
                }
                let (slot, bound) = match op {
                    "$gt" => (&mut from, Bound::Excluded(value)),
                    "$gte" => (&mut from, Bound::Included(value)),
                    "$lt" => (&mut to, Bound::Excluded(value)),
                    _ => (&mut to, Bound::Included(value)),
                };
                if !matches!(slot, Bound::Unbounded) {
                    return Err(FilterParseError(format!("{field}: duplicate bound {op}")));
                }
                *slot = bound;
            }
            k => return Err(FilterParseError(format!("unknown field operator: {k}"))),
        }
    }

    let range = Range::new(from, to);
    if !range.is_full() {
        if let (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b) | Bound::Excluded(b)) =
            (&range.from, &range.to)
            && a.kind() != b.kind()
        {
            return Err(FilterParseError(format!(
                "{field}: range bounds must share a value kind"
            )));
        }
        conditions.push(Criterion::InRange(range));
    }

    let criteria = Criteria::and(conditions.into_iter().map(Criteria::from))
        .map_err(|_| FilterParseError("empty operator document".into()))?;
    Ok(Criteria::field(field, criteria))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn bare_field_implicit_eq() {
        let criteria = parse_filter(&doc! { "status": "active" }).unwrap();
        assert_eq!(criteria, Criteria::field("status", Criterion::equals("active")));
    }

    #[test]
    fn multiple_bare_fields_share_one_named_node() {
        let criteria = parse_filter(&doc! { "status": "active", "age": 30_i32 }).unwrap();
        let expected = Criteria::named(vec![
            ("status", Criterion::equals("active").into()),
            ("age", Criterion::equals(30).into()),
        ])
        .unwrap();
        assert_eq!(criteria, expected);
    }

    #[test]
    fn range_operators_collapse() {
        let criteria = parse_filter(&doc! { "score": { "$gt": 50_i32, "$lte": 100_i32 } }).unwrap();
        assert_eq!(
            criteria,
            Criteria::field(
                "score",
                Criterion::range(
                    Bound::Excluded(Value::Int(50)),
                    Bound::Included(Value::Int(100)),
                )
            )
        );
    }

    #[test]
    fn set_operators() {
        let criteria = parse_filter(&doc! { "tag": { "$in": ["a", "b"] } }).unwrap();
        assert_eq!(criteria, Criteria::field("tag", Criterion::in_set(["a", "b"])));
        let criteria = parse_filter(&doc! { "tag": { "$nin": ["c"], "$ne": "d" } }).unwrap();
        assert_eq!(
            criteria,
            Criteria::field(
                "tag",
                Criteria::and(vec![
                    Criterion::not_in_set(["c"]).into(),
                    Criterion::not_equals("d").into(),
                ])
                .unwrap()
            )
        );
    }

    #[test]
    fn explicit_or() {
        let criteria =
            parse_filter(&doc! { "$or": [{ "status": "active" }, { "status": "pending" }] })
                .unwrap();
        match criteria {
            Criteria::Or(children) => assert_eq!(children.len(), 2),
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn nested_or_containing_and() {
        let criteria = parse_filter(&doc! {
            "$or": [
                { "status": "active" },
                { "$and": [{ "score": { "$gt": 90_i32 } }, { "verified": true }] }
            ]
        })
        .unwrap();
        let Criteria::Or(children) = criteria else {
            panic!("expected Or");
        };
        assert_eq!(children.len(), 2);
        assert!(matches!(&children[1], Criteria::And(items) if items.len() == 2));
    }

    #[test]
    fn dotted_paths_nest() {
        let criteria = parse_filter(&doc! { "owner.id": 7_i32, "owner.kind": "user" }).unwrap();
        assert_eq!(criteria.at_path("owner.id"), Some(&Criterion::equals(7).into()));
        assert_eq!(criteria.at_path("owner.kind"), Some(&Criterion::equals("user").into()));
        assert!(criteria.matches_document(&doc! { "owner": { "id": 7, "kind": "user" } }));
    }

    #[test]
    fn unknown_top_level_operator_errors() {
        let err = parse_filter(&doc! { "$nor": [{ "a": 1_i32 }] }).unwrap_err();
        assert!(err.0.contains("unknown top-level operator"), "{}", err.0);
    }

    #[test]
    fn unknown_field_operator_errors() {
        let err = parse_filter(&doc! { "age": { "$between": 10_i32 } }).unwrap_err();
        assert!(err.0.contains("unknown field operator"), "{}", err.0);
    }

    #[test]
    fn empty_doc_errors() {
        let err = parse_filter(&doc! {}).unwrap_err();
        assert!(err.0.contains("empty"), "{}", err.0);
    }

    #[test]
    fn embedded_doc_value_errors() {
        let err = parse_filter(&doc! { "address": { "city": "Austin" } }).unwrap_err();
        assert!(err.0.contains("dotted paths"), "{}", err.0);
    }

    #[test]
    fn mixed_kind_bounds_error() {
        let err = parse_filter(&doc! { "x": { "$gt": 1_i32, "$lt": "z" } }).unwrap_err();
        assert!(err.0.contains("value kind"), "{}", err.0);
    }

    #[test]
    fn duplicate_bound_errors() {
        let err = parse_filter(&doc! { "x": { "$gt": 1_i32, "$gte": 2_i32 } }).unwrap_err();
        assert!(err.0.contains("duplicate bound"), "{}", err.0);
    }
}
