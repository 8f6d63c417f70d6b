use serde::Serialize;

use crate::criteria::Criteria;
use crate::selection::Selection;

#[derive(Serialize)]
struct KeyRepr<'a> {
    criteria: Option<Criteria>,
    selection: &'a Selection,
}

fn encode<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).expect("BUG: criteria and selections always encode to JSON")
}

/// Same criteria with `And`/`Or` items in a stable order.
fn canonical(criteria: &Criteria) -> Criteria {
    match criteria {
        Criteria::Criterion(c) => Criteria::Criterion(c.clone()),
        Criteria::And(items) => Criteria::And(sorted(items)),
        Criteria::Or(items) => Criteria::Or(sorted(items)),
        Criteria::Named(fields) => Criteria::Named(
            fields
                .iter()
                .map(|(name, c)| (name.clone(), canonical(c)))
                .collect(),
        ),
    }
}

fn sorted(items: &[Criteria]) -> Vec<Criteria> {
    let mut keyed: Vec<(String, Criteria)> = items
        .iter()
        .map(canonical)
        .map(|c| (encode(&c), c))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);
    keyed.into_iter().map(|(_, c)| c).collect()
}

/// Stable string identity of a `(criteria, selection)` tuple. Structurally
/// equal tuples encode identically regardless of field or item order.
pub fn cache_key(criteria: Option<&Criteria>, selection: &Selection) -> String {
    encode(&KeyRepr {
        criteria: criteria.map(canonical),
        selection,
    })
}
