use std::collections::{BTreeMap, BTreeSet};

use bson::Document;
use serde::{Deserialize, Serialize};

use crate::criteria::Criteria;
use crate::key::cache_key;
use crate::outcome::{Logic, Reduction};
use crate::selection::{Selection, reduce_selection};

/// A request for the entities of one schema matching `criteria`, hydrated
/// to `selection`. `criteria: None` asks for every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub schema: String,
    pub criteria: Option<Criteria>,
    pub selection: Selection,
}

impl Query {
    pub fn new(schema: impl Into<String>, criteria: Option<Criteria>, selection: Selection) -> Self {
        Self {
            schema: schema.into(),
            criteria,
            selection,
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.criteria
            .as_ref()
            .is_none_or(|criteria| criteria.matches_document(doc))
    }

    /// Stable, field-order independent identity of `(criteria, selection)`.
    pub fn cache_key(&self) -> String {
        cache_key(self.criteria.as_ref(), &self.selection)
    }

    /// One query per disjunct, so each can be loaded on its own. An `Or`
    /// under a field is lifted out: `{price: [1,3) or (4,7]}` becomes
    /// `{price: [1,3)}` and `{price: (4,7]}`.
    pub fn split(self) -> Vec<Query> {
        let Some(criteria) = self.criteria else {
            return vec![self];
        };
        disjuncts(criteria)
            .into_iter()
            .map(|branch| Query::new(self.schema.clone(), Some(branch), self.selection.clone()))
            .collect()
    }
}

fn disjuncts(criteria: Criteria) -> Vec<Criteria> {
    match criteria {
        Criteria::Or(items) => items.into_iter().flat_map(disjuncts).collect(),
        Criteria::Named(fields) => {
            let mut out = vec![BTreeMap::new()];
            for (name, field) in fields {
                let options = disjuncts(field);
                let mut next = Vec::with_capacity(out.len() * options.len());
                for partial in &out {
                    for option in &options {
                        let mut fields = partial.clone();
                        fields.insert(name.clone(), option.clone());
                        next.push(fields);
                    }
                }
                out = next;
            }
            out.into_iter().map(Criteria::Named).collect()
        }
        other => vec![other],
    }
}

/// `want` minus `have`, where `None` means "every entity".
fn reduce_criteria(
    have: Option<&Criteria>,
    want: Option<&Criteria>,
    required: &BTreeSet<String>,
) -> Reduction<Criteria> {
    match (have, want) {
        (None, _) => Reduction::Covered,
        (Some(have), Some(want)) => have.reduce_given(want, required),
        (Some(have), None) => match have.invert_given(required) {
            Some(Logic::Node(rest)) => Reduction::Remainder(rest),
            Some(Logic::False) => Reduction::Covered,
            Some(Logic::True) | None => Reduction::Disjoint,
        },
    }
}

fn intersect_criteria(a: Option<&Criteria>, b: Option<&Criteria>) -> Option<Option<Criteria>> {
    match (a, b) {
        (None, None) => Some(None),
        (Some(c), None) | (None, Some(c)) => Some(Some(c.clone())),
        (Some(a), Some(b)) => match a.intersect(b) {
            Logic::True => Some(None),
            Logic::False => None,
            Logic::Node(c) => Some(Some(c)),
        },
    }
}

/// Split `want` into the queries still needed once `have` is held.
///
/// Returns `None` when `have` cannot shorten `want` at all (different
/// schema, no provable criteria overlap, or none of the wanted fields held),
/// and `Some(vec![])` when `have` already answers `want`. Otherwise the
/// result holds entities not loaded at all (remaining criteria, full
/// selection) followed by entities loaded but under-selected (overlapping
/// criteria, missing fields only), each split per `Or` branch.
pub fn reduce_query(want: &Query, have: &Query) -> Option<Vec<Query>> {
    reduce_query_given(want, have, &BTreeSet::new())
}

/// [`reduce_query`] where every top-level field in `required` holds a
/// non-null scalar of one kind on every entity of the schema.
pub fn reduce_query_given(
    want: &Query,
    have: &Query,
    required: &BTreeSet<String>,
) -> Option<Vec<Query>> {
    if want.schema != have.schema {
        return None;
    }
    let criteria = reduce_criteria(have.criteria.as_ref(), want.criteria.as_ref(), required);
    if criteria.is_disjoint() {
        return None;
    }
    let selection = reduce_selection(&want.selection, &have.selection);
    if selection.is_disjoint() {
        return None;
    }

    let mut out = Vec::new();
    let overlap = match criteria {
        Reduction::Remainder(rest) => {
            out.extend(
                Query::new(want.schema.clone(), Some(rest), want.selection.clone()).split(),
            );
            intersect_criteria(want.criteria.as_ref(), have.criteria.as_ref())
        }
        _ => Some(want.criteria.clone()),
    };
    // No held entity is wanted, so none of them needs more fields.
    if let (Reduction::Remainder(missing), Some(overlap)) = (selection, overlap) {
        out.extend(Query::new(want.schema.clone(), overlap, missing).split());
    }
    Some(out)
}
