use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::criterion::Criterion;
use crate::outcome::{Logic, Reduction};
use crate::path::get_path;
use crate::value::ValueKind;

/// A boolean composition of criteria.
///
/// `And` and `Or` never hold zero items and `Named` never holds zero fields;
/// "always" and "never" are expressed through [`Logic`] instead of nodes.
/// `Named` keys are single path segments; dotted paths passed to
/// [`Criteria::field`] and [`Criteria::named`] become nested `Named` nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criteria {
    Criterion(Criterion),
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    Named(BTreeMap<String, Criteria>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriteriaError {
    /// A `Named` node with no fields would be indistinguishable from "always".
    EmptyNamed,
    EmptyAnd,
    EmptyOr,
}

impl fmt::Display for CriteriaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriteriaError::EmptyNamed => write!(f, "named criteria requires at least one field"),
            CriteriaError::EmptyAnd => write!(f, "and criteria requires at least one item"),
            CriteriaError::EmptyOr => write!(f, "or criteria requires at least one item"),
        }
    }
}

impl std::error::Error for CriteriaError {}

/// A path compared against values of two different kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindConflict {
    pub path: String,
    pub expected: ValueKind,
    pub found: ValueKind,
}

impl fmt::Display for KindConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is compared against both {} and {} values",
            self.path, self.expected, self.found
        )
    }
}

impl std::error::Error for KindConflict {}

impl From<Criterion> for Criteria {
    fn from(c: Criterion) -> Self {
        Criteria::Criterion(c)
    }
}

/// Conjunction of `items`: `True` when empty, the item itself when single.
pub(crate) fn all_of(items: Vec<Criteria>) -> Logic {
    let mut flat: Vec<Criteria> = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Criteria::And(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    dedup(&mut flat);
    match flat.len() {
        0 => Logic::True,
        1 => Logic::Node(flat.remove(0)),
        _ => Logic::Node(Criteria::And(flat)),
    }
}

/// Disjunction of `items`: `False` when empty, the item itself when single.
pub(crate) fn any_of(items: Vec<Criteria>) -> Logic {
    let mut flat: Vec<Criteria> = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Criteria::Or(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    dedup(&mut flat);
    match flat.len() {
        0 => Logic::False,
        1 => Logic::Node(flat.remove(0)),
        _ => Logic::Node(Criteria::Or(flat)),
    }
}

fn dedup(items: &mut Vec<Criteria>) {
    let mut seen: Vec<Criteria> = Vec::with_capacity(items.len());
    items.retain(|item| {
        if seen.contains(item) {
            false
        } else {
            seen.push(item.clone());
            true
        }
    });
}

/// Combine two constraints on the same path, merging `Named` field bags.
fn conjoin(a: Criteria, b: Criteria) -> Criteria {
    match (a, b) {
        (Criteria::Named(mut fields), Criteria::Named(more)) => {
            for (name, criteria) in more {
                let combined = match fields.remove(&name) {
                    Some(existing) => conjoin(existing, criteria),
                    None => criteria,
                };
                fields.insert(name, combined);
            }
            Criteria::Named(fields)
        }
        (a, b) => match all_of(vec![a, b]) {
            Logic::Node(c) => c,
            // all_of over two nodes always yields a node
            _ => unreachable!("conjunction of two nodes"),
        },
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn matches_fields(fields: &BTreeMap<String, Criteria>, doc: &Document) -> bool {
    fields
        .iter()
        .all(|(name, criteria)| criteria.matches(get_path(doc, name).unwrap_or(&Bson::Null)))
}

impl Criteria {
    /// Constrain a single (possibly dotted) field path.
    pub fn field(path: &str, criteria: impl Into<Criteria>) -> Criteria {
        let criteria = criteria.into();
        match path.split_once('.') {
            None => Criteria::Named(BTreeMap::from([(path.to_string(), criteria)])),
            Some((head, rest)) => Criteria::Named(BTreeMap::from([(
                head.to_string(),
                Criteria::field(rest, criteria),
            )])),
        }
    }

    /// Build a `Named` node from `(path, criteria)` pairs. Pairs sharing a
    /// path prefix are folded into the same nested node.
    pub fn named<K: AsRef<str>>(
        fields: impl IntoIterator<Item = (K, Criteria)>,
    ) -> Result<Criteria, CriteriaError> {
        fields
            .into_iter()
            .map(|(path, criteria)| Criteria::field(path.as_ref(), criteria))
            .reduce(conjoin)
            .ok_or(CriteriaError::EmptyNamed)
    }

    pub fn and(items: impl IntoIterator<Item = Criteria>) -> Result<Criteria, CriteriaError> {
        all_of(items.into_iter().collect())
            .node()
            .ok_or(CriteriaError::EmptyAnd)
    }

    pub fn or(items: impl IntoIterator<Item = Criteria>) -> Result<Criteria, CriteriaError> {
        any_of(items.into_iter().collect())
            .node()
            .ok_or(CriteriaError::EmptyOr)
    }

    /// Combine with another criteria as a conjunction, merging field bags.
    pub fn and_also(self, other: Criteria) -> Criteria {
        conjoin(self, other)
    }

    pub fn as_criterion(&self) -> Option<&Criterion> {
        match self {
            Criteria::Criterion(c) => Some(c),
            _ => None,
        }
    }

    /// Follow a dotted path through nested `Named` nodes.
    pub fn at_path(&self, path: &str) -> Option<&Criteria> {
        let Criteria::Named(fields) = self else {
            return None;
        };
        match path.split_once('.') {
            None => fields.get(path),
            Some((head, rest)) => fields.get(head)?.at_path(rest),
        }
    }

    /// Branches of a top-level `Or`, or the node itself.
    pub fn branches(&self) -> Vec<Criteria> {
        match self {
            Criteria::Or(items) => items.clone(),
            other => vec![other.clone()],
        }
    }

    /// Dotted paths of every field this criteria constrains, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        self.collect_paths("", &mut out);
        out.into_iter().collect()
    }

    fn collect_paths(&self, prefix: &str, out: &mut BTreeSet<String>) {
        match self {
            Criteria::Criterion(_) => {
                if !prefix.is_empty() {
                    out.insert(prefix.to_string());
                }
            }
            Criteria::And(items) | Criteria::Or(items) => {
                items.iter().for_each(|c| c.collect_paths(prefix, out));
            }
            Criteria::Named(fields) => {
                for (name, criteria) in fields {
                    criteria.collect_paths(&join_path(prefix, name), out);
                }
            }
        }
    }

    /// The value kind each constrained path is compared against. Null
    /// operands carry no kind.
    pub fn kinds(&self) -> Result<BTreeMap<String, ValueKind>, KindConflict> {
        let mut out = BTreeMap::new();
        self.collect_kinds("", &mut out)?;
        Ok(out)
    }

    fn collect_kinds(
        &self,
        prefix: &str,
        out: &mut BTreeMap<String, ValueKind>,
    ) -> Result<(), KindConflict> {
        match self {
            Criteria::Criterion(c) => {
                for found in c.operand_kinds() {
                    match out.get(prefix) {
                        Some(&expected) if expected != found => {
                            return Err(KindConflict {
                                path: prefix.to_string(),
                                expected,
                                found,
                            });
                        }
                        Some(_) => {}
                        None => {
                            out.insert(prefix.to_string(), found);
                        }
                    }
                }
                Ok(())
            }
            Criteria::And(items) | Criteria::Or(items) => items
                .iter()
                .try_for_each(|c| c.collect_kinds(prefix, out)),
            Criteria::Named(fields) => fields
                .iter()
                .try_for_each(|(name, c)| c.collect_kinds(&join_path(prefix, name), out)),
        }
    }

    fn has_named(&self) -> bool {
        match self {
            Criteria::Criterion(_) => false,
            Criteria::Named(_) => true,
            Criteria::And(items) | Criteria::Or(items) => items.iter().any(Criteria::has_named),
        }
    }

    /// Evaluate against a value. Missing fields and empty arrays evaluate as
    /// `Null`; other arrays match when any element matches.
    pub fn matches(&self, value: &Bson) -> bool {
        if let Bson::Array(items) = value
            && items.is_empty()
        {
            return self.matches(&Bson::Null);
        }
        match self {
            Criteria::Criterion(c) => match value {
                Bson::Array(items) => items.iter().any(|v| c.matches_bson(v)),
                v => c.matches_bson(v),
            },
            Criteria::And(items) => items.iter().all(|c| c.matches(value)),
            Criteria::Or(items) => items.iter().any(|c| c.matches(value)),
            Criteria::Named(fields) => match value {
                Bson::Document(doc) => matches_fields(fields, doc),
                Bson::Array(items) => items
                    .iter()
                    .any(|v| matches!(v, Bson::Document(d) if matches_fields(fields, d))),
                _ => matches_fields(fields, &Document::new()),
            },
        }
    }

    pub fn matches_document(&self, doc: &Document) -> bool {
        match self {
            Criteria::Named(fields) => matches_fields(fields, doc),
            Criteria::And(items) => items.iter().all(|c| c.matches_document(doc)),
            Criteria::Or(items) => items.iter().any(|c| c.matches_document(doc)),
            Criteria::Criterion(c) => {
                matches!(c, Criterion::NotEquals(_) | Criterion::NotInSet(_))
            }
        }
    }

    /// What of `other` is not already matched by `self`.
    ///
    /// `Covered` means a holder of everything `self` matches needs nothing
    /// more to answer `other`; `Disjoint` means no overlap could be proven
    /// and `other` must be loaded unchanged.
    pub fn reduce(&self, other: &Criteria) -> Reduction<Criteria> {
        self.reduce_given(other, &BTreeSet::new())
    }

    /// [`Criteria::reduce`] where every top-level field in `required` holds a
    /// non-null scalar of one kind on every entity, so ranges held on those
    /// fields can be inverted.
    pub fn reduce_given(&self, other: &Criteria, required: &BTreeSet<String>) -> Reduction<Criteria> {
        match self {
            Criteria::And(items) => return reduce_by_and(items, other, required),
            Criteria::Or(items) => return reduce_by_or(items, other, required),
            _ => {}
        }
        match other {
            Criteria::Or(branches) => return reduce_branches(self, branches, required),
            Criteria::And(items) => return reduce_conjunction(self, items, required),
            _ => {}
        }
        match (self, other) {
            (Criteria::Criterion(a), Criteria::Criterion(b)) => a.reduce(b),
            (Criteria::Named(a), Criteria::Named(b)) => reduce_named(a, b, required),
            _ => Reduction::Disjoint,
        }
    }

    /// Union with `other` as a single node, used to recombine the pieces
    /// `reduce` produced. `Logic::False` when no single node expresses it.
    pub fn merge(&self, other: &Criteria) -> Logic {
        if self == other {
            return Logic::Node(self.clone());
        }
        match (self, other) {
            (Criteria::Criterion(a), Criteria::Criterion(b)) => a.merge(b),
            (Criteria::Or(items), o) | (o, Criteria::Or(items)) => merge_into_or(items, o),
            (Criteria::Named(a), Criteria::Named(b)) => merge_named(a, b),
            _ => Logic::False,
        }
    }

    /// Intersection with `other`; `Logic::False` when provably empty.
    pub fn intersect(&self, other: &Criteria) -> Logic {
        if self == other {
            return Logic::Node(self.clone());
        }
        match (self, other) {
            (Criteria::Criterion(a), Criteria::Criterion(b)) => a.intersect(b),
            (Criteria::Or(items), o) | (o, Criteria::Or(items)) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    match item.intersect(o) {
                        Logic::True => return Logic::True,
                        Logic::False => {}
                        Logic::Node(n) => parts.push(n),
                    }
                }
                any_of(parts)
            }
            (Criteria::And(items), o) | (o, Criteria::And(items)) => {
                if items.iter().any(|item| item.intersect(o).is_false()) {
                    return Logic::False;
                }
                let mut all = items.clone();
                all.push(o.clone());
                all_of(all)
            }
            (Criteria::Named(a), Criteria::Named(b)) => {
                let mut fields = a.clone();
                for (name, theirs) in b {
                    let combined = match fields.get(name) {
                        None => Logic::Node(theirs.clone()),
                        Some(ours) => ours.intersect(theirs),
                    };
                    match combined {
                        Logic::False => return Logic::False,
                        Logic::True => {
                            fields.remove(name);
                        }
                        Logic::Node(n) => {
                            fields.insert(name.clone(), n);
                        }
                    }
                }
                if fields.is_empty() {
                    Logic::True
                } else {
                    Logic::Node(Criteria::Named(fields))
                }
            }
            _ => all_of(vec![self.clone(), other.clone()]),
        }
    }

    /// Logical complement, or `None` when it cannot be expressed.
    ///
    /// Complements of constraints on related entities are not expressible:
    /// "no related entity matches" has no positive form. Neither are
    /// complements of ranges, unless the field is known to be present.
    pub fn invert(&self) -> Option<Logic> {
        self.invert_given(&BTreeSet::new())
    }

    /// [`Criteria::invert`] where every top-level field in `required` holds a
    /// non-null scalar of one kind on every entity.
    pub fn invert_given(&self, required: &BTreeSet<String>) -> Option<Logic> {
        self.complement(required, false)
    }

    fn complement(&self, required: &BTreeSet<String>, present: bool) -> Option<Logic> {
        match self {
            Criteria::Criterion(c) if present => Some(c.invert_present()),
            Criteria::Criterion(c) => c.invert(),
            Criteria::And(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    match item.complement(required, present)? {
                        Logic::True => return Some(Logic::True),
                        Logic::False => {}
                        Logic::Node(n) => parts.push(n),
                    }
                }
                Some(any_of(parts))
            }
            Criteria::Or(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    match item.complement(required, present)? {
                        Logic::False => return Some(Logic::False),
                        Logic::True => {}
                        Logic::Node(n) => parts.push(n),
                    }
                }
                Some(all_of(parts))
            }
            Criteria::Named(fields) => {
                let mut parts = Vec::with_capacity(fields.len());
                for (name, criteria) in fields {
                    if criteria.has_named() {
                        return None;
                    }
                    match criteria.complement(required, required.contains(name))? {
                        Logic::True => return Some(Logic::True),
                        Logic::False => {}
                        Logic::Node(n) => parts.push(Criteria::Named(BTreeMap::from([(
                            name.clone(),
                            n,
                        )]))),
                    }
                }
                Some(any_of(parts))
            }
        }
    }
}

/// `other` minus a conjunction: one piece per item that does not cover
/// `other`, each piece restricted to the earlier items so pieces never
/// overlap.
fn reduce_by_and(
    items: &[Criteria],
    other: &Criteria,
    required: &BTreeSet<String>,
) -> Reduction<Criteria> {
    let mut partial: Vec<(&Criteria, Criteria)> = Vec::new();
    for item in items {
        match item.reduce_given(other, required) {
            Reduction::Covered => {}
            Reduction::Disjoint => return Reduction::Disjoint,
            Reduction::Remainder(rest) => partial.push((item, rest)),
        }
    }
    if partial.is_empty() {
        return Reduction::Covered;
    }

    let mut pieces = Vec::with_capacity(partial.len());
    for (k, (_, rest)) in partial.iter().enumerate() {
        let mut piece = Logic::Node(rest.clone());
        for (earlier, _) in &partial[..k] {
            piece = piece.intersect(earlier);
        }
        if let Logic::Node(p) = piece {
            pieces.push(p);
        }
    }
    match any_of(pieces) {
        Logic::Node(rest) => Reduction::Remainder(rest),
        _ => Reduction::Covered,
    }
}

/// Narrow `other` through each alternative in turn.
fn reduce_by_or(
    items: &[Criteria],
    other: &Criteria,
    required: &BTreeSet<String>,
) -> Reduction<Criteria> {
    let mut current = other.clone();
    let mut narrowed = false;
    for item in items {
        match item.reduce_given(&current, required) {
            Reduction::Covered => return Reduction::Covered,
            Reduction::Disjoint => {}
            Reduction::Remainder(rest) => {
                current = rest;
                narrowed = true;
            }
        }
    }
    if narrowed {
        Reduction::Remainder(current)
    } else {
        Reduction::Disjoint
    }
}

/// Reduce every branch of a disjunction independently.
fn reduce_branches(
    held: &Criteria,
    branches: &[Criteria],
    required: &BTreeSet<String>,
) -> Reduction<Criteria> {
    let mut out = Vec::with_capacity(branches.len());
    let mut changed = false;
    for branch in branches {
        match held.reduce_given(branch, required) {
            Reduction::Covered => changed = true,
            Reduction::Disjoint => out.push(branch.clone()),
            Reduction::Remainder(rest) => {
                changed = true;
                out.push(rest);
            }
        }
    }
    if !changed {
        return Reduction::Disjoint;
    }
    match any_of(out) {
        Logic::Node(rest) => Reduction::Remainder(rest),
        _ => Reduction::Covered,
    }
}

/// `(b1 ∧ … ∧ bn) \ held`: covered when any item is, otherwise the first
/// item that reduces carries the difference and the rest stay as they are.
fn reduce_conjunction(
    held: &Criteria,
    items: &[Criteria],
    required: &BTreeSet<String>,
) -> Reduction<Criteria> {
    let mut first: Option<(usize, Criteria)> = None;
    for (i, item) in items.iter().enumerate() {
        match held.reduce_given(item, required) {
            Reduction::Covered => return Reduction::Covered,
            Reduction::Disjoint => {}
            Reduction::Remainder(rest) => {
                if first.is_none() {
                    first = Some((i, rest));
                }
            }
        }
    }
    let Some((index, rest)) = first else {
        return Reduction::Disjoint;
    };
    let mut all: Vec<Criteria> = items
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, c)| c.clone())
        .collect();
    all.push(rest);
    match all_of(all) {
        Logic::Node(rest) => Reduction::Remainder(rest),
        _ => Reduction::Covered,
    }
}

/// Field-wise reduction. A field `held` constrains but `other` leaves open
/// is reduced against "any value", which needs the complement of the held
/// constraint; if that complement is not expressible nothing is provable.
fn reduce_named(
    held: &BTreeMap<String, Criteria>,
    other: &BTreeMap<String, Criteria>,
    required: &BTreeSet<String>,
) -> Reduction<Criteria> {
    let mut partial: Vec<(&String, Criteria)> = Vec::new();
    for (name, ours) in held {
        let reduced = match other.get(name) {
            Some(theirs) => ours.reduce(theirs),
            None if ours.has_named() => Reduction::Disjoint,
            None => match ours.complement(required, required.contains(name)) {
                Some(Logic::Node(rest)) => Reduction::Remainder(rest),
                Some(Logic::False) => Reduction::Covered,
                Some(Logic::True) | None => Reduction::Disjoint,
            },
        };
        match reduced {
            Reduction::Covered => {}
            Reduction::Disjoint => return Reduction::Disjoint,
            Reduction::Remainder(rest) => partial.push((name, rest)),
        }
    }
    if partial.is_empty() {
        return Reduction::Covered;
    }

    let mut pieces = Vec::with_capacity(partial.len());
    'pieces: for (k, (name, rest)) in partial.iter().enumerate() {
        let mut fields = other.clone();
        fields.insert((*name).clone(), rest.clone());
        for (earlier, _) in &partial[..k] {
            let ours = &held[*earlier];
            let restricted = match other.get(*earlier) {
                Some(theirs) => theirs.intersect(ours),
                None => Logic::Node(ours.clone()),
            };
            match restricted {
                Logic::False => continue 'pieces,
                Logic::True => {
                    fields.remove(*earlier);
                }
                Logic::Node(n) => {
                    fields.insert((*earlier).clone(), n);
                }
            }
        }
        pieces.push(Criteria::Named(fields));
    }
    match any_of(pieces) {
        Logic::Node(rest) => Reduction::Remainder(rest),
        _ => Reduction::Covered,
    }
}

fn merge_into_or(items: &[Criteria], other: &Criteria) -> Logic {
    let mut merged: Vec<Criteria> = items.to_vec();
    for incoming in other.branches() {
        let mut absorbed = false;
        for slot in merged.iter_mut() {
            match slot.merge(&incoming) {
                Logic::True => return Logic::True,
                Logic::Node(m) => {
                    *slot = m;
                    absorbed = true;
                    break;
                }
                Logic::False => {}
            }
        }
        if !absorbed {
            merged.push(incoming);
        }
    }
    any_of(merged)
}

fn merge_named(a: &BTreeMap<String, Criteria>, b: &BTreeMap<String, Criteria>) -> Logic {
    let shared_equal = |x: &BTreeMap<String, Criteria>, y: &BTreeMap<String, Criteria>| {
        x.iter().all(|(k, v)| y.get(k) == Some(v))
    };
    if a.keys().eq(b.keys()) {
        let differing: Vec<&String> = a.keys().filter(|k| a[*k] != b[*k]).collect();
        return match differing.as_slice() {
            [] => Logic::Node(Criteria::Named(a.clone())),
            [name] => match a[*name].merge(&b[*name]) {
                Logic::False => Logic::False,
                Logic::True => {
                    let mut fields = a.clone();
                    fields.remove(*name);
                    if fields.is_empty() {
                        Logic::True
                    } else {
                        Logic::Node(Criteria::Named(fields))
                    }
                }
                Logic::Node(m) => {
                    let mut fields = a.clone();
                    fields.insert((*name).clone(), m);
                    Logic::Node(Criteria::Named(fields))
                }
            },
            _ => Logic::False,
        };
    }
    // The side constraining fewer fields (and agreeing on the rest) is the union.
    if shared_equal(a, b) {
        Logic::Node(Criteria::Named(a.clone()))
    } else if shared_equal(b, a) {
        Logic::Node(Criteria::Named(b.clone()))
    } else {
        Logic::False
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Bound;

    use bson::doc;

    use super::*;
    use crate::value::Value;

    fn eq(v: i64) -> Criteria {
        Criterion::equals(v).into()
    }

    fn range(from: i64, to: i64) -> Criteria {
        Criterion::in_range(from, to).into()
    }

    fn named(fields: Vec<(&str, Criteria)>) -> Criteria {
        Criteria::named(fields).unwrap()
    }

    #[test]
    fn empty_named_is_an_error() {
        let fields: Vec<(&str, Criteria)> = vec![];
        assert_eq!(Criteria::named(fields), Err(CriteriaError::EmptyNamed));
        assert_eq!(Criteria::and(vec![]), Err(CriteriaError::EmptyAnd));
    }

    #[test]
    fn dotted_paths_nest() {
        let c = named(vec![("owner.id", eq(1)), ("owner.kind", eq(2)), ("price", eq(3))]);
        assert_eq!(c.at_path("owner.id"), Some(&eq(1)));
        assert_eq!(c.at_path("owner.kind"), Some(&eq(2)));
        match &c {
            Criteria::Named(fields) => assert_eq!(fields.len(), 2),
            other => panic!("expected Named, got {other:?}"),
        }
    }

    #[test]
    fn paths_are_dotted_and_sorted() {
        let c = Criteria::or(vec![
            named(vec![("price", range(1, 5)), ("owner.id", eq(7))]),
            named(vec![("price", eq(9)), ("status", eq(1))]),
        ])
        .unwrap();
        assert_eq!(c.paths(), vec!["owner.id", "price", "status"]);
    }

    #[test]
    fn matches_documents() {
        let c = named(vec![("price", range(10, 20)), ("owner.id", eq(7))]);
        assert!(c.matches_document(&doc! { "price": 15, "owner": { "id": 7 } }));
        assert!(!c.matches_document(&doc! { "price": 25, "owner": { "id": 7 } }));
        assert!(!c.matches_document(&doc! { "price": 15 }));
        assert!(c.matches_document(&doc! { "price": 12, "owner": [{ "id": 1 }, { "id": 7 }] }));
    }

    #[test]
    fn named_reduces_itself() {
        let c = named(vec![("a", eq(1)), ("b", range(1, 5))]);
        assert_eq!(c.reduce(&c), Reduction::Covered);
    }

    #[test]
    fn named_field_order_is_irrelevant() {
        let ab = named(vec![("foo", eq(1)), ("bar", range(0, 10))]);
        let ba = named(vec![("bar", range(0, 10)), ("foo", eq(1))]);
        let other = named(vec![("foo", eq(1)), ("bar", range(5, 20))]);
        assert_eq!(ab.reduce(&other), ba.reduce(&other));
    }

    #[test]
    fn named_reduces_single_field() {
        let held = named(vec![("price", range(100, 200))]);
        let wanted = named(vec![("price", range(100, 300))]);
        let expected = Criteria::field(
            "price",
            Criterion::range(
                Bound::Excluded(Value::Int(200)),
                Bound::Included(Value::Int(300)),
            ),
        );
        assert_eq!(held.reduce(&wanted), Reduction::Remainder(expected));
    }

    #[test]
    fn named_missing_field_uses_complement() {
        let held = named(vec![("a", eq(1)), ("b", eq(2))]);
        let wanted = named(vec![("a", eq(1))]);
        let expected = named(vec![("a", eq(1)), ("b", Criterion::not_equals(2).into())]);
        assert_eq!(held.reduce(&wanted), Reduction::Remainder(expected));
    }

    #[test]
    fn named_missing_relation_field_is_not_provable() {
        let held = named(vec![("a", eq(1)), ("owner.id", eq(2))]);
        let wanted = named(vec![("a", eq(1))]);
        assert_eq!(held.reduce(&wanted), Reduction::Disjoint);
    }

    #[test]
    fn named_pieces_do_not_overlap() {
        let held = named(vec![("a", range(0, 10)), ("b", range(0, 10))]);
        let wanted = named(vec![("a", range(5, 15)), ("b", range(5, 15))]);
        let Reduction::Remainder(rest) = held.reduce(&wanted) else {
            panic!("expected remainder");
        };
        let Criteria::Or(pieces) = &rest else {
            panic!("expected two pieces, got {rest:?}");
        };
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0].intersect(&pieces[1]).is_false());
        assert!(pieces.iter().all(|p| p.intersect(&held).is_false()));
    }

    #[test]
    fn or_narrows_through_each_branch() {
        let held = Criteria::or(vec![range(0, 10), range(20, 30)]).unwrap();
        let wanted = range(5, 25);
        let expected = Criterion::range(
            Bound::Excluded(Value::Int(10)),
            Bound::Excluded(Value::Int(20)),
        );
        assert_eq!(held.reduce(&wanted), Reduction::Remainder(expected.into()));
        assert_eq!(held.reduce(&range(1, 2)), Reduction::Covered);
        assert_eq!(held.reduce(&range(40, 50)), Reduction::Disjoint);
    }

    #[test]
    fn or_reduces_itself() {
        let c = Criteria::or(vec![
            named(vec![("a", eq(1))]),
            named(vec![("b", range(1, 3))]),
        ])
        .unwrap();
        assert_eq!(c.reduce(&c), Reduction::Covered);
    }

    #[test]
    fn and_reduces_itself() {
        let c = Criteria::and(vec![
            named(vec![("a", range(0, 10))]),
            named(vec![("b", eq(4))]),
        ])
        .unwrap();
        assert_eq!(c.reduce(&c), Reduction::Covered);
    }

    #[test]
    fn and_accumulates_uncovered_items() {
        let held = Criteria::and(vec![
            named(vec![("a", range(0, 10))]),
            named(vec![("b", eq(4))]),
        ])
        .unwrap();
        let wanted = named(vec![("a", range(0, 5)), ("b", eq(4))]);
        assert_eq!(held.reduce(&wanted), Reduction::Covered);

        let wider = named(vec![("a", range(0, 20)), ("b", eq(4))]);
        let Reduction::Remainder(rest) = held.reduce(&wider) else {
            panic!("expected remainder");
        };
        assert!(rest.matches_document(&doc! { "a": 15, "b": 4 }));
        assert!(!rest.matches_document(&doc! { "a": 5, "b": 4 }));
    }

    #[test]
    fn reduce_distributes_over_wanted_or() {
        let held = range(0, 10);
        let wanted = Criteria::or(vec![range(2, 3), range(8, 12)]).unwrap();
        let expected = Criterion::range(
            Bound::Excluded(Value::Int(10)),
            Bound::Included(Value::Int(12)),
        );
        assert_eq!(held.reduce(&wanted), Reduction::Remainder(expected.into()));
    }

    #[test]
    fn merge_named_recombines_one_field() {
        let a = named(vec![("x", eq(1)), ("y", range(0, 5))]);
        let b = named(vec![("x", eq(1)), ("y", range(5, 9))]);
        assert_eq!(
            a.merge(&b),
            Logic::Node(named(vec![("x", eq(1)), ("y", range(0, 9))]))
        );
        let c = named(vec![("x", eq(2)), ("y", range(5, 9))]);
        assert_eq!(a.merge(&c), Logic::False);
    }

    #[test]
    fn merge_into_or_absorbs_mergeable_items() {
        let or = Criteria::or(vec![range(0, 5), range(10, 15)]).unwrap();
        assert_eq!(
            or.merge(&range(5, 10)),
            Logic::Node(Criteria::or(vec![range(0, 10), range(10, 15)]).unwrap())
        );
    }

    #[test]
    fn named_intersection_unions_fields() {
        let a = named(vec![("x", range(0, 10))]);
        let b = named(vec![("x", range(5, 20)), ("y", eq(1))]);
        assert_eq!(
            a.intersect(&b),
            Logic::Node(named(vec![("x", range(5, 10)), ("y", eq(1))]))
        );
        assert!(a.intersect(&named(vec![("x", eq(50))])).is_false());
    }

    #[test]
    fn invert_named_is_disjunction_of_field_complements() {
        let c = named(vec![("a", eq(1)), ("b", eq(2))]);
        let expected = Criteria::or(vec![
            named(vec![("a", Criterion::not_equals(1).into())]),
            named(vec![("b", Criterion::not_equals(2).into())]),
        ])
        .unwrap();
        assert_eq!(c.invert(), Some(Logic::Node(expected)));
        assert_eq!(named(vec![("owner.id", eq(1))]).invert(), None);
    }

    #[test]
    fn missing_range_field_needs_a_required_field() {
        let at_most_ten = Criterion::range(Bound::Unbounded, Bound::Included(Value::Int(10)));
        let held = named(vec![
            ("price", at_most_ten.into()),
            ("status", Criterion::equals("a").into()),
        ]);
        let wanted = named(vec![("status", Criterion::equals("a").into())]);
        assert_eq!(held.reduce(&wanted), Reduction::Disjoint);
        assert_eq!(held.invert(), None);

        let required = BTreeSet::from(["price".to_string()]);
        let above_ten = Criterion::range(Bound::Excluded(Value::Int(10)), Bound::Unbounded);
        let expected = named(vec![
            ("price", above_ten.into()),
            ("status", Criterion::equals("a").into()),
        ]);
        assert_eq!(
            held.reduce_given(&wanted, &required),
            Reduction::Remainder(expected)
        );
    }

    #[test]
    fn complements_cover_missing_fields() {
        let held = named(vec![("a", eq(1)), ("b", eq(2))]);
        let wanted = named(vec![("a", eq(1))]);
        let Reduction::Remainder(rest) = held.reduce(&wanted) else {
            panic!("expected remainder");
        };
        for d in [doc! { "a": 1 }, doc! { "a": 1, "b": null }, doc! { "a": 1, "b": [] }] {
            assert!(wanted.matches_document(&d));
            assert!(!held.matches_document(&d), "{d}");
            assert!(rest.matches_document(&d), "{d}");
        }
    }

    #[test]
    fn kinds_follow_dotted_paths() {
        let c = named(vec![
            ("price", range(1, 5)),
            ("owner.name", Criterion::in_set(["Ann", "Bob"]).into()),
            ("note", Criterion::equals(Value::Null).into()),
        ]);
        let kinds = c.kinds().unwrap();
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds["price"], ValueKind::Number);
        assert_eq!(kinds["owner.name"], ValueKind::String);

        let mixed = Criteria::or(vec![
            named(vec![("price", eq(1))]),
            named(vec![("price", Criterion::equals("cheap").into())]),
        ])
        .unwrap();
        assert_eq!(
            mixed.kinds(),
            Err(KindConflict {
                path: "price".into(),
                expected: ValueKind::Number,
                found: ValueKind::String,
            })
        );
    }
}
