use std::collections::BTreeSet;
use std::ops::Bound;

use bson::Bson;
use serde::{Deserialize, Serialize};

use crate::criteria::{Criteria, any_of};
use crate::outcome::{Logic, Reduction};
use crate::range::Range;
use crate::value::{Value, ValueKind};

/// An atomic predicate over a single value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Equals(Value),
    NotEquals(Value),
    InSet(BTreeSet<Value>),
    NotInSet(BTreeSet<Value>),
    InRange(Range),
}

impl Criterion {
    pub fn equals(value: impl Into<Value>) -> Self {
        Criterion::Equals(value.into())
    }

    pub fn not_equals(value: impl Into<Value>) -> Self {
        Criterion::NotEquals(value.into())
    }

    pub fn in_set<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Criterion::InSet(values.into_iter().map(Into::into).collect())
    }

    pub fn not_in_set<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Criterion::NotInSet(values.into_iter().map(Into::into).collect())
    }

    /// `[from, to]`
    pub fn in_range(from: impl Into<Value>, to: impl Into<Value>) -> Self {
        Criterion::InRange(Range::closed(from, to))
    }

    pub fn range(from: Bound<Value>, to: Bound<Value>) -> Self {
        Criterion::InRange(Range::new(from, to))
    }

    /// The element type this criterion compares against, if any operand
    /// carries one.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Criterion::Equals(v) | Criterion::NotEquals(v) => v.kind(),
            Criterion::InSet(set) | Criterion::NotInSet(set) => set.iter().find_map(Value::kind),
            Criterion::InRange(range) => range.kind(),
        }
    }

    /// Kinds of every operand, nulls skipped.
    pub fn operand_kinds(&self) -> Vec<ValueKind> {
        match self {
            Criterion::Equals(v) | Criterion::NotEquals(v) => v.kind().into_iter().collect(),
            Criterion::InSet(set) | Criterion::NotInSet(set) => {
                set.iter().filter_map(Value::kind).collect()
            }
            Criterion::InRange(range) => range.endpoints().filter_map(Value::kind).collect(),
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Criterion::Equals(v) => value == v,
            Criterion::NotEquals(v) => value != v,
            Criterion::InSet(set) => set.contains(value),
            Criterion::NotInSet(set) => !set.contains(value),
            Criterion::InRange(range) => range.contains(value),
        }
    }

    /// Evaluate against a raw BSON value. Non-scalar values only satisfy the
    /// negative predicates.
    pub fn matches_bson(&self, value: &Bson) -> bool {
        match Value::from_bson(value) {
            Some(v) => self.matches(&v),
            None => matches!(self, Criterion::NotEquals(_) | Criterion::NotInSet(_)),
        }
    }

    /// What of `other` is not matched by `self`.
    ///
    /// # Panics
    ///
    /// If the two criteria compare different value kinds.
    pub fn reduce(&self, other: &Criterion) -> Reduction<Criteria> {
        assert_same_kind(self, other, "reduce");
        use Criterion::*;
        use Reduction::{Covered, Disjoint, Remainder};

        match (self, other) {
            (Equals(x), Equals(y)) => {
                if x == y {
                    Covered
                } else {
                    Disjoint
                }
            }
            (Equals(x), NotEquals(y)) => {
                if x == y {
                    Disjoint
                } else {
                    Remainder(NotInSet(set_of([x, y])).into())
                }
            }
            (Equals(x), InSet(set)) => set_minus(set, |v| v == x),
            (Equals(x), NotInSet(set)) => {
                if set.contains(x) {
                    Disjoint
                } else {
                    Remainder(NotInSet(with(set, x)).into())
                }
            }
            (Equals(x), InRange(range)) => range_minus_points(range, [x]),

            (NotEquals(x), Equals(y)) => {
                if x == y {
                    Disjoint
                } else {
                    Covered
                }
            }
            (NotEquals(x), NotEquals(y)) => {
                if x == y {
                    Covered
                } else {
                    Remainder(Equals(x.clone()).into())
                }
            }
            (NotEquals(x), InSet(set)) => {
                if !set.contains(x) {
                    Covered
                } else if set.len() == 1 {
                    Disjoint
                } else {
                    Remainder(Equals(x.clone()).into())
                }
            }
            (NotEquals(x), NotInSet(set)) => {
                if set.contains(x) {
                    Covered
                } else {
                    Remainder(Equals(x.clone()).into())
                }
            }
            (NotEquals(x), InRange(range)) => {
                if !range.contains(x) {
                    Covered
                } else if range.as_point().is_some() {
                    Disjoint
                } else {
                    Remainder(Equals(x.clone()).into())
                }
            }

            (InSet(held), Equals(y)) => {
                if held.contains(y) {
                    Covered
                } else {
                    Disjoint
                }
            }
            (InSet(held), NotEquals(y)) => {
                if held.iter().all(|v| v == y) {
                    Disjoint
                } else {
                    Remainder(NotInSet(with(held, y)).into())
                }
            }
            (InSet(held), InSet(set)) => set_minus(set, |v| held.contains(v)),
            (InSet(held), NotInSet(set)) => {
                if held.is_subset(set) {
                    Disjoint
                } else {
                    Remainder(NotInSet(held.union(set).cloned().collect()).into())
                }
            }
            (InSet(held), InRange(range)) => range_minus_points(range, held),

            (NotInSet(held), Equals(y)) => {
                if held.contains(y) {
                    Disjoint
                } else {
                    Covered
                }
            }
            (NotInSet(held), NotEquals(y)) => {
                let rest: BTreeSet<Value> = held.iter().filter(|v| *v != y).cloned().collect();
                if rest.is_empty() {
                    Covered
                } else {
                    Remainder(InSet(rest).into())
                }
            }
            (NotInSet(held), InSet(set)) => {
                let rest: BTreeSet<Value> = set.intersection(held).cloned().collect();
                if rest.is_empty() {
                    Covered
                } else if rest.len() == set.len() {
                    Disjoint
                } else {
                    Remainder(InSet(rest).into())
                }
            }
            (NotInSet(held), NotInSet(set)) => {
                let rest: BTreeSet<Value> = held.difference(set).cloned().collect();
                if rest.is_empty() {
                    Covered
                } else {
                    Remainder(InSet(rest).into())
                }
            }
            (NotInSet(held), InRange(range)) => {
                let rest: BTreeSet<Value> =
                    held.iter().filter(|v| range.contains(v)).cloned().collect();
                if rest.is_empty() {
                    Covered
                } else if range.as_point().is_some() {
                    Disjoint
                } else {
                    Remainder(InSet(rest).into())
                }
            }

            (InRange(held), Equals(y)) => {
                if held.contains(y) {
                    Covered
                } else {
                    Disjoint
                }
            }
            // What lies outside a range includes nulls, other kinds and
            // non-scalar values, none of which a remainder can name.
            (InRange(_), NotEquals(_) | NotInSet(_)) => Disjoint,
            (InRange(held), InSet(set)) => set_minus(set, |v| held.contains(v)),
            (InRange(held), InRange(range)) => {
                if held.intersect(range).is_none() {
                    return Disjoint;
                }
                if range.kind().is_none() && held.kind().is_some() {
                    return Disjoint;
                }
                match any_of(range.subtract(held).into_iter().map(range_node).collect()) {
                    Logic::Node(rest) => Remainder(rest),
                    _ => Covered,
                }
            }
        }
    }

    /// Union of the two predicates.
    ///
    /// # Panics
    ///
    /// If the two criteria compare different value kinds.
    pub fn merge(&self, other: &Criterion) -> Logic {
        assert_same_kind(self, other, "merge");
        use Criterion::*;

        match (self, other) {
            (Equals(x), Equals(y)) => {
                if x == y {
                    node(Equals(x.clone()))
                } else {
                    node(InSet(set_of([x, y])))
                }
            }
            (Equals(x), InSet(set)) | (InSet(set), Equals(x)) => node(InSet(with(set, x))),
            (Equals(x), NotEquals(y)) | (NotEquals(y), Equals(x)) => {
                if x == y {
                    Logic::True
                } else {
                    node(NotEquals(y.clone()))
                }
            }
            (Equals(x), NotInSet(set)) | (NotInSet(set), Equals(x)) => {
                not_in_set_or_true(set.iter().filter(|v| *v != x).cloned().collect())
            }
            (Equals(x), InRange(range)) | (InRange(range), Equals(x)) => match range.absorb(x) {
                Some(r) => node(InRange(r)),
                None => Logic::False,
            },

            (NotEquals(x), NotEquals(y)) => {
                if x == y {
                    node(NotEquals(x.clone()))
                } else {
                    Logic::True
                }
            }
            (NotEquals(x), InSet(set)) | (InSet(set), NotEquals(x)) => {
                if set.contains(x) {
                    Logic::True
                } else {
                    node(NotEquals(x.clone()))
                }
            }
            (NotEquals(x), NotInSet(set)) | (NotInSet(set), NotEquals(x)) => {
                if set.contains(x) {
                    node(NotEquals(x.clone()))
                } else {
                    Logic::True
                }
            }
            (NotEquals(x), InRange(range)) | (InRange(range), NotEquals(x)) => {
                if range.contains(x) {
                    Logic::True
                } else {
                    node(NotEquals(x.clone()))
                }
            }

            (InSet(a), InSet(b)) => node(InSet(a.union(b).cloned().collect())),
            (InSet(a), NotInSet(b)) | (NotInSet(b), InSet(a)) => {
                not_in_set_or_true(b.difference(a).cloned().collect())
            }
            (InSet(set), InRange(range)) | (InRange(range), InSet(set)) => {
                let mut merged = range.clone();
                for v in set {
                    match merged.absorb(v) {
                        Some(r) => merged = r,
                        None => return Logic::False,
                    }
                }
                node(InRange(merged))
            }

            (NotInSet(a), NotInSet(b)) => {
                not_in_set_or_true(a.intersection(b).cloned().collect())
            }
            (NotInSet(set), InRange(range)) | (InRange(range), NotInSet(set)) => {
                not_in_set_or_true(set.iter().filter(|v| !range.contains(v)).cloned().collect())
            }

            // A full range would also match every other kind.
            (InRange(a), InRange(b)) => match a.union(b) {
                Some(r) if r.is_full() && a.kind().is_some() => Logic::False,
                Some(r) => node(InRange(r)),
                None => Logic::False,
            },
        }
    }

    /// Intersection of the two predicates; `Logic::False` when empty.
    ///
    /// # Panics
    ///
    /// If the two criteria compare different value kinds.
    pub fn intersect(&self, other: &Criterion) -> Logic {
        assert_same_kind(self, other, "intersect");
        use Criterion::*;

        match (self, other) {
            (Equals(x), c) | (c, Equals(x)) => {
                if c.matches(x) {
                    node(Equals(x.clone()))
                } else {
                    Logic::False
                }
            }
            (NotEquals(x), NotEquals(y)) => {
                if x == y {
                    node(NotEquals(x.clone()))
                } else {
                    node(NotInSet(set_of([x, y])))
                }
            }
            (NotEquals(x), InSet(set)) | (InSet(set), NotEquals(x)) => {
                in_set_or_false(set.iter().filter(|v| *v != x).cloned().collect())
            }
            (NotEquals(x), NotInSet(set)) | (NotInSet(set), NotEquals(x)) => {
                node(NotInSet(with(set, x)))
            }
            (NotEquals(x), InRange(range)) | (InRange(range), NotEquals(x)) => {
                any_of(range.split_at([x]).into_iter().map(range_node).collect())
            }
            (InSet(a), InSet(b)) => in_set_or_false(a.intersection(b).cloned().collect()),
            (InSet(a), NotInSet(b)) | (NotInSet(b), InSet(a)) => {
                in_set_or_false(a.difference(b).cloned().collect())
            }
            (InSet(set), InRange(range)) | (InRange(range), InSet(set)) => {
                in_set_or_false(set.iter().filter(|v| range.contains(v)).cloned().collect())
            }
            (NotInSet(a), NotInSet(b)) => node(NotInSet(a.union(b).cloned().collect())),
            (NotInSet(set), InRange(range)) | (InRange(range), NotInSet(set)) => {
                any_of(range.split_at(set).into_iter().map(range_node).collect())
            }
            (InRange(a), InRange(b)) => match a.intersect(b) {
                Some(r) => node(InRange(r)),
                None => Logic::False,
            },
        }
    }

    /// Logical complement, or `None` when it cannot be expressed. The
    /// complement of a range would have to name nulls, other kinds and
    /// non-scalar values.
    pub fn invert(&self) -> Option<Logic> {
        match self {
            Criterion::InRange(_) => None,
            c => Some(c.invert_present()),
        }
    }

    /// Complement over a field that holds a non-null scalar of one kind on
    /// every entity, where the outside of a range is just its complement.
    pub fn invert_present(&self) -> Logic {
        match self {
            Criterion::Equals(v) => node(Criterion::NotEquals(v.clone())),
            Criterion::NotEquals(v) => node(Criterion::Equals(v.clone())),
            Criterion::InSet(set) => not_in_set_or_true(set.clone()),
            Criterion::NotInSet(set) => in_set_or_false(set.clone()),
            Criterion::InRange(range) => {
                any_of(range.complement().into_iter().map(range_node).collect())
            }
        }
    }
}

/// Incompatible operand kinds are a programming error; never coerce.
fn assert_same_kind(a: &Criterion, b: &Criterion, op: &str) {
    if let (Some(x), Some(y)) = (a.kind(), b.kind()) {
        assert!(
            x == y,
            "cannot {op} {x} criterion with {y} criterion: {a:?} vs {b:?}"
        );
    }
}

fn node(c: Criterion) -> Logic {
    Logic::Node(Criteria::Criterion(c))
}

fn range_node(range: Range) -> Criteria {
    Criteria::Criterion(Criterion::InRange(range))
}

fn set_of<'a>(values: impl IntoIterator<Item = &'a Value>) -> BTreeSet<Value> {
    values.into_iter().cloned().collect()
}

fn with(set: &BTreeSet<Value>, value: &Value) -> BTreeSet<Value> {
    let mut out = set.clone();
    out.insert(value.clone());
    out
}

fn in_set_or_false(set: BTreeSet<Value>) -> Logic {
    if set.is_empty() {
        Logic::False
    } else {
        node(Criterion::InSet(set))
    }
}

fn not_in_set_or_true(set: BTreeSet<Value>) -> Logic {
    if set.is_empty() {
        Logic::True
    } else {
        node(Criterion::NotInSet(set))
    }
}

/// `set` without the members `held` already matches.
fn set_minus(set: &BTreeSet<Value>, held: impl Fn(&Value) -> bool) -> Reduction<Criteria> {
    let rest: BTreeSet<Value> = set.iter().filter(|v| !held(v)).cloned().collect();
    if rest.is_empty() {
        Reduction::Covered
    } else if rest.len() == set.len() {
        Reduction::Disjoint
    } else {
        Reduction::Remainder(Criterion::InSet(rest).into())
    }
}

/// `range` with the held points removed: bounds tighten, interior points
/// split the range.
fn range_minus_points<'a>(
    range: &Range,
    held: impl IntoIterator<Item = &'a Value>,
) -> Reduction<Criteria> {
    let inside: Vec<&Value> = held.into_iter().filter(|v| range.contains(v)).collect();
    if inside.is_empty() {
        return Reduction::Disjoint;
    }
    match any_of(range.split_at(inside).into_iter().map(range_node).collect()) {
        Logic::Node(rest) => Reduction::Remainder(rest),
        _ => Reduction::Covered,
    }
}
