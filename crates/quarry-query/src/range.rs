use std::cmp::Ordering;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueKind};

/// An interval over one value kind. Either side may be open-ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub from: Bound<Value>,
    pub to: Bound<Value>,
}

/// Order two lower bounds by where the interval starts.
fn cmp_lower(a: &Bound<Value>, b: &Bound<Value>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Less,
        (_, Bound::Unbounded) => Ordering::Greater,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Less),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Greater),
    }
}

/// Order two upper bounds by where the interval ends.
fn cmp_upper(a: &Bound<Value>, b: &Bound<Value>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Greater,
        (_, Bound::Unbounded) => Ordering::Less,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Greater),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Less),
    }
}

/// The bound on the other side of the same split point.
fn flip(bound: &Bound<Value>) -> Bound<Value> {
    match bound {
        Bound::Included(v) => Bound::Excluded(v.clone()),
        Bound::Excluded(v) => Bound::Included(v.clone()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn bound_value(bound: &Bound<Value>) -> Option<&Value> {
    match bound {
        Bound::Included(v) | Bound::Excluded(v) => Some(v),
        Bound::Unbounded => None,
    }
}

impl Range {
    pub fn new(from: Bound<Value>, to: Bound<Value>) -> Self {
        Self { from, to }
    }

    /// `[from, to]`
    pub fn closed(from: impl Into<Value>, to: impl Into<Value>) -> Self {
        Self::new(Bound::Included(from.into()), Bound::Included(to.into()))
    }

    pub fn point(value: Value) -> Self {
        Self::new(Bound::Included(value.clone()), Bound::Included(value))
    }

    pub fn kind(&self) -> Option<ValueKind> {
        bound_value(&self.from)
            .and_then(Value::kind)
            .or_else(|| bound_value(&self.to).and_then(Value::kind))
    }

    /// The bound values, lower first.
    pub fn endpoints(&self) -> impl Iterator<Item = &Value> {
        bound_value(&self.from).into_iter().chain(bound_value(&self.to))
    }

    pub fn is_empty(&self) -> bool {
        match (&self.from, &self.to) {
            (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
            (Bound::Included(a), Bound::Included(b)) => a > b,
            (Bound::Included(a), Bound::Excluded(b))
            | (Bound::Excluded(a), Bound::Included(b))
            | (Bound::Excluded(a), Bound::Excluded(b)) => a >= b,
        }
    }

    /// True when neither side is bounded. A full range matches every non-null
    /// scalar, of any kind.
    pub fn is_full(&self) -> bool {
        matches!((&self.from, &self.to), (Bound::Unbounded, Bound::Unbounded))
    }

    pub fn as_point(&self) -> Option<&Value> {
        match (&self.from, &self.to) {
            (Bound::Included(a), Bound::Included(b)) if a == b => Some(a),
            _ => None,
        }
    }

    /// Null never lies in a range, and neither does a value of another kind.
    pub fn contains(&self, value: &Value) -> bool {
        if value.is_null() || self.kind().is_some_and(|kind| value.kind() != Some(kind)) {
            return false;
        }
        let above = match &self.from {
            Bound::Unbounded => true,
            Bound::Included(from) => value >= from,
            Bound::Excluded(from) => value > from,
        };
        let below = match &self.to {
            Bound::Unbounded => true,
            Bound::Included(to) => value <= to,
            Bound::Excluded(to) => value < to,
        };
        above && below
    }

    pub fn intersect(&self, other: &Range) -> Option<Range> {
        let from = match cmp_lower(&self.from, &other.from) {
            Ordering::Less => other.from.clone(),
            _ => self.from.clone(),
        };
        let to = match cmp_upper(&self.to, &other.to) {
            Ordering::Greater => other.to.clone(),
            _ => self.to.clone(),
        };
        let range = Range::new(from, to);
        (!range.is_empty()).then_some(range)
    }

    /// Zero, one or two ranges covering everything outside `self`.
    pub fn complement(&self) -> Vec<Range> {
        let mut out = Vec::with_capacity(2);
        if !matches!(self.from, Bound::Unbounded) {
            out.push(Range::new(Bound::Unbounded, flip(&self.from)));
        }
        if !matches!(self.to, Bound::Unbounded) {
            out.push(Range::new(flip(&self.to), Bound::Unbounded));
        }
        out
    }

    /// The parts of `self` not covered by `other`, in ascending order.
    pub fn subtract(&self, other: &Range) -> Vec<Range> {
        other
            .complement()
            .iter()
            .filter_map(|outside| self.intersect(outside))
            .collect()
    }

    /// `self` with every given point cut out, split at each point that lies
    /// inside it. A point on an inclusive bound just makes that bound
    /// exclusive.
    pub fn split_at<'a>(&self, points: impl IntoIterator<Item = &'a Value>) -> Vec<Range> {
        let mut inside: Vec<&Value> = points.into_iter().filter(|p| self.contains(p)).collect();
        inside.sort();
        inside.dedup();

        let mut pieces = Vec::with_capacity(inside.len() + 1);
        let mut lower = self.from.clone();
        for point in inside {
            let piece = Range::new(lower, Bound::Excluded(point.clone()));
            if !piece.is_empty() {
                pieces.push(piece);
            }
            lower = Bound::Excluded(point.clone());
        }
        let last = Range::new(lower, self.to.clone());
        if !last.is_empty() {
            pieces.push(last);
        }
        pieces
    }

    /// The smallest single range equal to `self ∪ other`, if one exists.
    pub fn union(&self, other: &Range) -> Option<Range> {
        let (lo, hi) = match cmp_lower(&self.from, &other.from) {
            Ordering::Greater => (other, self),
            _ => (self, other),
        };
        let touching = match (&lo.to, &hi.from) {
            (Bound::Included(a), Bound::Excluded(b)) | (Bound::Excluded(a), Bound::Included(b)) => {
                a == b
            }
            _ => false,
        };
        if lo.intersect(hi).is_none() && !touching {
            return None;
        }
        let to = match cmp_upper(&lo.to, &hi.to) {
            Ordering::Less => hi.to.clone(),
            _ => lo.to.clone(),
        };
        Some(Range::new(lo.from.clone(), to))
    }

    /// `self ∪ {value}` as a single range: the value must already be inside
    /// or sit on an exclusive bound.
    pub fn absorb(&self, value: &Value) -> Option<Range> {
        if self.contains(value) {
            return Some(self.clone());
        }
        match (&self.from, &self.to) {
            (Bound::Excluded(from), _) if from == value => {
                Some(Range::new(Bound::Included(value.clone()), self.to.clone()))
            }
            (_, Bound::Excluded(to)) if to == value => {
                Some(Range::new(self.from.clone(), Bound::Included(value.clone())))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(from: i64, to: i64) -> Range {
        Range::new(
            Bound::Excluded(Value::Int(from)),
            Bound::Excluded(Value::Int(to)),
        )
    }

    #[test]
    fn emptiness() {
        assert!(!Range::closed(1, 1).is_empty());
        assert!(open(1, 1).is_empty());
        assert!(Range::closed(2, 1).is_empty());
        assert!(!Range::new(Bound::Unbounded, Bound::Excluded(Value::Int(0))).is_empty());
    }

    #[test]
    fn subtract_inner_range_leaves_two_pieces() {
        let pieces = Range::closed(1, 7).subtract(&Range::closed(3, 4));
        assert_eq!(
            pieces,
            vec![
                Range::new(Bound::Included(Value::Int(1)), Bound::Excluded(Value::Int(3))),
                Range::new(Bound::Excluded(Value::Int(4)), Bound::Included(Value::Int(7))),
            ]
        );
    }

    #[test]
    fn subtract_overlapping_prefix() {
        let pieces = Range::closed(100, 300).subtract(&Range::closed(100, 200));
        assert_eq!(
            pieces,
            vec![Range::new(
                Bound::Excluded(Value::Int(200)),
                Bound::Included(Value::Int(300))
            )]
        );
    }

    #[test]
    fn subtract_superset_is_empty() {
        assert!(Range::closed(3, 4).subtract(&Range::closed(1, 7)).is_empty());
    }

    #[test]
    fn complement_of_half_open() {
        let r = Range::new(Bound::Included(Value::Int(5)), Bound::Unbounded);
        assert_eq!(
            r.complement(),
            vec![Range::new(Bound::Unbounded, Bound::Excluded(Value::Int(5)))]
        );
        assert!(Range::new(Bound::Unbounded, Bound::Unbounded).complement().is_empty());
    }

    #[test]
    fn union_of_adjacent_ranges() {
        let a = Range::new(Bound::Included(Value::Int(1)), Bound::Excluded(Value::Int(3)));
        let b = Range::closed(3, 5);
        assert_eq!(a.union(&b), Some(Range::closed(1, 5)));
        assert_eq!(b.union(&a), Some(Range::closed(1, 5)));
        assert_eq!(open(1, 3).union(&open(3, 5)), None);
    }

    #[test]
    fn split_at_bounds_and_interior() {
        let r = Range::closed(1, 10);
        let pieces = r.split_at([&Value::Int(1), &Value::Int(5), &Value::Int(20)]);
        assert_eq!(
            pieces,
            vec![
                open(1, 5),
                Range::new(Bound::Excluded(Value::Int(5)), Bound::Included(Value::Int(10))),
            ]
        );
        assert!(Range::closed(2, 2).split_at([&Value::Int(2)]).is_empty());
    }

    #[test]
    fn null_and_other_kinds_lie_outside() {
        let below = Range::new(Bound::Unbounded, Bound::Included(Value::Int(10)));
        assert!(below.contains(&Value::Float(-3.5)));
        assert!(!below.contains(&Value::Null));
        assert!(!below.contains(&Value::Bool(true)));

        let above = Range::new(Bound::Excluded(Value::Int(10)), Bound::Unbounded);
        assert!(!above.contains(&Value::from("cheap")));

        let full = Range::new(Bound::Unbounded, Bound::Unbounded);
        assert!(full.contains(&Value::from("cheap")));
        assert!(!full.contains(&Value::Null));
    }

    #[test]
    fn absorb_exclusive_bound() {
        let r = open(1, 3);
        assert_eq!(
            r.absorb(&Value::Int(1)),
            Some(Range::new(Bound::Included(Value::Int(1)), Bound::Excluded(Value::Int(3))))
        );
        assert_eq!(r.absorb(&Value::Int(9)), None);
    }
}
