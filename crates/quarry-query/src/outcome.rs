use crate::criteria::Criteria;

/// Result of reducing one predicate (or selection) by another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reduction<T> {
    /// Everything the other side asks for is already held.
    Covered,
    /// No provable overlap: load the other side unchanged.
    Disjoint,
    /// The part still missing.
    Remainder(T),
}

impl<T> Reduction<T> {
    pub fn is_disjoint(&self) -> bool {
        matches!(self, Reduction::Disjoint)
    }
}

/// A criteria node or one of the two constants. `True` matches every value,
/// `False` matches none.
///
/// `merge` uses `False` for "cannot be expressed as one node" (a union of
/// non-empty predicates is never empty) and `intersect` uses it for
/// "provably empty".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Logic {
    True,
    False,
    Node(Criteria),
}

impl Logic {
    pub fn node(self) -> Option<Criteria> {
        match self {
            Logic::Node(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Logic::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Logic::False)
    }

    pub fn intersect(&self, other: &Criteria) -> Logic {
        match self {
            Logic::True => Logic::Node(other.clone()),
            Logic::False => Logic::False,
            Logic::Node(c) => c.intersect(other),
        }
    }
}

impl From<Criteria> for Logic {
    fn from(c: Criteria) -> Self {
        Logic::Node(c)
    }
}
