use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::criteria::{Criteria, all_of};
use crate::criterion::Criterion;
use crate::outcome::Logic;
use crate::range::Range;

/// A criterion form a backend can evaluate natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Equals,
    NotEquals,
    InSet,
    NotInSet,
    InRange,
}

/// The criteria a backend accepts: allowed shapes for a value, or allowed
/// fields of an object, each with its own template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    Shapes(Vec<Shape>),
    Named(BTreeMap<String, Template>),
}

impl Template {
    pub fn shapes(shapes: impl IntoIterator<Item = Shape>) -> Self {
        Template::Shapes(shapes.into_iter().collect())
    }

    /// A `Named` template from `(path, template)` pairs; dotted paths nest.
    pub fn named<K: AsRef<str>>(fields: impl IntoIterator<Item = (K, Template)>) -> Self {
        let mut out = BTreeMap::new();
        for (path, template) in fields {
            insert_field(&mut out, path.as_ref(), template);
        }
        Template::Named(out)
    }
}

fn insert_field(fields: &mut BTreeMap<String, Template>, path: &str, template: Template) {
    match path.split_once('.') {
        None => {
            fields.insert(path.to_string(), template);
        }
        Some((head, rest)) => {
            let entry = fields
                .entry(head.to_string())
                .or_insert_with(|| Template::Named(BTreeMap::new()));
            if let Template::Named(children) = entry {
                insert_field(children, rest, template);
            }
        }
    }
}

/// `self ≡ Or(branches) ∧ leftover`, where every branch conforms to
/// `templates[template]` and `leftover` needs local filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remapped {
    pub template: usize,
    pub branches: Vec<Criteria>,
    pub leftover: Option<Criteria>,
}

struct Fit {
    branches: Vec<Criteria>,
    leftover: Option<Criteria>,
}

impl Criteria {
    /// Rewrite into the shapes one of `templates` supports. A template
    /// that needs no leftover wins over one that does; otherwise earlier
    /// templates win. `None` when nothing can be expressed by any template.
    pub fn remap(&self, templates: &[Template]) -> Option<Remapped> {
        let mut partial: Option<Remapped> = None;
        for (index, template) in templates.iter().enumerate() {
            let Some(fit) = fit(self, template) else {
                continue;
            };
            let remapped = Remapped {
                template: index,
                branches: fit.branches,
                leftover: fit.leftover,
            };
            if remapped.leftover.is_none() {
                return Some(remapped);
            }
            partial.get_or_insert(remapped);
        }
        partial
    }
}

fn fit(criteria: &Criteria, template: &Template) -> Option<Fit> {
    match (criteria, template) {
        (Criteria::Criterion(c), Template::Shapes(shapes)) => {
            let branches = shapes
                .iter()
                .filter_map(|shape| as_shape(c, *shape))
                .min_by_key(Vec::len)?;
            Some(Fit {
                branches: branches.into_iter().map(Criteria::from).collect(),
                leftover: None,
            })
        }
        (Criteria::Named(fields), Template::Named(allowed)) => fit_named(fields, allowed),
        (Criteria::Or(items), _) => {
            let mut branches = Vec::new();
            let mut loose = false;
            for item in items {
                let f = fit(item, template)?;
                loose |= f.leftover.is_some();
                branches.extend(f.branches);
            }
            Some(Fit {
                branches,
                leftover: loose.then(|| criteria.clone()),
            })
        }
        (Criteria::And(items), _) => fit_and(items, template),
        _ => None,
    }
}

fn fit_named(fields: &BTreeMap<String, Criteria>, allowed: &BTreeMap<String, Template>) -> Option<Fit> {
    let mut product: Vec<BTreeMap<String, Criteria>> = vec![BTreeMap::new()];
    let mut leftover = Vec::new();
    for (name, criteria) in fields {
        let Some(f) = allowed.get(name).and_then(|t| fit(criteria, t)) else {
            leftover.push(Criteria::Named(BTreeMap::from([(name.clone(), criteria.clone())])));
            continue;
        };
        if let Some(rest) = f.leftover {
            leftover.push(Criteria::Named(BTreeMap::from([(name.clone(), rest)])));
        }
        let mut next = Vec::with_capacity(product.len() * f.branches.len());
        for partial in &product {
            for branch in &f.branches {
                let mut combined = partial.clone();
                combined.insert(name.clone(), branch.clone());
                next.push(combined);
            }
        }
        product = next;
    }
    if product.iter().all(BTreeMap::is_empty) {
        return None;
    }
    Some(Fit {
        branches: product.into_iter().map(Criteria::Named).collect(),
        leftover: all_of(leftover).node(),
    })
}

/// Try the intersection of all items first; failing that, drive with the
/// item remapping to the fewest branches and leave the others to filter.
fn fit_and(items: &[Criteria], template: &Template) -> Option<Fit> {
    let folded = items
        .iter()
        .skip(1)
        .fold(Logic::Node(items.first()?.clone()), |acc, item| acc.intersect(item));
    if let Logic::Node(node) = &folded
        && !matches!(node, Criteria::And(_))
        && let Some(f) = fit(node, template)
        && f.leftover.is_none()
    {
        return Some(f);
    }

    let (index, best) = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| fit(item, template).map(|f| (i, f)))
        .min_by_key(|(_, f)| (f.leftover.is_some(), f.branches.len()))?;
    let mut leftover: Vec<Criteria> = items
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, item)| item.clone())
        .collect();
    leftover.extend(best.leftover);
    Some(Fit {
        branches: best.branches,
        leftover: all_of(leftover).node(),
    })
}

/// `c` rewritten exactly as a disjunction of `shape` criteria.
fn as_shape(c: &Criterion, shape: Shape) -> Option<Vec<Criterion>> {
    use Criterion::*;

    let out = match (c, shape) {
        (Equals(_), Shape::Equals)
        | (NotEquals(_), Shape::NotEquals)
        | (InSet(_), Shape::InSet)
        | (NotInSet(_), Shape::NotInSet)
        | (InRange(_), Shape::InRange) => vec![c.clone()],

        (Equals(v), Shape::InSet) => vec![InSet(BTreeSet::from([v.clone()]))],
        (Equals(v), Shape::InRange) if v.kind().is_some() => {
            vec![InRange(Range::point(v.clone()))]
        }
        (InSet(set), Shape::Equals) => set.iter().cloned().map(Equals).collect(),
        (InSet(set), Shape::InRange) if set.iter().all(|v| v.kind().is_some()) => set
            .iter()
            .cloned()
            .map(|v| InRange(Range::point(v)))
            .collect(),
        (NotEquals(v), Shape::NotInSet) => vec![NotInSet(BTreeSet::from([v.clone()]))],
        (NotInSet(set), Shape::NotEquals) if set.len() == 1 => {
            set.iter().cloned().map(NotEquals).collect()
        }
        (InRange(range), Shape::Equals) => vec![Equals(range.as_point()?.clone())],
        (InRange(range), Shape::InSet) => {
            vec![InSet(BTreeSet::from([range.as_point()?.clone()]))]
        }
        _ => return None,
    };
    Some(out)
}
