use std::collections::{BTreeMap, BTreeSet};

use bson::Document;
use quarry_query::{Criteria, Criterion, Shape, Template, Value, get_path};

/// A map keyed by the values of N ordered field paths.
///
/// All but the last path are nested maps, so every key prefix names a
/// subtree and partial-key enumeration is a tree walk:
/// ```text
/// paths: ["tenant", "id"]
/// Branch { "acme": Leaf { 1: v1, 2: v2 }, "globex": Leaf { 1: v3 } }
/// ```
#[derive(Debug, Clone)]
pub struct ComplexKeyMap<V> {
    paths: Vec<String>,
    root: Node<V>,
    len: usize,
}

#[derive(Debug, Clone)]
enum Node<V> {
    Branch(BTreeMap<Value, Node<V>>),
    Leaf(BTreeMap<Value, V>),
}

impl<V> Node<V> {
    fn empty(depth: usize) -> Self {
        if depth == 1 {
            Node::Leaf(BTreeMap::new())
        } else {
            Node::Branch(BTreeMap::new())
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Node::Branch(children) => children.is_empty(),
            Node::Leaf(values) => values.is_empty(),
        }
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a V>) {
        match self {
            Node::Branch(children) => children.values().for_each(|c| c.collect(out)),
            Node::Leaf(values) => out.extend(values.values()),
        }
    }

    fn lookup<'a>(&'a self, keys: &[KeyPart], out: &mut Vec<&'a V>) {
        let Some((first, rest)) = keys.split_first() else {
            self.collect(out);
            return;
        };
        let wanted: Vec<&Value> = match first {
            KeyPart::One(v) => vec![v],
            KeyPart::Many(set) => set.iter().collect(),
        };
        match self {
            Node::Branch(children) => {
                for v in wanted {
                    if let Some(child) = children.get(v) {
                        child.lookup(rest, out);
                    }
                }
            }
            Node::Leaf(values) => out.extend(wanted.into_iter().filter_map(|v| values.get(v))),
        }
    }

    fn remove(&mut self, key: &[Value]) -> Option<V> {
        let (first, rest) = key.split_first()?;
        match self {
            Node::Leaf(values) => values.remove(first),
            Node::Branch(children) => {
                let child = children.get_mut(first)?;
                let removed = child.remove(rest);
                if child.is_empty() {
                    children.remove(first);
                }
                removed
            }
        }
    }
}

enum KeyPart {
    One(Value),
    Many(BTreeSet<Value>),
}

impl<V> ComplexKeyMap<V> {
    /// # Panics
    ///
    /// If `paths` is empty.
    pub fn new<S: AsRef<str>>(paths: impl IntoIterator<Item = S>) -> Self {
        let paths: Vec<String> = paths.into_iter().map(|p| p.as_ref().to_string()).collect();
        assert!(!paths.is_empty(), "ComplexKeyMap needs at least one key path");
        let root = Node::empty(paths.len());
        Self {
            paths,
            root,
            len: 0,
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The key of `doc`: one scalar per path, or `None` when any path is
    /// missing, null or not a scalar.
    pub fn key_of(&self, doc: &Document) -> Option<Vec<Value>> {
        self.paths
            .iter()
            .map(|path| get_path(doc, path).and_then(Value::from_bson))
            .map(|v| v.filter(|v| !v.is_null()))
            .collect()
    }

    /// # Panics
    ///
    /// If `key` does not hold exactly one value per path.
    pub fn insert(&mut self, key: &[Value], value: V) -> Option<V> {
        self.check_key(key);
        let mut node = &mut self.root;
        let depth = self.paths.len();
        for (i, part) in key.iter().enumerate() {
            match node {
                Node::Branch(children) => {
                    node = children
                        .entry(part.clone())
                        .or_insert_with(|| Node::empty(depth - i - 1));
                }
                Node::Leaf(values) => {
                    let previous = values.insert(part.clone(), value);
                    if previous.is_none() {
                        self.len += 1;
                    }
                    return previous;
                }
            }
        }
        unreachable!("key length checked against depth")
    }

    pub fn get(&self, key: &[Value]) -> Option<&V> {
        if key.len() != self.paths.len() {
            return None;
        }
        let mut node = &self.root;
        for part in key {
            match node {
                Node::Branch(children) => node = children.get(part)?,
                Node::Leaf(values) => return values.get(part),
            }
        }
        None
    }

    pub fn remove(&mut self, key: &[Value]) -> Option<V> {
        if key.len() != self.paths.len() {
            return None;
        }
        let removed = self.root.remove(key);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Every value whose key starts with `prefix`, in key order.
    pub fn iter_prefix(&self, prefix: &[Value]) -> impl Iterator<Item = &V> {
        let keys: Vec<KeyPart> = prefix.iter().cloned().map(KeyPart::One).collect();
        let mut out = Vec::new();
        if keys.len() <= self.paths.len() {
            self.root.lookup(&keys, &mut out);
        }
        out.into_iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter_prefix(&[])
    }

    /// Candidates for `criteria`: a superset of the values whose key
    /// satisfies it. `None` when the criteria does not pin down the first
    /// path, in which case the caller scans.
    ///
    /// The criteria is remapped onto the key layout (equality on outer
    /// paths, equality or set membership on the innermost); each remapped
    /// branch walks its equality prefix, then fans out over the innermost
    /// set. Constraints the layout cannot express only widen the result.
    pub fn get_by_criterion(&self, criteria: &Criteria) -> Option<Vec<&V>> {
        let remapped = criteria.remap(&[self.template()])?;
        let mut prefixes = Vec::with_capacity(remapped.branches.len());
        for branch in &remapped.branches {
            prefixes.push(self.branch_prefix(branch)?);
        }

        let mut out = Vec::new();
        for prefix in &prefixes {
            self.root.lookup(prefix, &mut out);
        }
        let mut seen = BTreeSet::new();
        out.retain(|v| seen.insert(*v as *const V));
        Some(out)
    }

    fn template(&self) -> Template {
        let last = self.paths.len() - 1;
        Template::named(self.paths.iter().enumerate().map(|(i, path)| {
            let shapes = if i == last {
                Template::shapes([Shape::Equals, Shape::InSet])
            } else {
                Template::shapes([Shape::Equals])
            };
            (path.as_str(), shapes)
        }))
    }

    /// The leading key parts a remapped branch pins down.
    fn branch_prefix(&self, branch: &Criteria) -> Option<Vec<KeyPart>> {
        let mut parts = Vec::new();
        for path in &self.paths {
            let part = match branch.at_path(path).and_then(Criteria::as_criterion) {
                Some(Criterion::Equals(v)) => KeyPart::One(v.clone()),
                Some(Criterion::InSet(set)) => KeyPart::Many(set.clone()),
                _ => break,
            };
            let has_null = match &part {
                KeyPart::One(v) => v.is_null(),
                KeyPart::Many(set) => set.iter().any(Value::is_null),
            };
            // Entities with a missing key field are never stored under a key.
            if has_null {
                return None;
            }
            parts.push(part);
        }
        (!parts.is_empty()).then_some(parts)
    }

    pub fn clear(&mut self) {
        self.root = Node::empty(self.paths.len());
        self.len = 0;
    }

    fn check_key(&self, key: &[Value]) {
        assert_eq!(
            key.len(),
            self.paths.len(),
            "key {key:?} does not match key paths {:?}",
            self.paths
        );
    }
}
