use std::collections::BTreeMap;

use bson::{Bson, Document};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::outcome::Reduction;

/// Which fields of an entity are wanted.
///
/// Given `["name", "owner.name", "owner.email"]`, builds:
/// ```text
/// { "name": Leaf, "owner": Nested({ "name": Leaf, "email": Leaf }) }
/// ```
/// A `Leaf` takes the whole field, including every nested field of a related
/// entity. An absent key is not wanted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection(BTreeMap<String, Selected>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selected {
    Leaf,
    Nested(Selection),
}

impl Serialize for Selected {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Selected::Leaf => serializer.serialize_bool(true),
            Selected::Nested(sel) => sel.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectedRepr {
    Flag(bool),
    Nested(Selection),
}

impl<'de> Deserialize<'de> for Selected {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match SelectedRepr::deserialize(deserializer)? {
            SelectedRepr::Flag(true) => Ok(Selected::Leaf),
            SelectedRepr::Flag(false) => Err(de::Error::custom(
                "unselected fields are omitted, not set to false",
            )),
            SelectedRepr::Nested(sel) => Ok(Selected::Nested(sel)),
        }
    }
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a selection from dot-notation paths.
    pub fn from_paths<S: AsRef<str>>(paths: impl IntoIterator<Item = S>) -> Self {
        let mut sel = Selection::new();
        for path in paths {
            sel.insert_path(path.as_ref());
        }
        sel
    }

    pub fn with(mut self, path: &str) -> Self {
        self.insert_path(path);
        self
    }

    pub fn with_nested(mut self, field: &str, nested: Selection) -> Self {
        let merged = match self.0.remove(field) {
            Some(Selected::Leaf) => Selected::Leaf,
            Some(Selected::Nested(existing)) => {
                Selected::Nested(merge_selections([&existing, &nested]))
            }
            None => Selected::Nested(nested),
        };
        self.0.insert(field.to_string(), merged);
        self
    }

    /// Add a dot-notation path. A leaf overrides any existing branch: if
    /// both "owner" and "owner.name" are asked for, "owner" wins.
    pub fn insert_path(&mut self, path: &str) {
        match path.split_once('.') {
            None => {
                self.0.insert(path.to_string(), Selected::Leaf);
            }
            Some((head, rest)) => {
                let entry = self
                    .0
                    .entry(head.to_string())
                    .or_insert_with(|| Selected::Nested(Selection::new()));
                if let Selected::Nested(children) = entry {
                    children.insert_path(rest);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&Selected> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Selected)> {
        self.0.iter()
    }

    /// Whether the dot-notation path is fully wanted.
    pub fn contains_path(&self, path: &str) -> bool {
        match path.split_once('.') {
            None => matches!(self.0.get(path), Some(Selected::Leaf)),
            Some((head, rest)) => match self.0.get(head) {
                Some(Selected::Leaf) => true,
                Some(Selected::Nested(children)) => children.contains_path(rest),
                None => false,
            },
        }
    }

    /// Copy of `doc` restricted to the selected fields. Nested selections
    /// descend into embedded documents and arrays of documents.
    pub fn project(&self, doc: &Document) -> Document {
        let mut out = Document::new();
        for (key, value) in doc {
            match self.0.get(key.as_str()) {
                Some(Selected::Leaf) => {
                    out.insert(key.clone(), value.clone());
                }
                Some(Selected::Nested(children)) => {
                    out.insert(key.clone(), children.project_value(value));
                }
                None => {}
            }
        }
        out
    }

    fn project_value(&self, value: &Bson) -> Bson {
        match value {
            Bson::Document(sub) => Bson::Document(self.project(sub)),
            Bson::Array(items) => {
                Bson::Array(items.iter().map(|v| self.project_value(v)).collect())
            }
            other => other.clone(),
        }
    }
}

fn subtract(want: &Selection, have: &Selection) -> Selection {
    let mut rest = Selection::new();
    for (field, wanted) in &want.0 {
        match (wanted, have.0.get(field)) {
            (_, None) => {
                rest.0.insert(field.clone(), wanted.clone());
            }
            (_, Some(Selected::Leaf)) => {}
            (Selected::Leaf, Some(Selected::Nested(_))) => {
                rest.0.insert(field.clone(), Selected::Leaf);
            }
            (Selected::Nested(w), Some(Selected::Nested(h))) => {
                let missing = subtract(w, h);
                if !missing.is_empty() {
                    rest.0.insert(field.clone(), Selected::Nested(missing));
                }
            }
        }
    }
    rest
}

/// The part of `want` that `have` does not already hold.
pub fn reduce_selection(want: &Selection, have: &Selection) -> Reduction<Selection> {
    let rest = subtract(want, have);
    if rest.is_empty() {
        Reduction::Covered
    } else if rest == *want {
        Reduction::Disjoint
    } else {
        Reduction::Remainder(rest)
    }
}

/// Deep union. A leaf absorbs any nested selection on the same field.
pub fn merge_selections<'a>(selections: impl IntoIterator<Item = &'a Selection>) -> Selection {
    let mut out = Selection::new();
    for sel in selections {
        for (field, selected) in &sel.0 {
            let merged = match (out.0.remove(field), selected) {
                (None, s) => s.clone(),
                (Some(Selected::Leaf), _) | (_, Selected::Leaf) => Selected::Leaf,
                (Some(Selected::Nested(a)), Selected::Nested(b)) => {
                    Selected::Nested(merge_selections([&a, b]))
                }
            };
            out.0.insert(field.clone(), merged);
        }
    }
    out
}
