use std::collections::BTreeSet;

use bson::{Bson, Document};
use quarry_query::{Criteria, Selection, Value, get_path, merge_selections};

use crate::catalog::IndexDef;
use crate::error::CacheError;
use crate::key_map::ComplexKeyMap;

/// One cached entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: Vec<Value>,
    pub entity: Document,
    /// Every field some load has hydrated on this entity.
    pub satisfied: Selection,
}

struct SecondaryIndex {
    name: String,
    /// Keyed by the index paths followed by the primary key paths.
    map: ComplexKeyMap<Vec<Value>>,
    /// Primary keys of entities whose index fields are missing or not
    /// scalar. Always candidates.
    unkeyed: BTreeSet<Vec<Value>>,
}

impl SecondaryIndex {
    fn add(&mut self, entry: &CacheEntry) {
        match self.map.key_of(&entry.entity) {
            Some(key) => {
                self.map.insert(&key, entry.key.clone());
            }
            None => {
                self.unkeyed.insert(entry.key.clone());
            }
        }
    }

    fn discard(&mut self, entry: &CacheEntry) {
        match self.map.key_of(&entry.entity) {
            Some(key) => {
                self.map.remove(&key);
            }
            None => {
                self.unkeyed.remove(&entry.key);
            }
        }
    }
}

/// Entities of one schema, keyed by primary key, with optional secondary
/// indexes for local lookups.
pub struct EntityStore {
    schema: String,
    primary: ComplexKeyMap<CacheEntry>,
    indexes: Vec<SecondaryIndex>,
}

/// Overwrite `target` with `incoming`, descending into embedded documents so
/// fields only `target` holds survive.
pub fn deep_merge(target: &mut Document, incoming: Document) {
    for (key, value) in incoming {
        match value {
            Bson::Document(sub) => {
                if let Some(Bson::Document(existing)) = target.get_mut(&key) {
                    deep_merge(existing, sub);
                } else {
                    target.insert(key, sub);
                }
            }
            other => {
                target.insert(key, other);
            }
        }
    }
}

impl EntityStore {
    pub fn new(schema: &str, primary_key: &[String], indexes: &[IndexDef]) -> Self {
        let indexes = indexes
            .iter()
            .map(|def| SecondaryIndex {
                name: def.name.clone(),
                map: ComplexKeyMap::new(def.paths.iter().chain(primary_key)),
                unkeyed: BTreeSet::new(),
            })
            .collect();
        Self {
            schema: schema.to_string(),
            primary: ComplexKeyMap::new(primary_key),
            indexes,
        }
    }

    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    pub fn get(&self, key: &[Value]) -> Option<&CacheEntry> {
        self.primary.get(key)
    }

    /// # Panics
    ///
    /// If no index named `name` was declared for this schema.
    pub fn index(&self, name: &str) -> &ComplexKeyMap<Vec<Value>> {
        match self.indexes.iter().find(|idx| idx.name == name) {
            Some(idx) => &idx.map,
            None => panic!("no index {name} on schema {}", self.schema),
        }
    }

    /// The primary key of `doc`, or the first key path it lacks.
    pub fn key_of(&self, doc: &Document) -> Result<Vec<Value>, CacheError> {
        self.primary.key_of(doc).ok_or_else(|| {
            let path = self
                .primary
                .paths()
                .iter()
                .find(|p| get_path(doc, p).and_then(Value::from_bson).is_none_or(|v| v.is_null()))
                .cloned()
                .unwrap_or_default();
            CacheError::MissingPrimaryKey {
                schema: self.schema.clone(),
                path,
            }
        })
    }

    /// Merge a loaded entity into the store. Incoming fields overwrite,
    /// missing ones are kept, and `selection` joins the fields the entry is
    /// known to hold.
    pub fn upsert(&mut self, doc: Document, selection: &Selection) -> Result<Vec<Value>, CacheError> {
        let key = self.key_of(&doc)?;
        let entry = match self.primary.remove(&key) {
            Some(mut entry) => {
                for idx in &mut self.indexes {
                    idx.discard(&entry);
                }
                deep_merge(&mut entry.entity, doc);
                entry.satisfied = merge_selections([&entry.satisfied, selection]);
                entry
            }
            None => CacheEntry {
                key: key.clone(),
                entity: doc,
                satisfied: selection.clone(),
            },
        };
        for idx in &mut self.indexes {
            idx.add(&entry);
        }
        self.primary.insert(&key, entry);
        Ok(key)
    }

    /// Candidate entries for `criteria`: primary key lookup, else the first
    /// secondary index that can drive the lookup, else every entry.
    fn candidates(&self, criteria: &Criteria) -> Vec<&CacheEntry> {
        if let Some(found) = self.primary.get_by_criterion(criteria) {
            return found;
        }
        for idx in &self.indexes {
            if let Some(keys) = idx.map.get_by_criterion(criteria) {
                let mut found: Vec<&CacheEntry> = keys
                    .into_iter()
                    .chain(idx.unkeyed.iter())
                    .filter_map(|key| self.primary.get(key))
                    .collect();
                found.sort_by(|a, b| a.key.cmp(&b.key));
                found.dedup_by(|a, b| a.key == b.key);
                return found;
            }
        }
        self.primary.values().collect()
    }

    /// Entries matching `criteria` whose hydrated fields include every field
    /// the criteria reads, projected to `selection`, in primary key order.
    pub fn read(&self, criteria: Option<&Criteria>, selection: &Selection) -> Vec<Document> {
        let (candidates, paths) = match criteria {
            Some(c) => (self.candidates(c), c.paths()),
            None => (self.primary.values().collect(), Vec::new()),
        };
        let mut found: Vec<&CacheEntry> = candidates
            .into_iter()
            .filter(|entry| paths.iter().all(|p| entry.satisfied.contains_path(p)))
            .filter(|entry| criteria.is_none_or(|c| c.matches_document(&entry.entity)))
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
            .into_iter()
            .map(|entry| selection.project(&entry.entity))
            .collect()
    }

    pub fn clear(&mut self) {
        self.primary.clear();
        for idx in &mut self.indexes {
            idx.map.clear();
            idx.unkeyed.clear();
        }
    }
}
