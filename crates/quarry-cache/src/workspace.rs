use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bson::Document;
use futures::future::{BoxFuture, FutureExt, Shared, try_join_all};
use quarry_query::{
    Criteria, Logic, Query, Selection, Value, ValueKind, merge_selections, reduce_query_given,
};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::catalog::{SchemaCatalog, default_selection, required_fields, validate_selection};
use crate::config::WorkspaceConfig;
use crate::error::CacheError;
use crate::loader::Loader;
use crate::store::EntityStore;

/// Emitted on the channel returned by [`Workspace::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A load settled and its entities were merged into the store.
    Merged {
        schema: String,
        keys: Vec<Vec<Value>>,
        query: Query,
    },
    /// Entities and cached queries were dropped; `None` means every schema.
    Cleared { schema: Option<String> },
}

type LoadFuture = Shared<BoxFuture<'static, Result<(), CacheError>>>;

struct PendingOp {
    id: u64,
    query: Query,
    done: LoadFuture,
}

struct CachedQuery {
    key: String,
    query: Query,
}

struct SchemaState {
    store: EntityStore,
    /// Oldest first.
    cached: Vec<CachedQuery>,
    pending: Vec<PendingOp>,
    /// Fields the catalog declares present on every entity.
    required: BTreeSet<String>,
    /// The value kind each filtered path has been compared against so far.
    kinds: BTreeMap<String, ValueKind>,
}

impl SchemaState {
    /// Reject criteria comparing a path against a different kind of value
    /// than the cached and pending queries do. Reduction between the two
    /// is undefined.
    fn check_kinds(&mut self, schema: &str, criteria: &Criteria) -> Result<(), CacheError> {
        let mismatch = |path: String, expected, found| CacheError::KindMismatch {
            schema: schema.to_string(),
            path,
            expected,
            found,
        };
        let found = criteria
            .kinds()
            .map_err(|c| mismatch(c.path, c.expected, c.found))?;
        for (path, &kind) in &found {
            if let Some(&expected) = self.kinds.get(path)
                && expected != kind
            {
                return Err(mismatch(path.clone(), expected, kind));
            }
        }
        self.kinds.extend(found);
        Ok(())
    }

    /// Record that every entity matching `query.criteria` now holds
    /// `query.selection`, folding it into an existing tuple where the union
    /// is still a single tuple.
    fn remember(&mut self, query: Query, max: usize) {
        let key = query.cache_key();
        if self.cached.iter().any(|c| c.key == key) {
            return;
        }
        for existing in &mut self.cached {
            let q = &mut existing.query;
            if q.selection == query.selection {
                let merged = match (&q.criteria, &query.criteria) {
                    (None, _) | (_, None) => Some(None),
                    (Some(a), Some(b)) => match a.merge(b) {
                        Logic::True => Some(None),
                        Logic::Node(c) => Some(Some(c)),
                        Logic::False => None,
                    },
                };
                if let Some(criteria) = merged {
                    q.criteria = criteria;
                    existing.key = q.cache_key();
                    return;
                }
            } else if q.criteria == query.criteria {
                q.selection = merge_selections([&q.selection, &query.selection]);
                existing.key = q.cache_key();
                return;
            }
        }
        self.cached.push(CachedQuery { key, query });
        if self.cached.len() > max {
            let excess = self.cached.len() - max;
            self.cached.drain(..excess);
        }
    }
}

struct Inner {
    catalog: Arc<dyn SchemaCatalog>,
    loader: Arc<dyn Loader>,
    config: WorkspaceConfig,
    state: Mutex<HashMap<String, SchemaState>>,
    changes: broadcast::Sender<ChangeEvent>,
    next_op: AtomicU64,
}

impl Inner {
    /// The state is consistent between statements, so a panic while the
    /// lock was held leaves nothing half-written worth refusing.
    fn state(&self) -> MutexGuard<'_, HashMap<String, SchemaState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Client-side cache of entities loaded through a [`Loader`].
///
/// A request is answered by loading only what earlier requests (settled or
/// still in flight) have not already covered, then reading the local store.
/// Cloning is cheap and shares the cache.
#[derive(Clone)]
pub struct Workspace {
    inner: Arc<Inner>,
}

/// `selection` plus the primary key and every field `criteria` constrains.
fn issued_selection(primary_key: &[String], criteria: Option<&Criteria>, selection: &Selection) -> Selection {
    let mut issued = selection.clone();
    for path in primary_key {
        issued.insert_path(path);
    }
    for path in criteria.map(Criteria::paths).unwrap_or_default() {
        issued.insert_path(&path);
    }
    issued
}

/// Reduce every delta against `have`. Returns whether `have` shortened any.
fn reduce_all(deltas: &mut Vec<Query>, have: &Query, required: &BTreeSet<String>) -> bool {
    let mut overlapped = false;
    let mut next = Vec::with_capacity(deltas.len());
    for delta in deltas.drain(..) {
        match reduce_query_given(&delta, have, required) {
            Some(rest) => {
                overlapped = true;
                next.extend(rest);
            }
            None => next.push(delta),
        }
    }
    *deltas = next;
    overlapped
}

impl Workspace {
    pub fn new(
        catalog: Arc<dyn SchemaCatalog>,
        loader: Arc<dyn Loader>,
        config: WorkspaceConfig,
    ) -> Self {
        let (changes, _) = broadcast::channel(config.change_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                catalog,
                loader,
                config,
                state: Mutex::new(HashMap::new()),
                changes,
                next_op: AtomicU64::new(0),
            }),
        }
    }

    /// Every `schema` entity matching `criteria` (all of them when `None`),
    /// projected to `selection` plus the primary key. A `None` selection
    /// asks for every declared non-relation property.
    ///
    /// Only the part not already cached or being loaded is fetched. If any
    /// load fails the request fails; loads that did settle stay cached.
    /// Dropping the returned future never cancels a load.
    ///
    /// Filtering a path by a different kind of value than earlier requests
    /// did fails with [`CacheError::KindMismatch`] before anything loads.
    pub async fn request(
        &self,
        schema: &str,
        criteria: Option<Criteria>,
        selection: Option<Selection>,
    ) -> Result<Vec<Document>, CacheError> {
        let catalog = &*self.inner.catalog;
        let selection = match selection {
            Some(selection) => {
                validate_selection(catalog, schema, &selection)?;
                selection
            }
            None => default_selection(catalog, schema)?,
        };
        let primary_key = catalog
            .primary_key(schema)
            .ok_or_else(|| CacheError::UnknownSchema(schema.to_string()))?;
        let projection = issued_selection(primary_key, None, &selection);
        let issued = issued_selection(primary_key, criteria.as_ref(), &selection);
        let query = Query::new(schema, criteria, issued);

        let waits = self.plan(&query, primary_key)?;
        try_join_all(waits).await?;

        let state = self.inner.state();
        Ok(state
            .get(schema)
            .map(|s| s.store.read(query.criteria.as_ref(), &projection))
            .unwrap_or_default())
    }

    /// Work out the loads `query` still needs, register them and return
    /// everything the caller has to await. One critical section, so two
    /// overlapping requests never both load the overlap.
    fn plan(&self, query: &Query, primary_key: &[String]) -> Result<Vec<LoadFuture>, CacheError> {
        let catalog = &*self.inner.catalog;
        let mut state = self.inner.state();
        let schema = query.schema.as_str();
        let entry = state.entry(schema.to_string()).or_insert_with(|| SchemaState {
            store: EntityStore::new(schema, primary_key, catalog.indexes(schema)),
            cached: Vec::new(),
            pending: Vec::new(),
            required: required_fields(catalog, schema),
            kinds: BTreeMap::new(),
        });
        if let Some(criteria) = &query.criteria {
            entry.check_kinds(schema, criteria)?;
        }

        let mut deltas = vec![query.clone()];
        for cached in &entry.cached {
            if deltas.is_empty() {
                break;
            }
            if reduce_all(&mut deltas, &cached.query, &entry.required) {
                trace!(schema, key = %cached.key, remaining = deltas.len(), "reduced against cached query");
            }
        }

        let mut waits = Vec::new();
        for op in &entry.pending {
            if deltas.is_empty() {
                break;
            }
            let deltas_before = deltas.len();
            if reduce_all(&mut deltas, &op.query, &entry.required) {
                trace!(schema, op = op.id, deltas_before, remaining = deltas.len(), "coalesced with pending load");
                waits.push(op.done.clone());
            }
        }

        debug!(
            schema,
            deltas = deltas.len(),
            pending = waits.len(),
            "planned request"
        );

        for delta in deltas {
            let query = Query::new(
                schema,
                delta.criteria.clone(),
                issued_selection(primary_key, delta.criteria.as_ref(), &delta.selection),
            );
            let id = self.inner.next_op.fetch_add(1, Ordering::Relaxed);
            let handle = tokio::spawn(run_load(self.inner.clone(), id, query.clone()));
            let done: LoadFuture = async move { handle.await.unwrap_or(Err(CacheError::Aborted)) }
                .boxed()
                .shared();
            entry.pending.push(PendingOp {
                id,
                query,
                done: done.clone(),
            });
            waits.push(done);
        }
        Ok(waits)
    }

    /// Drop cached entities and queries of `schema`, or of every schema.
    /// Loads already in flight still merge when they settle.
    pub fn clear(&self, schema: Option<&str>) {
        {
            let mut state = self.inner.state();
            for (name, entry) in state.iter_mut() {
                if schema.is_none_or(|s| s == name) {
                    entry.store.clear();
                    entry.cached.clear();
                    if entry.pending.is_empty() {
                        entry.kinds.clear();
                    }
                }
            }
        }
        debug!(schema, "cleared cache");
        let _ = self.inner.changes.send(ChangeEvent::Cleared {
            schema: schema.map(str::to_string),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.changes.subscribe()
    }

    /// The cached entity with primary key `key`, as hydrated so far.
    pub fn entity(&self, schema: &str, key: &[Value]) -> Option<Document> {
        let state = self.inner.state();
        state
            .get(schema)?
            .store
            .get(key)
            .map(|entry| entry.entity.clone())
    }

    /// Queries the cache currently knows to be fully loaded, oldest first.
    pub fn cached_queries(&self, schema: &str) -> Vec<Query> {
        let state = self.inner.state();
        state
            .get(schema)
            .map(|s| s.cached.iter().map(|c| c.query.clone()).collect())
            .unwrap_or_default()
    }

    pub fn pending_loads(&self, schema: &str) -> usize {
        let state = self.inner.state();
        state.get(schema).map_or(0, |s| s.pending.len())
    }
}

async fn run_load(inner: Arc<Inner>, id: u64, query: Query) -> Result<(), CacheError> {
    let schema = query.schema.as_str();
    let loaded = inner
        .loader
        .load(schema, query.criteria.as_ref(), &query.selection)
        .await;

    let mut keys = Vec::new();
    let mut failure = None;
    {
        let mut state = inner.state();
        let Some(entry) = state.get_mut(schema) else {
            return Err(CacheError::UnknownSchema(schema.to_string()));
        };
        entry.pending.retain(|op| op.id != id);

        let docs = match loaded {
            Ok(docs) => docs,
            Err(e) => {
                warn!(schema, op = id, error = %e, "load failed");
                return Err(e.into());
            }
        };
        for doc in docs {
            match entry.store.upsert(doc, &query.selection) {
                Ok(key) => keys.push(key),
                Err(e) => {
                    warn!(schema, op = id, error = %e, "dropping loaded entity");
                    failure.get_or_insert(e);
                }
            }
        }
        // An incomplete result says nothing about what the query covers.
        if failure.is_none() {
            entry.remember(query.clone(), inner.config.max_cached_queries);
        }
    }

    debug!(schema, op = id, entities = keys.len(), "merged load");
    let _ = inner.changes.send(ChangeEvent::Merged {
        schema: schema.to_string(),
        keys,
        query: query.clone(),
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Bound;

    use quarry_query::Criterion;

    use super::*;

    fn query(criteria: Option<Criteria>, paths: &[&str]) -> Query {
        Query::new("product", criteria, Selection::from_paths(paths))
    }

    fn price(from: i64, to: i64) -> Criteria {
        Criteria::field("price", Criterion::in_range(from, to))
    }

    fn state() -> SchemaState {
        SchemaState {
            store: EntityStore::new("product", &["id".to_string()], &[]),
            cached: Vec::new(),
            pending: Vec::new(),
            required: BTreeSet::from(["id".to_string()]),
            kinds: BTreeMap::new(),
        }
    }

    #[test]
    fn issued_selection_adds_key_and_filtered_fields() {
        let criteria = Criteria::field("owner.id", Criterion::equals(1));
        let issued = issued_selection(
            &["id".to_string()],
            Some(&criteria),
            &Selection::from_paths(["name"]),
        );
        assert_eq!(issued, Selection::from_paths(["id", "name", "owner.id"]));
    }

    #[test]
    fn remember_merges_same_selection() {
        let mut state = state();
        state.remember(query(Some(price(0, 10)), &["id"]), 8);
        state.remember(query(Some(price(5, 20)), &["id"]), 8);
        assert_eq!(state.cached.len(), 1);
        assert_eq!(state.cached[0].query.criteria, Some(price(0, 20)));
    }

    #[test]
    fn remember_merges_same_criteria() {
        let mut state = state();
        state.remember(query(Some(price(0, 10)), &["id"]), 8);
        state.remember(query(Some(price(0, 10)), &["name"]), 8);
        assert_eq!(state.cached.len(), 1);
        assert_eq!(state.cached[0].query.selection, Selection::from_paths(["id", "name"]));
    }

    #[test]
    fn remember_keeps_ranges_apart_when_their_union_is_unbounded() {
        let mut state = state();
        let at_most = Criteria::field(
            "price",
            Criterion::range(Bound::Unbounded, Bound::Included(Value::Int(10))),
        );
        let above = Criteria::field(
            "price",
            Criterion::range(Bound::Excluded(Value::Int(10)), Bound::Unbounded),
        );
        state.remember(query(Some(at_most.clone()), &["id"]), 8);
        state.remember(query(Some(above.clone()), &["id"]), 8);
        let held: Vec<_> = state.cached.iter().map(|c| c.query.criteria.clone()).collect();
        assert_eq!(held, vec![Some(at_most), Some(above)]);
    }

    #[test]
    fn kinds_must_agree_across_requests() {
        let mut state = state();
        state.check_kinds("product", &price(0, 10)).unwrap();
        state
            .check_kinds("product", &Criteria::field("name", Criterion::equals("a")))
            .unwrap();

        let cheap = Criteria::field("price", Criterion::equals("cheap"));
        assert_eq!(
            state.check_kinds("product", &cheap),
            Err(CacheError::KindMismatch {
                schema: "product".into(),
                path: "price".into(),
                expected: ValueKind::Number,
                found: ValueKind::String,
            })
        );
        assert_eq!(state.kinds.len(), 2);
    }

    #[test]
    fn remember_all_absorbs_criteria() {
        let mut state = state();
        state.remember(query(Some(price(0, 10)), &["id"]), 8);
        state.remember(query(None, &["id"]), 8);
        assert_eq!(state.cached.len(), 1);
        assert_eq!(state.cached[0].query.criteria, None);
    }

    #[test]
    fn remember_evicts_oldest() {
        let mut state = state();
        let name = Criteria::field("name", Criterion::equals("a"));
        state.remember(query(Some(price(0, 10)), &["id"]), 2);
        state.remember(query(Some(name.clone()), &["name"]), 2);
        state.remember(query(Some(price(50, 60)), &["status"]), 2);
        assert_eq!(state.cached.len(), 2);
        assert_eq!(state.cached[0].query.criteria, Some(name));
    }

    #[test]
    fn reduce_all_reports_overlap() {
        let required = BTreeSet::new();
        let mut deltas = vec![query(Some(price(0, 30)), &["id"])];
        assert!(reduce_all(&mut deltas, &query(Some(price(0, 10)), &["id"]), &required));
        assert_eq!(deltas.len(), 1);
        assert!(!reduce_all(&mut deltas, &query(Some(price(100, 200)), &["id"]), &required));
        assert_eq!(deltas.len(), 1);
    }

    struct Empty;

    #[async_trait::async_trait]
    impl Loader for Empty {
        async fn load(
            &self,
            _schema: &str,
            _criteria: Option<&Criteria>,
            _selection: &Selection,
        ) -> Result<Vec<Document>, crate::LoaderError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn state_survives_a_panic_under_the_lock() {
        let ws = Workspace::new(
            Arc::new(crate::Catalog::new()),
            Arc::new(Empty),
            WorkspaceConfig::default(),
        );
        let inner = ws.inner.clone();
        let crashed = std::thread::spawn(move || {
            let _state = inner.state();
            panic!("crash while holding the state");
        })
        .join();
        assert!(crashed.is_err());
        assert!(ws.inner.state.is_poisoned());

        assert_eq!(ws.pending_loads("product"), 0);
        assert!(ws.cached_queries("product").is_empty());
        ws.clear(None);
    }
}
