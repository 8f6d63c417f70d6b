use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bson::{Document, doc};
use quarry_cache::{Loader, LoaderError};
use quarry_query::{Criteria, Selection};

/// One recorded `load` call.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadCall {
    pub schema: String,
    pub criteria: Option<Criteria>,
    pub selection: Selection,
}

/// In-memory transport over a fixed document set.
///
/// Serves the documents of a schema that match the criteria, projected to
/// the selection. Every call is recorded; failures and latency can be
/// injected.
#[derive(Default)]
pub struct FakeLoader {
    data: HashMap<String, Vec<Document>>,
    delay: Option<Duration>,
    fail_next: AtomicUsize,
    calls: Mutex<Vec<LoadCall>>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(mut self, schema: &str, docs: impl IntoIterator<Item = Document>) -> Self {
        self.data.entry(schema.to_string()).or_default().extend(docs);
        self
    }

    /// Sleep this long inside every load before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `n` loads.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<LoadCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Loader for FakeLoader {
    async fn load(
        &self,
        schema: &str,
        criteria: Option<&Criteria>,
        selection: &Selection,
    ) -> Result<Vec<Document>, LoaderError> {
        self.calls.lock().unwrap().push(LoadCall {
            schema: schema.to_string(),
            criteria: criteria.cloned(),
            selection: selection.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LoaderError::new(format!("injected failure loading {schema}")));
        }

        let docs = self.data.get(schema).map(Vec::as_slice).unwrap_or_default();
        Ok(docs
            .iter()
            .filter(|doc| criteria.is_none_or(|c| c.matches_document(doc)))
            .map(|doc| selection.project(doc))
            .collect())
    }
}

/// A deterministic product document. Prices cycle through 0..=50 in steps
/// of 10; owners cycle through three users.
pub fn generate_product(i: i32) -> Document {
    let statuses = ["active", "archived", "draft"];
    let owners = [(1, "Ann"), (2, "Bob"), (3, "Cy")];
    let (owner_id, owner_name) = owners[i as usize % owners.len()];

    doc! {
        "id": i,
        "name": format!("Product {i}"),
        "status": statuses[i as usize % statuses.len()],
        "price": (i % 6) * 10,
        "owner": { "id": owner_id, "name": owner_name },
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use quarry_query::parse_filter;

    use super::*;

    fn loader() -> FakeLoader {
        FakeLoader::new().with_documents("product", (0..12).map(generate_product))
    }

    #[tokio::test]
    async fn filters_and_projects() {
        let loader = loader();
        let criteria = parse_filter(&doc! { "price": { "$gte": 40 } }).unwrap();
        let docs = loader
            .load("product", Some(&criteria), &Selection::from_paths(["id", "price"]))
            .await
            .unwrap();

        assert_eq!(docs.len(), 4);
        assert!(docs.iter().all(|d| d.len() == 2));
        assert_eq!(docs[0], doc! { "id": 4, "price": 40 });
    }

    #[tokio::test]
    async fn unknown_schema_is_empty() {
        let loader = loader();
        let docs = loader.load("user", None, &Selection::from_paths(["id"])).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn records_calls_and_injects_failures() {
        let loader = loader();
        loader.fail_next(1);
        let sel = Selection::from_paths(["id"]);

        assert!(loader.load("product", None, &sel).await.is_err());
        assert_eq!(loader.load("product", None, &sel).await.unwrap().len(), 12);

        let calls = loader.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].schema, "product");
        assert_eq!(calls[0].criteria, None);
    }

    #[test]
    fn generated_products_are_stable() {
        let doc = generate_product(4);
        assert_eq!(doc.get_i32("id").unwrap(), 4);
        assert_eq!(doc.get_str("status").unwrap(), "archived");
        assert_eq!(doc.get_i32("price").unwrap(), 40);
        assert_eq!(doc.get_document("owner").unwrap().get_str("name").unwrap(), "Bob");
    }
}
