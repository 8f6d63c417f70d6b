#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bson::{Document, doc};
use quarry_cache::{Catalog, Workspace, WorkspaceConfig};
use quarry_loader_fake::{FakeLoader, generate_product};
use quarry_query::{Criteria, Selection, parse_filter};

pub const PRODUCT: &str = "product";
pub const USER: &str = "user";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog
        .define(PRODUCT)
        .primary_key(["id"])
        .property("name")
        .property("status")
        .property("price")
        .relation("owner", USER)
        .index("by_status", ["status"]);
    catalog
        .define(USER)
        .primary_key(["id"])
        .property("name");
    catalog
}

/// Twelve products (see `generate_product`) and three users, one of which
/// comes back without its primary key.
pub fn loader() -> FakeLoader {
    FakeLoader::new()
        .with_documents(PRODUCT, (0..12).map(generate_product))
        .with_documents(
            USER,
            [
                doc! { "id": 1, "name": "Ann" },
                doc! { "id": 2, "name": "Bob" },
                doc! { "name": "Ghost" },
            ],
        )
}

pub fn slow_loader() -> FakeLoader {
    loader().with_delay(Duration::from_millis(50))
}

/// Three products with status `a`: priced 5, priced 50 and unpriced.
pub fn unpriced_loader() -> FakeLoader {
    FakeLoader::new().with_documents(
        PRODUCT,
        [
            doc! { "id": 1, "price": 5, "status": "a" },
            doc! { "id": 2, "price": 50, "status": "a" },
            doc! { "id": 3, "status": "a" },
        ],
    )
}

pub fn workspace(loader: &Arc<FakeLoader>) -> Workspace {
    workspace_with(catalog(), loader)
}

pub fn workspace_with(catalog: Catalog, loader: &Arc<FakeLoader>) -> Workspace {
    init_tracing();
    Workspace::new(Arc::new(catalog), loader.clone(), WorkspaceConfig::default())
}

pub fn filter(doc: Document) -> Criteria {
    parse_filter(&doc).unwrap()
}

pub fn select(paths: &[&str]) -> Selection {
    Selection::from_paths(paths)
}

pub fn ids(docs: &[Document]) -> Vec<i32> {
    docs.iter().map(|d| d.get_i32("id").unwrap()).collect()
}
