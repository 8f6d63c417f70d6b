#![allow(dead_code)]

use bson::{Document, doc};
use quarry_query::{Criteria, parse_filter};

pub const STATUSES: [&str; 3] = ["active", "snoozed", "rejected"];

/// Every `(price, status)` combination for prices 0..=20, plus, per status,
/// an entity without a price, one with a null price and one whose price is
/// not a number.
pub fn corpus() -> Vec<Document> {
    let mut docs = Vec::new();
    for price in 0..=20_i32 {
        for status in STATUSES {
            docs.push(doc! { "price": price, "status": status });
        }
    }
    for status in STATUSES {
        docs.push(doc! { "status": status });
        docs.push(doc! { "price": null, "status": status });
        docs.push(doc! { "price": "unknown", "status": status });
    }
    docs
}

pub fn filter(doc: Document) -> Criteria {
    parse_filter(&doc).unwrap()
}

/// Filters over the corpus fields. Each field keeps a single value kind.
pub fn filters() -> Vec<Criteria> {
    vec![
        filter(doc! { "price": { "$gte": 5, "$lte": 10 } }),
        filter(doc! { "price": { "$gt": 8 } }),
        filter(doc! { "price": { "$lt": 6 } }),
        filter(doc! { "price": { "$in": [1, 2, 3, 12] } }),
        filter(doc! { "price": { "$nin": [4, 5] } }),
        filter(doc! { "price": { "$ne": 7 } }),
        filter(doc! { "price": 9 }),
        filter(doc! { "status": "active" }),
        filter(doc! { "status": { "$in": ["active", "snoozed"] } }),
        filter(doc! { "status": { "$ne": "rejected" } }),
        filter(doc! { "price": { "$lt": 6 }, "status": "snoozed" }),
        filter(doc! { "price": { "$gte": 3, "$lte": 12 }, "status": { "$ne": "active" } }),
        filter(doc! { "$or": [{ "price": { "$lt": 3 } }, { "status": "rejected" }] }),
        filter(doc! { "$and": [{ "price": { "$gte": 2 } }, { "price": { "$lte": 15 } }] }),
        filter(doc! { "price": { "$gte": 5, "$lte": 10, "$ne": 7 } }),
    ]
}

pub fn count(criteria: &Criteria, docs: &[Document]) -> usize {
    docs.iter().filter(|d| criteria.matches_document(d)).count()
}
