use async_trait::async_trait;
use bson::Document;
use quarry_query::{Criteria, Selection};

use crate::error::LoaderError;

/// Transport that fetches entities from the system of record.
///
/// `criteria: None` asks for every entity of the schema. Returned documents
/// must carry the schema's primary key fields and at least the selected
/// fields; extra fields are kept.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(
        &self,
        schema: &str,
        criteria: Option<&Criteria>,
        selection: &Selection,
    ) -> Result<Vec<Document>, LoaderError>;
}
