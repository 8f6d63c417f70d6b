use quarry_query::ValueKind;

/// Failure reported by a [`Loader`](crate::Loader).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct LoaderError(pub String);

impl LoaderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors surfaced by [`Workspace::request`](crate::Workspace::request).
///
/// `Clone` because one pending load's outcome is handed to every caller
/// awaiting it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    #[error("invalid selection for {schema}: {reason}")]
    InvalidSelection { schema: String, reason: String },

    #[error("{schema} entity is missing primary key field {path}")]
    MissingPrimaryKey { schema: String, path: String },

    #[error("{schema}.{path} compared against {found} values, earlier requests used {expected}")]
    KindMismatch {
        schema: String,
        path: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("pending load was aborted before it settled")]
    Aborted,
}
