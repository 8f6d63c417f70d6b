mod catalog;
mod config;
mod error;
mod key_map;
mod loader;
mod store;
mod workspace;

pub use catalog::{
    Catalog, IndexDef, Property, SchemaBuilder, SchemaCatalog, default_selection,
    required_fields, validate_selection,
};
pub use config::WorkspaceConfig;
pub use error::{CacheError, LoaderError};
pub use key_map::ComplexKeyMap;
pub use loader::Loader;
pub use store::{CacheEntry, EntityStore, deep_merge};
pub use workspace::{ChangeEvent, Workspace};
