use std::collections::{BTreeSet, HashMap};

use quarry_query::{Selected, Selection};

use crate::error::CacheError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    /// Set when the property holds (or references) entities of another schema.
    pub related_schema: Option<String>,
    /// The property holds a list rather than a single value.
    pub is_container: bool,
    pub is_required: bool,
}

/// A secondary lookup path maintained by the entity store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub paths: Vec<String>,
}

/// Describes which schemas exist, how their entities are identified and
/// which fields they carry.
pub trait SchemaCatalog: Send + Sync {
    fn primary_key(&self, schema: &str) -> Option<&[String]>;
    fn property(&self, schema: &str, name: &str) -> Option<&Property>;
    fn properties(&self, schema: &str) -> Option<&[Property]>;
    fn indexes(&self, schema: &str) -> &[IndexDef];
}

#[derive(Debug, Default)]
struct SchemaDef {
    primary_key: Vec<String>,
    properties: Vec<Property>,
    indexes: Vec<IndexDef>,
}

/// In-memory catalog assembled by the host before the workspace starts.
///
/// ```ignore
/// let mut catalog = Catalog::new();
/// catalog
///     .define("product")
///     .primary_key(["id"])
///     .property("name")
///     .relation("owner", "user")
///     .index("by_owner", ["owner.id"]);
/// ```
#[derive(Debug, Default)]
pub struct Catalog {
    schemas: HashMap<String, SchemaDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or continue) defining `schema`.
    pub fn define(&mut self, schema: &str) -> SchemaBuilder<'_> {
        SchemaBuilder {
            def: self.schemas.entry(schema.to_string()).or_default(),
        }
    }
}

pub struct SchemaBuilder<'a> {
    def: &'a mut SchemaDef,
}

impl SchemaBuilder<'_> {
    /// Declare the primary key paths. Their top-level fields become required
    /// properties when not declared otherwise.
    pub fn primary_key<S: AsRef<str>>(self, paths: impl IntoIterator<Item = S>) -> Self {
        self.def.primary_key = paths.into_iter().map(|p| p.as_ref().to_string()).collect();
        let heads: Vec<String> = self
            .def
            .primary_key
            .iter()
            .map(|p| p.split('.').next().unwrap_or(p).to_string())
            .collect();
        heads.into_iter().fold(self, |builder, head| {
            if builder.def.properties.iter().any(|p| p.name == head) {
                builder
            } else {
                builder.push(head, None, false, true)
            }
        })
    }

    pub fn property(self, name: &str) -> Self {
        self.push(name.to_string(), None, false, false)
    }

    pub fn required(self, name: &str) -> Self {
        self.push(name.to_string(), None, false, true)
    }

    /// A single related entity of `schema`.
    pub fn relation(self, name: &str, schema: &str) -> Self {
        self.push(name.to_string(), Some(schema.to_string()), false, false)
    }

    /// A list of related entities of `schema`.
    pub fn relations(self, name: &str, schema: &str) -> Self {
        self.push(name.to_string(), Some(schema.to_string()), true, false)
    }

    pub fn index<S: AsRef<str>>(self, name: &str, paths: impl IntoIterator<Item = S>) -> Self {
        self.def.indexes.push(IndexDef {
            name: name.to_string(),
            paths: paths.into_iter().map(|p| p.as_ref().to_string()).collect(),
        });
        self
    }

    fn push(
        self,
        name: String,
        related_schema: Option<String>,
        is_container: bool,
        is_required: bool,
    ) -> Self {
        self.def.properties.retain(|p| p.name != name);
        self.def.properties.push(Property {
            name,
            related_schema,
            is_container,
            is_required,
        });
        self
    }
}

impl SchemaCatalog for Catalog {
    fn primary_key(&self, schema: &str) -> Option<&[String]> {
        self.schemas
            .get(schema)
            .map(|def| def.primary_key.as_slice())
            .filter(|pk| !pk.is_empty())
    }

    fn property(&self, schema: &str, name: &str) -> Option<&Property> {
        self.schemas
            .get(schema)?
            .properties
            .iter()
            .find(|p| p.name == name)
    }

    fn properties(&self, schema: &str) -> Option<&[Property]> {
        self.schemas.get(schema).map(|def| def.properties.as_slice())
    }

    fn indexes(&self, schema: &str) -> &[IndexDef] {
        self.schemas
            .get(schema)
            .map(|def| def.indexes.as_slice())
            .unwrap_or_default()
    }
}

fn invalid(schema: &str, reason: String) -> CacheError {
    CacheError::InvalidSelection {
        schema: schema.to_string(),
        reason,
    }
}

/// Check that every selected field exists, and that nested selections only
/// descend into relations, recursively against the related schema.
pub fn validate_selection(
    catalog: &dyn SchemaCatalog,
    schema: &str,
    selection: &Selection,
) -> Result<(), CacheError> {
    if catalog.properties(schema).is_none() {
        return Err(CacheError::UnknownSchema(schema.to_string()));
    }
    if selection.is_empty() {
        return Err(invalid(schema, "selection is empty".into()));
    }
    for (field, selected) in selection.iter() {
        let property = catalog
            .property(schema, field)
            .ok_or_else(|| invalid(schema, format!("unknown field {field}")))?;
        if let Selected::Nested(nested) = selected {
            let related = property.related_schema.as_deref().ok_or_else(|| {
                invalid(schema, format!("{field} is not a relation and has no nested fields"))
            })?;
            validate_selection(catalog, related, nested)?;
        }
    }
    Ok(())
}

/// Every declared non-relation property of `schema`.
pub fn default_selection(
    catalog: &dyn SchemaCatalog,
    schema: &str,
) -> Result<Selection, CacheError> {
    let properties = catalog
        .properties(schema)
        .ok_or_else(|| CacheError::UnknownSchema(schema.to_string()))?;
    let selection = Selection::from_paths(
        properties
            .iter()
            .filter(|p| p.related_schema.is_none())
            .map(|p| p.name.as_str()),
    );
    if selection.is_empty() {
        return Err(invalid(schema, "schema declares no plain properties".into()));
    }
    Ok(selection)
}

/// Top-level plain fields every entity of `schema` is declared to hold.
pub fn required_fields(catalog: &dyn SchemaCatalog, schema: &str) -> BTreeSet<String> {
    catalog
        .properties(schema)
        .unwrap_or_default()
        .iter()
        .filter(|p| p.is_required && p.related_schema.is_none())
        .map(|p| p.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .define("product")
            .primary_key(["id"])
            .property("name")
            .property("price")
            .relation("owner", "user")
            .relations("tags", "tag")
            .index("by_price", ["price"]);
        catalog.define("user").primary_key(["id"]).property("name");
        catalog.define("tag").primary_key(["label"]);
        catalog
    }

    #[test]
    fn primary_key_is_declared_as_required_property() {
        let catalog = catalog();
        assert_eq!(catalog.primary_key("product"), Some(&["id".to_string()][..]));
        let id = catalog.property("product", "id").unwrap();
        assert!(id.is_required);
        assert!(id.related_schema.is_none());
    }

    #[test]
    fn relations_know_their_schema() {
        let catalog = catalog();
        let tags = catalog.property("product", "tags").unwrap();
        assert_eq!(tags.related_schema.as_deref(), Some("tag"));
        assert!(tags.is_container);
        assert_eq!(catalog.indexes("product")[0].paths, vec!["price".to_string()]);
        assert!(catalog.indexes("missing").is_empty());
    }

    #[test]
    fn nested_selection_validates_against_related_schema() {
        let catalog = catalog();
        let ok = Selection::from_paths(["name", "owner.name", "tags"]);
        assert!(validate_selection(&catalog, "product", &ok).is_ok());

        let bad = Selection::from_paths(["owner.email"]);
        assert!(matches!(
            validate_selection(&catalog, "product", &bad),
            Err(CacheError::InvalidSelection { schema, .. }) if schema == "user"
        ));
    }

    #[test]
    fn nested_selection_on_scalar_is_rejected() {
        let catalog = catalog();
        let bad = Selection::from_paths(["name.first"]);
        let err = validate_selection(&catalog, "product", &bad).unwrap_err();
        assert!(err.to_string().contains("not a relation"), "{err}");
    }

    #[test]
    fn unknown_schema() {
        let catalog = catalog();
        let sel = Selection::from_paths(["name"]);
        assert_eq!(
            validate_selection(&catalog, "order", &sel),
            Err(CacheError::UnknownSchema("order".into()))
        );
    }

    #[test]
    fn required_fields_include_the_primary_key() {
        let mut catalog = catalog();
        catalog.define("product").required("price");
        assert_eq!(
            required_fields(&catalog, "product"),
            BTreeSet::from(["id".to_string(), "price".to_string()])
        );
        assert_eq!(required_fields(&catalog, "user"), BTreeSet::from(["id".to_string()]));
        assert!(required_fields(&catalog, "order").is_empty());
    }

    #[test]
    fn default_selection_skips_relations() {
        let catalog = catalog();
        assert_eq!(
            default_selection(&catalog, "product").unwrap(),
            Selection::from_paths(["id", "name", "price"])
        );
    }
}
