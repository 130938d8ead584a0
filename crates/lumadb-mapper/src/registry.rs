//! Codec registry
//!
//! Maps entity-kind names to their [`EntityCodec`]. Codecs built by one
//! registry share its kinds and look up nested and related kinds by name
//! when a value is converted, so kinds may nest themselves or each other.

use std::collections::HashMap;

use tracing::{debug, info};

use lumadb_common::config::MapperConfig;
use lumadb_common::error::{MappingError, SchemaError};

use crate::entity::EntityCodec;
use crate::hooks::{CodecContext, MapperHooks};
use crate::key::DEFAULT_SEPARATOR;
use crate::native::Record;
use crate::schema::EntitySchema;
use crate::wire::Item;

/// Registry of entity codecs
pub struct CodecRegistry {
    codecs: HashMap<String, EntityCodec>,
    /// Kinds in registration order
    kinds: Vec<String>,
}

impl CodecRegistry {
    pub fn builder() -> CodecRegistryBuilder {
        CodecRegistryBuilder::default()
    }

    /// Get a codec by kind
    pub fn get(&self, kind: &str) -> Option<EntityCodec> {
        self.codecs.get(kind).cloned()
    }

    /// Get a codec by kind, failing for unregistered kinds
    pub fn codec(&self, kind: &str) -> Result<&EntityCodec, MappingError> {
        self.codecs
            .get(kind)
            .ok_or_else(|| MappingError::UnknownEntityKind(kind.to_string()))
    }

    /// Registered kinds in registration order
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// First registered kind whose discriminator matches the item.
    ///
    /// Kinds without a discriminator never claim an item here.
    pub fn resolve(&self, item: &Item) -> Option<&EntityCodec> {
        self.kinds
            .iter()
            .filter_map(|kind| self.codecs.get(kind))
            .find(|codec| codec.discriminator().is_some_and(|d| d.matches(item)))
    }

    /// Decode an item of unknown kind.
    pub async fn decode(&self, item: &Item, ctx: &CodecContext) -> Result<Record, MappingError> {
        let codec = self.resolve(item).ok_or_else(|| {
            MappingError::UnknownEntityKind("no registered discriminator matches the item".to_string())
        })?;
        codec.from_item(item, ctx).await
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("kinds", &self.kinds)
            .finish()
    }
}

/// Collects schemas and collaborators, then builds every codec at once.
#[derive(Debug)]
pub struct CodecRegistryBuilder {
    schemas: Vec<EntitySchema>,
    hooks: MapperHooks,
    key_separator: String,
}

impl Default for CodecRegistryBuilder {
    fn default() -> Self {
        Self {
            schemas: Vec::new(),
            hooks: MapperHooks::default(),
            key_separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl CodecRegistryBuilder {
    #[must_use]
    pub fn register(mut self, schema: EntitySchema) -> Self {
        self.schemas.push(schema);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: MapperHooks) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn key_separator(mut self, separator: impl Into<String>) -> Self {
        self.key_separator = separator.into();
        self
    }

    /// Apply the `[keys]` section
    #[must_use]
    pub fn config(self, config: &MapperConfig) -> Self {
        self.key_separator(config.keys.separator.clone())
    }

    pub fn build(self) -> Result<CodecRegistry, SchemaError> {
        let built = EntityCodec::build_all(self.schemas, self.hooks, &self.key_separator)?;

        let mut codecs = HashMap::with_capacity(built.len());
        let mut kinds = Vec::with_capacity(built.len());
        for codec in built {
            debug!(kind = %codec.kind(), "Built entity codec");
            kinds.push(codec.kind().to_string());
            codecs.insert(codec.kind().to_string(), codec);
        }

        info!(kinds = kinds.len(), "Codec registry ready");
        Ok(CodecRegistry { codecs, kinds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::discriminator::DiscriminatorSpec;
    use crate::hooks::InMemoryBlobStore;
    use crate::native::{NativeType, NativeValue};
    use crate::schema::PropertyDescriptor;
    use crate::wire::AttributeValue;

    fn address() -> EntitySchema {
        EntitySchema::builder("Address")
            .property(PropertyDescriptor::new("city", NativeType::String))
            .property(PropertyDescriptor::new("zip", NativeType::String))
            .build()
            .unwrap()
    }

    fn customer() -> EntitySchema {
        EntitySchema::builder("Customer")
            .table("main")
            .property(PropertyDescriptor::new("id", NativeType::String).partition_key().attribute("pk"))
            .property(PropertyDescriptor::new("home", NativeType::entity("Address")))
            .property(PropertyDescriptor::new("others", NativeType::list(NativeType::entity("Address"))))
            .discriminator(DiscriminatorSpec::from_pattern("pk", "CUSTOMER#*"))
            .build()
            .unwrap()
    }

    fn order() -> EntitySchema {
        EntitySchema::builder("Order")
            .table("main")
            .property(PropertyDescriptor::new("id", NativeType::String).partition_key().attribute("pk"))
            .discriminator(DiscriminatorSpec::from_pattern("pk", "ORDER#*"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_nested_entities_round_trip() {
        let registry = CodecRegistry::builder()
            .register(customer())
            .register(address())
            .build()
            .unwrap();
        let codec = registry.codec("Customer").unwrap();

        let home = Record::new("Address").with("city", "Lagos").with("zip", "100001");
        let other = Record::new("Address").with("city", "Abuja");
        let record = Record::new("Customer")
            .with("id", "CUSTOMER#1")
            .with("home", home)
            .with("others", NativeValue::List(vec![other.into()]));

        let ctx = CodecContext::new();
        let item = codec.to_item(&record, &ctx).await.unwrap();
        let home_item = item["home"].as_m().unwrap();
        assert_eq!(home_item["city"], AttributeValue::S("Lagos".into()));
        assert!(matches!(item["others"], AttributeValue::L(ref l) if l.len() == 1));

        assert_eq!(codec.from_item(&item, &ctx).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_resolve_by_discriminator() {
        let registry = CodecRegistry::builder()
            .register(address())
            .register(customer())
            .register(order())
            .build()
            .unwrap();
        assert_eq!(registry.kinds().collect::<Vec<_>>(), vec!["Address", "Customer", "Order"]);

        let item = Item::from([("pk".to_string(), AttributeValue::S("ORDER#9".into()))]);
        assert_eq!(registry.resolve(&item).unwrap().kind(), "Order");

        let record = registry.decode(&item, &CodecContext::new()).await.unwrap();
        assert_eq!(record.kind(), "Order");

        let stray = Item::from([("pk".to_string(), AttributeValue::S("INVOICE#1".into()))]);
        assert!(registry.resolve(&stray).is_none());
        assert!(registry.decode(&stray, &CodecContext::new()).await.is_err());
    }

    #[test]
    fn test_unknown_and_duplicate_kinds() {
        let err = CodecRegistry::builder().register(customer()).build().unwrap_err();
        assert!(matches!(err, SchemaError::UnknownEntityKind { ref kind, .. } if kind == "Address"));

        let err = CodecRegistry::builder()
            .register(order())
            .register(order())
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateEntityKind("Order".into()));
    }

    #[tokio::test]
    async fn test_mutually_nested_kinds() {
        let node = EntitySchema::builder("Node")
            .property(PropertyDescriptor::new("name", NativeType::String))
            .property(PropertyDescriptor::new("child", NativeType::entity("Leaf")))
            .build()
            .unwrap();
        let leaf = EntitySchema::builder("Leaf")
            .property(PropertyDescriptor::new("weight", NativeType::Integer))
            .property(PropertyDescriptor::new("parent", NativeType::entity("Node")))
            .build()
            .unwrap();
        let registry = CodecRegistry::builder()
            .register(node)
            .register(leaf)
            .build()
            .unwrap();
        let codec = registry.get("Node").unwrap();

        let inner = Record::new("Node").with("name", "inner");
        let record = Record::new("Node")
            .with("name", "root")
            .with("child", Record::new("Leaf").with("weight", 3i64).with("parent", inner));

        let ctx = CodecContext::new();
        let item = codec.to_item(&record, &ctx).await.unwrap();
        let child = item["child"].as_m().unwrap();
        assert_eq!(child["weight"], AttributeValue::N("3".into()));
        assert!(child["parent"].as_m().is_some());
        assert_eq!(codec.from_item(&item, &ctx).await.unwrap(), record);
    }

    #[test]
    fn test_async_property_in_nested_kind_rejected() {
        let attachment = EntitySchema::builder("Address")
            .property(PropertyDescriptor::new("scan", NativeType::Bytes).blob_reference(None))
            .build()
            .unwrap();
        let err = CodecRegistry::builder()
            .register(customer())
            .register(attachment)
            .hooks(MapperHooks::new().with_blob_store(Arc::new(InMemoryBlobStore::new())))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::AsyncPropertyInNestedEntity { ref property, .. } if property == "scan"
        ));
    }

    #[test]
    fn test_config_separator() {
        let mut config = MapperConfig::default();
        config.keys.separator = "|".into();
        let schema = EntitySchema::builder("Tenant")
            .table("main")
            .property(PropertyDescriptor::new("id", NativeType::String).partition_key().key_prefix("T"))
            .build()
            .unwrap();
        let registry = CodecRegistry::builder().config(&config).register(schema).build().unwrap();
        let key = registry
            .codec("Tenant")
            .unwrap()
            .primary_key(&Record::new("Tenant").with("id", "acme"))
            .unwrap();
        assert_eq!(key.partition, "T|acme");
    }
}
