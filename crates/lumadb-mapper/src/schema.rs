//! Schema model
//!
//! An [`EntitySchema`] is the normalized description of one entity kind:
//! its properties with their key roles and annotations, secondary indexes,
//! discriminator and relationships. Schemas are built once, validated, and
//! never mutated by the codec.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use lumadb_common::error::SchemaError;

use crate::format::{check_date_template, check_number_template};
use crate::native::NativeType;

pub use crate::discriminator::{DiscriminatorSpec, MatchStrategy};
pub use crate::format::DateTimeKind;
pub use crate::key::KeyFormat;
pub use crate::relationship::RelationshipSpec;

fn default_true() -> bool {
    true
}

/// Role of a property in the table key or an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    PartitionKey,
    SortKey,
}

/// Membership of a property in a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMembership {
    pub index: String,
    pub role: KeyRole,
}

/// Property bytes live in external blob storage; the item holds a reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobReferenceSpec {
    /// Prefix handed to the blob store when naming the blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

/// Sensitivity and encryption of a property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySpec {
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub encrypted: bool,
    /// How long a decrypted value may be served from cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
}

/// One property of an entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    /// Wire attribute name
    pub attribute: String,
    pub native_type: NativeType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<KeyRole>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexMembership>,
    /// Culture-invariant format template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_format: Option<KeyFormat>,
    #[serde(default)]
    pub date_kind: DateTimeKind,
    #[serde(default)]
    pub time_to_live: bool,
    #[serde(default)]
    pub json_blob: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_reference: Option<BlobReferenceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecuritySpec>,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, native_type: NativeType) -> Self {
        let name = name.into();
        Self {
            attribute: name.clone(),
            name,
            native_type,
            nullable: true,
            role: None,
            indexes: Vec::new(),
            format: None,
            key_format: None,
            date_kind: DateTimeKind::default(),
            time_to_live: false,
            json_blob: false,
            blob_reference: None,
            security: None,
        }
    }

    #[must_use]
    pub fn partition_key(mut self) -> Self {
        self.role = Some(KeyRole::PartitionKey);
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn sort_key(mut self) -> Self {
        self.role = Some(KeyRole::SortKey);
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = attribute.into();
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    #[must_use]
    pub fn key_format(mut self, key_format: KeyFormat) -> Self {
        self.key_format = Some(key_format);
        self
    }

    /// Shorthand for a `prefix#value` key format
    #[must_use]
    pub fn key_prefix(self, prefix: impl Into<String>) -> Self {
        self.key_format(KeyFormat::prefixed(prefix))
    }

    #[must_use]
    pub fn date_kind(mut self, kind: DateTimeKind) -> Self {
        self.date_kind = kind;
        self
    }

    #[must_use]
    pub fn time_to_live(mut self) -> Self {
        self.time_to_live = true;
        self
    }

    #[must_use]
    pub fn json_blob(mut self) -> Self {
        self.json_blob = true;
        self
    }

    #[must_use]
    pub fn blob_reference(mut self, key_prefix: Option<&str>) -> Self {
        self.blob_reference = Some(BlobReferenceSpec {
            key_prefix: key_prefix.map(String::from),
        });
        self
    }

    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.security.get_or_insert_with(SecuritySpec::default).sensitive = true;
        self
    }

    /// Encrypt the value; `cache_ttl` bounds how long decryptions are cached
    #[must_use]
    pub fn encrypted(mut self, cache_ttl: Option<Duration>) -> Self {
        let security = self.security.get_or_insert_with(SecuritySpec::default);
        security.encrypted = true;
        security.cache_ttl_secs = cache_ttl.map(|ttl| ttl.as_secs());
        self
    }

    #[must_use]
    pub fn index_partition_key(mut self, index: impl Into<String>) -> Self {
        self.indexes.push(IndexMembership {
            index: index.into(),
            role: KeyRole::PartitionKey,
        });
        self
    }

    #[must_use]
    pub fn index_sort_key(mut self, index: impl Into<String>) -> Self {
        self.indexes.push(IndexMembership {
            index: index.into(),
            role: KeyRole::SortKey,
        });
        self
    }

    /// Part of the table key or of any index key
    #[must_use]
    pub fn is_key(&self) -> bool {
        self.role.is_some() || !self.indexes.is_empty()
    }

    /// Needs a [`crate::key::KeyBuilder`]
    #[must_use]
    pub fn is_key_bearing(&self) -> bool {
        self.is_key() || self.key_format.is_some()
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.security.as_ref().is_some_and(|s| s.encrypted)
    }

    /// Sensitive properties are redacted from logs; encrypted ones always are
    #[must_use]
    pub fn is_sensitive(&self) -> bool {
        self.security
            .as_ref()
            .is_some_and(|s| s.sensitive || s.encrypted)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.security
            .as_ref()
            .and_then(|s| s.cache_ttl_secs)
            .map(Duration::from_secs)
    }

    /// Conversion suspends on an async collaborator
    #[must_use]
    pub fn needs_async_hook(&self) -> bool {
        self.blob_reference.is_some() || self.is_encrypted()
    }

    /// Conversion calls the injected JSON serializer
    #[must_use]
    pub fn needs_serializer(&self) -> bool {
        self.json_blob || contains_json(&self.native_type)
    }

    fn annotations(&self) -> Vec<&'static str> {
        let mut annotations = Vec::new();
        if self.is_key() {
            annotations.push("key");
        }
        if self.time_to_live {
            annotations.push("time_to_live");
        }
        if self.json_blob {
            annotations.push("json_blob");
        }
        if self.blob_reference.is_some() {
            annotations.push("blob_reference");
        }
        if self.is_encrypted() {
            annotations.push("encrypted");
        }
        annotations
    }
}

fn contains_json(ty: &NativeType) -> bool {
    match ty {
        NativeType::Json => true,
        NativeType::List(inner) | NativeType::Set(inner) | NativeType::Map(inner) => {
            contains_json(inner)
        }
        _ => false,
    }
}

fn is_scalar(ty: &NativeType) -> bool {
    !ty.is_collection() && !matches!(ty, NativeType::Entity(_) | NativeType::Json)
}

fn is_set_element(ty: &NativeType) -> bool {
    matches!(
        ty,
        NativeType::String
            | NativeType::Integer
            | NativeType::Unsigned
            | NativeType::Float
            | NativeType::Bytes
            | NativeType::DateTime
            | NativeType::Uuid
    )
}

/// Annotation pairs that cannot share a property.
const INCOMPATIBLE: &[(&str, &str)] = &[
    ("time_to_live", "json_blob"),
    ("time_to_live", "blob_reference"),
    ("json_blob", "blob_reference"),
    ("key", "time_to_live"),
    ("key", "json_blob"),
    ("key", "blob_reference"),
    ("encrypted", "key"),
    ("encrypted", "time_to_live"),
    ("encrypted", "json_blob"),
    ("encrypted", "blob_reference"),
];

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub partition_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
    /// Key template applied to the index partition key, e.g. `STATUS_{0}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_format: Option<String>,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
            key_format: None,
        }
    }

    #[must_use]
    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    #[must_use]
    pub fn with_key_format(mut self, template: impl Into<String>) -> Self {
        self.key_format = Some(template.into());
        self
    }
}

/// Normalized description of one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub kind: String,
    /// Physical table; `None` for kinds that only ever appear nested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub properties: Vec<PropertyDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<DiscriminatorSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<RelationshipSpec>,
    #[serde(default)]
    pub multi_item: bool,
}

impl EntitySchema {
    pub fn builder(kind: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            schema: EntitySchema {
                kind: kind.into(),
                table: None,
                properties: Vec::new(),
                indexes: Vec::new(),
                discriminator: None,
                relationships: Vec::new(),
                multi_item: false,
            },
        }
    }

    /// Parse a schema handed over as JSON and prepare it.
    pub fn from_json(json: &str) -> Result<Self, lumadb_common::Error> {
        let schema: EntitySchema = serde_json::from_str(json)?;
        Ok(schema.prepare()?)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn partition_key(&self) -> Option<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|p| p.role == Some(KeyRole::PartitionKey))
    }

    pub fn sort_key(&self) -> Option<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|p| p.role == Some(KeyRole::SortKey))
    }

    pub fn index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn relationship(&self, property: &str) -> Option<&RelationshipSpec> {
        self.relationships.iter().find(|r| r.property == property)
    }

    /// Properties converted from the owning item itself
    pub fn direct_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties
            .iter()
            .filter(|p| self.relationship(&p.name).is_none())
    }

    /// Kinds converted as nested maps by direct properties
    pub fn nested_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self
            .direct_properties()
            .flat_map(|p| p.native_type.entity_kinds())
            .collect();
        kinds.dedup();
        kinds
    }

    /// Kinds decoded from related items
    pub fn related_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self
            .relationships
            .iter()
            .map(|r| r.related_kind.as_str())
            .collect();
        kinds.dedup();
        kinds
    }

    /// Merge index memberships with index descriptors, then validate.
    pub fn prepare(mut self) -> Result<Self, SchemaError> {
        self.merge_indexes()?;
        self.validate()?;
        Ok(self)
    }

    fn merge_indexes(&mut self) -> Result<(), SchemaError> {
        let kind = self.kind.clone();
        let known: HashSet<String> = self.properties.iter().map(|p| p.name.clone()).collect();

        for index in &self.indexes {
            let referenced = std::iter::once(&index.partition_key).chain(index.sort_key.as_ref());
            for property in referenced {
                if !known.contains(property) {
                    return Err(SchemaError::UnknownIndexProperty {
                        entity_kind: kind.clone(),
                        index: index.name.clone(),
                        property: property.clone(),
                    });
                }
            }
        }

        let mut declared: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut note = |index: &str, role: KeyRole, property: &str| -> Result<(), SchemaError> {
            if !declared.contains_key(index) {
                order.push(index.to_string());
            }
            let slot = declared.entry(index.to_string()).or_default();
            let target = match role {
                KeyRole::PartitionKey => &mut slot.0,
                KeyRole::SortKey => &mut slot.1,
            };
            if let Some(existing) = target.as_ref().filter(|e| e.as_str() != property) {
                let properties = vec![existing.clone(), property.to_string()];
                let entity_kind = format!("{}.{}", kind, index);
                return Err(match role {
                    KeyRole::PartitionKey => SchemaError::MultiplePartitionKeys {
                        entity_kind,
                        properties,
                    },
                    KeyRole::SortKey => SchemaError::MultipleSortKeys {
                        entity_kind,
                        properties,
                    },
                });
            }
            *target = Some(property.to_string());
            Ok(())
        };

        for index in &self.indexes {
            note(&index.name, KeyRole::PartitionKey, &index.partition_key)?;
            if let Some(sort_key) = &index.sort_key {
                note(&index.name, KeyRole::SortKey, sort_key)?;
            }
        }
        for property in &self.properties {
            for membership in &property.indexes {
                note(&membership.index, membership.role, &property.name)?;
            }
        }

        let mut templates: HashMap<String, Option<String>> = self
            .indexes
            .iter()
            .map(|i| (i.name.clone(), i.key_format.clone()))
            .collect();

        let mut merged = Vec::with_capacity(order.len());
        for name in order {
            let (partition_key, sort_key) = declared.remove(&name).unwrap_or_default();
            let Some(partition_key) = partition_key else {
                return Err(SchemaError::IndexSortKeyWithoutPartitionKey {
                    entity_kind: self.kind.clone(),
                    index: name,
                });
            };
            merged.push(IndexDescriptor {
                key_format: templates.remove(&name).flatten(),
                name,
                partition_key,
                sort_key,
            });
        }

        for index in &merged {
            let pk = &index.partition_key;
            let sk = index.sort_key.as_deref();
            for property in &mut self.properties {
                let role = if &property.name == pk {
                    KeyRole::PartitionKey
                } else if Some(property.name.as_str()) == sk {
                    KeyRole::SortKey
                } else {
                    continue;
                };
                let membership = IndexMembership {
                    index: index.name.clone(),
                    role,
                };
                if !property.indexes.contains(&membership) {
                    property.indexes.push(membership);
                }
            }
        }

        self.indexes = merged;
        Ok(())
    }

    /// Check every structural invariant of the schema.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let kind = &self.kind;
        if kind.is_empty() {
            return Err(SchemaError::EmptyName {
                what: "entity kind".to_string(),
            });
        }

        let mut names = HashSet::new();
        let mut attributes = HashSet::new();
        for property in &self.properties {
            if property.name.is_empty() || property.attribute.is_empty() {
                return Err(SchemaError::EmptyName {
                    what: format!("property of '{}'", kind),
                });
            }
            if !names.insert(property.name.as_str()) {
                return Err(SchemaError::DuplicateProperty {
                    entity_kind: kind.clone(),
                    property: property.name.clone(),
                });
            }
            if !attributes.insert(property.attribute.as_str()) {
                return Err(SchemaError::DuplicateAttribute {
                    entity_kind: kind.clone(),
                    attribute: property.attribute.clone(),
                });
            }
        }

        self.validate_keys()?;
        for property in &self.properties {
            self.validate_property(property)?;
        }

        let ttl: Vec<String> = self
            .properties
            .iter()
            .filter(|p| p.time_to_live)
            .map(|p| p.name.clone())
            .collect();
        if ttl.len() > 1 {
            return Err(SchemaError::MultipleTimeToLive {
                entity_kind: kind.clone(),
                properties: ttl,
            });
        }

        for index in &self.indexes {
            if index.sort_key.is_some() && index.partition_key.is_empty() {
                return Err(SchemaError::IndexSortKeyWithoutPartitionKey {
                    entity_kind: kind.clone(),
                    index: index.name.clone(),
                });
            }
        }

        if let Some(discriminator) = &self.discriminator {
            discriminator.validate()?;
        }

        self.validate_relationships()
    }

    fn validate_keys(&self) -> Result<(), SchemaError> {
        let with_role = |role: KeyRole| -> Vec<String> {
            self.properties
                .iter()
                .filter(|p| p.role == Some(role))
                .map(|p| p.name.clone())
                .collect()
        };

        let partition = with_role(KeyRole::PartitionKey);
        if partition.len() > 1 {
            return Err(SchemaError::MultiplePartitionKeys {
                entity_kind: self.kind.clone(),
                properties: partition,
            });
        }
        if partition.is_empty() && self.table.is_some() {
            return Err(SchemaError::MissingPartitionKey {
                entity_kind: self.kind.clone(),
            });
        }

        let sort = with_role(KeyRole::SortKey);
        if sort.len() > 1 {
            return Err(SchemaError::MultipleSortKeys {
                entity_kind: self.kind.clone(),
                properties: sort,
            });
        }
        Ok(())
    }

    fn validate_property(&self, property: &PropertyDescriptor) -> Result<(), SchemaError> {
        let invalid = |annotation: &str| SchemaError::InvalidAnnotationType {
            entity_kind: self.kind.clone(),
            property: property.name.clone(),
            annotation: annotation.to_string(),
            native_type: property.native_type.to_string(),
        };

        let annotations = property.annotations();
        let clash = INCOMPATIBLE
            .iter()
            .any(|(a, b)| annotations.contains(a) && annotations.contains(b));
        if clash {
            return Err(SchemaError::IncompatibleAnnotations {
                entity_kind: self.kind.clone(),
                property: property.name.clone(),
                annotations: annotations.into_iter().map(String::from).collect(),
            });
        }

        let ty = &property.native_type;
        if property.time_to_live
            && !matches!(
                ty,
                NativeType::DateTime | NativeType::Integer | NativeType::Unsigned
            )
        {
            return Err(invalid("time_to_live"));
        }
        if property.is_key() && !is_scalar(ty) {
            return Err(invalid("key"));
        }
        if property.is_encrypted() && !is_scalar(ty) {
            return Err(invalid("encrypted"));
        }
        if property.blob_reference.is_some() && !is_scalar(ty) {
            return Err(invalid("blob_reference"));
        }
        if property.json_blob && !ty.entity_kinds().is_empty() {
            return Err(invalid("json_blob"));
        }
        if let Some(key_format) = &property.key_format {
            if !is_scalar(ty) || *ty == NativeType::Bytes {
                return Err(invalid("key_format"));
            }
            key_format.validate()?;
        }
        if let NativeType::Set(element) = ty {
            if !is_set_element(element) {
                return Err(invalid("set"));
            }
        }
        if let Some(format) = &property.format {
            let checked = match ty {
                NativeType::DateTime => check_date_template(format),
                NativeType::Integer | NativeType::Unsigned | NativeType::Float => {
                    check_number_template(format)
                }
                _ => Ok(()),
            };
            checked.map_err(|e| invalid(&format!("format ({})", e)))?;
        }
        Ok(())
    }

    fn validate_relationships(&self) -> Result<(), SchemaError> {
        if self.relationships.is_empty() {
            return Ok(());
        }
        let Some(sort_key) = self.sort_key() else {
            return Err(SchemaError::RelationshipsWithoutSortKey {
                entity_kind: self.kind.clone(),
            });
        };
        let marked = sort_key.key_format.as_ref().is_some_and(KeyFormat::marks_keys);
        if self.discriminator.is_none() && !marked {
            return Err(SchemaError::UnmarkedOwningItem {
                entity_kind: self.kind.clone(),
            });
        }

        for (position, relationship) in self.relationships.iter().enumerate() {
            let property = self.property(&relationship.property).ok_or_else(|| {
                SchemaError::UnknownRelationshipProperty {
                    entity_kind: self.kind.clone(),
                    property: relationship.property.clone(),
                }
            })?;

            let expected = NativeType::entity(relationship.related_kind.clone());
            let expected = if relationship.collection {
                NativeType::list(expected)
            } else {
                expected
            };
            if property.native_type != expected {
                return Err(SchemaError::InvalidAnnotationType {
                    entity_kind: self.kind.clone(),
                    property: property.name.clone(),
                    annotation: "relationship".to_string(),
                    native_type: property.native_type.to_string(),
                });
            }

            for earlier in &self.relationships[..position] {
                if earlier.overlaps(relationship) {
                    warn!(
                        kind = %self.kind,
                        first = %earlier.property,
                        second = %relationship.property,
                        "Relationship patterns may claim the same items; the first declared wins"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Builder for [`EntitySchema`].
#[derive(Debug, Clone)]
pub struct EntitySchemaBuilder {
    schema: EntitySchema,
}

impl EntitySchemaBuilder {
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.schema.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.schema.properties.push(property);
        self
    }

    #[must_use]
    pub fn index(mut self, index: IndexDescriptor) -> Self {
        self.schema.indexes.push(index);
        self
    }

    #[must_use]
    pub fn discriminator(mut self, discriminator: DiscriminatorSpec) -> Self {
        self.schema.discriminator = Some(discriminator);
        self
    }

    #[must_use]
    pub fn relationship(mut self, relationship: RelationshipSpec) -> Self {
        self.schema.relationships.push(relationship);
        self.schema.multi_item = true;
        self
    }

    #[must_use]
    pub fn multi_item(mut self, multi_item: bool) -> Self {
        self.schema.multi_item = multi_item;
        self
    }

    pub fn build(self) -> Result<EntitySchema, SchemaError> {
        self.schema.prepare()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> EntitySchemaBuilder {
        EntitySchema::builder("User")
            .table("main")
            .property(PropertyDescriptor::new("id", NativeType::String).partition_key().attribute("pk"))
    }

    #[test]
    fn test_minimal_schema() {
        let schema = base().build().unwrap();
        assert_eq!(schema.partition_key().unwrap().attribute, "pk");
        assert!(schema.sort_key().is_none());
        assert!(!schema.partition_key().unwrap().nullable);
    }

    #[test]
    fn test_missing_partition_key() {
        let err = EntitySchema::builder("User")
            .table("main")
            .property(PropertyDescriptor::new("name", NativeType::String))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingPartitionKey { .. }));

        let nested = EntitySchema::builder("Address")
            .property(PropertyDescriptor::new("city", NativeType::String))
            .build();
        assert!(nested.is_ok());
    }

    #[test]
    fn test_multiple_keys() {
        let err = base()
            .property(PropertyDescriptor::new("other", NativeType::String).partition_key())
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::MultiplePartitionKeys { .. }));

        let err = base()
            .property(PropertyDescriptor::new("a", NativeType::String).sort_key())
            .property(PropertyDescriptor::new("b", NativeType::String).sort_key())
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::MultipleSortKeys { .. }));
    }

    #[test]
    fn test_duplicate_attribute() {
        let err = base()
            .property(PropertyDescriptor::new("name", NativeType::String).attribute("pk"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::DuplicateAttribute { ref attribute, .. } if attribute == "pk"
        ));
    }

    #[test]
    fn test_incompatible_annotations() {
        let err = base()
            .property(
                PropertyDescriptor::new("expires", NativeType::DateTime)
                    .time_to_live()
                    .json_blob(),
            )
            .build()
            .unwrap_err();
        match err {
            SchemaError::IncompatibleAnnotations { annotations, .. } => {
                assert_eq!(annotations, vec!["time_to_live", "json_blob"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_multiple_ttl() {
        let err = base()
            .property(PropertyDescriptor::new("a", NativeType::DateTime).time_to_live())
            .property(PropertyDescriptor::new("b", NativeType::Integer).time_to_live())
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::MultipleTimeToLive { .. }));
    }

    #[test]
    fn test_ttl_type() {
        let err = base()
            .property(PropertyDescriptor::new("a", NativeType::String).time_to_live())
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidAnnotationType { .. }));
    }

    #[test]
    fn test_encrypted_key_rejected() {
        let err = EntitySchema::builder("User")
            .table("main")
            .property(
                PropertyDescriptor::new("id", NativeType::String)
                    .partition_key()
                    .encrypted(None),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::IncompatibleAnnotations { .. }));
    }

    #[test]
    fn test_index_sort_without_partition() {
        let err = base()
            .property(PropertyDescriptor::new("created", NativeType::DateTime).index_sort_key("by_created"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::IndexSortKeyWithoutPartitionKey { ref index, .. } if index == "by_created"
        ));
    }

    #[test]
    fn test_index_merge() {
        let schema = base()
            .property(PropertyDescriptor::new("status", NativeType::String))
            .property(PropertyDescriptor::new("created", NativeType::DateTime).index_sort_key("by_status"))
            .index(IndexDescriptor::new("by_status", "status").with_key_format("STATUS_{0}"))
            .build()
            .unwrap();

        let index = schema.index("by_status").unwrap();
        assert_eq!(index.partition_key, "status");
        assert_eq!(index.sort_key.as_deref(), Some("created"));

        assert_eq!(index.key_format.as_deref(), Some("STATUS_{0}"));

        let status = schema.property("status").unwrap();
        assert!(status.is_key());
        assert!(status.key_format.is_none());

        let again = schema.clone().prepare().unwrap();
        assert_eq!(again, schema);
    }

    #[test]
    fn test_unknown_index_property() {
        let err = base()
            .index(IndexDescriptor::new("by_missing", "missing"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownIndexProperty { .. }));
    }

    #[test]
    fn test_relationship_validation() {
        let err = base()
            .property(PropertyDescriptor::new("audit", NativeType::list(NativeType::entity("Audit"))))
            .relationship(RelationshipSpec::many("audit", "audit#*", "Audit"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::RelationshipsWithoutSortKey { .. }));

        let err = base()
            .property(PropertyDescriptor::new("sk", NativeType::String).sort_key())
            .property(PropertyDescriptor::new("audit", NativeType::list(NativeType::entity("Audit"))))
            .relationship(RelationshipSpec::many("audit", "audit#*", "Audit"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnmarkedOwningItem { ref entity_kind } if entity_kind == "User"));

        let tagged = base()
            .property(PropertyDescriptor::new("sk", NativeType::String).sort_key())
            .property(PropertyDescriptor::new("audit", NativeType::list(NativeType::entity("Audit"))))
            .relationship(RelationshipSpec::many("audit", "audit#*", "Audit"))
            .discriminator(DiscriminatorSpec::exact("type", "USER"))
            .build()
            .unwrap();
        assert!(tagged.multi_item);

        let with_sk = || {
            base().property(
                PropertyDescriptor::new("sk", NativeType::String)
                    .sort_key()
                    .key_prefix("PROFILE"),
            )
        };

        let err = with_sk()
            .relationship(RelationshipSpec::many("audit", "audit#*", "Audit"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownRelationshipProperty { .. }));

        let err = with_sk()
            .property(PropertyDescriptor::new("audit", NativeType::entity("Audit")))
            .relationship(RelationshipSpec::many("audit", "audit#*", "Audit"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidAnnotationType { .. }));

        let ok = with_sk()
            .property(PropertyDescriptor::new("audit", NativeType::list(NativeType::entity("Audit"))))
            .property(PropertyDescriptor::new("first", NativeType::entity("Audit")))
            .relationship(RelationshipSpec::many("audit", "audit#*", "Audit"))
            .relationship(RelationshipSpec::one("first", "audit#1", "Audit"))
            .build()
            .unwrap();
        assert!(ok.multi_item);
        assert_eq!(ok.related_kinds(), vec!["Audit"]);
        assert!(ok.nested_kinds().is_empty());
    }

    #[test]
    fn test_invalid_format_template() {
        let err = base()
            .property(PropertyDescriptor::new("at", NativeType::DateTime).format("%Q"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidAnnotationType { .. }));

        let err = base()
            .property(PropertyDescriptor::new("n", NativeType::Integer).format("Z9"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidAnnotationType { .. }));
    }

    #[test]
    fn test_set_element_type() {
        let err = base()
            .property(PropertyDescriptor::new("flags", NativeType::set(NativeType::Boolean)))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidAnnotationType { .. }));
    }

    #[test]
    fn test_serde_round_trip() {
        let schema = base()
            .property(
                PropertyDescriptor::new("secret", NativeType::String)
                    .encrypted(Some(Duration::from_secs(30))),
            )
            .discriminator(DiscriminatorSpec::exact("type", "USER"))
            .build()
            .unwrap();
        let json = serde_json::to_string(&schema).unwrap();
        let back = EntitySchema::from_json(&json).unwrap();
        assert_eq!(back, schema);
        assert_eq!(
            back.property("secret").unwrap().cache_ttl(),
            Some(Duration::from_secs(30))
        );
    }
}
