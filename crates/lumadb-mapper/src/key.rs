//! Key construction
//!
//! A [`KeyBuilder`] turns one key-bearing property value into the string
//! stored in the key attribute. A [`CompositeKeyBuilder`] pairs a partition
//! builder with an optional sort builder for the table or one secondary
//! index. [`EntityKeys`] holds every builder derived from a schema.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use lumadb_common::error::{MappingError, SchemaError};

use crate::format::DateTimeKind;
use crate::native::{NativeType, NativeValue, Record};
use crate::schema::{EntitySchema, PropertyDescriptor};
use crate::type_codec::{parse_text, render_text, ValueSpec};

const PLACEHOLDER: &str = "{0}";

/// Separator used when neither the key format nor configuration names one
pub const DEFAULT_SEPARATOR: &str = "#";

/// How a key value is decorated before it is stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFormat {
    /// Constant written before the separator, e.g. `tenant` in `tenant#acme`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Falls back to the configured separator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    /// Custom template with a single `{0}` substitution point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl KeyFormat {
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn templated(template: impl Into<String>) -> Self {
        Self {
            template: Some(template.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Whether every key built with this format carries constant text
    #[must_use]
    pub fn marks_keys(&self) -> bool {
        self.prefix.is_some()
            || self
                .template
                .as_deref()
                .and_then(|t| KeyTemplate::parse(t).ok())
                .is_some_and(|t| !t.prefix.is_empty() || !t.suffix.is_empty())
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.prefix.is_some() && self.separator.as_deref() == Some("") {
            return Err(SchemaError::EmptyName {
                what: "key separator".to_string(),
            });
        }
        if let Some(template) = &self.template {
            KeyTemplate::parse(template)?;
        }
        Ok(())
    }
}

/// Constant prefix and suffix around the substitution point of a key
/// template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    prefix: String,
    suffix: String,
}

impl KeyTemplate {
    pub fn parse(template: &str) -> Result<Self, SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidKeyTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let (prefix, suffix) = template
            .split_once(PLACEHOLDER)
            .ok_or_else(|| invalid("missing {0} placeholder"))?;
        if suffix.contains(PLACEHOLDER) {
            return Err(invalid("more than one placeholder"));
        }
        if prefix.contains(['{', '}']) || suffix.contains(['{', '}']) {
            return Err(invalid("unexpected brace outside the placeholder"));
        }

        Ok(Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    #[must_use]
    pub fn apply(&self, value: &str) -> String {
        format!("{}{}{}", self.prefix, value, self.suffix)
    }

    #[must_use]
    pub fn strip<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())
    }
}

/// Builds the key string for one key-bearing property.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    property: String,
    attribute: String,
    nullable: bool,
    native_type: NativeType,
    format: Option<String>,
    date_kind: DateTimeKind,
    /// `prefix + separator`, resolved once
    lead: Option<String>,
    template: Option<KeyTemplate>,
}

impl KeyBuilder {
    pub fn for_property(
        property: &PropertyDescriptor,
        default_separator: &str,
    ) -> Result<Self, SchemaError> {
        Self::with_format(property, property.key_format.as_ref(), default_separator)
    }

    /// Builder for a secondary-index key declaring its own template.
    pub fn for_index(
        property: &PropertyDescriptor,
        template: &str,
        default_separator: &str,
    ) -> Result<Self, SchemaError> {
        Self::with_format(property, Some(&KeyFormat::templated(template)), default_separator)
    }

    fn with_format(
        property: &PropertyDescriptor,
        key_format: Option<&KeyFormat>,
        default_separator: &str,
    ) -> Result<Self, SchemaError> {
        let (lead, template) = match key_format {
            Some(key_format) => {
                key_format.validate()?;
                let separator = key_format.separator.as_deref().unwrap_or(default_separator);
                let lead = key_format
                    .prefix
                    .as_ref()
                    .map(|prefix| format!("{}{}", prefix, separator));
                let template = key_format
                    .template
                    .as_deref()
                    .map(KeyTemplate::parse)
                    .transpose()?;
                (lead, template)
            }
            None => (None, None),
        };

        Ok(Self {
            property: property.name.clone(),
            attribute: property.attribute.clone(),
            nullable: property.nullable,
            native_type: property.native_type.clone(),
            format: property.format.clone(),
            date_kind: property.date_kind,
            lead,
            template,
        })
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Whether stored values carry a prefix or template
    #[must_use]
    pub fn is_decorated(&self) -> bool {
        self.lead.is_some() || self.template.is_some()
    }

    fn spec(&self) -> ValueSpec<'_> {
        ValueSpec {
            property: &self.property,
            native_type: &self.native_type,
            format: self.format.as_deref(),
            date_kind: self.date_kind,
        }
    }

    /// Build the key for `value`.
    ///
    /// A null value yields `Ok(None)` when the property is nullable and
    /// [`MappingError::NullKey`] otherwise.
    pub fn build(&self, value: &NativeValue) -> Result<Option<String>, MappingError> {
        if value.is_null() {
            if self.nullable {
                return Ok(None);
            }
            return Err(self.null_key());
        }
        let rendered = render_text(value, &self.spec())?;
        Ok(Some(self.decorate(&rendered)))
    }

    /// Build a key that must exist, whatever the property's nullability.
    pub fn build_required(&self, value: &NativeValue) -> Result<String, MappingError> {
        self.build(value)?.ok_or_else(|| self.null_key())
    }

    fn null_key(&self) -> MappingError {
        MappingError::NullKey {
            property: self.property.clone(),
        }
    }

    #[must_use]
    pub fn decorate(&self, rendered: &str) -> String {
        let led = match &self.lead {
            Some(lead) => format!("{}{}", lead, rendered),
            None => rendered.to_string(),
        };
        match &self.template {
            Some(template) => template.apply(&led),
            None => led,
        }
    }

    /// Strip decoration from a stored key. Undecorated input passes through
    /// so keys written before a format was declared still decode.
    #[must_use]
    pub fn strip<'a>(&self, key: &'a str) -> &'a str {
        let inner = match &self.template {
            Some(template) => template.strip(key).unwrap_or(key),
            None => key,
        };
        match &self.lead {
            Some(lead) => inner.strip_prefix(lead.as_str()).unwrap_or(inner),
            None => inner,
        }
    }

    /// Whether a stored key carries this builder's prefix and template text.
    #[must_use]
    pub fn matches_decoration(&self, key: &str) -> bool {
        let inner = match &self.template {
            Some(template) => match template.strip(key) {
                Some(inner) => inner,
                None => return false,
            },
            None => key,
        };
        self.lead
            .as_ref()
            .map_or(true, |lead| inner.starts_with(lead.as_str()))
    }

    /// Recover the property value from a stored key.
    pub fn parse(&self, key: &str) -> Result<NativeValue, MappingError> {
        parse_text(self.strip(key), &self.spec())
    }
}

/// Partition and optional sort key of one item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPair {
    pub partition: String,
    pub sort: Option<String>,
}

/// Key builders for the table or one secondary index.
#[derive(Debug, Clone)]
pub struct CompositeKeyBuilder {
    index: Option<String>,
    partition: KeyBuilder,
    sort: Option<KeyBuilder>,
}

impl CompositeKeyBuilder {
    pub fn new(index: Option<String>, partition: KeyBuilder, sort: Option<KeyBuilder>) -> Self {
        Self {
            index,
            partition,
            sort,
        }
    }

    /// Index name; `None` for the table's primary key
    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn partition(&self) -> &KeyBuilder {
        &self.partition
    }

    pub fn sort(&self) -> Option<&KeyBuilder> {
        self.sort.as_ref()
    }

    pub fn build(&self, record: &Record) -> Result<KeyPair, MappingError> {
        let partition = self
            .partition
            .build_required(record.value(self.partition.property()))?;
        let sort = self
            .sort
            .as_ref()
            .map(|builder| builder.build_required(record.value(builder.property())))
            .transpose()?;
        Ok(KeyPair { partition, sort })
    }
}

/// Every key builder derived from one schema.
#[derive(Debug, Clone)]
pub struct EntityKeys {
    primary: Option<CompositeKeyBuilder>,
    indexes: BTreeMap<String, CompositeKeyBuilder>,
    by_property: HashMap<String, KeyBuilder>,
}

impl EntityKeys {
    pub fn from_schema(schema: &EntitySchema, default_separator: &str) -> Result<Self, SchemaError> {
        let mut by_property = HashMap::new();
        for property in schema.properties.iter().filter(|p| p.is_key_bearing()) {
            let builder = match stored_index_template(schema, property) {
                Some(template) => KeyBuilder::for_index(property, template, default_separator)?,
                None => KeyBuilder::for_property(property, default_separator)?,
            };
            by_property.insert(property.name.clone(), builder);
        }

        let lookup = |name: &str| by_property.get(name).cloned();

        let primary = schema.partition_key().and_then(|pk| {
            let sort = schema.sort_key().and_then(|sk| lookup(&sk.name));
            lookup(&pk.name).map(|partition| CompositeKeyBuilder::new(None, partition, sort))
        });

        let mut indexes = BTreeMap::new();
        for index in &schema.indexes {
            let unknown = |property: &str| SchemaError::UnknownIndexProperty {
                entity_kind: schema.kind.clone(),
                index: index.name.clone(),
                property: property.to_string(),
            };
            let partition = match &index.key_format {
                Some(template) => {
                    let property = schema
                        .property(&index.partition_key)
                        .ok_or_else(|| unknown(&index.partition_key))?;
                    KeyBuilder::for_index(property, template, default_separator)?
                }
                None => lookup(&index.partition_key).ok_or_else(|| unknown(&index.partition_key))?,
            };
            let sort = match &index.sort_key {
                Some(sort_key) => Some(lookup(sort_key).ok_or_else(|| unknown(sort_key))?),
                None => None,
            };
            indexes.insert(
                index.name.clone(),
                CompositeKeyBuilder::new(Some(index.name.clone()), partition, sort),
            );
        }

        Ok(Self {
            primary,
            indexes,
            by_property,
        })
    }

    /// Table key builder; `None` for kinds that are only ever nested
    pub fn primary(&self) -> Option<&CompositeKeyBuilder> {
        self.primary.as_ref()
    }

    pub fn index(&self, name: &str) -> Option<&CompositeKeyBuilder> {
        self.indexes.get(name)
    }

    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }

    /// Builder of a key-bearing property
    pub fn builder(&self, property: &str) -> Option<&KeyBuilder> {
        self.by_property.get(property)
    }
}

/// Template of the first index that partitions on `property`, used for
/// the stored attribute only when the property has no table role and no
/// key format of its own.
fn stored_index_template<'a>(schema: &'a EntitySchema, property: &PropertyDescriptor) -> Option<&'a str> {
    if property.role.is_some() || property.key_format.is_some() {
        return None;
    }
    schema
        .indexes
        .iter()
        .filter(|index| index.partition_key == property.name)
        .find_map(|index| index.key_format.as_deref())
}
