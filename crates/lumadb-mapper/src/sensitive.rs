//! Sensitive-field registry

use std::collections::HashSet;

use crate::schema::EntitySchema;
use crate::wire::{AttributeValue, Item};

/// Placeholder written over sensitive values by [`SensitiveFields::redact`].
pub const REDACTED: &str = "[REDACTED]";

/// Wire attribute names of sensitive properties of one entity kind.
#[derive(Debug, Clone, Default)]
pub struct SensitiveFields {
    attributes: HashSet<String>,
}

impl SensitiveFields {
    /// Collect sensitive and encrypted properties of `schema`
    pub fn from_schema(schema: &EntitySchema) -> Self {
        Self {
            attributes: schema
                .properties
                .iter()
                .filter(|p| p.is_sensitive())
                .map(|p| p.attribute.clone())
                .collect(),
        }
    }

    #[must_use]
    pub fn is_sensitive(&self, attribute: &str) -> bool {
        self.attributes.contains(attribute)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(String::as_str)
    }

    /// Copy of `item` safe to log
    #[must_use]
    pub fn redact(&self, item: &Item) -> Item {
        item.iter()
            .map(|(name, value)| {
                let value = if self.is_sensitive(name) {
                    AttributeValue::S(REDACTED.to_string())
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect()
    }
}
