//! Error types for the LumaDB item mapper
//!
//! Provides a unified error type hierarchy for every mapper crate. Codec
//! operations surface [`MappingError`]; schema construction surfaces
//! [`SchemaError`]; injected collaborators (blob store, field encryptor,
//! serializer) report [`HookError`], which the codec rewraps at the property
//! boundary.

use std::fmt;

use thiserror::Error;

/// Result type alias using the mapper's top-level Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mapper workspace
#[derive(Error, Debug)]
pub enum Error {
    // Codec Errors
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    // Schema Errors
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Which half of a conversion failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Native value to wire value
    Encode,
    /// Wire value to native value (parse failures land here)
    Decode,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Encode => f.write_str("encode"),
            Direction::Decode => f.write_str("decode"),
        }
    }
}

/// Errors raised while converting records to and from wire items.
#[derive(Error, Debug)]
pub enum MappingError {
    /// A non-nullable key-bearing property was null at key-build time.
    #[error("Key property '{property}' is null")]
    NullKey { property: String },

    /// Any failure during a single property's encode/decode.
    #[error("Failed to {direction} property '{property}' ({native_type}) of '{entity_kind}': {source}")]
    PropertyConversionFailed {
        entity_kind: String,
        property: String,
        native_type: String,
        direction: Direction,
        #[source]
        source: Box<MappingError>,
    },

    /// Failure outside the per-property loop.
    #[error("Failed to construct '{entity_kind}': {source}")]
    EntityConstructionFailed {
        entity_kind: String,
        #[source]
        source: Box<MappingError>,
    },

    /// The item's discriminator does not identify the expected entity kind.
    #[error(
        "Discriminator mismatch for '{entity_kind}': expected {expected}, found {}",
        .actual.as_deref().unwrap_or("<absent>")
    )]
    DiscriminatorMismatch {
        entity_kind: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Invalid wire value: {0}")]
    InvalidWire(String),

    #[error("No {collaborator} configured for property '{property}'")]
    MissingCollaborator {
        collaborator: &'static str,
        property: String,
    },

    #[error("Collaborator error: {0}")]
    Hook(HookError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("Entity '{entity_kind}' has no index '{index}'")]
    UnknownIndex { entity_kind: String, index: String },
}

impl MappingError {
    /// Errors that must travel to the caller unchanged instead of being
    /// wrapped again at the property or entity boundary.
    #[must_use]
    pub fn is_wrapped(&self) -> bool {
        matches!(
            self,
            MappingError::PropertyConversionFailed { .. }
                | MappingError::EntityConstructionFailed { .. }
                | MappingError::DiscriminatorMismatch { .. }
                | MappingError::Cancelled
        )
    }

    /// Wrap a per-property failure, leaving already-wrapped errors intact.
    #[must_use]
    pub fn property(
        self,
        entity_kind: &str,
        property: &str,
        native_type: impl fmt::Display,
        direction: Direction,
    ) -> Self {
        if self.is_wrapped() {
            return self;
        }
        MappingError::PropertyConversionFailed {
            entity_kind: entity_kind.to_string(),
            property: property.to_string(),
            native_type: native_type.to_string(),
            direction,
            source: Box::new(self),
        }
    }

    /// Wrap a failure outside the per-property loop, leaving already-wrapped
    /// errors intact.
    #[must_use]
    pub fn entity(self, entity_kind: &str) -> Self {
        if self.is_wrapped() {
            return self;
        }
        MappingError::EntityConstructionFailed {
            entity_kind: entity_kind.to_string(),
            source: Box::new(self),
        }
    }

    /// Property name carried by a conversion failure, if any.
    #[must_use]
    pub fn failed_property(&self) -> Option<&str> {
        match self {
            MappingError::PropertyConversionFailed { property, .. } => Some(property),
            MappingError::NullKey { property } => Some(property),
            _ => None,
        }
    }
}

impl From<HookError> for MappingError {
    fn from(e: HookError) -> Self {
        match e {
            HookError::Cancelled => MappingError::Cancelled,
            other => MappingError::Hook(other),
        }
    }
}

/// Errors reported by injected collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Blob store failure: {0}")]
    BlobStore(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Serializer failure: {0}")]
    Serializer(String),

    #[error("Cancelled")]
    Cancelled,
}

/// A declared format template could not render or parse a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unsupported format template '{0}'")]
    UnsupportedTemplate(String),

    #[error("Cannot render {value} with format '{template}'")]
    Render { template: String, value: String },

    #[error("Cannot parse '{input}' with format '{template}'")]
    Parse { template: String, input: String },
}

/// Schema validation errors.
///
/// Raised when a schema is built or a codec registry is assembled; codec
/// operations assume a schema that passed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Entity '{entity_kind}' declares no partition key")]
    MissingPartitionKey { entity_kind: String },

    #[error("Entity '{entity_kind}' declares several partition keys: {properties:?}")]
    MultiplePartitionKeys {
        entity_kind: String,
        properties: Vec<String>,
    },

    #[error("Entity '{entity_kind}' declares several sort keys: {properties:?}")]
    MultipleSortKeys {
        entity_kind: String,
        properties: Vec<String>,
    },

    #[error("Entity '{entity_kind}' maps attribute '{attribute}' more than once")]
    DuplicateAttribute {
        entity_kind: String,
        attribute: String,
    },

    #[error("Entity '{entity_kind}' declares property '{property}' more than once")]
    DuplicateProperty {
        entity_kind: String,
        property: String,
    },

    #[error("Index '{index}' of '{entity_kind}' has a sort key but no partition key")]
    IndexSortKeyWithoutPartitionKey { entity_kind: String, index: String },

    #[error("Index '{index}' of '{entity_kind}' references unknown property '{property}'")]
    UnknownIndexProperty {
        entity_kind: String,
        index: String,
        property: String,
    },

    #[error("Property '{property}' of '{entity_kind}' combines incompatible annotations: {annotations:?}")]
    IncompatibleAnnotations {
        entity_kind: String,
        property: String,
        annotations: Vec<String>,
    },

    #[error("Entity '{entity_kind}' declares several time-to-live properties: {properties:?}")]
    MultipleTimeToLive {
        entity_kind: String,
        properties: Vec<String>,
    },

    #[error("Property '{property}' of '{entity_kind}' cannot carry {annotation} on type {native_type}")]
    InvalidAnnotationType {
        entity_kind: String,
        property: String,
        annotation: String,
        native_type: String,
    },

    #[error("Entity '{entity_kind}' declares relationships but no sort key")]
    RelationshipsWithoutSortKey { entity_kind: String },

    #[error("Entity '{entity_kind}' declares relationships but neither a discriminator nor a prefixed sort key marks its own item")]
    UnmarkedOwningItem { entity_kind: String },

    #[error("Relationship on '{entity_kind}' targets unknown property '{property}'")]
    UnknownRelationshipProperty {
        entity_kind: String,
        property: String,
    },

    #[error("Property '{property}' of '{entity_kind}' requires a {collaborator} but none was injected")]
    MissingCollaborator {
        entity_kind: String,
        property: String,
        collaborator: String,
    },

    #[error("'{referenced_by}' references unregistered entity kind '{kind}'")]
    UnknownEntityKind { referenced_by: String, kind: String },

    #[error("Entity kind '{0}' is registered twice")]
    DuplicateEntityKind(String),

    #[error("Entity '{entity_kind}' is nested as a map but property '{property}' needs an async collaborator")]
    AsyncPropertyInNestedEntity {
        entity_kind: String,
        property: String,
    },

    #[error("Invalid key template '{template}': {reason}")]
    InvalidKeyTemplate { template: String, reason: String },

    #[error("Invalid discriminator pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Empty name for {what}")]
    EmptyName { what: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_wrap_names_property() {
        let err = MappingError::TypeMismatch {
            expected: "string".into(),
            actual: "N".into(),
        }
        .property("User", "name", "string", Direction::Decode);

        assert_eq!(err.failed_property(), Some("name"));
        assert!(err.to_string().contains("decode property 'name'"));
    }

    #[test]
    fn test_no_double_wrap() {
        let inner = MappingError::InvalidWire("bad".into()).property(
            "User",
            "age",
            "i64",
            Direction::Encode,
        );
        let outer = inner.entity("User");
        assert!(matches!(
            outer,
            MappingError::PropertyConversionFailed { ref property, .. } if property == "age"
        ));

        let mismatch = MappingError::DiscriminatorMismatch {
            entity_kind: "User".into(),
            expected: "USER".into(),
            actual: None,
        };
        let wrapped = mismatch.property("User", "x", "string", Direction::Decode);
        assert!(matches!(wrapped, MappingError::DiscriminatorMismatch { .. }));
    }

    #[test]
    fn test_hook_cancellation_is_not_wrapped() {
        let err = MappingError::from(HookError::Cancelled);
        assert!(matches!(err, MappingError::Cancelled));

        let err = MappingError::from(HookError::BlobNotFound("ref-1".into()));
        assert!(matches!(err, MappingError::Hook(HookError::BlobNotFound(_))));
    }

    #[test]
    fn test_discriminator_mismatch_display() {
        let err = MappingError::DiscriminatorMismatch {
            entity_kind: "Order".into(),
            expected: "ORDER#*".into(),
            actual: Some("USER#1".into()),
        };
        assert_eq!(
            err.to_string(),
            "Discriminator mismatch for 'Order': expected ORDER#*, found USER#1"
        );
    }
}
