//! LumaDB Item Mapper
//!
//! Schema-driven codec between typed records and DynamoDB-style wire items:
//! - Per-type value conversion with declared number and date formats
//! - Partition, sort and secondary-index key construction
//! - Discriminators for several entity kinds sharing one table
//! - Multi-item entities reassembled from sort-key relationships
//! - Blob offload, JSON blobs and field encryption through injected collaborators

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod discriminator;
pub mod entity;
pub mod format;
pub mod hooks;
pub mod key;
pub mod native;
pub mod registry;
pub mod relationship;
pub mod schema;
pub mod sensitive;
pub mod type_codec;
pub mod typed;
pub mod wire;

pub use discriminator::{DiscriminatorMatcher, DiscriminatorSpec, MatchStrategy};
pub use entity::EntityCodec;
pub use format::DateTimeKind;
pub use hooks::{
    BlobStore, CodecContext, InMemoryBlobStore, JsonSerializer, MapperHooks, SerdeJsonSerializer,
};
pub use key::{CompositeKeyBuilder, EntityKeys, KeyBuilder, KeyFormat, KeyPair};
pub use native::{NativeType, NativeValue, Record};
pub use registry::{CodecRegistry, CodecRegistryBuilder};
pub use relationship::{RelationshipAssembler, RelationshipSpec};
pub use schema::{EntitySchema, IndexDescriptor, PropertyDescriptor};
pub use sensitive::SensitiveFields;
pub use type_codec::{TypeCodec, ValueSpec};
pub use typed::{Entity, FromNative, IntoNative, TypedCodec};
pub use wire::{AttributeValue, Item};

pub use lumadb_common::error::{MappingError, SchemaError};
pub use lumadb_security::{EncryptionContext, FieldEncryptor};
