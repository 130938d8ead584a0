//! Entity codec
//!
//! Converts whole records to and from wire items for one entity kind:
//! per-property conversion in declaration order, discriminator write and
//! check, key construction and multi-item assembly. Blob offload and field
//! encryption are the only suspension points.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument, trace, Level};

use lumadb_common::error::{Direction, MappingError, SchemaError};
use lumadb_security::EncryptionContext;

use crate::discriminator::DiscriminatorMatcher;
use crate::hooks::{CodecContext, JsonSerializer, MapperHooks};
use crate::key::{CompositeKeyBuilder, EntityKeys, KeyPair, DEFAULT_SEPARATOR};
use crate::native::{NativeValue, Record};
use crate::relationship::{RelatedDecoder, RelationshipAssembler, RelationshipSpec};
use crate::schema::{BlobReferenceSpec, EntitySchema, PropertyDescriptor};
use crate::sensitive::SensitiveFields;
use crate::type_codec::{decode_ttl, encode_ttl, NestedCodec, TypeCodec, ValueSpec};
use crate::wire::{AttributeValue, Item};

/// Conversion state of one kind.
struct KindCodec {
    schema: EntitySchema,
    keys: EntityKeys,
    discriminator: Option<DiscriminatorMatcher>,
    assembler: RelationshipAssembler,
    sensitive: SensitiveFields,
}

impl KindCodec {
    fn build(schema: EntitySchema, key_separator: &str) -> Result<Self, SchemaError> {
        let schema = schema.prepare()?;
        let sort_key_attribute = schema
            .sort_key()
            .map(|p| p.attribute.clone())
            .unwrap_or_default();

        Ok(Self {
            keys: EntityKeys::from_schema(&schema, key_separator)?,
            discriminator: schema.discriminator.as_ref().map(DiscriminatorMatcher::new),
            assembler: RelationshipAssembler::new(sort_key_attribute, &schema.relationships)?,
            sensitive: SensitiveFields::from_schema(&schema),
            schema,
        })
    }
}

/// Kinds built together. Nested and related kinds are looked up here by
/// name when a value is converted, so kinds may reference themselves or
/// each other.
struct CodecSet {
    kinds: HashMap<String, Arc<KindCodec>>,
    hooks: MapperHooks,
}

impl CodecSet {
    fn new(states: &[Arc<KindCodec>], hooks: MapperHooks) -> Result<Arc<Self>, SchemaError> {
        let mut kinds = HashMap::with_capacity(states.len());
        for state in states {
            let kind = &state.schema.kind;
            if kinds.insert(kind.clone(), Arc::clone(state)).is_some() {
                return Err(SchemaError::DuplicateEntityKind(kind.clone()));
            }
        }

        for state in states {
            let schema = &state.schema;
            check_collaborators(schema, &hooks)?;
            for kind in schema.nested_kinds().into_iter().chain(schema.related_kinds()) {
                if !kinds.contains_key(kind) {
                    return Err(SchemaError::UnknownEntityKind {
                        referenced_by: schema.kind.clone(),
                        kind: kind.to_string(),
                    });
                }
            }
            for kind in schema.nested_kinds() {
                let nested = &kinds[kind].schema;
                if let Some(property) = nested.properties.iter().find(|p| p.needs_async_hook()) {
                    return Err(SchemaError::AsyncPropertyInNestedEntity {
                        entity_kind: kind.to_string(),
                        property: property.name.clone(),
                    });
                }
            }
        }

        Ok(Arc::new(Self { kinds, hooks }))
    }
}

/// Codec for one entity kind.
///
/// Clones are cheap and share the kind's state and the kinds it was built
/// with.
#[derive(Clone)]
pub struct EntityCodec {
    state: Arc<KindCodec>,
    set: Arc<CodecSet>,
}

impl EntityCodec {
    /// Codec for a kind that references no other kind. It may nest itself.
    pub fn new(schema: EntitySchema, hooks: MapperHooks) -> Result<Self, SchemaError> {
        let state = Arc::new(KindCodec::build(schema, DEFAULT_SEPARATOR)?);
        let set = CodecSet::new(std::slice::from_ref(&state), hooks)?;
        Ok(Self { state, set })
    }

    /// Codecs for kinds that may reference each other, in input order.
    pub(crate) fn build_all(
        schemas: Vec<EntitySchema>,
        hooks: MapperHooks,
        key_separator: &str,
    ) -> Result<Vec<Self>, SchemaError> {
        let states = schemas
            .into_iter()
            .map(|schema| KindCodec::build(schema, key_separator).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let set = CodecSet::new(&states, hooks)?;
        Ok(states
            .into_iter()
            .map(|state| Self {
                state,
                set: Arc::clone(&set),
            })
            .collect())
    }

    pub fn kind(&self) -> &str {
        &self.state.schema.kind
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.state.schema
    }

    pub fn keys(&self) -> &EntityKeys {
        &self.state.keys
    }

    pub fn sensitive_fields(&self) -> &SensitiveFields {
        &self.state.sensitive
    }

    pub fn discriminator(&self) -> Option<&DiscriminatorMatcher> {
        self.state.discriminator.as_ref()
    }

    /// Discriminator test; kinds without a discriminator accept any item.
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        self.state.discriminator.as_ref().map_or(true, |d| d.matches(item))
    }

    fn type_codec(&self) -> TypeCodec<'_> {
        TypeCodec::new(self)
    }

    fn dependency(&self, kind: &str) -> Result<EntityCodec, MappingError> {
        let state = self
            .set
            .kinds
            .get(kind)
            .ok_or_else(|| MappingError::UnknownEntityKind(kind.to_string()))?;
        Ok(Self {
            state: Arc::clone(state),
            set: Arc::clone(&self.set),
        })
    }

    fn wrap(&self, property: &PropertyDescriptor, direction: Direction) -> impl Fn(MappingError) -> MappingError + '_ {
        let kind = self.state.schema.kind.as_str();
        let name = property.name.clone();
        let native_type = property.native_type.clone();
        move |e| e.property(kind, &name, &native_type, direction)
    }

    fn check_kind(&self, record: &Record) -> Result<(), MappingError> {
        if record.kind() == self.state.schema.kind {
            return Ok(());
        }
        Err(MappingError::TypeMismatch {
            expected: self.state.schema.kind.clone(),
            actual: record.kind().to_string(),
        }
        .entity(&self.state.schema.kind))
    }

    /// Encode a record into its own item.
    #[instrument(skip_all, fields(kind = %self.state.schema.kind))]
    pub async fn to_item(&self, record: &Record, ctx: &CodecContext) -> Result<Item, MappingError> {
        if ctx.is_cancelled() {
            return Err(MappingError::Cancelled);
        }
        self.check_kind(record)?;

        let mut item = Item::with_capacity(self.state.schema.properties.len() + 1);
        for property in self.state.schema.direct_properties() {
            let value = record.value(&property.name);
            let wire = self
                .encode_property(property, value, ctx)
                .await
                .map_err(self.wrap(property, Direction::Encode))?;
            if let Some(wire) = wire {
                item.insert(property.attribute.clone(), wire);
            }
        }
        self.write_discriminator(&mut item)?;

        debug!(attributes = item.len(), "Encoded item");
        self.trace_item("Encoded item contents", &item);
        Ok(item)
    }

    /// Encode a multi-item entity: the owning item first, then one item per
    /// related record in relationship declaration order.
    #[instrument(skip_all, fields(kind = %self.state.schema.kind))]
    pub async fn to_items(&self, record: &Record, ctx: &CodecContext) -> Result<Vec<Item>, MappingError> {
        let mut items = vec![self.to_item(record, ctx).await?];

        for spec in self.state.assembler.specs() {
            let property = self
                .state
                .schema
                .property(&spec.property)
                .ok_or_else(|| MappingError::UnknownEntityKind(spec.related_kind.clone()).entity(self.kind()))?;
            let wrap = self.wrap(property, Direction::Encode);
            let codec = self.dependency(&spec.related_kind).map_err(&wrap)?;

            for related in related_records(record.value(&spec.property)).map_err(&wrap)? {
                let item = codec.to_item(related, ctx).await.map_err(&wrap)?;
                self.check_route(spec, &item).map_err(&wrap)?;
                items.push(item);
            }
        }

        debug!(items = items.len(), "Encoded multi-item entity");
        Ok(items)
    }

    /// Related items must route back to the property they came from.
    fn check_route(&self, spec: &RelationshipSpec, item: &Item) -> Result<(), MappingError> {
        match self.state.assembler.route(item) {
            Some(routed) if routed.property == spec.property => Ok(()),
            routed => Err(MappingError::InvalidWire(format!(
                "related item would be read back as {} instead of '{}'",
                routed.map_or_else(|| "nothing".to_string(), |r| format!("'{}'", r.property)),
                spec.property
            ))),
        }
    }

    /// Decode a single item.
    #[instrument(skip_all, fields(kind = %self.state.schema.kind))]
    pub async fn from_item(&self, item: &Item, ctx: &CodecContext) -> Result<Record, MappingError> {
        if ctx.is_cancelled() {
            return Err(MappingError::Cancelled);
        }
        if let Some(discriminator) = &self.state.discriminator {
            discriminator.check(&self.state.schema.kind, item)?;
        }
        self.trace_item("Decoding item", item);

        let mut record = Record::new(self.state.schema.kind.clone());
        for property in self.state.schema.direct_properties() {
            let Some(wire) = item.get(&property.attribute) else {
                continue;
            };
            let value = self
                .decode_property(property, wire, ctx)
                .await
                .map_err(self.wrap(property, Direction::Decode))?;
            record.set(property.name.clone(), value);
        }

        debug!(properties = record.len(), "Decoded item");
        Ok(record)
    }

    /// Decode one logical entity from the items sharing its partition key.
    ///
    /// The owning item is the first item no relationship claims that
    /// matches the discriminator or, without one, carries the sort key's
    /// prefix or template.
    #[instrument(skip_all, fields(kind = %self.state.schema.kind, items = items.len()))]
    pub async fn from_items(&self, items: &[Item], ctx: &CodecContext) -> Result<Record, MappingError> {
        let owner_index = self.owner_index(items)?;
        let owner = self.from_item(&items[owner_index], ctx).await?;
        if self.state.assembler.is_empty() {
            return Ok(owner);
        }
        self.state
            .assembler
            .assemble(owner, items, Some(owner_index), self, ctx)
            .await
    }

    fn owner_index(&self, items: &[Item]) -> Result<usize, MappingError> {
        let found = items
            .iter()
            .position(|item| self.state.assembler.route(item).is_none() && self.owns(item));
        if let Some(index) = found {
            return Ok(index);
        }
        match (&self.state.discriminator, items.first()) {
            (Some(discriminator), Some(first)) => {
                discriminator.check(&self.state.schema.kind, first)?;
                Err(MappingError::InvalidWire("no owning item".to_string()).entity(self.kind()))
            }
            _ => Err(MappingError::InvalidWire(format!(
                "none of {} items is an owning item",
                items.len()
            ))
            .entity(self.kind())),
        }
    }

    fn owns(&self, item: &Item) -> bool {
        if let Some(discriminator) = &self.state.discriminator {
            return discriminator.matches(item);
        }
        let Some(sort) = self.state.keys.primary().and_then(CompositeKeyBuilder::sort) else {
            return true;
        };
        item.get(sort.attribute())
            .and_then(AttributeValue::scalar_text)
            .is_some_and(|key| sort.matches_decoration(key))
    }

    /// Table key of a record.
    pub fn primary_key(&self, record: &Record) -> Result<KeyPair, MappingError> {
        let primary = self.state.keys.primary().ok_or_else(|| {
            MappingError::InvalidWire("kind has no table key".to_string()).entity(self.kind())
        })?;
        primary.build(record)
    }

    /// Key of a record in a secondary index; `None` when the record has no
    /// value for the index partition key and so is absent from the index.
    pub fn index_key(&self, index: &str, record: &Record) -> Result<Option<KeyPair>, MappingError> {
        let builder = self.state.keys.index(index).ok_or_else(|| MappingError::UnknownIndex {
            entity_kind: self.state.schema.kind.clone(),
            index: index.to_string(),
        })?;
        let Some(partition) = builder
            .partition()
            .build(record.value(builder.partition().property()))?
        else {
            return Ok(None);
        };
        let sort = match builder.sort() {
            Some(sort) => match sort.build(record.value(sort.property()))? {
                Some(key) => Some(key),
                None => return Ok(None),
            },
            None => None,
        };
        Ok(Some(KeyPair { partition, sort }))
    }

    /// Key-only item used to address a record in get and delete requests.
    pub fn key_attributes(&self, record: &Record) -> Result<Item, MappingError> {
        let key_properties = [self.state.schema.partition_key(), self.state.schema.sort_key()];
        if key_properties[0].is_none() {
            return Err(
                MappingError::InvalidWire("kind has no table key".to_string()).entity(self.kind()),
            );
        }

        let mut item = Item::with_capacity(2);
        for property in key_properties.into_iter().flatten() {
            let wire = self
                .encode_plain(property, record.value(&property.name))
                .map_err(self.wrap(property, Direction::Encode))?
                .ok_or_else(|| MappingError::NullKey {
                    property: property.name.clone(),
                })?;
            item.insert(property.attribute.clone(), wire);
        }
        Ok(item)
    }

    fn write_discriminator(&self, item: &mut Item) -> Result<(), MappingError> {
        let (Some(spec), Some(matcher)) = (&self.state.schema.discriminator, &self.state.discriminator) else {
            return Ok(());
        };
        if !item.contains_key(&spec.attribute) {
            if let Some(literal) = spec.literal() {
                item.insert(spec.attribute.clone(), AttributeValue::S(literal.to_string()));
                return Ok(());
            }
        }
        matcher
            .check(&self.state.schema.kind, item)
            .map_err(|e| e.entity(&self.state.schema.kind))
    }

    async fn encode_property(
        &self,
        property: &PropertyDescriptor,
        value: &NativeValue,
        ctx: &CodecContext,
    ) -> Result<Option<AttributeValue>, MappingError> {
        if let Some(blob) = &property.blob_reference {
            return self.store_blob(property, blob, value, ctx).await;
        }
        if property.is_encrypted() {
            return self.encrypt(property, value, ctx).await;
        }
        self.encode_plain(property, value)
    }

    /// Every encode rule that never suspends.
    fn encode_plain(
        &self,
        property: &PropertyDescriptor,
        value: &NativeValue,
    ) -> Result<Option<AttributeValue>, MappingError> {
        let spec = ValueSpec::of(property);
        if property.time_to_live {
            return encode_ttl(value, &spec);
        }
        if property.json_blob {
            return self.type_codec().encode_json_blob(value, &spec);
        }
        if let Some(builder) = self.state.keys.builder(&property.name) {
            if builder.is_decorated() {
                return Ok(builder.build(value)?.map(AttributeValue::S));
            }
            if value.is_null() {
                builder.build(value)?;
            }
        }
        self.type_codec().encode(value, &spec)
    }

    async fn decode_property(
        &self,
        property: &PropertyDescriptor,
        wire: &AttributeValue,
        ctx: &CodecContext,
    ) -> Result<NativeValue, MappingError> {
        if property.blob_reference.is_some() {
            return self.retrieve_blob(property, wire, ctx).await;
        }
        if property.is_encrypted() {
            return self.decrypt(property, wire, ctx).await;
        }
        self.decode_plain(property, wire)
    }

    fn decode_plain(
        &self,
        property: &PropertyDescriptor,
        wire: &AttributeValue,
    ) -> Result<NativeValue, MappingError> {
        let spec = ValueSpec::of(property);
        if property.time_to_live {
            return decode_ttl(wire, &spec);
        }
        if property.json_blob {
            return self.type_codec().decode_json_blob(wire, &spec);
        }
        if let Some(builder) = self.state.keys.builder(&property.name) {
            if builder.is_decorated() {
                let key = wire.scalar_text().ok_or_else(|| MappingError::TypeMismatch {
                    expected: "S".to_string(),
                    actual: wire.type_tag().to_string(),
                })?;
                return builder.parse(key);
            }
        }
        self.type_codec().decode(wire, &spec)
    }

    async fn store_blob(
        &self,
        property: &PropertyDescriptor,
        blob: &BlobReferenceSpec,
        value: &NativeValue,
        ctx: &CodecContext,
    ) -> Result<Option<AttributeValue>, MappingError> {
        let Some(payload) = self.type_codec().to_payload(value, &ValueSpec::of(property))? else {
            return Ok(None);
        };
        let store = self.set.hooks.blob_store.as_ref().ok_or_else(|| missing("blob store", property))?;
        let size = payload.len();
        let reference = ctx
            .guard(store.store(Bytes::from(payload), blob.key_prefix.as_deref(), &ctx.cancel))
            .await?;
        trace!(property = %property.name, size, "Offloaded property to blob store");
        Ok(Some(AttributeValue::S(reference)))
    }

    async fn retrieve_blob(
        &self,
        property: &PropertyDescriptor,
        wire: &AttributeValue,
        ctx: &CodecContext,
    ) -> Result<NativeValue, MappingError> {
        let reference = wire.as_s().ok_or_else(|| MappingError::TypeMismatch {
            expected: "blob reference (S)".to_string(),
            actual: wire.type_tag().to_string(),
        })?;
        let store = self.set.hooks.blob_store.as_ref().ok_or_else(|| missing("blob store", property))?;
        let bytes = ctx.guard(store.retrieve(reference, &ctx.cancel)).await?;
        self.type_codec().from_payload(&bytes, &ValueSpec::of(property))
    }

    fn encryption_context(&self, property: &PropertyDescriptor, ctx: &CodecContext) -> EncryptionContext {
        EncryptionContext::new(self.state.schema.kind.clone(), property.name.clone())
            .with_context_id(ctx.encryption_context_id.clone())
            .with_cache_ttl(property.cache_ttl())
    }

    async fn encrypt(
        &self,
        property: &PropertyDescriptor,
        value: &NativeValue,
        ctx: &CodecContext,
    ) -> Result<Option<AttributeValue>, MappingError> {
        let Some(plaintext) = self.type_codec().to_payload(value, &ValueSpec::of(property))? else {
            return Ok(None);
        };
        let encryptor = self.set.hooks.encryptor.as_ref().ok_or_else(|| missing("field encryptor", property))?;
        let context = self.encryption_context(property, ctx);
        let ciphertext = ctx
            .guard(encryptor.encrypt(&plaintext, &context, &ctx.cancel))
            .await?;
        Ok(Some(AttributeValue::B(ciphertext)))
    }

    async fn decrypt(
        &self,
        property: &PropertyDescriptor,
        wire: &AttributeValue,
        ctx: &CodecContext,
    ) -> Result<NativeValue, MappingError> {
        let ciphertext = wire.as_b().ok_or_else(|| MappingError::TypeMismatch {
            expected: "ciphertext (B)".to_string(),
            actual: wire.type_tag().to_string(),
        })?;
        let encryptor = self.set.hooks.encryptor.as_ref().ok_or_else(|| missing("field encryptor", property))?;
        let context = self.encryption_context(property, ctx);
        let plaintext = ctx
            .guard(encryptor.decrypt(ciphertext, &context, &ctx.cancel))
            .await?;
        self.type_codec().from_payload(&plaintext, &ValueSpec::of(property))
    }

    /// Synchronous encode of a record nested as a map value.
    fn encode_nested(&self, record: &Record) -> Result<Item, MappingError> {
        self.check_kind(record)?;
        let mut item = Item::with_capacity(self.state.schema.properties.len());
        for property in self.state.schema.direct_properties() {
            let wrap = self.wrap(property, Direction::Encode);
            if property.needs_async_hook() {
                return Err(wrap(missing("synchronous conversion", property)));
            }
            if let Some(wire) = self.encode_plain(property, record.value(&property.name)).map_err(&wrap)? {
                item.insert(property.attribute.clone(), wire);
            }
        }
        self.write_discriminator(&mut item)?;
        Ok(item)
    }

    fn decode_nested(&self, item: &Item) -> Result<Record, MappingError> {
        if let Some(discriminator) = &self.state.discriminator {
            discriminator.check(&self.state.schema.kind, item)?;
        }
        let mut record = Record::new(self.state.schema.kind.clone());
        for property in self.state.schema.direct_properties() {
            let Some(wire) = item.get(&property.attribute) else {
                continue;
            };
            let wrap = self.wrap(property, Direction::Decode);
            if property.needs_async_hook() {
                return Err(wrap(missing("synchronous conversion", property)));
            }
            record.set(property.name.clone(), self.decode_plain(property, wire).map_err(&wrap)?);
        }
        Ok(record)
    }

    fn trace_item(&self, message: &'static str, item: &Item) {
        if tracing::enabled!(Level::TRACE) {
            trace!(item = ?self.state.sensitive.redact(item), "{}", message);
        }
    }
}

impl std::fmt::Debug for EntityCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCodec")
            .field("kind", &self.state.schema.kind)
            .field("properties", &self.state.schema.properties.len())
            .field("kinds", &self.set.kinds.keys().collect::<Vec<_>>())
            .field("hooks", &self.set.hooks)
            .finish()
    }
}

impl NestedCodec for EntityCodec {
    fn encode_entity(&self, kind: &str, record: &Record) -> Result<Item, MappingError> {
        self.dependency(kind)?.encode_nested(record)
    }

    fn decode_entity(&self, kind: &str, item: &Item) -> Result<Record, MappingError> {
        self.dependency(kind)?.decode_nested(item)
    }

    fn serializer(&self) -> Option<&dyn JsonSerializer> {
        self.set.hooks.serializer.as_deref()
    }
}

#[async_trait]
impl RelatedDecoder for EntityCodec {
    async fn decode_related(
        &self,
        related_kind: &str,
        item: &Item,
        ctx: &CodecContext,
    ) -> Result<Record, MappingError> {
        let codec = self.dependency(related_kind)?;
        codec.from_item(item, ctx).await
    }
}

fn missing(collaborator: &'static str, property: &PropertyDescriptor) -> MappingError {
    MappingError::MissingCollaborator {
        collaborator,
        property: property.name.clone(),
    }
}

/// Injected collaborators must cover every property that calls one.
fn check_collaborators(schema: &EntitySchema, hooks: &MapperHooks) -> Result<(), SchemaError> {
    for property in &schema.properties {
        let collaborator = if property.needs_serializer() && hooks.serializer.is_none() {
            "json serializer"
        } else if property.blob_reference.is_some() && hooks.blob_store.is_none() {
            "blob store"
        } else if property.is_encrypted() && hooks.encryptor.is_none() {
            "field encryptor"
        } else {
            continue;
        };
        return Err(SchemaError::MissingCollaborator {
            entity_kind: schema.kind.clone(),
            property: property.name.clone(),
            collaborator: collaborator.to_string(),
        });
    }
    Ok(())
}

fn related_records(value: &NativeValue) -> Result<Vec<&Record>, MappingError> {
    let mismatch = |actual: &str| MappingError::TypeMismatch {
        expected: "entity".to_string(),
        actual: actual.to_string(),
    };
    match value {
        NativeValue::Null => Ok(Vec::new()),
        NativeValue::Entity(record) => Ok(vec![record]),
        NativeValue::List(values) => values
            .iter()
            .map(|v| v.as_record().ok_or_else(|| mismatch(v.type_name())))
            .collect(),
        other => Err(mismatch(other.type_name())),
    }
}
