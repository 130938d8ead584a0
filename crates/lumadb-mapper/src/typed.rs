//! Strongly typed bridge
//!
//! Application structs implement [`Entity`] and reach the codec through
//! [`TypedCodec`]. Field values cross into the native model with
//! [`IntoNative`] and come back with [`FromNative`]; an unset property reads
//! back as the field type's default where it has one.

use std::any::type_name;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::marker::PhantomData;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use lumadb_common::error::{Direction, MappingError, SchemaError};

use crate::entity::EntityCodec;
use crate::hooks::{CodecContext, MapperHooks};
use crate::key::KeyPair;
use crate::native::{NativeValue, Record};
use crate::registry::CodecRegistry;
use crate::schema::EntitySchema;
use crate::wire::Item;

/// Conversion of a Rust value into the native model.
pub trait IntoNative {
    fn into_native(self) -> NativeValue;
}

/// Conversion of a native value back into a Rust value.
pub trait FromNative: Sized {
    fn from_native(value: NativeValue) -> Result<Self, MappingError>;
}

fn mismatch<T>(value: &NativeValue) -> MappingError {
    MappingError::TypeMismatch {
        expected: type_name::<T>().to_string(),
        actual: value.type_name().to_string(),
    }
}

macro_rules! impl_native_via_from {
    ($($ty:ty),*) => {
        $(
            impl IntoNative for $ty {
                fn into_native(self) -> NativeValue {
                    NativeValue::from(self)
                }
            }
        )*
    };
}

impl_native_via_from!(String, i64, i32, u64, f64, bool, DateTime<FixedOffset>, Uuid, Record);

impl IntoNative for &str {
    fn into_native(self) -> NativeValue {
        NativeValue::String(self.to_string())
    }
}

impl IntoNative for u32 {
    fn into_native(self) -> NativeValue {
        NativeValue::Unsigned(u64::from(self))
    }
}

impl IntoNative for DateTime<Utc> {
    fn into_native(self) -> NativeValue {
        NativeValue::DateTime(self.fixed_offset())
    }
}

impl IntoNative for Bytes {
    fn into_native(self) -> NativeValue {
        NativeValue::Bytes(self.to_vec())
    }
}

impl IntoNative for JsonValue {
    fn into_native(self) -> NativeValue {
        match self {
            JsonValue::Null => NativeValue::Null,
            json => NativeValue::Json(json),
        }
    }
}

impl<T: IntoNative> IntoNative for Option<T> {
    fn into_native(self) -> NativeValue {
        self.map_or(NativeValue::Null, IntoNative::into_native)
    }
}

impl<T: IntoNative> IntoNative for Vec<T> {
    fn into_native(self) -> NativeValue {
        NativeValue::List(self.into_iter().map(IntoNative::into_native).collect())
    }
}

impl<T: IntoNative> IntoNative for BTreeSet<T> {
    fn into_native(self) -> NativeValue {
        NativeValue::Set(self.into_iter().map(IntoNative::into_native).collect())
    }
}

impl<T: IntoNative> IntoNative for HashSet<T> {
    fn into_native(self) -> NativeValue {
        NativeValue::Set(self.into_iter().map(IntoNative::into_native).collect())
    }
}

impl<T: IntoNative> IntoNative for BTreeMap<String, T> {
    fn into_native(self) -> NativeValue {
        NativeValue::Map(self.into_iter().map(|(k, v)| (k, v.into_native())).collect())
    }
}

impl<T: IntoNative> IntoNative for HashMap<String, T> {
    fn into_native(self) -> NativeValue {
        NativeValue::Map(self.into_iter().map(|(k, v)| (k, v.into_native())).collect())
    }
}

impl FromNative for String {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        match value {
            NativeValue::Null => Ok(String::new()),
            NativeValue::String(s) => Ok(s),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromNative for i64 {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        match value {
            NativeValue::Null => Ok(0),
            ref v @ (NativeValue::Integer(_) | NativeValue::Unsigned(_)) => {
                v.as_i64().ok_or_else(|| mismatch::<Self>(v))
            }
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromNative for i32 {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        let wide = i64::from_native(value)?;
        i32::try_from(wide).map_err(|_| mismatch::<Self>(&NativeValue::Integer(wide)))
    }
}

impl FromNative for u64 {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        match value {
            NativeValue::Null => Ok(0),
            NativeValue::Unsigned(u) => Ok(u),
            NativeValue::Integer(i) => {
                u64::try_from(i).map_err(|_| mismatch::<Self>(&NativeValue::Integer(i)))
            }
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromNative for u32 {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        let wide = u64::from_native(value)?;
        u32::try_from(wide).map_err(|_| mismatch::<Self>(&NativeValue::Unsigned(wide)))
    }
}

impl FromNative for f64 {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        match value {
            NativeValue::Null => Ok(0.0),
            ref v @ (NativeValue::Float(_) | NativeValue::Integer(_) | NativeValue::Unsigned(_)) => {
                v.as_f64().ok_or_else(|| mismatch::<Self>(v))
            }
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromNative for bool {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        match value {
            NativeValue::Null => Ok(false),
            NativeValue::Bool(b) => Ok(b),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromNative for Bytes {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        match value {
            NativeValue::Null => Ok(Bytes::new()),
            NativeValue::Bytes(b) => Ok(Bytes::from(b)),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromNative for Uuid {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        match value {
            NativeValue::Null => Ok(Uuid::nil()),
            NativeValue::Uuid(id) => Ok(id),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

/// Date-times have no meaningful default; use `Option` for optional ones.
impl FromNative for DateTime<FixedOffset> {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        match value {
            NativeValue::DateTime(dt) => Ok(dt),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromNative for DateTime<Utc> {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        DateTime::<FixedOffset>::from_native(value).map(|dt| dt.with_timezone(&Utc))
    }
}

impl FromNative for JsonValue {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        match value {
            NativeValue::Null => Ok(JsonValue::Null),
            NativeValue::Json(json) => Ok(json),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromNative for Record {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        match value {
            NativeValue::Entity(record) => Ok(record),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl<T: FromNative> FromNative for Option<T> {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        match value {
            NativeValue::Null => Ok(None),
            value => T::from_native(value).map(Some),
        }
    }
}

fn elements(value: NativeValue) -> Result<Vec<NativeValue>, NativeValue> {
    match value {
        NativeValue::Null => Ok(Vec::new()),
        NativeValue::List(items) | NativeValue::Set(items) => Ok(items),
        other => Err(other),
    }
}

fn entries(value: NativeValue) -> Result<BTreeMap<String, NativeValue>, NativeValue> {
    match value {
        NativeValue::Null => Ok(BTreeMap::new()),
        NativeValue::Map(entries) => Ok(entries),
        other => Err(other),
    }
}

impl<T: FromNative> FromNative for Vec<T> {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        elements(value)
            .map_err(|other| mismatch::<Self>(&other))?
            .into_iter()
            .map(T::from_native)
            .collect()
    }
}

impl<T: FromNative + Ord> FromNative for BTreeSet<T> {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        elements(value)
            .map_err(|other| mismatch::<Self>(&other))?
            .into_iter()
            .map(T::from_native)
            .collect()
    }
}

impl<T: FromNative + Eq + Hash> FromNative for HashSet<T> {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        elements(value)
            .map_err(|other| mismatch::<Self>(&other))?
            .into_iter()
            .map(T::from_native)
            .collect()
    }
}

impl<T: FromNative> FromNative for BTreeMap<String, T> {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        entries(value)
            .map_err(|other| mismatch::<Self>(&other))?
            .into_iter()
            .map(|(k, v)| T::from_native(v).map(|v| (k, v)))
            .collect()
    }
}

impl<T: FromNative> FromNative for HashMap<String, T> {
    fn from_native(value: NativeValue) -> Result<Self, MappingError> {
        entries(value)
            .map_err(|other| mismatch::<Self>(&other))?
            .into_iter()
            .map(|(k, v)| T::from_native(v).map(|v| (k, v)))
            .collect()
    }
}

impl Record {
    /// Set a property from any [`IntoNative`] value
    #[must_use]
    pub fn with_native(mut self, property: impl Into<String>, value: impl IntoNative) -> Self {
        self.set(property, value.into_native());
        self
    }

    /// Remove a property and convert it, naming the property on failure
    pub fn take_as<T: FromNative>(&mut self, property: &str) -> Result<T, MappingError> {
        T::from_native(self.take(property)).map_err(|e| {
            e.property(self.kind(), property, type_name::<T>(), Direction::Decode)
        })
    }
}

/// An application struct stored as one entity kind.
pub trait Entity: Sized + Send + Sync {
    const KIND: &'static str;

    fn schema() -> Result<EntitySchema, SchemaError>;

    fn to_record(&self) -> Record;

    fn from_record(record: Record) -> Result<Self, MappingError>;
}

/// [`EntityCodec`] speaking an application type.
pub struct TypedCodec<T> {
    codec: EntityCodec,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> TypedCodec<T> {
    /// Standalone codec for a self-contained entity.
    pub fn new(hooks: MapperHooks) -> Result<Self, SchemaError> {
        Ok(Self::wrap(EntityCodec::new(T::schema()?, hooks)?))
    }

    /// Codec registered under [`Entity::KIND`].
    pub fn from_registry(registry: &CodecRegistry) -> Result<Self, MappingError> {
        registry
            .get(T::KIND)
            .map(Self::wrap)
            .ok_or_else(|| MappingError::UnknownEntityKind(T::KIND.to_string()))
    }

    fn wrap(codec: EntityCodec) -> Self {
        Self {
            codec,
            _entity: PhantomData,
        }
    }

    pub fn codec(&self) -> &EntityCodec {
        &self.codec
    }

    pub async fn to_item(&self, entity: &T, ctx: &CodecContext) -> Result<Item, MappingError> {
        self.codec.to_item(&entity.to_record(), ctx).await
    }

    pub async fn to_items(&self, entity: &T, ctx: &CodecContext) -> Result<Vec<Item>, MappingError> {
        self.codec.to_items(&entity.to_record(), ctx).await
    }

    pub async fn from_item(&self, item: &Item, ctx: &CodecContext) -> Result<T, MappingError> {
        let record = self.codec.from_item(item, ctx).await?;
        T::from_record(record).map_err(|e| e.entity(T::KIND))
    }

    pub async fn from_items(&self, items: &[Item], ctx: &CodecContext) -> Result<T, MappingError> {
        let record = self.codec.from_items(items, ctx).await?;
        T::from_record(record).map_err(|e| e.entity(T::KIND))
    }

    pub fn primary_key(&self, entity: &T) -> Result<KeyPair, MappingError> {
        self.codec.primary_key(&entity.to_record())
    }

    pub fn index_key(&self, index: &str, entity: &T) -> Result<Option<KeyPair>, MappingError> {
        self.codec.index_key(index, &entity.to_record())
    }

    pub fn key_attributes(&self, entity: &T) -> Result<Item, MappingError> {
        self.codec.key_attributes(&entity.to_record())
    }
}

impl<T> Clone for TypedCodec<T> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            _entity: PhantomData,
        }
    }
}
