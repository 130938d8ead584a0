//! Value-level conversion between native values and wire values
//!
//! The wire tag is chosen by the declared [`NativeType`], never by the
//! runtime value. Null values and empty collections encode to `None` and are
//! left off the item. Nested entity kinds and JSON values are delegated to a
//! [`NestedCodec`] supplied by the owning entity codec.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::DateTime;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use lumadb_common::error::{FormatError, MappingError};

use crate::format::{self, DateTimeKind};
use crate::hooks::JsonSerializer;
use crate::native::{NativeType, NativeValue, Record};
use crate::schema::PropertyDescriptor;
use crate::wire::{value_from_json, value_to_json, AttributeValue, Item};

/// Declared shape of the value being converted.
#[derive(Debug, Clone, Copy)]
pub struct ValueSpec<'a> {
    /// Owning property, for error reporting
    pub property: &'a str,
    pub native_type: &'a NativeType,
    pub format: Option<&'a str>,
    pub date_kind: DateTimeKind,
}

impl<'a> ValueSpec<'a> {
    pub fn new(property: &'a str, native_type: &'a NativeType) -> Self {
        Self {
            property,
            native_type,
            format: None,
            date_kind: DateTimeKind::default(),
        }
    }

    pub fn of(property: &'a PropertyDescriptor) -> Self {
        Self {
            property: &property.name,
            native_type: &property.native_type,
            format: property.format.as_deref(),
            date_kind: property.date_kind,
        }
    }

    /// Same format rules applied to a collection element
    fn element(&self, native_type: &'a NativeType) -> Self {
        Self {
            native_type,
            ..*self
        }
    }

    fn mismatch(&self, actual: impl Into<String>) -> MappingError {
        MappingError::TypeMismatch {
            expected: self.native_type.to_string(),
            actual: actual.into(),
        }
    }
}

/// Conversion of nested entity kinds and opaque JSON values.
pub trait NestedCodec: Send + Sync {
    fn encode_entity(&self, kind: &str, record: &Record) -> Result<Item, MappingError>;

    fn decode_entity(&self, kind: &str, item: &Item) -> Result<Record, MappingError>;

    fn serializer(&self) -> Option<&dyn JsonSerializer>;
}

/// [`NestedCodec`] for schemas without nested kinds or JSON values.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNested;

impl NestedCodec for NoNested {
    fn encode_entity(&self, kind: &str, _record: &Record) -> Result<Item, MappingError> {
        Err(MappingError::UnknownEntityKind(kind.to_string()))
    }

    fn decode_entity(&self, kind: &str, _item: &Item) -> Result<Record, MappingError> {
        Err(MappingError::UnknownEntityKind(kind.to_string()))
    }

    fn serializer(&self) -> Option<&dyn JsonSerializer> {
        None
    }
}

/// Converts single values between their native and wire forms.
#[derive(Clone, Copy)]
pub struct TypeCodec<'a> {
    nested: &'a dyn NestedCodec,
}

impl TypeCodec<'static> {
    /// Codec for flat values only
    pub fn plain() -> Self {
        TypeCodec { nested: &NoNested }
    }
}

impl<'a> TypeCodec<'a> {
    pub fn new(nested: &'a dyn NestedCodec) -> Self {
        Self { nested }
    }

    fn serializer(&self, spec: &ValueSpec<'_>) -> Result<&'a dyn JsonSerializer, MappingError> {
        self.nested
            .serializer()
            .ok_or_else(|| MappingError::MissingCollaborator {
                collaborator: "json serializer",
                property: spec.property.to_string(),
            })
    }

    /// Encode a value; `None` means the attribute is omitted.
    pub fn encode(
        &self,
        value: &NativeValue,
        spec: &ValueSpec<'_>,
    ) -> Result<Option<AttributeValue>, MappingError> {
        if value.is_omitted() {
            return Ok(None);
        }

        let wire = match (spec.native_type, value) {
            (NativeType::Boolean, NativeValue::Bool(b)) => AttributeValue::Bool(*b),
            (NativeType::Bytes, NativeValue::Bytes(b)) => AttributeValue::B(b.clone()),
            (
                NativeType::String
                | NativeType::DateTime
                | NativeType::Uuid,
                _,
            ) => AttributeValue::S(render_text(value, spec)?),
            (NativeType::Integer | NativeType::Unsigned | NativeType::Float, _) => {
                AttributeValue::N(render_text(value, spec)?)
            }
            (NativeType::Json, NativeValue::Json(json)) => {
                AttributeValue::S(self.serializer(spec)?.serialize(json)?)
            }
            (NativeType::List(element), NativeValue::List(items) | NativeValue::Set(items)) => {
                let element = spec.element(element);
                AttributeValue::L(
                    items
                        .iter()
                        .map(|item| self.encode_element(item, &element))
                        .collect::<Result<_, _>>()?,
                )
            }
            (NativeType::Set(element), NativeValue::Set(items) | NativeValue::List(items)) => {
                encode_set(items, &spec.element(element))?
            }
            (NativeType::Map(element), NativeValue::Map(entries)) => {
                let element = spec.element(element);
                let mut map = Item::with_capacity(entries.len());
                for (key, entry) in entries {
                    if let Some(wire) = self.encode(entry, &element)? {
                        map.insert(key.clone(), wire);
                    }
                }
                AttributeValue::M(map)
            }
            (NativeType::Entity(kind), NativeValue::Entity(record)) => {
                if record.kind() != kind {
                    return Err(spec.mismatch(format!("entity<{}>", record.kind())));
                }
                AttributeValue::M(self.nested.encode_entity(kind, record)?)
            }
            (_, other) => return Err(spec.mismatch(other.type_name())),
        };
        Ok(Some(wire))
    }

    /// List elements cannot be omitted: empty collections are kept and
    /// nulls rejected.
    fn encode_element(
        &self,
        value: &NativeValue,
        spec: &ValueSpec<'_>,
    ) -> Result<AttributeValue, MappingError> {
        match value {
            NativeValue::Null => Err(spec.mismatch("null list element")),
            NativeValue::List(items) if items.is_empty() => Ok(AttributeValue::L(Vec::new())),
            NativeValue::Map(entries) if entries.is_empty() => Ok(AttributeValue::M(Item::new())),
            NativeValue::Set(items) if items.is_empty() => Err(MappingError::InvalidWire(
                "an empty set cannot be stored inside a list".to_string(),
            )),
            _ => self
                .encode(value, spec)?
                .ok_or_else(|| spec.mismatch(value.type_name())),
        }
    }

    /// Decode a wire value present on the item.
    pub fn decode(
        &self,
        wire: &AttributeValue,
        spec: &ValueSpec<'_>,
    ) -> Result<NativeValue, MappingError> {
        let tag_mismatch = || spec.mismatch(wire.type_tag());

        let value = match (spec.native_type, wire) {
            (NativeType::Boolean, AttributeValue::Bool(b)) => NativeValue::Bool(*b),
            (NativeType::Bytes, AttributeValue::B(b)) => NativeValue::Bytes(b.clone()),
            (NativeType::String | NativeType::DateTime | NativeType::Uuid, AttributeValue::S(s))
            | (
                NativeType::Integer | NativeType::Unsigned | NativeType::Float,
                AttributeValue::N(s),
            ) => parse_text(s, spec)?,
            (NativeType::Json, AttributeValue::S(s)) => NativeValue::Json(
                self.serializer(spec)?
                    .deserialize(s, spec.native_type)?,
            ),
            (NativeType::List(element), AttributeValue::L(items)) => {
                let element = spec.element(element);
                NativeValue::List(
                    items
                        .iter()
                        .map(|item| self.decode(item, &element))
                        .collect::<Result<_, _>>()?,
                )
            }
            (NativeType::List(element), AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_)) => {
                match decode_set(wire, &spec.element(element))? {
                    NativeValue::Set(items) => NativeValue::List(items),
                    other => other,
                }
            }
            (NativeType::Set(element), AttributeValue::L(items)) => {
                let element = spec.element(element);
                let mut decoded = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.decode(item, &element)?;
                    if !decoded.contains(&value) {
                        decoded.push(value);
                    }
                }
                NativeValue::Set(decoded)
            }
            (NativeType::Set(element), _) => decode_set(wire, &spec.element(element))?,
            (NativeType::Map(element), AttributeValue::M(map)) => {
                let element = spec.element(element);
                let mut entries = BTreeMap::new();
                for (key, entry) in map {
                    entries.insert(key.clone(), self.decode(entry, &element)?);
                }
                NativeValue::Map(entries)
            }
            (NativeType::Entity(kind), AttributeValue::M(map)) => {
                NativeValue::Entity(self.nested.decode_entity(kind, map)?)
            }
            _ => return Err(tag_mismatch()),
        };
        Ok(value)
    }

    /// Encode through the injected serializer, whatever the declared type.
    pub fn encode_json_blob(
        &self,
        value: &NativeValue,
        spec: &ValueSpec<'_>,
    ) -> Result<Option<AttributeValue>, MappingError> {
        if value.is_omitted() {
            return Ok(None);
        }
        let json = native_to_json(value, spec)?;
        Ok(Some(AttributeValue::S(self.serializer(spec)?.serialize(&json)?)))
    }

    pub fn decode_json_blob(
        &self,
        wire: &AttributeValue,
        spec: &ValueSpec<'_>,
    ) -> Result<NativeValue, MappingError> {
        let text = wire.as_s().ok_or_else(|| spec.mismatch(wire.type_tag()))?;
        let json = self.serializer(spec)?.deserialize(text, spec.native_type)?;
        json_to_native(&json, spec)
    }

    /// Bytes handed to the blob store or the field encryptor.
    ///
    /// Strings travel as UTF-8 and byte sequences as-is; every other type as
    /// the DynamoDB JSON of its encoded wire value.
    pub fn to_payload(
        &self,
        value: &NativeValue,
        spec: &ValueSpec<'_>,
    ) -> Result<Option<Vec<u8>>, MappingError> {
        let payload = match (spec.native_type, value) {
            (_, v) if v.is_omitted() => return Ok(None),
            (NativeType::String, NativeValue::String(s)) => s.as_bytes().to_vec(),
            (NativeType::Bytes, NativeValue::Bytes(b)) => b.clone(),
            _ => match self.encode(value, spec)? {
                Some(wire) => serde_json::to_vec(&value_to_json(&wire))
                    .map_err(|e| MappingError::InvalidWire(e.to_string()))?,
                None => return Ok(None),
            },
        };
        Ok(Some(payload))
    }

    pub fn from_payload(
        &self,
        payload: &[u8],
        spec: &ValueSpec<'_>,
    ) -> Result<NativeValue, MappingError> {
        match spec.native_type {
            NativeType::String => String::from_utf8(payload.to_vec())
                .map(NativeValue::String)
                .map_err(|e| MappingError::InvalidWire(format!("payload is not UTF-8: {}", e))),
            NativeType::Bytes => Ok(NativeValue::Bytes(payload.to_vec())),
            _ => {
                let json: JsonValue = serde_json::from_slice(payload)
                    .map_err(|e| MappingError::InvalidWire(format!("payload is not JSON: {}", e)))?;
                self.decode(&value_from_json(&json)?, spec)
            }
        }
    }
}

/// Time-to-live as whole seconds since the epoch.
pub fn encode_ttl(
    value: &NativeValue,
    spec: &ValueSpec<'_>,
) -> Result<Option<AttributeValue>, MappingError> {
    let seconds = match value {
        NativeValue::Null => return Ok(None),
        NativeValue::DateTime(dt) => dt.timestamp(),
        NativeValue::Integer(i) => *i,
        NativeValue::Unsigned(u) => {
            i64::try_from(*u).map_err(|_| spec.mismatch("u64 beyond i64 range"))?
        }
        other => return Err(spec.mismatch(other.type_name())),
    };
    Ok(Some(AttributeValue::N(seconds.to_string())))
}

pub fn decode_ttl(wire: &AttributeValue, spec: &ValueSpec<'_>) -> Result<NativeValue, MappingError> {
    let text = wire.as_n().ok_or_else(|| spec.mismatch(wire.type_tag()))?;
    let seconds = format::parse_i64(text, None)?;
    match spec.native_type {
        NativeType::DateTime => {
            let dt = DateTime::from_timestamp(seconds, 0).ok_or_else(|| FormatError::Parse {
                template: "epoch seconds".to_string(),
                input: text.to_string(),
            })?;
            Ok(NativeValue::DateTime(spec.date_kind.apply(dt.fixed_offset())))
        }
        NativeType::Unsigned => u64::try_from(seconds)
            .map(NativeValue::Unsigned)
            .map_err(|_| spec.mismatch("negative time-to-live")),
        _ => Ok(NativeValue::Integer(seconds)),
    }
}

/// Render a scalar as text using its declared format.
pub fn render_text(value: &NativeValue, spec: &ValueSpec<'_>) -> Result<String, MappingError> {
    let text = match (spec.native_type, value) {
        (NativeType::String, NativeValue::String(s)) => s.clone(),
        (NativeType::Integer, NativeValue::Integer(i)) => format::render_i64(*i, spec.format)?,
        (NativeType::Integer, NativeValue::Unsigned(u)) => {
            let i = i64::try_from(*u).map_err(|_| spec.mismatch("u64 beyond i64 range"))?;
            format::render_i64(i, spec.format)?
        }
        (NativeType::Unsigned, NativeValue::Unsigned(u)) => format::render_u64(*u, spec.format)?,
        (NativeType::Unsigned, NativeValue::Integer(i)) => {
            let u = u64::try_from(*i).map_err(|_| spec.mismatch("negative i64"))?;
            format::render_u64(u, spec.format)?
        }
        (NativeType::Float, v @ (NativeValue::Float(_) | NativeValue::Integer(_) | NativeValue::Unsigned(_))) => {
            let f = v.as_f64().ok_or_else(|| spec.mismatch(v.type_name()))?;
            format::render_f64(f, spec.format)?
        }
        (NativeType::Boolean, NativeValue::Bool(b)) => b.to_string(),
        (NativeType::Bytes, NativeValue::Bytes(b)) => STANDARD.encode(b),
        (NativeType::DateTime, NativeValue::DateTime(dt)) => {
            format::render_datetime(dt, spec.date_kind, spec.format)?
        }
        (NativeType::Uuid, NativeValue::Uuid(id)) => id.hyphenated().to_string(),
        (_, other) => return Err(spec.mismatch(other.type_name())),
    };
    Ok(text)
}

/// Parse text produced by [`render_text`] (or a tolerant variant of it).
pub fn parse_text(text: &str, spec: &ValueSpec<'_>) -> Result<NativeValue, MappingError> {
    let value = match spec.native_type {
        NativeType::String => NativeValue::String(text.to_string()),
        NativeType::Integer => NativeValue::Integer(format::parse_i64(text, spec.format)?),
        NativeType::Unsigned => NativeValue::Unsigned(format::parse_u64(text, spec.format)?),
        NativeType::Float => NativeValue::Float(format::parse_f64(text, spec.format)?),
        NativeType::Boolean => match text.trim() {
            "true" | "True" | "TRUE" => NativeValue::Bool(true),
            "false" | "False" | "FALSE" => NativeValue::Bool(false),
            _ => return Err(parse_failure("bool", text)),
        },
        NativeType::Bytes => NativeValue::Bytes(
            STANDARD
                .decode(text)
                .map_err(|_| parse_failure("base64", text))?,
        ),
        NativeType::DateTime => {
            NativeValue::DateTime(format::parse_datetime(text, spec.date_kind, spec.format)?)
        }
        NativeType::Uuid => NativeValue::Uuid(
            Uuid::parse_str(text.trim()).map_err(|_| parse_failure("uuid", text))?,
        ),
        _ => return Err(spec.mismatch("text")),
    };
    Ok(value)
}

fn parse_failure(template: &str, input: &str) -> MappingError {
    MappingError::Format(FormatError::Parse {
        template: template.to_string(),
        input: input.to_string(),
    })
}

/// Sets are written de-duplicated in first-seen order.
fn encode_set(items: &[NativeValue], spec: &ValueSpec<'_>) -> Result<AttributeValue, MappingError> {
    match spec.native_type {
        NativeType::Bytes => {
            let mut out: Vec<Vec<u8>> = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    NativeValue::Bytes(b) if !out.contains(b) => out.push(b.clone()),
                    NativeValue::Bytes(_) => {}
                    other => return Err(spec.mismatch(other.type_name())),
                }
            }
            Ok(AttributeValue::Bs(out))
        }
        ty => {
            let mut out: Vec<String> = Vec::with_capacity(items.len());
            for item in items {
                if item.is_null() {
                    return Err(spec.mismatch("null set element"));
                }
                let text = render_text(item, spec)?;
                if !out.contains(&text) {
                    out.push(text);
                }
            }
            if ty.is_numeric() {
                Ok(AttributeValue::Ns(out))
            } else {
                Ok(AttributeValue::Ss(out))
            }
        }
    }
}

fn decode_set(wire: &AttributeValue, spec: &ValueSpec<'_>) -> Result<NativeValue, MappingError> {
    let texts = match (spec.native_type, wire) {
        (NativeType::Bytes, AttributeValue::Bs(items)) => {
            return Ok(NativeValue::Set(
                items.iter().cloned().map(NativeValue::Bytes).collect(),
            ));
        }
        (ty, AttributeValue::Ns(items)) if ty.is_numeric() => items,
        (ty, AttributeValue::Ss(items)) if !ty.is_numeric() && *ty != NativeType::Bytes => items,
        _ => return Err(spec.mismatch(wire.type_tag())),
    };

    let mut values = Vec::with_capacity(texts.len());
    for text in texts {
        let value = parse_text(text, spec)?;
        if !values.contains(&value) {
            values.push(value);
        }
    }
    Ok(NativeValue::Set(values))
}

/// Plain JSON form of a value, for the JSON-blob path.
pub fn native_to_json(value: &NativeValue, spec: &ValueSpec<'_>) -> Result<JsonValue, MappingError> {
    let json = match value {
        NativeValue::Null => JsonValue::Null,
        NativeValue::String(s) => JsonValue::String(s.clone()),
        NativeValue::Integer(i) => JsonValue::from(*i),
        NativeValue::Unsigned(u) => JsonValue::from(*u),
        NativeValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .ok_or_else(|| FormatError::Render {
                template: "json".to_string(),
                value: f.to_string(),
            })?,
        NativeValue::Bool(b) => JsonValue::Bool(*b),
        NativeValue::Bytes(b) => JsonValue::String(STANDARD.encode(b)),
        NativeValue::DateTime(dt) => {
            JsonValue::String(format::render_datetime(dt, spec.date_kind, spec.format)?)
        }
        NativeValue::Uuid(id) => JsonValue::String(id.to_string()),
        NativeValue::Json(json) => json.clone(),
        NativeValue::List(items) | NativeValue::Set(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| native_to_json(item, spec))
                .collect::<Result<_, _>>()?,
        ),
        NativeValue::Map(entries) => JsonValue::Object(
            entries
                .iter()
                .map(|(k, v)| native_to_json(v, spec).map(|json| (k.clone(), json)))
                .collect::<Result<_, _>>()?,
        ),
        NativeValue::Entity(record) => return Err(spec.mismatch(format!("entity<{}>", record.kind()))),
    };
    Ok(json)
}

/// Inverse of [`native_to_json`], directed by the declared type.
pub fn json_to_native(json: &JsonValue, spec: &ValueSpec<'_>) -> Result<NativeValue, MappingError> {
    if json.is_null() {
        return Ok(NativeValue::Null);
    }
    let mismatch = || spec.mismatch(format!("json {}", json_kind(json)));

    let value = match spec.native_type {
        NativeType::Json => NativeValue::Json(json.clone()),
        NativeType::String => NativeValue::String(json.as_str().ok_or_else(mismatch)?.to_string()),
        NativeType::Integer => NativeValue::Integer(json.as_i64().ok_or_else(mismatch)?),
        NativeType::Unsigned => NativeValue::Unsigned(json.as_u64().ok_or_else(mismatch)?),
        NativeType::Float => NativeValue::Float(json.as_f64().ok_or_else(mismatch)?),
        NativeType::Boolean => NativeValue::Bool(json.as_bool().ok_or_else(mismatch)?),
        NativeType::Bytes | NativeType::DateTime | NativeType::Uuid => {
            parse_text(json.as_str().ok_or_else(mismatch)?, spec)?
        }
        NativeType::List(element) | NativeType::Set(element) => {
            let element = spec.element(element);
            let items = json
                .as_array()
                .ok_or_else(mismatch)?
                .iter()
                .map(|item| json_to_native(item, &element))
                .collect::<Result<Vec<_>, _>>()?;
            if matches!(spec.native_type, NativeType::Set(_)) {
                NativeValue::Set(items)
            } else {
                NativeValue::List(items)
            }
        }
        NativeType::Map(element) => {
            let element = spec.element(element);
            let mut entries = BTreeMap::new();
            for (key, entry) in json.as_object().ok_or_else(mismatch)? {
                entries.insert(key.clone(), json_to_native(entry, &element)?);
            }
            NativeValue::Map(entries)
        }
        NativeType::Entity(_) => return Err(mismatch()),
    };
    Ok(value)
}

fn json_kind(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::SerdeJsonSerializer;
    use proptest::prelude::*;

    fn codec() -> TypeCodec<'static> {
        TypeCodec::plain()
    }

    fn round_trip(value: NativeValue, ty: NativeType) -> NativeValue {
        let spec = ValueSpec::new("p", &ty);
        let wire = codec().encode(&value, &spec).unwrap().unwrap();
        codec().decode(&wire, &spec).unwrap()
    }

    /// Nested codec offering only a serializer.
    struct JsonOnly(SerdeJsonSerializer);

    impl NestedCodec for JsonOnly {
        fn encode_entity(&self, kind: &str, _record: &Record) -> Result<Item, MappingError> {
            Err(MappingError::UnknownEntityKind(kind.into()))
        }

        fn decode_entity(&self, kind: &str, _item: &Item) -> Result<Record, MappingError> {
            Err(MappingError::UnknownEntityKind(kind.into()))
        }

        fn serializer(&self) -> Option<&dyn JsonSerializer> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_scalar_tags() {
        let ty = NativeType::Integer;
        let spec = ValueSpec::new("n", &ty);
        assert_eq!(
            codec().encode(&NativeValue::Integer(7), &spec).unwrap(),
            Some(AttributeValue::N("7".into()))
        );

        let ty = NativeType::Uuid;
        let id = Uuid::new_v4();
        assert_eq!(
            codec().encode(&id.into(), &ValueSpec::new("id", &ty)).unwrap(),
            Some(AttributeValue::S(id.to_string()))
        );
        assert_eq!(round_trip(id.into(), NativeType::Uuid), NativeValue::Uuid(id));
    }

    #[test]
    fn test_numeric_extremes() {
        for value in [i64::MIN, i64::MAX, 0] {
            assert_eq!(round_trip(value.into(), NativeType::Integer), NativeValue::Integer(value));
        }
        assert_eq!(
            round_trip(u64::MAX.into(), NativeType::Unsigned),
            NativeValue::Unsigned(u64::MAX)
        );
        for value in [f64::MIN, f64::MAX, f64::MIN_POSITIVE, -0.5] {
            assert_eq!(round_trip(value.into(), NativeType::Float), NativeValue::Float(value));
        }
    }

    #[test]
    fn test_omission() {
        let ty = NativeType::list(NativeType::String);
        let spec = ValueSpec::new("tags", &ty);
        assert_eq!(codec().encode(&NativeValue::Null, &spec).unwrap(), None);
        assert_eq!(codec().encode(&NativeValue::List(vec![]), &spec).unwrap(), None);
    }

    #[test]
    fn test_type_chosen_by_declaration() {
        let ty = NativeType::String;
        let err = codec()
            .encode(&NativeValue::Integer(1), &ValueSpec::new("name", &ty))
            .unwrap_err();
        assert!(matches!(err, MappingError::TypeMismatch { .. }));

        let err = codec()
            .decode(&AttributeValue::N("1".into()), &ValueSpec::new("name", &ty))
            .unwrap_err();
        assert!(matches!(err, MappingError::TypeMismatch { ref actual, .. } if actual == "N"));
    }

    #[test]
    fn test_sets_deduplicate() {
        let ty = NativeType::set(NativeType::Integer);
        let spec = ValueSpec::new("ids", &ty);
        let wire = codec()
            .encode(
                &NativeValue::Set(vec![3i64.into(), 1i64.into(), 3i64.into()]),
                &spec,
            )
            .unwrap()
            .unwrap();
        assert_eq!(wire, AttributeValue::Ns(vec!["3".into(), "1".into()]));
        assert_eq!(
            codec().decode(&wire, &spec).unwrap(),
            NativeValue::Set(vec![3i64.into(), 1i64.into()])
        );

        let ty = NativeType::set(NativeType::Bytes);
        let wire = codec()
            .encode(
                &NativeValue::Set(vec![vec![1u8].into(), vec![1u8].into()]),
                &ValueSpec::new("b", &ty),
            )
            .unwrap();
        assert_eq!(wire, Some(AttributeValue::Bs(vec![vec![1]])));
    }

    #[test]
    fn test_list_of_lists_keeps_empty_elements() {
        let ty = NativeType::list(NativeType::list(NativeType::Integer));
        let value = NativeValue::List(vec![
            NativeValue::List(vec![]),
            NativeValue::List(vec![1i64.into()]),
        ]);
        assert_eq!(round_trip(value.clone(), ty), value);
    }

    #[test]
    fn test_null_list_element_rejected() {
        let ty = NativeType::list(NativeType::String);
        let err = codec()
            .encode(
                &NativeValue::List(vec!["a".into(), NativeValue::Null]),
                &ValueSpec::new("l", &ty),
            )
            .unwrap_err();
        assert!(matches!(err, MappingError::TypeMismatch { .. }));
    }

    #[test]
    fn test_string_map() {
        let ty = NativeType::map(NativeType::String);
        let mut entries = BTreeMap::new();
        entries.insert("lang".to_string(), NativeValue::from("en"));
        entries.insert("tz".to_string(), NativeValue::from("UTC"));
        let value = NativeValue::Map(entries);
        assert_eq!(round_trip(value.clone(), ty), value);
    }

    #[test]
    fn test_datetime_with_format() {
        let ty = NativeType::DateTime;
        let spec = ValueSpec {
            property: "day",
            native_type: &ty,
            format: Some("%Y-%m-%d"),
            date_kind: DateTimeKind::Utc,
        };
        let dt = DateTime::parse_from_rfc3339("2024-05-06T00:00:00Z").unwrap();
        let wire = codec().encode(&dt.into(), &spec).unwrap().unwrap();
        assert_eq!(wire, AttributeValue::S("2024-05-06".into()));
        assert_eq!(codec().decode(&wire, &spec).unwrap(), NativeValue::DateTime(dt));
    }

    #[test]
    fn test_ttl_scenario() {
        let ty = NativeType::DateTime;
        let spec = ValueSpec {
            date_kind: DateTimeKind::Utc,
            ..ValueSpec::new("expires", &ty)
        };
        let dt = DateTime::parse_from_rfc3339("1970-01-01T00:00:10Z").unwrap();
        let wire = encode_ttl(&dt.into(), &spec).unwrap().unwrap();
        assert_eq!(wire, AttributeValue::N("10".into()));
        assert_eq!(decode_ttl(&wire, &spec).unwrap(), NativeValue::DateTime(dt));
    }

    #[test]
    fn test_json_needs_serializer() {
        let ty = NativeType::Json;
        let spec = ValueSpec::new("doc", &ty);
        let value = NativeValue::Json(serde_json::json!({"k": 1}));
        let err = codec().encode(&value, &spec).unwrap_err();
        assert!(matches!(err, MappingError::MissingCollaborator { .. }));

        let nested = JsonOnly(SerdeJsonSerializer::new());
        let with_json = TypeCodec::new(&nested);
        let wire = with_json.encode(&value, &spec).unwrap().unwrap();
        assert_eq!(wire, AttributeValue::S(r#"{"k":1}"#.into()));
        assert_eq!(with_json.decode(&wire, &spec).unwrap(), value);
    }

    #[test]
    fn test_json_blob_of_typed_list() {
        let nested = JsonOnly(SerdeJsonSerializer::new());
        let codec = TypeCodec::new(&nested);
        let ty = NativeType::list(NativeType::DateTime);
        let spec = ValueSpec::new("history", &ty);
        let dt = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap();
        let value = NativeValue::List(vec![dt.into()]);

        let wire = codec.encode_json_blob(&value, &spec).unwrap().unwrap();
        assert_eq!(wire, AttributeValue::S(r#"["2024-01-01T00:00:00Z"]"#.into()));
        assert_eq!(codec.decode_json_blob(&wire, &spec).unwrap(), value);
    }

    #[test]
    fn test_payload_round_trip() {
        let ty = NativeType::String;
        let spec = ValueSpec::new("s", &ty);
        let payload = codec().to_payload(&"héllo".into(), &spec).unwrap().unwrap();
        assert_eq!(payload, "héllo".as_bytes());
        assert_eq!(codec().from_payload(&payload, &spec).unwrap(), NativeValue::from("héllo"));

        let ty = NativeType::Integer;
        let spec = ValueSpec::new("n", &ty);
        let payload = codec().to_payload(&NativeValue::Integer(-5), &spec).unwrap().unwrap();
        assert_eq!(payload, br#"{"N":"-5"}"#);
        assert_eq!(codec().from_payload(&payload, &spec).unwrap(), NativeValue::Integer(-5));
    }

    #[test]
    fn test_nested_entity_without_codec() {
        let ty = NativeType::entity("Address");
        let value = NativeValue::Entity(Record::new("Address").with("city", "Lagos"));
        let err = codec().encode(&value, &ValueSpec::new("a", &ty)).unwrap_err();
        assert!(matches!(err, MappingError::UnknownEntityKind(ref k) if k == "Address"));
    }

    proptest! {
        #[test]
        fn prop_string_list_round_trip(items in prop::collection::vec(".*", 1..8)) {
            let value = NativeValue::List(items.into_iter().map(NativeValue::String).collect());
            prop_assert_eq!(round_trip(value.clone(), NativeType::list(NativeType::String)), value);
        }

        #[test]
        fn prop_integer_with_format(value in any::<i64>(), fmt in prop::sample::select(vec!["D8", "N0", "X"])) {
            let ty = NativeType::Integer;
            let spec = ValueSpec { format: Some(fmt), ..ValueSpec::new("n", &ty) };
            let wire = codec().encode(&value.into(), &spec).unwrap().unwrap();
            prop_assert_eq!(codec().decode(&wire, &spec).unwrap(), NativeValue::Integer(value));
        }
    }
}
