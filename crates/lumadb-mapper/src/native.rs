//! Native value model
//!
//! [`NativeValue`] is the dynamic in-memory form of one property value and
//! [`Record`] the dynamic form of one entity. Application structs reach this
//! model through the [`crate::typed`] traits.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared native type of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "of")]
pub enum NativeType {
    String,
    Integer,
    Unsigned,
    Float,
    Boolean,
    Bytes,
    DateTime,
    Uuid,
    /// Opaque object handed to the injected JSON serializer
    Json,
    List(Box<NativeType>),
    Set(Box<NativeType>),
    /// String-keyed dictionary
    Map(Box<NativeType>),
    /// Nested entity kind, converted by that kind's codec
    Entity(String),
}

impl NativeType {
    pub fn list(element: NativeType) -> Self {
        NativeType::List(Box::new(element))
    }

    pub fn set(element: NativeType) -> Self {
        NativeType::Set(Box::new(element))
    }

    pub fn map(value: NativeType) -> Self {
        NativeType::Map(Box::new(value))
    }

    pub fn entity(kind: impl Into<String>) -> Self {
        NativeType::Entity(kind.into())
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            NativeType::List(_) | NativeType::Set(_) | NativeType::Map(_)
        )
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            NativeType::Integer | NativeType::Unsigned | NativeType::Float
        )
    }

    /// Entity kinds referenced anywhere inside this type
    pub fn entity_kinds(&self) -> Vec<&str> {
        match self {
            NativeType::Entity(kind) => vec![kind.as_str()],
            NativeType::List(inner) | NativeType::Set(inner) | NativeType::Map(inner) => {
                inner.entity_kinds()
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::String => f.write_str("string"),
            NativeType::Integer => f.write_str("i64"),
            NativeType::Unsigned => f.write_str("u64"),
            NativeType::Float => f.write_str("f64"),
            NativeType::Boolean => f.write_str("bool"),
            NativeType::Bytes => f.write_str("bytes"),
            NativeType::DateTime => f.write_str("datetime"),
            NativeType::Uuid => f.write_str("uuid"),
            NativeType::Json => f.write_str("json"),
            NativeType::List(inner) => write!(f, "list<{}>", inner),
            NativeType::Set(inner) => write!(f, "set<{}>", inner),
            NativeType::Map(inner) => write!(f, "map<string, {}>", inner),
            NativeType::Entity(kind) => write!(f, "entity<{}>", kind),
        }
    }
}

/// Dynamic native value of one property.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NativeValue {
    /// Unset
    #[default]
    Null,
    String(String),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    DateTime(DateTime<FixedOffset>),
    Uuid(Uuid),
    Json(serde_json::Value),
    List(Vec<NativeValue>),
    Set(Vec<NativeValue>),
    Map(BTreeMap<String, NativeValue>),
    Entity(Record),
}

impl NativeValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, NativeValue::Null)
    }

    /// Values the codec leaves off the wire: null and empty collections.
    #[must_use]
    pub fn is_omitted(&self) -> bool {
        match self {
            NativeValue::Null => true,
            NativeValue::List(v) | NativeValue::Set(v) => v.is_empty(),
            NativeValue::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Get the type name for error messages
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            NativeValue::Null => "null",
            NativeValue::String(_) => "string",
            NativeValue::Integer(_) => "i64",
            NativeValue::Unsigned(_) => "u64",
            NativeValue::Float(_) => "f64",
            NativeValue::Bool(_) => "bool",
            NativeValue::Bytes(_) => "bytes",
            NativeValue::DateTime(_) => "datetime",
            NativeValue::Uuid(_) => "uuid",
            NativeValue::Json(_) => "json",
            NativeValue::List(_) => "list",
            NativeValue::Set(_) => "set",
            NativeValue::Map(_) => "map",
            NativeValue::Entity(_) => "entity",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NativeValue::Integer(i) => Some(*i),
            NativeValue::Unsigned(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NativeValue::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            NativeValue::Integer(i) => Some(*i as f64),
            #[allow(clippy::cast_precision_loss)]
            NativeValue::Unsigned(u) => Some(*u as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_datetime(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            NativeValue::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            NativeValue::Entity(r) => Some(r),
            _ => None,
        }
    }
}

impl From<&str> for NativeValue {
    fn from(v: &str) -> Self {
        NativeValue::String(v.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(v: String) -> Self {
        NativeValue::String(v)
    }
}

impl From<i64> for NativeValue {
    fn from(v: i64) -> Self {
        NativeValue::Integer(v)
    }
}

impl From<i32> for NativeValue {
    fn from(v: i32) -> Self {
        NativeValue::Integer(i64::from(v))
    }
}

impl From<u64> for NativeValue {
    fn from(v: u64) -> Self {
        NativeValue::Unsigned(v)
    }
}

impl From<f64> for NativeValue {
    fn from(v: f64) -> Self {
        NativeValue::Float(v)
    }
}

impl From<bool> for NativeValue {
    fn from(v: bool) -> Self {
        NativeValue::Bool(v)
    }
}

impl From<Vec<u8>> for NativeValue {
    fn from(v: Vec<u8>) -> Self {
        NativeValue::Bytes(v)
    }
}

impl From<DateTime<FixedOffset>> for NativeValue {
    fn from(v: DateTime<FixedOffset>) -> Self {
        NativeValue::DateTime(v)
    }
}

impl From<Uuid> for NativeValue {
    fn from(v: Uuid) -> Self {
        NativeValue::Uuid(v)
    }
}

impl From<Record> for NativeValue {
    fn from(v: Record) -> Self {
        NativeValue::Entity(v)
    }
}

impl<T: Into<NativeValue>> From<Option<T>> for NativeValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(NativeValue::Null, Into::into)
    }
}

/// Dynamic form of one entity: its kind plus property values.
///
/// Unset properties are absent; storing [`NativeValue::Null`] removes the
/// property, so two records with the same set values compare equal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    kind: String,
    fields: BTreeMap<String, NativeValue>,
}

impl Record {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Builder-style setter
    #[must_use]
    pub fn with(mut self, property: impl Into<String>, value: impl Into<NativeValue>) -> Self {
        self.set(property, value);
        self
    }

    pub fn set(&mut self, property: impl Into<String>, value: impl Into<NativeValue>) {
        let property = property.into();
        let value = value.into();
        if value.is_null() {
            self.fields.remove(&property);
        } else {
            self.fields.insert(property, value);
        }
    }

    /// Get a property value; unset properties yield `None`
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&NativeValue> {
        self.fields.get(property)
    }

    /// Property value or `Null` when unset
    #[must_use]
    pub fn value(&self, property: &str) -> &NativeValue {
        const NULL: &NativeValue = &NativeValue::Null;
        self.fields.get(property).unwrap_or(NULL)
    }

    /// Remove and return a property value (`Null` when unset)
    pub fn take(&mut self, property: &str) -> NativeValue {
        self.fields.remove(property).unwrap_or_default()
    }

    /// Append to a list property, creating it when unset
    pub fn push(&mut self, property: &str, value: NativeValue) {
        match self.fields.get_mut(property) {
            Some(NativeValue::List(items)) => items.push(value),
            _ => {
                self.fields
                    .insert(property.to_string(), NativeValue::List(vec![value]));
            }
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &NativeValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display() {
        assert_eq!(NativeType::list(NativeType::String).to_string(), "list<string>");
        assert_eq!(
            NativeType::map(NativeType::entity("Address")).to_string(),
            "map<string, entity<Address>>"
        );
    }

    #[test]
    fn test_type_serde_shape() {
        let ty = NativeType::set(NativeType::Integer);
        let json = serde_json::to_value(&ty).unwrap();
        assert_eq!(json, serde_json::json!({"type": "set", "of": {"type": "integer"}}));
        let back: NativeType = serde_json::from_value(json).unwrap();
        assert_eq!(back, ty);
    }

    #[test]
    fn test_entity_kinds() {
        let ty = NativeType::list(NativeType::entity("Line"));
        assert_eq!(ty.entity_kinds(), vec!["Line"]);
        assert!(NativeType::String.entity_kinds().is_empty());
    }

    #[test]
    fn test_omission() {
        assert!(NativeValue::Null.is_omitted());
        assert!(NativeValue::List(vec![]).is_omitted());
        assert!(NativeValue::Map(BTreeMap::new()).is_omitted());
        assert!(!NativeValue::String(String::new()).is_omitted());
        assert!(!NativeValue::Integer(0).is_omitted());
    }

    #[test]
    fn test_record_null_removes() {
        let mut record = Record::new("User").with("name", "Ada").with("age", 36i64);
        assert_eq!(record.len(), 2);

        record.set("name", NativeValue::Null);
        assert!(record.get("name").is_none());
        assert!(record.value("name").is_null());
        assert_eq!(record, Record::new("User").with("age", 36i64));
    }

    #[test]
    fn test_record_push() {
        let mut record = Record::new("Order");
        record.push("lines", NativeValue::from("a"));
        record.push("lines", NativeValue::from("b"));
        assert_eq!(
            record.get("lines"),
            Some(&NativeValue::List(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn test_option_conversion() {
        assert!(NativeValue::from(None::<String>).is_null());
        assert_eq!(NativeValue::from(Some(5i64)), NativeValue::Integer(5));
    }
}
