//! Wire item model and DynamoDB JSON translator
//!
//! An [`Item`] is the sparse map exchanged with the store: attribute name to
//! exactly one tagged [`AttributeValue`]. There is no null variant; an unset
//! attribute is simply absent.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value as JsonValue};

use lumadb_common::error::MappingError;

/// A wire item: attribute name to tagged value.
pub type Item = HashMap<String, AttributeValue>;

/// Tagged wire value. Exactly one variant is populated.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// String
    S(String),
    /// Number, carried as its decimal string
    N(String),
    /// Boolean
    Bool(bool),
    /// Binary
    B(Vec<u8>),
    /// String set
    Ss(Vec<String>),
    /// Number set
    Ns(Vec<String>),
    /// Binary set
    Bs(Vec<Vec<u8>>),
    /// Ordered list of values
    L(Vec<AttributeValue>),
    /// Nested attribute map
    M(Item),
}

impl AttributeValue {
    /// DynamoDB type descriptor of this value
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::B(_) => "B",
            AttributeValue::Ss(_) => "SS",
            AttributeValue::Ns(_) => "NS",
            AttributeValue::Bs(_) => "BS",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
        }
    }

    #[must_use]
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_n(&self) -> Option<&str> {
        match self {
            AttributeValue::N(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_b(&self) -> Option<&[u8]> {
        match self {
            AttributeValue::B(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_l(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::L(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_m(&self) -> Option<&Item> {
        match self {
            AttributeValue::M(m) => Some(m),
            _ => None,
        }
    }

    /// Scalar rendering used by key and discriminator matching.
    ///
    /// Strings and numbers yield their text, booleans `true`/`false`;
    /// binary and collection values have no string form.
    #[must_use]
    pub fn scalar_text(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) | AttributeValue::N(s) => Some(s),
            AttributeValue::Bool(true) => Some("true"),
            AttributeValue::Bool(false) => Some("false"),
            _ => None,
        }
    }
}

/// Convert a wire item to DynamoDB JSON
#[must_use]
pub fn item_to_json(item: &Item) -> JsonValue {
    let map: Map<String, JsonValue> = item
        .iter()
        .map(|(k, v)| (k.clone(), value_to_json(v)))
        .collect();
    JsonValue::Object(map)
}

/// Parse a DynamoDB JSON item.
///
/// Attributes carrying `{"NULL": true}` are dropped: absence is how the
/// mapper represents an unset value.
pub fn item_from_json(json: &JsonValue) -> Result<Item, MappingError> {
    let obj = json
        .as_object()
        .ok_or_else(|| MappingError::InvalidWire("Item must be an object".into()))?;

    let mut item = Item::with_capacity(obj.len());
    for (name, attr) in obj {
        if let Some(value) = parse_attribute(attr)? {
            item.insert(name.clone(), value);
        }
    }
    Ok(item)
}

/// Convert one value to DynamoDB attribute value format
#[must_use]
pub fn value_to_json(value: &AttributeValue) -> JsonValue {
    match value {
        AttributeValue::S(s) => json!({"S": s}),
        AttributeValue::N(n) => json!({"N": n}),
        AttributeValue::Bool(b) => json!({"BOOL": b}),
        AttributeValue::B(b) => json!({"B": STANDARD.encode(b)}),
        AttributeValue::Ss(ss) => json!({"SS": ss}),
        AttributeValue::Ns(ns) => json!({"NS": ns}),
        AttributeValue::Bs(bs) => {
            let strs: Vec<String> = bs.iter().map(|b| STANDARD.encode(b)).collect();
            json!({"BS": strs})
        }
        AttributeValue::L(items) => {
            let items: Vec<JsonValue> = items.iter().map(value_to_json).collect();
            json!({"L": items})
        }
        AttributeValue::M(map) => json!({"M": item_to_json(map)}),
    }
}

/// Parse one DynamoDB attribute value. `NULL` is not a value and is rejected.
pub fn value_from_json(attr: &JsonValue) -> Result<AttributeValue, MappingError> {
    parse_attribute(attr)?
        .ok_or_else(|| MappingError::InvalidWire("NULL is not a storable value".into()))
}

fn parse_attribute(attr: &JsonValue) -> Result<Option<AttributeValue>, MappingError> {
    let obj = attr
        .as_object()
        .ok_or_else(|| MappingError::InvalidWire("Attribute value must be an object".into()))?;

    // DynamoDB uses single-key objects like {"S": "value"} or {"N": "123"}
    let mut entries = obj.iter();
    let (type_key, type_val) = entries
        .next()
        .ok_or_else(|| MappingError::InvalidWire("Empty attribute value".into()))?;
    if entries.next().is_some() {
        return Err(MappingError::InvalidWire(
            "Attribute value must carry exactly one type".into(),
        ));
    }

    let value = match type_key.as_str() {
        "S" => AttributeValue::S(expect_str(type_val, "S")?.to_string()),
        "N" => {
            let n = expect_str(type_val, "N")?;
            if n.trim().parse::<f64>().is_err() {
                return Err(MappingError::InvalidWire(format!("Invalid number: {}", n)));
            }
            AttributeValue::N(n.to_string())
        }
        "BOOL" => AttributeValue::Bool(type_val.as_bool().ok_or_else(|| {
            MappingError::InvalidWire("BOOL value must be a boolean".into())
        })?),
        "NULL" => return Ok(None),
        "B" => AttributeValue::B(decode_base64(expect_str(type_val, "B")?)?),
        "SS" => AttributeValue::Ss(
            expect_array(type_val, "SS")?
                .iter()
                .map(|v| expect_str(v, "SS item").map(String::from))
                .collect::<Result<_, _>>()?,
        ),
        "NS" => AttributeValue::Ns(
            expect_array(type_val, "NS")?
                .iter()
                .map(|v| expect_str(v, "NS item").map(String::from))
                .collect::<Result<_, _>>()?,
        ),
        "BS" => AttributeValue::Bs(
            expect_array(type_val, "BS")?
                .iter()
                .map(|v| expect_str(v, "BS item").and_then(decode_base64))
                .collect::<Result<_, _>>()?,
        ),
        "L" => AttributeValue::L(
            expect_array(type_val, "L")?
                .iter()
                .map(value_from_json)
                .collect::<Result<_, _>>()?,
        ),
        "M" => AttributeValue::M(item_from_json(type_val)?),
        other => {
            return Err(MappingError::InvalidWire(format!("Unknown type: {}", other)));
        }
    };

    Ok(Some(value))
}

fn expect_str<'a>(value: &'a JsonValue, what: &str) -> Result<&'a str, MappingError> {
    value
        .as_str()
        .ok_or_else(|| MappingError::InvalidWire(format!("{} value must be a string", what)))
}

fn expect_array<'a>(value: &'a JsonValue, what: &str) -> Result<&'a Vec<JsonValue>, MappingError> {
    value
        .as_array()
        .ok_or_else(|| MappingError::InvalidWire(format!("{} value must be an array", what)))
}

fn decode_base64(s: &str) -> Result<Vec<u8>, MappingError> {
    STANDARD
        .decode(s)
        .map_err(|e| MappingError::InvalidWire(format!("Invalid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string_value() {
        let value = value_from_json(&json!({"S": "hello"})).unwrap();
        assert_eq!(value, AttributeValue::S("hello".into()));
    }

    #[test]
    fn test_number_keeps_text() {
        let value = value_from_json(&json!({"N": "3.140"})).unwrap();
        assert_eq!(value, AttributeValue::N("3.140".into()));
    }

    #[test]
    fn test_invalid_number() {
        assert!(value_from_json(&json!({"N": "abc"})).is_err());
    }

    #[test]
    fn test_parse_list_value() {
        let value = value_from_json(&json!({"L": [{"S": "a"}, {"N": "1"}]})).unwrap();
        let list = value.as_l().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], AttributeValue::S("a".into()));
        assert_eq!(list[1], AttributeValue::N("1".into()));
    }

    #[test]
    fn test_null_attribute_is_absent() {
        let item = item_from_json(&json!({
            "pk": {"S": "USER#1"},
            "nickname": {"NULL": true}
        }))
        .unwrap();
        assert_eq!(item.len(), 1);
        assert!(!item.contains_key("nickname"));
    }

    #[test]
    fn test_null_inside_list_is_rejected() {
        assert!(value_from_json(&json!({"L": [{"NULL": true}]})).is_err());
    }

    #[test]
    fn test_multiple_type_keys_rejected() {
        assert!(value_from_json(&json!({"S": "a", "N": "1"})).is_err());
    }

    #[test]
    fn test_binary_roundtrip() {
        let original = AttributeValue::Bs(vec![vec![0, 1, 2], vec![255]]);
        let json = value_to_json(&original);
        assert_eq!(value_from_json(&json).unwrap(), original);
    }

    #[test]
    fn test_item_roundtrip() {
        let mut nested = Item::new();
        nested.insert("city".into(), AttributeValue::S("Lagos".into()));

        let mut item = Item::new();
        item.insert("pk".into(), AttributeValue::S("USER#1".into()));
        item.insert("age".into(), AttributeValue::N("42".into()));
        item.insert("tags".into(), AttributeValue::Ss(vec!["a".into(), "b".into()]));
        item.insert("address".into(), AttributeValue::M(nested));

        let json = item_to_json(&item);
        assert_eq!(json["pk"]["S"], "USER#1");
        assert_eq!(item_from_json(&json).unwrap(), item);
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(AttributeValue::S("x".into()).scalar_text(), Some("x"));
        assert_eq!(AttributeValue::N("7".into()).scalar_text(), Some("7"));
        assert_eq!(AttributeValue::Bool(true).scalar_text(), Some("true"));
        assert_eq!(AttributeValue::B(vec![1]).scalar_text(), None);
    }
}
