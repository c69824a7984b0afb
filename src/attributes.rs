//! Free-form node attributes.
//!
//! Attributes are an arbitrary nested document that the engine stores and
//! returns without interpreting. [`AttributeValue`] is the recursive value type;
//! its serde impls are written out so the JSON shape is exactly the value's
//! shape (no tagging).
//!
//! JSON has no non-finite numbers, so `NaN`, `Infinity` and `-Infinity` floats
//! are written as those strings, as fill values are. They read back as strings
//! and compare equal to the float they spell.

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A node's attribute map
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single attribute value
#[derive(Debug, Clone, Default)]
pub enum AttributeValue {
    #[default]
    Null,
    Bool(bool),
    /// Integers that fit in `i64`; larger integers are read as `Float`
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<AttributeValue>),
    Map(Attributes),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric value, widening integers and reading non-finite spellings
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(value) => Some(*value as f64),
            AttributeValue::Float(value) => Some(*value),
            AttributeValue::String(value) => parse_non_finite(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Attributes> {
        match self {
            AttributeValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

fn non_finite_name(value: f64) -> Option<&'static str> {
    if value.is_nan() {
        Some("NaN")
    } else if value == f64::INFINITY {
        Some("Infinity")
    } else if value == f64::NEG_INFINITY {
        Some("-Infinity")
    } else {
        None
    }
}

fn parse_non_finite(value: &str) -> Option<f64> {
    match value {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

/// Equal when the JSON encodings are equal; `NaN` equals `NaN`
impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        use AttributeValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Float(a), String(s)) | (String(s), Float(a)) => {
                non_finite_name(*a) == Some(s.as_str())
            }
            (String(a), String(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int(value.into())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(values: Vec<AttributeValue>) -> Self {
        AttributeValue::List(values)
    }
}

impl From<Attributes> for AttributeValue {
    fn from(map: Attributes) -> Self {
        AttributeValue::Map(map)
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AttributeValue::Null => serializer.serialize_unit(),
            AttributeValue::Bool(value) => serializer.serialize_bool(*value),
            AttributeValue::Int(value) => serializer.serialize_i64(*value),
            AttributeValue::Float(value) => match non_finite_name(*value) {
                Some(name) => serializer.serialize_str(name),
                None => serializer.serialize_f64(*value),
            },
            AttributeValue::String(value) => serializer.serialize_str(value),
            AttributeValue::List(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
            AttributeValue::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

struct AttributeValueVisitor;

impl<'de> Visitor<'de> for AttributeValueVisitor {
    type Value = AttributeValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an attribute value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(AttributeValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(AttributeValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        AttributeValue::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
        Ok(AttributeValue::Bool(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(AttributeValue::Int(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(i64::try_from(value).map_or(AttributeValue::Float(value as f64), AttributeValue::Int))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        Ok(AttributeValue::Float(value))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(AttributeValue::String(value.to_string()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
        Ok(AttributeValue::String(value))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(value) = seq.next_element()? {
            values.push(value);
        }
        Ok(AttributeValue::List(values))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = Attributes::new();
        while let Some((key, value)) = access.next_entry::<String, AttributeValue>()? {
            map.insert(key, value);
        }
        Ok(AttributeValue::Map(map))
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AttributeValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_document() {
        let json = r#"{"name":"root","n":3,"scale":0.5,"ok":true,"none":null,
                       "tags":["a",1],"inner":{"units":"K"}}"#;
        let attrs: Attributes = serde_json::from_str(json).unwrap();

        assert_eq!(attrs["name"].as_str(), Some("root"));
        assert_eq!(attrs["n"].as_i64(), Some(3));
        assert_eq!(attrs["n"].as_f64(), Some(3.0));
        assert_eq!(attrs["scale"].as_f64(), Some(0.5));
        assert_eq!(attrs["ok"].as_bool(), Some(true));
        assert!(attrs["none"].is_null());
        assert_eq!(attrs["tags"].as_list().map(<[_]>::len), Some(2));
        assert_eq!(
            attrs["inner"].as_map().and_then(|m| m["units"].as_str()),
            Some("K")
        );

        let again: Attributes =
            serde_json::from_str(&serde_json::to_string(&attrs).unwrap()).unwrap();
        assert_eq!(again, attrs);
    }

    #[test]
    fn test_integer_stays_integer() {
        let value = AttributeValue::from(42i64);
        assert_eq!(serde_json::to_string(&value).unwrap(), "42");
        let big: AttributeValue = serde_json::from_str("18446744073709551615").unwrap();
        assert!(matches!(big, AttributeValue::Float(_)));
    }

    #[test]
    fn test_non_finite_floats() {
        let attrs = Attributes::from([
            ("nan".to_string(), f64::NAN.into()),
            ("inf".to_string(), f64::INFINITY.into()),
            ("ninf".to_string(), f64::NEG_INFINITY.into()),
        ]);
        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"inf":"Infinity","nan":"NaN","ninf":"-Infinity"}"#);

        let again: Attributes = serde_json::from_str(&json).unwrap();
        assert_eq!(again, attrs);
        assert!(again["nan"].as_f64().is_some_and(f64::is_nan));
        assert_eq!(again["ninf"].as_f64(), Some(f64::NEG_INFINITY));

        assert_eq!(AttributeValue::from(f64::NAN), AttributeValue::from(f64::NAN));
        assert_ne!(AttributeValue::from(f64::NAN), AttributeValue::from("Infinity"));
        assert_ne!(AttributeValue::from(1.0), AttributeValue::from("1"));
    }
}
