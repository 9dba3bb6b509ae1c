//! Typed field values.
//!
//! Every field travels as a single-entry object whose key names the type:
//!
//! ```json
//! {"duration_days": {"integerValue": "7"}, "hwid": {"nullValue": null}}
//! ```
//!
//! `integerValue` is written as a decimal string and read from either a string
//! or a JSON number. Tags this crate does not model decode to
//! [`Value::Unsupported`] and are written back verbatim.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

const INTEGER: &str = "integerValue";
const BOOLEAN: &str = "booleanValue";
const STRING: &str = "stringValue";
const NULL: &str = "nullValue";
const TIMESTAMP: &str = "timestampValue";

/// A single typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    String(String),
    Null,
    Timestamp(DateTime<Utc>),
    /// A value with a type tag outside the set above, kept as received.
    Unsupported(serde_json::Value),
}

impl Value {
    /// Returns the wire type tag for this value.
    #[must_use]
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Integer(_) => INTEGER,
            Self::Boolean(_) => BOOLEAN,
            Self::String(_) => STRING,
            Self::Null => NULL,
            Self::Timestamp(_) => TIMESTAMP,
            Self::Unsupported(raw) => raw
                .as_object()
                .and_then(|m| m.keys().next())
                .map_or("unknown", String::as_str),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Integer(i) => tagged(serializer, INTEGER, &i.to_string()),
            Self::Boolean(b) => tagged(serializer, BOOLEAN, b),
            Self::String(s) => tagged(serializer, STRING, s),
            Self::Null => tagged(serializer, NULL, &()),
            Self::Timestamp(t) => tagged(
                serializer,
                TIMESTAMP,
                &t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
            Self::Unsupported(raw) => raw.serialize(serializer),
        }
    }
}

fn tagged<S, T>(serializer: S, tag: &str, value: &T) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize + ?Sized,
{
    let mut map = serializer.serialize_map(Some(1))?;
    map.serialize_entry(tag, value)?;
    map.end()
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;

        if let Some(raw) = map.get(INTEGER) {
            let parsed = match raw {
                serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
                serde_json::Value::Number(n) => n.as_i64(),
                _ => None,
            };
            return parsed
                .map(Self::Integer)
                .ok_or_else(|| D::Error::custom(format!("invalid {INTEGER}: {raw}")));
        }
        if let Some(raw) = map.get(BOOLEAN) {
            return raw
                .as_bool()
                .map(Self::Boolean)
                .ok_or_else(|| D::Error::custom(format!("invalid {BOOLEAN}: {raw}")));
        }
        if let Some(raw) = map.get(STRING) {
            return raw
                .as_str()
                .map(|s| Self::String(s.to_string()))
                .ok_or_else(|| D::Error::custom(format!("invalid {STRING}: {raw}")));
        }
        if map.contains_key(NULL) {
            return Ok(Self::Null);
        }
        if let Some(raw) = map.get(TIMESTAMP) {
            let text = raw
                .as_str()
                .ok_or_else(|| D::Error::custom(format!("invalid {TIMESTAMP}: {raw}")))?;
            return DateTime::parse_from_rfc3339(text)
                .map(|t| Self::Timestamp(t.with_timezone(&Utc)))
                .map_err(|e| D::Error::custom(format!("invalid {TIMESTAMP} {text:?}: {e}")));
        }

        Ok(Self::Unsupported(serde_json::Value::Object(map)))
    }
}

/// A named set of field values, as carried in a document body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns a string field. Null and other types read as absent.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// Returns an integer field, also accepting a numeric `stringValue`.
    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Integer(i) => Some(*i),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name).and_then(Value::as_timestamp)
    }

    /// Field names in sorted order; used as the update mask.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrites the named fields with the values in `other`.
    pub fn merge(&mut self, other: &Fields) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }
}

impl FromIterator<(String, Value)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
