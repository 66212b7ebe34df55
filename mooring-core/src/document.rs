use std::{cmp::Ordering, collections::BTreeMap, fmt::Display};

use chrono::{DateTime, Utc};

/// The fields of a document, keyed by field name.
pub type Fields = BTreeMap<String, Value>;

/// A single field value as stored by the document store.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    Map(Fields),
    /// Write-only sentinel, replaced by the commit time on the backend.
    ServerTimestamp,
}

impl Value {
    /// A short name for the kind of value, used in decode errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::ServerTimestamp => "server timestamp",
        }
    }

    /// Orders two values of the same kind. Integers and doubles compare numerically.
    /// Values of different kinds are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Returns a copy with every [Value::ServerTimestamp] replaced by `now`.
    pub fn resolve_server_timestamps(self, now: DateTime<Utc>) -> Value {
        match self {
            Value::ServerTimestamp => Value::Timestamp(now),
            Value::Array(values) => Value::Array(
                values
                    .into_iter()
                    .map(|v| v.resolve_server_timestamps(now))
                    .collect(),
            ),
            Value::Map(fields) => Value::Map(resolve_server_timestamps(fields, now)),
            other => other,
        }
    }
}

/// Resolves server timestamp sentinels in a set of fields.
pub fn resolve_server_timestamps(fields: Fields, now: DateTime<Utc>) -> Fields {
    fields
        .into_iter()
        .map(|(k, v)| (k, v.resolve_server_timestamps(now)))
        .collect()
}

/// The sentinel for a field that should hold the backend's commit time.
pub fn server_timestamp() -> Value {
    Value::ServerTimestamp
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T> From<Vec<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

/// Builds [Fields] from `key => value` pairs.
#[macro_export]
macro_rules! fields {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut fields = $crate::Fields::new();
        $(fields.insert($key.to_string(), $crate::Value::from($value));)*
        fields
    }};
}

/// Identifies a document inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    pub collection: String,
    pub id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn compare_only_matches_same_kind() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Double(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::from("a").compare(&Value::Integer(1)), None);
        assert_eq!(Value::Null.compare(&Value::Bool(false)), None);
    }

    #[test]
    fn server_timestamps_are_resolved_recursively() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        let mut nested = Fields::new();
        nested.insert("at".to_string(), server_timestamp());

        let fields = fields! {
            "createdAt" => server_timestamp(),
            "name" => "Orion",
        };
        let mut fields = fields;
        fields.insert("nested".to_string(), Value::Map(nested));

        let resolved = resolve_server_timestamps(fields, now);

        assert_eq!(resolved["createdAt"], Value::Timestamp(now));
        assert_eq!(resolved["name"], Value::from("Orion"));

        let Value::Map(nested) = &resolved["nested"] else {
            panic!("nested should stay a map");
        };
        assert_eq!(nested["at"], Value::Timestamp(now));
    }
}
