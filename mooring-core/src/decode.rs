use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{Document, Value};

/// A document could not be turned into a typed record.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("{collection}/{id} is missing required field {field}")]
    MissingField {
        collection: &'static str,
        id: String,
        field: &'static str,
    },
    #[error("{collection}/{id} field {field} should be {expected}, found {found}")]
    WrongType {
        collection: &'static str,
        id: String,
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{collection}/{id} field {field} has unknown value {value:?}")]
    UnknownVariant {
        collection: &'static str,
        id: String,
        field: &'static str,
        value: String,
    },
    #[error("{collection}/{id} is invalid: {reason}")]
    Invalid {
        collection: &'static str,
        id: String,
        reason: &'static str,
    },
}

/// A typed record stored in a collection.
pub trait Record: Sized {
    /// The collection the record lives in.
    const COLLECTION: &'static str;

    /// Strictly decodes a document into the record.
    fn decode(document: &Document) -> Result<Self, DecodeError>;
}

/// A string-backed enum as stored in a document field.
pub trait FieldEnum: Sized {
    fn as_str(&self) -> &'static str;
    fn parse(value: &str) -> Option<Self>;
}

/// Reads fields out of a document, producing errors that name the document and field.
pub struct FieldReader<'a> {
    collection: &'static str,
    document: &'a Document,
}

impl<'a> FieldReader<'a> {
    pub fn new(collection: &'static str, document: &'a Document) -> Self {
        Self {
            collection,
            document,
        }
    }

    pub fn id(&self) -> String {
        self.document.id.clone()
    }

    /// An error for a document whose fields decode but break an invariant.
    pub fn invalid(&self, reason: &'static str) -> DecodeError {
        DecodeError::Invalid {
            collection: self.collection,
            id: self.document.id.clone(),
            reason,
        }
    }

    fn missing(&self, field: &'static str) -> DecodeError {
        DecodeError::MissingField {
            collection: self.collection,
            id: self.document.id.clone(),
            field,
        }
    }

    fn wrong_type(&self, field: &'static str, expected: &'static str, found: &Value) -> DecodeError {
        DecodeError::WrongType {
            collection: self.collection,
            id: self.document.id.clone(),
            field,
            expected,
            found: found.kind(),
        }
    }

    /// Returns the value, treating `null` as absent.
    fn present(&self, field: &'static str) -> Option<&'a Value> {
        match self.document.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn required(&self, field: &'static str) -> Result<&'a Value, DecodeError> {
        self.present(field).ok_or_else(|| self.missing(field))
    }

    pub fn string(&self, field: &'static str) -> Result<String, DecodeError> {
        self.optional_string(field)?
            .ok_or_else(|| self.missing(field))
    }

    pub fn optional_string(&self, field: &'static str) -> Result<Option<String>, DecodeError> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.wrong_type(field, "string", other)),
        }
    }

    pub fn string_or_default(&self, field: &'static str) -> Result<String, DecodeError> {
        Ok(self.optional_string(field)?.unwrap_or_default())
    }

    pub fn bool_or(&self, field: &'static str, default: bool) -> Result<bool, DecodeError> {
        match self.present(field) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(self.wrong_type(field, "bool", other)),
        }
    }

    pub fn timestamp(&self, field: &'static str) -> Result<DateTime<Utc>, DecodeError> {
        match self.required(field)? {
            Value::Timestamp(t) => Ok(*t),
            other => Err(self.wrong_type(field, "timestamp", other)),
        }
    }

    /// A timestamp that may be missing, or still pending while a server timestamp resolves.
    pub fn optional_timestamp(
        &self,
        field: &'static str,
    ) -> Result<Option<DateTime<Utc>>, DecodeError> {
        match self.present(field) {
            None | Some(Value::ServerTimestamp) => Ok(None),
            Some(Value::Timestamp(t)) => Ok(Some(*t)),
            Some(other) => Err(self.wrong_type(field, "timestamp", other)),
        }
    }

    pub fn string_array(&self, field: &'static str) -> Result<Vec<String>, DecodeError> {
        match self.present(field) {
            None => Ok(vec![]),
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(self.wrong_type(field, "array of strings", other)),
                })
                .collect(),
            Some(other) => Err(self.wrong_type(field, "array", other)),
        }
    }

    pub fn enumeration<E: FieldEnum>(&self, field: &'static str) -> Result<E, DecodeError> {
        let raw = self.string(field)?;
        E::parse(&raw).ok_or_else(|| DecodeError::UnknownVariant {
            collection: self.collection,
            id: self.document.id.clone(),
            field,
            value: raw,
        })
    }

    /// Like [FieldReader::enumeration], but a missing field yields `default`.
    /// An unknown value is still an error.
    pub fn enumeration_or<E: FieldEnum>(
        &self,
        field: &'static str,
        default: E,
    ) -> Result<E, DecodeError> {
        match self.optional_string(field)? {
            None => Ok(default),
            Some(raw) => E::parse(&raw).ok_or_else(|| DecodeError::UnknownVariant {
                collection: self.collection,
                id: self.document.id.clone(),
                field,
                value: raw,
            }),
        }
    }
}

/// Decodes every document of a snapshot, skipping the ones that don't decode.
pub fn decode_all<R: Record>(documents: &[Document]) -> Vec<R> {
    documents
        .iter()
        .filter_map(|document| match R::decode(document) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping malformed document: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use crate::fields;

    use super::*;

    #[derive(Debug, PartialEq)]
    enum Mood {
        Calm,
        Stormy,
    }

    impl FieldEnum for Mood {
        fn as_str(&self) -> &'static str {
            match self {
                Mood::Calm => "calm",
                Mood::Stormy => "stormy",
            }
        }

        fn parse(value: &str) -> Option<Self> {
            match value {
                "calm" => Some(Mood::Calm),
                "stormy" => Some(Mood::Stormy),
                _ => None,
            }
        }
    }

    #[test]
    fn reader_reports_field_and_document() {
        let document = Document::new(
            "abc",
            fields! {
                "name" => 12i64,
                "mood" => "foggy",
                "empty" => Value::Null,
            },
        );
        let reader = FieldReader::new("things", &document);

        assert_eq!(
            reader.string("name"),
            Err(DecodeError::WrongType {
                collection: "things",
                id: "abc".to_string(),
                field: "name",
                expected: "string",
                found: "integer",
            })
        );
        assert_eq!(
            reader.string("empty"),
            Err(DecodeError::MissingField {
                collection: "things",
                id: "abc".to_string(),
                field: "empty",
            })
        );
        assert!(matches!(
            reader.enumeration::<Mood>("mood"),
            Err(DecodeError::UnknownVariant { .. })
        ));
        assert_eq!(reader.enumeration_or("missing", Mood::Calm), Ok(Mood::Calm));
        assert_eq!(reader.optional_string("missing"), Ok(None));
        assert_eq!(reader.bool_or("missing", true), Ok(true));
    }

    #[test]
    fn string_arrays_reject_mixed_values() {
        let document = Document::new(
            "abc",
            fields! {
                "good" => vec!["a", "b"],
                "bad" => vec![Value::from("a"), Value::Integer(1)],
            },
        );
        let reader = FieldReader::new("things", &document);

        assert_eq!(
            reader.string_array("good"),
            Ok(vec!["a".to_string(), "b".to_string()])
        );
        assert!(reader.string_array("bad").is_err());
        assert_eq!(reader.string_array("absent"), Ok(vec![]));
    }
}
