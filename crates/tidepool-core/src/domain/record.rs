//! Syncable records
//!
//! A [`SyncableRecord`] is a single row of any synchronized table: an `id`
//! plus arbitrary named fields. The same type is used for the local and the
//! remote representation; only the encoding of individual field values
//! differs (see [`RecordTranslator`](super::translator::RecordTranslator)).
//!
//! A [`LocalRecord`] wraps a record with the sync markers the local store
//! keeps for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::DomainError;

/// Name of the identifier field every record carries
pub const ID_FIELD: &str = "id";

/// A row in a synchronized table
///
/// Serializes as a flat JSON object (`{"id": ..., "field": ...}`), which is
/// both the wire shape of the REST backend and the storage shape of the
/// local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncableRecord {
    id: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl SyncableRecord {
    /// Creates an empty record with the given id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builds a record from a JSON object
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidRecord`] if the value is not an object,
    /// or if it has no string `id`.
    pub fn from_value(value: Value) -> Result<Self, DomainError> {
        let Value::Object(mut map) = value else {
            return Err(DomainError::InvalidRecord(
                "record must be a JSON object".to_string(),
            ));
        };

        let id = match map.remove(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(other) => {
                return Err(DomainError::InvalidRecord(format!(
                    "id must be a non-empty string, got {other}"
                )))
            }
            None => {
                return Err(DomainError::InvalidRecord(
                    "record has no id field".to_string(),
                ))
            }
        };

        Ok(Self { id, fields: map })
    }

    /// Converts the record back into a flat JSON object
    pub fn into_value(self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 1);
        map.insert(ID_FIELD.to_string(), Value::String(self.id));
        map.extend(self.fields);
        Value::Object(map)
    }

    /// Returns the record id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns a field value (never the id)
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field value, returning `self` for chaining
    ///
    /// Setting `id` through this method is ignored; the id is immutable.
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Sets a field value
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        if field == ID_FIELD {
            return;
        }
        self.fields.insert(field, value.into());
    }

    /// Returns all non-id fields
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consumes the record, returning the id and the remaining fields
    pub fn into_parts(self) -> (String, Map<String, Value>) {
        (self.id, self.fields)
    }

    /// Reassembles a record from parts produced by [`into_parts`](Self::into_parts)
    pub fn from_parts(id: String, fields: Map<String, Value>) -> Self {
        Self { id, fields }
    }
}

/// A record as held by the local store, with its sync markers
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecord {
    /// The row itself, in local encoding
    pub record: SyncableRecord,
    /// Write counter of the local row, starting at 1
    pub revision: u64,
    /// Whether the current local version has been pushed to the remote
    pub synced: bool,
    /// When the record was last marked synced
    pub synced_at: Option<DateTime<Utc>>,
}

impl LocalRecord {
    /// Wraps a freshly created, not yet pushed record
    pub fn pending(record: SyncableRecord) -> Self {
        Self {
            record,
            revision: 1,
            synced: false,
            synced_at: None,
        }
    }

    /// Returns the record id
    pub fn id(&self) -> &str {
        self.record.id()
    }
}
