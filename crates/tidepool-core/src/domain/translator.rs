//! Record translator
//!
//! Converts records between the local store encoding and the remote wire
//! encoding. The conversion for each field is chosen by a declarative rule
//! table that maps field-name patterns to a [`FieldKind`].
//!
//! ## Field kinds
//!
//! | Kind      | Local encoding              | Remote encoding            |
//! |-----------|-----------------------------|----------------------------|
//! | Timestamp | integer epoch milliseconds  | RFC 3339 string, ms, `Z`   |
//! | Json      | JSON-encoded string         | decoded JSON structure     |
//! | Encrypted | opaque value                | same opaque value          |
//! | Plain     | any JSON value              | same value                 |
//!
//! Both directions are pure and infallible. Values that do not have the
//! expected shape (an unparsable timestamp string, a JSON string that does
//! not decode, a millisecond value outside the RFC 3339 year range) are
//! passed through unchanged.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::errors::DomainError;
use super::record::SyncableRecord;

/// Conversion applied to a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Timestamp,
    Json,
    Encrypted,
    Plain,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldKind::Timestamp => "timestamp",
            FieldKind::Json => "json",
            FieldKind::Encrypted => "encrypted",
            FieldKind::Plain => "plain",
        };
        f.write_str(s)
    }
}

/// How a rule selects fields
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldPattern {
    Exact(String),
    Suffix(String),
}

/// One entry of the translator's rule table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    pattern: FieldPattern,
    kind: FieldKind,
}

impl FieldRule {
    /// Matches exactly one field name
    pub fn exact(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            pattern: FieldPattern::Exact(name.into()),
            kind,
        }
    }

    /// Matches every field whose name ends with `suffix`
    pub fn suffix(suffix: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            pattern: FieldPattern::Suffix(suffix.into()),
            kind,
        }
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    fn matches(&self, field: &str) -> bool {
        match &self.pattern {
            FieldPattern::Exact(name) => field == name,
            FieldPattern::Suffix(suffix) => field.len() > suffix.len() && field.ends_with(suffix),
        }
    }

    fn is_exact(&self) -> bool {
        matches!(self.pattern, FieldPattern::Exact(_))
    }
}

/// Translates records between local and remote encodings
#[derive(Debug, Clone)]
pub struct RecordTranslator {
    rules: Vec<FieldRule>,
}

impl Default for RecordTranslator {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

impl RecordTranslator {
    /// Creates a translator from an explicit rule table
    ///
    /// Exact-name rules take precedence over suffix rules; among suffix
    /// rules the first match in table order wins.
    pub fn new(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    /// The conventional rule table of the application schema
    pub fn with_default_rules() -> Self {
        Self::new(vec![
            FieldRule::exact("created_at", FieldKind::Timestamp),
            FieldRule::exact("updated_at", FieldKind::Timestamp),
            FieldRule::suffix("_at", FieldKind::Timestamp),
            FieldRule::suffix("_json", FieldKind::Json),
            FieldRule::suffix("_encrypted", FieldKind::Encrypted),
        ])
    }

    /// Returns the rule table
    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    /// Resolves the kind of a field
    pub fn kind_of(&self, field: &str) -> FieldKind {
        if field == super::record::ID_FIELD {
            return FieldKind::Plain;
        }
        self.rules
            .iter()
            .find(|r| r.is_exact() && r.matches(field))
            .or_else(|| self.rules.iter().find(|r| !r.is_exact() && r.matches(field)))
            .map(|r| r.kind)
            .unwrap_or(FieldKind::Plain)
    }

    /// Validates the rule table against the known field names of a schema
    ///
    /// A field matched by two rules of the same precedence (both exact or
    /// both suffix) that disagree on the kind is reported as an error.
    pub fn validate_fields<'a, I>(&self, fields: I) -> Result<(), DomainError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for field in fields {
            for exact in [true, false] {
                let mut matching = self
                    .rules
                    .iter()
                    .filter(|r| r.is_exact() == exact && r.matches(field));
                if let Some(first) = matching.next() {
                    if let Some(other) = matching.find(|r| r.kind != first.kind) {
                        return Err(DomainError::ConflictingFieldRules {
                            field: field.to_string(),
                            first: first.kind.to_string(),
                            second: other.kind.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Converts a record from local to remote encoding
    pub fn to_remote(&self, record: &SyncableRecord) -> SyncableRecord {
        self.map_fields(record, |kind, value| match kind {
            FieldKind::Timestamp => millis_to_iso(value),
            FieldKind::Json => decode_json(value),
            FieldKind::Encrypted | FieldKind::Plain => value,
        })
    }

    /// Converts a record from remote to local encoding
    pub fn to_local(&self, record: &SyncableRecord) -> SyncableRecord {
        self.map_fields(record, |kind, value| match kind {
            FieldKind::Timestamp => iso_to_millis(value),
            FieldKind::Json => encode_json(value),
            FieldKind::Encrypted | FieldKind::Plain => value,
        })
    }

    fn map_fields<F>(&self, record: &SyncableRecord, convert: F) -> SyncableRecord
    where
        F: Fn(FieldKind, Value) -> Value,
    {
        let fields: Map<String, Value> = record
            .fields()
            .iter()
            .map(|(name, value)| (name.clone(), convert(self.kind_of(name), value.clone())))
            .collect();
        SyncableRecord::from_parts(record.id().to_string(), fields)
    }
}

// ============================================================================
// Value conversions
// ============================================================================

fn millis_to_iso(value: Value) -> Value {
    let Some(ms) = value.as_i64() else {
        return value;
    };
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        // RFC 3339 only has four-digit years; anything else stays numeric.
        Some(dt) if (0..=9999).contains(&dt.year()) => {
            Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        _ => value,
    }
}

fn iso_to_millis(value: Value) -> Value {
    let Value::String(ref s) = value else {
        return value;
    };
    match parse_timestamp(s) {
        Some(dt) => Value::from(dt.timestamp_millis()),
        None => value,
    }
}

/// Parses RFC 3339, falling back to the zone-less forms Postgres emits for
/// `timestamp without time zone` columns (interpreted as UTC)
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                .map(|ndt| ndt.and_utc())
                .ok()
        })
}

fn decode_json(value: Value) -> Value {
    match value {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        other => other,
    }
}

fn encode_json(value: Value) -> Value {
    match value {
        Value::Null => value,
        // Text that is not valid JSON can only be a decode fallback from
        // `to_remote`; it goes back verbatim. Any other string is a JSON
        // string value and is encoded like every other value.
        Value::String(ref s) if serde_json::from_str::<Value>(s).is_err() => value,
        other => Value::String(other.to_string()),
    }
}
