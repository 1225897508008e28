//! Table descriptors
//!
//! A [`TableDescriptor`] names one syncable table together with its
//! diagnostic category. Descriptors are produced by the schema registry at
//! startup and are not mutated during a sync pass.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Logical grouping of tables, used only for diagnostics and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableCategory {
    /// User profile, preferences, personality results
    Profile,
    /// Articles, courses, lessons and other delivered content
    Content,
    /// Goals, journals, coaching sessions
    Coaching,
    /// Subscriptions and payment records
    Billing,
    /// Bookkeeping tables such as notifications or device registrations
    System,
    /// Tables found by dynamic discovery without a known category
    Other,
}

impl fmt::Display for TableCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableCategory::Profile => "profile",
            TableCategory::Content => "content",
            TableCategory::Coaching => "coaching",
            TableCategory::Billing => "billing",
            TableCategory::System => "system",
            TableCategory::Other => "other",
        };
        f.write_str(name)
    }
}

/// A syncable table known to the schema registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    name: String,
    category: TableCategory,
    included: bool,
}

impl TableDescriptor {
    /// Creates an included descriptor after validating the table name
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidTableName`] if the name is not a plain
    /// SQL identifier.
    pub fn new(name: impl Into<String>, category: TableCategory) -> Result<Self, DomainError> {
        let name = name.into();
        validate_table_name(&name)?;
        Ok(Self {
            name,
            category,
            included: true,
        })
    }

    /// Returns the table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the diagnostic category
    pub fn category(&self) -> TableCategory {
        self.category
    }

    /// Whether the table takes part in sync passes
    pub fn is_included(&self) -> bool {
        self.included
    }

    /// Marks the descriptor as excluded from sync passes
    pub fn exclude(mut self) -> Self {
        self.included = false;
        self
    }
}

/// Checks that a table name is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`)
///
/// Table names end up in REST paths and SQL bindings, so anything else is
/// rejected up front.
pub fn validate_table_name(name: &str) -> Result<(), DomainError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DomainError::InvalidTableName(name.to_string()));
    }
    Ok(())
}
