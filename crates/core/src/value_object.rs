//! Value objects: equality by value, not identity.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Longest accepted name, matching the `VARCHAR(255)` columns.
pub const MAX_NAME_LEN: usize = 255;

/// A human-facing name: trimmed, non-empty and at most [`MAX_NAME_LEN`] characters.
///
/// Used for organization names, grade names and citizen first/last names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(String);

impl Name {
    /// Validate and normalize a raw name.
    pub fn parse(field: &'static str, raw: impl AsRef<str>) -> DomainResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation(format!("{field} cannot be blank")));
        }
        if trimmed.chars().count() > MAX_NAME_LEN {
            return Err(DomainError::validation(format!(
                "{field} must be at most {MAX_NAME_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Name {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Name {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse("name", value)
    }
}

impl From<Name> for String {
    fn from(value: Name) -> Self {
        value.0
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
