//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lowest funnel stage a session can report.
pub const MIN_STAGE: u32 = 1;

/// Highest funnel stage a session can report.
pub const MAX_STAGE: u32 = 10;

/// Validation errors for caller-supplied input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The stage was zero or not an integer.
    #[error("stage is mandatory, should be an integer")]
    StageRequired,

    /// The stage was outside the supported funnel range.
    #[error("invalid value {value} for stage, must be between 1 and 10")]
    StageOutOfRange { value: i64 },
}

/// Rejects empty strings for a named field.
pub(crate) fn require_non_empty(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Ok(())
}

/// A validated session identifier.
///
/// Session IDs are generated once per session and must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new ID after validation.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        require_non_empty(&id, "session ID")?;
        Ok(Self(id))
    }

    /// Creates a random UUID v4 identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A funnel stage number in the range \[1, 10\].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageNumber(u32);

impl StageNumber {
    /// Validates an integer stage.
    ///
    /// Zero is treated as a missing stage; any other value outside the
    /// funnel range is rejected with the offending value.
    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if value == 0 {
            return Err(ValidationError::StageRequired);
        }
        match u32::try_from(value) {
            Ok(stage) if (MIN_STAGE..=MAX_STAGE).contains(&stage) => Ok(Self(stage)),
            _ => Err(ValidationError::StageOutOfRange { value }),
        }
    }

    /// Returns the inner stage number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::str::FromStr for StageNumber {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| ValidationError::StageRequired)?;
        Self::new(value)
    }
}

impl fmt::Display for StageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
