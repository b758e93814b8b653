//! Funnel stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::decode::{self, DecodeError};
use crate::types::{MAX_STAGE, MIN_STAGE, StageNumber};

/// Name of the synthetic stage every installation starts in.
pub const NEW_USER_STAGE: &str = "new_user";

/// A funnel checkpoint reached by a session.
///
/// Stages are never edited in place; a transition replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// When the stage was reached.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// Ordinal position in the funnel.
    #[serde(rename = "stage")]
    pub number: u32,
    /// Informational label.
    pub name: String,
}

impl Stage {
    /// Creates a stage reached at `timestamp`.
    pub fn new(timestamp: DateTime<Utc>, number: StageNumber, name: impl Into<String>) -> Self {
        Self {
            timestamp,
            number: number.get(),
            name: name.into(),
        }
    }

    /// The stage every session starts in until told otherwise.
    pub fn new_user(clock: &dyn Clock) -> Self {
        Self {
            timestamp: clock.now(),
            number: MIN_STAGE,
            name: NEW_USER_STAGE.to_string(),
        }
    }

    /// Tolerantly decodes a stage from a JSON value.
    ///
    /// A stage number outside the funnel range decodes as the first stage.
    pub fn from_value(value: &Value, clock: &dyn Clock) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::new_user(clock);
        };
        Self {
            timestamp: decode::timestamp(obj, "ts").unwrap_or_else(|| clock.now()),
            number: decode::unsigned(obj, "stage")
                .filter(|n| (MIN_STAGE..=MAX_STAGE).contains(n))
                .unwrap_or(MIN_STAGE),
            name: decode::string(obj, "name").unwrap_or_else(|| NEW_USER_STAGE.to_string()),
        }
    }
}

/// Tolerantly decodes a stage from JSON text.
pub fn decode_stage(json: &str, clock: &dyn Clock) -> Result<Stage, DecodeError> {
    let obj = decode::parse_object(json)?;
    Ok(Stage::from_value(&Value::Object(obj), clock))
}
