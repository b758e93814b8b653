//! Session records: the one-shot header, the persisted tail and the flush.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calendar::{is_same_day, is_same_hour, is_same_month, is_same_year};
use crate::clock::{Clock, IdGenerator};
use crate::decode::{self, DecodeError};
use crate::stage::Stage;
use crate::types::{SessionId, ValidationError, require_non_empty};

/// Version of the record schema written by this library.
pub const SCHEMA_VERSION: &str = "1.1.0";

/// Maximum number of entries kept in a session's event sequence.
pub const MAX_SEQUENCE_LENGTH: usize = 100;

/// Record discriminator carried in the `t` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    #[serde(rename = "shead")]
    Header,
    #[serde(rename = "stail")]
    Tail,
    #[serde(rename = "sflush")]
    Flush,
}

/// How a reported event affects the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventKind {
    #[default]
    Regular,
    /// Consecutive repeats share one sequence entry.
    Collapsible,
    Error,
    /// A crash is also an error.
    Crash,
}

impl EventKind {
    pub const fn from_collapsible(collapsible: bool) -> Self {
        if collapsible {
            Self::Collapsible
        } else {
            Self::Regular
        }
    }

    pub const fn is_collapsible(self) -> bool {
        matches!(self, Self::Collapsible)
    }

    pub const fn is_error(self) -> bool {
        matches!(self, Self::Error | Self::Crash)
    }

    pub const fn is_crash(self) -> bool {
        matches!(self, Self::Crash)
    }

    /// The entry this event contributes to the sequence.
    ///
    /// Collapsible events appear in brackets, e.g. `(scroll_to_next_album)`.
    pub fn sequence_token(self, name: &str) -> String {
        if self.is_collapsible() {
            format!("({name})")
        } else {
            name.to_string()
        }
    }
}

/// First-launch heuristics announced with a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FirstLaunch {
    /// No earlier session was ever recorded for the installation.
    #[serde(rename = "fst_launch")]
    pub overall: bool,
    #[serde(rename = "fst_launch_hour")]
    pub hour: bool,
    #[serde(rename = "fst_launch_day")]
    pub day: bool,
    #[serde(rename = "fst_launch_month")]
    pub month: bool,
    #[serde(rename = "fst_launch_year")]
    pub year: bool,
    /// First launch of this application version.
    #[serde(rename = "fst_launch_version")]
    pub version: bool,
}

impl FirstLaunch {
    /// Flags for the very first session of an installation.
    pub const fn all() -> Self {
        Self {
            overall: true,
            hour: true,
            day: true,
            month: true,
            year: true,
            version: true,
        }
    }

    /// Compares a new session against the previous one.
    ///
    /// A granularity is flagged when the two start times fall in different
    /// UTC calendar hours, days, months or years.
    pub fn since_previous(
        previous_start: DateTime<Utc>,
        now: DateTime<Utc>,
        previous_version: &str,
        version: &str,
    ) -> Self {
        Self {
            overall: false,
            hour: !is_same_hour(previous_start, now),
            day: !is_same_day(previous_start, now),
            month: !is_same_month(previous_start, now),
            year: !is_same_year(previous_start, now),
            version: previous_version != version,
        }
    }
}

/// Announcement of a new session, reported once and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    #[serde(rename = "t")]
    pub kind: RecordKind,
    #[serde(rename = "v")]
    pub schema_version: String,
    #[serde(rename = "id")]
    pub session_id: SessionId,
    #[serde(rename = "acc")]
    pub account_id: String,
    #[serde(rename = "aid")]
    pub app_id: String,
    pub version: String,
    pub is_release: bool,
    /// Start of the very first session of the installation.
    pub since: DateTime<Utc>,
    pub start: DateTime<Utc>,
    #[serde(flatten)]
    pub first_launch: FirstLaunch,
    #[serde(rename = "prev_stage")]
    pub previous_stage: Stage,
}

impl SessionHeader {
    /// Builds the header for a session starting now.
    pub fn build(
        account_id: &str,
        app_id: &str,
        version: &str,
        is_release: bool,
        clock: &dyn Clock,
        ids: &dyn IdGenerator,
    ) -> Result<Self, ValidationError> {
        require_non_empty(account_id, "account ID")?;
        require_non_empty(app_id, "app ID")?;

        let session_id = SessionId::new(ids.new_id())?;
        let start = clock.now();
        Ok(Self {
            kind: RecordKind::Header,
            schema_version: SCHEMA_VERSION.to_string(),
            session_id,
            account_id: account_id.to_string(),
            app_id: app_id.to_string(),
            version: version.to_string(),
            is_release,
            since: start,
            start,
            first_launch: FirstLaunch::default(),
            previous_stage: Stage::new_user(clock),
        })
    }
}

/// The live, persisted state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTail {
    #[serde(rename = "t")]
    pub kind: RecordKind,
    #[serde(rename = "v")]
    pub schema_version: String,
    #[serde(rename = "id")]
    pub session_id: SessionId,
    #[serde(rename = "acc")]
    pub account_id: String,
    #[serde(rename = "aid")]
    pub app_id: String,
    pub version: String,
    pub is_release: bool,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Start of the very first session of the installation.
    pub since: DateTime<Utc>,
    #[serde(rename = "fst_launch")]
    pub first_launch: bool,
    #[serde(rename = "prev_stage")]
    pub previous_stage: Stage,
    #[serde(rename = "new_stage")]
    pub current_stage: Stage,
    pub has_error: bool,
    pub has_crash: bool,
    #[serde(rename = "evts")]
    pub event_tally: BTreeMap<String, u64>,
    #[serde(rename = "evt_seq")]
    pub event_sequence: Vec<String>,
    /// Tally as of the last flush.
    #[serde(rename = "flushed", default, skip_serializing_if = "Option::is_none")]
    pub flushed_baseline: Option<BTreeMap<String, u64>>,
}

impl SessionTail {
    /// Builds an empty tail for a session started at `start`.
    pub fn build(
        session_id: SessionId,
        account_id: &str,
        app_id: &str,
        version: &str,
        is_release: bool,
        start: DateTime<Utc>,
        clock: &dyn Clock,
    ) -> Result<Self, ValidationError> {
        require_non_empty(account_id, "account ID")?;
        require_non_empty(app_id, "app ID")?;

        Ok(Self {
            kind: RecordKind::Tail,
            schema_version: SCHEMA_VERSION.to_string(),
            session_id,
            account_id: account_id.to_string(),
            app_id: app_id.to_string(),
            version: version.to_string(),
            is_release,
            start,
            end: start,
            since: start,
            first_launch: false,
            previous_stage: Stage::new_user(clock),
            current_stage: Stage::new_user(clock),
            has_error: false,
            has_crash: false,
            event_tally: BTreeMap::new(),
            event_sequence: Vec::new(),
            flushed_baseline: None,
        })
    }

    /// Counts and sequences one event.
    pub fn record_event(&mut self, name: &str, kind: EventKind, now: DateTime<Utc>) {
        *self.event_tally.entry(name.to_string()).or_insert(0) += 1;

        if kind.is_error() {
            self.has_error = true;
        }
        if kind.is_crash() {
            self.has_crash = true;
        }

        if self.event_sequence.len() < MAX_SEQUENCE_LENGTH {
            let token = kind.sequence_token(name);
            let repeat = self.event_sequence.last() == Some(&token);
            if !(repeat && kind.is_collapsible()) {
                self.event_sequence.push(token);
            }
        }

        self.touch(now);
    }

    /// Moves the session to a later funnel stage.
    ///
    /// Returns `false` without changing the stage when `stage` is not
    /// strictly beyond the current one. The end time moves either way.
    pub fn advance_stage(&mut self, stage: Stage, now: DateTime<Utc>) -> bool {
        let advanced = stage.number > self.current_stage.number;
        if advanced {
            self.current_stage = stage;
        }
        self.touch(now);
        advanced
    }

    /// Records the current tally as flushed.
    pub fn mark_flushed(&mut self, now: DateTime<Utc>) {
        self.flushed_baseline = Some(self.event_tally.clone());
        self.touch(now);
    }

    /// Continues the funnel and installation epoch of a previous session.
    ///
    /// The current stage only moves forward, so a stage this session already
    /// reached beyond the previous one is kept.
    pub fn carry_over(&mut self, previous: &Self) {
        self.previous_stage = previous.current_stage.clone();
        if previous.current_stage.number > self.current_stage.number {
            self.current_stage = previous.current_stage.clone();
        }
        self.since = previous.since;
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.end = now.max(self.start);
    }

    /// Tolerantly decodes a tail from a JSON value.
    ///
    /// Absent or malformed fields fall back to defaults one by one, so any
    /// value produces a usable tail.
    pub fn from_value(value: Value, clock: &dyn Clock, ids: &dyn IdGenerator) -> Self {
        let obj = decode::into_object(value);

        let session_id = decode::string(&obj, "id")
            .and_then(|id| SessionId::new(id).ok())
            .or_else(|| SessionId::new(ids.new_id()).ok())
            .unwrap_or_else(SessionId::random);
        let stage = |key: &str| {
            obj.get(key)
                .map_or_else(|| Stage::new_user(clock), |v| Stage::from_value(v, clock))
        };
        let has_crash = decode::boolean(&obj, "has_crash").unwrap_or(false);
        let mut event_sequence = decode::strings(&obj, "evt_seq").unwrap_or_default();
        event_sequence.truncate(MAX_SEQUENCE_LENGTH);

        Self {
            kind: RecordKind::Tail,
            schema_version: SCHEMA_VERSION.to_string(),
            session_id,
            account_id: decode::string(&obj, "acc").unwrap_or_default(),
            app_id: decode::string(&obj, "aid").unwrap_or_default(),
            version: decode::string(&obj, "version").unwrap_or_default(),
            is_release: decode::boolean(&obj, "is_release").unwrap_or(false),
            start: decode::timestamp(&obj, "start").unwrap_or_else(|| clock.now()),
            end: decode::timestamp(&obj, "end").unwrap_or_else(|| clock.now()),
            since: decode::timestamp(&obj, "since").unwrap_or_else(|| clock.now()),
            first_launch: decode::boolean(&obj, "fst_launch").unwrap_or(false),
            previous_stage: stage("prev_stage"),
            current_stage: stage("new_stage"),
            has_error: has_crash || decode::boolean(&obj, "has_error").unwrap_or(false),
            has_crash,
            event_tally: decode::tally(&obj, "evts").unwrap_or_default(),
            event_sequence,
            flushed_baseline: decode::tally(&obj, "flushed"),
        }
    }
}

/// Tolerantly decodes a tail from JSON text.
///
/// Fails only when `json` is not valid JSON.
pub fn decode_tail(
    json: &str,
    clock: &dyn Clock,
    ids: &dyn IdGenerator,
) -> Result<SessionTail, DecodeError> {
    let value: Value = serde_json::from_str(json)?;
    Ok(SessionTail::from_value(value, clock, ids))
}

/// Best-effort report of a session's tallies before it formally ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFlush {
    #[serde(rename = "t")]
    pub kind: RecordKind,
    #[serde(rename = "v")]
    pub schema_version: String,
    #[serde(rename = "id")]
    pub session_id: SessionId,
    #[serde(rename = "acc")]
    pub account_id: String,
    #[serde(rename = "aid")]
    pub app_id: String,
    pub version: String,
    pub is_release: bool,
    pub start: DateTime<Utc>,
    #[serde(rename = "fst_launch")]
    pub first_launch: bool,
    #[serde(rename = "evts")]
    pub event_tally: BTreeMap<String, u64>,
    /// Tally as of the previous flush, if any.
    #[serde(rename = "flushed", default, skip_serializing_if = "Option::is_none")]
    pub flushed_baseline: Option<BTreeMap<String, u64>>,
}

impl SessionFlush {
    pub fn from_tail(tail: &SessionTail) -> Self {
        Self {
            kind: RecordKind::Flush,
            schema_version: SCHEMA_VERSION.to_string(),
            session_id: tail.session_id.clone(),
            account_id: tail.account_id.clone(),
            app_id: tail.app_id.clone(),
            version: tail.version.clone(),
            is_release: tail.is_release,
            start: tail.start,
            first_launch: tail.first_launch,
            event_tally: tail.event_tally.clone(),
            flushed_baseline: tail.flushed_baseline.clone(),
        }
    }
}
