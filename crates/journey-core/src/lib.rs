//! Core domain logic for journey session analytics.
//!
//! This crate contains the fundamental types and logic for:
//! - Sessions: the header sent at start, the persisted tail and flush records
//! - Funnel stages and their forward-only transitions
//! - The [`Journey`] controller that ties a session store to a transport

mod calendar;
pub mod clock;
mod decode;
pub mod journey;
pub mod ports;
pub mod session;
pub mod stage;
pub mod types;

pub use calendar::{is_same_day, is_same_hour, is_same_month, is_same_year};
pub use clock::{Clock, IdGenerator, ManualClock, SystemClock, UuidGenerator};
pub use decode::DecodeError;
pub use journey::{Journey, JourneyError};
pub use ports::{BoxError, SessionStore, StoreError, Transport, TransportError};
pub use session::{
    EventKind, FirstLaunch, MAX_SEQUENCE_LENGTH, RecordKind, SCHEMA_VERSION, SessionFlush,
    SessionHeader, SessionTail, decode_tail,
};
pub use stage::{NEW_USER_STAGE, Stage, decode_stage};
pub use types::{MAX_STAGE, MIN_STAGE, SessionId, StageNumber, ValidationError};
