use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::*;
use crate::clock::ManualClock;
use crate::ports::TransportError;
use crate::session::{FirstLaunch, SessionFlush, SessionHeader};
use crate::types::SessionId;

const PREV_SESSION_ID: &str = "SESSION0";
const SESSION_ID: &str = "SESSION1";
const ACCOUNT_ID: &str = "accid";
const APP_ID: &str = "appid";
const PREV_VERSION: &str = "1.0";
const VERSION: &str = "2.0";
const RELEASE_BUILD: bool = true;
const CLICK_PLAY: &str = "click_play";
const CLICK_PAUSE: &str = "click_pause";
const NAVIGATE: &str = "navigate";

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn last_year() -> DateTime<Utc> {
    at("2021-01-01T00:00:00Z")
}

fn now() -> DateTime<Utc> {
    at("2022-01-01T00:00:00Z")
}

fn later() -> DateTime<Utc> {
    at("2023-01-01T00:00:00Z")
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

// ========== Test doubles ==========

#[derive(Default)]
struct RecordingStore {
    previous: Mutex<Option<SessionTail>>,
    saved: Mutex<Vec<SessionTail>>,
    loads: AtomicUsize,
    fail_load: AtomicBool,
    fail_save: AtomicBool,
    yield_on_load: AtomicBool,
}

impl RecordingStore {
    fn with_previous(previous: SessionTail) -> Self {
        let store = Self::default();
        *lock(&store.previous) = Some(previous);
        store
    }

    fn saves(&self) -> usize {
        lock(&self.saved).len()
    }

    fn last_saved(&self) -> SessionTail {
        lock(&self.saved).last().cloned().expect("a saved session")
    }
}

#[async_trait]
impl SessionStore for RecordingStore {
    async fn load_last_session(
        &self,
        _clock: &dyn Clock,
        _ids: &dyn IdGenerator,
    ) -> Result<Option<SessionTail>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.yield_on_load.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(StoreError::backend("disk unavailable"));
        }
        Ok(lock(&self.previous).clone())
    }

    async fn save_session(&self, tail: &SessionTail) -> Result<(), StoreError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(StoreError::backend("disk full"));
        }
        lock(&self.saved).push(tail.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingTransport {
    headers: Mutex<Vec<SessionHeader>>,
    tails: Mutex<Vec<SessionTail>>,
    flushes: Mutex<Vec<SessionFlush>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    fn outcome(&self) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                status: 503,
                status_text: "Service Unavailable".to_string(),
                message: "try later".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn post_session_header(&self, header: &SessionHeader) -> Result<(), TransportError> {
        lock(&self.headers).push(header.clone());
        self.outcome()
    }

    async fn post_session(&self, tail: &SessionTail) -> Result<(), TransportError> {
        lock(&self.tails).push(tail.clone());
        self.outcome()
    }

    async fn post_session_flush(&self, flush: &SessionFlush) -> Result<(), TransportError> {
        lock(&self.flushes).push(flush.clone());
        self.outcome()
    }
}

struct Harness {
    journey: Journey,
    store: Arc<RecordingStore>,
    transport: Arc<RecordingTransport>,
    clock: Arc<ManualClock>,
}

fn harness(store: RecordingStore) -> Harness {
    let store = Arc::new(store);
    let transport = Arc::new(RecordingTransport::default());
    let clock = Arc::new(ManualClock::new(now()));
    let journey = Journey::new(store.clone(), transport.clone())
        .with_clock(clock.clone())
        .with_id_generator(Arc::new(|| SESSION_ID.to_string()));
    Harness {
        journey,
        store,
        transport,
        clock,
    }
}

async fn initialized() -> Harness {
    let h = harness(RecordingStore::default());
    h.journey
        .initialize(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD)
        .await
        .unwrap();
    h
}

fn session_at(id: &str, version: &str, start: DateTime<Utc>) -> SessionTail {
    SessionTail::build(
        SessionId::new(id).unwrap(),
        ACCOUNT_ID,
        APP_ID,
        version,
        RELEASE_BUILD,
        start,
        &move || start,
    )
    .unwrap()
}

fn expected_first_session() -> SessionTail {
    let mut tail = session_at(SESSION_ID, VERSION, now());
    tail.first_launch = true;
    tail
}

fn expected_header() -> SessionHeader {
    SessionHeader::build(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD, &now, &|| {
        SESSION_ID.to_string()
    })
    .unwrap()
}

fn stage(number: i64, name: &str, ts: DateTime<Utc>) -> Stage {
    Stage::new(ts, StageNumber::new(number).unwrap(), name)
}

// ========== initialize ==========

#[tokio::test]
async fn report_the_very_first_session() {
    let h = initialized().await;

    assert_eq!(h.store.loads.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.saves(), 1);
    assert_eq!(h.store.last_saved(), expected_first_session());

    let mut expected = expected_header();
    expected.first_launch = FirstLaunch::all();
    assert_eq!(*lock(&h.transport.headers), vec![expected]);
    assert!(lock(&h.transport.tails).is_empty());
}

#[tokio::test]
async fn restore_and_report_previous_session() {
    let mut previous = session_at(PREV_SESSION_ID, PREV_VERSION, last_year());
    previous.previous_stage = stage(2, "Stage 2", last_year());
    previous.current_stage = stage(3, "Stage 3", last_year());
    let h = harness(RecordingStore::with_previous(previous.clone()));

    h.journey
        .initialize(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD)
        .await
        .unwrap();

    assert_eq!(*lock(&h.transport.tails), vec![previous.clone()]);

    let mut expected_tail = session_at(SESSION_ID, VERSION, now());
    expected_tail.previous_stage = previous.current_stage.clone();
    expected_tail.current_stage = previous.current_stage.clone();
    expected_tail.since = last_year();
    assert_eq!(h.store.saves(), 1);
    assert_eq!(h.store.last_saved(), expected_tail);

    let mut expected = expected_header();
    expected.first_launch = FirstLaunch {
        overall: false,
        ..FirstLaunch::all()
    };
    expected.previous_stage = previous.current_stage.clone();
    expected.since = last_year();
    assert_eq!(*lock(&h.transport.headers), vec![expected]);
}

#[tokio::test]
async fn previous_session_in_same_hour_and_version_sets_no_flags() {
    let previous = session_at(PREV_SESSION_ID, VERSION, at("2022-01-01T00:00:00Z"));
    let h = harness(RecordingStore::with_previous(previous));
    h.clock.set(at("2022-01-01T00:45:00Z"));

    h.journey
        .initialize(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD)
        .await
        .unwrap();

    let header = lock(&h.transport.headers)[0].clone();
    assert_eq!(header.first_launch, FirstLaunch::default());
    assert!(!h.store.last_saved().first_launch);
}

#[tokio::test]
async fn previous_session_with_other_version_flags_version_only() {
    let previous = session_at(PREV_SESSION_ID, PREV_VERSION, now());
    let h = harness(RecordingStore::with_previous(previous));

    h.journey
        .initialize(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD)
        .await
        .unwrap();

    let header = lock(&h.transport.headers)[0].clone();
    assert_eq!(
        header.first_launch,
        FirstLaunch {
            version: true,
            ..FirstLaunch::default()
        }
    );
}

#[tokio::test]
async fn second_initialize_is_a_no_op() {
    let counter = AtomicUsize::new(0);
    let h = harness(RecordingStore::default());
    let journey = h.journey.with_id_generator(Arc::new(move || {
        format!("SESSION{}", counter.fetch_add(1, Ordering::SeqCst) + 1)
    }));

    journey
        .initialize(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD)
        .await
        .unwrap();
    journey
        .initialize(ACCOUNT_ID, APP_ID, "3.0", false)
        .await
        .unwrap();

    assert_eq!(journey.current_session().unwrap().session_id.as_str(), "SESSION1");
    assert_eq!(h.store.loads.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.saves(), 1);
    assert_eq!(lock(&h.transport.headers).len(), 1);
}

#[tokio::test]
async fn concurrent_initialize_is_rejected() {
    let store = RecordingStore::default();
    store.yield_on_load.store(true, Ordering::SeqCst);
    let h = harness(store);

    let (first, second) = tokio::join!(
        h.journey.initialize(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD),
        h.journey.initialize(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD),
    );

    assert!(first.is_ok() && second.is_ok());
    assert_eq!(h.store.loads.load(Ordering::SeqCst), 1);
    assert_eq!(lock(&h.transport.headers).len(), 1);
    assert!(!h.journey.initializing.load(Ordering::SeqCst));
}

#[tokio::test]
async fn stage_reached_during_initialize_survives_carry_over() {
    let mut previous = session_at(PREV_SESSION_ID, PREV_VERSION, last_year());
    previous.current_stage = stage(2, "Stage 2", last_year());
    let store = RecordingStore::with_previous(previous.clone());
    store.yield_on_load.store(true, Ordering::SeqCst);
    let h = harness(store);

    let (init, transition) = tokio::join!(
        h.journey.initialize(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD),
        h.journey.report_stage_transition(5, "stage5"),
    );
    assert!(init.is_ok());
    assert!(transition.is_ok());

    let expected = stage(5, "stage5", now());
    let session = h.journey.current_session().unwrap();
    assert_eq!(session.current_stage, expected);
    assert_eq!(session.previous_stage, previous.current_stage);
    let saved: Vec<u32> = lock(&h.store.saved)
        .iter()
        .map(|tail| tail.current_stage.number)
        .collect();
    assert_eq!(saved, vec![5, 5]);
}

#[tokio::test]
async fn initialize_requires_account_and_app() {
    let h = harness(RecordingStore::default());

    let err = h
        .journey
        .initialize("", APP_ID, VERSION, RELEASE_BUILD)
        .await
        .unwrap_err();
    assert_eq!(err, ValidationError::Empty { field: "account ID" });
    let err = h
        .journey
        .initialize(ACCOUNT_ID, "", VERSION, RELEASE_BUILD)
        .await
        .unwrap_err();
    assert_eq!(err, ValidationError::Empty { field: "app ID" });

    assert!(!h.journey.is_initialized());
    assert_eq!(h.store.loads.load(Ordering::SeqCst), 0);

    // The guard is released, so a valid call still goes through.
    h.journey
        .initialize(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD)
        .await
        .unwrap();
    assert!(h.journey.is_initialized());
}

#[tokio::test]
async fn initialize_absorbs_load_failure() {
    let store = RecordingStore::default();
    store.fail_load.store(true, Ordering::SeqCst);
    let h = harness(store);

    h.journey
        .initialize(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD)
        .await
        .unwrap();

    // The session is live even though the rest of startup was abandoned.
    assert!(h.journey.is_initialized());
    assert_eq!(h.store.saves(), 0);
    assert!(lock(&h.transport.headers).is_empty());

    h.journey.report_event(CLICK_PLAY, false).await.unwrap();
    assert_eq!(h.store.last_saved().event_tally[CLICK_PLAY], 1);
}

#[tokio::test]
async fn initialize_absorbs_save_failure() {
    let store = RecordingStore::default();
    store.fail_save.store(true, Ordering::SeqCst);
    let h = harness(store);

    h.journey
        .initialize(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD)
        .await
        .unwrap();

    assert!(h.journey.is_initialized());
    assert!(lock(&h.transport.headers).is_empty());
}

#[tokio::test]
async fn initialize_absorbs_transport_failures() {
    let previous = session_at(PREV_SESSION_ID, PREV_VERSION, last_year());
    let h = harness(RecordingStore::with_previous(previous));
    h.transport.fail.store(true, Ordering::SeqCst);

    h.journey
        .initialize(ACCOUNT_ID, APP_ID, VERSION, RELEASE_BUILD)
        .await
        .unwrap();

    assert_eq!(lock(&h.transport.tails).len(), 1);
    assert_eq!(h.store.saves(), 1);
    assert_eq!(lock(&h.transport.headers).len(), 1);
}

#[tokio::test]
async fn independent_controllers_do_not_interfere() {
    let a = initialized().await;
    let b = harness(RecordingStore::default());

    a.journey.report_event(CLICK_PLAY, false).await.unwrap();

    assert!(!b.journey.is_initialized());
    b.journey.report_event(CLICK_PLAY, false).await.unwrap();
    assert_eq!(b.store.saves(), 0);
}

// ========== Events ==========

#[tokio::test]
async fn report_an_event() {
    let h = initialized().await;

    h.journey.report_event(CLICK_PLAY, false).await.unwrap();
    h.journey.report_event(CLICK_PAUSE, false).await.unwrap();
    h.journey.report_event(CLICK_PLAY, false).await.unwrap();

    let mut expected = expected_first_session();
    expected.event_tally.insert(CLICK_PLAY.to_string(), 2);
    expected.event_tally.insert(CLICK_PAUSE.to_string(), 1);
    expected.event_sequence = vec![
        CLICK_PLAY.to_string(),
        CLICK_PAUSE.to_string(),
        CLICK_PLAY.to_string(),
    ];
    assert_eq!(h.store.saves(), 4);
    assert_eq!(h.store.last_saved(), expected);
    assert_eq!(h.journey.current_session().unwrap(), expected);
}

#[tokio::test]
async fn report_a_collapsible_event() {
    let h = initialized().await;

    for _ in 0..3 {
        h.journey.report_event(NAVIGATE, true).await.unwrap();
    }

    let mut expected = expected_first_session();
    expected.event_tally.insert(NAVIGATE.to_string(), 3);
    expected.event_sequence = vec![format!("({NAVIGATE})")];
    assert_eq!(h.store.saves(), 4);
    assert_eq!(h.store.last_saved(), expected);
}

#[tokio::test]
async fn report_error() {
    let h = initialized().await;

    h.journey.report_error("error").await.unwrap();

    let mut expected = expected_first_session();
    expected.event_tally.insert("error".to_string(), 1);
    expected.event_sequence = vec!["error".to_string()];
    expected.has_error = true;
    assert_eq!(h.store.saves(), 2);
    assert_eq!(h.store.last_saved(), expected);
}

#[tokio::test]
async fn report_crash() {
    let h = initialized().await;

    h.journey.report_crash("crash").await.unwrap();

    let mut expected = expected_first_session();
    expected.event_tally.insert("crash".to_string(), 1);
    expected.event_sequence = vec!["crash".to_string()];
    expected.has_error = true;
    expected.has_crash = true;
    assert_eq!(h.store.saves(), 2);
    assert_eq!(h.store.last_saved(), expected);
}

#[tokio::test]
async fn reporting_an_event_updates_end_time() {
    let h = initialized().await;
    h.clock.set(later());

    h.journey.report_event(CLICK_PLAY, false).await.unwrap();

    let mut expected = expected_first_session();
    expected.event_tally.insert(CLICK_PLAY.to_string(), 1);
    expected.event_sequence = vec![CLICK_PLAY.to_string()];
    expected.end = later();
    assert_eq!(h.store.last_saved(), expected);
}

#[tokio::test]
async fn event_name_is_required() {
    let h = initialized().await;

    let err = h.journey.report_event("", false).await.unwrap_err();
    assert_eq!(err, ValidationError::Empty { field: "event name" });
    assert!(h.journey.report_error("").await.is_err());
    assert!(h.journey.report_crash("").await.is_err());
    assert_eq!(h.store.saves(), 1);
}

#[tokio::test]
async fn events_before_initialize_are_ignored() {
    let h = harness(RecordingStore::default());

    h.journey.report_event(CLICK_PLAY, false).await.unwrap();
    h.journey.report_crash("crash").await.unwrap();

    assert!(h.journey.current_session().is_none());
    assert_eq!(h.store.saves(), 0);
}

#[tokio::test]
async fn event_save_failure_is_absorbed() {
    let h = initialized().await;
    h.store.fail_save.store(true, Ordering::SeqCst);

    h.journey.report_event(CLICK_PLAY, false).await.unwrap();

    assert_eq!(h.journey.current_session().unwrap().event_tally[CLICK_PLAY], 1);
}

#[tokio::test]
async fn sequence_never_exceeds_cap() {
    let h = initialized().await;

    for i in 0..120 {
        h.journey
            .report_event(&format!("event_{i}"), false)
            .await
            .unwrap();
    }

    let session = h.journey.current_session().unwrap();
    assert_eq!(session.event_sequence.len(), 100);
    assert_eq!(session.event_tally.len(), 120);
}

#[tokio::test]
async fn concurrent_reports_are_all_counted() {
    let h = initialized().await;

    let (a, b, c) = tokio::join!(
        h.journey.report_event(CLICK_PLAY, false),
        h.journey.report_event(CLICK_PLAY, false),
        h.journey.report_event(CLICK_PAUSE, false),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    let session = h.journey.current_session().unwrap();
    assert_eq!(session.event_tally[CLICK_PLAY], 2);
    assert_eq!(session.event_tally[CLICK_PAUSE], 1);
    assert_eq!(session.event_sequence.len(), 3);
}

// ========== Stage transitions ==========

#[tokio::test]
async fn report_stage_transition() {
    let h = initialized().await;

    h.journey
        .report_stage_transition(2, "new_stage")
        .await
        .unwrap();

    let mut expected = expected_first_session();
    expected.current_stage = stage(2, "new_stage", now());
    assert_eq!(h.store.saves(), 2);
    assert_eq!(h.store.last_saved(), expected);
}

#[tokio::test]
async fn report_stage_transition_ignored_when_new_stage_is_lower() {
    let h = initialized().await;

    h.journey.report_stage_transition(3, "stage3").await.unwrap();
    h.journey.report_stage_transition(2, "stage2").await.unwrap();

    let mut expected = expected_first_session();
    expected.current_stage = stage(3, "stage3", now());
    assert_eq!(h.store.saves(), 3);
    assert_eq!(h.store.last_saved(), expected);
}

#[tokio::test]
async fn equal_stage_does_not_rename() {
    let h = initialized().await;

    h.journey.report_stage_transition(3, "stage3").await.unwrap();
    h.clock.set(later());
    h.journey.report_stage_transition(3, "renamed").await.unwrap();

    let session = h.journey.current_session().unwrap();
    assert_eq!(session.current_stage, stage(3, "stage3", now()));
    assert_eq!(session.end, later());
}

#[tokio::test]
async fn stage_must_be_in_range() {
    let h = initialized().await;

    let err = h.journey.report_stage_transition(11, "x").await.unwrap_err();
    assert!(matches!(
        err,
        JourneyError::Validation(ValidationError::StageOutOfRange { value: 11 })
    ));
    assert!(err.to_string().contains("11"));

    let err = h.journey.report_stage_transition(0, "x").await.unwrap_err();
    assert!(matches!(
        err,
        JourneyError::Validation(ValidationError::StageRequired)
    ));

    assert_eq!(h.store.saves(), 1);
}

#[tokio::test]
async fn stage_is_validated_before_initialize() {
    let h = harness(RecordingStore::default());

    assert!(h.journey.report_stage_transition(-1, "x").await.is_err());
    h.journey.report_stage_transition(2, "x").await.unwrap();
    assert_eq!(h.store.saves(), 0);
}

#[tokio::test]
async fn stage_save_failure_is_returned() {
    let h = initialized().await;
    h.store.fail_save.store(true, Ordering::SeqCst);

    let err = h.journey.report_stage_transition(4, "payment").await.unwrap_err();

    assert!(matches!(err, JourneyError::Store(StoreError::Backend(_))));
    assert_eq!(h.journey.current_session().unwrap().current_stage.number, 4);
}

// ========== Flush ==========

#[tokio::test]
async fn flush_reports_tally_and_advances_baseline() {
    let h = initialized().await;
    h.journey.report_event(CLICK_PLAY, false).await.unwrap();
    h.clock.set(later());

    h.journey.flush_events().await;

    let flushes = lock(&h.transport.flushes).clone();
    assert_eq!(flushes.len(), 1);
    assert_eq!(flushes[0].session_id.as_str(), SESSION_ID);
    assert_eq!(flushes[0].event_tally[CLICK_PLAY], 1);
    assert!(flushes[0].first_launch);
    assert!(flushes[0].flushed_baseline.is_none());

    let saved = h.store.last_saved();
    assert_eq!(saved.flushed_baseline, Some(saved.event_tally.clone()));
    assert_eq!(saved.event_sequence, vec![CLICK_PLAY.to_string()]);
    assert_eq!(saved.end, later());
}

#[tokio::test]
async fn second_flush_carries_previous_baseline() {
    let h = initialized().await;
    h.journey.report_event(CLICK_PLAY, false).await.unwrap();
    h.journey.flush_events().await;
    h.journey.report_event(CLICK_PLAY, false).await.unwrap();
    h.journey.report_event(CLICK_PAUSE, false).await.unwrap();

    h.journey.flush_events().await;

    let flushes = lock(&h.transport.flushes).clone();
    let second = &flushes[1];
    assert_eq!(second.event_tally[CLICK_PLAY], 2);
    assert_eq!(second.event_tally[CLICK_PAUSE], 1);
    assert_eq!(second.flushed_baseline.as_ref().unwrap()[CLICK_PLAY], 1);
    assert_eq!(
        h.store.last_saved().flushed_baseline.unwrap()[CLICK_PLAY],
        2
    );
}

#[tokio::test]
async fn failed_flush_still_advances_baseline() {
    let h = initialized().await;
    h.journey.report_event(CLICK_PLAY, false).await.unwrap();
    h.transport.fail.store(true, Ordering::SeqCst);

    h.journey.flush_events().await;

    assert_eq!(lock(&h.transport.flushes).len(), 1);
    assert_eq!(
        h.store.last_saved().flushed_baseline.unwrap()[CLICK_PLAY],
        1
    );
}

#[tokio::test]
async fn flush_before_initialize_is_ignored() {
    let h = harness(RecordingStore::default());

    h.journey.flush_events().await;

    assert!(lock(&h.transport.flushes).is_empty());
    assert_eq!(h.store.saves(), 0);
}
