//! The session lifecycle controller.
//!
//! A [`Journey`] owns the one live session of a host process. It starts the
//! session, closes out the previous one, and keeps the persisted tail in step
//! with every reported event, stage transition and flush.
//!
//! # Failure absorption
//!
//! Reporting must never take the host down. Store and transport failures are
//! logged and swallowed, with two exceptions visible to the caller:
//! - invalid input is returned as a [`ValidationError`];
//! - [`Journey::report_stage_transition`] also returns store failures.
//!
//! # Concurrency
//!
//! All methods take `&self`. The live tail sits behind a mutex that is held
//! only while a mutation is applied; store and transport are awaited with a
//! snapshot, so concurrent reports are each applied whole and the last save
//! wins. Calls made while `initialize` has not yet created the session are
//! not queued: they log a warning and do nothing. Reports that land while
//! `initialize` is still loading the previous session are kept, and the
//! carried-over stage never moves the funnel backwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::ports::{SessionStore, StoreError, Transport};
use crate::session::{EventKind, FirstLaunch, SessionFlush, SessionHeader, SessionTail};
use crate::stage::Stage;
use crate::types::{StageNumber, ValidationError, require_non_empty};

/// Errors returned by [`Journey::report_stage_transition`].
#[derive(Debug, Error)]
pub enum JourneyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tracks the current session of a host application.
pub struct Journey {
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    initializing: AtomicBool,
    current: Mutex<Option<SessionTail>>,
}

impl std::fmt::Debug for Journey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journey")
            .field("initializing", &self.initializing.load(Ordering::SeqCst))
            .field("current", &self.lock_current().as_ref().map(|t| t.session_id.clone()))
            .finish_non_exhaustive()
    }
}

/// Clears the initializing flag however `initialize` exits.
struct InitializingGuard<'a>(&'a AtomicBool);

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Journey {
    /// Creates a controller using the wall clock and UUID session IDs.
    pub fn new(store: Arc<dyn SessionStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
            initializing: AtomicBool::new(false),
            current: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Returns a snapshot of the live session, if one was started.
    pub fn current_session(&self) -> Option<SessionTail> {
        self.lock_current().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_current().is_some()
    }

    /// Starts a new session.
    ///
    /// Only the first call on a controller does anything; later calls, and
    /// calls made while another `initialize` is in flight, return `Ok(())`
    /// immediately. `version` may be empty.
    ///
    /// Returns an error only when `account_id` or `app_id` is empty. Every
    /// failure after the session is created is logged and swallowed.
    pub async fn initialize(
        &self,
        account_id: &str,
        app_id: &str,
        version: &str,
        is_release: bool,
    ) -> Result<(), ValidationError> {
        if self.initializing.swap(true, Ordering::SeqCst) {
            warn!("journey is already initializing");
            return Ok(());
        }
        let _guard = InitializingGuard(&self.initializing);

        if self.is_initialized() {
            debug!("journey is already initialized");
            return Ok(());
        }

        require_non_empty(account_id, "account ID")?;
        require_non_empty(app_id, "app ID")?;

        let (header, tail) = match self.new_session(account_id, app_id, version, is_release) {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "failed to initialize journey");
                return Ok(());
            }
        };
        info!(session_id = %tail.session_id, "started new session");
        *self.lock_current() = Some(tail);

        if let Err(err) = self.open_session(header).await {
            warn!(error = %err, "failed to initialize journey");
        }
        Ok(())
    }

    fn new_session(
        &self,
        account_id: &str,
        app_id: &str,
        version: &str,
        is_release: bool,
    ) -> Result<(SessionHeader, SessionTail), ValidationError> {
        let header = SessionHeader::build(
            account_id,
            app_id,
            version,
            is_release,
            self.clock.as_ref(),
            self.ids.as_ref(),
        )?;
        let tail = SessionTail::build(
            header.session_id.clone(),
            account_id,
            app_id,
            version,
            is_release,
            header.start,
            self.clock.as_ref(),
        )?;
        Ok((header, tail))
    }

    /// Closes out the previous session and announces the new one.
    async fn open_session(&self, mut header: SessionHeader) -> Result<(), JourneyError> {
        let previous = self
            .store
            .load_last_session(self.clock.as_ref(), self.ids.as_ref())
            .await?;

        if let Some(previous) = &previous {
            info!(session_id = %previous.session_id, "reporting the end of the previous session");
            if let Err(err) = self.transport.post_session(previous).await {
                warn!(error = %err, "failed to report the end of the previous session");
            }
        }

        let now = self.clock.now();
        let Some(snapshot) = self.with_current(|tail| {
            match &previous {
                None => {
                    header.first_launch = FirstLaunch::all();
                    tail.first_launch = true;
                }
                Some(previous) => {
                    header.first_launch = FirstLaunch::since_previous(
                        previous.start,
                        now,
                        &previous.version,
                        &header.version,
                    );
                    header.previous_stage = previous.current_stage.clone();
                    header.since = previous.since;
                    tail.carry_over(previous);
                }
            }
            tail.clone()
        }) else {
            return Ok(());
        };

        self.store.save_session(&snapshot).await?;

        info!(session_id = %header.session_id, "reporting the start of a new session");
        if let Err(err) = self.transport.post_session_header(&header).await {
            warn!(error = %err, "failed to report the start of a new session");
        }
        Ok(())
    }

    /// Registers an event in the current session.
    ///
    /// Events are distinguished by name, e.g. `click_play` or
    /// `add_to_library`. Never put personal data in an event name.
    ///
    /// Collapsible events appear in the sequence once per run of consecutive
    /// repeats, wrapped in brackets; they are still counted every time. Make
    /// an event collapsible when the number of repeats is not interesting,
    /// such as `scroll_to_next_album` in a music app.
    pub async fn report_event(&self, name: &str, collapsible: bool) -> Result<(), ValidationError> {
        self.record_event(name, EventKind::from_collapsible(collapsible))
            .await
    }

    /// Registers an error event, e.g. `error_fetching_data`.
    pub async fn report_error(&self, name: &str) -> Result<(), ValidationError> {
        self.record_event(name, EventKind::Error).await
    }

    /// Registers a crash event. Crashes are also errors.
    pub async fn report_crash(&self, name: &str) -> Result<(), ValidationError> {
        self.record_event(name, EventKind::Crash).await
    }

    async fn record_event(&self, name: &str, kind: EventKind) -> Result<(), ValidationError> {
        require_non_empty(name, "event name")?;

        let now = self.clock.now();
        let Some(snapshot) = self.with_current(|tail| {
            tail.record_event(name, kind, now);
            tail.clone()
        }) else {
            warn!("cannot update session, journey has not been initialized");
            return Ok(());
        };

        if let Err(err) = self.store.save_session(&snapshot).await {
            warn!(error = %err, "cannot update session");
        }
        Ok(())
    }

    /// Reports reaching a funnel stage, e.g. engagement, checkout, payment.
    ///
    /// `stage` must be between 1 and 10. Transitions only move forward: a
    /// stage at or below the current one is ignored, including attempts to
    /// rename the current stage, so callers need not track where the session
    /// is.
    ///
    /// Unlike the other reporting methods, a failure to persist the session
    /// is returned after being logged.
    pub async fn report_stage_transition(
        &self,
        stage: i64,
        name: &str,
    ) -> Result<(), JourneyError> {
        let stage = StageNumber::new(stage).map_err(|err| {
            warn!(error = %err, "invalid stage transition");
            err
        })?;

        let now = self.clock.now();
        let Some(snapshot) = self.with_current(|tail| {
            if tail.advance_stage(Stage::new(now, stage, name), now) {
                debug!(stage = %stage, name, "advanced funnel stage");
            }
            tail.clone()
        }) else {
            warn!("cannot update session, journey has not been initialized");
            return Ok(());
        };

        self.store.save_session(&snapshot).await.map_err(|err| {
            warn!(error = %err, "cannot update session");
            err
        })?;
        Ok(())
    }

    /// Reports the current tallies before the session ends.
    ///
    /// A session is otherwise reported only when the next one starts, which
    /// never happens for users who open the app once. Flushing costs a
    /// network request, so flush sparingly, e.g. after the first 30 seconds
    /// or on exit.
    ///
    /// The flushed baseline advances even if the report fails.
    pub async fn flush_events(&self) {
        let Some(flush) = self.with_current(|tail| SessionFlush::from_tail(tail)) else {
            warn!("cannot flush session, journey has not been initialized");
            return;
        };

        info!(session_id = %flush.session_id, "flushing the current session");
        if let Err(err) = self.transport.post_session_flush(&flush).await {
            warn!(error = %err, "cannot flush session");
        }

        let now = self.clock.now();
        let Some(snapshot) = self.with_current(|tail| {
            tail.mark_flushed(now);
            tail.clone()
        }) else {
            return;
        };

        if let Err(err) = self.store.save_session(&snapshot).await {
            warn!(error = %err, "cannot flush session");
        }
    }

    /// Applies `f` to the live session, if any.
    fn with_current<R>(&self, f: impl FnOnce(&mut SessionTail) -> R) -> Option<R> {
        self.lock_current().as_mut().map(f)
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<SessionTail>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests;
