use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDateTime;
use log::{error, info, warn};

use crate::aggregate::compute_total;
use crate::config::{Config, DEFAULT_TRACKING_INTERVAL};
use crate::ledger::{LedgerError, LedgerStore};
use crate::record::{Record, TIMESTAMP_FORMAT, format_duration, whole_seconds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active { started_at: NaiveDateTime },
}

#[derive(Debug)]
pub enum SessionError {
    NotInitialized,
    NotActive,
    AlreadyActive,
    Ledger(LedgerError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NotInitialized => {
                write!(f, "cannot start tracking: check the ledger path and its permissions")
            }
            SessionError::NotActive => write!(f, "no session is being tracked"),
            SessionError::AlreadyActive => write!(f, "a session is already being tracked"),
            SessionError::Ledger(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SessionError {}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    ledger: Option<LedgerStore>,
    description: String,
    accumulated_prior_seconds: i64,
    tracking_interval: Duration,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            ledger: None,
            description: String::new(),
            accumulated_prior_seconds: 0,
            tracking_interval: Duration::from_secs(u64::from(DEFAULT_TRACKING_INTERVAL) * 60),
        }
    }

    /// A provisional last record is an abandoned session from a run that never
    /// stopped. It is not resumed and adds nothing to the total, but the line
    /// stays: a session stopped within its first second looks the same.
    pub fn initialize(&mut self, config: &Config) -> Result<(), SessionError> {
        if let SessionState::Active { started_at } = self.state {
            warn!(
                "re-initializing while tracking; abandoning session started {}",
                started_at.format(TIMESTAMP_FORMAT)
            );
        }

        self.state = SessionState::Idle;
        self.ledger = None;
        self.accumulated_prior_seconds = 0;
        self.tracking_interval = config.tracking_interval();

        let ledger = LedgerStore::open(&config.file_path).map_err(|err| {
            error!("failed to open ledger {}: {err}", config.file_path.display());
            SessionError::Ledger(err)
        })?;
        let mut entries = ledger.read_entries().map_err(SessionError::Ledger)?;
        if ledger.is_provisional_last_record().map_err(SessionError::Ledger)? {
            warn!("ignoring unfinished session at the end of {}", ledger.path().display());
            entries.pop();
        }

        self.accumulated_prior_seconds = compute_total(&entries);
        info!(
            "ledger {} holds {} of finalized work",
            ledger.path().display(),
            format_duration(self.accumulated_prior_seconds)
        );
        self.ledger = Some(ledger);
        Ok(())
    }

    pub fn start(
        &mut self,
        description: Option<String>,
        now: NaiveDateTime,
    ) -> Result<(), SessionError> {
        if self.is_active() {
            return Err(SessionError::AlreadyActive);
        }
        let Some(ledger) = &self.ledger else {
            error!("start requested before the ledger was initialized");
            return Err(SessionError::NotInitialized);
        };

        let started_at = whole_seconds(now);
        let description = description.unwrap_or_default();
        if let Err(err) = ledger.append_provisional(&Record::provisional(started_at, description.clone())) {
            error!("failed to record session start: {err}");
            self.ledger = None;
            return Err(SessionError::Ledger(err));
        }

        info!("started tracking at {}", started_at.format(TIMESTAMP_FORMAT));
        self.description = description;
        self.state = SessionState::Active { started_at };
        Ok(())
    }

    // A failed write keeps the session running; the next tick writes again.
    pub fn tick(&mut self, now: NaiveDateTime) -> Result<i64, SessionError> {
        let SessionState::Active { started_at } = self.state else {
            return Err(SessionError::NotActive);
        };
        let ledger = self.ledger.as_ref().ok_or(SessionError::NotInitialized)?;

        let end = whole_seconds(now).max(started_at);
        let elapsed = (end - started_at).num_seconds();
        ledger
            .update_last_record(end, &format_duration(elapsed), &self.description)
            .map_err(|err| {
                error!("failed to update {}: {err}", ledger.path().display());
                SessionError::Ledger(err)
            })?;
        Ok(elapsed)
    }

    /// Ends the session. `None` keeps the previous description. The session
    /// is over even when the final write fails; that error is still returned.
    pub fn stop(
        &mut self,
        description: Option<String>,
        now: NaiveDateTime,
    ) -> Result<i64, SessionError> {
        let SessionState::Active { started_at } = self.state else {
            return Err(SessionError::NotActive);
        };
        if let Some(description) = description {
            self.description = description;
        }

        let end = whole_seconds(now).max(started_at);
        let elapsed = (end - started_at).num_seconds();
        let persisted = match &self.ledger {
            Some(ledger) => ledger
                .update_last_record(end, &format_duration(elapsed), &self.description)
                .map_err(SessionError::Ledger),
            None => Err(SessionError::NotInitialized),
        };

        self.accumulated_prior_seconds += elapsed;
        self.description.clear();
        self.state = SessionState::Idle;

        match persisted {
            Ok(()) => {
                info!("stopped tracking after {}", format_duration(elapsed));
                Ok(elapsed)
            }
            Err(err) => {
                warn!("session stopped but the ledger was not updated: {err}");
                Err(err)
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    pub fn is_initialized(&self) -> bool {
        self.ledger.is_some()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn ledger_path(&self) -> Option<&Path> {
        self.ledger.as_ref().map(LedgerStore::path)
    }

    pub fn tracking_interval(&self) -> Duration {
        self.tracking_interval
    }

    pub fn accumulated_prior_seconds(&self) -> i64 {
        self.accumulated_prior_seconds
    }

    pub fn current_session_seconds(&self, now: NaiveDateTime) -> i64 {
        match self.state {
            SessionState::Active { started_at } => (now - started_at).num_seconds().max(0),
            SessionState::Idle => 0,
        }
    }

    pub fn grand_total_seconds(&self, now: NaiveDateTime) -> i64 {
        self.accumulated_prior_seconds + self.current_session_seconds(now)
    }
}
