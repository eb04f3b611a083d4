use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use log::debug;

use crate::session::{Session, SessionError};

pub const DISPLAY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueTicks {
    pub display: bool,
    pub persist: bool,
}

#[derive(Debug)]
pub struct TickReport {
    pub redraw: bool,
    pub persisted: Option<Result<i64, SessionError>>,
}

#[derive(Debug, Clone, Copy)]
struct Cadence {
    interval: Duration,
    next_due: Instant,
}

impl Cadence {
    fn starting(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_due: now + interval,
        }
    }

    fn fire_if_due(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due += self.interval;
        // A stalled handler does not earn a burst of catch-up ticks.
        if self.next_due <= now {
            self.next_due = now + self.interval;
        }
        true
    }
}

/// Two cooperative timers polled from a single loop: a fixed one second
/// display tick and a persistence tick armed only while a session runs.
/// Handlers run inline on the polling thread, so a tick can never overlap
/// the previous one.
#[derive(Debug)]
pub struct TickScheduler {
    display: Cadence,
    persistence: Option<Cadence>,
}

impl TickScheduler {
    pub fn new(now: Instant) -> Self {
        Self {
            display: Cadence {
                interval: DISPLAY_INTERVAL,
                next_due: now,
            },
            persistence: None,
        }
    }

    pub fn arm_persistence(&mut self, interval: Duration, now: Instant) {
        debug!("persistence tick armed every {}s", interval.as_secs());
        self.persistence = Some(Cadence::starting(interval, now));
    }

    pub fn disarm_persistence(&mut self) {
        if self.persistence.take().is_some() {
            debug!("persistence tick disarmed");
        }
    }

    pub fn is_persistence_armed(&self) -> bool {
        self.persistence.is_some()
    }

    pub fn sync_with(&mut self, session: &Session, now: Instant) {
        match (session.is_active(), &self.persistence) {
            (true, None) => self.arm_persistence(session.tracking_interval(), now),
            (false, Some(_)) => self.disarm_persistence(),
            _ => {}
        }
    }

    pub fn poll(&mut self, now: Instant) -> DueTicks {
        DueTicks {
            display: self.display.fire_if_due(now),
            persist: self
                .persistence
                .as_mut()
                .is_some_and(|cadence| cadence.fire_if_due(now)),
        }
    }

    pub fn time_until_next(&self, now: Instant) -> Duration {
        let mut next = self.display.next_due;
        if let Some(cadence) = &self.persistence {
            next = next.min(cadence.next_due);
        }
        next.saturating_duration_since(now)
    }

    pub fn dispatch(
        &mut self,
        session: &mut Session,
        now: Instant,
        wall_clock: NaiveDateTime,
    ) -> TickReport {
        self.sync_with(session, now);
        let due = self.poll(now);
        let persisted = if due.persist {
            Some(session.tick(wall_clock))
        } else {
            None
        };
        TickReport {
            redraw: due.display,
            persisted,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};

    use crate::config::Config;
    use crate::ledger::LedgerStore;
    use crate::session::Session;

    use super::{DISPLAY_INTERVAL, TickScheduler};

    fn wall() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn display_ticks_every_second_without_persistence() {
        let t0 = Instant::now();
        let mut scheduler = TickScheduler::new(t0);

        let first = scheduler.poll(t0);
        assert!(first.display);
        assert!(!first.persist);
        assert!(!scheduler.poll(t0 + Duration::from_millis(500)).display);
        assert!(scheduler.poll(t0 + DISPLAY_INTERVAL).display);
        assert!(!scheduler.poll(t0 + Duration::from_secs(600)).persist);
    }

    #[test]
    fn persistence_fires_on_its_own_cadence() {
        let t0 = Instant::now();
        let mut scheduler = TickScheduler::new(t0);
        let minute = Duration::from_secs(60);
        scheduler.arm_persistence(minute, t0);

        assert!(!scheduler.poll(t0 + Duration::from_secs(59)).persist);
        assert!(scheduler.poll(t0 + minute).persist);
        assert!(!scheduler.poll(t0 + minute + Duration::from_secs(1)).persist);
        assert!(scheduler.poll(t0 + 2 * minute).persist);

        scheduler.disarm_persistence();
        assert!(!scheduler.poll(t0 + 10 * minute).persist);
    }

    #[test]
    fn stalled_ticks_fire_once_then_defer() {
        let t0 = Instant::now();
        let mut scheduler = TickScheduler::new(t0);
        let minute = Duration::from_secs(60);
        scheduler.arm_persistence(minute, t0);

        let late = t0 + minute * 3 + Duration::from_secs(30);
        assert!(scheduler.poll(late).persist);
        assert!(!scheduler.poll(late).persist);
        assert!(!scheduler.poll(late + Duration::from_secs(59)).persist);
        assert!(scheduler.poll(late + minute).persist);
    }

    #[test]
    fn reports_time_until_next_tick() {
        let t0 = Instant::now();
        let mut scheduler = TickScheduler::new(t0);
        scheduler.poll(t0);
        assert_eq!(scheduler.time_until_next(t0), DISPLAY_INTERVAL);
        assert_eq!(
            scheduler.time_until_next(t0 + Duration::from_secs(5)),
            Duration::ZERO
        );
    }

    #[test]
    fn dispatch_requests_redraw_once_per_second() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new();
        session.initialize(&Config::new(dir.path().join("ledger"), 1)).unwrap();

        let t0 = Instant::now();
        let mut scheduler = TickScheduler::new(t0);
        assert!(scheduler.dispatch(&mut session, t0, wall()).redraw);
        for millis in [1, 250, 999] {
            let report = scheduler.dispatch(&mut session, t0 + Duration::from_millis(millis), wall());
            assert!(!report.redraw, "redraw requested {millis}ms into the second");
        }
        assert!(scheduler.dispatch(&mut session, t0 + DISPLAY_INTERVAL, wall()).redraw);
        assert!(
            !scheduler
                .dispatch(&mut session, t0 + Duration::from_millis(1500), wall())
                .redraw
        );
    }

    #[test]
    fn dispatch_follows_session_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("ledger"), 1);
        let mut session = Session::new();
        session.initialize(&config).unwrap();

        let t0 = Instant::now();
        let mut scheduler = TickScheduler::new(t0);
        let idle = scheduler.dispatch(&mut session, t0, wall());
        assert!(idle.redraw);
        assert!(idle.persisted.is_none());
        assert!(!scheduler.is_persistence_armed());

        session.start(Some("deep work".to_string()), wall()).unwrap();
        scheduler.sync_with(&session, t0);
        assert!(scheduler.is_persistence_armed());

        let report = scheduler.dispatch(
            &mut session,
            t0 + Duration::from_secs(60),
            wall() + ChronoDuration::minutes(1),
        );
        assert_eq!(report.persisted.map(|result| result.ok()), Some(Some(60)));
        let records = LedgerStore::open(&config.file_path).unwrap().read_all().unwrap();
        assert_eq!(records[0].duration, "00:01");

        session.stop(None, wall() + ChronoDuration::minutes(2)).unwrap();
        let after_stop = scheduler.dispatch(
            &mut session,
            t0 + Duration::from_secs(120),
            wall() + ChronoDuration::minutes(2),
        );
        assert!(after_stop.persisted.is_none());
        assert!(!scheduler.is_persistence_armed());
    }
}
