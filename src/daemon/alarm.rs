//! Named one-shot alarms.
//!
//! The expiry alarm backs up the periodic tick: if ticks are starved the
//! alarm still delivers the expiry transition. Alarms are keyed by name and
//! creating an alarm replaces any pending alarm of the same name.

use std::collections::BTreeMap;

use tokio::time::{Duration, Instant};

/// Name of the alarm that guards countdown expiry.
pub const EXPIRY_ALARM: &str = "timerAlarm";

/// A scheduled alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAlarm {
    /// Alarm name
    pub name: &'static str,
    /// When it fires
    pub due: Instant,
}

/// Set of pending alarms, at most one per name.
#[derive(Debug, Default)]
pub struct AlarmSchedule {
    pending: BTreeMap<&'static str, Instant>,
}

impl AlarmSchedule {
    /// Creates an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `name` to fire after `delay`, replacing any pending one.
    pub fn create(&mut self, name: &'static str, delay: Duration) {
        let due = Instant::now() + delay;
        if self.pending.insert(name, due).is_some() {
            tracing::debug!(alarm = name, "replaced pending alarm");
        }
    }

    /// Cancels `name`. Returns true if it was pending.
    pub fn clear(&mut self, name: &'static str) -> bool {
        self.pending.remove(name).is_some()
    }

    /// Returns true if `name` is pending.
    pub fn is_pending(&self, name: &'static str) -> bool {
        self.pending.contains_key(name)
    }

    /// Returns the alarm that fires first.
    pub fn next(&self) -> Option<PendingAlarm> {
        self.pending
            .iter()
            .min_by_key(|(_, due)| **due)
            .map(|(name, due)| PendingAlarm {
                name: *name,
                due: *due,
            })
    }

    /// Removes and returns `name` if it is due at `now`.
    pub fn take_due(&mut self, name: &'static str, now: Instant) -> bool {
        match self.pending.get(name) {
            Some(due) if *due <= now => {
                self.pending.remove(name);
                true
            }
            _ => false,
        }
    }
}

/// Waits until `alarm` is due and returns its name. Never completes for
/// `None`, which makes it usable as an optional `select!` branch.
pub async fn wait_for(alarm: Option<PendingAlarm>) -> &'static str {
    match alarm {
        Some(alarm) => {
            tokio::time::sleep_until(alarm.due).await;
            alarm.name
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_create_replaces_same_name() {
        let mut alarms = AlarmSchedule::new();
        alarms.create(EXPIRY_ALARM, Duration::from_secs(60));
        alarms.create(EXPIRY_ALARM, Duration::from_secs(5));

        let next = alarms.next().unwrap();
        assert_eq!(next.name, EXPIRY_ALARM);
        assert_eq!(next.due, Instant::now() + Duration::from_secs(5));
        assert_eq!(alarms.pending.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let mut alarms = AlarmSchedule::new();
        alarms.create(EXPIRY_ALARM, Duration::from_secs(1));

        assert!(alarms.clear(EXPIRY_ALARM));
        assert!(!alarms.clear(EXPIRY_ALARM));
        assert!(alarms.next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_fires_at_due_time() {
        let mut alarms = AlarmSchedule::new();
        alarms.create(EXPIRY_ALARM, Duration::from_secs(3));
        let start = Instant::now();

        let name = wait_for(alarms.next()).await;

        assert_eq!(name, EXPIRY_ALARM);
        assert!(Instant::now() - start >= Duration::from_secs(3));
        assert!(alarms.take_due(EXPIRY_ALARM, Instant::now()));
        assert!(!alarms.is_pending(EXPIRY_ALARM));
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_due_before_time() {
        let mut alarms = AlarmSchedule::new();
        alarms.create(EXPIRY_ALARM, Duration::from_secs(3));

        assert!(!alarms.take_due(EXPIRY_ALARM, Instant::now()));
        assert!(alarms.is_pending(EXPIRY_ALARM));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_none_never_fires() {
        let result = tokio::time::timeout(Duration::from_secs(10), wait_for(None)).await;
        assert!(result.is_err());
    }
}
