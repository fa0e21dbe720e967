//! Per-service completion timestamps.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Keeps each service's timestamps strictly increasing, even if the wall
/// clock steps backwards between ticks.
#[derive(Default)]
pub(super) struct Stamper {
    last: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Stamper {
    /// Forget services that are no longer configured.
    pub(super) fn retain<'a>(&self, services: impl IntoIterator<Item = &'a str>) {
        let keep: HashSet<&str> = services.into_iter().collect();
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last.retain(|name, _| keep.contains(name.as_str()));
    }

    #[cfg(test)]
    pub(super) fn tracked(&self) -> usize {
        self.last.lock().map(|last| last.len()).unwrap_or(0)
    }

    pub(super) fn stamp(&self, service: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let stamped = match last.get(service) {
            Some(prev) if now <= *prev => *prev + ChronoDuration::nanoseconds(1),
            _ => now,
        };
        last.insert(service.to_string(), stamped);
        stamped
    }
}
