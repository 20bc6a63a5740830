use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A persisted unit of cached data.
///
/// Entries are always written as a whole; a reader never observes a half-updated payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<T> {
    key:       String,
    payload:   T,
    stored_at: DateTime<Utc>,
}

impl<T> Entry<T> {
    /// Stamp a payload with the current time.
    pub fn new<K: Into<String>>(key: K, payload: T) -> Self {
        Self::with_stored_at(key, payload, Utc::now())
    }

    pub fn with_stored_at<K: Into<String>>(key: K, payload: T, stored_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            payload,
            stored_at,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    /// Age of the entry relative to `now`. Clock skew into the future counts as zero age.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }

    pub fn is_stale_at(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.age_at(now) > window
    }

    pub fn is_stale(&self, window: Duration) -> bool {
        self.is_stale_at(window, Utc::now())
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Entry<U> {
        Entry {
            key:       self.key,
            payload:   f(self.payload),
            stored_at: self.stored_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn staleness_is_strictly_greater_than_window() {
        let now = Utc::now();
        let window = Duration::from_secs(300);

        let exact = Entry::with_stored_at("k", (), now - TimeDelta::seconds(300));
        assert!(!exact.is_stale_at(window, now));

        let older = Entry::with_stored_at("k", (), now - TimeDelta::seconds(301));
        assert!(older.is_stale_at(window, now));
    }

    #[test]
    fn future_stamp_has_zero_age() {
        let now = Utc::now();
        let entry = Entry::with_stored_at("k", 1u8, now + TimeDelta::seconds(10));
        assert_eq!(entry.age_at(now), Duration::ZERO);
    }
}
