//! Append-only reading log with a bounded in-memory tail

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::data::{validate_reading_value, Reading, ReadingStore};
use crate::error::Result;

struct LogInner {
    store: Box<dyn ReadingStore>,
    tail: VecDeque<Reading>,
}

/// Ordered history of meter readings
///
/// Timestamps never go backwards: a capture stamped earlier than the newest
/// entry (clock step) is recorded at the newest entry's time.
pub struct ReadingLog {
    inner: Mutex<LogInner>,
    capacity: usize,
}

impl ReadingLog {
    /// Open the log, caching the newest `capacity` entries
    pub fn open(mut store: Box<dyn ReadingStore>, capacity: usize) -> Result<Self> {
        let tail: VecDeque<Reading> = store.load_recent(capacity)?.into();
        debug!(cached = tail.len(), "Reading log opened");
        Ok(Self {
            inner: Mutex::new(LogInner { store, tail }),
            capacity,
        })
    }

    pub fn append(&self, value: f64) -> Result<Reading> {
        self.append_at(Utc::now(), value)
    }

    pub fn append_at(&self, timestamp: DateTime<Utc>, value: f64) -> Result<Reading> {
        let value = validate_reading_value(value)?;
        let mut inner = self.inner.lock();

        let timestamp = match inner.tail.back() {
            Some(last) if last.timestamp > timestamp => {
                warn!(%timestamp, last = %last.timestamp, "Clock went backwards, clamping reading time");
                last.timestamp
            }
            _ => timestamp,
        };

        let reading = Reading { timestamp, value };
        inner.store.append(&reading)?;

        if inner.tail.len() == self.capacity {
            inner.tail.pop_front();
        }
        if self.capacity > 0 {
            inner.tail.push_back(reading.clone());
        }
        Ok(reading)
    }

    /// Newest `limit` readings, oldest first
    pub fn recent(&self, limit: usize) -> Vec<Reading> {
        let inner = self.inner.lock();
        let skip = inner.tail.len().saturating_sub(limit);
        inner.tail.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<Reading> {
        self.inner.lock().tail.back().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{JsonlReadingStore, MemoryReadingStore};
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_recent_is_oldest_first_and_bounded() {
        let log = ReadingLog::open(Box::new(MemoryReadingStore::new()), 3).unwrap();
        for i in 0..5 {
            log.append_at(at(i), i as f64).unwrap();
        }
        let values: Vec<f64> = log.recent(10).iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert_eq!(log.recent(2).len(), 2);
        assert_eq!(log.latest().unwrap().value, 4.0);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let log = ReadingLog::open(Box::new(MemoryReadingStore::new()), 10).unwrap();
        log.append_at(at(100), 1.0).unwrap();
        let clamped = log.append_at(at(100) - Duration::seconds(30), 2.0).unwrap();
        assert_eq!(clamped.timestamp, at(100));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let store = MemoryReadingStore::new();
        let log = ReadingLog::open(Box::new(store.clone()), 10).unwrap();
        assert!(log.append(-5.0).is_err());
        assert!(log.append(f64::NAN).is_err());
        assert!(store.all().is_empty());
    }

    #[test]
    fn test_store_failure_is_not_cached() {
        let store = MemoryReadingStore::new();
        let log = ReadingLog::open(Box::new(store.clone()), 10).unwrap();
        store.set_fail_appends(true);
        assert!(log.append(10.0).is_err());
        assert!(log.latest().is_none());
    }

    #[test]
    fn test_reopen_restores_tail_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        {
            let log = ReadingLog::open(Box::new(JsonlReadingStore::new(&path)), 20).unwrap();
            log.append_at(at(0), 11.0).unwrap();
            log.append_at(at(60), 12.0).unwrap();
        }
        let log = ReadingLog::open(Box::new(JsonlReadingStore::new(&path)), 20).unwrap();
        let values: Vec<f64> = log.recent(20).iter().map(|r| r.value).collect();
        assert_eq!(values, vec![11.0, 12.0]);
    }
}
