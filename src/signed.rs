//! Signed-URL cache
//!
//! Pre-signed URLs expire purely by elapsed time since they were issued.
//! Expired records are deleted when read.

use crate::clock::{is_expired, Clock};
use crate::db::records::{read_record, signed_record_key, write_record};
use crate::db::{RecordResult, RecordStore, SignedUrlRecord};
use log::debug;
use std::sync::Arc;
use std::time::Duration;

pub struct SignedUrlCache {
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SignedUrlCache {
    pub fn new(records: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { records, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached URL for `object_key`, unless it has outlived the TTL.
    pub fn find(&self, object_key: &str) -> RecordResult<Option<String>> {
        let key = signed_record_key(object_key);
        let Some(record) = read_record::<SignedUrlRecord>(self.records.as_ref(), &key)? else {
            return Ok(None);
        };

        if is_expired(self.clock.now_millis(), record.issued_at, self.ttl) {
            debug!("signed_url_expired: {}", object_key);
            self.records.remove(&key)?;
            return Ok(None);
        }
        Ok(Some(record.signed_url))
    }

    /// Store `signed_url` as issued now, replacing any previous entry.
    pub fn write(&self, object_key: &str, signed_url: &str) -> RecordResult<()> {
        let record = SignedUrlRecord {
            object_key: object_key.to_string(),
            signed_url: signed_url.to_string(),
            issued_at: self.clock.now_millis(),
        };
        write_record(self.records.as_ref(), &signed_record_key(object_key), &record)
    }

    pub fn remove(&self, object_key: &str) -> RecordResult<()> {
        self.records.remove(&signed_record_key(object_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::MemoryRecordStore;

    const TTL: Duration = Duration::from_secs(7 * 24 * 3600);

    fn cache() -> (Arc<MemoryRecordStore>, Arc<ManualClock>, SignedUrlCache) {
        let records = Arc::new(MemoryRecordStore::new());
        let clock = Arc::new(ManualClock::new(10_000));
        let cache = SignedUrlCache::new(records.clone(), clock.clone(), TTL);
        (records, clock, cache)
    }

    #[test]
    fn find_returns_url_within_ttl() {
        let (_, clock, cache) = cache();
        cache.write("a.png", "https://signed/a").unwrap();

        clock.advance(TTL);
        assert_eq!(cache.find("a.png").unwrap().as_deref(), Some("https://signed/a"));
    }

    #[test]
    fn expired_record_is_absent_and_deleted() {
        let (records, clock, cache) = cache();
        cache.write("a.png", "https://signed/a").unwrap();

        clock.advance(TTL + Duration::from_secs(1));
        assert_eq!(cache.find("a.png").unwrap(), None);
        assert!(records.get(&signed_record_key("a.png")).unwrap().is_none());
    }

    #[test]
    fn write_overwrites_and_restarts_the_ttl() {
        let (_, clock, cache) = cache();
        cache.write("a.png", "https://signed/old").unwrap();
        clock.advance(TTL);
        cache.write("a.png", "https://signed/new").unwrap();
        clock.advance(Duration::from_secs(60));

        assert_eq!(cache.find("a.png").unwrap().as_deref(), Some("https://signed/new"));
    }

    #[test]
    fn remove_drops_only_that_key() {
        let (records, _, cache) = cache();
        cache.write("a.png", "https://signed/a").unwrap();
        cache.write("b.png", "https://signed/b").unwrap();

        cache.remove("a.png").unwrap();
        cache.remove("missing").unwrap();

        assert_eq!(cache.find("a.png").unwrap(), None);
        assert_eq!(cache.find("b.png").unwrap().as_deref(), Some("https://signed/b"));
        assert_eq!(records.len(), 1);
    }
}
