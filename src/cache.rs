use std::time::Duration;

use moka::sync::Cache;

/// Outcome of checking one event fingerprint against the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    New,
    Updated,
    Duplicate,
}

/// Content-digest cache over event fingerprints `(contact_id, fired,
/// seqnr)`. The TTL is sliding (refreshed on every read), sized so that
/// the minute-scale overlapping windows of live sync always land inside
/// it. An equal digest means the event was already processed.
pub struct EventCache {
    inner: Cache<String, String>,
}

impl EventCache {
    pub fn new(ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(1_000_000)
            .time_to_idle(ttl)
            .build();
        Self { inner }
    }

    pub fn key(contact_id: &str, fired: &str, seqnr: &str) -> String {
        format!("{contact_id}{fired}{seqnr}")
    }

    /// Compares `digest` against the cached digest for `key`, refreshing
    /// the sliding TTL, and stores the new digest when it differs.
    pub fn observe(&self, key: String, digest: &str) -> Freshness {
        match self.inner.get(&key) {
            Some(old) if old == digest => Freshness::Duplicate,
            Some(_) => {
                self.inner.insert(key, digest.to_owned());
                Freshness::Updated
            }
            None => {
                self.inner.insert(key, digest.to_owned());
                Freshness::New
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_digest_is_suppressed() {
        let cache = EventCache::new(Duration::from_secs(60));
        let key = EventCache::key("c1", "2024-05-01T12:00:00", "3");
        assert_eq!(cache.observe(key.clone(), "aaa"), Freshness::New);
        assert_eq!(cache.observe(key.clone(), "aaa"), Freshness::Duplicate);
        assert_eq!(cache.observe(key, "aaa"), Freshness::Duplicate);
    }

    #[test]
    fn changed_digest_is_an_update() {
        let cache = EventCache::new(Duration::from_secs(60));
        let key = EventCache::key("c1", "2024-05-01T12:00:00", "");
        assert_eq!(cache.observe(key.clone(), "aaa"), Freshness::New);
        assert_eq!(cache.observe(key.clone(), "bbb"), Freshness::Updated);
        assert_eq!(cache.observe(key, "bbb"), Freshness::Duplicate);
    }

    #[test]
    fn expiry_makes_events_new_again() {
        let cache = EventCache::new(Duration::from_millis(50));
        let key = EventCache::key("c1", "2024-05-01T12:00:00", "1");
        assert_eq!(cache.observe(key.clone(), "aaa"), Freshness::New);
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(cache.observe(key, "aaa"), Freshness::New);
    }
}
