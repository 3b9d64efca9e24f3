//! The feed cache: keys, records, freshness policy, and the store contract.
//!
//! A serialized feed is cached under (scope, shape, facets, pagination).
//! Grouped feeds are expensive to build and may be cached forever; paginated
//! feeds must expire, because pagination windows shift as the catalog
//! changes. The store itself is pluggable; [`MemoryCache`] is the bundled
//! in-process implementation.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::facets::Facets;
use crate::pagination::Pagination;

/// Default freshness window for non-grouped feeds (20 minutes).
pub const DEFAULT_NONGROUPED_MAX_AGE_SECS: i64 = 1200;

/// Default number of records a [`MemoryCache`] retains.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store could not be reached or misbehaved.
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// The shape a cached document was filed under.
///
/// Search feeds are never cached, so they have no shape here. Note that a
/// `Groups` record does not guarantee grouped content: when a scope cannot
/// produce groups, the flat page built in its stead is deliberately stored
/// under the groups key so clients asking for groups are still served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedShape {
    Page,
    Groups,
}

impl FeedShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedShape::Page => "page",
            FeedShape::Groups => "groups",
        }
    }
}

/// The logical identity of one cacheable feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scope_id: String,
    pub shape: FeedShape,
    /// Canonical facets query string, empty when facets don't apply.
    pub facets: String,
    /// Canonical pagination query string, empty for grouped feeds.
    pub pagination: String,
}

impl CacheKey {
    pub fn new(
        scope_id: impl Into<String>,
        shape: FeedShape,
        facets: Option<&Facets>,
        pagination: Option<&Pagination>,
    ) -> Self {
        Self {
            scope_id: scope_id.into(),
            shape,
            facets: facets.map(Facets::query_string).unwrap_or_default(),
            pagination: pagination.map(Pagination::query_string).unwrap_or_default(),
        }
    }
}

/// One cached serialized feed document.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFeedRecord {
    pub content: String,
    /// When the document was generated and written.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the content, hex-encoded; cheap change detection for
    /// consumers that conditionally re-serve documents.
    pub digest: String,
}

impl CachedFeedRecord {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let digest = format!("{:x}", Sha256::digest(content.as_bytes()));
        Self {
            content,
            timestamp: Utc::now(),
            digest,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }
}

/// How long a cached record stays usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAge {
    Finite(Duration),
    /// Once written, the record never expires on its own.
    Forever,
}

impl MaxAge {
    pub fn seconds(secs: i64) -> Self {
        MaxAge::Finite(Duration::seconds(secs))
    }

    pub fn allows(&self, age: Duration) -> bool {
        match self {
            MaxAge::Finite(limit) => age <= *limit,
            MaxAge::Forever => true,
        }
    }
}

/// Freshness policy per feed shape, injected into the generator.
///
/// Non-grouped feeds must have a finite max-age; a forever setting is a
/// configuration mistake, corrected here to the finite default rather than
/// honored or propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    grouped: MaxAge,
    nongrouped: MaxAge,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            grouped: MaxAge::Forever,
            nongrouped: MaxAge::seconds(DEFAULT_NONGROUPED_MAX_AGE_SECS),
        }
    }
}

impl CachePolicy {
    pub fn new(grouped: MaxAge, nongrouped: MaxAge) -> Self {
        let nongrouped = match nongrouped {
            MaxAge::Forever => {
                tracing::error!(
                    "non-grouped acquisition feeds cannot be cached forever; \
                     falling back to {}s",
                    DEFAULT_NONGROUPED_MAX_AGE_SECS
                );
                MaxAge::seconds(DEFAULT_NONGROUPED_MAX_AGE_SECS)
            }
            finite => finite,
        };
        Self { grouped, nongrouped }
    }

    pub fn max_age_for(&self, shape: FeedShape) -> MaxAge {
        match shape {
            FeedShape::Groups => self.grouped,
            FeedShape::Page => self.nongrouped,
        }
    }
}

/// Result of a cache lookup: the record, if any, and whether the caller may
/// serve it as-is.
///
/// A stale or force-refreshed record is still returned so the caller knows
/// a regeneration will overwrite in place rather than create a new record.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub record: Option<CachedFeedRecord>,
    pub usable: bool,
}

impl CacheLookup {
    pub fn miss() -> Self {
        Self {
            record: None,
            usable: false,
        }
    }
}

/// The store contract the feed generator depends on.
///
/// Writes replace in place: at most one live record exists per key.
/// Concurrent writers may race; the last one wins, which is benign because
/// regeneration is idempotent for a given catalog state.
pub trait FeedCache {
    fn fetch(
        &self,
        key: &CacheKey,
        max_age: MaxAge,
        force_refresh: bool,
    ) -> Result<CacheLookup, CacheError>;

    fn write(&self, key: &CacheKey, content: &str) -> Result<CachedFeedRecord, CacheError>;
}

/// Bounded in-process store, LRU-evicted.
pub struct MemoryCache {
    records: Mutex<LruCache<CacheKey, CachedFeedRecord>>,
}

impl MemoryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            records: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, CachedFeedRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        // DEFAULT_CACHE_CAPACITY is nonzero.
        let capacity = NonZeroUsize::new(DEFAULT_CACHE_CAPACITY)
            .unwrap_or(NonZeroUsize::MIN);
        Self::new(capacity)
    }
}

impl FeedCache for MemoryCache {
    fn fetch(
        &self,
        key: &CacheKey,
        max_age: MaxAge,
        force_refresh: bool,
    ) -> Result<CacheLookup, CacheError> {
        let mut records = self.lock();
        let Some(record) = records.get(key).cloned() else {
            return Ok(CacheLookup::miss());
        };
        let usable = !force_refresh && max_age.allows(record.age(Utc::now()));
        Ok(CacheLookup {
            record: Some(record),
            usable,
        })
    }

    fn write(&self, key: &CacheKey, content: &str) -> Result<CachedFeedRecord, CacheError> {
        let record = CachedFeedRecord::new(content);
        self.lock().put(key.clone(), record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn page_key(scope: &str) -> CacheKey {
        CacheKey::new(
            scope,
            FeedShape::Page,
            Some(&Facets::default()),
            Some(&Pagination::default()),
        )
    }

    #[test]
    fn test_key_includes_facets_and_pagination() {
        let a = page_key("lane-1");
        let b = CacheKey::new(
            "lane-1",
            FeedShape::Page,
            Some(&Facets::default()),
            Some(&Pagination::new(50, 50)),
        );
        assert_ne!(a, b, "different pages are different keys");
        let c = CacheKey::new("lane-1", FeedShape::Groups, Some(&Facets::default()), None);
        assert_ne!(a, c, "different shapes are different keys");
    }

    #[test]
    fn test_fetch_miss() {
        let cache = MemoryCache::default();
        let lookup = cache
            .fetch(&page_key("lane-1"), MaxAge::Forever, false)
            .unwrap();
        assert!(lookup.record.is_none());
        assert!(!lookup.usable);
    }

    #[test]
    fn test_write_then_fetch() {
        let cache = MemoryCache::default();
        let key = page_key("lane-1");
        cache.write(&key, "<feed/>").unwrap();
        let lookup = cache.fetch(&key, MaxAge::seconds(600), false).unwrap();
        assert!(lookup.usable);
        assert_eq!(lookup.record.unwrap().content, "<feed/>");
    }

    #[test]
    fn test_write_replaces_in_place() {
        let cache = MemoryCache::default();
        let key = page_key("lane-1");
        let first = cache.write(&key, "<feed>v1</feed>").unwrap();
        let second = cache.write(&key, "<feed>v2</feed>").unwrap();
        assert_ne!(first.digest, second.digest);
        assert_eq!(cache.len(), 1, "one live record per key");
        let lookup = cache.fetch(&key, MaxAge::Forever, false).unwrap();
        assert_eq!(lookup.record.unwrap().content, "<feed>v2</feed>");
    }

    #[test]
    fn test_stale_record_is_returned_but_unusable() {
        let cache = MemoryCache::default();
        let key = page_key("lane-1");
        cache.write(&key, "<feed/>").unwrap();
        // Zero max-age: the record is already too old.
        let lookup = cache.fetch(&key, MaxAge::seconds(-1), false).unwrap();
        assert!(lookup.record.is_some());
        assert!(!lookup.usable);
    }

    #[test]
    fn test_force_refresh_marks_unusable() {
        let cache = MemoryCache::default();
        let key = page_key("lane-1");
        cache.write(&key, "<feed/>").unwrap();
        let lookup = cache.fetch(&key, MaxAge::Forever, true).unwrap();
        assert!(lookup.record.is_some());
        assert!(!lookup.usable);
    }

    #[test]
    fn test_forever_record_always_usable() {
        let cache = MemoryCache::default();
        let key = CacheKey::new("lane-1", FeedShape::Groups, Some(&Facets::default()), None);
        cache.write(&key, "<feed/>").unwrap();
        let lookup = cache.fetch(&key, MaxAge::Forever, false).unwrap();
        assert!(lookup.usable);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = MemoryCache::new(NonZeroUsize::new(2).unwrap());
        cache.write(&page_key("a"), "<feed>a</feed>").unwrap();
        cache.write(&page_key("b"), "<feed>b</feed>").unwrap();
        cache.write(&page_key("c"), "<feed>c</feed>").unwrap();
        assert_eq!(cache.len(), 2);
        let lookup = cache.fetch(&page_key("a"), MaxAge::Forever, false).unwrap();
        assert!(lookup.record.is_none(), "oldest record evicted");
    }

    #[test]
    fn test_policy_corrects_forever_nongrouped() {
        let policy = CachePolicy::new(MaxAge::Forever, MaxAge::Forever);
        assert_eq!(policy.max_age_for(FeedShape::Groups), MaxAge::Forever);
        assert_eq!(
            policy.max_age_for(FeedShape::Page),
            MaxAge::seconds(DEFAULT_NONGROUPED_MAX_AGE_SECS)
        );
    }

    #[test]
    fn test_default_policy() {
        let policy = CachePolicy::default();
        assert_eq!(policy.max_age_for(FeedShape::Groups), MaxAge::Forever);
        assert_eq!(
            policy.max_age_for(FeedShape::Page),
            MaxAge::seconds(DEFAULT_NONGROUPED_MAX_AGE_SECS)
        );
    }

    #[test]
    fn test_record_digest_tracks_content() {
        let a = CachedFeedRecord::new("<feed>a</feed>");
        let b = CachedFeedRecord::new("<feed>a</feed>");
        assert_eq!(a.digest, b.digest);
        let c = CachedFeedRecord::new("<feed>c</feed>");
        assert_ne!(a.digest, c.digest);
    }
}
