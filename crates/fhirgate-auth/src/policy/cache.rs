//! Per-token rule list cache.
//!
//! Rule lists are a pure function of a token's claims, so a list built once
//! can serve every request carrying the same token. Entries are keyed by the
//! token id (`jti`) and expire at the earlier of the token's own expiry and
//! `max_ttl` from insertion; a cached list is never staler than its token.
//!
//! Build errors are never cached, and contexts without a token id bypass the
//! cache entirely.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use time::OffsetDateTime;

use super::rule::RuleList;
use crate::AuthResult;
use crate::config::CacheConfig;
use crate::context::{AccessContext, TokenIdentity};

/// Default maximum cache size to prevent unbounded memory growth.
const DEFAULT_MAX_SIZE: usize = 10_000;

struct CachedRuleList {
    rules: Arc<RuleList>,
    expires_at: OffsetDateTime,
}

/// Cache of built rule lists keyed by token id.
pub struct RuleListCache {
    entries: DashMap<String, CachedRuleList>,
    max_ttl: Duration,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleListCacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl RuleListCache {
    /// Create a cache whose entries live at most `max_ttl`.
    #[must_use]
    pub fn new(max_ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_ttl,
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_ttl, DEFAULT_MAX_SIZE)
    }

    /// Return the cached list for the context's token, building it on a miss.
    ///
    /// # Errors
    ///
    /// Propagates the error of `build`; nothing is cached in that case.
    pub fn get_or_build<F>(&self, ctx: &AccessContext, build: F) -> AuthResult<Arc<RuleList>>
    where
        F: FnOnce() -> AuthResult<RuleList>,
    {
        let Some(token) = &ctx.token else {
            return build().map(Arc::new);
        };

        if let Some(rules) = self.get(&token.id) {
            return Ok(rules);
        }

        let rules = Arc::new(build()?);
        self.insert(token, Arc::clone(&rules));
        Ok(rules)
    }

    /// Cached list for a token id, if present and not expired.
    pub fn get(&self, token_id: &str) -> Option<Arc<RuleList>> {
        self.get_at(token_id, OffsetDateTime::now_utc())
    }

    fn get_at(&self, token_id: &str, now: OffsetDateTime) -> Option<Arc<RuleList>> {
        if let Some(entry) = self.entries.get(token_id) {
            if entry.expires_at > now {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.rules));
            }
            drop(entry);
            self.entries.remove(token_id);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Cache a list for a token. Already expired tokens are not cached.
    pub fn insert(&self, token: &TokenIdentity, rules: Arc<RuleList>) {
        self.insert_at(token, rules, OffsetDateTime::now_utc());
    }

    fn insert_at(&self, token: &TokenIdentity, rules: Arc<RuleList>, now: OffsetDateTime) {
        let ttl_expiry = now + self.max_ttl;
        let expires_at = match token.expires_at {
            Some(exp) if exp <= now => return,
            Some(exp) => exp.min(ttl_expiry),
            None => ttl_expiry,
        };

        if self.entries.len() >= self.max_size && !self.entries.contains_key(&token.id) {
            self.purge_expired_at(now);
            if self.entries.len() >= self.max_size {
                tracing::warn!(
                    max_size = self.max_size,
                    "Rule list cache at capacity, skipping insertion"
                );
                return;
            }
        }

        self.entries.insert(
            token.id.clone(),
            CachedRuleList { rules, expires_at },
        );
    }

    /// Drop the entry of a revoked token.
    pub fn invalidate(&self, token_id: &str) {
        if self.entries.remove(token_id).is_some() {
            tracing::debug!(token_id, "Invalidated cached rule list");
        }
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(OffsetDateTime::now_utc())
    }

    fn purge_expired_at(&self, now: OffsetDateTime) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> RuleListCacheStats {
        RuleListCacheStats {
            size: self.entries.len(),
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RuleListCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleListCache")
            .field("size", &self.entries.len())
            .field("max_ttl", &self.max_ttl)
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use time::macros::datetime;

    fn token(id: &str, expires_at: Option<OffsetDateTime>) -> TokenIdentity {
        TokenIdentity {
            id: id.to_string(),
            expires_at,
        }
    }

    fn list() -> Arc<RuleList> {
        Arc::new(RuleList::allow_all())
    }

    #[test]
    fn test_entry_lives_until_min_of_ttl_and_expiry() {
        let cache = RuleListCache::new(Duration::from_secs(300), 10);
        let now = datetime!(2026-01-01 12:00 UTC);

        // Token outlives the TTL.
        cache.insert_at(&token("a", Some(now + Duration::from_secs(3600))), list(), now);
        assert!(cache.get_at("a", now + Duration::from_secs(299)).is_some());
        assert!(cache.get_at("a", now + Duration::from_secs(300)).is_none());

        // Token expires before the TTL.
        cache.insert_at(&token("b", Some(now + Duration::from_secs(60))), list(), now);
        assert!(cache.get_at("b", now + Duration::from_secs(59)).is_some());
        assert!(cache.get_at("b", now + Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_expired_token_is_not_cached() {
        let cache = RuleListCache::new(Duration::from_secs(300), 10);
        let now = datetime!(2026-01-01 12:00 UTC);
        cache.insert_at(&token("a", Some(now)), list(), now);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_token_without_expiry_uses_ttl() {
        let cache = RuleListCache::new(Duration::from_secs(10), 10);
        let now = datetime!(2026-01-01 12:00 UTC);
        cache.insert_at(&token("a", None), list(), now);
        assert!(cache.get_at("a", now + Duration::from_secs(9)).is_some());
        assert!(cache.get_at("a", now + Duration::from_secs(10)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_and_purge() {
        let cache = RuleListCache::new(Duration::from_secs(300), 10);
        let now = datetime!(2026-01-01 12:00 UTC);
        cache.insert_at(&token("a", None), list(), now);
        cache.insert_at(&token("b", Some(now + Duration::from_secs(5))), list(), now);
        assert_eq!(cache.len(), 2);

        cache.invalidate("a");
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.purge_expired_at(now + Duration::from_secs(6)), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_limit() {
        let cache = RuleListCache::new(Duration::from_secs(300), 1);
        let now = datetime!(2026-01-01 12:00 UTC);
        cache.insert_at(&token("a", None), list(), now);
        cache.insert_at(&token("b", None), list(), now);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_at("a", now).is_some());

        // Replacing an existing key is always allowed.
        cache.insert_at(&token("a", None), list(), now);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_or_build_caches_success_only() {
        let cache = RuleListCache::new(Duration::from_secs(300), 10);
        let ctx = AccessContext::new(["user/*.*"]).with_token("tok", None);

        let err = cache
            .get_or_build(&ctx, || Err(AuthError::resource_not_supported("Widget")))
            .unwrap_err();
        assert_eq!(err, AuthError::resource_not_supported("Widget"));
        assert!(cache.is_empty());

        let first = cache.get_or_build(&ctx, || Ok(RuleList::allow_all())).unwrap();
        let second = cache
            .get_or_build(&ctx, || panic!("must be served from cache"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_context_without_token_bypasses_cache() {
        let cache = RuleListCache::new(Duration::from_secs(300), 10);
        let ctx = AccessContext::new(["user/*.*"]);
        cache.get_or_build(&ctx, || Ok(RuleList::allow_all())).unwrap();
        assert!(cache.is_empty());
    }
}
