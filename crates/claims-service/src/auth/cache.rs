//! In-memory claims cache.
//!
//! Maps a token to the claims resolved for it, until the expiry the Token
//! Authority reported for that token. The cache never extends or re-derives
//! an expiry.
//!
//! # Keys
//!
//! Entries are keyed by the SHA-256 digest of the token rather than the raw
//! token, so the map itself holds no bearer credentials.
//!
//! # Expiry
//!
//! - `lookup` never returns an entry once `now > expires_at`, and drops the
//!   entry it found expired.
//! - `purge_expired` reclaims everything that has expired; the sweeper task
//!   calls it on an interval.

use crate::auth::claims::Claims;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::token::{AccessToken, TokenDigest};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Cached claims with expiry time.
#[derive(Debug, Clone)]
struct CacheEntry {
    claims: Claims,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// Thread-safe claims cache.
///
/// Constructed explicitly and shared via `Arc` with whoever needs it.
#[derive(Debug, Default)]
pub struct ClaimsCache {
    entries: RwLock<HashMap<TokenDigest, CacheEntry>>,
}

impl ClaimsCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the claims for a token if a live entry exists.
    pub async fn lookup(&self, token: &AccessToken) -> Option<Claims> {
        self.lookup_at(token, Utc::now()).await
    }

    async fn lookup_at(&self, token: &AccessToken, now: DateTime<Utc>) -> Option<Claims> {
        let key = token.digest();

        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if entry.is_live(now) => {
                    debug!(
                        target: "claims.auth.cache",
                        token = %token.fingerprint(),
                        "Claims cache hit"
                    );
                    return Some(entry.claims.clone());
                }
                Some(_) => {}
                None => {
                    debug!(
                        target: "claims.auth.cache",
                        token = %token.fingerprint(),
                        "Claims cache miss"
                    );
                    return None;
                }
            }
        }

        // Expired entry: drop it unless a concurrent store already replaced it
        let mut entries = self.entries.write().await;
        if entries.get(&key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(&key);
            metrics::set_cache_entries(entries.len());
        }

        debug!(
            target: "claims.auth.cache",
            token = %token.fingerprint(),
            "Claims cache entry expired"
        );
        None
    }

    /// Insert or replace the entry for a token.
    ///
    /// `expires_at` must be the expiry the Token Authority reported.
    pub async fn store(&self, token: &AccessToken, claims: Claims, expires_at: DateTime<Utc>) {
        let mut entries = self.entries.write().await;
        entries.insert(token.digest(), CacheEntry { claims, expires_at });
        metrics::set_cache_entries(entries.len());

        debug!(
            target: "claims.auth.cache",
            token = %token.fingerprint(),
            expires_at = %expires_at,
            "Claims cached"
        );
    }

    /// Remove every expired entry. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now()).await
    }

    async fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        metrics::set_cache_entries(entries.len());
        before - entries.len()
    }

    /// Number of entries held, including expired ones not yet reclaimed.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Start the cache sweeper background task.
///
/// Purges expired entries every `interval` until the cancellation token is
/// triggered.
#[instrument(skip_all, name = "claims.task.cache_sweeper")]
pub async fn start_cache_sweeper(
    cache: Arc<ClaimsCache>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "claims.task.cache_sweeper",
        interval_seconds = interval.as_secs(),
        "Starting claims cache sweeper"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let purged = cache.purge_expired().await;
                if purged > 0 {
                    debug!(
                        target: "claims.task.cache_sweeper",
                        purged,
                        "Purged expired claims"
                    );
                }
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "claims.task.cache_sweeper",
                    "Cache sweeper received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::claims::{ClaimMap, IdentityClaims};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn claims_for(subject: &str, plan: &str) -> Claims {
        let mut identity = ClaimMap::new();
        identity.insert("sub".to_string(), json!(subject));
        let mut product = ClaimMap::new();
        product.insert("plan".to_string(), json!(plan));
        Claims::new(IdentityClaims::new(subject, identity), product)
    }

    #[tokio::test]
    async fn test_lookup_empty_cache_is_miss() {
        let cache = ClaimsCache::new();
        assert!(cache.lookup(&AccessToken::new("abc123")).await.is_none());
    }

    #[tokio::test]
    async fn test_store_then_lookup_hit() {
        let cache = ClaimsCache::new();
        let token = AccessToken::new("abc123");
        let claims = claims_for("u1", "gold");

        cache
            .store(&token, claims.clone(), Utc::now() + ChronoDuration::seconds(3600))
            .await;

        assert_eq!(cache.lookup(&token).await, Some(claims));
    }

    #[tokio::test]
    async fn test_entry_valid_at_exact_expiry() {
        let cache = ClaimsCache::new();
        let token = AccessToken::new("abc123");
        let expires_at = Utc::now() + ChronoDuration::seconds(60);

        cache.store(&token, claims_for("u1", "gold"), expires_at).await;

        assert!(cache.lookup_at(&token, expires_at).await.is_some());
        assert!(cache
            .lookup_at(&token, expires_at + ChronoDuration::milliseconds(1))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss_and_dropped() {
        let cache = ClaimsCache::new();
        let token = AccessToken::new("abc123");

        cache
            .store(&token, claims_for("u1", "gold"), Utc::now() - ChronoDuration::seconds(1))
            .await;
        assert_eq!(cache.len().await, 1);

        assert!(cache.lookup(&token).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_replaces_existing_entry() {
        let cache = ClaimsCache::new();
        let token = AccessToken::new("abc123");
        let expires_at = Utc::now() + ChronoDuration::seconds(3600);

        cache.store(&token, claims_for("u1", "silver"), expires_at).await;
        cache.store(&token, claims_for("u1", "gold"), expires_at).await;

        assert_eq!(cache.len().await, 1);
        let claims = cache.lookup(&token).await.unwrap();
        assert_eq!(claims.product_claim("plan"), Some(&json!("gold")));
    }

    #[tokio::test]
    async fn test_store_does_not_extend_expiry() {
        let cache = ClaimsCache::new();
        let token = AccessToken::new("abc123");
        let expires_at = Utc::now() + ChronoDuration::seconds(30);

        cache.store(&token, claims_for("u1", "gold"), expires_at).await;

        // Repeated hits do not push the expiry forward
        for _ in 0..3 {
            assert!(cache.lookup(&token).await.is_some());
        }
        assert!(cache
            .lookup_at(&token, expires_at + ChronoDuration::seconds(1))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_tokens_are_isolated() {
        let cache = ClaimsCache::new();
        let expires_at = Utc::now() + ChronoDuration::seconds(3600);

        cache
            .store(&AccessToken::new("token-a"), claims_for("a", "gold"), expires_at)
            .await;

        assert!(cache.lookup(&AccessToken::new("token-b")).await.is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_removes_only_expired() {
        let cache = ClaimsCache::new();
        let now = Utc::now();

        cache
            .store(&AccessToken::new("live"), claims_for("a", "gold"), now + ChronoDuration::seconds(60))
            .await;
        cache
            .store(&AccessToken::new("dead-1"), claims_for("b", "gold"), now - ChronoDuration::seconds(1))
            .await;
        cache
            .store(&AccessToken::new("dead-2"), claims_for("c", "gold"), now - ChronoDuration::seconds(60))
            .await;

        assert_eq!(cache.purge_expired_at(now).await, 2);
        assert_eq!(cache.len().await, 1);
        assert!(cache.lookup(&AccessToken::new("live")).await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_store_same_token() {
        let cache = Arc::new(ClaimsCache::new());
        let expires_at = Utc::now() + ChronoDuration::seconds(3600);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let token = AccessToken::new("shared");
                    cache.store(&token, claims_for("u1", "gold"), expires_at).await;
                    cache.lookup(&token).await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_and_stops_on_cancel() {
        let cache = Arc::new(ClaimsCache::new());
        cache
            .store(
                &AccessToken::new("dead"),
                claims_for("u1", "gold"),
                Utc::now() - ChronoDuration::seconds(1),
            )
            .await;

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(start_cache_sweeper(
            Arc::clone(&cache),
            Duration::from_secs(60),
            cancel_token.clone(),
        ));

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.is_empty().await);

        cancel_token.cancel();
        handle.await.unwrap();
    }
}
