// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// MaaS token cache
//
// Process-wide TTL cache of model serving tokens keyed by
// (namespace, user, model). Consulted while preparing a request; a miss
// issues a fresh token. Concurrent misses for the same key are not
// coalesced; both requests issue.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::maas::{RequestIdentity, TokenIssuer};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Monotonic time source, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// TokenCache trait
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub namespace: String,
    pub user: String,
    pub model: String,
}

impl TokenKey {
    pub fn new(namespace: &str, user: &str, model: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            user: user.to_string(),
            model: model.to_string(),
        }
    }
}

/// Thread-safe token storage with per-entry expiry.
pub trait TokenCache: Send + Sync {
    /// The token, if present and not yet expired.
    fn get(&self, key: &TokenKey) -> Option<String>;

    /// Store a token until `now + ttl`. Empty tokens are never stored.
    fn set(&self, key: TokenKey, token: String, ttl: Duration);

    /// Drop expired entries.
    fn purge_expired(&self);
}

// ---------------------------------------------------------------------------
// InMemoryTokenCache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct TokenCacheEntry {
    token: String,
    expires_at: Instant,
}

/// `DashMap`-backed token cache. Expired entries read as misses and are
/// removed lazily on `get` or by `purge_expired`.
pub struct InMemoryTokenCache {
    entries: DashMap<TokenKey, TokenCacheEntry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTokenCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryTokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache for InMemoryTokenCache {
    fn get(&self, key: &TokenKey) -> Option<String> {
        let entry = self.entries.get(key)?;
        if self.clock.now() < entry.expires_at {
            return Some(entry.token.clone());
        }
        drop(entry);
        self.entries
            .remove_if(key, |_, e| self.clock.now() >= e.expires_at);
        None
    }

    fn set(&self, key: TokenKey, token: String, ttl: Duration) {
        if token.is_empty() {
            return;
        }
        let expires_at = self.clock.now() + ttl;
        self.entries.insert(key, TokenCacheEntry { token, expires_at });
    }

    fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, e| now < e.expires_at);
    }
}

/// Purge expired entries every `interval` until `shutdown` fires.
pub fn spawn_purge_task(
    cache: Arc<dyn TokenCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => cache.purge_expired(),
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Cache-first token lookup used during request preparation.
pub struct TokenResolver {
    cache: Arc<dyn TokenCache>,
    issuer: Arc<dyn TokenIssuer>,
    /// Lifetime requested from the issuer.
    token_ttl: Duration,
    /// Upper bound on how long an issued token is reused.
    cache_ttl: Duration,
}

impl TokenResolver {
    pub fn new(
        cache: Arc<dyn TokenCache>,
        issuer: Arc<dyn TokenIssuer>,
        token_ttl: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            issuer,
            token_ttl,
            cache_ttl,
        }
    }

    /// Token for `model`, from cache or freshly issued. Issuance failures
    /// are logged and yield `None`; nothing is cached in that case.
    pub async fn resolve(&self, identity: &RequestIdentity, model: &str) -> Option<String> {
        let key = TokenKey::new(&identity.namespace, &identity.user, model);
        if let Some(token) = self.cache.get(&key) {
            debug!(namespace = %key.namespace, user = %key.user, model, "token cache hit");
            return Some(token);
        }
        debug!(namespace = %key.namespace, user = %key.user, model, "token cache miss");

        let issued = match self.issuer.issue(identity, self.token_ttl).await {
            Ok(issued) => issued,
            Err(err) => {
                warn!(
                    namespace = %key.namespace,
                    user = %key.user,
                    model,
                    error = %err,
                    "token issuance failed, continuing without model token"
                );
                return None;
            }
        };

        // Never cache past the issuer's own expiry.
        let remaining = (issued.expires_at - chrono::Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let ttl = self.cache_ttl.min(remaining);
        if !ttl.is_zero() {
            self.cache.set(key, issued.token.clone(), ttl);
        }
        Some(issued.token)
    }
}
