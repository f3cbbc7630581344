//! STS token cache
//!
//! Process-wide store of issued STS tokens keyed by (carrier, variant).
//! Issuance is single-flight per key: concurrent callers wait for the one
//! in-flight STS round-trip instead of stampeding the carrier. Tokens live
//! in memory only.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::carrier::AuthVariant;
use crate::clock::Clock;
use crate::error::TransferError;

/// Safety margin subtracted from `expires_at` when judging validity.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// An issued bearer token (SAML assertion or BiPRO token profile).
#[derive(Debug, Clone)]
pub struct StsToken {
    /// Raw assertion bytes, embedded verbatim into `wsse:Security` headers.
    pub assertion: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Carrier the token is bound to.
    pub carrier: String,
    /// Variant it was issued under.
    pub variant: AuthVariant,
}

impl StsToken {
    /// Valid within `[issued_at, expires_at - skew)`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.issued_at
            && now < self.expires_at - ChronoDuration::seconds(EXPIRY_SKEW_SECS)
    }
}

/// Observable cache counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCacheStats {
    pub issued: u64,
    pub cache_hits: u64,
    pub invalidations: u64,
}

type Key = (String, AuthVariant);
type Slot = Arc<tokio::sync::Mutex<Option<StsToken>>>;

/// Token cache with per-key single-flight issuance.
pub struct TokenCache {
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<Key, Slot>>,
    issued: AtomicU64,
    cache_hits: AtomicU64,
    invalidations: AtomicU64,
}

impl TokenCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            slots: Mutex::new(HashMap::new()),
            issued: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn slot(&self, carrier: &str, variant: AuthVariant) -> Slot {
        let mut slots = self.slots.lock().expect("token cache poisoned");
        slots
            .entry((carrier.to_string(), variant))
            .or_default()
            .clone()
    }

    /// Return a valid cached token or issue a new one via `issue`.
    ///
    /// The issuance closure runs under the per-key lock, so concurrent
    /// callers for the same (carrier, variant) coalesce: one STS round-trip,
    /// everyone else picks up the cached result. If issuance fails the slot
    /// stays empty and the next caller retries.
    pub async fn get<F, Fut>(
        &self,
        carrier: &str,
        variant: AuthVariant,
        issue: F,
    ) -> Result<StsToken, TransferError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StsToken, TransferError>>,
    {
        let slot = self.slot(carrier, variant);
        let mut guard = slot.lock().await;

        if let Some(token) = guard.as_ref() {
            if token.is_valid_at(self.clock.now()) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(token.clone());
            }
            debug!(carrier, %variant, "cached STS token expired, reissuing");
            *guard = None;
        }

        let token = issue().await?;
        self.issued.fetch_add(1, Ordering::Relaxed);
        debug!(
            carrier,
            %variant,
            expires_at = %token.expires_at,
            "issued STS token"
        );
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token for a key, e.g. after the carrier rejected it
    /// with `wsse:InvalidSecurityToken`.
    pub fn invalidate(&self, carrier: &str, variant: AuthVariant) {
        let slot = self.slot(carrier, variant);
        // blocking_lock would deadlock inside the runtime; try_lock is enough
        // because invalidation races with issuance only when a fresh token is
        // being produced anyway.
        if let Ok(mut guard) = slot.try_lock() {
            if guard.take().is_some() {
                self.invalidations.fetch_add(1, Ordering::Relaxed);
                debug!(carrier, %variant, "invalidated STS token");
            }
        };
    }

    pub fn stats(&self) -> TokenCacheStats {
        TokenCacheStats {
            issued: self.issued.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_clock::ManualClock;

    fn token_at(clock: &dyn Clock, ttl_secs: i64) -> StsToken {
        let now = clock.now();
        StsToken {
            assertion: b"<saml:Assertion/>".to_vec(),
            issued_at: now,
            expires_at: now + ChronoDuration::seconds(ttl_secs),
            carrier: "alpha".to_string(),
            variant: AuthVariant::UsernamePassword,
        }
    }

    #[tokio::test]
    async fn test_issues_once_then_hits_cache() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let cache = TokenCache::new(clock.clone());

        let t1 = cache
            .get("alpha", AuthVariant::UsernamePassword, || async {
                Ok(token_at(clock.as_ref(), 600))
            })
            .await
            .unwrap();
        let t2 = cache
            .get("alpha", AuthVariant::UsernamePassword, || async {
                panic!("must not reissue while cached token is valid")
            })
            .await
            .unwrap();

        assert_eq!(t1.assertion, t2.assertion);
        let stats = cache.stats();
        assert_eq!(stats.issued, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_expiry_skew_forces_reissue() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let cache = TokenCache::new(clock.clone());

        cache
            .get("alpha", AuthVariant::UsernamePassword, || async {
                Ok(token_at(clock.as_ref(), 120))
            })
            .await
            .unwrap();

        // 120s ttl minus 60s skew: invalid after 61s even though not expired
        clock.advance(61);
        let reissued = std::sync::atomic::AtomicBool::new(false);
        cache
            .get("alpha", AuthVariant::UsernamePassword, || {
                reissued.store(true, Ordering::SeqCst);
                async { Ok(token_at(clock.as_ref(), 600)) }
            })
            .await
            .unwrap();
        assert!(reissued.load(Ordering::SeqCst));
        assert_eq!(cache.stats().issued, 2);
    }

    #[tokio::test]
    async fn test_failed_issuance_leaves_slot_empty() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let cache = TokenCache::new(clock.clone());

        let err = cache
            .get("alpha", AuthVariant::UsernamePassword, || async {
                Err(TransferError::Auth("bad password".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "auth");

        // Next caller retries issuance instead of seeing a poisoned slot.
        cache
            .get("alpha", AuthVariant::UsernamePassword, || async {
                Ok(token_at(clock.as_ref(), 600))
            })
            .await
            .unwrap();
        assert_eq!(cache.stats().issued, 1);
    }

    #[tokio::test]
    async fn test_invalidate_evicts() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let cache = TokenCache::new(clock.clone());

        cache
            .get("alpha", AuthVariant::UsernamePassword, || async {
                Ok(token_at(clock.as_ref(), 600))
            })
            .await
            .unwrap();
        cache.invalidate("alpha", AuthVariant::UsernamePassword);

        let reissued = std::sync::atomic::AtomicBool::new(false);
        cache
            .get("alpha", AuthVariant::UsernamePassword, || {
                reissued.store(true, Ordering::SeqCst);
                async { Ok(token_at(clock.as_ref(), 600)) }
            })
            .await
            .unwrap();
        assert!(reissued.load(Ordering::SeqCst));
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_tokens_are_per_carrier() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let cache = TokenCache::new(clock.clone());

        cache
            .get("alpha", AuthVariant::Ticket, || async {
                Ok(token_at(clock.as_ref(), 600))
            })
            .await
            .unwrap();
        cache
            .get("beta", AuthVariant::Ticket, || async {
                Ok(token_at(clock.as_ref(), 600))
            })
            .await
            .unwrap();
        assert_eq!(cache.stats().issued, 2);
    }
}
