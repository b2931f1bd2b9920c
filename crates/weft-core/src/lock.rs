//! Per-URL advisory leases.
//!
//! A lease grants one worker exclusive processing rights over a URL for
//! a bounded TTL. Workers complete (or abandon) within the TTL; renewal
//! is not modeled, so TTLs are chosen comfortably above realistic cycle
//! times.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::{Error, ErrorKind, Result};

/// A granted lease on a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    url: String,
    token: u64,
}

impl Lease {
    /// Creates a lease handle. Lock services construct these when a
    /// lease is granted.
    pub fn new(url: impl Into<String>, token: u64) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }

    /// Returns the leased URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the service-assigned lease token.
    #[inline]
    #[must_use]
    pub const fn token(&self) -> u64 {
        self.token
    }
}

/// Grants TTL-bounded advisory leases keyed by URL.
///
/// # Contract
///
/// At most one live lease exists per URL across all workers for the
/// duration of the TTL. Contention surfaces as
/// [`ErrorKind::Contention`], which the pipeline treats as retryable.
/// Unlock failures are logged by callers but never fatal; an orphaned
/// lease simply expires.
#[async_trait::async_trait]
pub trait LockService: Send + Sync {
    /// Requests a lease on `url` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Contention`] when another live lease holds
    /// the URL, or another kind for service failures.
    async fn lock(&self, url: &str, ttl: Duration) -> Result<Lease>;

    /// Releases a lease.
    ///
    /// # Errors
    ///
    /// Returns an error when the lease is no longer held (expired or
    /// superseded); callers log and move on.
    async fn unlock(&self, lease: Lease) -> Result<()>;
}

/// Simple in-memory [`LockService`].
///
/// Expired entries are reaped lazily on the next acquisition attempt
/// for the same URL.
pub struct InMemLockService {
    inner: Arc<InMemLockInner>,
}

struct InMemLockInner {
    leases: Mutex<HashMap<String, Granted>>,
    tokens: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct Granted {
    token: u64,
    expires_at: Instant,
}

impl InMemLockService {
    /// Creates an empty [`InMemLockService`].
    pub fn new() -> Self {
        let inner = Arc::new(InMemLockInner {
            leases: Mutex::new(HashMap::new()),
            tokens: AtomicU64::new(1),
        });

        Self { inner }
    }
}

impl Clone for InMemLockService {
    fn clone(&self) -> Self {
        let inner = self.inner.clone();
        Self { inner }
    }
}

impl Default for InMemLockService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LockService for InMemLockService {
    async fn lock(&self, url: &str, ttl: Duration) -> Result<Lease> {
        let now = Instant::now();
        let guard = self.inner.leases.lock();
        let mut lock = guard.expect("should not be already held");

        if let Some(granted) = lock.get(url) {
            if granted.expires_at > now {
                return Err(Error::new(
                    ErrorKind::Contention,
                    format!("lease held for {url}"),
                ));
            }
        }

        let token = self.inner.tokens.fetch_add(1, Ordering::Relaxed);
        let granted = Granted {
            token,
            expires_at: now + ttl,
        };
        let _ = lock.insert(url.to_owned(), granted);
        Ok(Lease::new(url, token))
    }

    async fn unlock(&self, lease: Lease) -> Result<()> {
        let guard = self.inner.leases.lock();
        let mut lock = guard.expect("should not be already held");

        match lock.get(lease.url()) {
            Some(granted) if granted.token == lease.token() => {
                let _ = lock.remove(lease.url());
                Ok(())
            }
            _ => Err(Error::new(
                ErrorKind::Lock,
                format!("lease expired or superseded for {}", lease.url()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://api.example.com/repos/acme/widget";
    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn second_acquisition_contends() {
        let locks = InMemLockService::new();
        let lease = locks.lock(URL, TTL).await.unwrap();

        let contended = locks.lock(URL, TTL).await.unwrap_err();
        assert!(contended.is_contention());

        locks.unlock(lease).await.unwrap();
        let _ = locks.lock(URL, TTL).await.unwrap();
    }

    #[tokio::test]
    async fn urls_lease_independently() {
        let locks = InMemLockService::new();
        let _a = locks.lock(URL, TTL).await.unwrap();
        let _b = locks.lock("https://api.example.com/orgs/acme", TTL).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn expired_leases_are_regranted() {
        let locks = InMemLockService::new();
        let stale = locks.lock(URL, TTL).await.unwrap();

        tokio::time::advance(TTL + Duration::from_millis(1)).await;
        let fresh = locks.lock(URL, TTL).await.unwrap();
        assert_ne!(stale.token(), fresh.token());

        // The stale holder lost its lease; its unlock must not release
        // the fresh one.
        assert!(locks.unlock(stale).await.is_err());
        locks.unlock(fresh).await.unwrap();
    }
}
