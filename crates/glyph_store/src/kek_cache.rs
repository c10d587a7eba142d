//! Session KEK cache (§3, §4.3): a process-wide map from local user id to
//! a password-derived key-encryption key, each entry expiring 24 hours
//! after it was seeded. Never persisted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use zeroize::ZeroizeOnDrop;

use glyph_crypto::kdf;

use crate::error::StoreError;

const KEK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(ZeroizeOnDrop)]
struct CacheEntry {
    key: [u8; 32],
    #[zeroize(skip)]
    expires_at: Instant,
}

/// Thread-safe, cheaply-clonable cache handle. All mutations serialize
/// through the inner `RwLock`, matching the single-writer policy in §5.
#[derive(Clone, Default)]
pub struct KekCache {
    inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl KekCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a KEK from `password`/`salt` and seed a fresh 24-hour entry
    /// for `user_id`. This is the only operation in the store that may
    /// block for more than ~100 ms (PBKDF2) — callers run it off the
    /// interactive path on first login.
    pub async fn init(
        &self,
        user_id: &str,
        password: &[u8],
        salt: &[u8; 16],
        iterations: u32,
    ) -> Result<(), StoreError> {
        let key = kdf::pbkdf2(password, salt, iterations)?;
        let mut guard = self.inner.write().await;
        guard.insert(
            user_id.to_string(),
            CacheEntry {
                key,
                expires_at: Instant::now() + KEK_TTL,
            },
        );
        Ok(())
    }

    /// Seed a cache entry from an already-derived key (e.g. after C2's
    /// `load` unseals the identity and the derivation can be reused).
    pub async fn seed(&self, user_id: &str, key: [u8; 32]) {
        let mut guard = self.inner.write().await;
        guard.insert(
            user_id.to_string(),
            CacheEntry {
                key,
                expires_at: Instant::now() + KEK_TTL,
            },
        );
    }

    pub async fn clear(&self, user_id: &str) {
        let mut guard = self.inner.write().await;
        guard.remove(user_id);
    }

    /// Run `f` with the cached KEK for `user_id`. Fails with
    /// `VaultLocked` if there is no entry or the entry has expired.
    pub async fn with_key<F, R>(&self, user_id: &str, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&[u8; 32]) -> Result<R, StoreError>,
    {
        self.expire_if_needed(user_id).await;
        let guard = self.inner.read().await;
        match guard.get(user_id) {
            Some(entry) => f(&entry.key),
            None => Err(StoreError::VaultLocked(user_id.to_string())),
        }
    }

    async fn expire_if_needed(&self, user_id: &str) {
        let expired = {
            let guard = self.inner.read().await;
            guard
                .get(user_id)
                .map(|e| Instant::now() >= e.expires_at)
                .unwrap_or(false)
        };
        if expired {
            self.clear(user_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_key_fails_before_init() {
        let cache = KekCache::new();
        let err = cache.with_key("alice", |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, StoreError::VaultLocked(_)));
    }

    #[tokio::test]
    async fn init_then_with_key_succeeds() {
        let cache = KekCache::new();
        cache
            .init("alice", b"password", &[0u8; 16], kdf::MIN_PBKDF2_ITERATIONS)
            .await
            .unwrap();
        let doubled = cache.with_key("alice", |k| Ok(k[0])).await.unwrap();
        let _ = doubled;
    }

    #[tokio::test]
    async fn clear_removes_entry() {
        let cache = KekCache::new();
        cache
            .init("alice", b"password", &[0u8; 16], kdf::MIN_PBKDF2_ITERATIONS)
            .await
            .unwrap();
        cache.clear("alice").await;
        assert!(cache.with_key("alice", |_| Ok(())).await.is_err());
    }
}
