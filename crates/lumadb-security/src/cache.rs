//! Decryption cache with per-property TTL

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use lumadb_common::config::EncryptionConfig;
use lumadb_common::error::HookError;

use crate::encryptor::{EncryptionContext, FieldEncryptor};

/// Cache entry with TTL
struct CacheEntry {
    plaintext: Vec<u8>,
    created: Instant,
    ttl: Duration,
    hits: u64,
}

/// Wraps a [`FieldEncryptor`] and serves repeated decryptions from memory.
///
/// Entries live for the cache-ttl declared on the property (carried in the
/// [`EncryptionContext`]), or the configured default. A zero TTL disables
/// caching for that property. Encryption always reaches the inner encryptor.
pub struct CachedFieldEncryptor<E> {
    inner: E,
    cache: DashMap<String, CacheEntry>,
    max_entries: usize,
    default_ttl: Duration,
}

impl<E: FieldEncryptor> CachedFieldEncryptor<E> {
    /// Create new cache with max entries
    pub fn new(inner: E, max_entries: usize) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            max_entries: max_entries.max(1),
            default_ttl: Duration::from_secs(300),
        }
    }

    /// Build from the `[encryption]` configuration section
    pub fn from_config(inner: E, config: &EncryptionConfig) -> Self {
        Self::new(inner, config.cache_max_entries)
            .with_default_ttl(Duration::from_secs(config.cache_ttl_secs))
    }

    /// Set TTL for properties that declare none
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Clear entire cache
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let mut total_hits = 0u64;
        let mut entries = 0usize;

        for entry in self.cache.iter() {
            total_hits += entry.hits;
            entries += 1;
        }

        CacheStats {
            entries,
            max_entries: self.max_entries,
            total_hits,
        }
    }

    fn cache_key(ciphertext: &[u8], context: &EncryptionContext) -> String {
        let mut hasher = Sha256::new();
        hasher.update(context.context_id.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(ciphertext);
        hex::encode(hasher.finalize())
    }

    fn lookup(&self, key: &str) -> Option<Vec<u8>> {
        let mut entry = self.cache.get_mut(key)?;
        if entry.created.elapsed() > entry.ttl {
            drop(entry);
            self.cache.remove(key);
            return None;
        }
        entry.hits += 1;
        Some(entry.plaintext.clone())
    }

    fn evict_oldest(&self) {
        let mut oldest_key = None;
        let mut oldest_time = Instant::now();

        for entry in self.cache.iter() {
            if entry.created <= oldest_time {
                oldest_time = entry.created;
                oldest_key = Some(entry.key().clone());
            }
        }

        if let Some(key) = oldest_key {
            self.cache.remove(&key);
        }
    }
}

#[async_trait]
impl<E: FieldEncryptor> FieldEncryptor for CachedFieldEncryptor<E> {
    async fn encrypt(
        &self,
        plaintext: &[u8],
        context: &EncryptionContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, HookError> {
        self.inner.encrypt(plaintext, context, cancel).await
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, HookError> {
        let ttl = context.cache_ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return self.inner.decrypt(ciphertext, context, cancel).await;
        }

        let key = Self::cache_key(ciphertext, context);
        if let Some(plaintext) = self.lookup(&key) {
            debug!(kind = %context.entity_kind, property = %context.property, "Decryption cache hit");
            return Ok(plaintext);
        }

        let plaintext = self.inner.decrypt(ciphertext, context, cancel).await?;

        if self.cache.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.cache.insert(
            key,
            CacheEntry {
                plaintext: plaintext.clone(),
                created: Instant::now(),
                ttl,
                hits: 0,
            },
        );

        Ok(plaintext)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub total_hits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reverses bytes and counts decrypt calls.
    #[derive(Default)]
    struct CountingEncryptor {
        decrypts: AtomicUsize,
    }

    #[async_trait]
    impl FieldEncryptor for CountingEncryptor {
        async fn encrypt(
            &self,
            plaintext: &[u8],
            _context: &EncryptionContext,
            _cancel: &CancellationToken,
        ) -> Result<Vec<u8>, HookError> {
            Ok(plaintext.iter().rev().copied().collect())
        }

        async fn decrypt(
            &self,
            ciphertext: &[u8],
            _context: &EncryptionContext,
            _cancel: &CancellationToken,
        ) -> Result<Vec<u8>, HookError> {
            self.decrypts.fetch_add(1, Ordering::SeqCst);
            Ok(ciphertext.iter().rev().copied().collect())
        }
    }

    fn context(ttl: Option<Duration>) -> EncryptionContext {
        EncryptionContext::new("Account", "iban").with_cache_ttl(ttl)
    }

    #[tokio::test]
    async fn test_repeated_decrypt_hits_cache() {
        let cached = CachedFieldEncryptor::new(CountingEncryptor::default(), 16);
        let cancel = CancellationToken::new();
        let ctx = context(Some(Duration::from_secs(60)));

        let first = cached.decrypt(b"cba", &ctx, &cancel).await.unwrap();
        let second = cached.decrypt(b"cba", &ctx, &cancel).await.unwrap();

        assert_eq!(first, b"abc");
        assert_eq!(second, b"abc");
        assert_eq!(cached.inner.decrypts.load(Ordering::SeqCst), 1);
        assert_eq!(cached.stats().total_hits, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_bypasses_cache() {
        let cached = CachedFieldEncryptor::new(CountingEncryptor::default(), 16);
        let cancel = CancellationToken::new();
        let ctx = context(Some(Duration::ZERO));

        cached.decrypt(b"cba", &ctx, &cancel).await.unwrap();
        cached.decrypt(b"cba", &ctx, &cancel).await.unwrap();

        assert_eq!(cached.inner.decrypts.load(Ordering::SeqCst), 2);
        assert_eq!(cached.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refreshed() {
        let cached = CachedFieldEncryptor::new(CountingEncryptor::default(), 16);
        let cancel = CancellationToken::new();
        let ctx = context(Some(Duration::from_millis(5)));

        cached.decrypt(b"cba", &ctx, &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cached.decrypt(b"cba", &ctx, &cancel).await.unwrap();

        assert_eq!(cached.inner.decrypts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_capacity_evicts() {
        let cached = CachedFieldEncryptor::new(CountingEncryptor::default(), 2);
        let cancel = CancellationToken::new();
        let ctx = context(None);

        for ciphertext in [b"a1", b"b2", b"c3"] {
            cached.decrypt(ciphertext, &ctx, &cancel).await.unwrap();
        }

        assert_eq!(cached.stats().entries, 2);
    }

    #[tokio::test]
    async fn test_context_id_partitions_cache() {
        let cached = CachedFieldEncryptor::new(CountingEncryptor::default(), 16);
        let cancel = CancellationToken::new();

        let a = context(None).with_context_id(Some("a".into()));
        let b = context(None).with_context_id(Some("b".into()));
        cached.decrypt(b"xy", &a, &cancel).await.unwrap();
        cached.decrypt(b"xy", &b, &cancel).await.unwrap();

        assert_eq!(cached.inner.decrypts.load(Ordering::SeqCst), 2);
    }
}
