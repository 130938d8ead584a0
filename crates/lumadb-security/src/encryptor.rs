//! Field encryptor interface
//!
//! The codec hands plaintext bytes of an encrypted property to a
//! [`FieldEncryptor`] and wires the returned ciphertext as a binary value.
//! Implementations must honour the cancellation token by abandoning the
//! in-flight call and returning [`HookError::Cancelled`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lumadb_common::error::HookError;
use tokio_util::sync::CancellationToken;

/// Per-call context handed to the encryptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionContext {
    /// Ambient context identifier (tenant, key scope, ...)
    pub context_id: Option<String>,
    /// How long a decrypted value may be served from cache
    pub cache_ttl: Option<Duration>,
    /// Entity kind owning the property
    pub entity_kind: String,
    /// Property being encrypted
    pub property: String,
}

impl EncryptionContext {
    /// Create a context for one property of an entity kind
    pub fn new(entity_kind: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            context_id: None,
            cache_ttl: None,
            entity_kind: entity_kind.into(),
            property: property.into(),
        }
    }

    /// Attach the ambient context identifier
    #[must_use]
    pub fn with_context_id(mut self, context_id: Option<String>) -> Self {
        self.context_id = context_id;
        self
    }

    /// Attach the cache lifetime hint
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

/// Encrypts and decrypts individual property values.
#[async_trait]
pub trait FieldEncryptor: Send + Sync {
    /// Encrypt plaintext bytes.
    async fn encrypt(
        &self,
        plaintext: &[u8],
        context: &EncryptionContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, HookError>;

    /// Decrypt ciphertext bytes produced by [`FieldEncryptor::encrypt`].
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, HookError>;
}

#[async_trait]
impl<T: FieldEncryptor + ?Sized> FieldEncryptor for Arc<T> {
    async fn encrypt(
        &self,
        plaintext: &[u8],
        context: &EncryptionContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, HookError> {
        (**self).encrypt(plaintext, context, cancel).await
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, HookError> {
        (**self).decrypt(ciphertext, context, cancel).await
    }
}
