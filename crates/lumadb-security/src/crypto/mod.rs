//! AES-256-GCM field encryption

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use lumadb_common::config::EncryptionConfig;
use lumadb_common::error::{Error, HookError, Result};

use crate::encryptor::{EncryptionContext, FieldEncryptor};

const KEY_LEN: usize = 32;

/// Encrypts property values with AES-256-GCM.
///
/// Keys are selected by the context identifier carried in the
/// [`EncryptionContext`], falling back to the default context. The context
/// identifier is bound as associated data, so a value encrypted for one
/// context does not open under another. Output layout is
/// `nonce (12 bytes) || ciphertext || tag`.
pub struct AesGcmFieldEncryptor {
    keys: HashMap<String, [u8; KEY_LEN]>,
    default_context: Option<String>,
    rng: SystemRandom,
}

impl AesGcmFieldEncryptor {
    /// Create an encryptor with a single default key
    pub fn new(key: &[u8]) -> Result<Self> {
        Self::empty().with_context_key("default", key).map(|mut this| {
            this.default_context = Some("default".to_string());
            this
        })
    }

    fn empty() -> Self {
        Self {
            keys: HashMap::new(),
            default_context: None,
            rng: SystemRandom::new(),
        }
    }

    /// Register a key for a context identifier
    pub fn with_context_key(mut self, context_id: &str, key: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| {
            Error::Config(format!(
                "Encryption key for '{}' must be {} bytes, got {}",
                context_id,
                KEY_LEN,
                key.len()
            ))
        })?;
        self.keys.insert(context_id.to_string(), key);
        Ok(self)
    }

    /// Build from the `[encryption]` configuration section
    pub fn from_config(config: &EncryptionConfig) -> Result<Self> {
        let mut this = Self::empty();
        for (context_id, encoded) in &config.keys {
            let key = STANDARD.decode(encoded).map_err(|e| {
                Error::Config(format!("Invalid base64 key for '{}': {}", context_id, e))
            })?;
            this = this.with_context_key(context_id, &key)?;
        }
        this.default_context = config.default_context.clone();
        Ok(this)
    }

    fn resolve(&self, context: &EncryptionContext) -> std::result::Result<(&str, LessSafeKey), String> {
        let context_id = context
            .context_id
            .as_deref()
            .or(self.default_context.as_deref())
            .ok_or_else(|| "no encryption context and no default context".to_string())?;

        let (id, key) = self
            .keys
            .get_key_value(context_id)
            .ok_or_else(|| format!("no key for context '{}'", context_id))?;

        let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| "invalid key".to_string())?;
        Ok((id.as_str(), LessSafeKey::new(unbound)))
    }
}

#[async_trait]
impl FieldEncryptor for AesGcmFieldEncryptor {
    async fn encrypt(
        &self,
        plaintext: &[u8],
        context: &EncryptionContext,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<u8>, HookError> {
        if cancel.is_cancelled() {
            return Err(HookError::Cancelled);
        }

        let (context_id, key) = self.resolve(context).map_err(HookError::Encryption)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| HookError::Encryption("failed to generate nonce".to_string()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut ciphertext = plaintext.to_vec();
        key.seal_in_place_append_tag(nonce, Aad::from(context_id.as_bytes()), &mut ciphertext)
            .map_err(|_| HookError::Encryption("seal failed".to_string()))?;

        debug!(
            kind = %context.entity_kind,
            property = %context.property,
            context_id,
            "Encrypted field"
        );

        // Prepend nonce to ciphertext
        let mut result = nonce_bytes.to_vec();
        result.extend(ciphertext);
        Ok(result)
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<u8>, HookError> {
        if cancel.is_cancelled() {
            return Err(HookError::Cancelled);
        }

        if ciphertext.len() < NONCE_LEN {
            return Err(HookError::Decryption("ciphertext too short".to_string()));
        }

        let (context_id, key) = self.resolve(context).map_err(HookError::Decryption)?;

        let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| HookError::Decryption("invalid nonce".to_string()))?;

        let mut buffer = encrypted.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::from(context_id.as_bytes()), &mut buffer)
            .map_err(|_| {
                HookError::Decryption(format!(
                    "authentication failed for {}.{}",
                    context.entity_kind, context.property
                ))
            })?;

        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> EncryptionContext {
        EncryptionContext::new("Patient", "ssn")
    }

    #[tokio::test]
    async fn test_encrypt_decrypt() {
        let encryptor = AesGcmFieldEncryptor::new(&[7u8; 32]).unwrap();
        let cancel = CancellationToken::new();

        let sealed = encryptor.encrypt(b"123-45-6789", &context(), &cancel).await.unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"123-45-6789");

        let opened = encryptor.decrypt(&sealed, &context(), &cancel).await.unwrap();
        assert_eq!(opened, b"123-45-6789");
    }

    #[tokio::test]
    async fn test_nonce_differs_per_call() {
        let encryptor = AesGcmFieldEncryptor::new(&[7u8; 32]).unwrap();
        let cancel = CancellationToken::new();

        let a = encryptor.encrypt(b"same", &context(), &cancel).await.unwrap();
        let b = encryptor.encrypt(b"same", &context(), &cancel).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_context_keys_are_isolated() {
        let encryptor = AesGcmFieldEncryptor::empty()
            .with_context_key("tenant-a", &[1u8; 32])
            .unwrap()
            .with_context_key("tenant-b", &[2u8; 32])
            .unwrap();
        let cancel = CancellationToken::new();

        let ctx_a = context().with_context_id(Some("tenant-a".into()));
        let ctx_b = context().with_context_id(Some("tenant-b".into()));

        let sealed = encryptor.encrypt(b"secret", &ctx_a, &cancel).await.unwrap();
        let err = encryptor.decrypt(&sealed, &ctx_b, &cancel).await.unwrap_err();
        assert!(matches!(err, HookError::Decryption(_)));
    }

    #[tokio::test]
    async fn test_missing_context_key() {
        let encryptor = AesGcmFieldEncryptor::empty();
        let cancel = CancellationToken::new();
        let err = encryptor.encrypt(b"x", &context(), &cancel).await.unwrap_err();
        assert!(matches!(err, HookError::Encryption(_)));
    }

    #[tokio::test]
    async fn test_cancelled_token() {
        let encryptor = AesGcmFieldEncryptor::new(&[7u8; 32]).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = encryptor.encrypt(b"x", &context(), &cancel).await.unwrap_err();
        assert_eq!(err, HookError::Cancelled);
    }

    #[test]
    fn test_wrong_key_length() {
        assert!(AesGcmFieldEncryptor::new(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_from_config() {
        let mut config = EncryptionConfig::default();
        config.keys.insert("main".into(), STANDARD.encode([9u8; 32]));
        config.default_context = Some("main".into());

        let encryptor = AesGcmFieldEncryptor::from_config(&config).unwrap();
        assert_eq!(encryptor.default_context.as_deref(), Some("main"));

        config.keys.insert("bad".into(), "not base64!".into());
        assert!(AesGcmFieldEncryptor::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_truncated_ciphertext() {
        let encryptor = AesGcmFieldEncryptor::new(&[7u8; 32]).unwrap();
        let cancel = CancellationToken::new();
        let err = encryptor.decrypt(&[0u8; 4], &context(), &cancel).await.unwrap_err();
        assert!(matches!(err, HookError::Decryption(_)));
    }
}
