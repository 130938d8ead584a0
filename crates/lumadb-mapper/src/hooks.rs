//! Injected collaborators
//!
//! The codec never reaches the network itself. Blob offload, JSON
//! serialization and field encryption are delegated to the collaborators
//! bundled in [`MapperHooks`]; every async call is raced against the
//! caller's [`CancellationToken`] carried in [`CodecContext`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use lumadb_common::config::{BlobConfig, MapperConfig, SerializerConfig};
use lumadb_common::error::{HookError, MappingError};
use lumadb_common::Result;
use lumadb_security::{AesGcmFieldEncryptor, CachedFieldEncryptor, FieldEncryptor};

use crate::native::NativeType;

/// Out-of-band storage for large property values.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` and return the reference written to the item.
    async fn store(
        &self,
        bytes: Bytes,
        key_prefix: Option<&str>,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, HookError>;

    /// Fetch the bytes behind a reference.
    async fn retrieve(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<Bytes, HookError>;
}

/// Process-local blob store backed by a concurrent map.
pub struct InMemoryBlobStore {
    blobs: DashMap<String, Bytes>,
    reference_prefix: String,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::from_config(&BlobConfig::default())
    }

    pub fn from_config(config: &BlobConfig) -> Self {
        Self {
            blobs: DashMap::new(),
            reference_prefix: config.reference_prefix.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.blobs.contains_key(reference)
    }

    pub fn remove(&self, reference: &str) -> Option<Bytes> {
        self.blobs.remove(reference).map(|(_, bytes)| bytes)
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn store(
        &self,
        bytes: Bytes,
        key_prefix: Option<&str>,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, HookError> {
        if cancel.is_cancelled() {
            return Err(HookError::Cancelled);
        }
        let reference = match key_prefix {
            Some(prefix) => format!("{}/{}/{}", self.reference_prefix, prefix, Uuid::new_v4()),
            None => format!("{}/{}", self.reference_prefix, Uuid::new_v4()),
        };
        debug!(reference = %reference, size = bytes.len(), "Stored blob");
        self.blobs.insert(reference.clone(), bytes);
        Ok(reference)
    }

    async fn retrieve(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<Bytes, HookError> {
        if cancel.is_cancelled() {
            return Err(HookError::Cancelled);
        }
        self.blobs
            .get(reference)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HookError::BlobNotFound(reference.to_string()))
    }
}

/// Serializer for opaque JSON-blob values.
pub trait JsonSerializer: Send + Sync {
    fn serialize(&self, value: &JsonValue) -> std::result::Result<String, HookError>;

    /// Parse `text` for a property declared as `target`.
    fn deserialize(
        &self,
        text: &str,
        target: &NativeType,
    ) -> std::result::Result<JsonValue, HookError>;
}

/// [`JsonSerializer`] on top of serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeJsonSerializer {
    pretty: bool,
}

impl SerdeJsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    pub fn from_config(config: &SerializerConfig) -> Self {
        Self {
            pretty: config.pretty,
        }
    }
}

impl JsonSerializer for SerdeJsonSerializer {
    fn serialize(&self, value: &JsonValue) -> std::result::Result<String, HookError> {
        let text = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        text.map_err(|e| HookError::Serializer(e.to_string()))
    }

    fn deserialize(
        &self,
        text: &str,
        target: &NativeType,
    ) -> std::result::Result<JsonValue, HookError> {
        serde_json::from_str(text)
            .map_err(|e| HookError::Serializer(format!("{} (as {})", e, target)))
    }
}

/// Per-call context: cancellation and the ambient encryption context.
#[derive(Debug, Clone, Default)]
pub struct CodecContext {
    pub cancel: CancellationToken,
    pub encryption_context_id: Option<String>,
}

impl CodecContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_encryption_context(mut self, context_id: impl Into<String>) -> Self {
        self.encryption_context_id = Some(context_id.into());
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a collaborator call, abandoning it as soon as the token fires.
    pub(crate) async fn guard<T, F>(&self, call: F) -> std::result::Result<T, MappingError>
    where
        F: Future<Output = std::result::Result<T, HookError>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(MappingError::Cancelled),
            result = call => result.map_err(MappingError::from),
        }
    }
}

/// Collaborators injected at codec construction.
#[derive(Clone, Default)]
pub struct MapperHooks {
    pub blob_store: Option<Arc<dyn BlobStore>>,
    pub serializer: Option<Arc<dyn JsonSerializer>>,
    pub encryptor: Option<Arc<dyn FieldEncryptor>>,
}

impl MapperHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializer and, when keys are configured, a cached AES-GCM encryptor.
    pub fn from_config(config: &MapperConfig) -> Result<Self> {
        let mut hooks = Self::new().with_serializer(Arc::new(SerdeJsonSerializer::from_config(
            &config.serializer,
        )));
        if !config.encryption.keys.is_empty() {
            let encryptor = AesGcmFieldEncryptor::from_config(&config.encryption)?;
            hooks = hooks.with_encryptor(Arc::new(CachedFieldEncryptor::from_config(
                encryptor,
                &config.encryption,
            )));
        }
        Ok(hooks)
    }

    #[must_use]
    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn JsonSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    #[must_use]
    pub fn with_encryptor(mut self, encryptor: Arc<dyn FieldEncryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }
}

impl std::fmt::Debug for MapperHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperHooks")
            .field("blob_store", &self.blob_store.is_some())
            .field("serializer", &self.serializer.is_some())
            .field("encryptor", &self.encryptor.is_some())
            .finish()
    }
}
