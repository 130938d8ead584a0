//! LumaDB Security Layer for the item mapper
//!
//! Provides:
//! - The field encryptor collaborator interface consumed by the codec
//! - AES-256-GCM field encryption keyed by context identifier
//! - A decryption cache honouring per-property cache lifetimes

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod crypto;
pub mod encryptor;

pub use cache::{CacheStats, CachedFieldEncryptor};
pub use crypto::AesGcmFieldEncryptor;
pub use encryptor::{EncryptionContext, FieldEncryptor};
