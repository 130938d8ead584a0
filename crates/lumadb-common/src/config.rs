//! Configuration management for the item mapper

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Main configuration structure for the mapper
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Tracing configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Key construction defaults
    #[serde(default)]
    pub keys: KeyConfig,

    /// Field encryption configuration
    #[serde(default)]
    pub encryption: EncryptionConfig,

    /// Blob offload configuration
    #[serde(default)]
    pub blob: BlobConfig,

    /// JSON blob serializer configuration
    #[serde(default)]
    pub serializer: SerializerConfig,
}

impl MapperConfig {
    /// Load configuration from a TOML/JSON file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config = if path.as_ref().extension().map_or(false, |ext| ext == "toml") {
            Self::from_toml_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Parse configuration from JSON text
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.keys.separator.is_empty() {
            return Err(Error::Config("keys.separator must not be empty".to_string()));
        }
        if self.encryption.cache_max_entries == 0 {
            return Err(Error::Config(
                "encryption.cache_max_entries must be positive".to_string(),
            ));
        }
        if let Some(default) = &self.encryption.default_context {
            if !self.encryption.keys.contains_key(default) {
                return Err(Error::Config(format!(
                    "encryption.default_context '{}' has no key",
                    default
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "lumadb_mapper=info,lumadb_security=info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Separator placed between a key prefix and the rendered value
    pub separator: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            separator: "#".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Context used when a call carries no ambient context identifier
    pub default_context: Option<String>,
    /// Base64 AES-256 keys by context identifier
    pub keys: HashMap<String, String>,
    /// Decryption cache lifetime when a property declares none
    pub cache_ttl_secs: u64,
    /// Maximum cached plaintexts
    pub cache_max_entries: usize,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            default_context: None,
            keys: HashMap::new(),
            cache_ttl_secs: 300,
            cache_max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Prefix of references handed out by the bundled blob store
    pub reference_prefix: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            reference_prefix: "blob".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Pretty-print JSON blobs
    pub pretty: bool,
}
