//! Import configuration
//!
//! Region, wrapping parameters and key material for an import. Settings come
//! from defaults, a JSON file, or `KMS_IMPORT_*` environment variables.
//!
//! # Environment Variables
//!
//! - `KMS_IMPORT_REGION` - service region (default `us-east-1`)
//! - `KMS_IMPORT_WRAPPING_ALGORITHM` - e.g. `RSAES_OAEP_SHA_256` (default `RSAES_OAEP_SHA_1`)
//! - `KMS_IMPORT_WRAPPING_KEY_SPEC` - `RSA_2048`, `RSA_3072` or `RSA_4096`
//! - `KMS_IMPORT_KEY_DESCRIPTION` - description for the created key
//! - `KMS_IMPORT_VALID_TO` - RFC 3339 expiry for the imported material
//! - `KMS_IMPORT_KEY_MATERIAL_B64` - base64 key material; random when unset

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kms::{ExpirationModel, WrappingKeySpec};
use crate::material::{KeyMaterial, MaterialError};
use crate::wrap::WrappingAlgorithm;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub region: String,
    pub wrapping_algorithm: WrappingAlgorithm,
    pub wrapping_key_spec: WrappingKeySpec,
    pub key_description: Option<String>,
    pub expiration: ExpirationModel,
    /// Base64 key material; the caller generates material when absent
    pub key_material_b64: Option<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            region: DEFAULT_REGION.to_string(),
            wrapping_algorithm: WrappingAlgorithm::default(),
            wrapping_key_spec: WrappingKeySpec::default(),
            key_description: None,
            expiration: ExpirationModel::default(),
            key_material_b64: None,
        }
    }
}

impl ImportConfig {
    /// Build a configuration from `KMS_IMPORT_*` variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from any variable source
    ///
    /// `from_env` delegates here; tests pass a map instead of touching the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ImportConfig::default();

        if let Some(region) = lookup("KMS_IMPORT_REGION") {
            config.region = region;
        }
        if let Some(algorithm) = lookup("KMS_IMPORT_WRAPPING_ALGORITHM") {
            config.wrapping_algorithm =
                algorithm.parse::<WrappingAlgorithm>().map_err(|reason| ConfigError::Env {
                    var: "KMS_IMPORT_WRAPPING_ALGORITHM",
                    reason,
                })?;
        }
        if let Some(spec) = lookup("KMS_IMPORT_WRAPPING_KEY_SPEC") {
            config.wrapping_key_spec = spec.parse::<WrappingKeySpec>().map_err(|reason| ConfigError::Env {
                var: "KMS_IMPORT_WRAPPING_KEY_SPEC",
                reason,
            })?;
        }
        if let Some(description) = lookup("KMS_IMPORT_KEY_DESCRIPTION") {
            config.key_description = Some(description);
        }
        if let Some(valid_to) = lookup("KMS_IMPORT_VALID_TO") {
            let valid_to = DateTime::parse_from_rfc3339(valid_to.trim()).map_err(|e| {
                ConfigError::Env {
                    var: "KMS_IMPORT_VALID_TO",
                    reason: e.to_string(),
                }
            })?;
            config.expiration = ExpirationModel::KeyMaterialExpires {
                valid_to: valid_to.with_timezone(&Utc),
            };
        }
        if let Some(material) = lookup("KMS_IMPORT_KEY_MATERIAL_B64") {
            config.key_material_b64 = Some(material);
        }

        Ok(config)
    }

    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ImportConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Check settings that can be judged before contacting the service
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::Invalid("region must not be empty".to_string()));
        }
        if let ExpirationModel::KeyMaterialExpires { valid_to } = self.expiration {
            if valid_to <= Utc::now() {
                return Err(ConfigError::Invalid(format!(
                    "key material expiry {} is in the past",
                    valid_to.to_rfc3339()
                )));
            }
        }
        Ok(())
    }

    /// Configured key material, or fresh random AES-256 material
    pub fn key_material(&self) -> Result<KeyMaterial, MaterialError> {
        match &self.key_material_b64 {
            Some(encoded) => KeyMaterial::from_base64(encoded),
            None => KeyMaterial::generate(KeyMaterial::SYMMETRIC_LEN),
        }
    }
}
