//! Key management service client interface
//!
//! The import workflow only needs four service operations. They are
//! expressed as the [`KmsClient`] trait so the workflow runs unchanged
//! against a real SDK adapter or the in-process [`crate::InMemoryKms`].
//!
//! # Failure model
//!
//! Every operation returns [`ServiceError`], which separates two cases:
//!
//! - **ServiceRejected**: the request reached the service and was refused.
//!   Carries the HTTP status, the service error code and the request id.
//! - **TransportFailure**: the client could not complete the exchange at all
//!   (network, DNS, TLS, timeout).
//!
//! Neither case is retried here.

use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::material::{EncryptedMaterial, ImportToken, WrappingPublicKey};
use crate::wrap::WrappingAlgorithm;

/// Errors reported by a KMS client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Service rejected request (HTTP {status_code}, {error_code}, request id {request_id}): {message}")]
    ServiceRejected {
        status_code: u16,
        error_code: String,
        request_id: String,
        message: String,
    },

    #[error("Transport failure: {message}")]
    TransportFailure { message: String },
}

impl ServiceError {
    pub fn rejected(
        status_code: u16,
        error_code: impl Into<String>,
        request_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ServiceError::ServiceRejected {
            status_code,
            error_code: error_code.into(),
            request_id: request_id.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ServiceError::TransportFailure {
            message: message.into(),
        }
    }

    /// Returns true if repeating the call later could succeed
    ///
    /// Transport failures, throttling (429) and server-side errors (5xx) are
    /// retryable. Other rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportFailure { .. } => true,
            Self::ServiceRejected { status_code, .. } => {
                *status_code == 429 || (500..600).contains(status_code)
            }
        }
    }

    /// Service error code, if the service answered
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::ServiceRejected { error_code, .. } => Some(error_code),
            Self::TransportFailure { .. } => None,
        }
    }

    /// Request id, if the service answered
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::ServiceRejected { request_id, .. } => Some(request_id),
            Self::TransportFailure { .. } => None,
        }
    }
}

/// Where a key's material comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OriginType {
    #[serde(rename = "AWS_KMS")]
    AwsKms,
    /// Material is supplied by the customer through import
    #[serde(rename = "EXTERNAL")]
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyUsage {
    #[default]
    #[serde(rename = "ENCRYPT_DECRYPT")]
    EncryptDecrypt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyState {
    PendingImport,
    Enabled,
    Disabled,
    PendingDeletion,
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PendingImport => "PendingImport",
            Self::Enabled => "Enabled",
            Self::Disabled => "Disabled",
            Self::PendingDeletion => "PendingDeletion",
        };
        f.write_str(name)
    }
}

/// Size of the RSA wrapping key the service should issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WrappingKeySpec {
    #[default]
    #[serde(rename = "RSA_2048")]
    Rsa2048,
    #[serde(rename = "RSA_3072")]
    Rsa3072,
    #[serde(rename = "RSA_4096")]
    Rsa4096,
}

impl WrappingKeySpec {
    pub fn bits(&self) -> usize {
        match self {
            Self::Rsa2048 => 2048,
            Self::Rsa3072 => 3072,
            Self::Rsa4096 => 4096,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa2048 => "RSA_2048",
            Self::Rsa3072 => "RSA_3072",
            Self::Rsa4096 => "RSA_4096",
        }
    }
}

impl std::str::FromStr for WrappingKeySpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "RSA_2048" => Ok(Self::Rsa2048),
            "RSA_3072" => Ok(Self::Rsa3072),
            "RSA_4096" => Ok(Self::Rsa4096),
            _ => Err(format!(
                "Unknown wrapping key spec: {}. Use RSA_2048, RSA_3072 or RSA_4096.",
                s
            )),
        }
    }
}

/// Whether imported material expires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "model")]
pub enum ExpirationModel {
    #[default]
    #[serde(rename = "KEY_MATERIAL_DOES_NOT_EXPIRE")]
    KeyMaterialDoesNotExpire,
    #[serde(rename = "KEY_MATERIAL_EXPIRES")]
    KeyMaterialExpires { valid_to: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub key_id: String,
    pub origin: OriginType,
    pub key_state: KeyState,
    pub key_usage: KeyUsage,
    pub description: Option<String>,
    pub creation_date: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateKeyRequest {
    pub description: Option<String>,
    pub origin: OriginType,
    pub key_usage: KeyUsage,
}

impl CreateKeyRequest {
    /// Request for an empty key whose material will be imported
    pub fn external() -> Self {
        CreateKeyRequest {
            description: None,
            origin: OriginType::External,
            key_usage: KeyUsage::EncryptDecrypt,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetParametersForImportRequest {
    pub key_id: String,
    pub wrapping_algorithm: WrappingAlgorithm,
    pub wrapping_key_spec: WrappingKeySpec,
}

/// Wrapping key and import token for one key
#[derive(Debug, Clone)]
pub struct ImportParameters {
    pub key_id: String,
    pub public_key: WrappingPublicKey,
    pub import_token: ImportToken,
    pub parameters_valid_to: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ImportKeyMaterialRequest {
    pub key_id: String,
    pub import_token: ImportToken,
    pub encrypted_key_material: EncryptedMaterial,
    pub expiration: ExpirationModel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportKeyMaterialResponse {
    pub key_id: String,
}

/// Operations the import workflow needs from a key management service
pub trait KmsClient {
    /// Create a key record
    fn create_key(
        &self,
        request: CreateKeyRequest,
    ) -> impl Future<Output = Result<KeyMetadata, ServiceError>> + Send;

    /// Issue a wrapping public key and import token for an external key
    fn get_parameters_for_import(
        &self,
        request: GetParametersForImportRequest,
    ) -> impl Future<Output = Result<ImportParameters, ServiceError>> + Send;

    /// Submit wrapped key material together with its import token
    fn import_key_material(
        &self,
        request: ImportKeyMaterialRequest,
    ) -> impl Future<Output = Result<ImportKeyMaterialResponse, ServiceError>> + Send;

    fn describe_key(
        &self,
        key_id: &str,
    ) -> impl Future<Output = Result<KeyMetadata, ServiceError>> + Send;
}
