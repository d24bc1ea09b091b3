//! Unified error type for the import API
//!
//! Each module keeps its own error enum. This type collects them for callers
//! that drive the whole import and only want one `Result`.

use thiserror::Error;

use crate::config::ConfigError;
use crate::kms::ServiceError;
use crate::material::MaterialError;
use crate::wrap::WrapError;

/// Error returned by [`crate::ImportWorkflow`]
///
/// # Error Categories
///
/// - **Wrap**: the wrapping key could not be parsed or the material could not be encrypted
/// - **Material**: key material was empty or badly encoded
/// - **Service**: the service refused a request or could not be reached
/// - **Config**: settings rejected before any request was made
#[derive(Debug, Error)]
pub enum KmsImportError {
    #[error("Wrap error: {0}")]
    Wrap(#[from] WrapError),

    #[error("Key material error: {0}")]
    Material(#[from] MaterialError),

    #[error("KMS error: {0}")]
    Service(#[from] ServiceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl KmsImportError {
    /// Returns true if the error is potentially retryable
    ///
    /// Only service errors can be; the local steps fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Service(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns a suggestion for resolving this error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Wrap(WrapError::KeyFormat(_)) => {
                Some("The wrapping key must be a DER-encoded X.509 SubjectPublicKeyInfo RSA key")
            }
            Self::Wrap(WrapError::Encryption(_)) => Some(
                "Key material is too long for the wrapping key; use a larger key spec or a scheme with less padding",
            ),
            Self::Service(ServiceError::TransportFailure { .. }) => {
                Some("Check network connectivity and the configured region")
            }
            Self::Service(e) => match e.error_code() {
                Some("ExpiredImportTokenException") => {
                    Some("Request new import parameters; the import token has expired")
                }
                Some("InvalidCiphertextException") => Some(
                    "Wrap the material with the same algorithm named in the get-parameters request",
                ),
                Some("IncorrectKeyMaterialException") => {
                    Some("Symmetric keys accept exactly 32 bytes of key material")
                }
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_crypto_error(&self) -> bool {
        matches!(self, Self::Wrap(_) | Self::Material(_))
    }

    pub fn is_service_error(&self) -> bool {
        matches!(self, Self::Service(_))
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
