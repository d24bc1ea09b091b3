//! In-process key management service
//!
//! Implements [`KmsClient`] without a network. It behaves like the import
//! side of a real service: it issues genuine RSA wrapping keys, unwraps what
//! it receives with the algorithm it was asked for, and refuses requests
//! with the same error codes a real service uses. Tests and the CLI use it
//! to drive the workflow end to end.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use rsa::{pkcs8::EncodePublicKey, traits::PublicKeyParts, RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::kms::{
    CreateKeyRequest, ExpirationModel, GetParametersForImportRequest, ImportKeyMaterialRequest,
    ImportKeyMaterialResponse, ImportParameters, KeyMetadata, KeyState, KmsClient, OriginType,
    ServiceError,
};
use crate::material::{ImportToken, KeyMaterial, WrappingPublicKey};
use crate::wrap::{KeyMaterialWrapper, WrappingAlgorithm};

const IMPORT_TOKEN_LEN: usize = 64;

/// Wrapping key pair and token issued for one key
struct PendingImport {
    private_key: RsaPrivateKey,
    algorithm: WrappingAlgorithm,
    token: Vec<u8>,
    valid_to: chrono::DateTime<Utc>,
}

struct KeyRecord {
    metadata: KeyMetadata,
    pending: Option<PendingImport>,
    material: Option<KeyMaterial>,
}

impl KeyRecord {
    /// Drop material whose expiration time has passed
    fn expire_material(&mut self) {
        let expired = self
            .metadata
            .valid_to
            .is_some_and(|valid_to| valid_to <= Utc::now());
        if expired && self.material.is_some() {
            info!(key_id = %self.metadata.key_id, "Imported key material expired");
            self.material = None;
            self.metadata.valid_to = None;
            self.metadata.key_state = KeyState::PendingImport;
        }
    }
}

/// In-memory key management service
pub struct InMemoryKms {
    keys: Mutex<HashMap<String, KeyRecord>>,
    token_validity: Duration,
    transport_failure: Option<String>,
}

impl Default for InMemoryKms {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKms {
    /// Create an empty service whose import tokens stay valid for 24 hours
    pub fn new() -> Self {
        InMemoryKms {
            keys: Mutex::new(HashMap::new()),
            token_validity: Duration::hours(24),
            transport_failure: None,
        }
    }

    /// Override how long issued import tokens stay valid
    pub fn with_token_validity(mut self, validity: Duration) -> Self {
        self.token_validity = validity;
        self
    }

    /// Make every call fail as if the service could not be reached
    pub fn with_transport_failure(mut self, message: impl Into<String>) -> Self {
        self.transport_failure = Some(message.into());
        self
    }

    /// Key material stored for `key_id`, if an import succeeded
    pub fn imported_material(&self, key_id: &str) -> Option<KeyMaterial> {
        let mut keys = self.keys.lock().ok()?;
        let record = keys.get_mut(key_id)?;
        record.expire_material();
        record.material.clone()
    }

    pub fn key_count(&self) -> usize {
        self.keys.lock().map(|keys| keys.len()).unwrap_or(0)
    }

    fn check_transport(&self) -> Result<(), ServiceError> {
        match &self.transport_failure {
            Some(message) => Err(ServiceError::transport(message.clone())),
            None => Ok(()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, KeyRecord>>, ServiceError> {
        self.keys
            .lock()
            .map_err(|_| internal_error("key store lock poisoned"))
    }
}

fn request_id() -> String {
    Uuid::new_v4().to_string()
}

fn reject(status_code: u16, error_code: &str, message: impl Into<String>) -> ServiceError {
    let err = ServiceError::rejected(status_code, error_code, request_id(), message);
    warn!(error = %err, "Rejecting request");
    err
}

fn internal_error(message: impl Into<String>) -> ServiceError {
    reject(500, "KMSInternalException", message)
}

fn not_found(key_id: &str) -> ServiceError {
    reject(400, "NotFoundException", format!("Key '{}' does not exist", key_id))
}

fn generate_wrapping_key(bits: usize) -> Result<(RsaPrivateKey, WrappingPublicKey), ServiceError> {
    let private_key = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| internal_error(format!("RSA key generation failed: {}", e)))?;
    let public_der = RsaPublicKey::from(&private_key)
        .to_public_key_der()
        .map_err(|e| internal_error(format!("Public key encoding failed: {}", e)))?;

    Ok((private_key, WrappingPublicKey::from_der(public_der.as_bytes())))
}

impl KmsClient for InMemoryKms {
    async fn create_key(&self, request: CreateKeyRequest) -> Result<KeyMetadata, ServiceError> {
        self.check_transport()?;

        let key_state = match request.origin {
            OriginType::External => KeyState::PendingImport,
            OriginType::AwsKms => KeyState::Enabled,
        };
        let metadata = KeyMetadata {
            key_id: Uuid::new_v4().to_string(),
            origin: request.origin,
            key_state,
            key_usage: request.key_usage,
            description: request.description,
            creation_date: Utc::now(),
            valid_to: None,
        };

        let material = match request.origin {
            OriginType::AwsKms => Some(
                KeyMaterial::generate(KeyMaterial::SYMMETRIC_LEN)
                    .map_err(|e| internal_error(e.to_string()))?,
            ),
            OriginType::External => None,
        };

        self.lock()?.insert(
            metadata.key_id.clone(),
            KeyRecord {
                metadata: metadata.clone(),
                pending: None,
                material,
            },
        );

        debug!(key_id = %metadata.key_id, origin = ?metadata.origin, "Created key");
        Ok(metadata)
    }

    async fn get_parameters_for_import(
        &self,
        request: GetParametersForImportRequest,
    ) -> Result<ImportParameters, ServiceError> {
        self.check_transport()?;

        {
            let keys = self.lock()?;
            let record = keys
                .get(&request.key_id)
                .ok_or_else(|| not_found(&request.key_id))?;
            if record.metadata.origin != OriginType::External {
                return Err(reject(
                    400,
                    "UnsupportedOperationException",
                    format!("Key '{}' does not have an external origin", request.key_id),
                ));
            }
            if record.metadata.key_state == KeyState::PendingDeletion {
                return Err(reject(
                    400,
                    "KMSInvalidStateException",
                    format!("Key '{}' is pending deletion", request.key_id),
                ));
            }
        }

        // Key generation is slow; keep it outside the lock.
        let (private_key, public_key) = generate_wrapping_key(request.wrapping_key_spec.bits())?;

        let mut token = vec![0u8; IMPORT_TOKEN_LEN];
        OsRng.fill_bytes(&mut token);
        let valid_to = Utc::now() + self.token_validity;

        let mut keys = self.lock()?;
        let record = keys
            .get_mut(&request.key_id)
            .ok_or_else(|| not_found(&request.key_id))?;
        record.pending = Some(PendingImport {
            private_key,
            algorithm: request.wrapping_algorithm,
            token: token.clone(),
            valid_to,
        });

        debug!(
            key_id = %request.key_id,
            algorithm = %request.wrapping_algorithm,
            key_spec = request.wrapping_key_spec.as_str(),
            "Issued import parameters"
        );

        Ok(ImportParameters {
            key_id: request.key_id,
            public_key,
            import_token: ImportToken::new(token),
            parameters_valid_to: valid_to,
        })
    }

    async fn import_key_material(
        &self,
        request: ImportKeyMaterialRequest,
    ) -> Result<ImportKeyMaterialResponse, ServiceError> {
        self.check_transport()?;

        let now = Utc::now();
        let valid_to = match request.expiration {
            ExpirationModel::KeyMaterialDoesNotExpire => None,
            ExpirationModel::KeyMaterialExpires { valid_to } if valid_to <= now => {
                return Err(reject(
                    400,
                    "ValidationException",
                    "ValidTo must be in the future",
                ));
            }
            ExpirationModel::KeyMaterialExpires { valid_to } => Some(valid_to),
        };

        let mut keys = self.lock()?;
        let record = keys
            .get_mut(&request.key_id)
            .ok_or_else(|| not_found(&request.key_id))?;

        if record.metadata.origin != OriginType::External {
            return Err(reject(
                400,
                "UnsupportedOperationException",
                format!("Key '{}' does not have an external origin", request.key_id),
            ));
        }
        record.expire_material();

        let pending = record.pending.as_ref().ok_or_else(|| {
            reject(
                400,
                "InvalidImportTokenException",
                "No import parameters were issued for this key",
            )
        })?;
        if pending.token != request.import_token.as_slice() {
            return Err(reject(
                400,
                "InvalidImportTokenException",
                "Import token does not belong to this key",
            ));
        }
        if pending.valid_to <= now {
            return Err(reject(
                400,
                "ExpiredImportTokenException",
                "Import token has expired",
            ));
        }

        let ciphertext = request.encrypted_key_material.as_slice();
        if ciphertext.len() != pending.private_key.size() {
            return Err(reject(
                400,
                "InvalidCiphertextException",
                format!(
                    "Expected {} bytes of wrapped key material, got {}",
                    pending.private_key.size(),
                    ciphertext.len()
                ),
            ));
        }

        let plaintext = KeyMaterialWrapper::new(pending.algorithm)
            .unwrap_with_key(ciphertext, &pending.private_key)
            .map_err(|e| reject(400, "InvalidCiphertextException", e.to_string()))?;
        let material = KeyMaterial::new(plaintext)
            .map_err(|e| reject(400, "IncorrectKeyMaterialException", e.to_string()))?;

        if material.len() != KeyMaterial::SYMMETRIC_LEN {
            return Err(reject(
                400,
                "IncorrectKeyMaterialException",
                format!(
                    "Symmetric key material must be {} bytes, got {}",
                    KeyMaterial::SYMMETRIC_LEN,
                    material.len()
                ),
            ));
        }
        if let Some(existing) = &record.material {
            if existing.as_slice() != material.as_slice() {
                return Err(reject(
                    400,
                    "IncorrectKeyMaterialException",
                    "Key material differs from the material previously imported",
                ));
            }
        }

        record.material = Some(material);
        record.metadata.key_state = KeyState::Enabled;
        record.metadata.valid_to = valid_to;

        info!(key_id = %request.key_id, "Imported key material");
        Ok(ImportKeyMaterialResponse {
            key_id: request.key_id,
        })
    }

    async fn describe_key(&self, key_id: &str) -> Result<KeyMetadata, ServiceError> {
        self.check_transport()?;

        let mut keys = self.lock()?;
        let record = keys.get_mut(key_id).ok_or_else(|| not_found(key_id))?;
        record.expire_material();
        Ok(record.metadata.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::{KeyUsage, WrappingKeySpec};
    use crate::material::EncryptedMaterial;
    use crate::wrap::KeyWrap;

    async fn external_key(kms: &InMemoryKms) -> String {
        kms.create_key(CreateKeyRequest::external())
            .await
            .unwrap()
            .key_id
    }

    async fn parameters(kms: &InMemoryKms, key_id: &str) -> ImportParameters {
        kms.get_parameters_for_import(GetParametersForImportRequest {
            key_id: key_id.to_string(),
            wrapping_algorithm: WrappingAlgorithm::RsaesOaepSha1,
            wrapping_key_spec: WrappingKeySpec::Rsa2048,
        })
        .await
        .unwrap()
    }

    fn import_request(
        params: &ImportParameters,
        ciphertext: Vec<u8>,
    ) -> ImportKeyMaterialRequest {
        ImportKeyMaterialRequest {
            key_id: params.key_id.clone(),
            import_token: params.import_token.clone(),
            encrypted_key_material: EncryptedMaterial::new(ciphertext),
            expiration: ExpirationModel::KeyMaterialDoesNotExpire,
        }
    }

    fn error_code(err: &ServiceError) -> &str {
        err.error_code().unwrap_or("transport")
    }

    #[tokio::test]
    async fn test_create_key_states() {
        let kms = InMemoryKms::new();

        let external = kms.create_key(CreateKeyRequest::external()).await.unwrap();
        assert_eq!(external.key_state, KeyState::PendingImport);
        assert_eq!(external.key_usage, KeyUsage::EncryptDecrypt);

        let native = kms
            .create_key(CreateKeyRequest {
                description: Some("native".to_string()),
                origin: OriginType::AwsKms,
                key_usage: KeyUsage::EncryptDecrypt,
            })
            .await
            .unwrap();
        assert_eq!(native.key_state, KeyState::Enabled);
        assert_eq!(kms.key_count(), 2);
    }

    #[tokio::test]
    async fn test_import_accepts_wrapped_material() {
        let kms = InMemoryKms::new();
        let key_id = external_key(&kms).await;
        let params = parameters(&kms, &key_id).await;

        let material = [0x5Au8; 32];
        let ciphertext = KeyMaterialWrapper::default()
            .wrap(&material, params.public_key.as_der())
            .unwrap();
        kms.import_key_material(import_request(&params, ciphertext))
            .await
            .unwrap();

        let stored = kms.imported_material(&key_id).unwrap();
        assert_eq!(stored.as_slice(), &material);
        assert_eq!(
            kms.describe_key(&key_id).await.unwrap().key_state,
            KeyState::Enabled
        );
    }

    #[tokio::test]
    async fn test_import_rejects_padding_mismatch() {
        let kms = InMemoryKms::new();
        let key_id = external_key(&kms).await;
        let params = parameters(&kms, &key_id).await;

        let ciphertext = KeyMaterialWrapper::new(WrappingAlgorithm::RsaesPkcs1V15)
            .wrap(&[0x5Au8; 32], params.public_key.as_der())
            .unwrap();
        let err = kms
            .import_key_material(import_request(&params, ciphertext))
            .await
            .unwrap_err();

        assert_eq!(error_code(&err), "InvalidCiphertextException");
        assert!(kms.imported_material(&key_id).is_none());
    }

    #[tokio::test]
    async fn test_import_rejects_short_material() {
        let kms = InMemoryKms::new();
        let key_id = external_key(&kms).await;
        let params = parameters(&kms, &key_id).await;

        let ciphertext = KeyMaterialWrapper::default()
            .wrap(KeyMaterial::sample().as_slice(), params.public_key.as_der())
            .unwrap();
        let err = kms
            .import_key_material(import_request(&params, ciphertext))
            .await
            .unwrap_err();

        assert_eq!(error_code(&err), "IncorrectKeyMaterialException");
    }

    #[tokio::test]
    async fn test_import_rejects_foreign_token() {
        let kms = InMemoryKms::new();
        let key_a = external_key(&kms).await;
        let key_b = external_key(&kms).await;
        let params_a = parameters(&kms, &key_a).await;
        let params_b = parameters(&kms, &key_b).await;

        let ciphertext = KeyMaterialWrapper::default()
            .wrap(&[1u8; 32], params_a.public_key.as_der())
            .unwrap();
        let mut request = import_request(&params_a, ciphertext);
        request.import_token = params_b.import_token.clone();

        let err = kms.import_key_material(request).await.unwrap_err();
        assert_eq!(error_code(&err), "InvalidImportTokenException");
    }

    #[tokio::test]
    async fn test_import_rejects_expired_token() {
        let kms = InMemoryKms::new().with_token_validity(Duration::seconds(-1));
        let key_id = external_key(&kms).await;
        let params = parameters(&kms, &key_id).await;

        let ciphertext = KeyMaterialWrapper::default()
            .wrap(&[1u8; 32], params.public_key.as_der())
            .unwrap();
        let err = kms
            .import_key_material(import_request(&params, ciphertext))
            .await
            .unwrap_err();

        assert_eq!(error_code(&err), "ExpiredImportTokenException");
    }

    #[tokio::test]
    async fn test_import_rejects_different_material_on_reimport() {
        let kms = InMemoryKms::new();
        let key_id = external_key(&kms).await;
        let params = parameters(&kms, &key_id).await;
        let wrapper = KeyMaterialWrapper::default();

        let first = wrapper.wrap(&[1u8; 32], params.public_key.as_der()).unwrap();
        kms.import_key_material(import_request(&params, first))
            .await
            .unwrap();

        let same = wrapper.wrap(&[1u8; 32], params.public_key.as_der()).unwrap();
        kms.import_key_material(import_request(&params, same))
            .await
            .unwrap();

        let other = wrapper.wrap(&[2u8; 32], params.public_key.as_der()).unwrap();
        let err = kms
            .import_key_material(import_request(&params, other))
            .await
            .unwrap_err();
        assert_eq!(error_code(&err), "IncorrectKeyMaterialException");
    }

    #[tokio::test]
    async fn test_parameters_require_external_origin() {
        let kms = InMemoryKms::new();
        let native = kms
            .create_key(CreateKeyRequest {
                description: None,
                origin: OriginType::AwsKms,
                key_usage: KeyUsage::EncryptDecrypt,
            })
            .await
            .unwrap();

        let err = kms
            .get_parameters_for_import(GetParametersForImportRequest {
                key_id: native.key_id,
                wrapping_algorithm: WrappingAlgorithm::RsaesOaepSha256,
                wrapping_key_spec: WrappingKeySpec::Rsa2048,
            })
            .await
            .unwrap_err();
        assert_eq!(error_code(&err), "UnsupportedOperationException");
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let kms = InMemoryKms::new();
        let err = kms.describe_key("missing").await.unwrap_err();
        assert_eq!(error_code(&err), "NotFoundException");
        assert!(!err.is_retryable());

        let first = err.request_id().unwrap().to_string();
        let again = kms.describe_key("missing").await.unwrap_err();
        assert_ne!(again.request_id().unwrap(), first);
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let kms = InMemoryKms::new().with_transport_failure("connection refused");
        let err = kms
            .create_key(CreateKeyRequest::external())
            .await
            .unwrap_err();

        assert_eq!(err, ServiceError::transport("connection refused"));
        assert_eq!(kms.key_count(), 0);
    }
}
