//! External key import workflow
//!
//! Drives the import of customer-supplied key material:
//!
//! 1. Create a key with external origin
//! 2. Fetch a wrapping public key and import token for it
//! 3. Wrap the material locally with the wrapping key
//! 4. Submit the wrapped material with the token
//! 5. Read back the key state
//!
//! The wrapping algorithm sent in step 2 is the one used in step 3, so the
//! service always unwraps with the padding the material was wrapped with.
//! Failures are returned to the caller as they happen; nothing is retried.
//!
//! # Example
//!
//! ```no_run
//! use kms_import::{ImportConfig, ImportWorkflow, InMemoryKms, KeyMaterial};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = InMemoryKms::new();
//! let config = ImportConfig::default();
//! let material = KeyMaterial::generate(32)?;
//!
//! let outcome = ImportWorkflow::new(&client, &config).run(&material).await?;
//! println!("imported into {}", outcome.key_id);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ImportConfig;
use crate::error::KmsImportError;
use crate::kms::{
    CreateKeyRequest, GetParametersForImportRequest, ImportKeyMaterialRequest, KeyState,
    KmsClient,
};
use crate::material::{EncryptedMaterial, KeyMaterial};
use crate::wrap::{KeyMaterialWrapper, KeyWrap, WrappingAlgorithm};

/// Result of a completed import
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub key_id: String,
    pub key_state: KeyState,
    pub wrapping_algorithm: WrappingAlgorithm,
    pub ciphertext_len: usize,
    pub parameters_valid_to: DateTime<Utc>,
}

/// Import workflow bound to one client and one configuration
pub struct ImportWorkflow<'a, C: KmsClient> {
    client: &'a C,
    config: &'a ImportConfig,
}

impl<'a, C: KmsClient> ImportWorkflow<'a, C> {
    pub fn new(client: &'a C, config: &'a ImportConfig) -> Self {
        ImportWorkflow { client, config }
    }

    /// Create a new external key and import `material` into it
    pub async fn run(&self, material: &KeyMaterial) -> Result<ImportOutcome, KmsImportError> {
        self.config.validate()?;

        let mut request = CreateKeyRequest::external();
        if let Some(description) = &self.config.key_description {
            request = request.with_description(description.clone());
        }

        let metadata = self.client.create_key(request).await?;
        info!(key_id = %metadata.key_id, region = %self.config.region, "Created external key");

        self.import_into(&metadata.key_id, material).await
    }

    /// Import `material` into an existing external key
    ///
    /// Useful when a key already exists, or to reimport the same material
    /// after it expired.
    pub async fn import_into(
        &self,
        key_id: &str,
        material: &KeyMaterial,
    ) -> Result<ImportOutcome, KmsImportError> {
        self.config.validate()?;
        let algorithm = self.config.wrapping_algorithm;

        let params = self
            .client
            .get_parameters_for_import(GetParametersForImportRequest {
                key_id: key_id.to_string(),
                wrapping_algorithm: algorithm,
                wrapping_key_spec: self.config.wrapping_key_spec,
            })
            .await?;
        debug!(
            key_id,
            public_key_len = params.public_key.as_der().len(),
            valid_to = %params.parameters_valid_to,
            "Received import parameters"
        );

        let ciphertext = KeyMaterialWrapper::new(algorithm)
            .wrap(material.as_slice(), params.public_key.as_der())?;
        let encrypted = EncryptedMaterial::new(ciphertext);
        let ciphertext_len = encrypted.len();
        debug!(
            key_id,
            %algorithm,
            material_len = material.len(),
            ciphertext_len,
            "Wrapped key material"
        );

        self.client
            .import_key_material(ImportKeyMaterialRequest {
                key_id: key_id.to_string(),
                import_token: params.import_token,
                encrypted_key_material: encrypted,
                expiration: self.config.expiration,
            })
            .await?;

        let metadata = self.client.describe_key(key_id).await?;
        info!(key_id, key_state = %metadata.key_state, "Key material import complete");

        Ok(ImportOutcome {
            key_id: metadata.key_id,
            key_state: metadata.key_state,
            wrapping_algorithm: algorithm,
            ciphertext_len,
            parameters_valid_to: params.parameters_valid_to,
        })
    }
}
