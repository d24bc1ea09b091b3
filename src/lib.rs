pub mod config;
pub mod error;
pub mod in_memory;
pub mod kms;
pub mod material;
pub mod workflow;
pub mod wrap;

pub use config::{ConfigError, ImportConfig};
pub use error::KmsImportError;
pub use in_memory::InMemoryKms;
pub use kms::{
    CreateKeyRequest, ExpirationModel, GetParametersForImportRequest, ImportKeyMaterialRequest,
    ImportKeyMaterialResponse, ImportParameters, KeyMetadata, KeyState, KeyUsage, KmsClient,
    OriginType, ServiceError, WrappingKeySpec,
};
pub use material::{EncryptedMaterial, ImportToken, KeyMaterial, MaterialError, WrappingPublicKey};
pub use workflow::{ImportOutcome, ImportWorkflow};
pub use wrap::{wrap, KeyMaterialWrapper, KeyWrap, WrapError, WrappingAlgorithm};
