//! RSA key material wrapping
//!
//! Encrypts externally generated key material with the RSA wrapping key a KMS
//! issues for import. The wrapping key arrives as a DER-encoded X.509
//! SubjectPublicKeyInfo and is parsed on every call; nothing is cached.
//!
//! RSAES-OAEP with SHA-1 is the default because that is the wrapping
//! algorithm import requests declare unless told otherwise. SHA-256 OAEP and
//! the legacy PKCS#1 v1.5 scheme are available for services that ask for
//! them. Whatever is chosen here must be the algorithm named in the
//! get-parameters request, or the service will fail to unwrap.
//!
//! # Example
//!
//! ```no_run
//! use kms_import::wrap::{wrap, KeyMaterialWrapper, KeyWrap, WrappingAlgorithm};
//!
//! # fn example(public_key_der: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let material = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 0];
//!
//! // RSAES_OAEP_SHA_1
//! let ciphertext = wrap(&material, public_key_der)?;
//! assert_eq!(ciphertext.len(), 256);
//!
//! let wrapper = KeyMaterialWrapper::new(WrappingAlgorithm::RsaesOaepSha256);
//! let ciphertext = wrapper.wrap(&material, public_key_der)?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rsa::{
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    traits::PublicKeyParts,
    Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;

/// Wrapping errors
#[derive(Debug, Error)]
pub enum WrapError {
    /// The key bytes do not decode as an RSA key in the expected encoding
    #[error("Invalid key format: {0}")]
    KeyFormat(String),

    /// Plaintext too large for the key and scheme, or the primitive refused it
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),
}

/// Wrapping algorithm, named the way the import API names it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WrappingAlgorithm {
    /// RSAES-OAEP with SHA-1 and MGF1-SHA-1
    #[default]
    #[serde(rename = "RSAES_OAEP_SHA_1")]
    RsaesOaepSha1,

    /// RSAES-OAEP with SHA-256 and MGF1-SHA-256
    #[serde(rename = "RSAES_OAEP_SHA_256")]
    RsaesOaepSha256,

    /// RSAES-PKCS1-v1_5
    ///
    /// What a bare "RSA" cipher transform resolves to on most providers.
    /// Kept for services that still accept it; prefer OAEP.
    #[serde(rename = "RSAES_PKCS1_V1_5")]
    RsaesPkcs1V15,
}

impl WrappingAlgorithm {
    /// All supported algorithms
    pub const ALL: [WrappingAlgorithm; 3] = [
        WrappingAlgorithm::RsaesOaepSha1,
        WrappingAlgorithm::RsaesOaepSha256,
        WrappingAlgorithm::RsaesPkcs1V15,
    ];

    /// Service name of the algorithm
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RsaesOaepSha1 => "RSAES_OAEP_SHA_1",
            Self::RsaesOaepSha256 => "RSAES_OAEP_SHA_256",
            Self::RsaesPkcs1V15 => "RSAES_PKCS1_V1_5",
        }
    }

    /// Bytes of padding overhead for this scheme
    fn overhead(&self) -> usize {
        match self {
            // 2 * hLen + 2
            Self::RsaesOaepSha1 => 2 * 20 + 2,
            Self::RsaesOaepSha256 => 2 * 32 + 2,
            Self::RsaesPkcs1V15 => 11,
        }
    }

    /// Largest plaintext this scheme accepts for a modulus of `modulus_len` bytes
    ///
    /// For RSA-2048 that is 214 bytes (OAEP SHA-1), 190 bytes (OAEP SHA-256)
    /// or 245 bytes (PKCS#1 v1.5).
    pub fn max_plaintext_len(&self, modulus_len: usize) -> usize {
        modulus_len.saturating_sub(self.overhead())
    }
}

impl fmt::Display for WrappingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WrappingAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        WrappingAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "Unknown wrapping algorithm: {}. Use RSAES_OAEP_SHA_1, RSAES_OAEP_SHA_256 or RSAES_PKCS1_V1_5.",
                    s
                )
            })
    }
}

/// Trait for wrapping key material under an asymmetric wrapping key
pub trait KeyWrap {
    /// Wrap `plaintext` under the DER-encoded public key
    fn wrap(&self, plaintext: &[u8], public_key_der: &[u8]) -> Result<Vec<u8>, WrapError>;

    /// Recover plaintext with the DER-encoded private key
    fn unwrap(&self, ciphertext: &[u8], private_key_der: &[u8]) -> Result<Vec<u8>, WrapError>;
}

/// RSA key material wrapper
///
/// Stateless; one instance can be shared across threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyMaterialWrapper {
    /// Padding scheme used for every call
    pub algorithm: WrappingAlgorithm,
}

impl KeyMaterialWrapper {
    /// Create a wrapper for the given algorithm
    pub fn new(algorithm: WrappingAlgorithm) -> Self {
        KeyMaterialWrapper { algorithm }
    }

    /// Wrap with an already parsed public key
    pub fn wrap_with_key(
        &self,
        plaintext: &[u8],
        public_key: &RsaPublicKey,
    ) -> Result<Vec<u8>, WrapError> {
        let modulus_len = public_key.size();
        let max_len = self.algorithm.max_plaintext_len(modulus_len);
        if plaintext.len() > max_len {
            return Err(WrapError::Encryption(format!(
                "plaintext is {} bytes, {} allows at most {} bytes for a {}-bit key",
                plaintext.len(),
                self.algorithm,
                max_len,
                modulus_len * 8
            )));
        }

        let result = match self.algorithm {
            WrappingAlgorithm::RsaesOaepSha1 => {
                public_key.encrypt(&mut OsRng, Oaep::new::<Sha1>(), plaintext)
            }
            WrappingAlgorithm::RsaesOaepSha256 => {
                public_key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            }
            WrappingAlgorithm::RsaesPkcs1V15 => {
                public_key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
            }
        };

        result.map_err(|e| WrapError::Encryption(format!("{} encryption failed: {}", self.algorithm, e)))
    }

    /// Unwrap with an already parsed private key
    pub fn unwrap_with_key(
        &self,
        ciphertext: &[u8],
        private_key: &RsaPrivateKey,
    ) -> Result<Vec<u8>, WrapError> {
        let result = match self.algorithm {
            WrappingAlgorithm::RsaesOaepSha1 => private_key.decrypt(Oaep::new::<Sha1>(), ciphertext),
            WrappingAlgorithm::RsaesOaepSha256 => {
                private_key.decrypt(Oaep::new::<Sha256>(), ciphertext)
            }
            WrappingAlgorithm::RsaesPkcs1V15 => private_key.decrypt(Pkcs1v15Encrypt, ciphertext),
        };

        result.map_err(|e| WrapError::Decryption(format!("{} decryption failed: {}", self.algorithm, e)))
    }
}

impl KeyWrap for KeyMaterialWrapper {
    fn wrap(&self, plaintext: &[u8], public_key_der: &[u8]) -> Result<Vec<u8>, WrapError> {
        let public_key = parse_public_key(public_key_der)?;
        self.wrap_with_key(plaintext, &public_key)
    }

    fn unwrap(&self, ciphertext: &[u8], private_key_der: &[u8]) -> Result<Vec<u8>, WrapError> {
        let private_key = RsaPrivateKey::from_pkcs8_der(private_key_der).map_err(|e| {
            WrapError::KeyFormat(format!("Failed to parse RSA private key: {}", e))
        })?;
        self.unwrap_with_key(ciphertext, &private_key)
    }
}

/// Decode a DER-encoded X.509 SubjectPublicKeyInfo into an RSA public key
///
/// Rejects truncated or corrupted encodings and keys of any other algorithm.
pub fn parse_public_key(public_key_der: &[u8]) -> Result<RsaPublicKey, WrapError> {
    RsaPublicKey::from_public_key_der(public_key_der)
        .map_err(|e| WrapError::KeyFormat(format!("Failed to parse RSA public key: {}", e)))
}

/// Wrap key material with RSAES-OAEP SHA-1
///
/// Returns a ciphertext as long as the wrapping key's modulus, ready to be
/// submitted unmodified to the import call together with the import token.
pub fn wrap(plaintext: &[u8], public_key_der: &[u8]) -> Result<Vec<u8>, WrapError> {
    KeyMaterialWrapper::default().wrap(plaintext, public_key_der)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};

    fn generate_test_keypair(bits: usize) -> (Vec<u8>, Vec<u8>) {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits).unwrap();
        let public_key = RsaPublicKey::from(&private_key);

        let public_der = public_key.to_public_key_der().unwrap();
        let private_der = private_key.to_pkcs8_der().unwrap();

        (
            public_der.as_bytes().to_vec(),
            private_der.as_bytes().to_vec(),
        )
    }

    #[test]
    fn test_max_plaintext_len() {
        assert_eq!(WrappingAlgorithm::RsaesOaepSha1.max_plaintext_len(256), 214);
        assert_eq!(WrappingAlgorithm::RsaesOaepSha256.max_plaintext_len(256), 190);
        assert_eq!(WrappingAlgorithm::RsaesPkcs1V15.max_plaintext_len(256), 245);
        assert_eq!(WrappingAlgorithm::RsaesOaepSha256.max_plaintext_len(512), 446);
        assert_eq!(WrappingAlgorithm::RsaesOaepSha256.max_plaintext_len(10), 0);
    }

    #[test]
    fn test_algorithm_names() {
        for alg in WrappingAlgorithm::ALL {
            assert_eq!(alg.as_str().parse::<WrappingAlgorithm>().unwrap(), alg);
            let json = serde_json::to_string(&alg).unwrap();
            assert_eq!(json, format!("\"{}\"", alg.as_str()));
        }
        assert_eq!(
            "rsaes-oaep-sha-256".parse::<WrappingAlgorithm>().unwrap(),
            WrappingAlgorithm::RsaesOaepSha256
        );
        assert!("RSA".parse::<WrappingAlgorithm>().is_err());
    }

    #[test]
    fn test_wrap_roundtrip_all_algorithms() {
        let (public_der, private_der) = generate_test_keypair(2048);
        let material = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 0];

        for alg in WrappingAlgorithm::ALL {
            let wrapper = KeyMaterialWrapper::new(alg);
            let wrapped = wrapper.wrap(&material, &public_der).unwrap();
            assert_eq!(wrapped.len(), 256, "{}", alg);

            let unwrapped = wrapper.unwrap(&wrapped, &private_der).unwrap();
            assert_eq!(unwrapped, material, "{}", alg);
        }
    }

    #[test]
    fn test_wrap_output_tracks_modulus() {
        let (public_der, _) = generate_test_keypair(3072);
        let wrapped = wrap(&[0x42u8; 32], &public_der).unwrap();
        assert_eq!(wrapped.len(), 384);
    }

    #[test]
    fn test_wrap_invalid_key() {
        let material = [0x42u8; 32];

        assert!(matches!(wrap(&material, &[]), Err(WrapError::KeyFormat(_))));
        assert!(matches!(
            wrap(&material, b"not a key"),
            Err(WrapError::KeyFormat(_))
        ));

        let (public_der, _) = generate_test_keypair(2048);
        let truncated = &public_der[..public_der.len() / 2];
        assert!(matches!(
            wrap(&material, truncated),
            Err(WrapError::KeyFormat(_))
        ));
    }

    #[test]
    fn test_unwrap_with_mismatched_algorithm() {
        let (public_der, private_der) = generate_test_keypair(2048);
        let material = [0x24u8; 32];

        let wrapped = KeyMaterialWrapper::new(WrappingAlgorithm::RsaesOaepSha1)
            .wrap(&material, &public_der)
            .unwrap();

        let result = KeyMaterialWrapper::new(WrappingAlgorithm::RsaesOaepSha256)
            .unwrap(&wrapped, &private_der);
        assert!(matches!(result, Err(WrapError::Decryption(_))));
    }

    #[test]
    fn test_unwrap_rejects_public_key_bytes() {
        let (public_der, _) = generate_test_keypair(2048);
        let wrapped = wrap(b"material", &public_der).unwrap();

        let result = KeyMaterialWrapper::default().unwrap(&wrapped, &public_der);
        assert!(matches!(result, Err(WrapError::KeyFormat(_))));
    }
}
