//! Common test utilities for kms-import integration tests

#![allow(dead_code)]

use std::sync::OnceLock;

use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

/// The demonstration payload
pub const SAMPLE_MATERIAL: [u8; 10] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 0];

/// DER encoding of the rsaEncryption OID 1.2.840.113549.1.1.1
const RSA_ENCRYPTION_OID: [u8; 11] = [
    0x06, 0x09, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01,
];

/// RSA key pair encoded the way a KMS hands out wrapping keys
pub struct TestKeyPair {
    pub public_der: Vec<u8>,
    pub public_pem: String,
    pub private_der: Vec<u8>,
}

impl TestKeyPair {
    pub fn generate(bits: usize) -> Self {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits).unwrap();
        let public_key = RsaPublicKey::from(&private_key);

        TestKeyPair {
            public_der: public_key.to_public_key_der().unwrap().as_bytes().to_vec(),
            public_pem: public_key.to_public_key_pem(LineEnding::LF).unwrap(),
            private_der: private_key.to_pkcs8_der().unwrap().as_bytes().to_vec(),
        }
    }

    /// The public key with its algorithm OID swapped for sha256WithRSAEncryption
    ///
    /// Still well-formed DER, but not an RSA encryption key.
    pub fn public_der_with_foreign_oid(&self) -> Vec<u8> {
        let mut der = self.public_der.clone();
        let pos = der
            .windows(RSA_ENCRYPTION_OID.len())
            .position(|w| w == &RSA_ENCRYPTION_OID[..])
            .unwrap();
        der[pos + RSA_ENCRYPTION_OID.len() - 1] = 0x0B;
        der
    }
}

/// Shared RSA-2048 key pair; generation is slow so tests reuse one
pub fn rsa_2048() -> &'static TestKeyPair {
    static KEYPAIR: OnceLock<TestKeyPair> = OnceLock::new();
    KEYPAIR.get_or_init(|| TestKeyPair::generate(2048))
}
