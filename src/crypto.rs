//! The definition of all cryptographic primitives used in QuantCoin.
//!
//! Keys live on the secp256k1 curve and messages are hashed with SHA-256
//! before signing. Raw byte conventions: a private key is the 32-byte
//! big-endian scalar, a public key is the 64-byte untagged curve point
//! (x || y) and a signature is the 64-byte r || s pair.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Number of random characters drawn when no wallet seed is supplied.
pub const SEED_LENGTH: usize = 50;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("malformed base64 encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("malformed private key")]
    MalformedPrivateKey,
    #[error("malformed public key")]
    MalformedPublicKey,
    #[error("malformed address: {0:?}")]
    MalformedAddress(String),
}

/// A wallet address: the literal prefix `QC` followed by the lowercase hex
/// SHA-1 of the raw public key bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self::from_raw_public_key(&public_key.to_bytes())
    }

    pub fn from_raw_public_key(raw: &[u8]) -> Self {
        Address(format!("QC{}", hex::encode(Sha1::digest(raw))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let hex_part = match value.strip_prefix("QC") {
            Some(hex_part) => hex_part,
            None => return Err(CryptoError::MalformedAddress(value)),
        };
        // SHA-1 digests are 20 bytes, so 40 hex characters.
        let well_formed = hex_part.len() == 40
            && hex_part.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
        if !well_formed {
            return Err(CryptoError::MalformedAddress(value));
        }
        Ok(Address(value))
    }
}

impl From<Address> for String {
    fn from(address: Address) -> String {
        address.0
    }
}

impl std::str::FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::try_from(s.to_owned())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, CryptoError> {
        let key = SigningKey::from_slice(raw).map_err(|_| CryptoError::MalformedPrivateKey)?;
        Ok(PrivateKey(key))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(&BASE64.decode(encoded)?)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_owned())
    }

    /// Signs an arbitrary message. The message is hashed with SHA-256 and the
    /// signature is deterministic per RFC 6979.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.0.sign(message);
        signature.to_bytes().to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, CryptoError> {
        if raw.len() != 64 {
            return Err(CryptoError::MalformedPublicKey);
        }
        // The raw form carries no SEC1 tag, restore the uncompressed marker.
        let mut sec1 = [0u8; 65];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(raw);
        let key =
            VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::MalformedPublicKey)?;
        Ok(PublicKey(key))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(&BASE64.decode(encoded)?)
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let point = self.0.to_encoded_point(false);
        let mut raw = [0u8; 64];
        raw.copy_from_slice(&point.as_bytes()[1..]);
        raw
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Checks a signature over a message. Returns `false` for any signature
    /// that does not verify, including structurally invalid ones.
    pub fn verify(&self, signature: &[u8], message: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.0.verify(message, &signature).is_ok()
    }
}

/// Generates a keypair. When no seed is given, one is drawn as 50 random
/// alphanumeric characters from the OS entropy source. The secret exponent is
/// derived from SHA-256 of the seed by incrementing the 32-byte value until it
/// lands below the curve order.
pub fn generate_keypair(seed: Option<&str>) -> (PrivateKey, PublicKey) {
    let seed = match seed {
        Some(seed) => seed.to_owned(),
        None => OsRng
            .sample_iter(&Alphanumeric)
            .take(SEED_LENGTH)
            .map(char::from)
            .collect(),
    };

    let mut candidate: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
    loop {
        if let Ok(key) = SigningKey::from_slice(&candidate) {
            let public = PublicKey(key.verifying_key().to_owned());
            return (PrivateKey(key), public);
        }
        for byte in candidate.iter_mut().rev() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
    }
}
