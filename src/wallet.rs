use serde::{Deserialize, Serialize};

use crate::crypto::{self, Address, CryptoError, PrivateKey, PublicKey};

/// A private wallet: the key pair and the address derived from it. Private
/// wallets never leave the node that created them except through the
/// password-encrypted private store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// The address of this wallet.
    pub address: Address,
    /// The public key, base64 of the raw curve point.
    pub public_key: String,
    /// The private key, base64 of the raw scalar.
    pub private_key: String,
}

impl Wallet {
    /// Creates a wallet, optionally from a brainwallet seed.
    pub fn create(seed: Option<&str>) -> Self {
        let (private_key, public_key) = crypto::generate_keypair(seed);
        Self {
            address: Address::from_public_key(&public_key),
            public_key: public_key.to_base64(),
            private_key: private_key.to_base64(),
        }
    }

    pub fn signing_key(&self) -> Result<PrivateKey, CryptoError> {
        PrivateKey::from_base64(&self.private_key)
    }

    pub fn verifying_key(&self) -> Result<PublicKey, CryptoError> {
        PublicKey::from_base64(&self.public_key)
    }

    /// The shareable half of this wallet.
    pub fn public(&self) -> PublicWallet {
        PublicWallet {
            address: self.address.clone(),
            public_key: self.public_key.clone(),
        }
    }
}

/// The advertisable part of a wallet, enough for peers to check signatures of
/// transactions naming the address.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublicWallet {
    pub address: Address,
    pub public_key: String,
}
