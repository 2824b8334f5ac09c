use log::debug;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::crypto::{Address, CryptoError, PublicKey};
use crate::wallet::Wallet;

/// A single trade of coins. One sender, as many receivers as needed. The
/// optional leading receiver with no address is the commission offered to the
/// miner that includes the transaction in a block.
///
/// A transaction with no sender mints coins; only miners may produce one, and
/// block validation caps the amount it creates.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub body: TransactionBody,
    /// Proof that the sender authorized this transaction, absent until signed.
    #[serde_as(as = "Option<Base64>")]
    pub signature: Option<Vec<u8>>,
    /// The raw public key of the signer, absent until signed.
    #[serde_as(as = "Option<Base64>")]
    pub public_key: Option<Vec<u8>>,
}

/// The signed portion of a transaction. Field order matters: the canonical
/// payload is the JSON serialization of this struct.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionBody {
    pub from: Option<Address>,
    pub to: Vec<(Option<Address>, f64)>,
}

impl Transaction {
    pub fn new(from: Option<Address>, to: Vec<(Option<Address>, f64)>) -> Self {
        Self {
            body: TransactionBody { from, to },
            signature: None,
            public_key: None,
        }
    }

    /// A coin-minting transaction, the kind a miner leads its block with.
    pub fn creation(to: Vec<(Option<Address>, f64)>) -> Self {
        Self::new(None, to)
    }

    pub fn from_wallet(&self) -> Option<&Address> {
        self.body.from.as_ref()
    }

    pub fn to_wallets(&self) -> &[(Option<Address>, f64)] {
        &self.body.to
    }

    /// The commission offered to the miner, zero when none is attached.
    pub fn commission(&self) -> f64 {
        match self.body.to.first() {
            Some((None, amount)) => *amount,
            _ => 0.0,
        }
    }

    /// The total amount leaving the sender, commission included.
    pub fn amount_spent(&self) -> f64 {
        self.body.to.iter().map(|(_, amount)| amount).sum()
    }

    pub fn is_creation_transaction(&self) -> bool {
        self.body.from.is_none()
    }

    /// The exact bytes covered by the signature.
    pub fn canonical_payload(&self) -> Vec<u8> {
        serde_json::to_vec(&self.body).expect("transaction body serializes")
    }

    /// The deterministic serialization of the whole transaction, used as the
    /// merkle leaf preimage.
    pub fn canonical_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("transaction serializes")
    }

    /// Signs the transaction with the given wallet, attaching the signature
    /// and the signer's public key. The transaction is immutable afterwards.
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), CryptoError> {
        let private_key = wallet.signing_key()?;
        let public_key = wallet.verifying_key()?;
        self.signature = Some(private_key.sign(&self.canonical_payload()));
        self.public_key = Some(public_key.to_bytes().to_vec());
        Ok(())
    }

    /// Checks the proof of authenticity. A transaction with no public key, a
    /// malformed one, or a signature that does not cover the canonical
    /// payload is not authentic.
    pub fn verify(&self) -> bool {
        let (Some(public_key), Some(signature)) = (&self.public_key, &self.signature) else {
            return false;
        };
        let public_key = match PublicKey::from_bytes(public_key) {
            Ok(public_key) => public_key,
            Err(err) => {
                debug!("transaction carries an unusable public key: {err}");
                return false;
            }
        };
        public_key.verify(signature, &self.canonical_payload())
    }
}
