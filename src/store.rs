//! The shared storage of a node. Peers and the blockchain form the public
//! store, shared by the whole network; wallets form the private store, sealed
//! with a password and never leaving this node.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::RwLock;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::debug;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::crypto::Address;
use crate::error::{Error, Result};
use crate::wallet::{PublicWallet, Wallet};

pub type Peer = (IpAddr, u16);

pub const DEFAULT_PORT: u16 = 65345;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const SALT_LEN: usize = 4;
const IV_LEN: usize = 16;

/// On-disk layout of the public store.
#[derive(Serialize, Deserialize)]
struct PublicStore {
    blocks: Vec<Block>,
    peers: Vec<Peer>,
}

/// Plaintext layout of the private store.
#[derive(Serialize, Deserialize)]
struct PrivateStore {
    wallets: Vec<Wallet>,
}

/// Custodian of everything a node knows. Each collection sits behind its own
/// lock; writes serialize, reads run concurrently, and chain scans hold a
/// single read guard so they observe a consistent snapshot.
pub struct Store {
    blocks: RwLock<Vec<Block>>,
    peers: RwLock<Vec<Peer>>,
    wallets: RwLock<Vec<Wallet>>,
    known_public_wallets: RwLock<BTreeMap<Address, String>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(Vec::new()),
            // A fresh node knows only the conventional local endpoint.
            peers: RwLock::new(vec![("127.0.0.1".parse().expect("valid ip"), DEFAULT_PORT)]),
            wallets: RwLock::new(Vec::new()),
            known_public_wallets: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.read().unwrap().clone()
    }

    /// A slice of the blockchain, clamped to the available range.
    pub fn block_range(&self, start: usize, end: usize) -> Vec<Block> {
        let blocks = self.blocks.read().unwrap();
        let start = start.min(blocks.len());
        let end = end.min(blocks.len()).max(start);
        blocks[start..end].to_vec()
    }

    pub fn last_block(&self) -> Option<Block> {
        self.blocks.read().unwrap().last().cloned()
    }

    pub fn height(&self) -> usize {
        self.blocks.read().unwrap().len()
    }

    /// Appends a block unless one with the same digest is already present.
    /// Returns whether the chain grew. Public keys carried by the block's
    /// transactions are recorded so later signatures can be checked against
    /// their claimed addresses.
    pub fn store_block(&self, block: Block) -> bool {
        {
            let mut blocks = self.blocks.write().unwrap();
            if blocks.iter().any(|known| known.digest == block.digest) {
                return false;
            }
            blocks.push(block.clone());
        }
        self.learn_public_wallets(std::slice::from_ref(&block));
        true
    }

    /// Swaps the whole chain for a strictly longer one. The caller is
    /// expected to have validated the replacement from genesis.
    pub fn replace_blocks(&self, chain: Vec<Block>) -> bool {
        {
            let mut blocks = self.blocks.write().unwrap();
            if chain.len() <= blocks.len() {
                return false;
            }
            *blocks = chain.clone();
        }
        self.learn_public_wallets(&chain);
        true
    }

    fn learn_public_wallets(&self, blocks: &[Block]) {
        let mut known = self.known_public_wallets.write().unwrap();
        for block in blocks {
            for tx in &block.transactions {
                if let (Some(from), Some(public_key)) = (&tx.body.from, &tx.public_key) {
                    known.insert(from.clone(), BASE64.encode(public_key));
                }
            }
        }
    }

    pub fn all_nodes(&self) -> Vec<Peer> {
        self.peers.read().unwrap().clone()
    }

    pub fn store_node(&self, peer: Peer) {
        let mut peers = self.peers.write().unwrap();
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }

    pub fn wallets(&self) -> Vec<Wallet> {
        self.wallets.read().unwrap().clone()
    }

    pub fn wallet(&self, address: &Address) -> Option<Wallet> {
        self.wallets
            .read()
            .unwrap()
            .iter()
            .find(|wallet| &wallet.address == address)
            .cloned()
    }

    pub fn store_wallet(&self, wallet: Wallet) {
        {
            let mut wallets = self.wallets.write().unwrap();
            if wallets.contains(&wallet) {
                return;
            }
            wallets.push(wallet.clone());
        }
        self.known_public_wallets
            .write()
            .unwrap()
            .insert(wallet.address, wallet.public_key);
    }

    /// Every `(address, public key)` pair this node can vouch for: its own
    /// wallets plus the keys observed in accepted transactions.
    pub fn public_wallets(&self) -> Vec<PublicWallet> {
        self.known_public_wallets
            .read()
            .unwrap()
            .iter()
            .map(|(address, public_key)| PublicWallet {
                address: address.clone(),
                public_key: public_key.clone(),
            })
            .collect()
    }

    pub fn public_key_of(&self, address: &Address) -> Option<String> {
        self.known_public_wallets.read().unwrap().get(address).cloned()
    }

    /// The balance of an address, computed by scanning the whole chain under
    /// one read guard. Quadratic in practice and called sparingly.
    pub fn amount_owned(&self, address: &Address) -> f64 {
        let blocks = self.blocks.read().unwrap();
        amount_owned_in(&blocks, address)
    }

    /// Loads the public store from a JSON file. Returns `false` when the file
    /// does not exist yet.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("public store {} does not exist", path.display());
            return Ok(false);
        }
        let raw = std::fs::read(path)?;
        let store: PublicStore = serde_json::from_slice(&raw)?;
        *self.blocks.write().unwrap() = store.blocks.clone();
        *self.peers.write().unwrap() = store.peers;
        self.learn_public_wallets(&store.blocks);
        Ok(true)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        debug!("saving public store");
        let store = PublicStore {
            blocks: self.blocks(),
            peers: self.all_nodes(),
        };
        std::fs::write(path, serde_json::to_vec(&store)?)?;
        Ok(())
    }

    /// Loads the wallets from the password-protected private store. Returns
    /// `false` when the file does not exist, `WrongPassword` when decryption
    /// does not yield the expected JSON.
    pub fn load_private(&self, path: impl AsRef<Path>, password: &str) -> Result<bool> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("private store {} does not exist", path.display());
            return Ok(false);
        }
        let raw = std::fs::read(path)?;
        if raw.len() < SALT_LEN + IV_LEN {
            return Err(Error::WrongPassword);
        }
        let (salt, rest) = raw.split_at(SALT_LEN);
        let (iv, ciphertext) = rest.split_at(IV_LEN);

        let key = derive_key(password, salt);
        let iv: [u8; IV_LEN] = iv.try_into().expect("split yields the iv length");
        let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::WrongPassword)?;

        let store: PrivateStore =
            serde_json::from_slice(&plaintext).map_err(|_| Error::WrongPassword)?;
        for wallet in store.wallets {
            self.store_wallet(wallet);
        }
        Ok(true)
    }

    /// Seals the wallets with AES-256-CBC. The key is derived from the
    /// password with scrypt over a fresh salt; salt and iv prefix the file.
    pub fn save_private(&self, path: impl AsRef<Path>, password: &str) -> Result<()> {
        debug!("saving private store");
        let store = PrivateStore {
            wallets: self.wallets(),
        };
        let plaintext = serde_json::to_vec(&store)?;

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let key = derive_key(password, &salt);
        let ciphertext =
            Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

        let mut raw = Vec::with_capacity(SALT_LEN + IV_LEN + ciphertext.len());
        raw.extend_from_slice(&salt);
        raw.extend_from_slice(&iv);
        raw.extend_from_slice(&ciphertext);
        std::fs::write(path, raw)?;
        Ok(())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

fn derive_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let params = scrypt::Params::new(14, 8, 1, 32).expect("scrypt parameters are valid");
    let mut key = [0u8; 32];
    scrypt::scrypt(password.as_bytes(), salt, &params, &mut key)
        .expect("32 bytes is a valid scrypt output length");
    key
}

/// The balance of `address` over the given chain prefix: commissions of the
/// blocks it authored, minus everything it spent, plus everything sent to it.
/// A transaction may name the same receiver several times and every entry
/// counts.
pub fn amount_owned_in(blocks: &[Block], address: &Address) -> f64 {
    let mut amount = 0.0;
    for block in blocks {
        if &block.author == address {
            amount += block.commission();
        }
        for tx in &block.transactions {
            if tx.body.from.as_ref() == Some(address) {
                amount -= tx.amount_spent();
            } else {
                for (receiver, value) in &tx.body.to {
                    if receiver.as_ref() == Some(address) {
                        amount += value;
                    }
                }
            }
        }
    }
    amount
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::test::mine;
    use crate::transaction::Transaction;
    use crate::transaction::test::signed_transfer;

    fn block_with(author: Address, transactions: Vec<Transaction>, previous: Option<[u8; 32]>) -> Block {
        let mut block = Block::new(author, transactions, previous).unwrap();
        mine(&mut block, 0);
        block
    }

    #[test]
    fn store_block_is_idempotent() {
        let store = Store::new();
        let author = Wallet::create(Some("author")).address;
        let creation = Transaction::creation(vec![(Some(author.clone()), 50.0)]);
        let block = block_with(author, vec![creation], None);

        assert!(store.store_block(block.clone()));
        assert!(!store.store_block(block));
        assert_eq!(store.height(), 1);
    }

    #[test]
    fn store_node_deduplicates() {
        let store = Store::new();
        let peer: Peer = ("10.0.0.1".parse().unwrap(), 4444);
        store.store_node(peer);
        store.store_node(peer);
        assert_eq!(store.all_nodes().iter().filter(|p| **p == peer).count(), 1);
    }

    #[test]
    fn block_range_is_clamped() {
        let store = Store::new();
        let author = Wallet::create(Some("author")).address;
        let creation = Transaction::creation(vec![(Some(author.clone()), 50.0)]);
        let block = block_with(author, vec![creation], None);
        store.store_block(block);

        assert_eq!(store.block_range(0, 1).len(), 1);
        assert_eq!(store.block_range(0, 10).len(), 1);
        assert_eq!(store.block_range(5, 10).len(), 0);
        assert_eq!(store.block_range(1, 0).len(), 0);
    }

    #[test]
    fn amount_owned_accounting() {
        let store = Store::new();
        let miner = Wallet::create(Some("miner")).address;
        let receiver = Wallet::create(Some("receiver")).address;

        // Mint 50 to the sender.
        let (sender_wallet, transfer) = signed_transfer("sender", receiver.clone(), 10.0);
        let sender = sender_wallet.address.clone();
        let creation = Transaction::creation(vec![(Some(sender.clone()), 50.0)]);
        let genesis = block_with(miner.clone(), vec![creation], None);

        // The sender pays 10 to the receiver plus a 1.0 commission.
        let mut spend = Transaction::new(
            Some(sender.clone()),
            vec![(None, 1.0), (Some(receiver.clone()), 10.0)],
        );
        spend.sign(&sender_wallet).unwrap();
        let second = block_with(miner.clone(), vec![spend], genesis.digest);

        store.store_block(genesis);
        store.store_block(second);

        assert_eq!(store.amount_owned(&sender), 50.0 - 11.0);
        assert_eq!(store.amount_owned(&receiver), 10.0);
        // The author of the second block collects its commission.
        assert_eq!(store.amount_owned(&miner), 1.0);
        assert_eq!(transfer.amount_spent(), 10.0);
    }

    #[test]
    fn replace_blocks_requires_longer_chain() {
        let store = Store::new();
        let author = Wallet::create(Some("author")).address;
        let creation = Transaction::creation(vec![(Some(author.clone()), 50.0)]);
        let block = block_with(author.clone(), vec![creation.clone()], None);
        store.store_block(block.clone());

        assert!(!store.replace_blocks(vec![block.clone()]));

        let successor = block_with(author, vec![creation], block.digest);
        assert!(store.replace_blocks(vec![block, successor]));
        assert_eq!(store.height(), 2);
    }

    #[test]
    fn public_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.qc");

        let store = Store::new();
        let author = Wallet::create(Some("author")).address;
        let creation = Transaction::creation(vec![(Some(author.clone()), 50.0)]);
        store.store_block(block_with(author, vec![creation], None));
        store.store_node(("10.1.2.3".parse().unwrap(), 1234));
        store.save(&path).unwrap();

        let restored = Store::new();
        assert!(restored.load(&path).unwrap());
        assert_eq!(restored.blocks(), store.blocks());
        assert_eq!(restored.all_nodes(), store.all_nodes());

        let empty = Store::new();
        assert!(!empty.load(dir.path().join("missing.qc")).unwrap());
    }

    #[test]
    fn private_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.qc-priv");

        let store = Store::new();
        store.store_wallet(Wallet::create(Some("first")));
        store.store_wallet(Wallet::create(Some("second")));
        store.save_private(&path, "hunter2").unwrap();

        let restored = Store::new();
        assert!(restored.load_private(&path, "hunter2").unwrap());
        assert_eq!(restored.wallets(), store.wallets());

        let rejected = Store::new();
        assert!(matches!(
            rejected.load_private(&path, "wrong password"),
            Err(Error::WrongPassword)
        ));
        assert!(rejected.wallets().is_empty());
    }

    #[test]
    fn public_wallets_are_learned_from_blocks() {
        let store = Store::new();
        let miner = Wallet::create(Some("miner")).address;
        let receiver = Wallet::create(Some("receiver")).address;

        let (sender_wallet, _) = signed_transfer("sender", receiver.clone(), 1.0);
        let creation = Transaction::creation(vec![(Some(sender_wallet.address.clone()), 50.0)]);
        let genesis = block_with(miner.clone(), vec![creation], None);
        let mut spend = Transaction::new(
            Some(sender_wallet.address.clone()),
            vec![(Some(receiver), 1.0)],
        );
        spend.sign(&sender_wallet).unwrap();
        let second = block_with(miner, vec![spend], genesis.digest);

        store.store_block(genesis);
        store.store_block(second);

        assert_eq!(
            store.public_key_of(&sender_wallet.address),
            Some(sender_wallet.public_key.clone())
        );
    }
}
