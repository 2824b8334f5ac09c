use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use sha2::{Digest as _, Sha256};

use crate::crypto::Address;
use crate::error::{Error, Result};
use crate::transaction::Transaction;

pub type Digest = [u8; 32];

/// Digest preimage stand-in for the predecessor of the first block.
pub const GENESIS_SENTINEL: &[u8] = b"genesis_block";

/// A link of the blockchain: a set of transactions bound to its predecessor
/// by the previous digest and to its proof-of-work by the nonce. Nonce and
/// digest stay absent while the block is being mined; a block without them is
/// not transmittable and never validates.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The address of the miner that produced this block.
    pub author: Address,
    #[serde(with = "nonce_wire")]
    pub nonce: Option<u64>,
    #[serde_as(as = "Option<Base64>")]
    pub digest: Option<Digest>,
    /// Digest of the previous block, `None` only for the first block.
    #[serde_as(as = "Option<Base64>")]
    pub previous: Option<Digest>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(
        author: Address,
        transactions: Vec<Transaction>,
        previous: Option<Digest>,
    ) -> Result<Self> {
        if transactions.is_empty() {
            return Err(Error::Config("at least one transaction"));
        }
        Ok(Self {
            author,
            transactions,
            previous,
            nonce: None,
            digest: None,
        })
    }

    /// The transactions in canonical order: ascending by sender address, the
    /// creation transaction (no sender) first.
    pub fn sorted_transactions(&self) -> Vec<&Transaction> {
        let mut transactions: Vec<&Transaction> = self.transactions.iter().collect();
        transactions.sort_by(|a, b| a.body.from.cmp(&b.body.from));
        transactions
    }

    /// The root of the transaction hash tree. Leaves are SHA-256 of each
    /// transaction's canonical JSON in sender order; an odd leaf count is
    /// padded with an empty-byte sentinel; pairs are folded front-to-back
    /// until a single digest remains.
    pub fn merkle_root(&self) -> Digest {
        let mut queue: VecDeque<Vec<u8>> = self
            .sorted_transactions()
            .iter()
            .map(|tx| Sha256::digest(tx.canonical_json()).to_vec())
            .collect();

        if queue.len() % 2 == 1 {
            queue.push_back(Vec::new());
        }

        while queue.len() > 1 {
            let left = queue.pop_front().expect("queue holds at least two digests");
            let right = queue.pop_front().expect("queue holds at least two digests");
            let mut hasher = Sha256::new();
            hasher.update(&left);
            hasher.update(&right);
            queue.push_back(hasher.finalize().to_vec());
        }

        queue
            .pop_front()
            .expect("blocks hold at least one transaction")
            .try_into()
            .expect("SHA-256 digests are 32 bytes")
    }

    fn digest_for_nonce(&self, merkle_root: &Digest, nonce: u64) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(self.author.as_str().as_bytes());
        match &self.previous {
            Some(previous) => hasher.update(previous),
            None => hasher.update(GENESIS_SENTINEL),
        }
        hasher.update(merkle_root);
        hasher.update(nonce.to_string().as_bytes());
        hasher.finalize().into()
    }

    /// Searches the nonce window `[nonce_start, nonce_end)` for a digest with
    /// `difficulty` leading zero bytes. On success the nonce and digest are
    /// recorded and `true` is returned; otherwise the caller may resume with
    /// a later window. The bounded window is what lets a miner interleave
    /// work with checks for remote chain advances.
    pub fn proof_of_work(&mut self, difficulty: usize, nonce_start: u64, nonce_end: u64) -> bool {
        let merkle_root = self.merkle_root();
        for nonce in nonce_start..nonce_end {
            let digest = self.digest_for_nonce(&merkle_root, nonce);
            if meets_difficulty(&digest, difficulty) {
                self.nonce = Some(nonce);
                self.digest = Some(digest);
                return true;
            }
        }
        false
    }

    /// Re-derives the digest from the block contents, or `None` when the
    /// block has not been mined yet.
    pub fn recompute_digest(&self) -> Option<Digest> {
        let nonce = self.nonce?;
        Some(self.digest_for_nonce(&self.merkle_root(), nonce))
    }

    /// The commissions this block pays to its author.
    pub fn commission(&self) -> f64 {
        self.transactions.iter().map(|tx| tx.commission()).sum()
    }
}

pub fn meets_difficulty(digest: &Digest, difficulty: usize) -> bool {
    digest.iter().take(difficulty).all(|byte| *byte == 0)
}

/// Wire encoding of the nonce: base64 of the 8-byte big-endian integer.
mod nonce_wire {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(nonce: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        nonce
            .map(|nonce| BASE64.encode(nonce.to_be_bytes()))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(encoded) => {
                let raw = BASE64.decode(encoded).map_err(serde::de::Error::custom)?;
                let raw: [u8; 8] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("nonce must be 8 bytes"))?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::transaction::test::signed_transfer;
    use crate::wallet::Wallet;

    pub fn mine(block: &mut Block, difficulty: usize) {
        let mut start = 0;
        while !block.proof_of_work(difficulty, start, start + 100) {
            start += 101;
        }
    }

    #[test]
    fn merkle_root_of_single_transaction() {
        let author = Wallet::create(Some("author")).address;
        let receiver = Wallet::create(Some("receiver")).address;
        let (_, tx) = signed_transfer("sender", receiver, 1.0);

        let block = Block::new(author, vec![tx.clone()], None).unwrap();

        // One leaf plus the empty sentinel.
        let leaf = Sha256::digest(tx.canonical_json());
        let expected: Digest = Sha256::digest(leaf).into();
        assert_eq!(block.merkle_root(), expected);
    }

    #[test]
    fn merkle_root_ignores_construction_order() {
        let author = Wallet::create(Some("author")).address;
        let receiver = Wallet::create(Some("receiver")).address;
        let (_, tx1) = signed_transfer("sender one", receiver.clone(), 1.0);
        let (_, tx2) = signed_transfer("sender two", receiver, 2.0);

        let forward = Block::new(author.clone(), vec![tx1.clone(), tx2.clone()], None).unwrap();
        let reversed = Block::new(author, vec![tx2.clone(), tx1.clone()], None).unwrap();
        assert_eq!(forward.merkle_root(), reversed.merkle_root());

        // The pair is folded in ascending sender order.
        let mut sorted = [&tx1, &tx2];
        sorted.sort_by(|a, b| a.body.from.cmp(&b.body.from));
        let mut hasher = Sha256::new();
        hasher.update(Sha256::digest(sorted[0].canonical_json()));
        hasher.update(Sha256::digest(sorted[1].canonical_json()));
        let expected: Digest = hasher.finalize().into();
        assert_eq!(forward.merkle_root(), expected);
    }

    #[test]
    fn creation_transaction_sorts_first() {
        let author = Wallet::create(Some("author")).address;
        let receiver = Wallet::create(Some("receiver")).address;
        let creation = Transaction::creation(vec![(Some(receiver.clone()), 50.0)]);
        let (_, tx) = signed_transfer("sender", receiver, 1.0);

        let block = Block::new(author, vec![tx, creation.clone()], None).unwrap();
        assert_eq!(block.sorted_transactions()[0], &creation);
    }

    #[test]
    fn windowed_proof_of_work() {
        let author = Wallet::create(Some("author")).address;
        let receiver = Wallet::create(Some("receiver")).address;
        let (_, tx) = signed_transfer("sender", receiver, 1.0);
        let mut block = Block::new(author, vec![tx], None).unwrap();

        let mut start = 0;
        let mut found = block.proof_of_work(1, start, start + 100);
        while !found {
            assert_eq!(block.nonce, None);
            start += 101;
            found = block.proof_of_work(1, start, start + 100);
        }

        let digest = block.digest.unwrap();
        assert_eq!(digest[0], 0);
        assert_eq!(block.recompute_digest(), Some(digest));
    }

    #[test]
    fn digest_binds_contents() {
        let author = Wallet::create(Some("author")).address;
        let receiver = Wallet::create(Some("receiver")).address;
        let (_, tx) = signed_transfer("sender", receiver.clone(), 1.0);
        let mut block = Block::new(author, vec![tx], None).unwrap();
        mine(&mut block, 0);

        let mut tampered = block.clone();
        tampered.transactions[0].body.to[0].1 = 500.0;
        assert_ne!(tampered.recompute_digest(), tampered.digest);

        let mut renonced = block.clone();
        renonced.nonce = Some(block.nonce.unwrap() + 1);
        assert_ne!(renonced.recompute_digest(), renonced.digest);
    }

    #[test]
    fn empty_block_is_rejected() {
        let author = Wallet::create(Some("author")).address;
        assert!(Block::new(author, vec![], None).is_err());
    }

    #[test]
    fn wire_round_trip_preserves_digest() {
        let author = Wallet::create(Some("author")).address;
        let receiver = Wallet::create(Some("receiver")).address;
        let (_, tx) = signed_transfer("sender", receiver, 1.0);
        let mut block = Block::new(author, vec![tx], Some([7; 32])).unwrap();
        mine(&mut block, 0);

        let encoded = serde_json::to_string(&block).unwrap();
        let decoded: Block = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.recompute_digest(), decoded.digest);
    }

    #[test]
    fn wide_nonces_survive_the_wire() {
        let author = Wallet::create(Some("author")).address;
        let receiver = Wallet::create(Some("receiver")).address;
        let (_, tx) = signed_transfer("sender", receiver, 1.0);
        let mut block = Block::new(author, vec![tx], None).unwrap();
        block.nonce = Some(70_000);
        block.digest = Some(block.recompute_digest().unwrap());

        let encoded = serde_json::to_string(&block).unwrap();
        let decoded: Block = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.nonce, Some(70_000));
    }
}
