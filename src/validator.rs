//! The stateless rules deciding whether a block may extend a given chain.
//! Every block admitted to the store passes through here first.

use log::{debug, warn};
use thiserror::Error;

use crate::block::{meets_difficulty, Block};
use crate::crypto::Address;
use crate::store::{amount_owned_in, Store};

/// The most coins a single creation transaction may mint, commission
/// included. Doubles as the block subsidy miners pay themselves.
pub const CREATION_CAP: f64 = 50.0;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("block carries no proof of work")]
    MissingNonce,
    #[error("block digest does not match its contents")]
    DigestMismatch,
    #[error("block digest does not meet difficulty {0}")]
    InsufficientWork(usize),
    #[error("block does not extend the current chain tip")]
    BadPrevious,
    #[error("transaction from {0} carries an invalid signature")]
    UnauthenticatedTransaction(Address),
    #[error("transaction public key does not belong to {0}")]
    KeyAddressMismatch(Address),
    #[error("wallet {sender} spends {spent} but owns {owned}")]
    Overdraw {
        sender: Address,
        spent: f64,
        owned: f64,
    },
    #[error("transaction sender {0} is among its receivers")]
    SelfSend(Address),
    #[error("more than one creation transaction in a block")]
    ExcessCreation,
    #[error("creation transaction mints {0}, above the block subsidy cap")]
    CreationOverflow(f64),
}

/// The number of leading zero bytes a block digest must show at the given
/// chain height.
pub fn network_difficulty(height: usize) -> usize {
    52 - 50 / (1 + height / 100_000)
}

/// Decides whether `block` may be appended to `chain`. Checks the tip
/// linkage, the proof of work, and every transaction: authenticity, the
/// sender actually owning what it spends, no self-sends, and at most one
/// capped creation transaction.
pub fn validate(chain: &[Block], block: &Block, difficulty: usize) -> Result<(), ValidationError> {
    match (chain.last(), &block.previous) {
        (None, None) => {}
        (Some(tip), Some(previous)) if tip.digest.as_ref() == Some(previous) => {}
        _ => return Err(ValidationError::BadPrevious),
    }

    if block.nonce.is_none() {
        return Err(ValidationError::MissingNonce);
    }
    let recomputed = block
        .recompute_digest()
        .ok_or(ValidationError::MissingNonce)?;
    if block.digest != Some(recomputed) {
        return Err(ValidationError::DigestMismatch);
    }
    if !meets_difficulty(&recomputed, difficulty) {
        return Err(ValidationError::InsufficientWork(difficulty));
    }

    let mut seen_creation = false;
    for tx in &block.transactions {
        match tx.from_wallet() {
            None => {
                if seen_creation {
                    return Err(ValidationError::ExcessCreation);
                }
                seen_creation = true;
                if tx.amount_spent() > CREATION_CAP {
                    return Err(ValidationError::CreationOverflow(tx.amount_spent()));
                }
            }
            Some(sender) => {
                if !tx.verify() {
                    return Err(ValidationError::UnauthenticatedTransaction(sender.clone()));
                }
                // verify() passing implies the key is present and well formed.
                let public_key = tx.public_key.as_ref().expect("verified transactions carry a key");
                if &Address::from_raw_public_key(public_key) != sender {
                    return Err(ValidationError::KeyAddressMismatch(sender.clone()));
                }
                if tx
                    .to_wallets()
                    .iter()
                    .any(|(receiver, _)| receiver.as_ref() == Some(sender))
                {
                    return Err(ValidationError::SelfSend(sender.clone()));
                }
                let owned = amount_owned_in(chain, sender);
                if tx.amount_spent() > owned {
                    return Err(ValidationError::Overdraw {
                        sender: sender.clone(),
                        spent: tx.amount_spent(),
                        owned,
                    });
                }
            }
        }
    }

    Ok(())
}

/// Longest-chain catch-up: replaces the local chain with `candidate` when it
/// is strictly longer and validates from genesis. Used when pulling blocks
/// from peers; regular gossip still extends the tip one block at a time.
pub fn adopt_chain(store: &Store, candidate: Vec<Block>) -> bool {
    if candidate.len() <= store.height() {
        return false;
    }
    for (height, block) in candidate.iter().enumerate() {
        if let Err(err) = validate(&candidate[..height], block, network_difficulty(height)) {
            warn!("rejecting remote chain, block {height} is invalid: {err}");
            return false;
        }
    }
    if store.replace_blocks(candidate) {
        debug!("adopted a longer remote chain, height now {}", store.height());
        true
    } else {
        false
    }
}
