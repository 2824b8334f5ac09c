//! The mining half of a node: a queue of announced transactions and a loop
//! racing to extend the chain, interruptible whenever a remote block lands.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};

use crate::block::Block;
use crate::error::Error;
use crate::network::Network;
use crate::node::Handler;
use crate::store::Store;
use crate::transaction::Transaction;
use crate::validator::{self, network_difficulty, ValidationError, CREATION_CAP};
use crate::wallet::Wallet;

/// Pause between gate retries while the queue is not worth mining yet.
const GATE_RETRY: Duration = Duration::from_secs(5);

/// Nonces searched between two checks for remote chain advances.
const NONCE_WINDOW: u64 = 100;

/// A mining node. Installed as the [`Handler`] of a [`crate::node::Node`] it
/// collects announced transactions, and `mine` turns them into blocks.
pub struct Miner {
    wallet: Wallet,
    store: Arc<Store>,
    network: Network,
    /// Transactions waiting for a block. The lock is held for membership
    /// changes only, never across mining windows or I/O.
    transaction_queue: Mutex<Vec<Transaction>>,
    // Tip trackers, updated by the handler thread and read by the mining
    // thread between nonce windows.
    last_block_index: AtomicUsize,
    network_difficulty: AtomicUsize,
    mining: AtomicBool,
}

impl Miner {
    pub fn new(wallet: Wallet, store: Arc<Store>) -> Arc<Self> {
        let height = store.height();
        let network = Network::new(Arc::clone(&store));
        Arc::new(Self {
            wallet,
            store,
            network,
            transaction_queue: Mutex::new(Vec::new()),
            last_block_index: AtomicUsize::new(height),
            network_difficulty: AtomicUsize::new(network_difficulty(height)),
            mining: AtomicBool::new(false),
        })
    }

    pub fn last_block_index(&self) -> usize {
        self.last_block_index.load(SeqCst)
    }

    pub fn network_difficulty(&self) -> usize {
        self.network_difficulty.load(SeqCst)
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(SeqCst)
    }

    /// Asks the mining loop to exit at the next window boundary.
    pub fn stop_mining(&self) {
        self.mining.store(false, SeqCst);
    }

    pub fn queued_transactions(&self) -> Vec<Transaction> {
        self.transaction_queue.lock().unwrap().clone()
    }

    fn retarget(&self) {
        let height = self.store.height();
        self.last_block_index.store(height, SeqCst);
        self.network_difficulty.store(network_difficulty(height), SeqCst);
    }

    /// The mining loop. Waits until the queue holds at least
    /// `min_transaction_count` transactions offering at least
    /// `min_commission` in total (a non-positive minimum disables that
    /// gate), then drains the queue into a candidate block and searches for
    /// its proof of work in bounded nonce windows. A remote block arriving
    /// mid-search abandons the candidate; its transactions that were not
    /// mined remotely return to the queue.
    pub fn mine(&self, min_transaction_count: usize, min_commission: f64) {
        self.mining.store(true, SeqCst);
        info!("starting miner");
        while self.is_mining() {
            self.retarget();

            let snapshot = {
                let mut queue = self.transaction_queue.lock().unwrap();
                if queue.len() < min_transaction_count {
                    debug!("not enough transactions: {} queued", queue.len());
                    drop(queue);
                    std::thread::sleep(GATE_RETRY);
                    continue;
                }
                if min_commission > 0.0 {
                    let commission: f64 = queue.iter().map(|tx| tx.commission()).sum();
                    if commission < min_commission {
                        debug!("target commission not reached: {commission} offered");
                        drop(queue);
                        std::thread::sleep(GATE_RETRY);
                        continue;
                    }
                }
                std::mem::take(&mut *queue)
            };

            // The subsidy leads the block; nothing else mints coins.
            let mut transactions = vec![Transaction::creation(vec![(
                Some(self.wallet.address.clone()),
                CREATION_CAP,
            )])];
            transactions.extend(snapshot.iter().cloned());

            let previous = self.store.last_block().and_then(|block| block.digest);
            let mut block = match Block::new(self.wallet.address.clone(), transactions, previous) {
                Ok(block) => block,
                Err(err) => {
                    warn!("candidate block could not be built: {err}");
                    continue;
                }
            };

            let base_index = self.last_block_index();
            let difficulty = self.network_difficulty();
            info!(
                "starting to mine a block with {} transactions at difficulty {difficulty}",
                block.transactions.len()
            );

            let mut start = 0;
            while base_index == self.last_block_index()
                && self.is_mining()
                && !block.proof_of_work(difficulty, start, start + NONCE_WINDOW)
            {
                start += NONCE_WINDOW + 1;
            }

            if block.nonce.is_some() {
                match self.accept_own_block(&block) {
                    Ok(()) => {
                        info!(
                            "block found with {} transactions at difficulty {difficulty}",
                            block.transactions.len()
                        );
                        self.network.new_block(&block);
                    }
                    Err(Error::Validation(ValidationError::BadPrevious)) => {
                        debug!("the tip advanced before our block landed");
                        self.requeue(snapshot, base_index);
                    }
                    Err(err) => {
                        // The candidate embedded a transaction the network
                        // would reject; it is dropped with its snapshot.
                        warn!("own block failed validation and was dropped: {err}");
                    }
                }
            } else {
                self.requeue(snapshot, base_index);
            }
        }
        info!("terminating miner");
    }

    /// Runs a found block through the same admission path a remote block
    /// takes, then reacts to it like one.
    fn accept_own_block(&self, block: &Block) -> crate::Result<()> {
        let chain = self.store.blocks();
        validator::validate(&chain, block, network_difficulty(chain.len()))?;
        self.store.store_block(block.clone());
        self.on_block(block);
        Ok(())
    }

    /// Returns an abandoned candidate's transactions to the queue, minus
    /// those that reached the chain through remote blocks in the meantime.
    fn requeue(&self, snapshot: Vec<Transaction>, base_index: usize) {
        let chain = self.store.blocks();
        let mined: Vec<&Transaction> = chain
            .get(base_index..)
            .unwrap_or(&[])
            .iter()
            .flat_map(|block| &block.transactions)
            .collect();

        let mut queue = self.transaction_queue.lock().unwrap();
        for tx in snapshot {
            if !mined.iter().any(|mined| **mined == tx) && !queue.contains(&tx) {
                queue.push(tx);
            }
        }
    }
}

impl Handler for Miner {
    /// The endpoint has validated and stored the block already; drop its
    /// transactions from the queue and retarget on the new tip. The index
    /// change also cancels any in-flight candidate at its next window
    /// boundary.
    fn on_block(&self, block: &Block) {
        {
            let mut queue = self.transaction_queue.lock().unwrap();
            queue.retain(|tx| !block.transactions.contains(tx));
        }
        self.retarget();
    }

    /// Queues announced transactions that carry a valid signature; the rest
    /// are dropped silently.
    fn on_send(&self, transaction: Transaction) {
        debug!("transaction received");
        if transaction.verify() {
            self.transaction_queue.lock().unwrap().push(transaction);
        } else {
            debug!("dropping transaction with an invalid signature");
        }
    }
}
