//! The client half of the protocol: issuing commands to every known peer.
//!
//! Each top-level call runs on its own thread so callers never block on the
//! network. Peers are visited in a random permutation and a failing peer is
//! skipped, never aborting the fan-out. Responses stream back over a channel
//! the caller consumes at its own pace.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use log::debug;
use rand::seq::SliceRandom;
use serde::de::DeserializeOwned;

use crate::block::Block;
use crate::error::Result;
use crate::node::{Command, MAX_FRAME};
use crate::store::{Peer, Store};
use crate::transaction::Transaction;

pub struct Network {
    store: Arc<Store>,
}

impl Network {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Announces this node's endpoint to every peer.
    pub fn register(&self, address: std::net::IpAddr, port: u16) {
        debug!("sending register command ({address}:{port})");
        self.broadcast(Command::Register { address, port });
    }

    /// Announces a freshly mined block to every peer.
    pub fn new_block(&self, block: &Block) {
        debug!("announcing a new block");
        self.broadcast(Command::NewBlock {
            block: block.clone(),
        });
    }

    /// Hands a signed transaction to the network's miners.
    pub fn send(&self, transaction: &Transaction) {
        debug!("announcing a transaction");
        self.broadcast(Command::Send {
            transaction: transaction.clone().into(),
        });
    }

    /// Asks every peer for its peer list. Each response arrives as one
    /// element on the returned channel.
    pub fn get_nodes(&self) -> Receiver<Vec<Peer>> {
        debug!("asking for peers");
        self.request(Command::GetNodes)
    }

    /// Asks every peer for its full blockchain.
    pub fn get_blocks(&self) -> Receiver<Vec<Block>> {
        debug!("asking for all blocks");
        self.request(Command::GetBlocks { range: None })
    }

    /// Asks every peer for the `[start, end)` slice of its blockchain.
    pub fn get_range_blocks(&self, start: usize, end: usize) -> Receiver<Vec<Block>> {
        debug!("asking for a range of blocks (start={start}, end={end})");
        self.request(Command::GetBlocks {
            range: Some((start, end)),
        })
    }

    /// Fire-and-forget fan-out.
    fn broadcast(&self, command: Command) {
        self.fan_out::<()>(command, None);
    }

    /// Fan-out expecting one response per reachable peer.
    fn request<R: DeserializeOwned + Send + 'static>(&self, command: Command) -> Receiver<R> {
        let (sender, receiver) = mpsc::channel();
        self.fan_out(command, Some(sender));
        receiver
    }

    fn fan_out<R: DeserializeOwned + Send + 'static>(
        &self,
        command: Command,
        responses: Option<Sender<R>>,
    ) {
        let mut peers = self.store.all_nodes();
        std::thread::spawn(move || {
            peers.shuffle(&mut rand::thread_rng());
            for peer in peers {
                if let Err(err) = exchange(peer, &command, &responses) {
                    debug!("peer {}:{} skipped: {err}", peer.0, peer.1);
                }
            }
        });
    }
}

/// One request/response round with a single peer. Any failure is reported to
/// the caller for logging and the socket is closed on every path.
fn exchange<R: DeserializeOwned>(
    peer: Peer,
    command: &Command,
    responses: &Option<Sender<R>>,
) -> Result<()> {
    let mut stream = TcpStream::connect(peer)?;
    stream.write_all(&serde_json::to_vec(command)?)?;
    if let Some(responses) = responses {
        let mut buf = vec![0u8; MAX_FRAME];
        let len = stream.read(&mut buf)?;
        let response = serde_json::from_slice(&buf[..len])?;
        // The caller may have stopped listening already; that is fine.
        let _ = responses.send(response);
    }
    Ok(())
}
