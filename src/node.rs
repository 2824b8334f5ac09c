//! The protocol endpoint: a TCP listener accepting one JSON command per
//! connection and mutating the store on valid input.

use std::io::{Read, Write};
use std::net::{IpAddr, TcpListener, TcpStream};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::error::Result;
use crate::store::Store;
use crate::transaction::Transaction;
use crate::validator::{self, network_difficulty};

/// Commands are read with a single receive of at most this many bytes.
pub const MAX_FRAME: usize = 10_000;

/// The commands peers exchange. Each arrives as one JSON object tagged by its
/// `cmd` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Announce a peer endpoint for the receiver to remember.
    Register { address: IpAddr, port: u16 },
    /// Ask for every peer the receiver knows.
    GetNodes,
    /// Ask for the blockchain, optionally only the `[start, end)` slice.
    GetBlocks {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<(usize, usize)>,
    },
    /// Announce a freshly mined block.
    NewBlock { block: Block },
    /// Announce a transaction for miners to pick up.
    Send { transaction: TransactionPayload },
}

/// The `send` command may carry its transaction either as a plain object or
/// as a JSON-encoded string; both shapes exist in the wild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionPayload {
    Object(Transaction),
    Encoded(String),
}

impl TransactionPayload {
    pub fn decode(self) -> Result<Transaction> {
        match self {
            TransactionPayload::Object(transaction) => Ok(transaction),
            TransactionPayload::Encoded(raw) => Ok(serde_json::from_str(&raw)?),
        }
    }
}

impl From<Transaction> for TransactionPayload {
    fn from(transaction: Transaction) -> Self {
        TransactionPayload::Object(transaction)
    }
}

/// The seam between the endpoint and whatever sits on top of it. A plain
/// relay node keeps the defaults; a miner installs its own reactions.
pub trait Handler: Send + Sync {
    /// Called after an announced block has been validated and stored.
    fn on_block(&self, _block: &Block) {}
    /// Called for every announced transaction.
    fn on_send(&self, _transaction: Transaction) {}
}

/// The no-op handler of a non-mining node: announced transactions are
/// dropped on the floor.
pub struct NoopHandler;

impl Handler for NoopHandler {}

pub struct Node {
    store: Arc<Store>,
    handler: Arc<dyn Handler>,
}

impl Node {
    pub fn new(store: Arc<Store>, handler: Arc<dyn Handler>) -> Self {
        Self { store, handler }
    }

    /// Accepts connections forever, one handler thread per connection. A
    /// failed connection is logged and closed; the peer never sees an error
    /// payload.
    pub fn run(self: Arc<Self>, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => info!("node listening on {addr}"),
            Err(_) => info!("node listening"),
        }
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let node = Arc::clone(&self);
                    std::thread::spawn(move || {
                        let peer = stream.peer_addr().ok();
                        if let Err(err) = node.handle(stream) {
                            debug!("connection from {peer:?} failed: {err}");
                        }
                    });
                }
                Err(err) => warn!("accepting a connection failed: {err}"),
            }
        }
    }

    fn handle(&self, mut stream: TcpStream) -> Result<()> {
        let mut buf = vec![0u8; MAX_FRAME];
        let len = stream.read(&mut buf)?;
        let command: Command = serde_json::from_slice(&buf[..len])?;

        match command {
            Command::Register { address, port } => {
                debug!("peer registering ({address}:{port})");
                self.store.store_node((address, port));
            }
            Command::GetNodes => {
                debug!("peer list requested");
                stream.write_all(&serde_json::to_vec(&self.store.all_nodes())?)?;
            }
            Command::GetBlocks { range } => {
                debug!("blocks requested (range: {range:?})");
                let blocks = match range {
                    Some((start, end)) => self.store.block_range(start, end),
                    None => self.store.blocks(),
                };
                stream.write_all(&serde_json::to_vec(&blocks)?)?;
            }
            Command::NewBlock { block } => self.new_block(block)?,
            Command::Send { transaction } => self.handler.on_send(transaction.decode()?),
        }
        Ok(())
    }

    /// Validates an announced block against the current tip and appends it to
    /// the store. The handler only hears about blocks that actually extended
    /// the chain.
    pub fn new_block(&self, block: Block) -> Result<()> {
        let chain = self.store.blocks();
        validator::validate(&chain, &block, network_difficulty(chain.len()))?;
        if self.store.store_block(block.clone()) {
            debug!("block accepted, height now {}", chain.len() + 1);
            self.handler.on_block(&block);
        }
        Ok(())
    }
}
