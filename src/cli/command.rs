//! The commands supported by the interactive shell.

use std::str::FromStr;

use crate::crypto::Address;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a wallet, optionally from a brainwallet seed.
    CreateWallet { seed: Option<String> },
    /// Show the wallets in the private store, keys included.
    Wallets,
    /// Show every peer known at the moment.
    Peers,
    /// Show the blockchain.
    Blocks,
    /// Pull peers or blocks from the network right now.
    Update(UpdateTarget),
    /// Announce a transference for miners to include in the chain.
    Send(SendCommand),
    /// Show the balance of an address.
    Owned { address: Address },
    /// Show every public wallet this node can vouch for.
    KnownWallets,
    Help,
    /// Save both stores and leave.
    Exit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        Ok(match line {
            "create_wallet" => Command::CreateWallet { seed: None },
            "wallets" => Command::Wallets,
            "peers" => Command::Peers,
            "blocks" => Command::Blocks,
            "known_wallets" => Command::KnownWallets,
            "help" => Command::Help,
            "exit" => Command::Exit,
            line if line.starts_with("create_wallet ") => Command::CreateWallet {
                seed: Some(line["create_wallet ".len()..].trim().to_owned()),
            },
            line if line.starts_with("update ") => Command::Update(line.parse()?),
            line if line.starts_with("send ") => Command::Send(line.parse()?),
            line if line.starts_with("owned ") => {
                let address = line["owned ".len()..]
                    .trim()
                    .parse::<Address>()
                    .map_err(|err| err.to_string())?;
                Command::Owned { address }
            }
            line => return Err(format!("invalid command: {line}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateTarget {
    Peers,
    Blocks,
}

impl FromStr for UpdateTarget {
    type Err = String;

    fn from_str(cmd: &str) -> Result<Self, Self::Err> {
        let mut parts = cmd.split_whitespace();
        assert_eq!(parts.next(), Some("update"));

        match parts.next() {
            Some("p") | Some("peers") => Ok(UpdateTarget::Peers),
            Some("b") | Some("blocks") => Ok(UpdateTarget::Blocks),
            other => Err(format!("update takes 'peers' or 'blocks', got {other:?}")),
        }
    }
}

/// `send <from> <commission> (<to> <amount>)+`
#[derive(Debug, Clone, PartialEq)]
pub struct SendCommand {
    pub from: Address,
    pub commission: f64,
    pub receivers: Vec<(Address, f64)>,
}

impl FromStr for SendCommand {
    type Err = String;

    fn from_str(cmd: &str) -> Result<Self, Self::Err> {
        let mut parts = cmd.split_whitespace();
        assert_eq!(parts.next(), Some("send"));

        let from = match parts.next() {
            Some(from) => from.parse::<Address>().map_err(|err| err.to_string())?,
            None => return Err("No sender address provided.".into()),
        };

        let commission = match parts.next() {
            Some(commission) => commission
                .parse::<f64>()
                .map_err(|_| "Could not parse the commission.".to_owned())?,
            None => return Err("No commission provided.".into()),
        };

        let rest: Vec<&str> = parts.collect();
        if rest.is_empty() || rest.len() % 2 != 0 {
            return Err("Receivers must come as <address> <amount> pairs.".into());
        }

        let mut receivers = Vec::with_capacity(rest.len() / 2);
        for pair in rest.chunks(2) {
            let address = pair[0].parse::<Address>().map_err(|err| err.to_string())?;
            let amount = pair[1]
                .parse::<f64>()
                .map_err(|_| "Could not parse an amount.".to_owned())?;
            receivers.push((address, amount));
        }

        Ok(SendCommand {
            from,
            commission,
            receivers,
        })
    }
}
