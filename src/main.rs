use std::net::{IpAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use quantcoin::cli::command::{Command, SendCommand, UpdateTarget};
use quantcoin::miner::Miner;
use quantcoin::network::Network;
use quantcoin::node::{Handler, Node, NoopHandler};
use quantcoin::store::{Store, DEFAULT_PORT};
use quantcoin::transaction::Transaction;
use quantcoin::validator;
use quantcoin::wallet::Wallet;
use quantcoin::Error;

/// A full client of the QuantCoin network: protocol endpoint, interactive
/// shell and, optionally, a miner.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The address this client registers in the network. Should be reachable
    /// by the other peers.
    #[arg(long, default_value = "127.0.0.1")]
    ip: IpAddr,
    /// The port the protocol endpoint listens on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Path of the public store.
    #[arg(long, default_value = "default.qc")]
    storage: PathBuf,
    /// Path of the password-protected private store.
    #[arg(long, default_value = "default.qc-priv")]
    private_storage: PathBuf,
    /// Mine blocks out of announced transactions.
    #[arg(long)]
    mine: bool,
    /// Do not mine blocks holding fewer transactions than this.
    #[arg(long, default_value_t = 0)]
    min_transaction_count: usize,
    /// Do not start mining before the queued commissions reach this amount.
    #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
    min_commission: f64,
}

fn main() -> quantcoin::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let store = Arc::new(Store::new());
    store.load(&args.storage)?;

    let mut editor = DefaultEditor::new().expect("failed to start the line editor");
    let password = match editor.readline("Password for private store: ") {
        Ok(password) => password,
        Err(_) => return Ok(()),
    };
    match store.load_private(&args.private_storage, &password) {
        Ok(_) => {}
        Err(Error::WrongPassword) => {
            println!("Your password is probably wrong!");
            return Ok(());
        }
        Err(err) => return Err(err),
    }

    // This client is itself a peer of the network it joins.
    store.store_node((args.ip, args.port));

    let handler: Arc<dyn Handler> = if args.mine {
        let wallet = mining_wallet(&store);
        let miner = Miner::new(wallet, Arc::clone(&store));
        let mining = Arc::clone(&miner);
        let (count, commission) = (args.min_transaction_count, args.min_commission);
        std::thread::spawn(move || mining.mine(count, commission));
        miner
    } else {
        Arc::new(NoopHandler)
    };

    let listener = TcpListener::bind((args.ip, args.port))?;
    let node = Arc::new(Node::new(Arc::clone(&store), handler));
    {
        let node = Arc::clone(&node);
        std::thread::spawn(move || node.run(listener));
    }

    {
        let store = Arc::clone(&store);
        let (ip, port) = (args.ip, args.port);
        std::thread::spawn(move || update_job(store, ip, port));
    }

    println!("Welcome to the QuantCoin shell. Type 'help' to get started.");
    let network = Network::new(Arc::clone(&store));
    loop {
        match editor.readline("[QuantCoin Shell]$ ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                match line.parse::<Command>() {
                    Ok(Command::Exit) => break,
                    Ok(command) => run_command(command, &store, &network),
                    Err(err) => println!("Error: {err}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }

    println!("Bye!");
    store.save(&args.storage)?;
    store.save_private(&args.private_storage, &password)?;
    Ok(())
}

/// The wallet mined rewards go to: the first stored one, or a fresh wallet
/// when the private store is empty.
fn mining_wallet(store: &Store) -> Wallet {
    match store.wallets().into_iter().next() {
        Some(wallet) => wallet,
        None => {
            let wallet = Wallet::create(None);
            println!("Created mining wallet {}", wallet.address);
            store.store_wallet(wallet.clone());
            wallet
        }
    }
}

/// Keeps the public store in sync: registers this endpoint and pulls peers
/// and blocks from the network every ten seconds.
fn update_job(store: Arc<Store>, ip: IpAddr, port: u16) {
    let network = Network::new(Arc::clone(&store));
    loop {
        network.register(ip, port);
        for peers in network.get_nodes() {
            for peer in peers {
                store.store_node(peer);
            }
        }
        for chain in network.get_blocks() {
            validator::adopt_chain(&store, chain);
        }
        std::thread::sleep(Duration::from_secs(10));
    }
}

fn run_command(command: Command, store: &Arc<Store>, network: &Network) {
    match command {
        Command::CreateWallet { seed } => {
            let wallet = Wallet::create(seed.as_deref());
            store.store_wallet(wallet.clone());
            println!("{}", serde_json::to_string_pretty(&wallet).expect("wallets serialize"));
        }
        Command::Wallets => {
            for wallet in store.wallets() {
                println!("{}", serde_json::to_string(&wallet).expect("wallets serialize"));
            }
        }
        Command::Peers => {
            for (ip, port) in store.all_nodes() {
                println!("{ip}:{port}");
            }
        }
        Command::Blocks => {
            println!(
                "{}",
                serde_json::to_string_pretty(&store.blocks()).expect("blocks serialize")
            );
        }
        Command::Update(UpdateTarget::Peers) => {
            for peers in network.get_nodes() {
                for peer in peers {
                    store.store_node(peer);
                }
            }
        }
        Command::Update(UpdateTarget::Blocks) => {
            for chain in network.get_blocks() {
                validator::adopt_chain(store, chain);
            }
        }
        Command::Send(send) => run_send(send, store, network),
        Command::Owned { address } => println!("{}", store.amount_owned(&address)),
        Command::KnownWallets => {
            for wallet in store.public_wallets() {
                println!("{} {}", wallet.address, wallet.public_key);
            }
        }
        Command::Help => print_help(),
        Command::Exit => unreachable!("handled by the shell loop"),
    }
}

fn run_send(send: SendCommand, store: &Arc<Store>, network: &Network) {
    let mut to_wallets = vec![(None, send.commission)];
    to_wallets.extend(
        send.receivers
            .into_iter()
            .map(|(address, amount)| (Some(address), amount)),
    );
    let mut transaction = Transaction::new(Some(send.from.clone()), to_wallets);

    let owned = store.amount_owned(&send.from);
    if transaction.amount_spent() > owned {
        println!(
            "The wallet {} owns {owned}, not enough for this transference.",
            send.from
        );
        return;
    }

    let Some(wallet) = store.wallet(&send.from) else {
        println!("You do not own a wallet with the address {}.", send.from);
        return;
    };

    match transaction.sign(&wallet) {
        Ok(()) => network.send(&transaction),
        Err(err) => println!("Error: the transaction could not be signed: {err}"),
    }
}

fn print_help() {
    println!(
        "
        Welcome to the QuantCoin client. The commands available are:

        \tcreate_wallet <seed?>:
        \t\tCreates a new wallet and stores it in this client. The optional
        \t\tseed makes the wallet reproducible, useful for brainwallets.

        \twallets:
        \t\tShows every wallet in the private store. Keys included, so be
        \t\tcareful with your terminal history.

        \tpeers:
        \t\tShows every peer known at the moment.

        \tblocks:
        \t\tShows the blockchain.

        \tupdate <peers|blocks>:
        \t\tAsks the network for its peers or blocks right now. The same
        \t\tsync also runs in the background every ten seconds.

        \tsend <my_address> <commission> (<to_address> <amount>)+:
        \t\tAnnounces a transference so miners include it in the chain.
        \t\tThe commission tells miners what you offer for that work; the
        \t\t<to_address> <amount> pair can be repeated indefinitely.

        \towned <address>:
        \t\tShows the amount owned by a wallet.

        \tknown_wallets:
        \t\tShows every public wallet this node can vouch for.

        \texit:
        \t\tSaves both stores and terminates the client.
        "
    );
}
