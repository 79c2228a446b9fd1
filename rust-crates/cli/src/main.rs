use alloy::primitives::{
    Address,
    B256,
    U256,
};
use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    DeploymentStore,
};
use lottery_client::{
    EvmChain,
    NetworkConfig,
    Session,
};
use std::path::Path;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

mod commands;
mod terminal;
mod wallets;

#[derive(Parser, Debug)]
#[command(
    name = "lottery",
    about = "Play the on-chain lottery: jackpot, tickets, draws, partner revenue and the token sale",
    version
)]
struct Args {
    /// Deployment to use
    #[arg(long, default_value = "local")]
    env: DeploymentEnv,

    /// Override the RPC URL (ws:// for live updates)
    #[arg(long)]
    rpc_url: Option<String>,

    /// Override the lottery contract address
    #[arg(long)]
    lottery: Option<Address>,

    /// Keystore file, or the name of a keystore in --wallet-dir
    #[arg(long)]
    wallet: Option<String>,

    /// Keystore directory (defaults to ~/.foundry/keystores)
    #[arg(long)]
    wallet_dir: Option<String>,

    /// Write daily-rolling logs to this directory instead of stderr
    #[arg(long)]
    log_dir: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Send transactions without asking for confirmation
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Current jackpot
    Jackpot {
        /// Keep printing the jackpot on every block
        #[arg(long)]
        watch: bool,
    },
    /// Winning odds for a ticket of K numbers
    Odds {
        #[arg(long, short = 'k')]
        numbers: usize,
    },
    /// Price of a ticket
    Price {
        #[arg(required = true, num_args = 1..)]
        numbers: Vec<u8>,
    },
    /// Buy a ticket
    Buy {
        #[arg(required = true, num_args = 1..)]
        numbers: Vec<u8>,
        /// Referral code, up to 32 bytes of hex
        #[arg(long)]
        referral: Option<String>,
    },
    /// Tickets of an account, newest first
    Tickets {
        /// Defaults to the wallet account
        #[arg(long)]
        account: Option<Address>,
    },
    /// Withdraw the prize of a winning ticket
    WithdrawPrize { id: u64 },
    /// Current round and the ones before it
    Draws {
        #[arg(long, default_value_t = 3)]
        count: u64,
    },
    /// Stage of the draw workflow
    Stage {
        /// Keep reporting stage changes
        #[arg(long)]
        watch: bool,
    },
    /// Request randomness for the current round
    Draw {
        #[arg(long)]
        subscription_id: Option<U256>,
        #[arg(long)]
        key_hash: Option<B256>,
        #[arg(long)]
        native_payment: bool,
    },
    /// Close the round once randomness has arrived
    CloseRound,
    /// Governance token balance and unclaimed revenue
    Partner {
        /// Defaults to the wallet account
        #[arg(long)]
        account: Option<Address>,
    },
    /// Withdraw unclaimed partner revenue
    WithdrawRevenue,
    /// Governance token sale: price, your balance and quotes
    Ico {
        /// Currency to spend
        #[arg(long, group = "amount")]
        dai: Option<String>,
        /// Tokens to buy
        #[arg(long, group = "amount")]
        exl: Option<String>,
        /// Percentage of the total token supply to buy
        #[arg(long, group = "amount")]
        share: Option<f64>,
        /// Buy the quoted amount, paying with a signed DAI permit
        #[arg(long, requires = "amount")]
        buy: bool,
        /// Defaults to the wallet account
        #[arg(long)]
        account: Option<Address>,
    },
    /// Withdraw the tokens bought in the sale once it has closed
    IcoRedeem,
}

fn init_tracing(log_dir: Option<&str>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let dir = shellexpand::tilde(dir).into_owned();
            let (writer, guard) =
                tracing_appender::non_blocking(rolling::daily(Path::new(&dir), "lottery.log"));
            let _ = fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            None
        }
    }
}

fn network_config(args: &Args) -> Result<NetworkConfig> {
    let store = DeploymentStore::new(args.env)
        .map_err(|e| eyre!("{e:#}"))
        .wrap_err("opening deployment store")?;
    let mut record = store
        .resolve(args.env, |name| std::env::var(name).ok())
        .map_err(|e| eyre!("{e:#}"))
        .wrap_err_with(|| format!("loading {} deployment", args.env))?;
    if let Some(rpc_url) = &args.rpc_url {
        record.rpc_url = rpc_url.clone();
    }
    if let Some(lottery) = args.lottery {
        record.lottery_address = lottery.to_string();
    }
    Ok(NetworkConfig::from_record(&record)?)
}

async fn connect(args: &Args) -> Result<std::sync::Arc<Session<EvmChain>>> {
    let config = network_config(args)?;
    let signer = match &args.wallet {
        Some(wallet) => {
            let dir = wallets::resolve_wallet_dir(args.wallet_dir.as_deref())?;
            let descriptor = wallets::find_wallet(&dir, wallet)?;
            Some(wallets::unlock_wallet(&descriptor)?)
        }
        None => None,
    };
    let account = signer.as_ref().map(|signer| signer.address());
    let chain = EvmChain::connect(&config.rpc_url, signer).await?;
    Ok(Session::connect(chain, account, config).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let _guard = init_tracing(args.log_dir.as_deref());

    // the calculator needs no chain
    if let Command::Odds { numbers } = args.command {
        return commands::odds(numbers, args.json);
    }

    let session = connect(&args).await?;
    let outcome = commands::run(session, args.command, args.json, args.yes).await;
    match outcome {
        Err(report)
            if report
                .downcast_ref::<lottery_client::Error>()
                .is_some_and(lottery_client::Error::is_cancelled) =>
        {
            println!("no action taken");
            Ok(())
        }
        other => other,
    }
}
