//! coinsmith-cli: build, fund and price transactions from a wallet snapshot.
//!
//! Every command reads the JSON wallet snapshot named by the configuration,
//! runs one operation through the transaction handler and prints the result
//! as JSON on stdout. Logs go to stderr.

mod config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use coinsmith_core::coin::WalletCoin;
use coinsmith_core::fee::{FeeRate, FeeType};
use coinsmith_core::script::Script;
use coinsmith_core::types::{AccountRef, Hash256, OutPoint, Transaction};
use coinsmith_wallet::encryption::KdfParams;
use coinsmith_wallet::wallet::DEFAULT_ACCOUNT;
use coinsmith_wallet::{
    BuildRequest, BuiltTransaction, FeeSchedule, InputReservations, NativeEngineFactory, Seed,
    TransactionHandler, Wallet, WalletStore,
};

use crate::config::CliConfig;

/// Environment variable consulted before prompting for a passphrase.
const PASSPHRASE_ENV: &str = "COINSMITH_PASSPHRASE";

/// Coinsmith command-line transaction builder.
#[derive(Parser)]
#[command(name = "coinsmith-cli")]
#[command(version, about = "Build, fund and price UTXO transactions.")]
struct Cli {
    /// Configuration file (default: ~/.coinsmith/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Wallet snapshot, overriding the configured one.
    #[arg(long, global = true)]
    wallet_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a wallet in the snapshot.
    NewWallet(NewWalletArgs),
    /// Print the next unused receive script of an account.
    ReceiveAddress(AccountArgs),
    /// Record a coin paid to an account's receive address.
    AddCoin(AddCoinArgs),
    /// Build (and by default sign) a transaction.
    Build(BuildArgs),
    /// Add inputs and change to a transaction read from a JSON file.
    Fund(FundArgs),
    /// Print the fee a build would pay.
    EstimateFee(RequestArgs),
    /// Print the most an account can send and the fee for sending it.
    MaxSpendable(MaxSpendableArgs),
}

#[derive(Args)]
struct NewWalletArgs {
    /// Wallet name.
    name: String,

    /// Hex-encoded 32-byte seed. A random seed is generated if omitted.
    #[arg(long)]
    seed: Option<String>,
}

#[derive(Args)]
struct AccountArgs {
    /// Wallet name.
    #[arg(short, long)]
    wallet: String,

    #[arg(short, long, default_value = DEFAULT_ACCOUNT)]
    account: String,
}

#[derive(Args)]
struct AddCoinArgs {
    #[command(flatten)]
    account: AccountArgs,

    /// Outpoint as <txid>:<index>.
    #[arg(long)]
    outpoint: String,

    /// Amount in base units.
    #[arg(long)]
    amount: u64,

    #[arg(long, default_value_t = 1)]
    confirmations: u32,
}

#[derive(Args)]
struct RequestArgs {
    #[command(flatten)]
    account: AccountArgs,

    /// Payment as <script-hex>:<amount>. Repeatable.
    #[arg(long = "to")]
    recipients: Vec<String>,

    /// Priority tier: low, medium or high.
    #[arg(long, default_value = "medium")]
    fee_type: FeeType,

    /// Fee rate in base units per 1000 bytes, overriding the tier.
    #[arg(long)]
    fee_rate: Option<u64>,

    /// Absolute fee in base units.
    #[arg(long)]
    fee: Option<u64>,

    #[arg(long, default_value_t = 1)]
    min_confirmations: u32,

    /// Input that must be spent, as <txid>:<index>. Repeatable.
    #[arg(long = "input")]
    inputs: Vec<String>,

    /// With --input, let the builder add further coins.
    #[arg(long)]
    allow_other_inputs: bool,

    /// Change script (hex), overriding the account's change address.
    #[arg(long)]
    change: Option<String>,

    /// OP_RETURN payload (hex).
    #[arg(long)]
    op_return: Option<String>,
}

#[derive(Args)]
struct BuildArgs {
    #[command(flatten)]
    request: RequestArgs,

    /// Leave the transaction unsigned.
    #[arg(long)]
    unsigned: bool,

    /// Randomize input and output order.
    #[arg(long)]
    shuffle: bool,

    /// Accept a transaction that fails verification.
    #[arg(long)]
    skip_verification: bool,

    /// Record the spend and any change in the snapshot.
    #[arg(long)]
    apply: bool,
}

#[derive(Args)]
struct FundArgs {
    #[command(flatten)]
    request: RequestArgs,

    /// JSON transaction whose outputs are to be funded.
    #[arg(long)]
    tx: PathBuf,
}

#[derive(Args)]
struct MaxSpendableArgs {
    #[command(flatten)]
    account: AccountArgs,

    #[arg(long, default_value = "medium")]
    fee_type: FeeType,

    /// Count coins with zero confirmations.
    #[arg(long)]
    allow_unconfirmed: bool,
}

/// Collaborators a handler borrows for one invocation.
struct Session {
    store: WalletStore,
    fees: FeeSchedule,
    engines: NativeEngineFactory,
    reservations: InputReservations,
    path: PathBuf,
}

impl Session {
    fn open(cfg: &CliConfig) -> Result<Self> {
        let store = WalletStore::load_from_file(&cfg.wallet_file).with_context(|| {
            format!("Failed to load wallet snapshot: {}", cfg.wallet_file.display())
        })?;
        Ok(Self {
            store,
            fees: cfg.fee_schedule(),
            engines: NativeEngineFactory::new(cfg.engine_policy()),
            reservations: InputReservations::new(cfg.reservation_ttl()),
            path: cfg.wallet_file.clone(),
        })
    }

    fn handler(&self) -> TransactionHandler<'_> {
        TransactionHandler::new(
            &self.store,
            &self.fees,
            &self.store,
            &self.engines,
            &self.reservations,
        )
    }

    fn save(&self) -> Result<()> {
        save_store(&self.store, &self.path)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = CliConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = cli.wallet_file {
        cfg.wallet_file = path;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::NewWallet(args) => new_wallet(&cfg, args),
        Commands::ReceiveAddress(args) => receive_address(&cfg, args),
        Commands::AddCoin(args) => add_coin(&cfg, args),
        Commands::Build(args) => build(&cfg, args),
        Commands::Fund(args) => fund(&cfg, args),
        Commands::EstimateFee(args) => estimate_fee(&cfg, args),
        Commands::MaxSpendable(args) => max_spendable(&cfg, args),
    }
}

/// Create a wallet, generating a seed unless one is given.
fn new_wallet(cfg: &CliConfig, args: NewWalletArgs) -> Result<()> {
    let store = if cfg.wallet_file.exists() {
        WalletStore::load_from_file(&cfg.wallet_file).context("Failed to load wallet snapshot")?
    } else {
        WalletStore::new()
    };
    if store.wallet_by_name(&args.name).is_ok() {
        bail!("Wallet already exists: {}", args.name);
    }

    let (seed, generated) = match args.seed {
        Some(hex_seed) => (parse_seed(&hex_seed)?, false),
        None => (Seed::generate(), true),
    };
    let passphrase = read_new_passphrase()?;
    let wallet = Wallet::create(&args.name, &seed, &passphrase, KdfParams::default())
        .context("Failed to create wallet")?;
    let receive = wallet.receive_script(DEFAULT_ACCOUNT)?;
    store.insert(wallet);
    save_store(&store, &cfg.wallet_file)?;
    info!(wallet = %args.name, file = %cfg.wallet_file.display(), "wallet saved");

    let mut out = json!({
        "wallet": args.name,
        "account": DEFAULT_ACCOUNT,
        "receive_script": receive.to_string(),
    });
    if generated {
        // Shown once; the snapshot only holds the encrypted seed.
        out["seed"] = json!(hex::encode(seed.as_bytes()));
    }
    print_json(&out)
}

fn receive_address(cfg: &CliConfig, args: AccountArgs) -> Result<()> {
    let session = Session::open(cfg)?;
    let wallet = session.store.wallet_by_name(&args.wallet)?;
    let script = wallet.receive_script(&args.account)?;
    print_json(&json!({ "receive_script": script.to_string() }))
}

fn add_coin(cfg: &CliConfig, args: AddCoinArgs) -> Result<()> {
    let session = Session::open(cfg)?;
    let outpoint = parse_outpoint(&args.outpoint)?;
    let wallet = session.store.wallet_by_name(&args.account.wallet)?;
    let owner = wallet
        .receive_script(&args.account.account)?
        .pubkey_hash()
        .context("Receive script is not pay-to-pubkey-hash")?;

    let coin = WalletCoin::new(outpoint, args.amount, owner, args.confirmations);
    session
        .store
        .update(&args.account.wallet, |w| w.add_coin(coin))
        .context("Failed to record coin")?;
    session.save()?;
    print_json(&json!({ "added": args.outpoint, "amount": args.amount }))
}

fn build(cfg: &CliConfig, args: BuildArgs) -> Result<()> {
    let session = Session::open(cfg)?;
    let mut request = to_request(&args.request)?;
    request
        .set_sign(!args.unsigned)
        .set_shuffle(args.shuffle)
        .set_skip_verification(args.skip_verification);
    if request.sign {
        request.set_passphrase(read_passphrase()?);
    }

    let built = session.handler().build(&request).context("Build failed")?;
    if args.apply {
        session
            .store
            .update(&args.request.account.wallet, |w| w.apply_transaction(&built.transaction))
            .context("Failed to apply transaction")?;
        session.save()?;
    }
    print_json(&built_json(&built)?)
}

fn fund(cfg: &CliConfig, args: FundArgs) -> Result<()> {
    let session = Session::open(cfg)?;
    let mut tx = read_transaction(&args.tx)?;
    let request = to_request(&args.request)?;
    let funded = session
        .handler()
        .fund_transaction(&mut tx, &request)
        .context("Funding failed")?;
    print_json(&built_json(&funded)?)
}

fn estimate_fee(cfg: &CliConfig, args: RequestArgs) -> Result<()> {
    let session = Session::open(cfg)?;
    let request = to_request(&args)?;
    let fee = session.handler().estimate_fee(&request).context("Estimate failed")?;
    print_json(&json!({ "fee": fee }))
}

fn max_spendable(cfg: &CliConfig, args: MaxSpendableArgs) -> Result<()> {
    let session = Session::open(cfg)?;
    let account = AccountRef::new(args.account.wallet, args.account.account);
    let limit = session
        .handler()
        .max_spendable(&account, args.fee_type, args.allow_unconfirmed)
        .context("Probe failed")?;
    print_json(&serde_json::to_value(limit)?)
}

/// Translate command-line request flags into a [`BuildRequest`].
fn to_request(args: &RequestArgs) -> Result<BuildRequest> {
    let mut request = BuildRequest::new(AccountRef::new(&args.account.wallet, &args.account.account));
    for arg in &args.recipients {
        let (script, amount) = parse_recipient(arg)?;
        request.add_recipient(script, amount);
    }
    request
        .set_fee_type(args.fee_type)
        .set_min_confirmations(args.min_confirmations);
    if let Some(rate) = args.fee_rate {
        request.set_fee_rate(FeeRate::from_per_kb(rate));
    }
    if let Some(fee) = args.fee {
        request.set_fee(fee);
    }
    if !args.inputs.is_empty() {
        let inputs = args
            .inputs
            .iter()
            .map(|s| parse_outpoint(s))
            .collect::<Result<Vec<_>>>()?;
        request.select_inputs(inputs, args.allow_other_inputs);
    }
    if let Some(change) = &args.change {
        request.set_change_script(parse_script(change)?);
    }
    if let Some(data) = &args.op_return {
        request.set_op_return(hex::decode(data).context("Invalid OP_RETURN hex")?, 0);
    }
    Ok(request)
}

fn built_json(built: &BuiltTransaction) -> Result<serde_json::Value> {
    let tx = &built.transaction;
    Ok(json!({
        "txid": tx.txid()?.to_string(),
        "fee": built.fee,
        "change_script": built.change_script.to_string(),
        "hex": hex::encode(tx.encode()?),
        "transaction": tx,
    }))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn save_store(store: &WalletStore, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    store
        .save_to_file(path)
        .with_context(|| format!("Failed to save wallet snapshot: {}", path.display()))
}

fn read_transaction(path: &Path) -> Result<Transaction> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read transaction: {}", path.display()))?;
    serde_json::from_slice(&data).context("Invalid transaction JSON")
}

/// `<script-hex>:<amount>`.
fn parse_recipient(arg: &str) -> Result<(Script, u64)> {
    let (script, amount) = arg
        .rsplit_once(':')
        .context("Recipient must be <script-hex>:<amount>")?;
    let amount = amount
        .parse()
        .with_context(|| format!("Invalid amount: {amount}"))?;
    Ok((parse_script(script)?, amount))
}

fn parse_script(s: &str) -> Result<Script> {
    Ok(Script::from_bytes(hex::decode(s).context("Invalid script hex")?))
}

/// `<txid-hex>:<index>`.
fn parse_outpoint(arg: &str) -> Result<OutPoint> {
    let (txid, index) = arg
        .rsplit_once(':')
        .context("Outpoint must be <txid>:<index>")?;
    let bytes: [u8; 32] = hex::decode(txid)
        .context("Invalid txid hex")?
        .try_into()
        .map_err(|_| anyhow::anyhow!("Txid must be 32 bytes"))?;
    let index = index
        .parse()
        .with_context(|| format!("Invalid output index: {index}"))?;
    Ok(OutPoint::new(Hash256::from_bytes(bytes), index))
}

fn parse_seed(input: &str) -> Result<Seed> {
    let bytes: [u8; 32] = hex::decode(input.trim())
        .context("Invalid hex seed")?
        .try_into()
        .map_err(|_| anyhow::anyhow!("Seed must be exactly 32 bytes (64 hex characters)"))?;
    Ok(Seed::from_bytes(bytes))
}

/// The passphrase from the environment, else prompted without echo.
fn read_passphrase() -> Result<String> {
    match std::env::var(PASSPHRASE_ENV) {
        Ok(p) => Ok(p),
        Err(_) => rpassword::prompt_password("Wallet passphrase: ").context("Failed to read passphrase"),
    }
}

fn read_new_passphrase() -> Result<String> {
    if let Ok(p) = std::env::var(PASSPHRASE_ENV) {
        return Ok(p);
    }
    let first = rpassword::prompt_password("New wallet passphrase: ")
        .context("Failed to read passphrase")?;
    let second =
        rpassword::prompt_password("Confirm passphrase: ").context("Failed to read passphrase")?;
    if first != second {
        bail!("Passphrases do not match");
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_parses_script_and_amount() {
        let script = Script::p2pkh(&Hash256([7; 32]));
        let (parsed, amount) = parse_recipient(&format!("{script}:1500")).unwrap();
        assert_eq!(parsed, script);
        assert_eq!(amount, 1500);
    }

    #[test]
    fn recipient_without_amount_is_rejected() {
        assert!(parse_recipient("abcd").is_err());
        assert!(parse_recipient("abcd:lots").is_err());
    }

    #[test]
    fn outpoint_round_trips_display() {
        let op = OutPoint::new(Hash256([3; 32]), 9);
        assert_eq!(parse_outpoint(&op.to_string()).unwrap(), op);
        assert!(parse_outpoint("00:1").is_err());
    }

    #[test]
    fn seed_must_be_32_bytes() {
        assert!(parse_seed(&"ab".repeat(32)).is_ok());
        assert!(parse_seed("abcd").is_err());
    }

    #[test]
    fn request_flags_map_onto_request() {
        let args = RequestArgs {
            account: AccountArgs {
                wallet: "main".into(),
                account: DEFAULT_ACCOUNT.into(),
            },
            recipients: vec![format!("{}:1000", Script::p2pkh(&Hash256([1; 32])))],
            fee_type: FeeType::High,
            fee_rate: Some(2_000),
            fee: None,
            min_confirmations: 0,
            inputs: vec![OutPoint::new(Hash256([2; 32]), 1).to_string()],
            allow_other_inputs: true,
            change: None,
            op_return: Some("cafe".into()),
        };
        let request = to_request(&args).unwrap();
        assert_eq!(request.recipients.len(), 1);
        assert_eq!(request.fee_type, FeeType::High);
        assert_eq!(request.fee_rate, Some(FeeRate::from_per_kb(2_000)));
        assert_eq!(request.min_confirmations, 0);
        assert_eq!(request.selected_inputs.len(), 1);
        assert!(request.allow_other_inputs);
        assert_eq!(request.op_return.as_ref().map(|o| o.data.clone()), Some(vec![0xca, 0xfe]));
    }
}
