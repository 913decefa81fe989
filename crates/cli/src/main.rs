use std::{error::Error, path::PathBuf};

use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use ledger::{
    AssetFilter, AssetKind, Assignment, ChainSnapshot, CounterpartyAck, IncomingTransferCmd,
    InvoiceKind, IssueInvoiceCmd, Ledger, LedgerGuards, NewAsset, Outpoint, Recipient,
    RgbInvoiceCodec, SendCmd, UtxoClass, Visibility,
};
use migration::{Migrator, MigratorTrait};
use serde::Serialize;

mod settings;

type CliResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "ledgerctl")]
#[command(about = "Operator tool for the RGB asset ledger")]
struct Cli {
    /// Settings file (TOML). Defaults to `ledger.toml` when present.
    #[arg(long, env = "LEDGER_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply a chain snapshot read from a JSON file.
    Snapshot(SnapshotArgs),
    /// Freshness of the allocation ledger.
    Status,
    Asset(AssetCmd),
    /// Cached balance of an asset.
    Balance {
        asset_id: String,
        /// Recompute from allocations and transfers instead.
        #[arg(long)]
        derive: bool,
    },
    Invoice(InvoiceCmd),
    Transfer(TransferCmd),
    /// List UTXOs with their coloring class.
    Utxos {
        #[arg(long, value_enum)]
        class: Option<ClassArg>,
    },
    /// Recorded reconciliation mismatches.
    Warnings,
}

#[derive(Args, Debug)]
struct SnapshotArgs {
    file: PathBuf,
}

#[derive(Args, Debug)]
struct AssetCmd {
    #[command(subcommand)]
    command: AssetCommand,
}

#[derive(Subcommand, Debug)]
enum AssetCommand {
    /// Register an asset issued elsewhere.
    Register(AssetArgs),
    /// Record a local issuance.
    Issue {
        #[command(flatten)]
        asset: AssetArgs,
        /// Output holding the issued supply (`txid:vout`).
        #[arg(long)]
        utxo: Option<Outpoint>,
    },
    Show {
        asset_id: String,
    },
    List {
        #[arg(long, value_enum, default_value_t = FilterArg::Visible)]
        filter: FilterArg,
    },
    Hide {
        asset_id: String,
    },
    Unhide {
        asset_id: String,
    },
    /// Store the off-chain balance reported by the node.
    Offchain {
        asset_id: String,
        #[arg(long)]
        inbound: Option<u64>,
        #[arg(long)]
        outbound: Option<u64>,
    },
}

#[derive(Args, Debug)]
struct AssetArgs {
    #[arg(long)]
    asset_id: String,
    #[arg(long, value_enum, default_value_t = KindArg::Coin)]
    kind: KindArg,
    #[arg(long)]
    name: String,
    #[arg(long)]
    supply: u64,
    #[arg(long)]
    ticker: Option<String>,
    #[arg(long, default_value_t = 0)]
    precision: u8,
}

#[derive(Args, Debug)]
struct InvoiceCmd {
    #[command(subcommand)]
    command: InvoiceCommand,
}

#[derive(Subcommand, Debug)]
enum InvoiceCommand {
    Issue {
        #[arg(long, value_enum, default_value_t = InvoiceKindArg::Blinded)]
        kind: InvoiceKindArg,
        #[arg(long)]
        asset_id: Option<String>,
        #[arg(long)]
        amount: Option<u64>,
        /// Seconds until expiry; 0 never expires.
        #[arg(long)]
        expiry_secs: Option<u64>,
        #[command(flatten)]
        guards: GuardArgs,
    },
    Cancel {
        recipient_id: String,
    },
    List {
        /// Include expired and cancelled invoices.
        #[arg(long)]
        all: bool,
    },
    Decode {
        invoice: String,
    },
}

#[derive(Args, Debug)]
struct TransferCmd {
    #[command(subcommand)]
    command: TransferCommand,
}

#[derive(Subcommand, Debug)]
enum TransferCommand {
    /// Create one SEND per recipient in a single batch.
    Send {
        #[arg(long)]
        asset_id: String,
        /// `<recipient_id or invoice>=<amount>`, repeatable.
        #[arg(long = "to", required = true, value_parser = parse_recipient)]
        recipients: Vec<(String, u64)>,
        #[command(flatten)]
        guards: GuardArgs,
    },
    /// Attach an incoming transfer to an invoice.
    Receive {
        recipient_id: String,
        #[arg(long)]
        asset_id: Option<String>,
        #[arg(long)]
        txid: Option<String>,
        #[arg(long)]
        amount: Option<u64>,
    },
    Ack {
        idx: i32,
        #[arg(long)]
        txid: Option<String>,
        #[arg(long)]
        receive_utxo: Option<Outpoint>,
        #[arg(long)]
        change_utxo: Option<Outpoint>,
        #[arg(long)]
        amount: Option<u64>,
    },
    Confirm {
        idx: i32,
        #[arg(long)]
        txid: String,
    },
    Fail {
        idx: i32,
        #[arg(long, default_value = "failed by operator")]
        reason: String,
    },
    FailBatch {
        batch_transfer_idx: i32,
        #[arg(long, default_value = "failed by operator")]
        reason: String,
    },
    Cancel {
        idx: i32,
    },
    Show {
        idx: i32,
    },
    List {
        asset_id: String,
    },
    Batch {
        batch_transfer_idx: i32,
    },
    /// Re-run reconciliation for a settled blinded receive.
    Check {
        idx: i32,
    },
}

#[derive(Args, Debug, Default)]
struct GuardArgs {
    #[arg(long)]
    backup_in_progress: bool,
    #[arg(long)]
    node_initializing: bool,
}

impl From<&GuardArgs> for LedgerGuards {
    fn from(args: &GuardArgs) -> Self {
        LedgerGuards::default()
            .backup_in_progress(args.backup_in_progress)
            .node_initializing(args.node_initializing)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Coin,
    Collectible,
    Uda,
}

impl From<KindArg> for AssetKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Coin => AssetKind::Coin,
            KindArg::Collectible => AssetKind::Collectible,
            KindArg::Uda => AssetKind::Uda,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InvoiceKindArg {
    Blinded,
    Witness,
}

impl From<InvoiceKindArg> for InvoiceKind {
    fn from(kind: InvoiceKindArg) -> Self {
        match kind {
            InvoiceKindArg::Blinded => InvoiceKind::Blinded,
            InvoiceKindArg::Witness => InvoiceKind::Witness,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FilterArg {
    Visible,
    Hidden,
    All,
}

impl From<FilterArg> for AssetFilter {
    fn from(filter: FilterArg) -> Self {
        match filter {
            FilterArg::Visible => AssetFilter::Visible,
            FilterArg::Hidden => AssetFilter::Hidden,
            FilterArg::All => AssetFilter::All,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ClassArg {
    Colored,
    Colorable,
    Uncolored,
}

impl From<ClassArg> for UtxoClass {
    fn from(class: ClassArg) -> Self {
        match class {
            ClassArg::Colored => UtxoClass::Colored,
            ClassArg::Colorable => UtxoClass::Colorable,
            ClassArg::Uncolored => UtxoClass::Uncolored,
        }
    }
}

/// `rgb:...=100` splits on the last `=`, so invoices keep their own `=`.
fn parse_recipient(raw: &str) -> Result<(String, u64), String> {
    let (recipient, amount) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected <recipient>=<amount>, got {raw}"))?;
    if recipient.is_empty() {
        return Err(format!("missing recipient in {raw}"));
    }
    let amount = amount
        .parse::<u64>()
        .map_err(|err| format!("invalid amount in {raw}: {err}"))?;
    Ok((recipient.to_string(), amount))
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn new_asset(args: AssetArgs) -> NewAsset {
    let mut asset = NewAsset::new(args.asset_id, args.kind.into(), args.name, args.supply)
        .precision(args.precision);
    if let Some(ticker) = args.ticker {
        asset = asset.ticker(ticker);
    }
    asset
}

async fn connect(settings: &settings::Settings) -> CliResult<Ledger> {
    let database = sea_orm::Database::connect(settings.database.url()).await?;
    Migrator::up(&database, None).await?;

    let ledger = Ledger::builder()
        .database(database)
        .codec(RgbInvoiceCodec::new(settings.invoices.network.as_str()))
        .default_expiry_secs(settings.invoices.default_expiry_secs)
        .transport_endpoints(settings.invoices.transport_endpoints.clone())
        .build()
        .await?;
    Ok(ledger)
}

async fn run_asset(ledger: &Ledger, command: AssetCommand) -> CliResult<()> {
    let now = Utc::now();
    match command {
        AssetCommand::Register(args) => {
            print_json(&ledger.register_asset(new_asset(args), now).await?)
        }
        AssetCommand::Issue { asset, utxo } => {
            let mut new = new_asset(asset);
            if let Some(outpoint) = utxo {
                new = new.issue_utxo(outpoint);
            }
            print_json(&ledger.record_issuance(new, now).await?)
        }
        AssetCommand::Show { asset_id } => print_json(&ledger.asset(&asset_id).await?),
        AssetCommand::List { filter } => print_json(&ledger.list_assets(filter.into()).await?),
        AssetCommand::Hide { asset_id } => {
            ledger
                .set_asset_visibility(&asset_id, Visibility::Hidden)
                .await?;
            println!("hidden: {asset_id}");
            Ok(())
        }
        AssetCommand::Unhide { asset_id } => {
            ledger
                .set_asset_visibility(&asset_id, Visibility::Default)
                .await?;
            println!("visible: {asset_id}");
            Ok(())
        }
        AssetCommand::Offchain {
            asset_id,
            inbound,
            outbound,
        } => print_json(
            &ledger
                .record_offchain_balance(&asset_id, inbound, outbound)
                .await?,
        ),
    }
}

async fn run_invoice(ledger: &Ledger, command: InvoiceCommand) -> CliResult<()> {
    let now = Utc::now();
    match command {
        InvoiceCommand::Issue {
            kind,
            asset_id,
            amount,
            expiry_secs,
            guards,
        } => {
            let mut cmd = IssueInvoiceCmd::new(kind.into(), now).guards((&guards).into());
            if let Some(asset_id) = asset_id {
                cmd = cmd.asset_id(asset_id);
            }
            if let Some(amount) = amount {
                cmd = cmd.amount(amount);
            }
            if let Some(secs) = expiry_secs {
                cmd = cmd.expiry_secs(secs);
            }
            print_json(&ledger.issue_invoice(cmd).await?)
        }
        InvoiceCommand::Cancel { recipient_id } => {
            print_json(&ledger.cancel_invoice(&recipient_id, now).await?)
        }
        InvoiceCommand::List { all: true } => print_json(&ledger.list_invoices().await?),
        InvoiceCommand::List { all: false } => {
            print_json(&ledger.list_active_invoices(now).await?)
        }
        InvoiceCommand::Decode { invoice } => print_json(&ledger.decode_invoice(&invoice)?),
    }
}

async fn run_transfer(ledger: &Ledger, command: TransferCommand) -> CliResult<()> {
    let now = Utc::now();
    match command {
        TransferCommand::Send {
            asset_id,
            recipients,
            guards,
        } => {
            let mut cmd = SendCmd::new(asset_id, now).guards((&guards).into());
            for (recipient_id, amount) in recipients {
                cmd = cmd.recipient(Recipient::new(recipient_id, amount));
            }
            print_json(&ledger.create_send_transfer(cmd).await?)
        }
        TransferCommand::Receive {
            recipient_id,
            asset_id,
            txid,
            amount,
        } => {
            let mut cmd = IncomingTransferCmd::new(recipient_id, now);
            if let Some(asset_id) = asset_id {
                cmd = cmd.asset_id(asset_id);
            }
            if let Some(txid) = txid {
                cmd = cmd.txid(txid);
            }
            if let Some(amount) = amount {
                cmd = cmd.assignment(Assignment::Fungible { amount });
            }
            print_json(&ledger.attach_receive(cmd).await?)
        }
        TransferCommand::Ack {
            idx,
            txid,
            receive_utxo,
            change_utxo,
            amount,
        } => {
            let mut ack = CounterpartyAck::default();
            if let Some(txid) = txid {
                ack = ack.txid(txid);
            }
            if let Some(outpoint) = receive_utxo {
                ack = ack.receive_utxo(outpoint);
            }
            if let Some(outpoint) = change_utxo {
                ack = ack.change_utxo(outpoint);
            }
            if let Some(amount) = amount {
                ack = ack.assignment(Assignment::Fungible { amount });
            }
            print_json(&ledger.on_counterparty_ack(idx, ack, now).await?)
        }
        TransferCommand::Confirm { idx, txid } => {
            print_json(&ledger.on_chain_confirmed(idx, &txid, now).await?)
        }
        TransferCommand::Fail { idx, reason } => {
            print_json(&ledger.fail_transfer(idx, &reason, now).await?)
        }
        TransferCommand::FailBatch {
            batch_transfer_idx,
            reason,
        } => print_json(&ledger.fail_batch(batch_transfer_idx, &reason, now).await?),
        TransferCommand::Cancel { idx } => print_json(&ledger.cancel_transfer(idx, now).await?),
        TransferCommand::Show { idx } => print_json(&ledger.transfer(idx).await?),
        TransferCommand::List { asset_id } => print_json(&ledger.list_transfers(&asset_id).await?),
        TransferCommand::Batch { batch_transfer_idx } => {
            print_json(&ledger.batch_status(batch_transfer_idx).await?)
        }
        TransferCommand::Check { idx } => print_json(&ledger.check_transfer(idx, now).await?),
    }
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    let settings = settings::Settings::new(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(format!(
            "ledgerctl={level},ledger={level}",
            level = settings.app.level
        ))
        .init();

    let ledger = connect(&settings).await?;
    tracing::debug!(database = ?settings.database, "ledger ready");

    match cli.command {
        Command::Snapshot(SnapshotArgs { file }) => {
            let raw = tokio::fs::read_to_string(&file).await?;
            let snapshot: ChainSnapshot = serde_json::from_str(&raw)?;
            let report = ledger.apply_chain_snapshot(&snapshot, Utc::now()).await?;
            if report.is_stale() {
                tracing::warn!(
                    dropped = report.dropped.len(),
                    "snapshot applied with dropped allocations"
                );
            }
            print_json(&report)?;
        }
        Command::Status => print_json(&ledger.ledger_status().await?)?,
        Command::Asset(AssetCmd { command }) => run_asset(&ledger, command).await?,
        Command::Balance { asset_id, derive } => {
            let balance = if derive {
                ledger.compute_balance(&asset_id).await?
            } else {
                ledger.get_balance(&asset_id).await?
            };
            print_json(&balance)?;
        }
        Command::Invoice(InvoiceCmd { command }) => run_invoice(&ledger, command).await?,
        Command::Transfer(TransferCmd { command }) => run_transfer(&ledger, command).await?,
        Command::Utxos { class: Some(class) } => {
            print_json(&ledger.utxos_by_class(class.into()).await?)?
        }
        Command::Utxos { class: None } => print_json(&ledger.classify_utxos().await?)?,
        Command::Warnings => print_json(&ledger.get_reconciliation_warnings().await?)?,
    }

    Ok(())
}
