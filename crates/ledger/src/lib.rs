//! Asset ledger and transfer state machine for an RGB wallet.
//!
//! The [`Ledger`] tracks which Bitcoin outputs carry which asset
//! allocations, moves transfers through their lifecycle, issues receive
//! invoices and reconciles settled receives against what was promised.

pub use assets::{Asset, AssetKind, Visibility};
pub use allocations::RgbAllocation;
pub use balance::{Balance, BalanceInputs};
pub use codec::{InvoiceCodec, InvoiceData, RgbInvoiceCodec};
pub use commands::{
    CounterpartyAck, IncomingTransferCmd, IssueInvoiceCmd, LedgerGuards, NewAsset, Recipient,
    SendCmd,
};
pub use error::LedgerError;
pub use invoices::{Invoice, InvoiceKind};
pub use ops::{
    AssetFilter, BatchStatus, ClassifiedUtxo, DEFAULT_INVOICE_EXPIRY_SECS, Ledger, LedgerBuilder,
};
pub use receive_data::ReceiveUtxoData;
pub use reconciliation::{Mismatch, ReconciliationOutcome, ReconciliationWarning};
pub use snapshot::{
    ChainSnapshot, DroppedAllocation, SnapshotAllocation, SnapshotReport, SnapshotUtxo,
    StaleReason, SyncStatus,
};
pub use transfers::{
    Assignment, Transfer, TransferEvent, TransferKind, TransferStatus, TransitionOutcome,
};
pub use utxos::{Outpoint, RgbUtxo, UtxoClass};

mod allocations;
mod assets;
mod balance;
mod codec;
mod commands;
mod error;
mod invoices;
mod lease;
mod ops;
mod receive_data;
pub mod reconciliation;
pub mod snapshot;
mod transfers;
mod util;
mod utxos;

type ResultLedger<T> = Result<T, LedgerError>;
