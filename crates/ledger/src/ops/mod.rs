use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, QueryFilter, QueryOrder, prelude::*};

use crate::{
    Invoice, InvoiceCodec, InvoiceData, LedgerError, Outpoint, ResultLedger, RgbAllocation,
    RgbInvoiceCodec, RgbUtxo, Transfer, TransferKind, TransferStatus, lease::LeaseRegistry,
};

mod assets;
mod balances;
mod chain;
mod invoices;
mod queries;
mod reconciliation;
mod transfers;

pub use queries::{AssetFilter, ClassifiedUtxo};
pub use transfers::BatchStatus;

/// Invoice lifetime used when a request does not set one.
pub const DEFAULT_INVOICE_EXPIRY_SECS: u64 = 86_400;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

#[derive(Debug)]
pub struct Ledger {
    database: DatabaseConnection,
    codec: Arc<dyn InvoiceCodec>,
    leases: LeaseRegistry,
    default_expiry_secs: u64,
    transport_endpoints: Vec<String>,
}

impl Ledger {
    /// Return a builder for `Ledger`. Help to build the struct.
    pub fn builder() -> LedgerBuilder {
        LedgerBuilder::default()
    }

    /// Decode an invoice string with the configured codec.
    pub fn decode_invoice(&self, invoice: &str) -> ResultLedger<InvoiceData> {
        self.codec.decode(invoice)
    }
}

fn waiting_statuses() -> [&'static str; 2] {
    [
        TransferStatus::WaitingCounterparty.as_str(),
        TransferStatus::WaitingConfirmations.as_str(),
    ]
}

async fn require_transfer<C: ConnectionTrait>(db: &C, idx: i32) -> ResultLedger<Transfer> {
    let model = crate::transfers::Entity::find_by_id(idx)
        .one(db)
        .await?
        .ok_or_else(|| LedgerError::KeyNotFound(format!("transfer {idx}")))?;
    Transfer::try_from(model)
}

async fn require_invoice<C: ConnectionTrait>(db: &C, recipient_id: &str) -> ResultLedger<Invoice> {
    let model = crate::invoices::Entity::find_by_id(recipient_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| LedgerError::KeyNotFound(format!("invoice {recipient_id}")))?;
    Invoice::try_from(model)
}

/// Transfer attached to `recipient_id`, if any.
async fn transfer_for_recipient<C: ConnectionTrait>(
    db: &C,
    recipient_id: &str,
) -> ResultLedger<Option<Transfer>> {
    crate::transfers::Entity::find()
        .filter(crate::transfers::Column::RecipientId.eq(recipient_id.to_string()))
        .filter(crate::transfers::Column::Kind.ne(TransferKind::Send.as_str()))
        .one(db)
        .await?
        .map(Transfer::try_from)
        .transpose()
}

/// Next free batch index across transfers and invoices.
async fn next_batch_idx<C: ConnectionTrait>(db: &C) -> ResultLedger<i32> {
    let last_transfer = crate::transfers::Entity::find()
        .order_by_desc(crate::transfers::Column::BatchTransferIdx)
        .one(db)
        .await?
        .map_or(0, |m| m.batch_transfer_idx);
    let last_invoice = crate::invoices::Entity::find()
        .order_by_desc(crate::invoices::Column::BatchTransferIdx)
        .one(db)
        .await?
        .map_or(0, |m| m.batch_transfer_idx);
    last_transfer
        .max(last_invoice)
        .checked_add(1)
        .ok_or_else(|| LedgerError::InvalidAmount("batch index overflow".to_string()))
}

async fn insert_transfer<C: ConnectionTrait>(
    db: &C,
    transfer: &Transfer,
) -> ResultLedger<Transfer> {
    let model = crate::transfers::ActiveModel::try_from(transfer)?
        .insert(db)
        .await?;
    Transfer::try_from(model)
}

/// Write `transfer` back if nobody changed it since it was read.
///
/// Bumps `version` and `updated_at`. Zero matched rows means a concurrent
/// writer got there first.
async fn store_transfer<C: ConnectionTrait>(
    db: &C,
    mut transfer: Transfer,
    now: DateTime<Utc>,
) -> ResultLedger<Transfer> {
    let read_version = transfer.version;
    transfer.version = read_version
        .checked_add(1)
        .ok_or_else(|| LedgerError::ConcurrentModification("version overflow".to_string()))?;
    transfer.updated_at = now;

    let result = crate::transfers::Entity::update_many()
        .set(crate::transfers::ActiveModel::try_from(&transfer)?)
        .filter(crate::transfers::Column::Idx.eq(transfer.idx))
        .filter(crate::transfers::Column::Version.eq(read_version))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(LedgerError::ConcurrentModification(format!(
            "transfer {} changed while being updated",
            transfer.idx
        )));
    }
    Ok(transfer)
}

async fn load_utxo<C: ConnectionTrait>(
    db: &C,
    outpoint: &Outpoint,
) -> ResultLedger<Option<RgbUtxo>> {
    let Some(model) = crate::utxos::Entity::find_by_id(outpoint.to_string())
        .one(db)
        .await?
    else {
        return Ok(None);
    };
    let allocations = load_allocations(db, outpoint).await?;
    Ok(Some(RgbUtxo::try_from((model, allocations))?))
}

/// Allocations on `outpoint` in position order.
async fn load_allocations<C: ConnectionTrait>(
    db: &C,
    outpoint: &Outpoint,
) -> ResultLedger<Vec<RgbAllocation>> {
    let mut models = crate::allocations::Entity::find()
        .filter(crate::allocations::Column::Outpoint.eq(outpoint.to_string()))
        .all(db)
        .await?;
    models.sort_by_key(|m| crate::allocations::position(&m.id));
    models.into_iter().map(RgbAllocation::try_from).collect()
}

/// The builder for `Ledger`
#[derive(Default)]
pub struct LedgerBuilder {
    database: DatabaseConnection,
    codec: Option<Arc<dyn InvoiceCodec>>,
    default_expiry_secs: Option<u64>,
    transport_endpoints: Vec<String>,
}

impl LedgerBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> LedgerBuilder {
        self.database = db;
        self
    }

    /// Invoice codec. Defaults to [`RgbInvoiceCodec`] on mainnet.
    pub fn codec(mut self, codec: impl InvoiceCodec + 'static) -> LedgerBuilder {
        self.codec = Some(Arc::new(codec));
        self
    }

    pub fn default_expiry_secs(mut self, secs: u64) -> LedgerBuilder {
        self.default_expiry_secs = Some(secs);
        self
    }

    /// Endpoints written into invoices that do not name their own.
    pub fn transport_endpoints(mut self, endpoints: Vec<String>) -> LedgerBuilder {
        self.transport_endpoints = endpoints;
        self
    }

    /// Construct `Ledger`
    pub async fn build(self) -> ResultLedger<Ledger> {
        Ok(Ledger {
            database: self.database,
            codec: self
                .codec
                .unwrap_or_else(|| Arc::new(RgbInvoiceCodec::default())),
            leases: LeaseRegistry::default(),
            default_expiry_secs: self
                .default_expiry_secs
                .unwrap_or(DEFAULT_INVOICE_EXPIRY_SECS),
            transport_endpoints: self.transport_endpoints,
        })
    }
}
