use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveValue, TransactionTrait, prelude::*};
use uuid::Uuid;

use crate::{
    Invoice, InvoiceData, InvoiceKind, IssueInvoiceCmd, LedgerError, ReceiveUtxoData,
    ResultLedger, TransferEvent, TransferStatus, invoices,
    lease::{invoice_key, transfer_key},
    receive_data,
    util::normalize_optional_text,
};

use super::{
    Ledger, balances::refresh_balance, next_batch_idx, require_invoice, transfer_for_recipient,
    transfers::advance, with_tx,
};

/// `utxob:`/`wvout:` followed by 22 url-safe base64 characters.
fn new_recipient_id(kind: InvoiceKind) -> String {
    let id = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes());
    format!("{}{id}", kind.recipient_prefix())
}

fn expiration(now: DateTime<Utc>, secs: u64) -> ResultLedger<Option<DateTime<Utc>>> {
    if secs == 0 {
        return Ok(None);
    }
    let secs = i64::try_from(secs)
        .map_err(|_| LedgerError::InvalidAmount("expiry too large".to_string()))?;
    let offset = Duration::try_seconds(secs)
        .ok_or_else(|| LedgerError::InvalidAmount("expiry too large".to_string()))?;
    now.checked_add_signed(offset)
        .map(Some)
        .ok_or_else(|| LedgerError::InvalidAmount("expiry too large".to_string()))
}

impl Ledger {
    /// Mints a receive invoice.
    ///
    /// When both the asset and a non-zero amount are known, the expectation
    /// is stored for reconciliation.
    pub async fn issue_invoice(&self, cmd: IssueInvoiceCmd) -> ResultLedger<Invoice> {
        cmd.guards.check("issue invoice")?;
        let asset_id = normalize_optional_text(cmd.asset_id.as_deref());
        let amount = cmd.amount.filter(|a| *a > 0);
        let expiration_timestamp = expiration(
            cmd.now,
            cmd.expiry_secs.unwrap_or(self.default_expiry_secs),
        )?;
        let transport_endpoints = cmd
            .transport_endpoints
            .unwrap_or_else(|| self.transport_endpoints.clone());
        let recipient_id = new_recipient_id(cmd.kind);
        let encoded = self.codec.encode(&InvoiceData {
            recipient_id: recipient_id.clone(),
            asset_id: asset_id.clone(),
            amount,
            expiration_timestamp,
            transport_endpoints: transport_endpoints.clone(),
        })?;

        with_tx!(self, |db_tx| {
            let invoice = Invoice {
                recipient_id,
                invoice: encoded,
                kind: cmd.kind,
                asset_id,
                amount,
                expiration_timestamp,
                batch_transfer_idx: next_batch_idx(&db_tx).await?,
                transport_endpoints,
                created_at: cmd.now,
                cancelled_at: None,
            };
            invoices::ActiveModel::try_from(&invoice)?
                .insert(&db_tx)
                .await?;

            if let (Some(linked_asset), Some(linked_amount)) = (&invoice.asset_id, invoice.amount) {
                let expected = ReceiveUtxoData {
                    recipient_id: invoice.recipient_id.clone(),
                    linked_asset: linked_asset.clone(),
                    linked_amount,
                    invoice: invoice.invoice.clone(),
                    batch_transfer_idx: invoice.batch_transfer_idx,
                    expiration_timestamp: invoice.expiration_timestamp,
                };
                receive_data::ActiveModel::try_from(&expected)?
                    .insert(&db_tx)
                    .await?;
            }

            tracing::info!(
                recipient_id = %invoice.recipient_id,
                kind = invoice.kind.as_str(),
                expires = ?invoice.expiration_timestamp,
                "invoice issued"
            );
            Ok(invoice)
        })
    }

    /// Cancels an invoice nobody paid yet.
    ///
    /// If a transfer already attached and still waits for its counterparty,
    /// it is cancelled in the same scope. Any later stage fails with
    /// `InvalidStateTransition`.
    pub async fn cancel_invoice(
        &self,
        recipient_id: &str,
        now: DateTime<Utc>,
    ) -> ResultLedger<Invoice> {
        let _lease = self.leases.acquire_one(invoice_key(recipient_id))?;
        let mut _transfer_lease = None;
        with_tx!(self, |db_tx| {
            let mut invoice = require_invoice(&db_tx, recipient_id).await?;
            if invoice.is_cancelled() {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "invoice {recipient_id} is already cancelled"
                )));
            }

            if let Some(transfer) = transfer_for_recipient(&db_tx, recipient_id).await? {
                if transfer.status != TransferStatus::WaitingCounterparty {
                    return Err(LedgerError::InvalidStateTransition(format!(
                        "invoice {recipient_id} has transfer {} in {}",
                        transfer.idx,
                        transfer.status.as_str()
                    )));
                }
                _transfer_lease = Some(self.leases.acquire_one(transfer_key(transfer.idx))?);
                let (transfer, _) = advance(&db_tx, transfer, TransferEvent::Cancel, now, |t| {
                    t.failure_reason = Some("invoice cancelled".to_string());
                })
                .await?;
                refresh_balance(&db_tx, &transfer.asset_id).await?;
            }

            let active = invoices::ActiveModel {
                recipient_id: ActiveValue::Set(invoice.recipient_id.clone()),
                cancelled_at: ActiveValue::Set(Some(now)),
                ..Default::default()
            };
            active.update(&db_tx).await?;
            invoice.cancelled_at = Some(now);

            tracing::info!(recipient_id, "invoice cancelled");
            Ok(invoice)
        })
    }

    /// `true` once `now` reached the invoice's expiry.
    pub fn is_expired(invoice: &Invoice, now: DateTime<Utc>) -> bool {
        invoice.is_expired(now)
    }
}
