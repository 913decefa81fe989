use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, QueryFilter, TransactionTrait, prelude::*, sea_query::Expr};
use serde::{Deserialize, Serialize};

use crate::{
    Assignment, Balance, CounterpartyAck, IncomingTransferCmd, LedgerError, Recipient,
    ResultLedger, SendCmd, Transfer, TransferEvent, TransferKind, TransferStatus,
    TransitionOutcome, invoices,
    lease::{asset_key, invoice_key, transfer_key},
    transfers,
    util::checked_sum,
};

use super::{
    Ledger,
    assets::{ensure_asset, require_asset},
    balances::{balance_inputs, refresh_balance},
    chain::mark_allocations_settled,
    insert_transfer, next_batch_idx,
    reconciliation::reconcile,
    require_invoice, require_transfer, store_transfer, transfer_for_recipient, with_tx,
};

/// Aggregate state of a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    /// At least one member is still waiting.
    Pending { waiting: usize },
    Settled,
    Failed,
    /// All members are terminal, some settled and some failed.
    Mixed,
}

impl BatchStatus {
    fn of(members: &[Transfer]) -> Self {
        let waiting = members.iter().filter(|t| t.status.is_waiting()).count();
        if waiting > 0 {
            return Self::Pending { waiting };
        }
        let settled = members
            .iter()
            .filter(|t| t.status == TransferStatus::Settled)
            .count();
        match settled {
            0 => Self::Failed,
            n if n == members.len() => Self::Settled,
            _ => Self::Mixed,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending { .. })
    }
}

/// A send recipient after invoice decoding.
struct ResolvedRecipient {
    recipient_id: String,
    assignment: Assignment,
    invoice: Option<String>,
    expiration: Option<DateTime<Utc>>,
    transport_endpoints: Vec<String>,
}

/// Apply `event` to `transfer` and persist it.
///
/// `patch` runs only when the event changes the status. Duplicates are
/// returned untouched.
pub(super) async fn advance<C, F>(
    db: &C,
    mut transfer: Transfer,
    event: TransferEvent,
    now: DateTime<Utc>,
    patch: F,
) -> ResultLedger<(Transfer, TransitionOutcome)>
where
    C: ConnectionTrait,
    F: FnOnce(&mut Transfer),
{
    let outcome = transfer.status.apply(event)?;
    match outcome {
        TransitionOutcome::Duplicate { status } => {
            tracing::debug!(
                transfer_idx = transfer.idx,
                ?event,
                status = status.as_str(),
                "duplicate transfer event ignored"
            );
            Ok((transfer, outcome))
        }
        TransitionOutcome::Applied { from, to } => {
            transfer.status = to;
            patch(&mut transfer);
            let transfer = store_transfer(db, transfer, now).await?;
            tracing::debug!(
                transfer_idx = transfer.idx,
                from = from.as_str(),
                to = to.as_str(),
                "transfer advanced"
            );
            Ok((transfer, outcome))
        }
    }
}

/// Close the invoice of a receive that just failed so it leaves the
/// active listing. Sends and already closed invoices are left alone.
async fn close_invoice<C: ConnectionTrait>(
    db: &C,
    transfer: &Transfer,
    now: DateTime<Utc>,
) -> ResultLedger<()> {
    if !transfer.kind.is_receive() {
        return Ok(());
    }
    let Some(recipient_id) = transfer.recipient_id.as_deref() else {
        return Ok(());
    };
    let closed = invoices::Entity::update_many()
        .col_expr(invoices::Column::CancelledAt, Expr::value(Some(now)))
        .filter(invoices::Column::RecipientId.eq(recipient_id.to_string()))
        .filter(invoices::Column::CancelledAt.is_null())
        .exec(db)
        .await?;
    if closed.rows_affected > 0 {
        tracing::debug!(transfer_idx = transfer.idx, recipient_id, "invoice closed");
    }
    Ok(())
}

fn validate_assignment(assignment: Assignment) -> ResultLedger<()> {
    match assignment {
        Assignment::Fungible { amount: 0 } => Err(LedgerError::InvalidAmount(
            "amount must be > 0".to_string(),
        )),
        Assignment::Any => Err(LedgerError::InvalidAmount(
            "a send needs an explicit amount".to_string(),
        )),
        Assignment::Fungible { .. } | Assignment::NonFungible => Ok(()),
    }
}

impl Ledger {
    fn resolve_recipient(
        &self,
        asset_id: &str,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> ResultLedger<ResolvedRecipient> {
        validate_assignment(recipient.assignment)?;
        let raw = recipient.recipient_id.trim();
        if raw.is_empty() {
            return Err(LedgerError::InvalidInvoice(
                "recipient must not be empty".to_string(),
            ));
        }

        if !raw.starts_with("rgb:") {
            return Ok(ResolvedRecipient {
                recipient_id: raw.to_string(),
                assignment: recipient.assignment,
                invoice: None,
                expiration: None,
                transport_endpoints: if recipient.transport_endpoints.is_empty() {
                    self.transport_endpoints.clone()
                } else {
                    recipient.transport_endpoints.clone()
                },
            });
        }

        let data = self.codec.decode(raw)?;
        if let Some(wanted) = &data.asset_id
            && wanted != asset_id
        {
            return Err(LedgerError::InvalidInvoice(format!(
                "invoice asks for asset {wanted}"
            )));
        }
        if data.expiration_timestamp.is_some_and(|exp| now >= exp) {
            return Err(LedgerError::ExpiredInvoice(data.recipient_id));
        }
        if let Some(amount) = data.amount
            && amount != recipient.assignment.amount()
        {
            return Err(LedgerError::InvalidAmount(format!(
                "invoice asks for {amount}, sending {}",
                recipient.assignment.amount()
            )));
        }

        let transport_endpoints = if !recipient.transport_endpoints.is_empty() {
            recipient.transport_endpoints.clone()
        } else if !data.transport_endpoints.is_empty() {
            data.transport_endpoints
        } else {
            self.transport_endpoints.clone()
        };
        Ok(ResolvedRecipient {
            recipient_id: data.recipient_id,
            assignment: recipient.assignment,
            invoice: Some(raw.to_string()),
            expiration: data.expiration_timestamp,
            transport_endpoints,
        })
    }

    /// Creates one SEND transfer per recipient, all in a new batch.
    ///
    /// The requested amounts are reserved against `spendable` immediately.
    /// Recipients may be bare recipient ids or full invoices.
    pub async fn create_send_transfer(&self, cmd: SendCmd) -> ResultLedger<Vec<i32>> {
        cmd.guards.check("send")?;
        if cmd.recipients.is_empty() {
            return Err(LedgerError::InvalidAmount(
                "a send needs at least one recipient".to_string(),
            ));
        }
        let resolved = cmd
            .recipients
            .iter()
            .map(|r| self.resolve_recipient(&cmd.asset_id, r, cmd.now))
            .collect::<ResultLedger<Vec<_>>>()?;
        let total = checked_sum(resolved.iter().map(|r| r.assignment.amount()), "send total")?;

        let _lease = self.leases.acquire_one(asset_key(&cmd.asset_id))?;
        with_tx!(self, |db_tx| {
            require_asset(&db_tx, &cmd.asset_id).await?;
            let balance = Balance::derive(balance_inputs(&db_tx, &cmd.asset_id).await?);
            if total > balance.spendable {
                return Err(LedgerError::InsufficientFunds(format!(
                    "{} requested, {} spendable",
                    total, balance.spendable
                )));
            }

            let batch_transfer_idx = next_batch_idx(&db_tx).await?;
            let mut created = Vec::with_capacity(resolved.len());
            for recipient in resolved {
                let mut transfer = Transfer::pending(
                    batch_transfer_idx,
                    &cmd.asset_id,
                    TransferKind::Send,
                    cmd.now,
                );
                transfer.recipient_id = Some(recipient.recipient_id);
                transfer.requested_assignment = Some(recipient.assignment);
                transfer.invoice_string = recipient.invoice;
                transfer.expiration = recipient.expiration;
                transfer.transport_endpoints = recipient.transport_endpoints;
                let transfer = insert_transfer(&db_tx, &transfer).await?;
                created.push(transfer.idx);
            }

            refresh_balance(&db_tx, &cmd.asset_id).await?;
            tracing::info!(
                asset_id = %cmd.asset_id,
                batch_transfer_idx,
                total,
                transfers = created.len(),
                "send created"
            );
            Ok(created)
        })
    }

    /// Records an incoming transfer for one of our invoices.
    ///
    /// The invoice must be active and not yet attached. An unknown asset is
    /// registered as a placeholder.
    pub async fn attach_receive(&self, cmd: IncomingTransferCmd) -> ResultLedger<i32> {
        let _lease = self.leases.acquire_one(invoice_key(&cmd.recipient_id))?;
        with_tx!(self, |db_tx| {
            let invoice = require_invoice(&db_tx, &cmd.recipient_id).await?;
            if invoice.is_cancelled() {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "invoice {} is cancelled",
                    invoice.recipient_id
                )));
            }
            if invoice.is_expired(cmd.now) {
                return Err(LedgerError::ExpiredInvoice(invoice.recipient_id));
            }
            if let Some(existing) = transfer_for_recipient(&db_tx, &invoice.recipient_id).await? {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "invoice {} already attached to transfer {}",
                    invoice.recipient_id, existing.idx
                )));
            }
            for assignment in &cmd.assignments {
                if *assignment == Assignment::Any {
                    return Err(LedgerError::InvalidAmount(
                        "received assignments need an amount".to_string(),
                    ));
                }
            }

            let asset_id = cmd
                .asset_id
                .clone()
                .or_else(|| invoice.asset_id.clone())
                .ok_or_else(|| {
                    LedgerError::InvalidInvoice(format!(
                        "no asset known for {}",
                        invoice.recipient_id
                    ))
                })?;
            ensure_asset(&db_tx, &asset_id, 0, cmd.now).await?;

            let mut transfer = Transfer::pending(
                invoice.batch_transfer_idx,
                &asset_id,
                invoice.kind.transfer_kind(),
                cmd.now,
            );
            transfer.recipient_id = Some(invoice.recipient_id.clone());
            transfer.expiration = invoice.expiration_timestamp;
            transfer.requested_assignment = Some(match invoice.amount {
                Some(amount) => Assignment::Fungible { amount },
                None => Assignment::Any,
            });
            transfer.assignments = cmd.assignments.clone();
            transfer.txid = cmd.txid.clone();
            transfer.invoice_string = Some(invoice.invoice.clone());
            transfer.transport_endpoints = invoice.transport_endpoints.clone();
            let transfer = insert_transfer(&db_tx, &transfer).await?;

            refresh_balance(&db_tx, &asset_id).await?;
            tracing::info!(
                transfer_idx = transfer.idx,
                recipient_id = %invoice.recipient_id,
                %asset_id,
                "receive attached"
            );
            Ok(transfer.idx)
        })
    }

    /// WAITING_COUNTERPARTY -> WAITING_CONFIRMATIONS.
    ///
    /// Redelivered acks are reported as [`TransitionOutcome::Duplicate`] and
    /// change nothing.
    pub async fn on_counterparty_ack(
        &self,
        idx: i32,
        ack: CounterpartyAck,
        now: DateTime<Utc>,
    ) -> ResultLedger<TransitionOutcome> {
        if ack.assignments.contains(&Assignment::Any) {
            return Err(LedgerError::InvalidAmount(
                "acknowledged assignments need an amount".to_string(),
            ));
        }
        let _lease = self.leases.acquire_one(transfer_key(idx))?;
        with_tx!(self, |db_tx| {
            let transfer = require_transfer(&db_tx, idx).await?;
            let (transfer, outcome) = advance(
                &db_tx,
                transfer,
                TransferEvent::CounterpartyAck,
                now,
                |t| {
                    if ack.txid.is_some() {
                        t.txid = ack.txid;
                    }
                    if ack.receive_utxo.is_some() {
                        t.receive_utxo = ack.receive_utxo;
                    }
                    if ack.change_utxo.is_some() {
                        t.change_utxo = ack.change_utxo;
                    }
                    if !ack.assignments.is_empty() {
                        t.assignments = ack.assignments;
                    }
                },
            )
            .await?;
            if matches!(outcome, TransitionOutcome::Applied { .. }) {
                refresh_balance(&db_tx, &transfer.asset_id).await?;
            }
            Ok(outcome)
        })
    }

    /// WAITING_CONFIRMATIONS -> SETTLED.
    ///
    /// Settles the allocations on the transfer's receive and change outputs
    /// and, for blinded receives, reconciles the result against the invoice.
    pub async fn on_chain_confirmed(
        &self,
        idx: i32,
        txid: &str,
        now: DateTime<Utc>,
    ) -> ResultLedger<TransitionOutcome> {
        let _lease = self.leases.acquire_one(transfer_key(idx))?;
        with_tx!(self, |db_tx| {
            let transfer = require_transfer(&db_tx, idx).await?;
            if let Some(known) = &transfer.txid
                && known != txid
                && transfer.status.is_waiting()
            {
                tracing::warn!(
                    transfer_idx = idx,
                    known = %known,
                    confirmed = txid,
                    "txid replaced on confirmation"
                );
            }
            let (transfer, outcome) = advance(
                &db_tx,
                transfer,
                TransferEvent::ChainConfirmed,
                now,
                |t| t.txid = Some(txid.to_string()),
            )
            .await?;
            if matches!(outcome, TransitionOutcome::Duplicate { .. }) {
                return Ok(outcome);
            }

            let outpoints: Vec<_> = transfer
                .receive_utxo
                .iter()
                .chain(transfer.change_utxo.iter())
                .cloned()
                .collect();
            let mut touched = mark_allocations_settled(&db_tx, &outpoints).await?;
            touched.insert(transfer.asset_id.clone());
            for asset_id in &touched {
                refresh_balance(&db_tx, asset_id).await?;
            }

            if transfer.kind == TransferKind::ReceiveBlind {
                reconcile(&db_tx, &transfer, now).await?;
            }
            tracing::info!(transfer_idx = idx, txid, "transfer settled");
            Ok(outcome)
        })
    }

    /// Cancels a transfer still waiting for its counterparty.
    ///
    /// A cancelled receive closes its invoice. Any other status fails with
    /// `InvalidStateTransition` and is left as it was.
    pub async fn cancel_transfer(&self, idx: i32, now: DateTime<Utc>) -> ResultLedger<Transfer> {
        let _lease = self.leases.acquire_one(transfer_key(idx))?;
        with_tx!(self, |db_tx| {
            let transfer = require_transfer(&db_tx, idx).await?;
            let (transfer, _) = advance(&db_tx, transfer, TransferEvent::Cancel, now, |t| {
                t.failure_reason = Some("cancelled".to_string());
            })
            .await?;
            close_invoice(&db_tx, &transfer, now).await?;
            refresh_balance(&db_tx, &transfer.asset_id).await?;
            Ok(transfer)
        })
    }

    /// Fails a waiting transfer and releases its reservation.
    pub async fn fail_transfer(
        &self,
        idx: i32,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ResultLedger<TransitionOutcome> {
        let _lease = self.leases.acquire_one(transfer_key(idx))?;
        with_tx!(self, |db_tx| {
            let transfer = require_transfer(&db_tx, idx).await?;
            let (transfer, outcome) =
                advance(&db_tx, transfer, TransferEvent::Fail, now, |t| {
                    t.failure_reason = Some(reason.to_string());
                })
                .await?;
            if matches!(outcome, TransitionOutcome::Applied { .. }) {
                close_invoice(&db_tx, &transfer, now).await?;
                refresh_balance(&db_tx, &transfer.asset_id).await?;
                tracing::info!(transfer_idx = idx, reason, "transfer failed");
            }
            Ok(outcome)
        })
    }

    /// Fails every waiting member of a batch. Returns the failed indexes.
    pub async fn fail_batch(
        &self,
        batch_transfer_idx: i32,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ResultLedger<Vec<i32>> {
        let members = self.batch_members(batch_transfer_idx).await?;
        let waiting: Vec<i32> = members
            .iter()
            .filter(|t| t.status.is_waiting())
            .map(|t| t.idx)
            .collect();
        let _lease = self
            .leases
            .acquire(waiting.iter().map(|idx| transfer_key(*idx)))?;

        with_tx!(self, |db_tx| {
            let mut failed = Vec::with_capacity(waiting.len());
            let mut touched = BTreeSet::new();
            for idx in &waiting {
                let transfer = require_transfer(&db_tx, *idx).await?;
                if !transfer.status.is_waiting() {
                    continue;
                }
                let (transfer, outcome) =
                    advance(&db_tx, transfer, TransferEvent::Fail, now, |t| {
                        t.failure_reason = Some(reason.to_string());
                    })
                    .await?;
                if matches!(outcome, TransitionOutcome::Applied { .. }) {
                    close_invoice(&db_tx, &transfer, now).await?;
                    failed.push(transfer.idx);
                    touched.insert(transfer.asset_id);
                }
            }
            for asset_id in &touched {
                refresh_balance(&db_tx, asset_id).await?;
            }
            tracing::info!(batch_transfer_idx, failed = failed.len(), reason, "batch failed");
            Ok(failed)
        })
    }

    /// A batch is settled only once every member is terminal.
    pub async fn batch_status(&self, batch_transfer_idx: i32) -> ResultLedger<BatchStatus> {
        let members = self.batch_members(batch_transfer_idx).await?;
        Ok(BatchStatus::of(&members))
    }

    async fn batch_members(&self, batch_transfer_idx: i32) -> ResultLedger<Vec<Transfer>> {
        let models = transfers::Entity::find()
            .filter(transfers::Column::BatchTransferIdx.eq(batch_transfer_idx))
            .all(&self.database)
            .await?;
        if models.is_empty() {
            return Err(LedgerError::KeyNotFound(format!(
                "batch {batch_transfer_idx}"
            )));
        }
        models.into_iter().map(Transfer::try_from).collect()
    }
}
