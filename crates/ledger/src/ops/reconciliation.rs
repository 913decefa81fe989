use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, QueryOrder, TransactionTrait, prelude::*};

use crate::{
    LedgerError, ReceiveUtxoData, ReconciliationOutcome, ReconciliationWarning, ResultLedger,
    Transfer, TransferKind, TransferStatus, receive_data,
    reconciliation::{self, check},
};

use super::{Ledger, load_utxo, require_transfer, with_tx};

/// Run the check for a settled blinded receive and record the verdict.
///
/// A mismatch replaces the transfer's warning row; a clean result removes
/// it. A deferred check writes nothing. The received allocations are left
/// exactly as they are.
pub(super) async fn reconcile<C: ConnectionTrait>(
    db: &C,
    transfer: &Transfer,
    now: DateTime<Utc>,
) -> ResultLedger<ReconciliationOutcome> {
    let Some(recipient_id) = transfer.recipient_id.as_deref() else {
        return Ok(ReconciliationOutcome::Ok);
    };
    let expected = receive_data::Entity::find_by_id(recipient_id.to_string())
        .one(db)
        .await?
        .map(ReceiveUtxoData::try_from)
        .transpose()?;
    let receive_utxo = match &transfer.receive_utxo {
        Some(outpoint) => load_utxo(db, outpoint).await?,
        None => None,
    };

    let outcome = check(expected.as_ref(), transfer, receive_utxo.as_ref())?;
    match &outcome {
        ReconciliationOutcome::Mismatch(mismatch) => {
            tracing::warn!(
                transfer_idx = transfer.idx,
                recipient_id,
                expected_asset = %mismatch.expected_asset,
                expected_amount = mismatch.expected_amount,
                actual_asset = %mismatch.actual_asset,
                actual_amount = mismatch.actual_amount,
                "received allocation does not match invoice"
            );
            let warning = ReconciliationWarning {
                transfer_idx: transfer.idx,
                recipient_id: recipient_id.to_string(),
                mismatch: mismatch.clone(),
                detected_at: now,
            };
            reconciliation::Entity::delete_by_id(transfer.idx)
                .exec(db)
                .await?;
            reconciliation::ActiveModel::try_from(&warning)?
                .insert(db)
                .await?;
        }
        ReconciliationOutcome::Ok => {
            let removed = reconciliation::Entity::delete_by_id(transfer.idx)
                .exec(db)
                .await?;
            if removed.rows_affected > 0 {
                tracing::info!(transfer_idx = transfer.idx, "reconciliation warning cleared");
            }
        }
        ReconciliationOutcome::Deferred => {
            tracing::debug!(
                transfer_idx = transfer.idx,
                "receive output not observed yet, reconciliation deferred"
            );
        }
    }
    Ok(outcome)
}

impl Ledger {
    /// Re-runs reconciliation for a settled blinded receive.
    pub async fn check_transfer(
        &self,
        idx: i32,
        now: DateTime<Utc>,
    ) -> ResultLedger<ReconciliationOutcome> {
        with_tx!(self, |db_tx| {
            let transfer = require_transfer(&db_tx, idx).await?;
            if transfer.kind != TransferKind::ReceiveBlind
                || transfer.status != TransferStatus::Settled
            {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "transfer {idx} is not a settled blinded receive"
                )));
            }
            reconcile(&db_tx, &transfer, now).await
        })
    }

    /// Recorded mismatches, most recent first.
    pub async fn get_reconciliation_warnings(&self) -> ResultLedger<Vec<ReconciliationWarning>> {
        reconciliation::Entity::find()
            .order_by_desc(reconciliation::Column::DetectedAt)
            .order_by_desc(reconciliation::Column::TransferIdx)
            .all(&self.database)
            .await?
            .into_iter()
            .map(ReconciliationWarning::try_from)
            .collect()
    }
}
