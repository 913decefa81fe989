//! Reconciliation of settled blinded receives against their invoices.
//!
//! A mismatch is evidence, not a correction: the received allocation stays
//! valid and spendable and only the discrepancy is recorded.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    LedgerError, ReceiveUtxoData, ResultLedger, RgbUtxo, Transfer,
    util::{amount_from_db, amount_to_db, checked_sum},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub expected_asset: String,
    pub expected_amount: u64,
    pub actual_asset: String,
    pub actual_amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Ok,
    Mismatch(Mismatch),
    /// Nothing observed yet on the receive output and nothing assigned.
    /// Re-check after the next snapshot.
    Deferred,
}

impl ReconciliationOutcome {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch(_))
    }
}

/// Compare what `expected` promised against what the transfer delivered.
///
/// The delivered side is the transfer's own asset on `receive_utxo`, capped
/// by the counterparty's assignments when it declared any; allocations that
/// were already on the output do not count as delivery. Without an own-asset
/// allocation, a foreign allocation on the output is the evidence, then the
/// assignments alone. With none of these the check is deferred.
pub fn check(
    expected: Option<&ReceiveUtxoData>,
    transfer: &Transfer,
    receive_utxo: Option<&RgbUtxo>,
) -> ResultLedger<ReconciliationOutcome> {
    let Some(expected) = expected else {
        return Ok(ReconciliationOutcome::Ok);
    };

    let assigned = if transfer.assignments.is_empty() {
        None
    } else {
        Some(checked_sum(
            transfer.assignments.iter().map(|a| a.amount()),
            "assignments",
        )?)
    };
    let own = receive_utxo.map_or(0, |utxo| utxo.amount_of(&transfer.asset_id));
    let foreign = receive_utxo.and_then(|utxo| {
        utxo.allocations
            .iter()
            .find(|a| a.asset_id != transfer.asset_id && a.amount > 0)
    });

    let (actual_asset, actual_amount) = if own > 0 {
        let amount = match assigned {
            Some(amount) if amount <= own => amount,
            _ => own,
        };
        (transfer.asset_id.clone(), amount)
    } else if let Some(allocation) = foreign {
        (allocation.asset_id.clone(), allocation.amount)
    } else if let Some(amount) = assigned {
        (transfer.asset_id.clone(), amount)
    } else {
        return Ok(ReconciliationOutcome::Deferred);
    };

    if actual_asset == expected.linked_asset && actual_amount == expected.linked_amount {
        return Ok(ReconciliationOutcome::Ok);
    }

    Ok(ReconciliationOutcome::Mismatch(Mismatch {
        expected_asset: expected.linked_asset.clone(),
        expected_amount: expected.linked_amount,
        actual_asset,
        actual_amount,
    }))
}

/// A recorded mismatch, attached to the settled transfer that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationWarning {
    pub transfer_idx: i32,
    pub recipient_id: String,
    pub mismatch: Mismatch,
    pub detected_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "reconciliation_warnings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub transfer_idx: i32,
    pub recipient_id: String,
    pub expected_asset: String,
    pub expected_amount: i64,
    pub actual_asset: String,
    pub actual_amount: i64,
    pub detected_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&ReconciliationWarning> for ActiveModel {
    type Error = LedgerError;

    fn try_from(value: &ReconciliationWarning) -> Result<Self, Self::Error> {
        Ok(Self {
            transfer_idx: ActiveValue::Set(value.transfer_idx),
            recipient_id: ActiveValue::Set(value.recipient_id.clone()),
            expected_asset: ActiveValue::Set(value.mismatch.expected_asset.clone()),
            expected_amount: ActiveValue::Set(amount_to_db(
                value.mismatch.expected_amount,
                "expected_amount",
            )?),
            actual_asset: ActiveValue::Set(value.mismatch.actual_asset.clone()),
            actual_amount: ActiveValue::Set(amount_to_db(
                value.mismatch.actual_amount,
                "actual_amount",
            )?),
            detected_at: ActiveValue::Set(value.detected_at),
        })
    }
}

impl TryFrom<Model> for ReconciliationWarning {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            transfer_idx: model.transfer_idx,
            recipient_id: model.recipient_id,
            mismatch: Mismatch {
                expected_asset: model.expected_asset,
                expected_amount: amount_from_db(model.expected_amount, "expected_amount")?,
                actual_asset: model.actual_asset,
                actual_amount: amount_from_db(model.actual_amount, "actual_amount")?,
            },
            detected_at: model.detected_at,
        })
    }
}
