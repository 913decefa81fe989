use sea_orm::{ActiveValue, ConnectionTrait, JoinType, QueryFilter, QuerySelect, prelude::*};

use crate::{
    Balance, BalanceInputs, ResultLedger, Transfer, TransferKind, allocations, assets, transfers,
    util::{amount_from_db, amount_to_db, checked_sum},
    utxos,
};

use super::{Ledger, assets::require_asset, waiting_statuses};

impl Ledger {
    /// Derives the balance of `asset_id` from the allocation ledger and the
    /// transfers still in flight. Reads only.
    pub async fn compute_balance(&self, asset_id: &str) -> ResultLedger<Balance> {
        let asset = require_asset(&self.database, asset_id).await?;
        let inputs = balance_inputs(&self.database, asset_id).await?;
        Ok(Balance::derive(inputs).with_offchain(
            asset
                .offchain_inbound
                .map(|v| amount_from_db(v, "offchain_inbound"))
                .transpose()?,
            asset
                .offchain_outbound
                .map(|v| amount_from_db(v, "offchain_outbound"))
                .transpose()?,
        ))
    }
}

pub(super) async fn balance_inputs<C: ConnectionTrait>(
    db: &C,
    asset_id: &str,
) -> ResultLedger<BalanceInputs> {
    let settled_models = allocations::Entity::find()
        .join(JoinType::InnerJoin, allocations::Relation::Utxos.def())
        .filter(allocations::Column::AssetId.eq(asset_id.to_string()))
        .filter(allocations::Column::Settled.eq(true))
        .filter(utxos::Column::Exists.eq(true))
        .all(db)
        .await?;
    let settled_amounts = settled_models
        .iter()
        .map(|m| amount_from_db(m.amount, "allocation amount"))
        .collect::<ResultLedger<Vec<u64>>>()?;

    let in_flight = transfers::Entity::find()
        .filter(transfers::Column::AssetId.eq(asset_id.to_string()))
        .filter(transfers::Column::Status.is_in(waiting_statuses()))
        .all(db)
        .await?;

    let mut inbound = Vec::new();
    let mut outbound = Vec::new();
    let mut reserved = Vec::new();
    for model in in_flight {
        let transfer = Transfer::try_from(model)?;
        match transfer.kind {
            TransferKind::ReceiveBlind | TransferKind::ReceiveWitness => {
                inbound.push(transfer.implied_amount()?);
            }
            TransferKind::Send => {
                outbound.push(transfer.requested_amount());
                reserved.push(transfer.reserved_amount());
            }
            TransferKind::Issuance => {}
        }
    }

    Ok(BalanceInputs {
        settled: checked_sum(settled_amounts, "settled")?,
        inbound: checked_sum(inbound, "inbound")?,
        outbound: checked_sum(outbound, "outbound")?,
        reserved: checked_sum(reserved, "reserved")?,
    })
}

/// Recompute the balance of `asset_id` and write it onto the asset row.
///
/// Auto-registered assets have their supply raised to what is settled.
pub(super) async fn refresh_balance<C: ConnectionTrait>(
    db: &C,
    asset_id: &str,
) -> ResultLedger<Balance> {
    let asset = require_asset(db, asset_id).await?;
    let inputs = balance_inputs(db, asset_id).await?;
    let balance = Balance::derive(inputs).with_offchain(
        asset
            .offchain_inbound
            .map(|v| amount_from_db(v, "offchain_inbound"))
            .transpose()?,
        asset
            .offchain_outbound
            .map(|v| amount_from_db(v, "offchain_outbound"))
            .transpose()?,
    );

    let issued_supply = amount_from_db(asset.issued_supply, "issued_supply")?;
    let mut active = assets::ActiveModel {
        asset_id: ActiveValue::Set(asset.asset_id.clone()),
        settled: ActiveValue::Set(amount_to_db(balance.settled, "settled")?),
        future: ActiveValue::Set(amount_to_db(balance.future, "future")?),
        spendable: ActiveValue::Set(amount_to_db(balance.spendable, "spendable")?),
        ..Default::default()
    };
    if balance.settled > issued_supply {
        if asset.auto_registered {
            active.issued_supply =
                ActiveValue::Set(amount_to_db(balance.settled, "issued_supply")?);
        } else {
            tracing::warn!(
                asset_id,
                settled = balance.settled,
                issued_supply,
                "settled balance above issued supply"
            );
        }
    }
    active.update(db).await?;

    tracing::debug!(
        asset_id,
        settled = balance.settled,
        future = balance.future,
        spendable = balance.spendable,
        "balance refreshed"
    );
    Ok(balance)
}
