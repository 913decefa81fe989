use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, ConnectionTrait, QueryFilter, TransactionTrait, prelude::*};

use crate::{
    ChainSnapshot, LedgerError, Outpoint, ResultLedger, SnapshotReport, SyncStatus, allocations,
    assets,
    lease::CHAIN_KEY,
    snapshot::{self, CHAIN_STATE_ID, SupplyCap},
    util::{amount_from_db, amount_to_db},
    utxos,
};

use super::{
    Ledger,
    assets::ensure_asset,
    balances::{balance_inputs, refresh_balance},
    with_tx,
};

impl Ledger {
    /// Replaces the local UTXO set with the node's snapshot.
    ///
    /// The snapshot is the full view: outputs missing from it, or reported
    /// as spent, are pruned with their allocations. Every other output gets
    /// exactly the snapshot's allocation list. Entries that cannot be
    /// attributed are dropped, reported and mark the ledger stale.
    ///
    /// Applying the same snapshot twice leaves the same state.
    pub async fn apply_chain_snapshot(
        &self,
        snapshot: &ChainSnapshot,
        now: DateTime<Utc>,
    ) -> ResultLedger<SnapshotReport> {
        let _lease = self.leases.acquire_one(CHAIN_KEY.to_string())?;
        with_tx!(self, |db_tx| {
            let asset_models = assets::Entity::find().all(&db_tx).await?;
            let mut caps = HashMap::with_capacity(asset_models.len());
            for model in &asset_models {
                caps.insert(
                    model.asset_id.clone(),
                    SupplyCap {
                        issued_supply: amount_from_db(model.issued_supply, "issued_supply")?,
                        auto_registered: model.auto_registered,
                    },
                );
            }
            let plan = snapshot::plan(snapshot, &caps);

            let mut report = SnapshotReport::default();
            for (asset_id, observed) in &plan.observed_supply {
                if ensure_asset(&db_tx, asset_id, *observed, now).await? {
                    report.assets_registered.push(asset_id.clone());
                }
            }

            let keep: HashSet<String> = plan
                .utxos
                .iter()
                .map(|u| u.outpoint.to_string())
                .collect();
            let known = utxos::Entity::find().all(&db_tx).await?;
            let mut first_seen: HashMap<String, DateTime<Utc>> = HashMap::new();
            for model in known {
                if keep.contains(&model.outpoint) {
                    first_seen.insert(model.outpoint, model.first_seen_at);
                    continue;
                }
                allocations::Entity::delete_many()
                    .filter(allocations::Column::Outpoint.eq(model.outpoint.clone()))
                    .exec(&db_tx)
                    .await?;
                utxos::Entity::delete_by_id(model.outpoint.clone())
                    .exec(&db_tx)
                    .await?;
                tracing::debug!(outpoint = %model.outpoint, "utxo pruned");
                report.utxos_pruned += 1;
            }

            for utxo in &plan.utxos {
                let key = utxo.outpoint.to_string();
                match first_seen.get(&key) {
                    Some(seen) => {
                        utxos::ActiveModel::from_utxo(utxo, *seen)?
                            .update(&db_tx)
                            .await?;
                    }
                    None => {
                        utxos::ActiveModel::from_utxo(utxo, now)?
                            .insert(&db_tx)
                            .await?;
                    }
                }
                allocations::Entity::delete_many()
                    .filter(allocations::Column::Outpoint.eq(key))
                    .exec(&db_tx)
                    .await?;
                for (position, allocation) in utxo.allocations.iter().enumerate() {
                    allocations::ActiveModel::from_allocation(&utxo.outpoint, position, allocation)?
                        .insert(&db_tx)
                        .await?;
                    report.allocations_applied += 1;
                }
                report.utxos_upserted += 1;
            }

            let mut touched: BTreeSet<String> =
                asset_models.into_iter().map(|m| m.asset_id).collect();
            touched.extend(report.assets_registered.iter().cloned());
            for asset_id in &touched {
                refresh_balance(&db_tx, asset_id).await?;
            }

            for dropped in &plan.dropped {
                tracing::warn!(
                    outpoint = %dropped.outpoint,
                    asset_id = dropped.asset_id.as_deref().unwrap_or("-"),
                    amount = dropped.amount,
                    reason = ?dropped.reason,
                    "snapshot allocation dropped"
                );
            }
            report.dropped = plan.dropped;
            write_sync_state(&db_tx, &report, now).await?;

            tracing::info!(
                upserted = report.utxos_upserted,
                pruned = report.utxos_pruned,
                allocations = report.allocations_applied,
                dropped = report.dropped.len(),
                registered = report.assets_registered.len(),
                "chain snapshot applied"
            );
            Ok(report)
        })
    }

    /// Freshness of the allocation ledger.
    pub async fn ledger_status(&self) -> ResultLedger<SyncStatus> {
        snapshot::Entity::find_by_id(CHAIN_STATE_ID.to_string())
            .one(&self.database)
            .await?
            .map_or_else(|| Ok(SyncStatus::default()), SyncStatus::try_from)
    }
}

async fn write_sync_state<C: ConnectionTrait>(
    db: &C,
    report: &SnapshotReport,
    now: DateTime<Utc>,
) -> ResultLedger<()> {
    let dropped = u64::try_from(report.dropped.len())
        .map_err(|_| LedgerError::InvalidAmount("dropped count overflow".to_string()))?;
    let active = snapshot::ActiveModel {
        id: ActiveValue::Set(CHAIN_STATE_ID.to_string()),
        last_snapshot_at: ActiveValue::Set(Some(now)),
        stale: ActiveValue::Set(report.is_stale()),
        dropped_allocations: ActiveValue::Set(amount_to_db(dropped, "dropped_allocations")?),
    };
    let exists = snapshot::Entity::find_by_id(CHAIN_STATE_ID.to_string())
        .one(db)
        .await?
        .is_some();
    if exists {
        active.update(db).await?;
    } else {
        active.insert(db).await?;
    }
    Ok(())
}

/// Mark the allocations on `outpoints` settled after a confirmation.
///
/// An allocation that would lift a registered asset above its issued supply
/// stays provisional. Returns the assets whose allocations changed.
pub(super) async fn mark_allocations_settled<C: ConnectionTrait>(
    db: &C,
    outpoints: &[Outpoint],
) -> ResultLedger<BTreeSet<String>> {
    let mut touched = BTreeSet::new();
    let mut headroom: HashMap<String, Option<u64>> = HashMap::new();

    for outpoint in outpoints {
        let pending = allocations::Entity::find()
            .filter(allocations::Column::Outpoint.eq(outpoint.to_string()))
            .filter(allocations::Column::Settled.eq(false))
            .all(db)
            .await?;
        for model in pending {
            let amount = amount_from_db(model.amount, "allocation amount")?;
            let room = match headroom.get(&model.asset_id) {
                Some(room) => *room,
                None => {
                    let room = supply_headroom(db, &model.asset_id).await?;
                    headroom.insert(model.asset_id.clone(), room);
                    room
                }
            };
            if let Some(room) = room {
                if amount > room {
                    tracing::warn!(
                        %outpoint,
                        asset_id = %model.asset_id,
                        amount,
                        "allocation left provisional: above issued supply"
                    );
                    continue;
                }
                headroom.insert(model.asset_id.clone(), Some(room - amount));
            }

            let active = allocations::ActiveModel {
                id: ActiveValue::Set(model.id),
                settled: ActiveValue::Set(true),
                ..Default::default()
            };
            active.update(db).await?;
            touched.insert(model.asset_id);
        }
    }
    Ok(touched)
}

/// Remaining settle-able supply of a registered asset; `None` when the
/// asset's supply is not authoritative.
async fn supply_headroom<C: ConnectionTrait>(db: &C, asset_id: &str) -> ResultLedger<Option<u64>> {
    let Some(model) = assets::Entity::find_by_id(asset_id.to_string()).one(db).await? else {
        return Ok(None);
    };
    if model.auto_registered {
        return Ok(None);
    }
    let supply = amount_from_db(model.issued_supply, "issued_supply")?;
    let settled = balance_inputs(db, asset_id).await?.settled;
    Ok(Some(supply.saturating_sub(settled)))
}
