use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, ConnectionTrait, TransactionTrait, prelude::*};

use crate::{
    Asset, Assignment, Balance, LedgerError, NewAsset, ResultLedger, RgbAllocation, Transfer,
    TransferKind, TransferStatus, Visibility, allocations, assets,
    lease::asset_key,
    util::{amount_from_db, amount_to_db, normalize_optional_text},
};

use super::{
    Ledger, balances::refresh_balance, insert_transfer, load_utxo, next_batch_idx, with_tx,
};

pub(super) async fn require_asset<C: ConnectionTrait>(
    db: &C,
    asset_id: &str,
) -> ResultLedger<assets::Model> {
    assets::Entity::find_by_id(asset_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| LedgerError::KeyNotFound(format!("asset {asset_id}")))
}

/// Make sure `asset_id` is registered, creating a placeholder if needed.
///
/// A placeholder's supply is raised to `observed_supply` when it grows.
/// Returns `true` when the asset was created.
pub(super) async fn ensure_asset<C: ConnectionTrait>(
    db: &C,
    asset_id: &str,
    observed_supply: u64,
    now: DateTime<Utc>,
) -> ResultLedger<bool> {
    match assets::Entity::find_by_id(asset_id.to_string()).one(db).await? {
        Some(model) => {
            if model.auto_registered
                && observed_supply > amount_from_db(model.issued_supply, "issued_supply")?
            {
                let active = assets::ActiveModel {
                    asset_id: ActiveValue::Set(model.asset_id),
                    issued_supply: ActiveValue::Set(amount_to_db(
                        observed_supply,
                        "issued_supply",
                    )?),
                    ..Default::default()
                };
                active.update(db).await?;
            }
            Ok(false)
        }
        None => {
            let asset = Asset::observed(asset_id, observed_supply, now);
            assets::ActiveModel::try_from(&asset)?.insert(db).await?;
            tracing::info!(asset_id, observed_supply, "asset auto-registered");
            Ok(true)
        }
    }
}

fn validate_new_asset(new: &NewAsset) -> ResultLedger<()> {
    if new.asset_id.trim().is_empty() {
        return Err(LedgerError::KeyNotFound("asset id must not be empty".to_string()));
    }
    if new.issued_supply == 0 {
        return Err(LedgerError::InvalidAmount(
            "issued supply must be > 0".to_string(),
        ));
    }
    amount_to_db(new.issued_supply, "issued_supply")?;
    Ok(())
}

/// Insert `new`, or promote an auto-registered placeholder to it.
async fn upsert_registration<C: ConnectionTrait>(
    db: &C,
    new: &NewAsset,
    now: DateTime<Utc>,
) -> ResultLedger<()> {
    let existing = assets::Entity::find_by_id(new.asset_id.clone()).one(db).await?;
    let added_at = match &existing {
        Some(model) if !model.auto_registered => {
            return Err(LedgerError::ExistingKey(new.asset_id.clone()));
        }
        Some(model) => {
            let settled = amount_from_db(model.settled, "settled")?;
            if settled > new.issued_supply {
                return Err(LedgerError::InvalidAmount(format!(
                    "issued supply {} below settled {settled}",
                    new.issued_supply
                )));
            }
            model.added_at
        }
        None => now,
    };

    let asset = Asset {
        asset_id: new.asset_id.clone(),
        kind: new.kind,
        name: new.name.trim().to_string(),
        ticker: normalize_optional_text(new.ticker.as_deref()),
        details: normalize_optional_text(new.details.as_deref()),
        precision: new.precision,
        issued_supply: new.issued_supply,
        visibility: Visibility::Default,
        schema_id: normalize_optional_text(new.schema_id.as_deref()),
        issued_at: None,
        added_at,
        auto_registered: false,
        balance: Balance::default(),
        transfers: Vec::new(),
    };
    let mut active = assets::ActiveModel::try_from(&asset)?;
    match existing {
        Some(model) => {
            // Keep the visibility and cached balance of the placeholder.
            active.visibility = ActiveValue::NotSet;
            active.settled = ActiveValue::NotSet;
            active.future = ActiveValue::NotSet;
            active.spendable = ActiveValue::NotSet;
            active.offchain_inbound = ActiveValue::NotSet;
            active.offchain_outbound = ActiveValue::NotSet;
            active.asset_id = ActiveValue::Set(model.asset_id);
            active.update(db).await?;
        }
        None => {
            active.insert(db).await?;
        }
    }
    Ok(())
}

impl Ledger {
    /// Return an asset with its cached balance and transfer history.
    pub async fn asset(&self, asset_id: &str) -> ResultLedger<Asset> {
        let mut asset = Asset::try_from(require_asset(&self.database, asset_id).await?)?;
        asset.transfers = self.list_transfers(asset_id).await?;
        Ok(asset)
    }

    /// Registers an asset imported from elsewhere (no local issuance).
    ///
    /// Fails with `ExistingKey` when the asset is already registered; an
    /// auto-registered placeholder is promoted instead.
    pub async fn register_asset(&self, new: NewAsset, now: DateTime<Utc>) -> ResultLedger<Asset> {
        validate_new_asset(&new)?;
        let _lease = self.leases.acquire_one(asset_key(&new.asset_id))?;
        with_tx!(self, |db_tx| {
            upsert_registration(&db_tx, &new, now).await?;
            refresh_balance(&db_tx, &new.asset_id).await?;
            let asset = Asset::try_from(require_asset(&db_tx, &new.asset_id).await?)?;
            tracing::info!(asset_id = %asset.asset_id, "asset registered");
            Ok(asset)
        })
    }

    /// Registers a locally issued asset and records its ISSUANCE transfer.
    ///
    /// The transfer is stored directly as `SETTLED`. When `issue_utxo` names
    /// a known colorable output, the issued supply is allocated on it.
    pub async fn record_issuance(
        &self,
        new: NewAsset,
        now: DateTime<Utc>,
    ) -> ResultLedger<Transfer> {
        validate_new_asset(&new)?;
        let _lease = self.leases.acquire_one(asset_key(&new.asset_id))?;
        with_tx!(self, |db_tx| {
            upsert_registration(&db_tx, &new, now).await?;
            let active = assets::ActiveModel {
                asset_id: ActiveValue::Set(new.asset_id.clone()),
                issued_at: ActiveValue::Set(Some(now)),
                ..Default::default()
            };
            active.update(&db_tx).await?;

            if let Some(outpoint) = &new.issue_utxo {
                match load_utxo(&db_tx, outpoint).await? {
                    Some(utxo) if utxo.colorable => {
                        let allocation = RgbAllocation {
                            asset_id: new.asset_id.clone(),
                            amount: new.issued_supply,
                            settled: true,
                        };
                        allocations::ActiveModel::from_allocation(
                            outpoint,
                            utxo.allocations.len(),
                            &allocation,
                        )?
                        .insert(&db_tx)
                        .await?;
                    }
                    Some(_) => {
                        return Err(LedgerError::InvalidAmount(format!(
                            "issue utxo {outpoint} is not colorable"
                        )));
                    }
                    None => {
                        tracing::debug!(%outpoint, "issue utxo not synced yet");
                    }
                }
            }

            let assignment = Assignment::Fungible {
                amount: new.issued_supply,
            };
            let mut transfer = Transfer::pending(
                next_batch_idx(&db_tx).await?,
                &new.asset_id,
                TransferKind::Issuance,
                now,
            );
            transfer.status = TransferStatus::Settled;
            transfer.requested_assignment = Some(assignment);
            transfer.assignments = vec![assignment];
            transfer.receive_utxo = new.issue_utxo.clone();
            let transfer = insert_transfer(&db_tx, &transfer).await?;

            refresh_balance(&db_tx, &new.asset_id).await?;
            tracing::info!(
                asset_id = %new.asset_id,
                issued_supply = new.issued_supply,
                transfer_idx = transfer.idx,
                "asset issued"
            );
            Ok(transfer)
        })
    }

    /// Hide or unhide an asset. Assets are never deleted.
    pub async fn set_asset_visibility(
        &self,
        asset_id: &str,
        visibility: Visibility,
    ) -> ResultLedger<()> {
        with_tx!(self, |db_tx| {
            require_asset(&db_tx, asset_id).await?;
            let active = assets::ActiveModel {
                asset_id: ActiveValue::Set(asset_id.to_string()),
                visibility: ActiveValue::Set(visibility.as_str().to_string()),
                ..Default::default()
            };
            active.update(&db_tx).await?;
            Ok(())
        })
    }

    /// Store the off-chain (channel) balance figures reported by the node.
    pub async fn record_offchain_balance(
        &self,
        asset_id: &str,
        inbound: Option<u64>,
        outbound: Option<u64>,
    ) -> ResultLedger<Balance> {
        let _lease = self.leases.acquire_one(asset_key(asset_id))?;
        with_tx!(self, |db_tx| {
            require_asset(&db_tx, asset_id).await?;
            let active = assets::ActiveModel {
                asset_id: ActiveValue::Set(asset_id.to_string()),
                offchain_inbound: ActiveValue::Set(
                    inbound
                        .map(|v| amount_to_db(v, "offchain_inbound"))
                        .transpose()?,
                ),
                offchain_outbound: ActiveValue::Set(
                    outbound
                        .map(|v| amount_to_db(v, "offchain_outbound"))
                        .transpose()?,
                ),
                ..Default::default()
            };
            active.update(&db_tx).await?;
            refresh_balance(&db_tx, asset_id).await
        })
    }
}
