//! Read-only projections. Nothing here writes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::{QueryFilter, QueryOrder, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    Asset, Balance, Invoice, ResultLedger, RgbAllocation, RgbUtxo, Transfer, UtxoClass,
    Visibility, allocations, assets, invoices, transfers, utxos,
};

use super::{Ledger, assets::require_asset, require_transfer};

/// Which assets a listing returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetFilter {
    #[default]
    Visible,
    Hidden,
    All,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedUtxo {
    pub class: UtxoClass,
    pub utxo: RgbUtxo,
}

impl Ledger {
    /// Invoices neither expired at `now` nor cancelled, newest first.
    pub async fn list_active_invoices(&self, now: DateTime<Utc>) -> ResultLedger<Vec<Invoice>> {
        Ok(self
            .list_invoices()
            .await?
            .into_iter()
            .filter(|invoice| invoice.is_active(now))
            .collect())
    }

    /// Every invoice ever issued, newest first.
    pub async fn list_invoices(&self) -> ResultLedger<Vec<Invoice>> {
        invoices::Entity::find()
            .order_by_desc(invoices::Column::CreatedAt)
            .order_by_desc(invoices::Column::BatchTransferIdx)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Invoice::try_from)
            .collect()
    }

    pub async fn invoice(&self, recipient_id: &str) -> ResultLedger<Invoice> {
        super::require_invoice(&self.database, recipient_id).await
    }

    /// All known UTXOs with their allocations, ordered by outpoint.
    pub async fn list_utxos(&self) -> ResultLedger<Vec<RgbUtxo>> {
        let utxo_models = utxos::Entity::find()
            .order_by_asc(utxos::Column::Outpoint)
            .all(&self.database)
            .await?;
        let mut allocation_models = allocations::Entity::find().all(&self.database).await?;
        allocation_models.sort_by_key(|m| allocations::position(&m.id));

        let mut by_outpoint: HashMap<String, Vec<RgbAllocation>> = HashMap::new();
        for model in allocation_models {
            let outpoint = model.outpoint.clone();
            by_outpoint
                .entry(outpoint)
                .or_default()
                .push(RgbAllocation::try_from(model)?);
        }

        utxo_models
            .into_iter()
            .map(|model| {
                let allocations = by_outpoint.remove(&model.outpoint).unwrap_or_default();
                RgbUtxo::try_from((model, allocations))
            })
            .collect()
    }

    pub async fn classify_utxos(&self) -> ResultLedger<Vec<ClassifiedUtxo>> {
        Ok(self
            .list_utxos()
            .await?
            .into_iter()
            .map(|utxo| ClassifiedUtxo {
                class: utxo.classify(),
                utxo,
            })
            .collect())
    }

    pub async fn utxos_by_class(&self, class: UtxoClass) -> ResultLedger<Vec<RgbUtxo>> {
        Ok(self
            .list_utxos()
            .await?
            .into_iter()
            .filter(|utxo| utxo.classify() == class)
            .collect())
    }

    /// The balance stored with the asset, refreshed by every mutation.
    pub async fn get_balance(&self, asset_id: &str) -> ResultLedger<Balance> {
        let asset = Asset::try_from(require_asset(&self.database, asset_id).await?)?;
        Ok(asset.balance)
    }

    /// Transfer history of an asset, newest first.
    pub async fn list_transfers(&self, asset_id: &str) -> ResultLedger<Vec<Transfer>> {
        require_asset(&self.database, asset_id).await?;
        transfers::Entity::find()
            .filter(transfers::Column::AssetId.eq(asset_id.to_string()))
            .order_by_desc(transfers::Column::CreatedAt)
            .order_by_desc(transfers::Column::Idx)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Transfer::try_from)
            .collect()
    }

    pub async fn transfer(&self, idx: i32) -> ResultLedger<Transfer> {
        require_transfer(&self.database, idx).await
    }

    /// Assets matching `filter`, oldest registration first.
    pub async fn list_assets(&self, filter: AssetFilter) -> ResultLedger<Vec<Asset>> {
        let mut query = assets::Entity::find();
        match filter {
            AssetFilter::Visible => {
                query = query.filter(assets::Column::Visibility.eq(Visibility::Default.as_str()));
            }
            AssetFilter::Hidden => {
                query = query.filter(assets::Column::Visibility.eq(Visibility::Hidden.as_str()));
            }
            AssetFilter::All => {}
        }
        query
            .order_by_asc(assets::Column::AddedAt)
            .order_by_asc(assets::Column::AssetId)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Asset::try_from)
            .collect()
    }
}
