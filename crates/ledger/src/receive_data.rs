//! What an invoice issuer expected to receive, keyed by `recipient_id`.
//!
//! Written only when both asset and amount were known at issuance. Read
//! exclusively by reconciliation.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    LedgerError,
    util::{amount_from_db, amount_to_db},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveUtxoData {
    pub recipient_id: String,
    pub linked_asset: String,
    pub linked_amount: u64,
    pub invoice: String,
    pub batch_transfer_idx: i32,
    pub expiration_timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "receive_utxo_data")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub recipient_id: String,
    pub linked_asset: String,
    pub linked_amount: i64,
    pub invoice: String,
    pub batch_transfer_idx: i32,
    pub expiration_timestamp: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&ReceiveUtxoData> for ActiveModel {
    type Error = LedgerError;

    fn try_from(value: &ReceiveUtxoData) -> Result<Self, Self::Error> {
        Ok(Self {
            recipient_id: ActiveValue::Set(value.recipient_id.clone()),
            linked_asset: ActiveValue::Set(value.linked_asset.clone()),
            linked_amount: ActiveValue::Set(amount_to_db(value.linked_amount, "linked_amount")?),
            invoice: ActiveValue::Set(value.invoice.clone()),
            batch_transfer_idx: ActiveValue::Set(value.batch_transfer_idx),
            expiration_timestamp: ActiveValue::Set(value.expiration_timestamp),
        })
    }
}

impl TryFrom<Model> for ReceiveUtxoData {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            linked_amount: amount_from_db(model.linked_amount, "linked_amount")?,
            recipient_id: model.recipient_id,
            linked_asset: model.linked_asset,
            invoice: model.invoice,
            batch_transfer_idx: model.batch_transfer_idx,
            expiration_timestamp: model.expiration_timestamp,
        })
    }
}
