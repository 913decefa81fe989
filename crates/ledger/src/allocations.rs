//! Asset allocations bound to UTXOs.
//!
//! Rows are keyed by `<outpoint>#<position>` so replacing an output's
//! allocation list with the same list produces the same rows.

use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    LedgerError, Outpoint,
    util::{amount_from_db, amount_to_db},
};

/// A quantity of one asset bound to a UTXO.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbAllocation {
    pub asset_id: String,
    pub amount: u64,
    /// Confirmed (`true`) or provisional.
    pub settled: bool,
}

pub(crate) fn allocation_id(outpoint: &Outpoint, position: usize) -> String {
    format!("{outpoint}#{position}")
}

/// Position encoded in an allocation id. Malformed ids sort last.
pub(crate) fn position(id: &str) -> usize {
    id.rsplit_once('#')
        .and_then(|(_, pos)| pos.parse().ok())
        .unwrap_or(usize::MAX)
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "allocations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub outpoint: String,
    pub asset_id: String,
    pub amount: i64,
    pub settled: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::utxos::Entity",
        from = "Column::Outpoint",
        to = "super::utxos::Column::Outpoint",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Utxos,
}

impl Related<super::utxos::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Utxos.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    pub(crate) fn from_allocation(
        outpoint: &Outpoint,
        position: usize,
        allocation: &RgbAllocation,
    ) -> Result<Self, LedgerError> {
        Ok(Self {
            id: ActiveValue::Set(allocation_id(outpoint, position)),
            outpoint: ActiveValue::Set(outpoint.to_string()),
            asset_id: ActiveValue::Set(allocation.asset_id.clone()),
            amount: ActiveValue::Set(amount_to_db(allocation.amount, "allocation amount")?),
            settled: ActiveValue::Set(allocation.settled),
        })
    }
}

impl TryFrom<Model> for RgbAllocation {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            amount: amount_from_db(model.amount, "allocation amount")?,
            asset_id: model.asset_id,
            settled: model.settled,
        })
    }
}
