//! Bitcoin outputs known to the wallet.
//!
//! A [`RgbUtxo`] is identified by its [`Outpoint`]. Allocations hang off it
//! (see [`crate::allocations`]).

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    LedgerError, RgbAllocation,
    util::{amount_from_db, amount_to_db},
};

/// A transaction output reference, rendered as `<txid>:<vout>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    pub txid: String,
    pub vout: u32,
}

impl Outpoint {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl FromStr for Outpoint {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s
            .rsplit_once(':')
            .ok_or_else(|| LedgerError::KeyNotFound(format!("malformed outpoint {s}")))?;
        if txid.is_empty() {
            return Err(LedgerError::KeyNotFound(format!("malformed outpoint {s}")));
        }
        let vout = vout
            .parse::<u32>()
            .map_err(|_| LedgerError::KeyNotFound(format!("malformed outpoint {s}")))?;
        Ok(Self::new(txid, vout))
    }
}

/// Coloring class of a UTXO.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtxoClass {
    /// Colorable and carries at least one asset allocation.
    Colored,
    /// Colorable with no allocation yet.
    Colorable,
    /// Cannot carry allocations.
    Uncolored,
}

/// A Bitcoin output with the allocations it carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbUtxo {
    pub outpoint: Outpoint,
    pub btc_amount: u64,
    pub colorable: bool,
    pub exists: bool,
    pub allocations: Vec<RgbAllocation>,
}

impl RgbUtxo {
    /// Classify the output by its coloring state.
    pub fn classify(&self) -> UtxoClass {
        if !self.colorable {
            return UtxoClass::Uncolored;
        }
        if self.allocations.iter().any(|a| !a.asset_id.is_empty()) {
            UtxoClass::Colored
        } else {
            UtxoClass::Colorable
        }
    }

    /// Sum of allocations for `asset_id`, settled or not.
    pub fn amount_of(&self, asset_id: &str) -> u64 {
        self.allocations
            .iter()
            .filter(|a| a.asset_id == asset_id)
            .fold(0u64, |acc, a| acc.saturating_add(a.amount))
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "utxos")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub outpoint: String,
    pub txid: String,
    pub vout: i64,
    pub btc_amount: i64,
    pub colorable: bool,
    pub exists: bool,
    pub first_seen_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::allocations::Entity")]
    Allocations,
}

impl Related<super::allocations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    pub(crate) fn from_utxo(utxo: &RgbUtxo, first_seen_at: DateTime<Utc>) -> Result<Self, LedgerError> {
        Ok(Self {
            outpoint: ActiveValue::Set(utxo.outpoint.to_string()),
            txid: ActiveValue::Set(utxo.outpoint.txid.clone()),
            vout: ActiveValue::Set(i64::from(utxo.outpoint.vout)),
            btc_amount: ActiveValue::Set(amount_to_db(utxo.btc_amount, "btc_amount")?),
            colorable: ActiveValue::Set(utxo.colorable),
            exists: ActiveValue::Set(utxo.exists),
            first_seen_at: ActiveValue::Set(first_seen_at),
        })
    }
}

impl TryFrom<(Model, Vec<RgbAllocation>)> for RgbUtxo {
    type Error = LedgerError;

    fn try_from((model, allocations): (Model, Vec<RgbAllocation>)) -> Result<Self, Self::Error> {
        let vout = u32::try_from(model.vout)
            .map_err(|_| LedgerError::KeyNotFound(format!("malformed outpoint {}", model.outpoint)))?;
        Ok(Self {
            outpoint: Outpoint::new(model.txid, vout),
            btc_amount: amount_from_db(model.btc_amount, "btc_amount")?,
            colorable: model.colorable,
            exists: model.exists,
            allocations,
        })
    }
}
