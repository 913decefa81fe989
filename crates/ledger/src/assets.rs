//! The module contains `Asset` struct and its storage model.
//!
//! An asset is created on issuance or on the first allocation/receive that
//! names it. It is never deleted; hiding it only moves it out of the default
//! listings.

use chrono::{DateTime, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    Balance, LedgerError, ResultLedger, Transfer,
    util::{amount_from_db, amount_to_db},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Fungible coin (NIA).
    Coin,
    /// Single-edition collectible (CFA).
    Collectible,
    /// Unique digital asset.
    Uda,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coin => "coin",
            Self::Collectible => "collectible",
            Self::Uda => "uda",
        }
    }
}

impl TryFrom<&str> for AssetKind {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "coin" => Ok(Self::Coin),
            "collectible" => Ok(Self::Collectible),
            "uda" => Ok(Self::Uda),
            other => Err(LedgerError::KeyNotFound(format!("asset kind {other}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Default,
    Hidden,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Hidden => "hidden",
        }
    }
}

impl TryFrom<&str> for Visibility {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "default" => Ok(Self::Default),
            "hidden" => Ok(Self::Hidden),
            other => Err(LedgerError::KeyNotFound(format!("visibility {other}"))),
        }
    }
}

/// An RGB asset tracked by the wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub asset_id: String,
    pub kind: AssetKind,
    pub name: String,
    pub ticker: Option<String>,
    pub details: Option<String>,
    /// Decimal places used to render minor units.
    pub precision: u8,
    pub issued_supply: u64,
    pub visibility: Visibility,
    /// Schema the contract was issued under, when known.
    pub schema_id: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
    /// `true` when the asset was first seen in a chain snapshot or an
    /// incoming transfer rather than registered explicitly.
    pub auto_registered: bool,
    pub balance: Balance,
    /// Transfer history, newest first. Left empty by listings.
    pub transfers: Vec<Transfer>,
}

impl Asset {
    /// Placeholder record for an asset that was observed before its contract
    /// was imported.
    pub fn observed(asset_id: &str, issued_supply: u64, added_at: DateTime<Utc>) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            kind: AssetKind::Coin,
            name: asset_id.to_string(),
            ticker: None,
            details: None,
            precision: 0,
            issued_supply,
            visibility: Visibility::Default,
            schema_id: None,
            issued_at: None,
            added_at,
            auto_registered: true,
            balance: Balance::default(),
            transfers: Vec::new(),
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.visibility == Visibility::Hidden
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "assets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub asset_id: String,
    pub kind: String,
    pub name: String,
    pub ticker: Option<String>,
    pub details: Option<String>,
    pub precision: i32,
    pub issued_supply: i64,
    pub visibility: String,
    pub schema_id: Option<String>,
    pub issued_at: Option<DateTimeUtc>,
    pub added_at: DateTimeUtc,
    pub auto_registered: bool,
    pub settled: i64,
    pub future: i64,
    pub spendable: i64,
    pub offchain_inbound: Option<i64>,
    pub offchain_outbound: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::transfers::Entity")]
    Transfers,
}

impl Related<super::transfers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transfers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&Asset> for ActiveModel {
    type Error = LedgerError;

    fn try_from(value: &Asset) -> Result<Self, Self::Error> {
        Ok(Self {
            asset_id: ActiveValue::Set(value.asset_id.clone()),
            kind: ActiveValue::Set(value.kind.as_str().to_string()),
            name: ActiveValue::Set(value.name.clone()),
            ticker: ActiveValue::Set(value.ticker.clone()),
            details: ActiveValue::Set(value.details.clone()),
            precision: ActiveValue::Set(i32::from(value.precision)),
            issued_supply: ActiveValue::Set(amount_to_db(value.issued_supply, "issued_supply")?),
            visibility: ActiveValue::Set(value.visibility.as_str().to_string()),
            schema_id: ActiveValue::Set(value.schema_id.clone()),
            issued_at: ActiveValue::Set(value.issued_at),
            added_at: ActiveValue::Set(value.added_at),
            auto_registered: ActiveValue::Set(value.auto_registered),
            settled: ActiveValue::Set(amount_to_db(value.balance.settled, "settled")?),
            future: ActiveValue::Set(amount_to_db(value.balance.future, "future")?),
            spendable: ActiveValue::Set(amount_to_db(value.balance.spendable, "spendable")?),
            offchain_inbound: ActiveValue::Set(
                value
                    .balance
                    .offchain_inbound
                    .map(|v| amount_to_db(v, "offchain_inbound"))
                    .transpose()?,
            ),
            offchain_outbound: ActiveValue::Set(
                value
                    .balance
                    .offchain_outbound
                    .map(|v| amount_to_db(v, "offchain_outbound"))
                    .transpose()?,
            ),
        })
    }
}

impl TryFrom<Model> for Asset {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let precision = u8::try_from(model.precision).map_err(|_| {
            LedgerError::InvalidAmount(format!("invalid precision {}", model.precision))
        })?;
        Ok(Self {
            kind: AssetKind::try_from(model.kind.as_str())?,
            visibility: Visibility::try_from(model.visibility.as_str())?,
            issued_supply: amount_from_db(model.issued_supply, "issued_supply")?,
            balance: Balance {
                settled: amount_from_db(model.settled, "settled")?,
                future: amount_from_db(model.future, "future")?,
                spendable: amount_from_db(model.spendable, "spendable")?,
                offchain_inbound: model
                    .offchain_inbound
                    .map(|v| amount_from_db(v, "offchain_inbound"))
                    .transpose()?,
                offchain_outbound: model
                    .offchain_outbound
                    .map(|v| amount_from_db(v, "offchain_outbound"))
                    .transpose()?,
            },
            asset_id: model.asset_id,
            name: model.name,
            ticker: model.ticker,
            details: model.details,
            precision,
            schema_id: model.schema_id,
            issued_at: model.issued_at,
            added_at: model.added_at,
            auto_registered: model.auto_registered,
            transfers: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn observed_asset_round_trips_through_model() {
        let added_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let asset = Asset::observed("rgb:abc", 500, added_at);
        let active = ActiveModel::try_from(&asset).unwrap();

        assert_eq!(active.kind, ActiveValue::Set("coin".to_string()));
        assert_eq!(active.visibility, ActiveValue::Set("default".to_string()));
        assert_eq!(active.issued_supply, ActiveValue::Set(500));
        assert!(asset.auto_registered);
        assert!(!asset.is_hidden());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(AssetKind::try_from("rgb21").is_err());
        assert_eq!(AssetKind::try_from("uda").unwrap(), AssetKind::Uda);
    }
}
