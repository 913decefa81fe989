//! Receive invoices (`ReceiveData`).
//!
//! An invoice is keyed by its `recipient_id`. At most one transfer ever
//! attaches to it; expiry is evaluated lazily against a caller supplied
//! `now`.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    LedgerError, TransferKind,
    util::{amount_from_db, amount_to_db, from_json_column, to_json_column},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    /// The sender learns the receiving UTXO only through a blinded seal.
    Blinded,
    /// The receiving output is created by the sender's witness transaction.
    Witness,
}

impl InvoiceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blinded => "blinded",
            Self::Witness => "witness",
        }
    }

    /// Recipient id prefix used by the invoice encoding.
    pub fn recipient_prefix(self) -> &'static str {
        match self {
            Self::Blinded => "utxob:",
            Self::Witness => "wvout:",
        }
    }

    /// Kind of the transfer a paid invoice turns into.
    pub fn transfer_kind(self) -> TransferKind {
        match self {
            Self::Blinded => TransferKind::ReceiveBlind,
            Self::Witness => TransferKind::ReceiveWitness,
        }
    }
}

impl TryFrom<&str> for InvoiceKind {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "blinded" => Ok(Self::Blinded),
            "witness" => Ok(Self::Witness),
            other => Err(LedgerError::KeyNotFound(format!("invoice kind {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub recipient_id: String,
    /// Opaque encoded invoice handed to the payer.
    pub invoice: String,
    pub kind: InvoiceKind,
    pub asset_id: Option<String>,
    pub amount: Option<u64>,
    pub expiration_timestamp: Option<DateTime<Utc>>,
    pub batch_transfer_idx: i32,
    pub transport_endpoints: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// `true` once `now` reached the expiration timestamp.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_timestamp.is_some_and(|exp| now >= exp)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// Neither expired nor cancelled.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_cancelled() && !self.is_expired(now)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "invoices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub recipient_id: String,
    pub invoice: String,
    pub kind: String,
    pub asset_id: Option<String>,
    pub amount: Option<i64>,
    pub expiration_timestamp: Option<DateTimeUtc>,
    pub batch_transfer_idx: i32,
    pub transport_endpoints: String,
    pub created_at: DateTimeUtc,
    pub cancelled_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&Invoice> for ActiveModel {
    type Error = LedgerError;

    fn try_from(value: &Invoice) -> Result<Self, Self::Error> {
        Ok(Self {
            recipient_id: ActiveValue::Set(value.recipient_id.clone()),
            invoice: ActiveValue::Set(value.invoice.clone()),
            kind: ActiveValue::Set(value.kind.as_str().to_string()),
            asset_id: ActiveValue::Set(value.asset_id.clone()),
            amount: ActiveValue::Set(
                value
                    .amount
                    .map(|a| amount_to_db(a, "invoice amount"))
                    .transpose()?,
            ),
            expiration_timestamp: ActiveValue::Set(value.expiration_timestamp),
            batch_transfer_idx: ActiveValue::Set(value.batch_transfer_idx),
            transport_endpoints: ActiveValue::Set(to_json_column(&value.transport_endpoints)?),
            created_at: ActiveValue::Set(value.created_at),
            cancelled_at: ActiveValue::Set(value.cancelled_at),
        })
    }
}

impl TryFrom<Model> for Invoice {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: InvoiceKind::try_from(model.kind.as_str())?,
            amount: model
                .amount
                .map(|a| amount_from_db(a, "invoice amount"))
                .transpose()?,
            transport_endpoints: from_json_column(&model.transport_endpoints)?,
            recipient_id: model.recipient_id,
            invoice: model.invoice,
            asset_id: model.asset_id,
            expiration_timestamp: model.expiration_timestamp,
            batch_transfer_idx: model.batch_transfer_idx,
            created_at: model.created_at,
            cancelled_at: model.cancelled_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn invoice(expiry: Option<Duration>) -> Invoice {
        let created_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Invoice {
            recipient_id: "utxob:abc".to_string(),
            invoice: "rgb:~/~/utxob:abc".to_string(),
            kind: InvoiceKind::Blinded,
            asset_id: None,
            amount: None,
            expiration_timestamp: expiry.map(|d| created_at + d),
            batch_transfer_idx: 1,
            transport_endpoints: Vec::new(),
            created_at,
            cancelled_at: None,
        }
    }

    #[test]
    fn expires_after_deadline() {
        let invoice = invoice(Some(Duration::hours(24)));
        assert!(!invoice.is_expired(invoice.created_at + Duration::hours(23)));
        assert!(invoice.is_expired(invoice.created_at + Duration::hours(24)));
        assert!(invoice.is_expired(invoice.created_at + Duration::hours(25)));
    }

    #[test]
    fn no_expiry_never_expires() {
        let invoice = invoice(None);
        assert!(invoice.is_active(invoice.created_at + Duration::days(3650)));
    }

    #[test]
    fn cancelled_is_inactive() {
        let mut invoice = invoice(Some(Duration::hours(1)));
        invoice.cancelled_at = Some(invoice.created_at);
        assert!(!invoice.is_active(invoice.created_at));
    }
}
