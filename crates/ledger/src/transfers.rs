//! Transfer primitives and the transfer state machine.
//!
//! ```text
//! WAITING_COUNTERPARTY ──ack──> WAITING_CONFIRMATIONS ──confirm──> SETTLED
//!          │                              │
//!          └──────cancel / fail───────────┴──fail──> FAILED
//! ```
//!
//! `SETTLED` and `FAILED` are terminal. The table lives in
//! [`TransferStatus::apply`]; the ledger only persists its verdicts.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    LedgerError, Outpoint, ResultLedger,
    util::{checked_sum, from_json_column, to_json_column},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferKind {
    Issuance,
    ReceiveBlind,
    ReceiveWitness,
    Send,
}

impl TransferKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issuance => "issuance",
            Self::ReceiveBlind => "receive_blind",
            Self::ReceiveWitness => "receive_witness",
            Self::Send => "send",
        }
    }

    pub fn is_receive(self) -> bool {
        matches!(self, Self::ReceiveBlind | Self::ReceiveWitness)
    }
}

impl TryFrom<&str> for TransferKind {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "issuance" => Ok(Self::Issuance),
            "receive_blind" => Ok(Self::ReceiveBlind),
            "receive_witness" => Ok(Self::ReceiveWitness),
            "send" => Ok(Self::Send),
            other => Err(LedgerError::KeyNotFound(format!("transfer kind {other}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    WaitingCounterparty,
    WaitingConfirmations,
    Settled,
    Failed,
}

/// Inputs of the transfer state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferEvent {
    CounterpartyAck,
    ChainConfirmed,
    Cancel,
    Fail,
}

/// Verdict of [`TransferStatus::apply`] for a legal event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied {
        from: TransferStatus,
        to: TransferStatus,
    },
    /// The event was already applied; nothing changes.
    Duplicate { status: TransferStatus },
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WaitingCounterparty => "waiting_counterparty",
            Self::WaitingConfirmations => "waiting_confirmations",
            Self::Settled => "settled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Failed)
    }

    pub fn is_waiting(self) -> bool {
        !self.is_terminal()
    }

    /// Apply `event` to the current status.
    ///
    /// Redelivered node events (a second ack, a confirmation of a settled
    /// transfer, a failure of a failed one) are [`TransitionOutcome::Duplicate`].
    pub fn apply(self, event: TransferEvent) -> ResultLedger<TransitionOutcome> {
        use TransferEvent::*;
        use TransferStatus::*;

        let to = match (self, event) {
            (WaitingCounterparty, CounterpartyAck) => WaitingConfirmations,
            (WaitingConfirmations | Settled | Failed, CounterpartyAck) => {
                return Ok(TransitionOutcome::Duplicate { status: self });
            }
            (WaitingConfirmations, ChainConfirmed) => Settled,
            (Settled, ChainConfirmed) | (Failed, Fail) => {
                return Ok(TransitionOutcome::Duplicate { status: self });
            }
            (WaitingCounterparty, Cancel) => Failed,
            (WaitingCounterparty | WaitingConfirmations, Fail) => Failed,
            (from, event) => {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "{event:?} not allowed from {}",
                    from.as_str()
                )));
            }
        };
        Ok(TransitionOutcome::Applied { from: self, to })
    }
}

impl TryFrom<&str> for TransferStatus {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "waiting_counterparty" => Ok(Self::WaitingCounterparty),
            "waiting_confirmations" => Ok(Self::WaitingConfirmations),
            "settled" => Ok(Self::Settled),
            "failed" => Ok(Self::Failed),
            other => Err(LedgerError::KeyNotFound(format!("transfer status {other}"))),
        }
    }
}

/// What a transfer asks for, or what it actually moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Assignment {
    Fungible { amount: u64 },
    NonFungible,
    /// Any amount of the asset (receive without a promised amount).
    Any,
}

impl Assignment {
    /// Amount in minor units implied by the assignment.
    pub fn amount(self) -> u64 {
        match self {
            Self::Fungible { amount } => amount,
            Self::NonFungible => 1,
            Self::Any => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub idx: i32,
    /// Groups transfers created atomically.
    pub batch_transfer_idx: i32,
    pub asset_id: String,
    pub kind: TransferKind,
    pub status: TransferStatus,
    pub txid: Option<String>,
    pub recipient_id: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
    pub requested_assignment: Option<Assignment>,
    pub assignments: Vec<Assignment>,
    pub receive_utxo: Option<Outpoint>,
    pub change_utxo: Option<Outpoint>,
    pub invoice_string: Option<String>,
    pub transport_endpoints: Vec<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl Transfer {
    /// A transfer not yet persisted. `idx` is assigned on insert.
    pub(crate) fn pending(
        batch_transfer_idx: i32,
        asset_id: &str,
        kind: TransferKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            idx: 0,
            batch_transfer_idx,
            asset_id: asset_id.to_string(),
            kind,
            status: TransferStatus::WaitingCounterparty,
            txid: None,
            recipient_id: None,
            expiration: None,
            requested_assignment: None,
            assignments: Vec::new(),
            receive_utxo: None,
            change_utxo: None,
            invoice_string: None,
            transport_endpoints: Vec::new(),
            failure_reason: None,
            created_at,
            updated_at: created_at,
            version: 0,
        }
    }

    pub fn requested_amount(&self) -> u64 {
        self.requested_assignment.map_or(0, Assignment::amount)
    }

    /// Amount that will move once the transfer settles.
    ///
    /// Receives prefer what the counterparty actually assigned over what was
    /// requested.
    pub fn implied_amount(&self) -> ResultLedger<u64> {
        if self.kind.is_receive() && !self.assignments.is_empty() {
            return checked_sum(self.assignments.iter().map(|a| a.amount()), "assignments");
        }
        Ok(self.requested_amount())
    }

    /// Amount withheld from `spendable` while this transfer is open.
    pub fn reserved_amount(&self) -> u64 {
        if self.kind == TransferKind::Send && !self.status.is_terminal() {
            self.requested_amount()
        } else {
            0
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transfers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub idx: i32,
    pub batch_transfer_idx: i32,
    pub asset_id: String,
    pub kind: String,
    pub status: String,
    pub txid: Option<String>,
    pub recipient_id: Option<String>,
    pub expiration: Option<DateTimeUtc>,
    pub requested_assignment: Option<String>,
    pub assignments: String,
    pub receive_utxo: Option<String>,
    pub change_utxo: Option<String>,
    pub invoice_string: Option<String>,
    pub transport_endpoints: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::assets::Entity",
        from = "Column::AssetId",
        to = "super::assets::Column::AssetId",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Assets,
}

impl Related<super::assets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&Transfer> for ActiveModel {
    type Error = LedgerError;

    fn try_from(tx: &Transfer) -> Result<Self, Self::Error> {
        Ok(Self {
            idx: ActiveValue::NotSet,
            batch_transfer_idx: ActiveValue::Set(tx.batch_transfer_idx),
            asset_id: ActiveValue::Set(tx.asset_id.clone()),
            kind: ActiveValue::Set(tx.kind.as_str().to_string()),
            status: ActiveValue::Set(tx.status.as_str().to_string()),
            txid: ActiveValue::Set(tx.txid.clone()),
            recipient_id: ActiveValue::Set(tx.recipient_id.clone()),
            expiration: ActiveValue::Set(tx.expiration),
            requested_assignment: ActiveValue::Set(
                tx.requested_assignment
                    .as_ref()
                    .map(to_json_column)
                    .transpose()?,
            ),
            assignments: ActiveValue::Set(to_json_column(&tx.assignments)?),
            receive_utxo: ActiveValue::Set(tx.receive_utxo.as_ref().map(ToString::to_string)),
            change_utxo: ActiveValue::Set(tx.change_utxo.as_ref().map(ToString::to_string)),
            invoice_string: ActiveValue::Set(tx.invoice_string.clone()),
            transport_endpoints: ActiveValue::Set(to_json_column(&tx.transport_endpoints)?),
            failure_reason: ActiveValue::Set(tx.failure_reason.clone()),
            created_at: ActiveValue::Set(tx.created_at),
            updated_at: ActiveValue::Set(tx.updated_at),
            version: ActiveValue::Set(tx.version),
        })
    }
}

impl TryFrom<Model> for Transfer {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            idx: model.idx,
            batch_transfer_idx: model.batch_transfer_idx,
            kind: TransferKind::try_from(model.kind.as_str())?,
            status: TransferStatus::try_from(model.status.as_str())?,
            requested_assignment: model
                .requested_assignment
                .as_deref()
                .map(from_json_column)
                .transpose()?,
            assignments: from_json_column(&model.assignments)?,
            receive_utxo: model.receive_utxo.as_deref().map(str::parse).transpose()?,
            change_utxo: model.change_utxo.as_deref().map(str::parse).transpose()?,
            transport_endpoints: from_json_column(&model.transport_endpoints)?,
            asset_id: model.asset_id,
            txid: model.txid,
            recipient_id: model.recipient_id,
            expiration: model.expiration,
            invoice_string: model.invoice_string,
            failure_reason: model.failure_reason,
            created_at: model.created_at,
            updated_at: model.updated_at,
            version: model.version,
        })
    }
}
