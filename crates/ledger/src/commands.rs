//! Command structs for ledger operations.
//!
//! These types group parameters for write operations (send, receive,
//! invoice issuance, issuance, acknowledgements), keeping call sites readable
//! and avoiding long argument lists.

use chrono::{DateTime, Utc};

use crate::{AssetKind, Assignment, InvoiceKind, LedgerError, Outpoint, ResultLedger};

/// Application-level conditions that must block ledger writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LedgerGuards {
    pub backup_in_progress: bool,
    pub node_initializing: bool,
}

impl LedgerGuards {
    #[must_use]
    pub fn backup_in_progress(mut self, active: bool) -> Self {
        self.backup_in_progress = active;
        self
    }

    #[must_use]
    pub fn node_initializing(mut self, active: bool) -> Self {
        self.node_initializing = active;
        self
    }

    /// Reject `operation` while a guard is active. Retryable.
    pub(crate) fn check(self, operation: &str) -> ResultLedger<()> {
        if self.backup_in_progress {
            return Err(LedgerError::ConcurrentModification(format!(
                "{operation}: backup in progress"
            )));
        }
        if self.node_initializing {
            return Err(LedgerError::ConcurrentModification(format!(
                "{operation}: node initializing"
            )));
        }
        Ok(())
    }
}

/// One output of a send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient {
    pub recipient_id: String,
    pub assignment: Assignment,
    pub transport_endpoints: Vec<String>,
}

impl Recipient {
    #[must_use]
    pub fn new(recipient_id: impl Into<String>, amount: u64) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            assignment: Assignment::Fungible { amount },
            transport_endpoints: Vec::new(),
        }
    }

    #[must_use]
    pub fn non_fungible(recipient_id: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            assignment: Assignment::NonFungible,
            transport_endpoints: Vec::new(),
        }
    }

    #[must_use]
    pub fn transport_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.transport_endpoints = endpoints;
        self
    }
}

/// Create a batch of SEND transfers for one asset.
#[derive(Clone, Debug)]
pub struct SendCmd {
    pub asset_id: String,
    pub recipients: Vec<Recipient>,
    pub guards: LedgerGuards,
    pub now: DateTime<Utc>,
}

impl SendCmd {
    #[must_use]
    pub fn new(asset_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            asset_id: asset_id.into(),
            recipients: Vec::new(),
            guards: LedgerGuards::default(),
            now,
        }
    }

    #[must_use]
    pub fn recipient(mut self, recipient: Recipient) -> Self {
        self.recipients.push(recipient);
        self
    }

    #[must_use]
    pub fn guards(mut self, guards: LedgerGuards) -> Self {
        self.guards = guards;
        self
    }
}

/// A transfer arriving for one of our invoices.
#[derive(Clone, Debug)]
pub struct IncomingTransferCmd {
    pub recipient_id: String,
    /// Asset the sender is moving. Defaults to the invoice's asset.
    pub asset_id: Option<String>,
    pub txid: Option<String>,
    pub assignments: Vec<Assignment>,
    pub now: DateTime<Utc>,
}

impl IncomingTransferCmd {
    #[must_use]
    pub fn new(recipient_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            asset_id: None,
            txid: None,
            assignments: Vec::new(),
            now,
        }
    }

    #[must_use]
    pub fn asset_id(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    #[must_use]
    pub fn txid(mut self, txid: impl Into<String>) -> Self {
        self.txid = Some(txid.into());
        self
    }

    #[must_use]
    pub fn assignment(mut self, assignment: Assignment) -> Self {
        self.assignments.push(assignment);
        self
    }
}

/// Mint a receive invoice.
#[derive(Clone, Debug)]
pub struct IssueInvoiceCmd {
    pub kind: InvoiceKind,
    pub asset_id: Option<String>,
    /// `Some(0)` is treated as "any amount".
    pub amount: Option<u64>,
    /// Seconds until expiry; `None` uses the ledger default, `Some(0)` never
    /// expires.
    pub expiry_secs: Option<u64>,
    /// `None` uses the ledger's configured endpoints.
    pub transport_endpoints: Option<Vec<String>>,
    pub guards: LedgerGuards,
    pub now: DateTime<Utc>,
}

impl IssueInvoiceCmd {
    #[must_use]
    pub fn new(kind: InvoiceKind, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            asset_id: None,
            amount: None,
            expiry_secs: None,
            transport_endpoints: None,
            guards: LedgerGuards::default(),
            now,
        }
    }

    #[must_use]
    pub fn asset_id(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    #[must_use]
    pub fn amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }

    #[must_use]
    pub fn expiry_secs(mut self, secs: u64) -> Self {
        self.expiry_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn transport_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.transport_endpoints = Some(endpoints);
        self
    }

    #[must_use]
    pub fn guards(mut self, guards: LedgerGuards) -> Self {
        self.guards = guards;
        self
    }
}

/// Register an asset, either issued locally or imported.
#[derive(Clone, Debug)]
pub struct NewAsset {
    pub asset_id: String,
    pub kind: AssetKind,
    pub name: String,
    pub ticker: Option<String>,
    pub details: Option<String>,
    pub precision: u8,
    pub issued_supply: u64,
    pub schema_id: Option<String>,
    /// Output the issued supply was assigned to, if already known.
    pub issue_utxo: Option<Outpoint>,
}

impl NewAsset {
    #[must_use]
    pub fn new(
        asset_id: impl Into<String>,
        kind: AssetKind,
        name: impl Into<String>,
        issued_supply: u64,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            kind,
            name: name.into(),
            ticker: None,
            details: None,
            precision: 0,
            issued_supply,
            schema_id: None,
            issue_utxo: None,
        }
    }

    #[must_use]
    pub fn ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker = Some(ticker.into());
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    #[must_use]
    pub fn schema_id(mut self, schema_id: impl Into<String>) -> Self {
        self.schema_id = Some(schema_id.into());
        self
    }

    #[must_use]
    pub fn issue_utxo(mut self, outpoint: Outpoint) -> Self {
        self.issue_utxo = Some(outpoint);
        self
    }
}

/// What the counterparty (or the node on its behalf) reported with its ack.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CounterpartyAck {
    pub txid: Option<String>,
    pub receive_utxo: Option<Outpoint>,
    pub change_utxo: Option<Outpoint>,
    pub assignments: Vec<Assignment>,
}

impl CounterpartyAck {
    #[must_use]
    pub fn txid(mut self, txid: impl Into<String>) -> Self {
        self.txid = Some(txid.into());
        self
    }

    #[must_use]
    pub fn receive_utxo(mut self, outpoint: Outpoint) -> Self {
        self.receive_utxo = Some(outpoint);
        self
    }

    #[must_use]
    pub fn change_utxo(mut self, outpoint: Outpoint) -> Self {
        self.change_utxo = Some(outpoint);
        self
    }

    #[must_use]
    pub fn assignment(mut self, assignment: Assignment) -> Self {
        self.assignments.push(assignment);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_block_with_retryable_error() {
        assert!(LedgerGuards::default().check("send").is_ok());

        let err = LedgerGuards::default()
            .backup_in_progress(true)
            .check("send")
            .unwrap_err();
        assert!(err.is_retryable());

        let err = LedgerGuards::default()
            .node_initializing(true)
            .check("issue invoice")
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::ConcurrentModification("issue invoice: node initializing".to_string())
        );
    }
}
