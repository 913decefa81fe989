//! The module contains the errors the ledger can return.
//!
//! Business-level conditions are all recoverable and surface as typed
//! variants:
//!
//! - [`InvalidStateTransition`] an illegal transfer or invoice transition.
//! - [`ConcurrentModification`] another request holds the same entity, or a
//!   guard flag blocks the operation. The caller may retry.
//! - [`ExpiredInvoice`] a transfer tried to attach to an expired invoice.
//!
//! The only hard failure is [`Database`], which propagates storage errors
//! unchanged.
//!
//!  [`InvalidStateTransition`]: LedgerError::InvalidStateTransition
//!  [`ConcurrentModification`]: LedgerError::ConcurrentModification
//!  [`ExpiredInvoice`]: LedgerError::ExpiredInvoice
//!  [`Database`]: LedgerError::Database
use sea_orm::DbErr;
use thiserror::Error;

/// Ledger custom errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),
    #[error("Expired invoice: {0}")]
    ExpiredInvoice(String),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid invoice: {0}")]
    InvalidInvoice(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for LedgerError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidStateTransition(a), Self::InvalidStateTransition(b)) => a == b,
            (Self::ConcurrentModification(a), Self::ConcurrentModification(b)) => a == b,
            (Self::ExpiredInvoice(a), Self::ExpiredInvoice(b)) => a == b,
            (Self::InsufficientFunds(a), Self::InsufficientFunds(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidInvoice(a), Self::InvalidInvoice(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::Serialization(a), Self::Serialization(b)) => a.to_string() == b.to_string(),
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl LedgerError {
    /// Returns `true` when retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}
