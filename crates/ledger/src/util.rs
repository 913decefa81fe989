//! Internal helpers for model validation and conversion.
//!
//! These utilities are **not** part of the public API. Amounts are `u64` in
//! the domain and `i64` in storage; every crossing goes through here.

use serde::{Serialize, de::DeserializeOwned};

use crate::{LedgerError, ResultLedger};

/// Convert a domain amount into its storage representation.
pub(crate) fn amount_to_db(amount: u64, label: &str) -> ResultLedger<i64> {
    i64::try_from(amount)
        .map_err(|_| LedgerError::InvalidAmount(format!("{label} exceeds storage range")))
}

/// Convert a stored amount back into the domain, rejecting negatives.
pub(crate) fn amount_from_db(amount: i64, label: &str) -> ResultLedger<u64> {
    u64::try_from(amount)
        .map_err(|_| LedgerError::InvalidAmount(format!("{label} must be >= 0, got {amount}")))
}

/// Checked sum used by every balance aggregate.
pub(crate) fn checked_sum<I>(amounts: I, label: &str) -> ResultLedger<u64>
where
    I: IntoIterator<Item = u64>,
{
    amounts.into_iter().try_fold(0u64, |acc, amount| {
        acc.checked_add(amount)
            .ok_or_else(|| LedgerError::InvalidAmount(format!("{label} overflow")))
    })
}

/// Serialize a value stored in a JSON text column.
pub(crate) fn to_json_column<T: Serialize>(value: &T) -> ResultLedger<String> {
    Ok(serde_json::to_string(value)?)
}

/// Deserialize a JSON text column.
pub(crate) fn from_json_column<T: DeserializeOwned>(raw: &str) -> ResultLedger<T> {
    Ok(serde_json::from_str(raw)?)
}

pub(crate) fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_amount_from_db_is_rejected() {
        assert!(amount_from_db(-1, "amount").is_err());
        assert_eq!(amount_from_db(42, "amount").unwrap(), 42);
    }

    #[test]
    fn checked_sum_reports_overflow() {
        assert!(checked_sum([u64::MAX, 1], "settled").is_err());
        assert_eq!(checked_sum([1, 2, 3], "settled").unwrap(), 6);
    }
}
