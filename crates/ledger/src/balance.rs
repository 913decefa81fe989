//! Per-asset balance aggregate.
//!
//! A [`Balance`] is never the source of truth: it is derived from the
//! allocation ledger and the in-flight transfers every time they change. The
//! copy embedded in the `assets` table is refreshed inside the same write
//! scope as the mutation that invalidated it.

use serde::{Deserialize, Serialize};

/// Raw aggregates a [`Balance`] is derived from, all in minor units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BalanceInputs {
    /// Sum of settled allocations on existing UTXOs.
    pub settled: u64,
    /// Amounts implied by RECEIVE_* transfers still waiting.
    pub inbound: u64,
    /// Amounts implied by SEND transfers still waiting.
    pub outbound: u64,
    /// Requested assignments of SEND transfers neither settled nor failed.
    pub reserved: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub settled: u64,
    pub future: u64,
    pub spendable: u64,
    pub offchain_inbound: Option<u64>,
    pub offchain_outbound: Option<u64>,
}

impl Balance {
    /// Derive a balance, keeping `spendable <= settled <= future`.
    ///
    /// `future` is `settled + inbound - outbound`, floored at `settled`;
    /// `spendable` is `settled - reserved`, floored at zero.
    #[must_use]
    pub fn derive(inputs: BalanceInputs) -> Self {
        let projected = (u128::from(inputs.settled) + u128::from(inputs.inbound))
            .saturating_sub(u128::from(inputs.outbound));
        let future = u64::try_from(projected)
            .unwrap_or(u64::MAX)
            .max(inputs.settled);
        Self {
            settled: inputs.settled,
            future,
            spendable: inputs.settled.saturating_sub(inputs.reserved),
            offchain_inbound: None,
            offchain_outbound: None,
        }
    }

    #[must_use]
    pub fn with_offchain(mut self, inbound: Option<u64>, outbound: Option<u64>) -> Self {
        self.offchain_inbound = inbound;
        self.offchain_outbound = outbound;
        self
    }

    /// Returns `true` if `spendable <= settled <= future`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.spendable <= self.settled && self.settled <= self.future
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_lowers_spendable_only() {
        let balance = Balance::derive(BalanceInputs {
            settled: 1000,
            inbound: 0,
            outbound: 0,
            reserved: 500,
        });
        assert_eq!(balance.settled, 1000);
        assert_eq!(balance.spendable, 500);
        assert_eq!(balance.future, 1000);
        assert!(balance.is_consistent());
    }

    #[test]
    fn inbound_raises_future() {
        let balance = Balance::derive(BalanceInputs {
            settled: 300,
            inbound: 200,
            outbound: 50,
            reserved: 50,
        });
        assert_eq!(balance.future, 450);
        assert_eq!(balance.spendable, 250);
        assert!(balance.is_consistent());
    }

    #[test]
    fn outbound_never_pushes_future_below_settled() {
        let balance = Balance::derive(BalanceInputs {
            settled: 100,
            inbound: 10,
            outbound: 80,
            reserved: 80,
        });
        assert_eq!(balance.future, 100);
        assert_eq!(balance.spendable, 20);
        assert!(balance.is_consistent());
    }

    #[test]
    fn over_reservation_saturates_at_zero() {
        let balance = Balance::derive(BalanceInputs {
            settled: 10,
            inbound: 0,
            outbound: 0,
            reserved: 40,
        });
        assert_eq!(balance.spendable, 0);
        assert!(balance.is_consistent());
    }

    #[test]
    fn extreme_inputs_do_not_overflow() {
        let balance = Balance::derive(BalanceInputs {
            settled: u64::MAX,
            inbound: u64::MAX,
            outbound: 0,
            reserved: 0,
        });
        assert_eq!(balance.future, u64::MAX);
        assert!(balance.is_consistent());
    }
}
