//! Chain snapshots fed by the node.
//!
//! A [`ChainSnapshot`] is the node's full view of the wallet's outputs and
//! the allocations on them. [`plan`] validates it against the asset registry
//! without touching storage; the ledger then applies the plan in one write
//! scope.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{LedgerError, Outpoint, ResultLedger, RgbAllocation, RgbUtxo, util::amount_from_db};

/// Single row key of `sync_state`.
pub(crate) const CHAIN_STATE_ID: &str = "chain";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub utxos: Vec<SnapshotUtxo>,
    #[serde(default)]
    pub allocations: Vec<SnapshotAllocation>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotUtxo {
    pub outpoint: Outpoint,
    pub btc_amount: u64,
    pub colorable: bool,
    pub exists: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotAllocation {
    pub outpoint: Outpoint,
    pub asset_id: Option<String>,
    pub amount: u64,
    pub settled: bool,
}

/// Why an allocation from a snapshot was not applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// The outpoint is not part of the snapshot's UTXO list.
    UnknownOutpoint,
    /// The outpoint is reported as spent.
    SpentOutpoint,
    /// A positive amount without an asset.
    MissingAsset,
    /// The UTXO cannot carry allocations.
    NotColorable,
    /// Settling it would lift the asset above its issued supply.
    ExceedsSupply,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedAllocation {
    pub outpoint: Outpoint,
    pub asset_id: Option<String>,
    pub amount: u64,
    pub reason: StaleReason,
}

/// Supply bound of a registered asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupplyCap {
    pub issued_supply: u64,
    /// Auto-registered assets have no authoritative supply; observation
    /// raises it instead of being checked against it.
    pub auto_registered: bool,
}

/// Validated content of a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotPlan {
    /// Existing UTXOs with their accepted allocations, ordered by outpoint.
    pub utxos: Vec<RgbUtxo>,
    pub dropped: Vec<DroppedAllocation>,
    /// Total observed per asset not under an authoritative supply (unknown
    /// or auto-registered).
    pub observed_supply: BTreeMap<String, u64>,
}

/// Outcome of applying a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReport {
    pub utxos_upserted: usize,
    pub utxos_pruned: usize,
    pub allocations_applied: usize,
    pub dropped: Vec<DroppedAllocation>,
    pub assets_registered: Vec<String>,
}

impl SnapshotReport {
    /// `true` if anything had to be dropped; the ledger is then stale.
    pub fn is_stale(&self) -> bool {
        !self.dropped.is_empty()
    }
}

/// Validate `snapshot` against the registered supply caps.
///
/// Duplicate outpoints in the UTXO list keep the last entry. Allocations are
/// checked in outpoint order so the same snapshot always yields the same
/// plan.
pub fn plan(snapshot: &ChainSnapshot, caps: &HashMap<String, SupplyCap>) -> SnapshotPlan {
    let mut utxos: BTreeMap<Outpoint, RgbUtxo> = BTreeMap::new();
    let mut spent: BTreeMap<Outpoint, ()> = BTreeMap::new();
    for entry in &snapshot.utxos {
        if entry.exists {
            spent.remove(&entry.outpoint);
            utxos.insert(
                entry.outpoint.clone(),
                RgbUtxo {
                    outpoint: entry.outpoint.clone(),
                    btc_amount: entry.btc_amount,
                    colorable: entry.colorable,
                    exists: true,
                    allocations: Vec::new(),
                },
            );
        } else {
            utxos.remove(&entry.outpoint);
            spent.insert(entry.outpoint.clone(), ());
        }
    }

    let mut allocations: Vec<&SnapshotAllocation> = snapshot.allocations.iter().collect();
    allocations.sort_by(|a, b| a.outpoint.cmp(&b.outpoint));

    let mut dropped = Vec::new();
    let mut settled_totals: HashMap<String, u64> = HashMap::new();
    let mut observed_supply: BTreeMap<String, u64> = BTreeMap::new();

    for allocation in allocations {
        let drop = |reason| DroppedAllocation {
            outpoint: allocation.outpoint.clone(),
            asset_id: allocation.asset_id.clone(),
            amount: allocation.amount,
            reason,
        };

        let asset_id = match allocation.asset_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ if allocation.amount == 0 => continue,
            _ => {
                dropped.push(drop(StaleReason::MissingAsset));
                continue;
            }
        };
        let Some(utxo) = utxos.get_mut(&allocation.outpoint) else {
            let reason = if spent.contains_key(&allocation.outpoint) {
                StaleReason::SpentOutpoint
            } else {
                StaleReason::UnknownOutpoint
            };
            dropped.push(drop(reason));
            continue;
        };
        if !utxo.colorable {
            dropped.push(drop(StaleReason::NotColorable));
            continue;
        }

        match caps.get(asset_id) {
            Some(cap) if !cap.auto_registered => {
                if allocation.settled {
                    let total = settled_totals.entry(asset_id.to_string()).or_default();
                    match total.checked_add(allocation.amount) {
                        Some(next) if next <= cap.issued_supply => *total = next,
                        _ => {
                            dropped.push(drop(StaleReason::ExceedsSupply));
                            continue;
                        }
                    }
                }
            }
            _ => {
                let total = observed_supply.entry(asset_id.to_string()).or_default();
                *total = total.saturating_add(allocation.amount);
            }
        }

        utxo.allocations.push(RgbAllocation {
            asset_id: asset_id.to_string(),
            amount: allocation.amount,
            settled: allocation.settled,
        });
    }

    SnapshotPlan {
        utxos: utxos.into_values().collect(),
        dropped,
        observed_supply,
    }
}

/// Freshness of the allocation ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_snapshot_at: Option<DateTime<Utc>>,
    /// The last snapshot had entries that could not be applied.
    pub stale: bool,
    pub dropped_allocations: u64,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_state")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub last_snapshot_at: Option<DateTimeUtc>,
    pub stale: bool,
    pub dropped_allocations: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for SyncStatus {
    type Error = LedgerError;

    fn try_from(model: Model) -> ResultLedger<Self> {
        Ok(Self {
            last_snapshot_at: model.last_snapshot_at,
            stale: model.stale,
            dropped_allocations: amount_from_db(model.dropped_allocations, "dropped_allocations")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(n: u32) -> Outpoint {
        Outpoint::new("ab".repeat(32), n)
    }

    fn utxo(n: u32, colorable: bool, exists: bool) -> SnapshotUtxo {
        SnapshotUtxo {
            outpoint: op(n),
            btc_amount: 1000,
            colorable,
            exists,
        }
    }

    fn alloc(n: u32, asset: Option<&str>, amount: u64, settled: bool) -> SnapshotAllocation {
        SnapshotAllocation {
            outpoint: op(n),
            asset_id: asset.map(ToString::to_string),
            amount,
            settled,
        }
    }

    fn reasons(plan: &SnapshotPlan) -> Vec<StaleReason> {
        plan.dropped.iter().map(|d| d.reason).collect()
    }

    #[test]
    fn drops_allocations_that_cannot_be_attributed() {
        let snapshot = ChainSnapshot {
            utxos: vec![utxo(0, true, true), utxo(1, true, false), utxo(2, false, true)],
            allocations: vec![
                alloc(0, Some("A"), 10, true),
                alloc(1, Some("A"), 5, true),
                alloc(2, Some("A"), 5, true),
                alloc(3, Some("A"), 5, true),
                alloc(0, None, 7, true),
                alloc(0, None, 0, false),
            ],
        };
        let plan = plan(&snapshot, &HashMap::new());

        assert_eq!(
            reasons(&plan),
            vec![
                StaleReason::MissingAsset,
                StaleReason::SpentOutpoint,
                StaleReason::NotColorable,
                StaleReason::UnknownOutpoint,
            ]
        );
        assert_eq!(plan.utxos.len(), 2);
        assert_eq!(plan.utxos[0].allocations.len(), 1);
        assert_eq!(plan.observed_supply.get("A"), Some(&10));
    }

    #[test]
    fn enforces_registered_supply() {
        let caps = HashMap::from([(
            "A".to_string(),
            SupplyCap {
                issued_supply: 15,
                auto_registered: false,
            },
        )]);
        let snapshot = ChainSnapshot {
            utxos: vec![utxo(0, true, true), utxo(1, true, true), utxo(2, true, true)],
            allocations: vec![
                alloc(0, Some("A"), 10, true),
                alloc(1, Some("A"), 10, true),
                alloc(2, Some("A"), 10, false),
            ],
        };
        let plan = plan(&snapshot, &caps);

        assert_eq!(reasons(&plan), vec![StaleReason::ExceedsSupply]);
        assert_eq!(plan.dropped[0].outpoint, op(1));
        assert!(plan.observed_supply.is_empty());
    }

    #[test]
    fn planning_is_deterministic() {
        let snapshot = ChainSnapshot {
            utxos: vec![utxo(1, true, true), utxo(0, true, true)],
            allocations: vec![alloc(1, Some("B"), 3, false), alloc(0, Some("A"), 2, true)],
        };
        let first = plan(&snapshot, &HashMap::new());
        let second = plan(&snapshot, &HashMap::new());
        assert_eq!(first, second);
        assert_eq!(first.utxos[0].outpoint, op(0));
    }

    #[test]
    fn later_spent_entry_wins() {
        let snapshot = ChainSnapshot {
            utxos: vec![utxo(0, true, true), utxo(0, true, false)],
            allocations: vec![alloc(0, Some("A"), 2, true)],
        };
        let plan = plan(&snapshot, &HashMap::new());
        assert!(plan.utxos.is_empty());
        assert_eq!(reasons(&plan), vec![StaleReason::SpentOutpoint]);
    }
}
