#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use sea_orm::Database;

use ledger::{
    AssetKind, Balance, ChainSnapshot, Ledger, NewAsset, Outpoint, SnapshotAllocation,
    SnapshotUtxo,
};
use migration::MigratorTrait;

pub const FUNDING_TXID: &str = "f00d";

pub async fn ledger_with_db() -> Ledger {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    Ledger::builder().database(db).build().await.unwrap()
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
}

pub fn hours(h: i64) -> DateTime<Utc> {
    t0() + Duration::hours(h)
}

pub fn utxo(txid: &str, vout: u32, colorable: bool) -> SnapshotUtxo {
    SnapshotUtxo {
        outpoint: Outpoint::new(txid, vout),
        btc_amount: 1_000,
        colorable,
        exists: true,
    }
}

pub fn allocation(
    txid: &str,
    vout: u32,
    asset_id: &str,
    amount: u64,
    settled: bool,
) -> SnapshotAllocation {
    SnapshotAllocation {
        outpoint: Outpoint::new(txid, vout),
        asset_id: Some(asset_id.to_string()),
        amount,
        settled,
    }
}

pub fn snapshot(utxos: Vec<SnapshotUtxo>, allocations: Vec<SnapshotAllocation>) -> ChainSnapshot {
    ChainSnapshot { utxos, allocations }
}

/// The snapshot `fund` applies: one colorable output holding `amount`.
pub fn funding_snapshot(asset_id: &str, amount: u64) -> ChainSnapshot {
    snapshot(
        vec![utxo(FUNDING_TXID, 0, true)],
        vec![allocation(FUNDING_TXID, 0, asset_id, amount, true)],
    )
}

/// Register `asset_id` with `supply` and settle `amount` of it on one output.
pub async fn fund(ledger: &Ledger, asset_id: &str, supply: u64, amount: u64) {
    ledger
        .register_asset(
            NewAsset::new(asset_id, AssetKind::Coin, "Test coin", supply).ticker("TST"),
            t0(),
        )
        .await
        .unwrap();
    let report = ledger
        .apply_chain_snapshot(&funding_snapshot(asset_id, amount), t0())
        .await
        .unwrap();
    assert!(!report.is_stale());
}

/// Cached and derived balances agree and respect the ordering invariant.
pub async fn assert_balance_sound(ledger: &Ledger, asset_id: &str) -> Balance {
    let cached = ledger.get_balance(asset_id).await.unwrap();
    let derived = ledger.compute_balance(asset_id).await.unwrap();
    assert_eq!(cached, derived, "cached balance of {asset_id} is stale");
    assert!(cached.is_consistent(), "{asset_id}: {cached:?}");

    let settled_on_chain: u64 = ledger
        .list_utxos()
        .await
        .unwrap()
        .iter()
        .filter(|u| u.exists)
        .flat_map(|u| u.allocations.iter())
        .filter(|a| a.asset_id == asset_id && a.settled)
        .map(|a| a.amount)
        .sum();
    assert_eq!(cached.settled, settled_on_chain);
    cached
}
