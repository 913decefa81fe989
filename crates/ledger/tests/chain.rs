mod common;

use common::*;
use ledger::{
    AssetFilter, AssetKind, LedgerError, NewAsset, Outpoint, SnapshotAllocation, StaleReason,
    TransferKind, TransferStatus, UtxoClass, Visibility,
};

#[tokio::test]
async fn settled_balance_is_the_sum_of_settled_allocations() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 600).await;

    let report = ledger
        .apply_chain_snapshot(
            &snapshot(
                vec![utxo(FUNDING_TXID, 0, true), utxo("beef", 1, true)],
                vec![
                    allocation(FUNDING_TXID, 0, "asset-a", 600, true),
                    allocation("beef", 1, "asset-a", 400, true),
                    allocation("beef", 1, "asset-a", 50, false),
                ],
            ),
            hours(1),
        )
        .await
        .unwrap();
    assert_eq!(report.utxos_upserted, 2);
    assert_eq!(report.allocations_applied, 3);

    let balance = assert_balance_sound(&ledger, "asset-a").await;
    assert_eq!(balance.settled, 1_000);
    assert_eq!(balance.future, 1_000);
    assert_eq!(balance.spendable, 1_000);
}

#[tokio::test]
async fn applying_the_same_snapshot_twice_is_idempotent() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 600).await;
    let snap = snapshot(
        vec![
            utxo(FUNDING_TXID, 0, true),
            utxo("beef", 1, true),
            utxo("cafe", 0, false),
        ],
        vec![
            allocation(FUNDING_TXID, 0, "asset-a", 600, true),
            allocation("beef", 1, "asset-a", 300, false),
            allocation("beef", 1, "asset-b", 7, true),
        ],
    );

    let first = ledger.apply_chain_snapshot(&snap, hours(1)).await.unwrap();
    let utxos_once = ledger.list_utxos().await.unwrap();
    let assets_once = ledger.list_assets(AssetFilter::All).await.unwrap();

    let second = ledger.apply_chain_snapshot(&snap, hours(2)).await.unwrap();
    assert_eq!(ledger.list_utxos().await.unwrap(), utxos_once);
    assert_eq!(ledger.list_assets(AssetFilter::All).await.unwrap(), assets_once);

    assert_eq!(first.assets_registered, vec!["asset-b".to_string()]);
    assert!(second.assets_registered.is_empty());
    assert_eq!(second.utxos_pruned, 0);
    assert_eq!(second.allocations_applied, first.allocations_applied);
}

#[tokio::test]
async fn missing_and_spent_outputs_are_pruned() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 600).await;
    ledger
        .apply_chain_snapshot(
            &snapshot(
                vec![utxo(FUNDING_TXID, 0, true), utxo("beef", 1, true)],
                vec![
                    allocation(FUNDING_TXID, 0, "asset-a", 600, true),
                    allocation("beef", 1, "asset-a", 400, true),
                ],
            ),
            hours(1),
        )
        .await
        .unwrap();

    let mut spent = utxo(FUNDING_TXID, 0, true);
    spent.exists = false;
    let report = ledger
        .apply_chain_snapshot(
            &snapshot(
                vec![spent, utxo("cafe", 0, true)],
                vec![allocation("cafe", 0, "asset-a", 250, true)],
            ),
            hours(2),
        )
        .await
        .unwrap();
    assert_eq!(report.utxos_pruned, 2);

    let utxos = ledger.list_utxos().await.unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].outpoint.txid, "cafe");
    let balance = assert_balance_sound(&ledger, "asset-a").await;
    assert_eq!(balance.settled, 250);
}

#[tokio::test]
async fn colorable_output_becomes_colored_once_allocated() {
    let ledger = ledger_with_db().await;
    ledger
        .apply_chain_snapshot(
            &snapshot(vec![utxo("beef", 0, true), utxo("cafe", 0, false)], vec![]),
            t0(),
        )
        .await
        .unwrap();

    let classes: Vec<_> = ledger
        .classify_utxos()
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.utxo.outpoint.txid, c.class))
        .collect();
    assert_eq!(
        classes,
        vec![
            ("beef".to_string(), UtxoClass::Colorable),
            ("cafe".to_string(), UtxoClass::Uncolored),
        ]
    );

    ledger
        .apply_chain_snapshot(
            &snapshot(
                vec![utxo("beef", 0, true), utxo("cafe", 0, false)],
                vec![allocation("beef", 0, "asset-a", 10, true)],
            ),
            hours(1),
        )
        .await
        .unwrap();
    let colored = ledger.utxos_by_class(UtxoClass::Colored).await.unwrap();
    assert_eq!(colored.len(), 1);
    assert_eq!(colored[0].outpoint.txid, "beef");
    assert!(
        ledger
            .utxos_by_class(UtxoClass::Colorable)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn unknown_assets_are_auto_registered_and_grow_with_observations() {
    let ledger = ledger_with_db().await;
    let report = ledger
        .apply_chain_snapshot(
            &snapshot(
                vec![utxo("beef", 0, true)],
                vec![allocation("beef", 0, "asset-x", 40, true)],
            ),
            t0(),
        )
        .await
        .unwrap();
    assert_eq!(report.assets_registered, vec!["asset-x".to_string()]);

    let asset = ledger.asset("asset-x").await.unwrap();
    assert!(asset.auto_registered);
    assert_eq!(asset.issued_supply, 40);
    assert_eq!(asset.balance.settled, 40);

    ledger
        .apply_chain_snapshot(
            &snapshot(
                vec![utxo("beef", 0, true), utxo("beef", 1, true)],
                vec![
                    allocation("beef", 0, "asset-x", 40, true),
                    allocation("beef", 1, "asset-x", 60, true),
                ],
            ),
            hours(1),
        )
        .await
        .unwrap();
    let asset = ledger.asset("asset-x").await.unwrap();
    assert_eq!(asset.issued_supply, 100);
    assert_balance_sound(&ledger, "asset-x").await;
}

#[tokio::test]
async fn dropped_allocations_mark_the_ledger_stale_until_a_clean_snapshot() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 1_000, 600).await;
    assert!(!ledger.ledger_status().await.unwrap().stale);

    let report = ledger
        .apply_chain_snapshot(
            &snapshot(
                vec![utxo(FUNDING_TXID, 0, true), utxo("cafe", 0, false)],
                vec![
                    allocation(FUNDING_TXID, 0, "asset-a", 600, true),
                    allocation("dead", 3, "asset-a", 5, true),
                    allocation("cafe", 0, "asset-a", 5, true),
                    SnapshotAllocation {
                        asset_id: None,
                        ..allocation(FUNDING_TXID, 0, "", 9, true)
                    },
                ],
            ),
            hours(1),
        )
        .await
        .unwrap();
    assert!(report.is_stale());
    let mut reasons: Vec<_> = report.dropped.iter().map(|d| d.reason).collect();
    reasons.sort_by_key(|r| format!("{r:?}"));
    assert_eq!(
        reasons,
        vec![
            StaleReason::MissingAsset,
            StaleReason::NotColorable,
            StaleReason::UnknownOutpoint,
        ]
    );

    let status = ledger.ledger_status().await.unwrap();
    assert!(status.stale);
    assert_eq!(status.dropped_allocations, 3);
    assert_eq!(status.last_snapshot_at, Some(hours(1)));
    assert_eq!(assert_balance_sound(&ledger, "asset-a").await.settled, 600);

    ledger
        .apply_chain_snapshot(&funding_snapshot("asset-a", 600), hours(2))
        .await
        .unwrap();
    let status = ledger.ledger_status().await.unwrap();
    assert!(!status.stale);
    assert_eq!(status.dropped_allocations, 0);
}

#[tokio::test]
async fn settled_allocations_never_exceed_registered_supply() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 1_000, 600).await;

    let report = ledger
        .apply_chain_snapshot(
            &snapshot(
                vec![utxo(FUNDING_TXID, 0, true), utxo("beef", 0, true)],
                vec![
                    allocation(FUNDING_TXID, 0, "asset-a", 600, true),
                    allocation("beef", 0, "asset-a", 500, true),
                ],
            ),
            hours(1),
        )
        .await
        .unwrap();
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].reason, StaleReason::ExceedsSupply);

    let asset = ledger.asset("asset-a").await.unwrap();
    assert!(asset.balance.settled <= asset.issued_supply);
    assert_balance_sound(&ledger, "asset-a").await;
}

#[tokio::test]
async fn hidden_assets_leave_the_default_listing_but_keep_their_balance() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 1_000, 600).await;
    ledger
        .set_asset_visibility("asset-a", Visibility::Hidden)
        .await
        .unwrap();

    assert!(ledger.list_assets(AssetFilter::Visible).await.unwrap().is_empty());
    let hidden = ledger.list_assets(AssetFilter::Hidden).await.unwrap();
    assert_eq!(hidden.len(), 1);
    assert!(hidden[0].is_hidden());
    assert_eq!(ledger.get_balance("asset-a").await.unwrap().settled, 600);

    ledger
        .set_asset_visibility("asset-a", Visibility::Default)
        .await
        .unwrap();
    assert_eq!(ledger.list_assets(AssetFilter::Visible).await.unwrap().len(), 1);
}

#[tokio::test]
async fn issuance_allocates_supply_on_a_known_output() {
    let ledger = ledger_with_db().await;
    ledger
        .apply_chain_snapshot(&snapshot(vec![utxo("beef", 0, true)], vec![]), t0())
        .await
        .unwrap();

    let transfer = ledger
        .record_issuance(
            NewAsset::new("asset-i", AssetKind::Coin, "Issued", 5_000)
                .issue_utxo(Outpoint::new("beef", 0)),
            hours(1),
        )
        .await
        .unwrap();
    assert_eq!(transfer.kind, TransferKind::Issuance);
    assert_eq!(transfer.status, TransferStatus::Settled);

    let asset = ledger.asset("asset-i").await.unwrap();
    assert_eq!(asset.issued_at, Some(hours(1)));
    assert_eq!(asset.transfers.len(), 1);
    assert_eq!(assert_balance_sound(&ledger, "asset-i").await.settled, 5_000);

    let err = ledger
        .register_asset(
            NewAsset::new("asset-i", AssetKind::Coin, "Again", 1),
            hours(2),
        )
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::ExistingKey("asset-i".to_string()));
}

#[tokio::test]
async fn offchain_figures_ride_along_with_the_balance() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 1_000, 600).await;
    let balance = ledger
        .record_offchain_balance("asset-a", Some(25), Some(10))
        .await
        .unwrap();
    assert_eq!(balance.offchain_inbound, Some(25));
    assert_eq!(balance.offchain_outbound, Some(10));
    assert_eq!(balance.settled, 600);
    assert_eq!(assert_balance_sound(&ledger, "asset-a").await, balance);
}
