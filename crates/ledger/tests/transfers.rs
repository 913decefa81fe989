mod common;

use common::*;
use ledger::{
    Assignment, BatchStatus, CounterpartyAck, LedgerError, LedgerGuards, Outpoint, Recipient,
    SendCmd, TransferKind, TransferStatus, TransitionOutcome,
};

async fn send(ledger: &ledger::Ledger, asset_id: &str, amounts: &[u64]) -> Vec<i32> {
    let mut cmd = SendCmd::new(asset_id, hours(1));
    for (n, amount) in amounts.iter().enumerate() {
        cmd = cmd.recipient(Recipient::new(format!("utxob:recipient{n}"), *amount));
    }
    ledger.create_send_transfer(cmd).await.unwrap()
}

#[tokio::test]
async fn send_reserves_spendable_until_cancelled() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;
    assert_eq!(ledger.get_balance("asset-a").await.unwrap().spendable, 1_000);

    let idxs = send(&ledger, "asset-a", &[500]).await;
    let balance = assert_balance_sound(&ledger, "asset-a").await;
    assert_eq!(balance.spendable, 500);
    assert_eq!(balance.settled, 1_000);
    assert_eq!(balance.future, 1_000);

    let transfer = ledger.cancel_transfer(idxs[0], hours(2)).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Failed);
    let balance = assert_balance_sound(&ledger, "asset-a").await;
    assert_eq!(balance.spendable, 1_000);
}

#[tokio::test]
async fn sending_more_than_spendable_fails() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;
    send(&ledger, "asset-a", &[700]).await;

    let err = ledger
        .create_send_transfer(
            SendCmd::new("asset-a", hours(1)).recipient(Recipient::new("utxob:other", 400)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds(_)));

    let err = ledger
        .create_send_transfer(
            SendCmd::new("asset-a", hours(1)).recipient(Recipient::new("utxob:other", 0)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));
    assert_eq!(assert_balance_sound(&ledger, "asset-a").await.spendable, 300);
}

#[tokio::test]
async fn guards_block_sends_with_a_retryable_error() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;

    let err = ledger
        .create_send_transfer(
            SendCmd::new("asset-a", hours(1))
                .recipient(Recipient::new("utxob:r", 10))
                .guards(LedgerGuards::default().backup_in_progress(true)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ConcurrentModification(_)));
    assert_eq!(ledger.get_balance("asset-a").await.unwrap().spendable, 1_000);
}

#[tokio::test]
async fn concurrent_sends_never_over_reserve() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;

    let first = ledger.create_send_transfer(
        SendCmd::new("asset-a", hours(1)).recipient(Recipient::new("utxob:a", 600)),
    );
    let second = ledger.create_send_transfer(
        SendCmd::new("asset-a", hours(1)).recipient(Recipient::new("utxob:b", 600)),
    );
    let (first, second) = tokio::join!(first, second);

    let ok = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert!(ok <= 1);
    for result in [first, second] {
        if let Err(err) = result {
            assert!(matches!(
                err,
                LedgerError::ConcurrentModification(_) | LedgerError::InsufficientFunds(_)
            ));
        }
    }
    let balance = assert_balance_sound(&ledger, "asset-a").await;
    assert!(balance.spendable >= 400);
}

#[tokio::test]
async fn cancel_is_only_legal_while_waiting_for_the_counterparty() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;
    let idx = send(&ledger, "asset-a", &[100]).await[0];

    ledger
        .on_counterparty_ack(idx, CounterpartyAck::default().txid("aa"), hours(2))
        .await
        .unwrap();
    let err = ledger.cancel_transfer(idx, hours(2)).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidStateTransition(_)));

    ledger.on_chain_confirmed(idx, "aa", hours(3)).await.unwrap();
    let err = ledger.cancel_transfer(idx, hours(4)).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidStateTransition(_)));

    let transfer = ledger.transfer(idx).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Settled);
    assert_eq!(transfer.txid.as_deref(), Some("aa"));
}

#[tokio::test]
async fn redelivered_events_are_duplicates() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;
    let idx = send(&ledger, "asset-a", &[100]).await[0];

    let first = ledger
        .on_counterparty_ack(idx, CounterpartyAck::default(), hours(2))
        .await
        .unwrap();
    assert_eq!(
        first,
        TransitionOutcome::Applied {
            from: TransferStatus::WaitingCounterparty,
            to: TransferStatus::WaitingConfirmations,
        }
    );
    let version = ledger.transfer(idx).await.unwrap().version;

    let again = ledger
        .on_counterparty_ack(idx, CounterpartyAck::default().txid("zz"), hours(3))
        .await
        .unwrap();
    assert_eq!(
        again,
        TransitionOutcome::Duplicate {
            status: TransferStatus::WaitingConfirmations
        }
    );
    let transfer = ledger.transfer(idx).await.unwrap();
    assert_eq!(transfer.version, version);
    assert_eq!(transfer.txid, None);

    ledger.on_chain_confirmed(idx, "tx", hours(4)).await.unwrap();
    let again = ledger.on_chain_confirmed(idx, "tx", hours(5)).await.unwrap();
    assert_eq!(
        again,
        TransitionOutcome::Duplicate {
            status: TransferStatus::Settled
        }
    );
}

#[tokio::test]
async fn confirming_before_the_ack_is_rejected() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;
    let idx = send(&ledger, "asset-a", &[100]).await[0];

    let err = ledger.on_chain_confirmed(idx, "tx", hours(2)).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidStateTransition(_)));
    let transfer = ledger.transfer(idx).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::WaitingCounterparty);
}

#[tokio::test]
async fn batch_settles_only_when_every_member_is_terminal() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;
    let idxs = send(&ledger, "asset-a", &[100, 200]).await;
    assert_eq!(idxs.len(), 2);

    let batch = ledger.transfer(idxs[0]).await.unwrap().batch_transfer_idx;
    assert_eq!(ledger.transfer(idxs[1]).await.unwrap().batch_transfer_idx, batch);
    assert_eq!(
        ledger.batch_status(batch).await.unwrap(),
        BatchStatus::Pending { waiting: 2 }
    );

    for idx in &idxs {
        ledger
            .on_counterparty_ack(*idx, CounterpartyAck::default().txid("bb"), hours(2))
            .await
            .unwrap();
    }
    ledger.on_chain_confirmed(idxs[0], "bb", hours(3)).await.unwrap();
    assert_eq!(
        ledger.batch_status(batch).await.unwrap(),
        BatchStatus::Pending { waiting: 1 }
    );

    ledger
        .fail_transfer(idxs[1], "broadcast rejected", hours(3))
        .await
        .unwrap();
    let status = ledger.batch_status(batch).await.unwrap();
    assert_eq!(status, BatchStatus::Mixed);
    assert!(status.is_terminal());
    assert_balance_sound(&ledger, "asset-a").await;
}

#[tokio::test]
async fn failing_a_batch_releases_every_reservation() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;
    let idxs = send(&ledger, "asset-a", &[300, 400]).await;
    assert_eq!(ledger.get_balance("asset-a").await.unwrap().spendable, 300);

    let batch = ledger.transfer(idxs[0]).await.unwrap().batch_transfer_idx;
    let mut failed = ledger.fail_batch(batch, "expired", hours(2)).await.unwrap();
    failed.sort_unstable();
    assert_eq!(failed, idxs);
    assert_eq!(ledger.batch_status(batch).await.unwrap(), BatchStatus::Failed);

    let balance = assert_balance_sound(&ledger, "asset-a").await;
    assert_eq!(balance.spendable, 1_000);

    let transfer = ledger.transfer(idxs[1]).await.unwrap();
    assert_eq!(transfer.failure_reason.as_deref(), Some("expired"));
    assert!(ledger.fail_batch(batch, "again", hours(3)).await.unwrap().is_empty());
    assert!(matches!(
        ledger.batch_status(9_999).await,
        Err(LedgerError::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn settled_receive_raises_the_balance() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;

    let invoice = ledger
        .issue_invoice(
            ledger::IssueInvoiceCmd::new(ledger::InvoiceKind::Blinded, hours(1))
                .asset_id("asset-a")
                .amount(200),
        )
        .await
        .unwrap();
    let idx = ledger
        .attach_receive(
            ledger::IncomingTransferCmd::new(invoice.recipient_id.clone(), hours(2))
                .assignment(Assignment::Fungible { amount: 200 }),
        )
        .await
        .unwrap();

    let transfer = ledger.transfer(idx).await.unwrap();
    assert_eq!(transfer.kind, TransferKind::ReceiveBlind);
    assert_eq!(transfer.batch_transfer_idx, invoice.batch_transfer_idx);
    let balance = assert_balance_sound(&ledger, "asset-a").await;
    assert_eq!(balance.settled, 1_000);
    assert_eq!(balance.future, 1_200);

    let receive_utxo = Outpoint::new("beef", 0);
    ledger
        .on_counterparty_ack(
            idx,
            CounterpartyAck::default()
                .txid("beef")
                .receive_utxo(receive_utxo.clone()),
            hours(3),
        )
        .await
        .unwrap();
    ledger
        .apply_chain_snapshot(
            &snapshot(
                vec![utxo(FUNDING_TXID, 0, true), utxo("beef", 0, true)],
                vec![
                    allocation(FUNDING_TXID, 0, "asset-a", 1_000, true),
                    allocation("beef", 0, "asset-a", 200, false),
                ],
            ),
            hours(4),
        )
        .await
        .unwrap();
    assert_eq!(assert_balance_sound(&ledger, "asset-a").await.future, 1_200);

    ledger.on_chain_confirmed(idx, "beef", hours(5)).await.unwrap();
    let balance = assert_balance_sound(&ledger, "asset-a").await;
    assert_eq!(balance.settled, 1_200);
    assert_eq!(balance.future, 1_200);
    assert_eq!(balance.spendable, 1_200);
    assert!(ledger.get_reconciliation_warnings().await.unwrap().is_empty());

    let history = ledger.list_transfers("asset-a").await.unwrap();
    assert_eq!(history[0].idx, idx);
}

#[tokio::test]
async fn sends_to_invoices_are_checked_against_them() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;
    let invoice = ledger
        .issue_invoice(
            ledger::IssueInvoiceCmd::new(ledger::InvoiceKind::Witness, hours(1))
                .asset_id("asset-a")
                .amount(50)
                .transport_endpoints(vec!["rpc://relay".to_string()]),
        )
        .await
        .unwrap();

    let err = ledger
        .create_send_transfer(
            SendCmd::new("asset-a", hours(1)).recipient(Recipient::new(&invoice.invoice, 49)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));

    let err = ledger
        .create_send_transfer(
            SendCmd::new("asset-a", hours(30)).recipient(Recipient::new(&invoice.invoice, 50)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ExpiredInvoice(_)));

    let idxs = ledger
        .create_send_transfer(
            SendCmd::new("asset-a", hours(1)).recipient(Recipient::new(&invoice.invoice, 50)),
        )
        .await
        .unwrap();
    let transfer = ledger.transfer(idxs[0]).await.unwrap();
    assert_eq!(transfer.recipient_id.as_deref(), Some(invoice.recipient_id.as_str()));
    assert_eq!(transfer.transport_endpoints, vec!["rpc://relay".to_string()]);
    assert_eq!(transfer.invoice_string.as_deref(), Some(invoice.invoice.as_str()));
}

#[tokio::test]
async fn balance_invariant_holds_across_a_mixed_history() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;

    let sends = send(&ledger, "asset-a", &[250, 250]).await;
    assert_balance_sound(&ledger, "asset-a").await;
    ledger
        .on_counterparty_ack(
            sends[0],
            CounterpartyAck::default()
                .txid("c0")
                .change_utxo(Outpoint::new("c0", 1)),
            hours(2),
        )
        .await
        .unwrap();
    assert_balance_sound(&ledger, "asset-a").await;
    ledger.cancel_transfer(sends[1], hours(2)).await.unwrap();
    assert_balance_sound(&ledger, "asset-a").await;

    let mut spent = utxo(FUNDING_TXID, 0, true);
    spent.exists = false;
    ledger
        .apply_chain_snapshot(
            &snapshot(
                vec![spent, utxo("c0", 1, true)],
                vec![allocation("c0", 1, "asset-a", 750, false)],
            ),
            hours(3),
        )
        .await
        .unwrap();
    let balance = assert_balance_sound(&ledger, "asset-a").await;
    assert_eq!(balance.settled, 0);
    assert_eq!(balance.spendable, 0);

    ledger.on_chain_confirmed(sends[0], "c0", hours(4)).await.unwrap();
    let balance = assert_balance_sound(&ledger, "asset-a").await;
    assert_eq!(balance.settled, 750);
    assert_eq!(balance.spendable, 750);
    assert_eq!(balance.future, 750);
}

#[tokio::test]
async fn simultaneous_events_on_one_transfer_let_exactly_one_through() {
    let ledger = ledger_with_db().await;
    fund(&ledger, "asset-a", 10_000, 1_000).await;
    let idx = send(&ledger, "asset-a", &[100]).await[0];

    let ack = ledger.on_counterparty_ack(idx, CounterpartyAck::default().txid("aa"), hours(2));
    let cancel = ledger.cancel_transfer(idx, hours(2));
    let (ack, cancel) = tokio::join!(ack, cancel);

    let transfer = ledger.transfer(idx).await.unwrap();
    match (ack, cancel) {
        (Ok(_), Err(err)) => {
            assert!(matches!(err, LedgerError::ConcurrentModification(_)));
            assert!(err.is_retryable());
            assert_eq!(transfer.status, TransferStatus::WaitingConfirmations);
        }
        (Err(err), Ok(_)) => {
            assert!(matches!(err, LedgerError::ConcurrentModification(_)));
            assert_eq!(transfer.status, TransferStatus::Failed);
        }
        other => panic!("expected one success and one conflict, got {other:?}"),
    }
    assert_eq!(transfer.version, 1);
    assert_balance_sound(&ledger, "asset-a").await;
}
