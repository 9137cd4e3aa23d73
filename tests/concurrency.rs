use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rust_decimal::Decimal;
use wallet_ledger::config::EngineConfig;
use wallet_ledger::ledger::{
    AccountRef, AdjustRequest, BalanceAdjuster, DirectoryResolver, LedgerError, LedgerWriter,
    Platform, TransferEngine, TransferId, TransferRequest,
};
use wallet_ledger::store::MemoryStore;

const SENDERS: usize = 20;

fn setup(max_attempts: u32) -> (Arc<MemoryStore>, TransferEngine, BalanceAdjuster) {
    let store = Arc::new(MemoryStore::new());
    let config = EngineConfig {
        max_attempts,
        backoff_base_ms: 1,
        backoff_max_ms: 10,
        ..EngineConfig::default()
    };
    let writer = Arc::new(LedgerWriter::new(store.clone(), store.clone(), config));
    let resolver = Arc::new(DirectoryResolver::new(store.clone(), Duration::from_secs(5)));
    (
        store,
        TransferEngine::new(writer.clone(), resolver),
        BalanceAdjuster::new(writer),
    )
}

/// N×amount > balance: exactly floor(balance/amount) win, the rest are
/// InsufficientFunds, never a negative balance
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_debits_of_one_account() {
    // Every conflict is caused by a winning debit, so N+1 attempts can never run out
    let (store, engine, _) = setup(SENDERS as u32 + 1);
    let source = store.seed(Platform::GCash, "src", "09170000000", Decimal::new(10000, 2));
    for i in 0..SENDERS {
        store.seed(
            Platform::GCash,
            &format!("dst{}", i),
            &format!("0918000{:04}", i),
            Decimal::ZERO,
        );
    }

    let amount = Decimal::new(1500, 2);
    let tasks = (0..SENDERS).map(|i| {
        let engine = engine.clone();
        async move {
            engine
                .transfer(TransferRequest::new(
                    Platform::GCash,
                    "09170000000",
                    format!("0918000{:04}", i),
                    amount,
                ))
                .await
        }
    });
    let results = join_all(tasks).await;

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 6);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(
            matches!(result, Err(LedgerError::InsufficientFunds { .. })),
            "{:?}",
            result
        );
    }
    assert_eq!(store.balance(&source), Some(Decimal::new(1000, 2)));
    assert_eq!(store.total_balance(), Decimal::new(10000, 2));
}

/// Transfers around a ring while staff adjust the same accounts
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn mixed_transfers_and_adjustments_stay_consistent() {
    let (store, engine, adjuster) = setup(64);
    let accounts: Vec<AccountRef> = (0..5)
        .map(|i| {
            store.seed(
                Platform::PayPal,
                &i.to_string(),
                &format!("user{}@example.com", i),
                Decimal::new(20000, 2),
            )
        })
        .collect();

    let transfers = (0..40).map(|i| {
        let engine = engine.clone();
        async move {
            engine
                .transfer(TransferRequest::new(
                    Platform::PayPal,
                    format!("user{}@example.com", i % 5),
                    format!("user{}@example.com", (i + 1) % 5),
                    Decimal::new(1000 + i * 10, 2),
                ))
                .await
                .map(|_| Decimal::ZERO)
        }
    });
    let adjustments = (0..10).map(|i| {
        let adjuster = adjuster.clone();
        let account = accounts[i % 5].clone();
        async move {
            let delta = Decimal::new(500, 2);
            adjuster
                .adjust(AdjustRequest {
                    account,
                    delta,
                    reason: Some("promo".into()),
                })
                .await
                .map(|_| delta)
        }
    });

    let (transfer_results, adjust_results) =
        tokio::join!(join_all(transfers), join_all(adjustments));

    for result in &transfer_results {
        if let Err(e) = result {
            assert!(matches!(e, LedgerError::InsufficientFunds { .. }), "{:?}", e);
        }
    }
    let adjusted: Decimal = adjust_results.into_iter().map(|r| r.unwrap()).sum();

    assert_eq!(store.total_balance(), Decimal::new(100000, 2) + adjusted);
    for account in &accounts {
        assert!(store.balance(account).unwrap() >= Decimal::ZERO);
    }

    let succeeded = transfer_results.iter().filter(|r| r.is_ok()).count();
    // Two records per transfer plus one per adjustment
    assert_eq!(store.record_count(), succeeded * 2 + 10);
}

/// Racing requests with one transfer id move money once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_transfer_id_racing() {
    let (store, engine, _) = setup(8);
    let sender = store.seed(Platform::SendWave, "1", "0917 555 0001", Decimal::new(10000, 2));
    store.seed(Platform::SendWave, "2", "0917 555 0002", Decimal::ZERO);

    let id = TransferId::new();
    let tasks = (0..8).map(|_| {
        let engine = engine.clone();
        async move {
            engine
                .transfer(
                    TransferRequest::new(
                        Platform::SendWave,
                        "09175550001",
                        "09175550002",
                        Decimal::new(2500, 2),
                    )
                    .with_transfer_id(id),
                )
                .await
        }
    });
    let results = join_all(tasks).await;

    for result in &results {
        match result {
            Ok(receipt) => assert_eq!(receipt.transfer_id, id),
            Err(e) => assert_eq!(*e, LedgerError::TransferInProgress(id)),
        }
    }
    assert!(results.iter().any(|r| r.is_ok()));
    assert_eq!(store.balance(&sender), Some(Decimal::new(7500, 2)));
    assert_eq!(store.record_count(), 2);
}
