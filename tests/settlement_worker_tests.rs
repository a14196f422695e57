//! Worker pool and recovery crank running against in-memory mocks.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use upi_wallet_ledger::app::{
    AppService, SettlementQueue, SettlementStep, WorkerConfig, spawn_crank, spawn_worker,
};
use upi_wallet_ledger::domain::{
    CreateTransferRequest, LoadWalletRequest, PayoutStatus, RecipientType, TransferStatus,
};
use upi_wallet_ledger::test_utils::{MockDatabaseClient, MockPayoutProvider};

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        enabled: true,
        workers: 2,
        queue_capacity: 16,
        crank_interval: Duration::from_millis(50),
        crank_batch_size: 10,
    }
}

fn dec(value: &str) -> Decimal {
    value.parse().unwrap()
}

struct Running {
    service: Arc<AppService>,
    shutdown: Vec<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl Running {
    async fn stop(self) {
        for tx in &self.shutdown {
            let _ = tx.send(true);
        }
        for handle in self.handles {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
    }
}

/// Start a service with a queue, its worker pool and optionally the crank
fn start(
    db: &Arc<MockDatabaseClient>,
    payout: &Arc<MockPayoutProvider>,
    with_crank: bool,
) -> Running {
    let config = worker_config();
    let (queue, receiver) = SettlementQueue::bounded(config.queue_capacity);
    let service = Arc::new(
        AppService::new(Arc::clone(db) as _, Arc::clone(payout) as _).with_queue(queue),
    );
    let (worker_handle, worker_tx) = spawn_worker(Arc::clone(&service), receiver, config.clone());
    let mut shutdown = vec![worker_tx];
    let mut handles = vec![worker_handle];
    if with_crank {
        let (crank_handle, crank_tx) = spawn_crank(Arc::clone(&service), config);
        shutdown.push(crank_tx);
        handles.push(crank_handle);
    }
    Running {
        service,
        shutdown,
        handles,
    }
}

async fn funded_wallet(service: &AppService, user_id: &str, balance: &str) -> String {
    let wallet = service.create_wallet(user_id).await.unwrap();
    service
        .load_wallet(
            &wallet.id,
            &LoadWalletRequest {
                amount: dec(balance),
                gateway_order_id: format!("order_{}", user_id),
                gateway_payment_id: format!("pay_{}", user_id),
            },
        )
        .await
        .unwrap();
    wallet.id
}

fn status_of(db: &MockDatabaseClient, id: &str) -> TransferStatus {
    db.get_all_transfers()
        .into_iter()
        .find(|t| t.id == id)
        .unwrap()
        .status
}

/// Wait until the transfer reaches `expected`, failing after two seconds
async fn wait_for_status(db: &MockDatabaseClient, id: &str, expected: TransferStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = status_of(db, id);
        if status == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "transfer {} stuck in {:?}, expected {:?}",
            id,
            status,
            expected
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_created_transfer_is_submitted_by_worker_pool() {
    let db = Arc::new(MockDatabaseClient::new());
    let payout = Arc::new(MockPayoutProvider::new());
    let running = start(&db, &payout, false);

    let wallet_id = funded_wallet(&running.service, "user_1", "1000").await;
    let response = running
        .service
        .create_transfer(
            &wallet_id,
            &CreateTransferRequest::new(dec("100"), RecipientType::Upi, "friend@okbank"),
        )
        .await
        .unwrap();

    wait_for_status(&db, &response.id, TransferStatus::Processing).await;
    assert_eq!(payout.create_calls(), 1);
    let transfer = db.get_all_transfers().pop().unwrap();
    assert!(transfer.external_id.is_some());
    assert!(transfer.submitted_at.is_some());

    running.stop().await;
}

#[tokio::test]
async fn test_crank_recovers_in_flight_transfers_after_restart() {
    let db = Arc::new(MockDatabaseClient::new());
    let payout = Arc::new(MockPayoutProvider::new());

    // First process: no workers, so nothing settles before the "crash"
    let before = AppService::new(Arc::clone(&db) as _, Arc::clone(&payout) as _);
    let wallet_id = funded_wallet(&before, "user_1", "1000").await;
    let mut ids = Vec::new();
    for amount in ["100", "200", "50"] {
        let response = before
            .create_transfer(
                &wallet_id,
                &CreateTransferRequest::new(dec(amount), RecipientType::Upi, "friend@okbank"),
            )
            .await
            .unwrap();
        ids.push(response.id);
    }
    let (settled, failed, unsubmitted) = (&ids[0], &ids[1], &ids[2]);

    for id in [settled, failed] {
        db.make_due(id);
        assert_eq!(
            before.settle_transfer(id).await.unwrap(),
            SettlementStep::Submitted
        );
    }
    assert_eq!(db.balance(&wallet_id), Some(dec("644")));
    drop(before);

    for (id, status) in [
        (settled, PayoutStatus::Processed),
        (failed, PayoutStatus::Failed(Some("invalid vpa".to_string()))),
    ] {
        let transfer = db
            .get_all_transfers()
            .into_iter()
            .find(|t| &t.id == id)
            .unwrap();
        payout.set_status(transfer.external_id.as_deref().unwrap(), status);
        db.make_due(id);
    }

    // Second process: only persisted state is left
    let running = start(&db, &payout, true);

    wait_for_status(&db, settled, TransferStatus::Success).await;
    wait_for_status(&db, failed, TransferStatus::Failed).await;
    wait_for_status(&db, unsubmitted, TransferStatus::Processing).await;
    assert_eq!(payout.create_calls(), 3);
    // 1000 - 102 - 52 reserved; the failed 202 came back
    assert_eq!(db.balance(&wallet_id), Some(dec("846")));

    running.stop().await;
}

#[tokio::test]
async fn test_enqueue_due_transfers_without_queue_is_noop() {
    let db = Arc::new(MockDatabaseClient::new());
    let payout = Arc::new(MockPayoutProvider::new());
    let service = AppService::new(Arc::clone(&db) as _, Arc::clone(&payout) as _);
    let wallet_id = funded_wallet(&service, "user_1", "500").await;
    service
        .create_transfer(
            &wallet_id,
            &CreateTransferRequest::new(dec("10"), RecipientType::Upi, "friend@okbank"),
        )
        .await
        .unwrap();

    assert_eq!(service.enqueue_due_transfers(10).await.unwrap(), 0);
}

#[tokio::test]
async fn test_enqueue_due_transfers_queues_only_due_transfers_once() {
    let db = Arc::new(MockDatabaseClient::new());
    let payout = Arc::new(MockPayoutProvider::new());
    let unqueued = AppService::new(Arc::clone(&db) as _, Arc::clone(&payout) as _);
    let wallet_id = funded_wallet(&unqueued, "user_1", "500").await;
    let mut ids = Vec::new();
    for amount in ["10", "20"] {
        let response = unqueued
            .create_transfer(
                &wallet_id,
                &CreateTransferRequest::new(dec(amount), RecipientType::Upi, "friend@okbank"),
            )
            .await
            .unwrap();
        ids.push(response.id);
    }
    db.make_due(&ids[0]);
    db.update_transfer(&ids[1], |t| {
        t.next_attempt_at = Some(chrono::Utc::now() + chrono::Duration::minutes(5));
    });

    let (queue, _receiver) = SettlementQueue::bounded(8);
    let service = AppService::new(Arc::clone(&db) as _, Arc::clone(&payout) as _)
        .with_queue(queue.clone());

    assert_eq!(service.enqueue_due_transfers(10).await.unwrap(), 1);
    assert_eq!(queue.pending(), 1);
    // Still queued and not yet picked up by a worker
    assert_eq!(service.enqueue_due_transfers(10).await.unwrap(), 0);
}
