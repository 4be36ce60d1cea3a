mod common;

use collection_saga::application::orchestrator::{CancelOutcome, CompletionOutcome, CompletionReport};
use collection_saga::domain::collection::{CollectionStatus, PaymentMethod};
use collection_saga::domain::collector::Collector;
use collection_saga::domain::events::{FinalPaymentSettled, Notification};
use collection_saga::domain::money::Money;
use collection_saga::domain::ports::{CollectionStore, CollectorDirectory, WalletService};
use common::Harness;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_request_pay_schedule_cancel() {
    let h = Harness::start(vec![Collector::new("c1", "north", 5)]).await;

    let quote = h.request("u1", &[("A", 2)]).await;
    assert_eq!(quote.estimated_cost, Money::new(dec!(60)));

    h.pay("u1", "p1", quote.estimated_cost).await;
    h.settle().await;

    let collection = h.store.find_by_payment("p1").await.unwrap().unwrap();
    assert_eq!(collection.collection_id, quote.collection_id);
    assert_eq!(collection.status, CollectionStatus::Scheduled);
    assert_eq!(collection.estimated_cost, Money::new(dec!(60)));
    assert_eq!(collection.collector_id.as_deref(), Some("c1"));
    assert_eq!(h.tasks_on("c1").await, 1);

    let outcome = h
        .saga
        .cancel(&collection.collection_id, "plans changed")
        .await
        .unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled { compensations: 2 });
    h.settle().await;

    let collection = h.saga.collection(&collection.collection_id).await.unwrap();
    assert_eq!(collection.status, CollectionStatus::Cancelled);
    assert_eq!(h.tasks_on("c1").await, 0);
    assert_eq!(h.wallet.balance("u1").await.unwrap(), Money::new(dec!(60)));

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn test_request_pay_schedule_complete() {
    let h = Harness::start(vec![Collector::new("c1", "north", 5)]).await;

    let quote = h.request("u1", &[("A", 1), ("B", 2)]).await;
    assert_eq!(quote.estimated_cost, Money::new(dec!(121)));
    h.pay("u1", "p1", quote.estimated_cost).await;
    h.settle().await;

    let outcome = h
        .saga
        .complete_with_cash_payment(
            &quote.collection_id,
            CompletionReport {
                proofs: vec!["before.jpg".to_string(), "after.jpg".to_string()],
                feedback: Some("friendly".to_string()),
            },
            Money::new(dec!(118.5)),
        )
        .await
        .unwrap();
    let CompletionOutcome::Completed(collection) = outcome else {
        panic!("expected a fresh completion");
    };
    let completion = collection.completion.unwrap();
    assert_eq!(completion.proofs.len(), 2);
    assert_eq!(completion.method, PaymentMethod::Cash);

    let settlements = h.bus.published_messages::<FinalPaymentSettled>().await;
    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].collection_id, quote.collection_id);
    assert_eq!(settlements[0].amount, Money::new(dec!(118.5)));

    let notifications = h.bus.published_messages::<Notification>().await;
    let titles: Vec<&str> = notifications.iter().map(|n| n.title.as_str()).collect();
    assert_eq!(titles, vec!["Pickup scheduled", "Pickup completed"]);

    // Completed work keeps its slot.
    assert_eq!(h.tasks_on("c1").await, 1);
    h.runtime.shutdown().await;
}

#[tokio::test]
async fn test_pending_collection_is_picked_up_by_sweep() {
    let h = Harness::start(vec![]).await;

    h.request("u1", &[("A", 2)]).await;
    h.pay("u1", "p1", Money::new(dec!(60))).await;
    h.settle().await;

    let collection = h.store.find_by_payment("p1").await.unwrap().unwrap();
    assert_eq!(collection.status, CollectionStatus::Pending);
    assert_eq!(collection.collector_id, None);

    h.directory
        .register(Collector::new("c1", "north", 1))
        .await
        .unwrap();
    let report = h.saga.sweep_pending().await.unwrap();
    assert_eq!(report.scheduled, 1);

    let collection = h.store.find_by_payment("p1").await.unwrap().unwrap();
    assert_eq!(collection.status, CollectionStatus::Scheduled);
    h.runtime.shutdown().await;
}

#[tokio::test]
async fn test_cancel_pending_collection_refunds_only() {
    let h = Harness::start(vec![]).await;

    h.request("u1", &[("A", 2)]).await;
    h.pay("u1", "p1", Money::new(dec!(60))).await;
    h.settle().await;
    let collection = h.store.find_by_payment("p1").await.unwrap().unwrap();

    let outcome = h.saga.cancel(&collection.collection_id, "no rush").await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled { compensations: 1 });
    h.settle().await;

    assert_eq!(h.wallet.balance("u1").await.unwrap(), Money::new(dec!(60)));
    h.runtime.shutdown().await;
}
