use rust_decimal_macros::dec;
use simgate::application::BatchRequest;
use simgate::application::batch::BatchItemStatus;
use simgate::config::EngineConfig;
use simgate::domain::money::Balance;
use simgate::domain::preview::Preview;
use simgate::domain::simulation::FindingCode;

mod common;
use common::{Harness, TENANT, fx_transfer, harness, harness_with, refund, transfer};

/// The default world with the refunds' recipient down to 600.
async fn thin_recipient() -> Harness {
    let mut seed = common::seed();
    let recipient = seed
        .accounts
        .iter_mut()
        .find(|a| a.id == "acc_recipient")
        .unwrap();
    recipient.balance = Balance::new(dec!(600));
    harness_with(seed, EngineConfig::default()).await
}

fn balance_after(item: &simgate::application::batch::BatchItem) -> rust_decimal::Decimal {
    match item.simulation.as_ref().and_then(|s| s.preview.as_ref()) {
        Some(Preview::Transfer(t)) => t.balance_after.value(),
        Some(Preview::Refund(r)) => r.recipient_balance_after.value(),
        other => panic!("unexpected preview {other:?}"),
    }
}

#[tokio::test]
async fn test_running_balance_within_one_account() {
    let h = harness().await;
    let request = BatchRequest {
        simulations: vec![
            transfer("acc_small", "acc_dest", "1000", "USD"),
            transfer("acc_small", "acc_dest", "1000", "USD"),
            transfer("acc_small", "acc_dest", "1000", "USD"),
        ],
        stop_on_first_error: false,
        deadline_ms: None,
    };
    let result = h.services.batches.run(TENANT, request).await.unwrap();

    let statuses: Vec<_> = result.items.iter().map(|i| i.status).collect();
    assert_eq!(
        statuses,
        vec![
            BatchItemStatus::Completed,
            BatchItemStatus::Completed,
            BatchItemStatus::Failed
        ]
    );
    assert_eq!(balance_after(&result.items[0]), dec!(1500));
    assert_eq!(balance_after(&result.items[1]), dec!(500));

    let third = result.items[2].simulation.as_ref().unwrap();
    assert_eq!(third.errors[0].code, FindingCode::InsufficientBalance);
    assert_eq!(third.errors[0].detail["available_amount"], "500");
    assert_eq!(third.errors[0].detail["shortfall"], "500");
    assert!(result.items[2].error.is_some());

    assert_eq!(result.total_count, 3);
    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 1);
    assert!(!result.can_execute_all);

    // Totals cover successful items only.
    let usd = &result.totals["USD"];
    assert_eq!(usd.amount, dec!(2000));
    assert_eq!(usd.fees, dec!(10));
    assert_eq!(usd.count, 2);
    let corridor = &result.corridors["USD-USD"];
    assert_eq!(corridor.rail, "ach");
    assert_eq!(corridor.count, 2);

    // Every evaluated item is stored and nothing moved.
    assert_eq!(h.store.len().await, 3);
    assert_eq!(h.balance("acc_small").await, dec!(2500));
    assert_eq!(h.sandbox.ledger.mutations().await, 0);
}

#[tokio::test]
async fn test_independent_accounts_do_not_share_balances() {
    let h = harness().await;
    let request = BatchRequest {
        simulations: vec![
            transfer("acc_small", "acc_dest", "2000", "USD"),
            transfer("acc_other", "acc_dest", "2000", "USD"),
            fx_transfer("acc_usd", "acc_brl", "5000", "USD", "BRL"),
        ],
        stop_on_first_error: false,
        deadline_ms: None,
    };
    let result = h.services.batches.run(TENANT, request).await.unwrap();

    assert!(result.can_execute_all);
    assert_eq!(result.successful, 3);
    assert_eq!(balance_after(&result.items[0]), dec!(500));
    assert_eq!(balance_after(&result.items[1]), dec!(500));
    assert_eq!(balance_after(&result.items[2]), dec!(7500));
    assert_eq!(result.totals["USD"].amount, dec!(9000));
    assert_eq!(result.totals["USD"].count, 3);
    assert_eq!(result.corridors["USD-BRL"].rail, "pix");
    assert_eq!(result.corridors["USD-BRL"].fees, dec!(50));
}

#[tokio::test]
async fn test_items_are_executable_individually() {
    let h = harness().await;
    let request = BatchRequest {
        simulations: vec![
            transfer("acc_small", "acc_dest", "1000", "USD"),
            transfer("acc_small", "acc_dest", "1000", "USD"),
        ],
        stop_on_first_error: false,
        deadline_ms: None,
    };
    let result = h.services.batches.run(TENANT, request).await.unwrap();
    assert!(result.can_execute_all);

    for item in &result.items {
        let id = item.simulation.as_ref().unwrap().id;
        h.services.gate.execute(TENANT, id).await.unwrap();
    }
    assert_eq!(h.balance("acc_small").await, dec!(500));
    assert_eq!(h.sandbox.ledger.mutations().await, 2);
}

#[tokio::test]
async fn test_stop_on_first_error() {
    let h = harness().await;
    let request = BatchRequest {
        simulations: vec![
            transfer("acc_small", "acc_dest", "2000", "USD"),
            transfer("acc_small", "acc_dest", "1000", "USD"),
            transfer("acc_other", "acc_dest", "10", "USD"),
        ],
        stop_on_first_error: true,
        deadline_ms: None,
    };
    let result = h.services.batches.run(TENANT, request).await.unwrap();

    assert_eq!(result.items[0].status, BatchItemStatus::Completed);
    assert_eq!(result.items[1].status, BatchItemStatus::Failed);
    assert_eq!(result.items[2].status, BatchItemStatus::NotEvaluated);
    assert!(result.items[2].simulation.is_none());
    assert_eq!(result.not_evaluated, 1);
    assert_eq!(h.store.len().await, 2);
}

#[tokio::test]
async fn test_malformed_item_fails_alone() {
    let h = harness().await;
    let request = BatchRequest {
        simulations: vec![
            transfer("acc_small", "acc_dest", "0", "USD"),
            transfer("acc_small", "acc_dest", "100", "USD"),
        ],
        stop_on_first_error: false,
        deadline_ms: None,
    };
    let result = h.services.batches.run(TENANT, request).await.unwrap();

    let rejected = &result.items[0];
    assert_eq!(rejected.index, 0);
    assert_eq!(rejected.status, BatchItemStatus::Failed);
    assert!(rejected.simulation.is_none());
    assert_eq!(rejected.fields[0].field, "amount");
    assert_eq!(result.items[1].status, BatchItemStatus::Completed);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn test_refunds_of_one_transfer_accumulate() {
    let h = harness().await;
    let request = BatchRequest {
        simulations: vec![
            refund("tr_500", Some("200")),
            refund("tr_500", Some("200")),
        ],
        stop_on_first_error: false,
        deadline_ms: None,
    };
    let result = h.services.batches.run(TENANT, request).await.unwrap();

    assert_eq!(result.items[0].status, BatchItemStatus::Completed);
    assert_eq!(balance_after(&result.items[0]), dec!(9800));
    // 300 remained before the batch; the first refund leaves 100.
    let second = result.items[1].simulation.as_ref().unwrap();
    assert_eq!(result.items[1].status, BatchItemStatus::Failed);
    assert_eq!(second.errors[0].code, FindingCode::RefundExceedsRemaining);
    assert_eq!(second.errors[0].detail["remaining"], "100");
}

#[tokio::test]
async fn test_refund_sees_transfers_from_the_recipient() {
    let h = thin_recipient().await;
    let request = BatchRequest {
        simulations: vec![
            transfer("acc_recipient", "acc_dest", "500", "USD"),
            refund("tr_closing", Some("500")),
        ],
        stop_on_first_error: false,
        deadline_ms: None,
    };
    let result = h.services.batches.run(TENANT, request).await.unwrap();

    assert_eq!(result.items[0].status, BatchItemStatus::Completed);
    assert_eq!(balance_after(&result.items[0]), dec!(100));
    let refunded = result.items[1].simulation.as_ref().unwrap();
    assert_eq!(result.items[1].status, BatchItemStatus::Failed);
    assert_eq!(refunded.errors[0].code, FindingCode::InsufficientBalance);
    assert_eq!(refunded.errors[0].detail["available_amount"], "100");
    assert_eq!(refunded.errors[0].detail["shortfall"], "400");
    assert!(!result.can_execute_all);
}

#[tokio::test]
async fn test_refunds_of_different_transfers_share_the_recipient_balance() {
    let h = thin_recipient().await;
    let request = BatchRequest {
        simulations: vec![
            refund("tr_500", None),
            refund("tr_closing", None),
            transfer("acc_recipient", "acc_dest", "100", "USD"),
        ],
        stop_on_first_error: false,
        deadline_ms: None,
    };
    let result = h.services.batches.run(TENANT, request).await.unwrap();

    // tr_500 has 300 left to refund.
    assert_eq!(result.items[0].status, BatchItemStatus::Completed);
    assert_eq!(balance_after(&result.items[0]), dec!(300));
    let second = result.items[1].simulation.as_ref().unwrap();
    assert_eq!(result.items[1].status, BatchItemStatus::Failed);
    assert_eq!(second.errors[0].code, FindingCode::InsufficientBalance);
    assert_eq!(second.errors[0].detail["shortfall"], "200");
    // The failed refund debits nothing.
    assert_eq!(result.items[2].status, BatchItemStatus::Completed);
    assert_eq!(balance_after(&result.items[2]), dec!(200));
}

#[tokio::test]
async fn test_deadline_leaves_items_not_evaluated() {
    let h = harness().await;
    let request = BatchRequest {
        simulations: vec![
            transfer("acc_small", "acc_dest", "10", "USD"),
            transfer("acc_other", "acc_dest", "10", "USD"),
        ],
        stop_on_first_error: false,
        deadline_ms: Some(0),
    };
    let result = h.services.batches.run(TENANT, request).await.unwrap();

    assert_eq!(result.not_evaluated, 2);
    assert_eq!(result.successful, 0);
    assert!(!result.can_execute_all);
    assert!(result.totals.is_empty());
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_empty_batch() {
    let h = harness().await;
    let request = BatchRequest {
        simulations: Vec::new(),
        stop_on_first_error: false,
        deadline_ms: None,
    };
    let result = h.services.batches.run(TENANT, request).await.unwrap();
    assert_eq!(result.total_count, 0);
    assert!(result.can_execute_all);
}
