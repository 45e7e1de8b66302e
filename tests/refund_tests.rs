use rust_decimal_macros::dec;
use simgate::domain::preview::{Preview, RefundPreview};
use simgate::domain::simulation::{Finding, FindingCode, Simulation, SimulationStatus};

mod common;
use common::{TENANT, harness, refund};

fn codes(findings: &[Finding]) -> Vec<FindingCode> {
    findings.iter().map(|f| f.code).collect()
}

fn refund_preview(simulation: &Simulation) -> &RefundPreview {
    match &simulation.preview {
        Some(Preview::Refund(preview)) => preview,
        other => panic!("expected refund preview, got {other:?}"),
    }
}

#[tokio::test]
async fn test_refund_exceeding_remaining() {
    let h = harness().await;
    let simulation = h
        .services
        .simulator
        .create(TENANT, refund("tr_500", Some("400")))
        .await
        .unwrap();

    assert!(!simulation.can_execute);
    assert_eq!(codes(&simulation.errors), vec![FindingCode::RefundExceedsRemaining]);
    assert_eq!(simulation.errors[0].detail["remaining"], "300");
    assert_eq!(simulation.errors[0].detail["shortfall"], "100");

    let preview = refund_preview(&simulation);
    assert_eq!(preview.original_amount, dec!(500));
    assert_eq!(preview.already_refunded, dec!(200));
    assert_eq!(preview.remaining_refundable, dec!(300));
}

#[tokio::test]
async fn test_partial_refund_preview() {
    let h = harness().await;
    let simulation = h
        .services
        .simulator
        .create(TENANT, refund("tr_500", Some("100")))
        .await
        .unwrap();

    assert!(simulation.can_execute);
    assert!(simulation.warnings.is_empty());
    let preview = refund_preview(&simulation);
    assert_eq!(preview.refund_amount, dec!(100));
    assert_eq!(preview.recipient_account, "acc_recipient");
    assert_eq!(preview.recipient_debit, dec!(100));
    assert_eq!(preview.recipient_balance_after.value(), dec!(9900));
    assert_eq!(preview.payer_account, "acc_payer");
    assert_eq!(preview.payer_balance_after.value(), dec!(1100));
    assert_eq!(
        preview.refund_deadline,
        Some(common::start() - chrono::Duration::days(2) + chrono::Duration::days(30))
    );
}

#[tokio::test]
async fn test_full_remaining_refund_executes() {
    let h = harness().await;
    let simulation = h
        .services
        .simulator
        .create(TENANT, refund("tr_500", None))
        .await
        .unwrap();

    assert!(simulation.can_execute);
    assert_eq!(refund_preview(&simulation).refund_amount, dec!(300));
    assert_eq!(codes(&simulation.warnings), vec![FindingCode::LargeRefundFraction]);

    let outcome = h.services.gate.execute(TENANT, simulation.id).await.unwrap();
    assert_eq!(outcome.execution_result_id, "rf_000001");
    assert_eq!(outcome.variance.unwrap().amount.unwrap().change, dec!(0));
    assert_eq!(h.balance("acc_payer").await, dec!(1300));
    assert_eq!(h.balance("acc_recipient").await, dec!(9700));

    // Nothing is left to refund afterwards.
    let again = h
        .services
        .simulator
        .create(TENANT, refund("tr_500", None))
        .await
        .unwrap();
    assert!(!again.can_execute);
    assert_eq!(codes(&again.errors), vec![FindingCode::NotRefundable]);
    assert_eq!(refund_preview(&again).remaining_refundable, dec!(0));
}

#[tokio::test]
async fn test_refund_window_expired() {
    let h = harness().await;
    let simulation = h
        .services
        .simulator
        .create(TENANT, refund("tr_old", Some("100")))
        .await
        .unwrap();

    assert!(!simulation.can_execute);
    assert_eq!(codes(&simulation.errors), vec![FindingCode::RefundWindowExpired]);
    assert_eq!(simulation.errors[0].detail["transfer_id"], "tr_old");
}

#[tokio::test]
async fn test_refund_window_closing_warns() {
    let h = harness().await;
    let simulation = h
        .services
        .simulator
        .create(TENANT, refund("tr_closing", Some("100")))
        .await
        .unwrap();

    assert!(simulation.can_execute);
    assert_eq!(codes(&simulation.warnings), vec![FindingCode::RefundWindowClosing]);
    assert_eq!(simulation.warnings[0].detail["hours_remaining"], 24);
}

#[tokio::test]
async fn test_failed_transfer_is_not_refundable() {
    let h = harness().await;
    let simulation = h
        .services
        .simulator
        .create(TENANT, refund("tr_failed", Some("100")))
        .await
        .unwrap();

    assert!(!simulation.can_execute);
    assert_eq!(codes(&simulation.errors), vec![FindingCode::NotRefundable]);
    assert_eq!(simulation.errors[0].detail["status"], "failed");
}

#[tokio::test]
async fn test_unknown_transfer_fails_simulation() {
    let h = harness().await;
    let simulation = h
        .services
        .simulator
        .create(TENANT, refund("tr_ghost", None))
        .await
        .unwrap();

    assert_eq!(simulation.status, SimulationStatus::Failed);
    assert!(simulation.preview.is_none());
    assert_eq!(codes(&simulation.errors), vec![FindingCode::NotFound]);
    assert_eq!(simulation.errors[0].detail["entity"], "transfer");
}

#[tokio::test]
async fn test_recipient_balance_spent_goes_stale() {
    let h = harness().await;
    let refund_sim = h
        .services
        .simulator
        .create(TENANT, refund("tr_500", Some("300")))
        .await
        .unwrap();
    assert!(refund_sim.can_execute);

    // The recipient moves almost everything out before the refund runs.
    let drain = h
        .services
        .simulator
        .create(TENANT, common::transfer("acc_recipient", "acc_dest", "9800", "USD"))
        .await
        .unwrap();
    h.services.gate.execute(TENANT, drain.id).await.unwrap();

    let err = h.services.gate.execute(TENANT, refund_sim.id).await.unwrap_err();
    assert!(matches!(err, simgate::error::SimulationError::Stale { .. }));
    assert_eq!(h.balance("acc_payer").await, dec!(1000));
}
