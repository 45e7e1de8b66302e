use chrono::Duration;
use rust_decimal_macros::dec;
use simgate::domain::preview::{Preview, StreamPreview};
use simgate::domain::simulation::{FindingCode, Simulation, SimulationStatus};
use simgate::error::SimulationError;

mod common;
use common::{TENANT, harness, stream};

const THIRTY_DAYS: u64 = 30 * 86_400;

fn stream_preview(simulation: &Simulation) -> &StreamPreview {
    match &simulation.preview {
        Some(Preview::Stream(preview)) => preview,
        other => panic!("expected stream preview, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cost_projection_and_runway() {
    let h = harness().await;
    let simulation = h
        .services
        .simulator
        .create(TENANT, stream("acc_stream", "acc_dest", "0.001", Some(THIRTY_DAYS)))
        .await
        .unwrap();

    assert!(simulation.can_execute);
    assert!(simulation.warnings.is_empty());

    let preview = stream_preview(&simulation);
    let costs: Vec<_> = preview
        .projections
        .iter()
        .map(|p| (p.horizon.as_str(), p.cost))
        .collect();
    assert_eq!(
        costs,
        vec![
            ("1d", dec!(86.40)),
            ("7d", dec!(604.80)),
            ("30d", dec!(2592.00)),
            ("full", dec!(2592.00)),
        ]
    );
    assert_eq!(preview.projections[0].balance_after.value(), dec!(4913.60));
    assert_eq!(preview.total_cost, Some(dec!(2592.00)));
    assert_eq!(preview.runway_seconds, dec!(5000000));
    assert_eq!(preview.runway_days, dec!(57.87));
    assert_eq!(preview.depletion_date, Some(common::start() + Duration::seconds(5_000_000)));
    assert!(preview.will_complete);
}

#[tokio::test]
async fn test_short_runway_and_high_burn() {
    let h = harness().await;
    let simulation = h
        .services
        .simulator
        .create(TENANT, stream("acc_stream", "acc_dest", "0.01", Some(THIRTY_DAYS)))
        .await
        .unwrap();

    // Warnings never block.
    assert!(simulation.can_execute);
    let codes: Vec<_> = simulation.warnings.iter().map(|w| w.code).collect();
    assert_eq!(codes, vec![FindingCode::ShortRunway, FindingCode::HighDailyBurn]);

    let preview = stream_preview(&simulation);
    assert_eq!(preview.runway_days, dec!(5.79));
    assert!(!preview.will_complete);
}

#[tokio::test]
async fn test_out_of_range_rates_are_rejected() {
    let h = harness().await;
    let huge = h
        .services
        .simulator
        .create(TENANT, stream("acc_stream", "acc_dest", "1e26", Some(86_400)))
        .await
        .unwrap_err();
    assert!(matches!(huge, SimulationError::Validation(ref f) if f[0].field == "rate_per_second"));

    // The runway 5000 / 1e-28 does not fit in a decimal.
    let tiny = h
        .services
        .simulator
        .create(TENANT, stream("acc_stream", "acc_dest", "0.0000000000000000000000000001", None))
        .await
        .unwrap_err();
    assert!(matches!(tiny, SimulationError::Validation(ref f) if f[0].field == "rate_per_second"));
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_open_ended_stream() {
    let h = harness().await;
    let simulation = h
        .services
        .simulator
        .create(TENANT, stream("acc_stream", "acc_dest", "0.001", None))
        .await
        .unwrap();

    let preview = stream_preview(&simulation);
    assert!(preview.total_cost.is_none());
    assert_eq!(preview.projections.len(), 3);
    assert!(preview.will_complete);
}

#[tokio::test]
async fn test_stream_with_empty_balance() {
    let h = harness().await;
    let simulation = h
        .services
        .simulator
        .create(TENANT, stream("acc_dest", "acc_stream", "0.001", Some(60)))
        .await
        .unwrap();

    let preview = stream_preview(&simulation);
    assert_eq!(preview.runway_seconds, dec!(0));
    assert_eq!(preview.depletion_date, Some(common::start()));
    assert!(!preview.will_complete);
    assert_eq!(simulation.warnings[0].code, FindingCode::ShortRunway);
}

#[tokio::test]
async fn test_stream_execution_registers_without_moving_funds() {
    let h = harness().await;
    let simulation = h
        .services
        .simulator
        .create(TENANT, stream("acc_stream", "acc_dest", "0.001", Some(THIRTY_DAYS)))
        .await
        .unwrap();

    let outcome = h.services.gate.execute(TENANT, simulation.id).await.unwrap();
    assert_eq!(outcome.execution_result_id, "st_000001");
    let registered = h.sandbox.ledger.stream("st_000001").await.unwrap();
    assert_eq!(registered.duration_seconds, Some(THIRTY_DAYS));
    assert_eq!(h.balance("acc_stream").await, dec!(5000));

    let stored = h.services.simulator.get(TENANT, simulation.id).await.unwrap();
    assert_eq!(stored.status, SimulationStatus::Executed);
}
