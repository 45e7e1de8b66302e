#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use simgate::application::Services;
use simgate::config::EngineConfig;
use simgate::domain::account::{AccountSnapshot, AccountStatus};
use simgate::domain::clock::ManualClock;
use simgate::domain::external::{LimitType, RailInfo, RailStatus, TransferRecord, TransferStatus};
use simgate::domain::money::{Balance, Currency};
use simgate::domain::request::RawActionRequest;
use simgate::infrastructure::in_memory::InMemorySimulationStore;
use simgate::infrastructure::sandbox::{FeeTiers, Sandbox, SandboxSeed, SeedRate};
use std::collections::HashMap;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub const TENANT: &str = "tenant-a";

pub struct Harness {
    pub services: Services,
    pub sandbox: Sandbox,
    pub store: Arc<InMemorySimulationStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub async fn balance(&self, account_id: &str) -> Decimal {
        self.sandbox.ledger.balance(account_id).await.unwrap()
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
}

/// Reads a decimal serialized as a JSON string.
pub fn decimal(value: &serde_json::Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

pub fn usd() -> Currency {
    Currency::new("USD").unwrap()
}

pub fn brl() -> Currency {
    Currency::new("BRL").unwrap()
}

fn account(id: &str, balance: Decimal, currency: Currency) -> AccountSnapshot {
    AccountSnapshot {
        id: id.to_string(),
        status: AccountStatus::Active,
        balance: Balance::new(balance),
        currency,
        typical_amount: None,
    }
}

fn completed_transfer(id: &str, amount: Decimal, completed_at: DateTime<Utc>) -> TransferRecord {
    TransferRecord {
        id: id.to_string(),
        source_account: "acc_payer".to_string(),
        destination_account: "acc_recipient".to_string(),
        amount,
        currency: usd(),
        destination_amount: amount,
        destination_currency: usd(),
        status: TransferStatus::Completed,
        completed_at: Some(completed_at),
    }
}

/// A small world with known balances, rates, fees and transfers.
pub fn seed() -> SandboxSeed {
    let now = start();
    let mut frozen = account("acc_frozen", dec!(900), usd());
    frozen.status = AccountStatus::Frozen;
    let mut main = account("acc_usd", dec!(12500), usd());
    main.typical_amount = Some(dec!(2000));

    let mut failed = completed_transfer("tr_failed", dec!(300), now - Duration::days(1));
    failed.status = TransferStatus::Failed;

    SandboxSeed {
        accounts: vec![
            main,
            account("acc_brl", dec!(1000), brl()),
            account("acc_small", dec!(2500), usd()),
            account("acc_other", dec!(2500), usd()),
            account("acc_stream", dec!(5000), usd()),
            account("acc_payer", dec!(1000), usd()),
            account("acc_recipient", dec!(10000), usd()),
            account("acc_dest", dec!(0), usd()),
            frozen,
        ],
        transfers: vec![
            completed_transfer("tr_500", dec!(500), now - Duration::days(2)),
            completed_transfer("tr_old", dec!(500), now - Duration::days(40)),
            completed_transfer("tr_closing", dec!(500), now - Duration::days(29)),
            failed,
        ],
        refunds: HashMap::from([("tr_500".to_string(), dec!(200))]),
        fx_rates: vec![SeedRate {
            from: usd(),
            to: brl(),
            rate: dec!(4.95),
            spread: dec!(0.01),
        }],
        fx_quote_ttl_secs: 300,
        fees: FeeTiers {
            platform_bps: dec!(50),
            platform_flat: dec!(0),
            fx_bps: dec!(50),
            rail_fees: HashMap::new(),
            default_rail_fee: dec!(0),
        },
        limits: HashMap::from([
            (LimitType::PerTransaction, dec!(10000)),
            (LimitType::Daily, dec!(20000)),
        ]),
        usage: Vec::new(),
        denylist: HashMap::new(),
        rails: vec![
            RailInfo {
                corridor: "USD-BRL".to_string(),
                rail: "pix".to_string(),
                status: RailStatus::Operational,
                expected_duration_secs: 3600,
            },
            RailInfo {
                corridor: "USD-USD".to_string(),
                rail: "ach".to_string(),
                status: RailStatus::Operational,
                expected_duration_secs: 86400,
            },
        ],
    }
}

pub async fn harness() -> Harness {
    harness_with(seed(), EngineConfig::default()).await
}

pub async fn harness_with(seed: SandboxSeed, config: EngineConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(start()));
    let sandbox = Sandbox::from_seed(seed, config.near_breach_ratio, clock.clone()).await;
    let store = Arc::new(InMemorySimulationStore::new());
    let services = Services::new(
        config,
        store.clone(),
        sandbox.adapters(),
        sandbox.ledger(),
        clock.clone(),
    );
    Harness {
        services,
        sandbox,
        store,
        clock,
    }
}

pub fn transfer(source: &str, destination: &str, amount: &str, currency: &str) -> RawActionRequest {
    RawActionRequest {
        action_type: "transfer".to_string(),
        payload: json!({
            "source_account": source,
            "destination_account": destination,
            "amount": amount,
            "currency": currency,
        }),
    }
}

pub fn fx_transfer(source: &str, destination: &str, amount: &str, from: &str, to: &str) -> RawActionRequest {
    let mut request = transfer(source, destination, amount, from);
    request.payload["destination_currency"] = json!(to);
    request
}

pub fn refund(transfer_id: &str, amount: Option<&str>) -> RawActionRequest {
    let mut payload = json!({ "transfer_id": transfer_id, "reason": "customer request" });
    if let Some(amount) = amount {
        payload["amount"] = json!(amount);
    }
    RawActionRequest {
        action_type: "refund".to_string(),
        payload,
    }
}

pub fn stream(source: &str, destination: &str, rate: &str, duration_seconds: Option<u64>) -> RawActionRequest {
    let mut payload = json!({
        "source_account": source,
        "destination_account": destination,
        "rate_per_second": rate,
        "currency": "USD",
    });
    if let Some(duration) = duration_seconds {
        payload["duration_seconds"] = json!(duration);
    }
    RawActionRequest {
        action_type: "stream".to_string(),
        payload,
    }
}

/// Writes a transfer CSV with `rows` small random transfers spread over the
/// given source accounts, all paying `destination`.
pub fn generate_transfers_csv(path: &Path, rows: usize, sources: &[&str], destination: &str) -> Result<(), Error> {
    let mut rng = StdRng::seed_from_u64(7);
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["source", "destination", "amount", "currency", "destination_currency", "corridor"])?;
    for _ in 0..rows {
        let source = sources[rng.gen_range(0..sources.len())];
        let cents: u32 = rng.gen_range(100..1000);
        let amount = Decimal::new(cents.into(), 2).to_string();
        wtr.write_record([source, destination, amount.as_str(), "USD", "", ""])?;
    }

    wtr.flush()?;
    Ok(())
}
