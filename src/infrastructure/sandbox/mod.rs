//! In-memory implementations of every external collaborator, seeded from a
//! JSON document. Not a production ledger.

mod ledger;
mod market;

pub use ledger::SandboxLedger;
pub use market::{
    DenylistCompliance, FeeTiers, StaticFxSource, StaticLimitChecker, StaticRailDirectory,
    TieredFeeSchedule,
};

use crate::application::preview::Adapters;
use crate::domain::account::{AccountId, AccountSnapshot};
use crate::domain::clock::ClockRef;
use crate::domain::external::{LimitType, RailInfo, TransferRecord};
use crate::domain::money::Currency;
use crate::domain::ports::LedgerRef;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const DEMO_SEED: &str = include_str!("../../../demos/sandbox.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedRate {
    pub from: Currency,
    pub to: Currency,
    pub rate: Decimal,
    #[serde(default)]
    pub spread: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedUsage {
    pub account_id: AccountId,
    pub limit_type: LimitType,
    pub amount: Decimal,
}

fn default_quote_ttl_secs() -> i64 {
    300
}

/// Initial state of the sandbox collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSeed {
    #[serde(default)]
    pub accounts: Vec<AccountSnapshot>,
    #[serde(default)]
    pub transfers: Vec<TransferRecord>,
    /// Amount already refunded per transfer id.
    #[serde(default)]
    pub refunds: HashMap<String, Decimal>,
    #[serde(default)]
    pub fx_rates: Vec<SeedRate>,
    #[serde(default = "default_quote_ttl_secs")]
    pub fx_quote_ttl_secs: i64,
    #[serde(default)]
    pub fees: FeeTiers,
    #[serde(default)]
    pub limits: HashMap<LimitType, Decimal>,
    #[serde(default)]
    pub usage: Vec<SeedUsage>,
    /// Compliance flags per account id.
    #[serde(default)]
    pub denylist: HashMap<AccountId, Vec<String>>,
    #[serde(default)]
    pub rails: Vec<RailInfo>,
}

impl Default for SandboxSeed {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            transfers: Vec::new(),
            refunds: HashMap::new(),
            fx_rates: Vec::new(),
            fx_quote_ttl_secs: default_quote_ttl_secs(),
            fees: FeeTiers::default(),
            limits: HashMap::new(),
            usage: Vec::new(),
            denylist: HashMap::new(),
            rails: Vec::new(),
        }
    }
}

impl SandboxSeed {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// A small multi-currency world used when no seed file is given.
    pub fn demo() -> Result<Self> {
        Ok(serde_json::from_str(DEMO_SEED)?)
    }
}

/// The full set of sandbox collaborators sharing one clock.
#[derive(Clone)]
pub struct Sandbox {
    pub ledger: Arc<SandboxLedger>,
    pub fx: Arc<StaticFxSource>,
    pub fees: Arc<TieredFeeSchedule>,
    pub limits: Arc<StaticLimitChecker>,
    pub compliance: Arc<DenylistCompliance>,
    pub rails: Arc<StaticRailDirectory>,
}

impl Sandbox {
    pub async fn from_seed(seed: SandboxSeed, near_breach_ratio: Decimal, clock: ClockRef) -> Self {
        let ledger = SandboxLedger::new(clock.clone());
        for account in seed.accounts {
            ledger.open_account(account).await;
        }
        for transfer in seed.transfers {
            let refunded = seed
                .refunds
                .get(&transfer.id)
                .copied()
                .unwrap_or(Decimal::ZERO);
            ledger.record_transfer(transfer, refunded).await;
        }

        let fx = StaticFxSource::new(chrono::Duration::seconds(seed.fx_quote_ttl_secs), clock);
        for rate in seed.fx_rates {
            fx.set_rate(rate.from, rate.to, rate.rate, rate.spread).await;
        }

        let limits = StaticLimitChecker::new(seed.limits, near_breach_ratio);
        for usage in seed.usage {
            limits
                .set_usage(&usage.account_id, usage.limit_type, usage.amount)
                .await;
        }

        Self {
            ledger: Arc::new(ledger),
            fx: Arc::new(fx),
            fees: Arc::new(TieredFeeSchedule::new(seed.fees)),
            limits: Arc::new(limits),
            compliance: Arc::new(DenylistCompliance::new(seed.denylist)),
            rails: Arc::new(StaticRailDirectory::new(seed.rails)),
        }
    }

    pub fn adapters(&self) -> Adapters {
        Adapters {
            accounts: self.ledger.clone(),
            fx: self.fx.clone(),
            fees: self.fees.clone(),
            limits: self.limits.clone(),
            compliance: self.compliance.clone(),
            rails: self.rails.clone(),
            history: self.ledger.clone(),
        }
    }

    pub fn ledger(&self) -> LedgerRef {
        self.ledger.clone()
    }
}
