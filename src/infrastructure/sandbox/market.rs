//! Static rate, fee, limit, compliance and rail collaborators.

use crate::domain::account::AccountId;
use crate::domain::clock::ClockRef;
use crate::domain::external::{
    ComplianceReport, FeeBreakdown, FeeContext, FxQuote, LimitReport, LimitType, LimitUsage,
    RailInfo, RailStatus,
};
use crate::domain::money::{Currency, checked_product, round_half_even};
use crate::domain::ports::{ComplianceChecker, FeeSchedule, FxQuoteSource, LimitChecker, RailDirectory};
use crate::error::{Result, SimulationError};
use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// A fixed table of quotes per currency pair.
pub struct StaticFxSource {
    rates: RwLock<HashMap<(Currency, Currency), (Decimal, Decimal)>>,
    quote_ttl: Duration,
    online: AtomicBool,
    latency_ms: AtomicU64,
    clock: ClockRef,
}

impl StaticFxSource {
    pub fn new(quote_ttl: Duration, clock: ClockRef) -> Self {
        Self {
            rates: RwLock::new(HashMap::new()),
            quote_ttl,
            online: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            clock,
        }
    }

    pub async fn set_rate(&self, from: Currency, to: Currency, rate: Decimal, spread: Decimal) {
        self.rates.write().await.insert((from, to), (rate, spread));
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Delays every quote by the given number of milliseconds.
    pub fn set_latency_ms(&self, latency_ms: u64) {
        self.latency_ms.store(latency_ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl FxQuoteSource for StaticFxSource {
    async fn quote(&self, from: &Currency, to: &Currency, _amount: Decimal) -> Result<FxQuote> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(latency)).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(SimulationError::adapter("fx", "rate source offline"));
        }
        let rates = self.rates.read().await;
        let (rate, spread) = rates
            .get(&(from.clone(), to.clone()))
            .copied()
            .ok_or_else(|| SimulationError::adapter("fx", format!("no quote for {from}/{to}")))?;
        Ok(FxQuote {
            from: from.clone(),
            to: to.clone(),
            rate,
            spread,
            expires_at: self.clock.now() + self.quote_ttl,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeTiers {
    pub platform_bps: Decimal,
    pub platform_flat: Decimal,
    /// Charged only when the currencies differ.
    pub fx_bps: Decimal,
    /// Flat rail fee per corridor.
    pub rail_fees: HashMap<String, Decimal>,
    pub default_rail_fee: Decimal,
}

/// Platform basis points plus a flat fee, FX basis points and a per-corridor
/// rail fee, each rounded to the context's precision.
pub struct TieredFeeSchedule {
    tiers: RwLock<FeeTiers>,
}

impl TieredFeeSchedule {
    pub fn new(tiers: FeeTiers) -> Self {
        Self {
            tiers: RwLock::new(tiers),
        }
    }

    pub async fn set_tiers(&self, tiers: FeeTiers) {
        *self.tiers.write().await = tiers;
    }
}

#[async_trait]
impl FeeSchedule for TieredFeeSchedule {
    async fn calculate(&self, context: &FeeContext) -> Result<FeeBreakdown> {
        let tiers = self.tiers.read().await;
        let dp = context.precision;
        let basis_points = |bps: Decimal| checked_product("amount", context.amount, bps).map(|v| v / BPS);
        let fx_fee = if context.is_cross_currency() {
            basis_points(tiers.fx_bps)?
        } else {
            Decimal::ZERO
        };
        Ok(FeeBreakdown {
            platform_fee: round_half_even(basis_points(tiers.platform_bps)? + tiers.platform_flat, dp),
            fx_fee: round_half_even(fx_fee, dp),
            rail_fee: tiers
                .rail_fees
                .get(&context.corridor)
                .copied()
                .unwrap_or(tiers.default_rail_fee),
        })
    }
}

/// Fixed thresholds per limit type with per-account usage counters.
///
/// Thresholds apply in whatever currency the request is in.
pub struct StaticLimitChecker {
    thresholds: HashMap<LimitType, Decimal>,
    usage: RwLock<HashMap<(AccountId, LimitType), Decimal>>,
    near_ratio: Decimal,
}

impl StaticLimitChecker {
    pub fn new(thresholds: HashMap<LimitType, Decimal>, near_ratio: Decimal) -> Self {
        Self {
            thresholds,
            usage: RwLock::new(HashMap::new()),
            near_ratio,
        }
    }

    pub async fn set_usage(&self, account_id: &str, limit_type: LimitType, amount: Decimal) {
        self.usage
            .write()
            .await
            .insert((account_id.to_string(), limit_type), amount);
    }
}

#[async_trait]
impl LimitChecker for StaticLimitChecker {
    async fn check(&self, account_id: &str, amount: Decimal, _currency: &Currency) -> Result<LimitReport> {
        let usage = self.usage.read().await;
        let mut report = LimitReport::default();
        for (&limit_type, &threshold) in &self.thresholds {
            let current_usage = match limit_type {
                LimitType::PerTransaction => Decimal::ZERO,
                _ => usage
                    .get(&(account_id.to_string(), limit_type))
                    .copied()
                    .unwrap_or(Decimal::ZERO),
            };
            let projected = current_usage + amount;
            let entry = LimitUsage {
                limit_type,
                current_usage,
                requested: amount,
                threshold,
            };
            if projected > threshold {
                report.breaches.push(entry);
            } else if projected >= threshold * self.near_ratio {
                report.near_breaches.push(entry);
            }
        }
        report.breaches.sort_by_key(|u| u.limit_type.to_string());
        report.near_breaches.sort_by_key(|u| u.limit_type.to_string());
        Ok(report)
    }
}

/// Flags any party present on the denylist.
pub struct DenylistCompliance {
    denied: RwLock<HashMap<AccountId, Vec<String>>>,
    online: AtomicBool,
}

impl DenylistCompliance {
    pub fn new(denied: HashMap<AccountId, Vec<String>>) -> Self {
        Self {
            denied: RwLock::new(denied),
            online: AtomicBool::new(true),
        }
    }

    pub async fn deny(&self, account_id: &str, flag: impl Into<String>) {
        self.denied
            .write()
            .await
            .entry(account_id.to_string())
            .or_default()
            .push(flag.into());
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ComplianceChecker for DenylistCompliance {
    async fn check(&self, account_id: &str, counterparty: &str) -> Result<ComplianceReport> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(SimulationError::adapter("compliance", "screening service offline"));
        }
        let denied = self.denied.read().await;
        let flags = [account_id, counterparty]
            .into_iter()
            .flat_map(|party| {
                denied
                    .get(party)
                    .into_iter()
                    .flatten()
                    .map(move |flag| format!("{flag}:{party}"))
            })
            .collect();
        Ok(ComplianceReport { flags })
    }
}

/// Rail information per corridor.
pub struct StaticRailDirectory {
    rails: RwLock<HashMap<String, RailInfo>>,
}

impl StaticRailDirectory {
    pub fn new(rails: Vec<RailInfo>) -> Self {
        Self {
            rails: RwLock::new(rails.into_iter().map(|r| (r.corridor.clone(), r)).collect()),
        }
    }

    pub async fn set_status(&self, corridor: &str, status: RailStatus) {
        if let Some(rail) = self.rails.write().await.get_mut(corridor) {
            rail.status = status;
        }
    }
}

#[async_trait]
impl RailDirectory for StaticRailDirectory {
    async fn lookup(&self, corridor: &str) -> Result<Option<RailInfo>> {
        Ok(self.rails.read().await.get(corridor).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::SystemClock;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn brl() -> Currency {
        Currency::new("BRL").unwrap()
    }

    #[tokio::test]
    async fn test_fee_tiers() {
        let schedule = TieredFeeSchedule::new(FeeTiers {
            platform_bps: dec!(50),
            platform_flat: dec!(0),
            fx_bps: dec!(50),
            rail_fees: HashMap::from([("USD-BRL".to_string(), dec!(1.50))]),
            default_rail_fee: dec!(0),
        });
        let context = FeeContext {
            account_id: "a".into(),
            amount: dec!(5000),
            currency: usd(),
            destination_currency: brl(),
            corridor: "USD-BRL".into(),
            precision: 2,
        };
        let fees = schedule.calculate(&context).await.unwrap();
        assert_eq!(fees.platform_fee, dec!(25.00));
        assert_eq!(fees.fx_fee, dec!(25.00));
        assert_eq!(fees.rail_fee, dec!(1.50));
        assert_eq!(fees.total(), dec!(51.50));

        let domestic = FeeContext {
            destination_currency: usd(),
            corridor: "USD-USD".into(),
            ..context
        };
        let fees = schedule.calculate(&domestic).await.unwrap();
        assert_eq!(fees.fx_fee, dec!(0));
        assert_eq!(fees.rail_fee, dec!(0));

        let whole_units = FeeContext {
            amount: dec!(4999),
            precision: 0,
            ..domestic
        };
        let fees = schedule.calculate(&whole_units).await.unwrap();
        assert_eq!(fees.platform_fee, dec!(25));
    }

    #[tokio::test]
    async fn test_limits_breach_and_near_breach() {
        let checker = StaticLimitChecker::new(
            HashMap::from([
                (LimitType::PerTransaction, dec!(10000)),
                (LimitType::Daily, dec!(20000)),
            ]),
            dec!(0.8),
        );
        checker.set_usage("a", LimitType::Daily, dec!(12000)).await;

        let report = checker.check("a", dec!(9000), &usd()).await.unwrap();
        assert_eq!(report.breaches.len(), 1);
        assert_eq!(report.breaches[0].limit_type, LimitType::Daily);
        assert_eq!(report.near_breaches.len(), 1);
        assert_eq!(report.near_breaches[0].limit_type, LimitType::PerTransaction);

        let report = checker.check("b", dec!(100), &usd()).await.unwrap();
        assert!(report.breaches.is_empty());
        assert!(report.near_breaches.is_empty());
    }

    #[tokio::test]
    async fn test_fx_offline_and_missing_pair() {
        let fx = StaticFxSource::new(Duration::minutes(5), Arc::new(SystemClock));
        fx.set_rate(usd(), brl(), dec!(4.95), dec!(0.01)).await;

        let quote = fx.quote(&usd(), &brl(), dec!(1)).await.unwrap();
        assert_eq!(quote.rate, dec!(4.95));
        assert!(fx.quote(&brl(), &usd(), dec!(1)).await.is_err());

        fx.set_online(false);
        assert!(matches!(
            fx.quote(&usd(), &brl(), dec!(1)).await,
            Err(SimulationError::ExternalAdapter { adapter: "fx", .. })
        ));
    }

    #[tokio::test]
    async fn test_denylist_flags_both_parties() {
        let compliance = DenylistCompliance::new(HashMap::new());
        compliance.deny("b", "sanctions_match").await;

        let report = compliance.check("a", "b").await.unwrap();
        assert_eq!(report.flags, vec!["sanctions_match:b".to_string()]);
        assert!(compliance.check("a", "c").await.unwrap().flags.is_empty());
    }
}
