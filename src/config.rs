use crate::domain::money::Currency;
use crate::error::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRate {
    pub from: Currency,
    pub to: Currency,
    pub rate: Decimal,
}

/// Tunables for the engine. Every field has a default, so a config file only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub simulation_ttl_secs: i64,
    pub retention_secs: i64,
    pub refund_window_secs: i64,
    pub refund_closing_warning_secs: i64,
    pub large_refund_fraction: Decimal,
    pub low_balance_threshold: Decimal,
    pub near_breach_ratio: Decimal,
    pub fx_unfavorable_threshold: Decimal,
    pub fx_reference_window: usize,
    pub large_amount_multiplier: Decimal,
    pub fee_drift_tolerance: Decimal,
    pub short_runway_secs: i64,
    pub daily_burn_ratio: Decimal,
    pub default_settlement_secs: i64,
    pub adapter_timeout_ms: u64,
    pub claim_lease_secs: i64,
    pub expiry_interval_secs: u64,
    pub purge_interval_secs: u64,
    pub fallback_rates: Vec<FallbackRate>,
    /// Minor-unit overrides keyed by currency code.
    pub currency_precision: HashMap<String, u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            simulation_ttl_secs: 3_600,
            retention_secs: 7 * 86_400,
            refund_window_secs: 30 * 86_400,
            refund_closing_warning_secs: 48 * 3_600,
            large_refund_fraction: dec!(0.8),
            low_balance_threshold: dec!(100),
            near_breach_ratio: dec!(0.8),
            fx_unfavorable_threshold: dec!(0.02),
            fx_reference_window: 20,
            large_amount_multiplier: dec!(5),
            fee_drift_tolerance: dec!(0.05),
            short_runway_secs: 7 * 86_400,
            daily_burn_ratio: dec!(0.10),
            default_settlement_secs: 86_400,
            adapter_timeout_ms: 2_000,
            claim_lease_secs: 30,
            expiry_interval_secs: 300,
            purge_interval_secs: 86_400,
            fallback_rates: Vec::new(),
            currency_precision: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn simulation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.simulation_ttl_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs)
    }

    pub fn refund_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refund_window_secs)
    }

    pub fn claim_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_lease_secs)
    }

    pub fn adapter_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn precision_for(&self, currency: &Currency) -> u32 {
        self.currency_precision
            .get(currency.code())
            .copied()
            .unwrap_or_else(|| currency.minor_units())
    }

    pub fn fallback_rate(&self, from: &Currency, to: &Currency) -> Option<Decimal> {
        self.fallback_rates
            .iter()
            .find(|r| &r.from == from && &r.to == to)
            .map(|r| r.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"simulation_ttl_secs": 120, "currency_precision": {{"BRL": 4}},
               "fallback_rates": [{{"from": "USD", "to": "BRL", "rate": "5.10"}}]}}"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.simulation_ttl(), chrono::Duration::seconds(120));
        assert_eq!(config.retention_secs, 7 * 86_400);

        let usd = Currency::new("USD").unwrap();
        let brl = Currency::new("BRL").unwrap();
        assert_eq!(config.precision_for(&brl), 4);
        assert_eq!(config.precision_for(&usd), 2);
        assert_eq!(config.fallback_rate(&usd, &brl), Some(dec!(5.10)));
        assert_eq!(config.fallback_rate(&brl, &usd), None);
    }
}
