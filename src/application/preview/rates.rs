use crate::domain::money::Currency;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

type Pair = (Currency, Currency);

/// Recently observed live rates per currency pair.
///
/// Serves as the last-known rate when the quote source is unreachable and as
/// the trailing reference for the unfavorable-rate warning.
#[derive(Debug)]
pub struct RateMemory {
    window: usize,
    observed: RwLock<HashMap<Pair, VecDeque<Decimal>>>,
}

impl RateMemory {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            observed: RwLock::new(HashMap::new()),
        }
    }

    /// Records a live rate and returns the trailing average before it.
    pub async fn observe(&self, from: &Currency, to: &Currency, rate: Decimal) -> Option<Decimal> {
        let mut observed = self.observed.write().await;
        let history = observed.entry((from.clone(), to.clone())).or_default();
        let reference = if history.is_empty() {
            None
        } else {
            Some(history.iter().copied().sum::<Decimal>() / Decimal::from(history.len()))
        };
        history.push_back(rate);
        while history.len() > self.window {
            history.pop_front();
        }
        reference
    }

    pub async fn last_known(&self, from: &Currency, to: &Currency) -> Option<Decimal> {
        let observed = self.observed.read().await;
        observed
            .get(&(from.clone(), to.clone()))
            .and_then(|h| h.back().copied())
    }
}
