use super::account::AccountId;
use super::external::{FeeBreakdown, FxQuote, RailStatus};
use super::money::{Balance, Currency};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// Same currency on both legs.
    Identity,
    Live,
    /// A live quote captured earlier and still inside its own expiry.
    Locked,
    LastKnown,
    Fallback,
}

/// The FX rate a preview used and where it came from.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AppliedRate {
    pub rate: Decimal,
    pub spread: Decimal,
    pub source: RateSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<FxQuote>,
}

impl AppliedRate {
    pub fn identity() -> Self {
        Self {
            rate: Decimal::ONE,
            spread: Decimal::ZERO,
            source: RateSource::Identity,
            quote: None,
        }
    }

    pub fn from_quote(quote: FxQuote, source: RateSource) -> Self {
        Self {
            rate: quote.rate,
            spread: quote.spread,
            source,
            quote: Some(quote),
        }
    }

    pub fn degraded(rate: Decimal, source: RateSource) -> Self {
        Self {
            rate,
            spread: Decimal::ZERO,
            source,
            quote: None,
        }
    }

    /// The captured quote, if it can still be honored at `now`.
    pub fn reusable_quote(&self, now: DateTime<Utc>) -> Option<&FxQuote> {
        match self.source {
            RateSource::Live | RateSource::Locked => {
                self.quote.as_ref().filter(|q| q.expires_at > now)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransferPreview {
    pub source_account: AccountId,
    pub destination_account: AccountId,
    pub amount: Decimal,
    pub currency: Currency,
    pub destination_currency: Currency,
    pub balance_before: Balance,
    pub balance_after: Balance,
    pub fees: FeeBreakdown,
    pub total_fees: Decimal,
    /// Absent when no rate of any kind was available.
    pub fx: Option<AppliedRate>,
    pub destination_amount: Option<Decimal>,
    pub corridor: String,
    pub rail: String,
    pub rail_status: RailStatus,
    pub settlement_seconds: i64,
    pub estimated_arrival: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct RefundPreview {
    pub transfer_id: String,
    pub reason: String,
    pub currency: Currency,
    pub original_amount: Decimal,
    pub already_refunded: Decimal,
    pub remaining_refundable: Decimal,
    pub refund_amount: Decimal,
    pub refund_deadline: Option<DateTime<Utc>>,
    /// The original recipient, debited by the refund.
    pub recipient_account: AccountId,
    pub recipient_currency: Currency,
    pub recipient_debit: Decimal,
    pub recipient_balance_before: Balance,
    pub recipient_balance_after: Balance,
    /// The original payer, credited by the refund.
    pub payer_account: AccountId,
    pub payer_balance_before: Balance,
    pub payer_balance_after: Balance,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CostProjection {
    pub horizon: String,
    pub seconds: u64,
    pub cost: Decimal,
    pub balance_after: Balance,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct StreamPreview {
    pub source_account: AccountId,
    pub destination_account: AccountId,
    pub rate_per_second: Decimal,
    pub currency: Currency,
    pub balance_before: Balance,
    pub duration_seconds: Option<u64>,
    /// Absent for open-ended streams.
    pub total_cost: Option<Decimal>,
    pub projections: Vec<CostProjection>,
    pub runway_seconds: Decimal,
    pub runway_days: Decimal,
    pub depletion_date: Option<DateTime<Utc>>,
    pub will_complete: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Preview {
    Transfer(TransferPreview),
    Refund(RefundPreview),
    Stream(StreamPreview),
}

impl Preview {
    /// The account debited by the operation and the amount debited.
    pub fn debit(&self) -> Option<(&str, Decimal)> {
        match self {
            Preview::Transfer(t) => Some((t.source_account.as_str(), t.amount)),
            Preview::Refund(r) => Some((r.recipient_account.as_str(), r.recipient_debit)),
            Preview::Stream(_) => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Delta {
    pub previewed: Decimal,
    pub applied: Decimal,
    pub change: Decimal,
}

impl Delta {
    pub fn between(previewed: Decimal, applied: Decimal) -> Self {
        Self {
            previewed,
            applied,
            change: applied - previewed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TimingDelta {
    pub previewed: DateTime<Utc>,
    pub applied: DateTime<Utc>,
    pub change_seconds: i64,
}

/// Differences between what a simulation previewed and what execution applied.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct VarianceReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fx_rate: Option<Delta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees: Option<Delta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_amount: Option<Delta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Delta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_timing: Option<TimingDelta>,
    /// True when the original FX quote was honored.
    pub quote_reused: bool,
}

impl VarianceReport {
    pub fn between(previewed: &Preview, applied: &Preview) -> Self {
        match (previewed, applied) {
            (Preview::Transfer(before), Preview::Transfer(after)) => {
                let fx_rate = match (&before.fx, &after.fx) {
                    (Some(b), Some(a)) => Some(Delta::between(b.rate, a.rate)),
                    _ => None,
                };
                let destination_amount = match (before.destination_amount, after.destination_amount) {
                    (Some(b), Some(a)) => Some(Delta::between(b, a)),
                    _ => None,
                };
                let quote_reused = after
                    .fx
                    .as_ref()
                    .is_some_and(|fx| fx.source == RateSource::Locked);
                Self {
                    fx_rate,
                    fees: Some(Delta::between(before.total_fees, after.total_fees)),
                    destination_amount,
                    amount: None,
                    estimated_timing: Some(TimingDelta {
                        previewed: before.estimated_arrival,
                        applied: after.estimated_arrival,
                        change_seconds: (after.estimated_arrival - before.estimated_arrival).num_seconds(),
                    }),
                    quote_reused,
                }
            }
            (Preview::Refund(before), Preview::Refund(after)) => Self {
                amount: Some(Delta::between(before.refund_amount, after.refund_amount)),
                destination_amount: Some(Delta::between(before.recipient_debit, after.recipient_debit)),
                ..Self::default()
            },
            (Preview::Stream(before), Preview::Stream(after)) => Self {
                amount: match (before.total_cost, after.total_cost) {
                    (Some(b), Some(a)) => Some(Delta::between(b, a)),
                    _ => None,
                },
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}
