use super::{PreviewContext, PreviewEngine, unrunnable};
use crate::domain::money::{Balance, checked_product, checked_quotient, round_half_even};
use crate::domain::preview::{CostProjection, Preview, StreamPreview};
use crate::domain::request::StreamRequest;
use crate::domain::simulation::{FindingCode, Findings, PreviewOutcome};
use crate::error::Result;
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;

const SECONDS_PER_DAY: u64 = 86_400;

const HORIZONS: [(&str, u64); 3] = [
    ("1d", SECONDS_PER_DAY),
    ("7d", 7 * SECONDS_PER_DAY),
    ("30d", 30 * SECONDS_PER_DAY),
];

impl PreviewEngine {
    pub(super) async fn preview_stream(
        &self,
        request: &StreamRequest,
        context: &PreviewContext,
    ) -> Result<PreviewOutcome> {
        let now = self.clock.now();
        let mut findings = Findings::default();

        let Some((source, destination)) = self
            .counterparties(&request.source_account, &request.destination_account, &mut findings)
            .await
        else {
            return Ok(unrunnable(findings));
        };
        self.check_compliance(&source.id, &destination.id, &mut findings)
            .await;

        let rate = request.rate_per_second;
        let precision = self.config.precision_for(&request.currency);
        let balance = context.balance_override.unwrap_or(source.balance);

        let cost_at = |seconds: u64| checked_product("rate_per_second", rate, Decimal::from(seconds));
        let project = |horizon: &str, seconds: u64| -> Result<CostProjection> {
            let cost = cost_at(seconds)?;
            Ok(CostProjection {
                horizon: horizon.to_string(),
                seconds,
                cost: round_half_even(cost, precision),
                balance_after: Balance::new(round_half_even(balance.value() - cost, precision)),
            })
        };

        let mut projections = HORIZONS
            .iter()
            .map(|(label, seconds)| project(label, *seconds))
            .collect::<Result<Vec<_>>>()?;
        if let Some(duration) = request.duration_seconds {
            projections.push(project("full", duration)?);
        }
        let total_cost = request
            .duration_seconds
            .map(|d| cost_at(d).map(|cost| round_half_even(cost, precision)))
            .transpose()?;

        let runway_seconds = if balance.value() > Decimal::ZERO {
            checked_quotient("rate_per_second", balance.value(), rate)?
        } else {
            Decimal::ZERO
        };
        let runway_days = round_half_even(runway_seconds / Decimal::from(SECONDS_PER_DAY), 2);
        let depletion_date = runway_seconds
            .trunc()
            .to_i64()
            .and_then(Duration::try_seconds)
            .and_then(|runway| now.checked_add_signed(runway));
        let will_complete = request
            .duration_seconds
            .is_none_or(|d| Decimal::from(d) <= runway_seconds);

        if runway_seconds < Decimal::from(self.config.short_runway_secs) {
            findings.warn(
                FindingCode::ShortRunway,
                format!("balance funds this stream for only {runway_days} days"),
                json!({
                    "runway_seconds": round_half_even(runway_seconds, 0),
                    "runway_days": runway_days,
                    "depletion_date": depletion_date,
                }),
            );
        }
        let daily_cost = cost_at(SECONDS_PER_DAY)?;
        let burn_cap = balance.value().checked_mul(self.config.daily_burn_ratio);
        if burn_cap.is_some_and(|cap| daily_cost > cap) {
            findings.warn(
                FindingCode::HighDailyBurn,
                format!(
                    "stream burns {} {} per day, over {} of the balance",
                    round_half_even(daily_cost, precision),
                    request.currency,
                    self.config.daily_burn_ratio
                ),
                json!({
                    "daily_cost": round_half_even(daily_cost, precision),
                    "balance": balance.value(),
                    "ratio": self.config.daily_burn_ratio,
                }),
            );
        }

        let preview = StreamPreview {
            source_account: source.id,
            destination_account: destination.id,
            rate_per_second: rate,
            currency: request.currency.clone(),
            balance_before: balance,
            duration_seconds: request.duration_seconds,
            total_cost,
            projections,
            runway_seconds,
            runway_days,
            depletion_date,
            will_complete,
        };
        Ok(PreviewOutcome::Computed {
            preview: Preview::Stream(preview),
            findings,
        })
    }
}
