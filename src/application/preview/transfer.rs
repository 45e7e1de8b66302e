use super::{PreviewContext, PreviewEngine, not_found, unrunnable};
use crate::domain::account::AccountSnapshot;
use crate::domain::external::{FeeBreakdown, FeeContext, FxQuote, RailInfo, RailStatus};
use crate::domain::money::{Balance, Currency, checked_product, round_half_even};
use crate::domain::preview::{AppliedRate, Preview, RateSource, TransferPreview};
use crate::domain::request::TransferRequest;
use crate::domain::simulation::{FindingCode, Findings, PreviewOutcome};
use crate::error::{Result, SimulationError};
use chrono::Duration;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::warn;

impl PreviewEngine {
    pub(super) async fn preview_transfer(
        &self,
        request: &TransferRequest,
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

        let amount = request.amount;
        let currency = &request.currency;
        let destination_currency = request.destination_currency().clone();
        let corridor = request.corridor();

        let balance_before = context.balance_override.unwrap_or(source.balance);
        let covered = balance_before.covers(amount);
        if !covered {
            findings.block(SimulationError::InsufficientBalance {
                account_id: source.id.clone(),
                required_amount: amount,
                available_amount: balance_before.value(),
                shortfall: amount - balance_before.value(),
                currency: currency.to_string(),
            });
        }

        let fx = if &destination_currency == currency {
            Some(AppliedRate::identity())
        } else {
            self.resolve_rate(
                currency,
                &destination_currency,
                amount,
                context.locked_quote.as_ref(),
                &mut findings,
            )
            .await
        };

        let fee_context = FeeContext {
            account_id: source.id.clone(),
            amount,
            currency: currency.clone(),
            destination_currency: destination_currency.clone(),
            corridor: corridor.clone(),
            precision: self.config.precision_for(currency),
        };
        let fees = match self
            .bounded("fees", self.adapters.fees.calculate(&fee_context))
            .await
        {
            Ok(fees) => fees,
            Err(err) => {
                warn!(%err, corridor = %corridor, "fee schedule unavailable");
                findings.block(err);
                FeeBreakdown::default()
            }
        };
        let total_fees = fees.total();

        // All fees are charged on the source leg.
        let net_amount = amount - total_fees;
        if net_amount <= Decimal::ZERO {
            findings.fail(
                FindingCode::FeesExceedAmount,
                format!("fees of {total_fees} {currency} consume the whole amount {amount}"),
                json!({ "amount": amount, "total_fees": total_fees }),
            );
        }
        let destination_amount = fx
            .as_ref()
            .map(|fx| {
                checked_product("amount", net_amount.max(Decimal::ZERO), fx.rate)
                    .map(|gross| round_half_even(gross, self.config.precision_for(&destination_currency)))
            })
            .transpose()?;

        let balance_after = balance_before - Balance::new(amount);

        let rail = self.resolve_rail(&corridor, &mut findings).await;
        let estimated_arrival = now + Duration::seconds(rail.expected_duration_secs);

        self.check_limits(&source.id, amount, currency, &mut findings)
            .await;
        self.check_compliance(&source.id, &destination.id, &mut findings)
            .await;

        if covered && balance_after.value() < self.config.low_balance_threshold {
            findings.warn(
                FindingCode::LowBalance,
                format!(
                    "balance after transfer {} {currency} is below {}",
                    balance_after.value(),
                    self.config.low_balance_threshold
                ),
                json!({
                    "balance_after": balance_after.value(),
                    "threshold": self.config.low_balance_threshold,
                }),
            );
        }
        if let Some(typical) = source.typical_amount.filter(|t| *t > Decimal::ZERO)
            && typical
                .checked_mul(self.config.large_amount_multiplier)
                .is_some_and(|usual_max| amount > usual_max)
        {
            findings.warn(
                FindingCode::LargeAmount,
                format!("amount {amount} is unusually large for this account (typical {typical})"),
                json!({
                    "amount": amount,
                    "typical_amount": typical,
                    "multiplier": self.config.large_amount_multiplier,
                }),
            );
        }

        let preview = TransferPreview {
            source_account: source.id,
            destination_account: destination.id,
            amount,
            currency: currency.clone(),
            destination_currency,
            balance_before,
            balance_after,
            fees,
            total_fees,
            fx,
            destination_amount,
            corridor,
            rail: rail.rail,
            rail_status: rail.status,
            settlement_seconds: rail.expected_duration_secs,
            estimated_arrival,
        };
        Ok(PreviewOutcome::Computed {
            preview: Preview::Transfer(preview),
            findings,
        })
    }

    /// Fetches both parties. `None` when either cannot be read, with the
    /// reason recorded; inactive parties are blocking findings.
    pub(super) async fn counterparties(
        &self,
        source_id: &str,
        destination_id: &str,
        findings: &mut Findings,
    ) -> Option<(AccountSnapshot, AccountSnapshot)> {
        let source = self
            .bounded("accounts", self.adapters.accounts.snapshot(source_id))
            .await;
        let destination = self
            .bounded("accounts", self.adapters.accounts.snapshot(destination_id))
            .await;

        let (source, destination) = match (source, destination) {
            (Ok(Some(source)), Ok(Some(destination))) => (source, destination),
            (source, destination) => {
                for (id, lookup) in [(source_id, source), (destination_id, destination)] {
                    match lookup {
                        Ok(Some(_)) => {}
                        Ok(None) => findings.block(not_found("account", id)),
                        Err(err) => {
                            warn!(%err, account_id = id, "account directory unavailable");
                            findings.block(err);
                        }
                    }
                }
                return None;
            }
        };

        for account in [&source, &destination] {
            if !account.is_active() {
                findings.fail(
                    FindingCode::AccountInactive,
                    format!("account {} is not active", account.id),
                    json!({ "account_id": account.id, "status": account.status }),
                );
            }
        }
        Some((source, destination))
    }

    async fn resolve_rate(
        &self,
        from: &Currency,
        to: &Currency,
        amount: Decimal,
        locked: Option<&FxQuote>,
        findings: &mut Findings,
    ) -> Option<AppliedRate> {
        let now = self.clock.now();
        if let Some(quote) = locked.filter(|q| &q.from == from && &q.to == to && q.expires_at > now) {
            return Some(AppliedRate::from_quote(quote.clone(), RateSource::Locked));
        }

        match self
            .bounded("fx", self.adapters.fx.quote(from, to, amount))
            .await
        {
            Ok(quote) => {
                if let Some(reference) = self.rates.observe(from, to, quote.rate).await {
                    let floor = reference * (Decimal::ONE - self.config.fx_unfavorable_threshold);
                    if quote.rate < floor {
                        let deviation = round_half_even((reference - quote.rate) / reference, 6);
                        findings.warn(
                            FindingCode::RateUnfavorable,
                            format!(
                                "{from}/{to} rate {} is worse than the trailing average {}",
                                quote.rate,
                                round_half_even(reference, 8)
                            ),
                            json!({
                                "rate": quote.rate,
                                "reference_average": round_half_even(reference, 8),
                                "deviation": deviation,
                                "threshold": self.config.fx_unfavorable_threshold,
                            }),
                        );
                    }
                }
                Some(AppliedRate::from_quote(quote, RateSource::Live))
            }
            Err(err) => {
                warn!(%from, %to, %err, "fx quote unavailable, degrading");
                if let Some(rate) = self.rates.last_known(from, to).await {
                    findings.warn(
                        FindingCode::RateDegraded,
                        format!("live {from}/{to} quote unavailable; using last known rate {rate}"),
                        json!({ "source": "last_known", "rate": rate, "reason": err.to_string() }),
                    );
                    Some(AppliedRate::degraded(rate, RateSource::LastKnown))
                } else if let Some(rate) = self.config.fallback_rate(from, to) {
                    findings.warn(
                        FindingCode::RateDegraded,
                        format!("live {from}/{to} quote unavailable; using fallback rate {rate}"),
                        json!({ "source": "fallback", "rate": rate, "reason": err.to_string() }),
                    );
                    Some(AppliedRate::degraded(rate, RateSource::Fallback))
                } else {
                    findings.warn(
                        FindingCode::RateDegraded,
                        format!("no {from}/{to} rate available; destination amount not previewed"),
                        json!({ "source": null, "reason": err.to_string() }),
                    );
                    None
                }
            }
        }
    }

    async fn resolve_rail(&self, corridor: &str, findings: &mut Findings) -> RailInfo {
        let fallback = |status| RailInfo {
            corridor: corridor.to_string(),
            rail: "standard".to_string(),
            status,
            expected_duration_secs: self.config.default_settlement_secs,
        };

        match self
            .bounded("rails", self.adapters.rails.lookup(corridor))
            .await
        {
            Ok(Some(info)) => {
                match info.status {
                    RailStatus::Operational => {}
                    RailStatus::Degraded => findings.warn(
                        FindingCode::RailDegraded,
                        format!("{} rail for {corridor} reports degraded service", info.rail),
                        json!({ "rail": info.rail, "corridor": corridor }),
                    ),
                    RailStatus::Down => findings.fail(
                        FindingCode::RailUnavailable,
                        format!("{} rail for {corridor} is down", info.rail),
                        json!({ "rail": info.rail, "corridor": corridor }),
                    ),
                }
                info
            }
            Ok(None) => {
                findings.warn(
                    FindingCode::RailDegraded,
                    format!("no rail registered for {corridor}; assuming default settlement time"),
                    json!({ "corridor": corridor }),
                );
                fallback(RailStatus::Operational)
            }
            Err(err) => {
                warn!(%err, corridor, "rail directory unavailable");
                findings.warn(
                    FindingCode::RailDegraded,
                    format!("rail status for {corridor} unknown: {err}"),
                    json!({ "corridor": corridor, "reason": err.to_string() }),
                );
                fallback(RailStatus::Degraded)
            }
        }
    }

    async fn check_limits(&self, account_id: &str, amount: Decimal, currency: &Currency, findings: &mut Findings) {
        let report = match self
            .bounded("limits", self.adapters.limits.check(account_id, amount, currency))
            .await
        {
            Ok(report) => report,
            Err(err) => {
                warn!(%err, account_id, "limit check unavailable");
                findings.block(err);
                return;
            }
        };

        for breach in &report.breaches {
            findings.block(SimulationError::LimitExceeded {
                limit_type: breach.limit_type.to_string(),
                current_usage: breach.current_usage,
                requested: breach.requested,
                threshold: breach.threshold,
            });
        }
        // A breached limit is reported once, as the error.
        for near in report
            .near_breaches
            .iter()
            .filter(|n| !report.breaches.iter().any(|b| b.limit_type == n.limit_type))
        {
            let projected = near.current_usage + near.requested;
            // A zero or tiny threshold reads as fully used.
            let utilization = projected
                .checked_div(near.threshold)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
                .map_or(Decimal::ONE_HUNDRED, |pct| round_half_even(pct, 1));
            findings.warn(
                FindingCode::LimitNearBreach,
                format!("{} limit at {utilization}% after this operation", near.limit_type),
                json!({
                    "limit_type": near.limit_type,
                    "current_usage": near.current_usage,
                    "requested": near.requested,
                    "threshold": near.threshold,
                    "utilization_pct": utilization,
                }),
            );
        }
    }

    pub(super) async fn check_compliance(&self, account_id: &str, counterparty: &str, findings: &mut Findings) {
        match self
            .bounded("compliance", self.adapters.compliance.check(account_id, counterparty))
            .await
        {
            Ok(report) if !report.flags.is_empty() => findings.block(SimulationError::ComplianceHold {
                account_id: account_id.to_string(),
                flags: report.flags,
            }),
            Ok(_) => {}
            Err(err) => {
                warn!(%err, account_id, "compliance check unavailable");
                findings.block(err);
            }
        }
    }
}
