use super::{PreviewContext, PreviewEngine, not_found, unrunnable};
use crate::domain::money::{Balance, checked_product, checked_quotient, round_half_even};
use crate::domain::preview::{Preview, RefundPreview};
use crate::domain::request::RefundRequest;
use crate::domain::simulation::{FindingCode, Findings, PreviewOutcome};
use crate::error::{Result, SimulationError};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::warn;

impl PreviewEngine {
    pub(super) async fn preview_refund(
        &self,
        request: &RefundRequest,
        context: &PreviewContext,
    ) -> Result<PreviewOutcome> {
        let now = self.clock.now();
        let mut findings = Findings::default();

        let transfer = match self
            .bounded("history", self.adapters.history.transfer(&request.transfer_id))
            .await
        {
            Ok(Some(transfer)) => transfer,
            Ok(None) => {
                findings.block(not_found("transfer", &request.transfer_id));
                return Ok(unrunnable(findings));
            }
            Err(err) => {
                warn!(%err, transfer_id = %request.transfer_id, "transfer history unavailable");
                findings.block(err);
                return Ok(unrunnable(findings));
            }
        };

        let Some((recipient, payer)) = self
            .counterparties(&transfer.destination_account, &transfer.source_account, &mut findings)
            .await
        else {
            return Ok(unrunnable(findings));
        };

        let prior_refunds = match self
            .bounded("history", self.adapters.history.refunded_total(&transfer.id))
            .await
        {
            Ok(total) => total,
            Err(err) => {
                warn!(%err, transfer_id = %transfer.id, "refund history unavailable");
                findings.block(err);
                Decimal::ZERO
            }
        };
        let already_refunded = prior_refunds + context.pending_refunds;
        let remaining_refundable = (transfer.amount - already_refunded).max(Decimal::ZERO);
        let refund_amount = request.amount.unwrap_or(remaining_refundable);

        if refund_amount > remaining_refundable {
            findings.block(SimulationError::RefundExceedsRemaining {
                transfer_id: transfer.id.clone(),
                requested: refund_amount,
                remaining: remaining_refundable,
                shortfall: refund_amount - remaining_refundable,
            });
        }

        let refund_deadline = transfer
            .completed_at
            .map(|completed_at| completed_at + self.config.refund_window());
        if let Some(deadline) = refund_deadline {
            if now > deadline {
                findings.block(SimulationError::RefundWindowExpired {
                    transfer_id: transfer.id.clone(),
                    deadline,
                });
            } else if deadline - now <= chrono::Duration::seconds(self.config.refund_closing_warning_secs) {
                let hours_left = (deadline - now).num_hours();
                findings.warn(
                    FindingCode::RefundWindowClosing,
                    format!("refund window closes in {hours_left}h at {deadline}"),
                    json!({ "deadline": deadline, "hours_remaining": hours_left }),
                );
            }
        }

        if !transfer.status.is_refundable() {
            findings.block(SimulationError::NotRefundable {
                transfer_id: transfer.id.clone(),
                status: transfer.status.to_string(),
            });
        } else if refund_amount.is_zero() {
            findings.block(SimulationError::NotRefundable {
                transfer_id: transfer.id.clone(),
                status: "fully refunded".to_string(),
            });
        }

        if remaining_refundable > Decimal::ZERO
            && refund_amount <= remaining_refundable
            && refund_amount >= remaining_refundable * self.config.large_refund_fraction
        {
            let fraction = round_half_even(refund_amount / remaining_refundable, 4);
            findings.warn(
                FindingCode::LargeRefundFraction,
                format!("refund covers {fraction} of the remaining refundable amount"),
                json!({
                    "refund_amount": refund_amount,
                    "remaining_refundable": remaining_refundable,
                    "fraction": fraction,
                }),
            );
        }

        // The recipient gives back what it received, at the original effective rate.
        let recipient_debit = if transfer.amount.is_zero() {
            Decimal::ZERO
        } else {
            let gross = checked_product("amount", refund_amount, transfer.destination_amount)?;
            round_half_even(
                checked_quotient("amount", gross, transfer.amount)?,
                self.config.precision_for(&transfer.destination_currency),
            )
        };
        let recipient_balance_before = context.balance_override.unwrap_or(recipient.balance);
        if !recipient_balance_before.covers(recipient_debit) {
            findings.block(SimulationError::InsufficientBalance {
                account_id: recipient.id.clone(),
                required_amount: recipient_debit,
                available_amount: recipient_balance_before.value(),
                shortfall: recipient_debit - recipient_balance_before.value(),
                currency: transfer.destination_currency.to_string(),
            });
        }

        let preview = RefundPreview {
            transfer_id: transfer.id,
            reason: request.reason.clone(),
            currency: transfer.currency,
            original_amount: transfer.amount,
            already_refunded,
            remaining_refundable,
            refund_amount,
            refund_deadline,
            recipient_account: recipient.id,
            recipient_currency: transfer.destination_currency,
            recipient_debit,
            recipient_balance_before,
            recipient_balance_after: recipient_balance_before - Balance::new(recipient_debit),
            payer_account: payer.id,
            payer_balance_before: payer.balance,
            payer_balance_after: payer.balance + Balance::new(refund_amount),
        };
        Ok(PreviewOutcome::Computed {
            preview: Preview::Refund(preview),
            findings,
        })
    }
}
