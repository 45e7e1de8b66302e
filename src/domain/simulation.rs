use super::preview::{Preview, VarianceReport};
use super::request::{ActionRequest, ActionType};
use crate::error::{Result, SimulationError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SimulationStatus {
    Pending,
    Completed,
    Failed,
    Executed,
    Expired,
}

impl SimulationStatus {
    fn can_become(self, to: SimulationStatus) -> bool {
        use SimulationStatus::*;
        matches!(
            (self, to),
            (Pending, Completed)
                | (Pending, Failed)
                | (Completed, Executed)
                | (Completed, Expired)
                | (Completed, Failed)
                | (Failed, Expired)
        )
    }
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SimulationStatus::Pending => "pending",
            SimulationStatus::Completed => "completed",
            SimulationStatus::Failed => "failed",
            SimulationStatus::Executed => "executed",
            SimulationStatus::Expired => "expired",
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FindingCode {
    InsufficientBalance,
    LimitExceeded,
    LimitNearBreach,
    ComplianceHold,
    RateDegraded,
    RateUnfavorable,
    RateUnavailable,
    LowBalance,
    RailDegraded,
    RailUnavailable,
    LargeAmount,
    AccountInactive,
    FeesExceedAmount,
    NotFound,
    RefundExceedsRemaining,
    RefundWindowExpired,
    RefundWindowClosing,
    NotRefundable,
    LargeRefundFraction,
    ShortRunway,
    HighDailyBurn,
    ExternalAdapterError,
    FeesChanged,
}

/// A structured preview result. Warnings and errors share this shape and
/// differ only in severity.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub code: FindingCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

impl Finding {
    pub fn warning(code: FindingCode, message: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            detail,
        }
    }

    pub fn error(code: FindingCode, message: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            detail,
        }
    }

    /// Converts a blocking domain error into an error finding, keeping the
    /// numeric context as structured detail.
    pub fn blocking(err: &SimulationError) -> Self {
        let message = err.to_string();
        let (code, detail) = match err {
            SimulationError::InsufficientBalance {
                account_id,
                required_amount,
                available_amount,
                shortfall,
                currency,
            } => (
                FindingCode::InsufficientBalance,
                json!({
                    "account_id": account_id,
                    "required_amount": required_amount,
                    "available_amount": available_amount,
                    "shortfall": shortfall,
                    "currency": currency,
                }),
            ),
            SimulationError::LimitExceeded {
                limit_type,
                current_usage,
                requested,
                threshold,
            } => (
                FindingCode::LimitExceeded,
                json!({
                    "limit_type": limit_type,
                    "current_usage": current_usage,
                    "requested": requested,
                    "threshold": threshold,
                }),
            ),
            SimulationError::ComplianceHold { account_id, flags } => (
                FindingCode::ComplianceHold,
                json!({ "account_id": account_id, "flags": flags }),
            ),
            SimulationError::RefundWindowExpired {
                transfer_id,
                deadline,
            } => (
                FindingCode::RefundWindowExpired,
                json!({ "transfer_id": transfer_id, "deadline": deadline }),
            ),
            SimulationError::RefundExceedsRemaining {
                transfer_id,
                requested,
                remaining,
                shortfall,
            } => (
                FindingCode::RefundExceedsRemaining,
                json!({
                    "transfer_id": transfer_id,
                    "requested": requested,
                    "remaining": remaining,
                    "shortfall": shortfall,
                }),
            ),
            SimulationError::NotRefundable {
                transfer_id,
                status,
            } => (
                FindingCode::NotRefundable,
                json!({ "transfer_id": transfer_id, "status": status }),
            ),
            SimulationError::NotFound { entity, id } => (
                FindingCode::NotFound,
                json!({ "entity": entity, "id": id }),
            ),
            SimulationError::ExternalAdapter { adapter, reason } => (
                FindingCode::ExternalAdapterError,
                json!({ "adapter": adapter, "reason": reason }),
            ),
            other => (
                FindingCode::ExternalAdapterError,
                json!({ "reason": other.to_string() }),
            ),
        };
        Self::error(code, message, detail)
    }
}

/// Accumulates findings while a preview is assembled.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Findings {
    pub warnings: Vec<Finding>,
    pub errors: Vec<Finding>,
}

impl Findings {
    pub fn warn(&mut self, code: FindingCode, message: impl Into<String>, detail: serde_json::Value) {
        self.warnings.push(Finding::warning(code, message, detail));
    }

    pub fn fail(&mut self, code: FindingCode, message: impl Into<String>, detail: serde_json::Value) {
        self.errors.push(Finding::error(code, message, detail));
    }

    pub fn block(&mut self, err: SimulationError) {
        self.errors.push(Finding::blocking(&err));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_error(&self, code: FindingCode) -> bool {
        self.errors.iter().any(|f| f.code == code)
    }
}

/// Result of a preview run.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewOutcome {
    Computed { preview: Preview, findings: Findings },
    /// The preview could not be built at all (unknown account or transfer).
    Unrunnable { findings: Findings },
}

impl PreviewOutcome {
    pub fn findings(&self) -> &Findings {
        match self {
            PreviewOutcome::Computed { findings, .. } => findings,
            PreviewOutcome::Unrunnable { findings } => findings,
        }
    }

    pub fn is_executable(&self) -> bool {
        matches!(self, PreviewOutcome::Computed { findings, .. } if !findings.has_errors())
    }
}

/// Outcome of an attempt to claim a simulation for execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyExecuted(String),
    /// Another caller holds a live claim.
    Held,
    NotClaimable(SimulationStatus),
}

/// A stored, time-bounded preview of an operation with its execution verdict.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Simulation {
    pub id: Uuid,
    pub tenant_id: String,
    pub action_type: ActionType,
    pub request_payload: ActionRequest,
    pub status: SimulationStatus,
    pub can_execute: bool,
    pub preview: Option<Preview>,
    pub warnings: Vec<Finding>,
    pub errors: Vec<Finding>,
    /// Findings from execution-time re-validation, kept apart from `errors`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub execution_errors: Vec<Finding>,
    pub executed: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_result_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance: Option<VarianceReport>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Simulation {
    pub fn new(tenant_id: impl Into<String>, request: ActionRequest, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            action_type: request.action_type(),
            request_payload: request,
            status: SimulationStatus::Pending,
            can_execute: false,
            preview: None,
            warnings: Vec::new(),
            errors: Vec::new(),
            execution_errors: Vec::new(),
            executed: false,
            executed_at: None,
            execution_result_id: None,
            variance: None,
            expires_at: now + ttl,
            created_at: now,
            claimed_at: None,
        }
    }

    /// Leaves `pending` with the preview result.
    pub fn settle(&mut self, outcome: PreviewOutcome) -> Result<()> {
        match outcome {
            PreviewOutcome::Computed { preview, findings } => {
                self.transition(SimulationStatus::Completed)?;
                self.preview = Some(preview);
                self.warnings = findings.warnings;
                self.errors = findings.errors;
            }
            PreviewOutcome::Unrunnable { findings } => {
                self.transition(SimulationStatus::Failed)?;
                self.warnings = findings.warnings;
                self.errors = findings.errors;
            }
        }
        self.refresh_verdict();
        Ok(())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn try_claim(&mut self, now: DateTime<Utc>, lease: Duration) -> ClaimOutcome {
        if self.executed {
            return ClaimOutcome::AlreadyExecuted(self.execution_result_id.clone().unwrap_or_default());
        }
        if self.status != SimulationStatus::Completed || !self.can_execute {
            return ClaimOutcome::NotClaimable(self.status);
        }
        if self.holds_live_claim(now, lease) {
            return ClaimOutcome::Held;
        }
        self.claimed_at = Some(now);
        ClaimOutcome::Claimed
    }

    pub fn holds_live_claim(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        self.claimed_at.is_some_and(|claimed_at| now < claimed_at + lease)
    }

    /// `completed`/`failed`, past expiry and not held by a live claim.
    pub fn is_lapsed(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        matches!(self.status, SimulationStatus::Completed | SimulationStatus::Failed)
            && self.is_expired_at(now)
            && !self.holds_live_claim(now, lease)
    }

    pub fn release_claim(&mut self) {
        self.claimed_at = None;
    }

    /// Records the execution. Returns false when already executed.
    ///
    /// A claim holder may complete even if the simulation expired after its
    /// claim lapsed: the ledger has already committed by then.
    pub fn mark_executed(
        &mut self,
        execution_result_id: String,
        at: DateTime<Utc>,
        variance: Option<VarianceReport>,
    ) -> Result<bool> {
        if self.executed {
            return Ok(false);
        }
        if self.status == SimulationStatus::Expired && self.claimed_at.is_some() {
            self.status = SimulationStatus::Executed;
        } else {
            self.transition(SimulationStatus::Executed)?;
        }
        self.executed = true;
        self.executed_at = Some(at);
        self.execution_result_id = Some(execution_result_id);
        self.variance = variance;
        self.claimed_at = None;
        self.refresh_verdict();
        Ok(true)
    }

    /// Execution-time re-validation found a blocking condition.
    pub fn mark_stale(&mut self, findings: Vec<Finding>) -> Result<()> {
        self.transition(SimulationStatus::Failed)?;
        self.execution_errors = findings;
        self.claimed_at = None;
        self.refresh_verdict();
        Ok(())
    }

    /// Returns false if the simulation is not eligible for expiry. A live
    /// claim defers expiry; a lapsed one is kept so its holder can still
    /// record the ledger result.
    pub fn mark_expired(&mut self, now: DateTime<Utc>, lease: Duration) -> bool {
        if !self.is_lapsed(now, lease) {
            return false;
        }
        self.status = SimulationStatus::Expired;
        self.refresh_verdict();
        true
    }

    /// All findings that explain why the simulation cannot execute.
    pub fn blocking_findings(&self) -> Vec<Finding> {
        self.errors
            .iter()
            .chain(self.execution_errors.iter())
            .cloned()
            .collect()
    }

    fn transition(&mut self, to: SimulationStatus) -> Result<()> {
        if !self.status.can_become(to) {
            return Err(SimulationError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    fn refresh_verdict(&mut self) {
        self.can_execute = self.status == SimulationStatus::Completed && self.errors.is_empty();
    }
}
