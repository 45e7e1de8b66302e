use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::simulation::{Finding, SimulationStatus};

pub type Result<T> = std::result::Result<T, SimulationError>;

/// A single rejected request field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn describe_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_findings(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| f.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("validation failed: {}", describe_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(
        "insufficient balance: required {required_amount} {currency}, available {available_amount}, shortfall {shortfall}"
    )]
    InsufficientBalance {
        account_id: String,
        required_amount: Decimal,
        available_amount: Decimal,
        shortfall: Decimal,
        currency: String,
    },

    #[error("{limit_type} limit exceeded: usage {current_usage} + {requested} over threshold {threshold}")]
    LimitExceeded {
        limit_type: String,
        current_usage: Decimal,
        requested: Decimal,
        threshold: Decimal,
    },

    #[error("compliance hold on {account_id}: {}", .flags.join(", "))]
    ComplianceHold {
        account_id: String,
        flags: Vec<String>,
    },

    #[error("refund window for transfer {transfer_id} closed at {deadline}")]
    RefundWindowExpired {
        transfer_id: String,
        deadline: DateTime<Utc>,
    },

    #[error(
        "refund of {requested} exceeds remaining refundable {remaining} on transfer {transfer_id} (shortfall {shortfall})"
    )]
    RefundExceedsRemaining {
        transfer_id: String,
        requested: Decimal,
        remaining: Decimal,
        shortfall: Decimal,
    },

    #[error("transfer {transfer_id} is {status} and cannot be refunded")]
    NotRefundable { transfer_id: String, status: String },

    #[error("simulation {id} expired at {expires_at}")]
    Expired { id: Uuid, expires_at: DateTime<Utc> },

    #[error("simulation already executed as {execution_result_id}")]
    AlreadyExecuted { execution_result_id: String },

    #[error("simulation {id} is being executed by another caller")]
    ConcurrencyConflict { id: Uuid },

    #[error("simulation {id} ({status}) is not executable: {}", describe_findings(.findings))]
    NotExecutable {
        id: Uuid,
        status: SimulationStatus,
        findings: Vec<Finding>,
    },

    #[error("simulation {id} became stale during re-validation: {}", describe_findings(.findings))]
    Stale { id: Uuid, findings: Vec<Finding> },

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: SimulationStatus,
        to: SimulationStatus,
    },

    #[error("{adapter} adapter unavailable: {reason}")]
    ExternalAdapter {
        adapter: &'static str,
        reason: String,
    },

    #[error("ledger rejected the operation: {0}")]
    Ledger(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

impl SimulationError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn adapter(adapter: &'static str, reason: impl ToString) -> Self {
        Self::ExternalAdapter {
            adapter,
            reason: reason.to_string(),
        }
    }
}
