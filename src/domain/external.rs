//! Data exchanged with the external collaborators (rates, fees, limits,
//! compliance, rails, ledger).

use super::account::AccountId;
use super::money::{Amount, Currency};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct FxQuote {
    pub from: Currency,
    pub to: Currency,
    pub rate: Decimal,
    pub spread: Decimal,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone)]
pub struct FeeContext {
    pub account_id: AccountId,
    pub amount: Decimal,
    pub currency: Currency,
    pub destination_currency: Currency,
    pub corridor: String,
    /// Minor units fees are rounded to.
    pub precision: u32,
}

impl FeeContext {
    pub fn is_cross_currency(&self) -> bool {
        self.currency != self.destination_currency
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct FeeBreakdown {
    pub platform_fee: Decimal,
    pub fx_fee: Decimal,
    pub rail_fee: Decimal,
}

impl FeeBreakdown {
    pub fn total(&self) -> Decimal {
        self.platform_fee + self.fx_fee + self.rail_fee
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    PerTransaction,
    Daily,
    Monthly,
    Velocity,
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LimitType::PerTransaction => "per_transaction",
            LimitType::Daily => "daily",
            LimitType::Monthly => "monthly",
            LimitType::Velocity => "velocity",
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LimitUsage {
    pub limit_type: LimitType,
    pub current_usage: Decimal,
    pub requested: Decimal,
    pub threshold: Decimal,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct LimitReport {
    pub breaches: Vec<LimitUsage>,
    pub near_breaches: Vec<LimitUsage>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct ComplianceReport {
    pub flags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum RailStatus {
    #[default]
    Operational,
    Degraded,
    Down,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct RailInfo {
    pub corridor: String,
    pub rail: String,
    pub status: RailStatus,
    pub expected_duration_secs: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

impl TransferStatus {
    pub fn is_refundable(self) -> bool {
        self == TransferStatus::Completed
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Reversed => "reversed",
        })
    }
}

/// A settled transfer as recorded by the ledger.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransferRecord {
    pub id: String,
    pub source_account: AccountId,
    pub destination_account: AccountId,
    pub amount: Decimal,
    pub currency: Currency,
    pub destination_amount: Decimal,
    pub destination_currency: Currency,
    pub status: TransferStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransferInstruction {
    pub source_account: AccountId,
    pub destination_account: AccountId,
    pub amount: Amount,
    pub currency: Currency,
    pub destination_currency: Currency,
    pub destination_amount: Decimal,
    pub fx_rate: Decimal,
    pub total_fees: Decimal,
    pub corridor: String,
    pub rail: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct RefundInstruction {
    pub transfer_id: String,
    pub amount: Amount,
    pub recipient_debit: Decimal,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct StreamInstruction {
    pub source_account: AccountId,
    pub destination_account: AccountId,
    pub rate_per_second: Amount,
    pub currency: Currency,
    pub duration_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LedgerReceipt {
    pub id: String,
    pub status: TransferStatus,
}
