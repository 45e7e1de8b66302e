use super::money::{Balance, Currency};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type AccountId = String;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Frozen,
    Closed,
}

/// Read-only view of an account as reported by the ledger collaborator.
///
/// The engine never mutates a snapshot; previews work on copies and the
/// Execution Gate hands real mutations to the ledger.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub status: AccountStatus,
    pub balance: Balance,
    pub currency: Currency,
    /// Typical single-transfer size from the account's history, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typical_amount: Option<Decimal>,
}

impl AccountSnapshot {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}
