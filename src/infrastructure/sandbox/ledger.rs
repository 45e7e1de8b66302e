use crate::domain::account::{AccountId, AccountSnapshot};
use crate::domain::clock::ClockRef;
use crate::domain::external::{
    LedgerReceipt, RefundInstruction, StreamInstruction, TransferInstruction, TransferRecord,
    TransferStatus,
};
use crate::domain::money::Balance;
use crate::domain::ports::{AccountDirectory, Ledger, TransferHistory};
use crate::error::{Result, SimulationError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, AccountSnapshot>,
    transfers: HashMap<String, TransferRecord>,
    refunded: HashMap<String, Decimal>,
    streams: HashMap<String, StreamInstruction>,
    receipts: HashMap<String, LedgerReceipt>,
    mutations: u64,
    sequence: u64,
}

impl LedgerState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{prefix}_{:06}", self.sequence)
    }

    fn active_account(&mut self, id: &str) -> Result<&mut AccountSnapshot> {
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| SimulationError::Ledger(format!("unknown account {id}")))?;
        if !account.is_active() {
            return Err(SimulationError::Ledger(format!("account {id} is not active")));
        }
        Ok(account)
    }

    fn debit(&mut self, id: &str, amount: Decimal) -> Result<()> {
        let account = self.active_account(id)?;
        if !account.balance.covers(amount) {
            return Err(SimulationError::Ledger(format!(
                "overdraft on {id}: balance {} below {amount}",
                account.balance.value()
            )));
        }
        account.balance -= Balance::new(amount);
        Ok(())
    }

    fn credit(&mut self, id: &str, amount: Decimal) -> Result<()> {
        self.active_account(id)?.balance += Balance::new(amount);
        Ok(())
    }
}

/// An in-memory ledger for tests, the CLI and the demo server.
///
/// Debits are serialized under one write lock and overdrafts are rejected.
/// A repeated idempotency key returns the first receipt and mutates nothing.
pub struct SandboxLedger {
    state: RwLock<LedgerState>,
    clock: ClockRef,
}

impl SandboxLedger {
    pub fn new(clock: ClockRef) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            clock,
        }
    }

    pub async fn open_account(&self, account: AccountSnapshot) {
        let mut state = self.state.write().await;
        state.accounts.insert(account.id.clone(), account);
    }

    pub async fn record_transfer(&self, transfer: TransferRecord, refunded: Decimal) {
        let mut state = self.state.write().await;
        if !refunded.is_zero() {
            state.refunded.insert(transfer.id.clone(), refunded);
        }
        state.transfers.insert(transfer.id.clone(), transfer);
    }

    pub async fn balance(&self, account_id: &str) -> Option<Decimal> {
        let state = self.state.read().await;
        state.accounts.get(account_id).map(|a| a.balance.value())
    }

    /// Number of state-changing ledger calls applied so far.
    pub async fn mutations(&self) -> u64 {
        self.state.read().await.mutations
    }

    pub async fn stream(&self, stream_id: &str) -> Option<StreamInstruction> {
        self.state.read().await.streams.get(stream_id).cloned()
    }

    async fn apply(
        &self,
        idempotency_key: &str,
        mutate: impl FnOnce(&mut LedgerState) -> Result<LedgerReceipt>,
    ) -> Result<LedgerReceipt> {
        let mut state = self.state.write().await;
        if let Some(receipt) = state.receipts.get(idempotency_key) {
            debug!(idempotency_key, receipt_id = %receipt.id, "ledger replay");
            return Ok(receipt.clone());
        }
        let receipt = mutate(&mut state)?;
        state.mutations += 1;
        state
            .receipts
            .insert(idempotency_key.to_string(), receipt.clone());
        Ok(receipt)
    }
}

#[async_trait]
impl AccountDirectory for SandboxLedger {
    async fn snapshot(&self, account_id: &str) -> Result<Option<AccountSnapshot>> {
        Ok(self.state.read().await.accounts.get(account_id).cloned())
    }
}

#[async_trait]
impl TransferHistory for SandboxLedger {
    async fn transfer(&self, transfer_id: &str) -> Result<Option<TransferRecord>> {
        Ok(self.state.read().await.transfers.get(transfer_id).cloned())
    }

    async fn refunded_total(&self, transfer_id: &str) -> Result<Decimal> {
        let state = self.state.read().await;
        Ok(state
            .refunded
            .get(transfer_id)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}

#[async_trait]
impl Ledger for SandboxLedger {
    async fn create_transfer(&self, idempotency_key: &str, instruction: &TransferInstruction) -> Result<LedgerReceipt> {
        let now = self.clock.now();
        self.apply(idempotency_key, |state| {
            state.active_account(&instruction.destination_account)?;
            state.debit(&instruction.source_account, instruction.amount.value())?;
            state.credit(&instruction.destination_account, instruction.destination_amount)?;

            let id = state.next_id("tr");
            state.transfers.insert(
                id.clone(),
                TransferRecord {
                    id: id.clone(),
                    source_account: instruction.source_account.clone(),
                    destination_account: instruction.destination_account.clone(),
                    amount: instruction.amount.value(),
                    currency: instruction.currency.clone(),
                    destination_amount: instruction.destination_amount,
                    destination_currency: instruction.destination_currency.clone(),
                    status: TransferStatus::Completed,
                    completed_at: Some(now),
                },
            );
            Ok(LedgerReceipt {
                id,
                status: TransferStatus::Completed,
            })
        })
        .await
    }

    async fn create_refund(&self, idempotency_key: &str, instruction: &RefundInstruction) -> Result<LedgerReceipt> {
        self.apply(idempotency_key, |state| {
            let transfer = state
                .transfers
                .get(&instruction.transfer_id)
                .cloned()
                .ok_or_else(|| SimulationError::Ledger(format!("unknown transfer {}", instruction.transfer_id)))?;
            let refunded = state
                .refunded
                .get(&transfer.id)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let refund = instruction.amount.value();
            if refunded + refund > transfer.amount {
                return Err(SimulationError::Ledger(format!(
                    "refund of {refund} exceeds what remains on {}",
                    transfer.id
                )));
            }

            state.active_account(&transfer.source_account)?;
            state.debit(&transfer.destination_account, instruction.recipient_debit)?;
            state.credit(&transfer.source_account, refund)?;
            state.refunded.insert(transfer.id.clone(), refunded + refund);

            Ok(LedgerReceipt {
                id: state.next_id("rf"),
                status: TransferStatus::Completed,
            })
        })
        .await
    }

    async fn create_stream(&self, idempotency_key: &str, instruction: &StreamInstruction) -> Result<LedgerReceipt> {
        self.apply(idempotency_key, |state| {
            state.active_account(&instruction.source_account)?;
            state.active_account(&instruction.destination_account)?;
            let id = state.next_id("st");
            state.streams.insert(id.clone(), instruction.clone());
            Ok(LedgerReceipt {
                id,
                status: TransferStatus::Pending,
            })
        })
        .await
    }
}
