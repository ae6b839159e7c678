use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::error;

use crate::domain::{
    verify_chain, AccountType, ChainViolation, EntryDraft, EntryType, LedgerEntry, WalletId,
};
use crate::storage::Repository;

use super::AppError;

/// Outcome of walking one hash chain end to end.
#[derive(Debug, Clone)]
pub struct ChainReport {
    pub wallet_id: Option<WalletId>,
    pub entries_checked: usize,
    pub violation: Option<ChainViolation>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.violation.is_none()
    }
}

/// Append-only writer for the double-entry ledger. Entries chain per wallet;
/// wallet-less entries (guest payments, tax postings) chain among themselves.
pub struct LedgerService {
    repo: Repository,
}

impl LedgerService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Seal and insert one entry within an open transaction, chaining it onto
    /// the head of its wallet's chain (or the global chain) as read on the
    /// same connection.
    pub async fn create_entry_in(
        conn: &mut SqliteConnection,
        draft: EntryDraft,
    ) -> Result<LedgerEntry, AppError> {
        if draft.amount <= Decimal::ZERO {
            return Err(AppError::Validation("ledger amount must be positive".into()));
        }
        let sequence = Repository::next_sequence_in(conn, "ledger_sequence").await?;
        let previous = Repository::ledger_chain_head_in(conn, draft.wallet_id).await?;
        let entry = draft.seal(sequence, previous, Utc::now());
        Repository::insert_ledger_entry_in(conn, &entry).await?;
        Ok(entry)
    }

    /// Balanced debit/credit pair in its own transaction. The debit and
    /// credit land on their respective chains but share a transaction id.
    pub async fn record_double_entry(
        &self,
        transaction_id: &str,
        debit: EntryDraft,
        credit: EntryDraft,
    ) -> Result<(LedgerEntry, LedgerEntry), AppError> {
        if debit.entry_type != EntryType::Debit || credit.entry_type != EntryType::Credit {
            return Err(AppError::Validation("double entry needs one debit and one credit".into()));
        }
        if debit.amount != credit.amount {
            return Err(AppError::Validation(format!(
                "unbalanced double entry: debit {} vs credit {}",
                debit.amount, credit.amount
            )));
        }
        let mut tx = self.repo.begin().await?;
        let mut debit = debit;
        let mut credit = credit;
        debit.transaction_id = transaction_id.to_string();
        credit.transaction_id = transaction_id.to_string();
        let debit_entry = Self::create_entry_in(&mut tx, debit).await?;
        let credit_entry = Self::create_entry_in(&mut tx, credit).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok((debit_entry, credit_entry))
    }

    pub async fn entries_for_transaction(&self, transaction_id: &str) -> Result<Vec<LedgerEntry>, AppError> {
        Ok(self.repo.list_entries_by_transaction(transaction_id).await?)
    }

    pub async fn entries_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        Ok(self.repo.list_entries_in_window(start, end).await?)
    }

    /// Replay one chain from genesis and report the first break, if any.
    pub async fn verify_chain(&self, wallet_id: Option<WalletId>) -> Result<ChainReport, AppError> {
        let entries = self.repo.list_chain_entries(wallet_id).await?;
        let violation = verify_chain(&entries);
        if let Some(ref v) = violation {
            error!(
                wallet_id = ?wallet_id,
                index = v.index,
                entry_id = %v.entry_id,
                kind = ?v.kind,
                "ledger chain verification failed"
            );
        }
        Ok(ChainReport { wallet_id, entries_checked: entries.len(), violation })
    }

    /// Verify every chain: one per wallet plus the global wallet-less chain.
    pub async fn verify_all_chains(&self) -> Result<Vec<ChainReport>, AppError> {
        let wallets = self.repo.list_wallets().await?;
        let mut reports = Vec::with_capacity(wallets.len() + 1);
        reports.push(self.verify_chain(None).await?);
        for wallet in wallets {
            reports.push(self.verify_chain(Some(wallet.id)).await?);
        }
        Ok(reports)
    }

    /// In-window debit and credit totals, skipping informational tax
    /// postings. A balanced ledger has equal totals.
    pub async fn window_totals(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(Decimal, Decimal), AppError> {
        let entries = self.repo.list_entries_in_window(start, end).await?;
        let mut debits = Decimal::ZERO;
        let mut credits = Decimal::ZERO;
        for entry in &entries {
            if entry.account_type.is_informational() {
                continue;
            }
            match entry.entry_type {
                EntryType::Debit => debits += entry.amount,
                EntryType::Credit => credits += entry.amount,
            }
        }
        Ok((debits, credits))
    }
}

/// Shorthand draft constructors used by the settlement and payout flows.
pub fn wallet_credit_draft(
    transaction_id: &str,
    wallet_id: WalletId,
    account_type: AccountType,
    amount: Decimal,
    currency: &str,
) -> EntryDraft {
    EntryDraft::new(transaction_id, account_type, EntryType::Credit, amount, currency)
        .with_wallet(wallet_id)
}

pub fn wallet_debit_draft(
    transaction_id: &str,
    wallet_id: WalletId,
    account_type: AccountType,
    amount: Decimal,
    currency: &str,
) -> EntryDraft {
    EntryDraft::new(transaction_id, account_type, EntryType::Debit, amount, currency)
        .with_wallet(wallet_id)
}
