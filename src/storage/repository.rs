use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

use crate::domain::{
    AccountType, AuditCategory, AuditLog, EntryType, FxRate, LedgerEntry, OwnerType, Payout,
    PayoutMethod, PayoutStatus, PeriodType, ReconciliationRecord, ReconciliationStatus,
    SettlementStatus, SettlementTransaction, Wallet, WalletId, WalletStatus, CHAIN_GENESIS,
};

use super::MIGRATION_001_INITIAL;

/// Repository for persisting and querying the settlement core's tables.
///
/// Pool-level methods run standalone; the `*_in` associated functions take an
/// explicit connection so callers can group writes into one transaction
/// (settlement, wallet mutation + audit row, ...).
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Begin a transaction spanning multiple writes.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await.context("Failed to begin transaction")
    }

    // ========================
    // Wallet operations
    // ========================

    /// Insert a new wallet.
    pub async fn save_wallet(&self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, owner_id, owner_type, currency, available_balance, frozen_balance,
                                 pending_balance, total_earnings, total_withdrawals, last_balance_hash,
                                 status, payout_method, payout_account, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(wallet.id.to_string())
        .bind(&wallet.owner_id)
        .bind(wallet.owner_type.as_str())
        .bind(&wallet.currency)
        .bind(wallet.available_balance.to_string())
        .bind(wallet.frozen_balance.to_string())
        .bind(wallet.pending_balance.to_string())
        .bind(wallet.total_earnings.to_string())
        .bind(wallet.total_withdrawals.to_string())
        .bind(&wallet.last_balance_hash)
        .bind(wallet.status.as_str())
        .bind(&wallet.payout_method)
        .bind(&wallet.payout_account)
        .bind(wallet.created_at.to_rfc3339())
        .bind(wallet.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save wallet")?;
        Ok(())
    }

    pub async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        let row = sqlx::query("SELECT * FROM wallets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch wallet")?;
        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    /// Fetch a wallet on an explicit connection (inside a transaction).
    pub async fn get_wallet_in(conn: &mut SqliteConnection, id: WalletId) -> Result<Option<Wallet>> {
        let row = sqlx::query("SELECT * FROM wallets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch wallet")?;
        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    pub async fn get_wallet_by_owner(&self, owner_id: &str, currency: &str) -> Result<Option<Wallet>> {
        let row = sqlx::query("SELECT * FROM wallets WHERE owner_id = ? AND currency = ?")
            .bind(owner_id)
            .bind(currency)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch wallet by owner")?;
        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    pub async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let rows = sqlx::query("SELECT * FROM wallets ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list wallets")?;
        rows.iter().map(Self::row_to_wallet).collect()
    }

    pub async fn list_wallets_by_type(&self, owner_type: OwnerType) -> Result<Vec<Wallet>> {
        let rows = sqlx::query("SELECT * FROM wallets WHERE owner_type = ? ORDER BY created_at")
            .bind(owner_type.as_str())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list wallets by type")?;
        rows.iter().map(Self::row_to_wallet).collect()
    }

    /// Write back a mutated wallet, guarded by the balance hash the caller
    /// read. Returns false when a concurrent writer got there first (the
    /// stored hash no longer matches), in which case nothing was written.
    /// Balance write-back guarded by the hash the mutation read. Writes
    /// balances only; `status` belongs to `set_wallet_status`, so a mutation
    /// racing an administrative lock cannot carry a stale status.
    pub async fn update_wallet_guarded_in(
        conn: &mut SqliteConnection,
        wallet: &Wallet,
        expected_hash: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET available_balance = ?, frozen_balance = ?, pending_balance = ?,
                total_earnings = ?, total_withdrawals = ?, last_balance_hash = ?,
                updated_at = ?
            WHERE id = ? AND last_balance_hash = ?
            "#,
        )
        .bind(wallet.available_balance.to_string())
        .bind(wallet.frozen_balance.to_string())
        .bind(wallet.pending_balance.to_string())
        .bind(wallet.total_earnings.to_string())
        .bind(wallet.total_withdrawals.to_string())
        .bind(&wallet.last_balance_hash)
        .bind(wallet.updated_at.to_rfc3339())
        .bind(wallet.id.to_string())
        .bind(expected_hash)
        .execute(&mut *conn)
        .await
        .context("Failed to update wallet")?;
        Ok(result.rows_affected() > 0)
    }

    /// Flip the administrative lock. Does not touch balances or the hash.
    pub async fn set_wallet_status(&self, id: WalletId, status: WalletStatus) -> Result<()> {
        sqlx::query("UPDATE wallets SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to set wallet status")?;
        Ok(())
    }

    // ========================
    // Sequences and chain heads
    // ========================

    /// Get the next value of a named counter and increment it atomically.
    pub async fn next_sequence_in(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
        let row = sqlx::query(
            "UPDATE sequence_counters SET value = value + 1 WHERE name = ? RETURNING value",
        )
        .bind(name)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to get next sequence number")?;
        Ok(row.get("value"))
    }

    /// Hash of the latest ledger entry in the given chain: the wallet's own
    /// chain when a wallet id is given, else the global (wallet-less) chain.
    /// Reading this on the writing connection replaces any process-global
    /// "last hash" state.
    pub async fn ledger_chain_head_in(
        conn: &mut SqliteConnection,
        wallet_id: Option<WalletId>,
    ) -> Result<String> {
        let row = match wallet_id {
            Some(id) => {
                sqlx::query(
                    "SELECT entry_hash FROM ledger_entries WHERE wallet_id = ? ORDER BY sequence DESC LIMIT 1",
                )
                .bind(id.to_string())
                .fetch_optional(&mut *conn)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT entry_hash FROM ledger_entries WHERE wallet_id IS NULL ORDER BY sequence DESC LIMIT 1",
                )
                .fetch_optional(&mut *conn)
                .await
            }
        }
        .context("Failed to read ledger chain head")?;
        Ok(row.map_or_else(|| CHAIN_GENESIS.to_string(), |r| r.get("entry_hash")))
    }

    /// Hash of the latest audit log row.
    pub async fn audit_chain_head_in(conn: &mut SqliteConnection) -> Result<String> {
        let row =
            sqlx::query("SELECT log_hash FROM financial_audit_logs ORDER BY sequence DESC LIMIT 1")
                .fetch_optional(&mut *conn)
                .await
                .context("Failed to read audit chain head")?;
        Ok(row.map_or_else(|| CHAIN_GENESIS.to_string(), |r| r.get("log_hash")))
    }

    // ========================
    // Ledger operations
    // ========================

    pub async fn insert_ledger_entry_in(conn: &mut SqliteConnection, entry: &LedgerEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, sequence, transaction_id, wallet_id, account_type, entry_type,
                                        amount, currency, booking_id, balance_before, balance_after,
                                        description, entry_hash, previous_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.sequence)
        .bind(&entry.transaction_id)
        .bind(entry.wallet_id.map(|w| w.to_string()))
        .bind(entry.account_type.as_str())
        .bind(entry.entry_type.as_str())
        .bind(entry.amount.to_string())
        .bind(&entry.currency)
        .bind(&entry.booking_id)
        .bind(entry.balance_before.map(|d| d.to_string()))
        .bind(entry.balance_after.map(|d| d.to_string()))
        .bind(&entry.description)
        .bind(&entry.entry_hash)
        .bind(&entry.previous_hash)
        .bind(entry.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to insert ledger entry")?;
        Ok(())
    }

    /// Entries of one chain in creation order: a wallet's rows, or the
    /// wallet-less global rows when no wallet id is given.
    pub async fn list_chain_entries(&self, wallet_id: Option<WalletId>) -> Result<Vec<LedgerEntry>> {
        let rows = match wallet_id {
            Some(id) => {
                sqlx::query("SELECT * FROM ledger_entries WHERE wallet_id = ? ORDER BY sequence")
                    .bind(id.to_string())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM ledger_entries WHERE wallet_id IS NULL ORDER BY sequence")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list chain entries")?;
        rows.iter().map(Self::row_to_ledger_entry).collect()
    }

    pub async fn list_entries_by_transaction(&self, transaction_id: &str) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query("SELECT * FROM ledger_entries WHERE transaction_id = ? ORDER BY sequence")
            .bind(transaction_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list entries by transaction")?;
        rows.iter().map(Self::row_to_ledger_entry).collect()
    }

    pub async fn list_entries_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM ledger_entries WHERE created_at >= ? AND created_at < ? ORDER BY sequence",
        )
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list entries in window")?;
        rows.iter().map(Self::row_to_ledger_entry).collect()
    }

    /// Overwrite a stored entry hash. Test-only back door for integrity
    /// verification scenarios.
    #[doc(hidden)]
    pub async fn corrupt_entry_hash(&self, id: Uuid, bogus_hash: &str) -> Result<()> {
        sqlx::query("UPDATE ledger_entries SET entry_hash = ? WHERE id = ?")
            .bind(bogus_hash)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to overwrite entry hash")?;
        Ok(())
    }

    // ========================
    // Settlement operations
    // ========================

    pub async fn insert_settlement_in(
        conn: &mut SqliteConnection,
        txn: &SettlementTransaction,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settlement_transactions (id, booking_id, gross_amount, currency, owner_share,
                dellala_share, corporate_share, vat_amount, withholding_tax, fx_rate, original_amount,
                original_currency, status, owner_id, dellala_id, guest_id, payment_ref, payment_method,
                transaction_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&txn.id)
        .bind(&txn.booking_id)
        .bind(txn.gross_amount.to_string())
        .bind(&txn.currency)
        .bind(txn.owner_share.to_string())
        .bind(txn.dellala_share.to_string())
        .bind(txn.corporate_share.to_string())
        .bind(txn.vat_amount.to_string())
        .bind(txn.withholding_tax.to_string())
        .bind(txn.fx_rate.map(|d| d.to_string()))
        .bind(txn.original_amount.map(|d| d.to_string()))
        .bind(&txn.original_currency)
        .bind(txn.status.as_str())
        .bind(&txn.owner_id)
        .bind(&txn.dellala_id)
        .bind(&txn.guest_id)
        .bind(&txn.payment_ref)
        .bind(&txn.payment_method)
        .bind(&txn.transaction_hash)
        .bind(txn.created_at.to_rfc3339())
        .bind(txn.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to insert settlement transaction")?;
        Ok(())
    }

    pub async fn get_settlement(&self, id: &str) -> Result<Option<SettlementTransaction>> {
        let row = sqlx::query("SELECT * FROM settlement_transactions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch settlement")?;
        row.as_ref().map(Self::row_to_settlement).transpose()
    }

    pub async fn get_settlement_by_booking(
        &self,
        booking_id: &str,
    ) -> Result<Option<SettlementTransaction>> {
        let row = sqlx::query("SELECT * FROM settlement_transactions WHERE booking_id = ?")
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch settlement by booking")?;
        row.as_ref().map(Self::row_to_settlement).transpose()
    }

    pub async fn get_frozen_settlement_by_booking(
        &self,
        booking_id: &str,
    ) -> Result<Option<SettlementTransaction>> {
        let row = sqlx::query(
            "SELECT * FROM settlement_transactions WHERE booking_id = ? AND status = 'frozen'",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch frozen settlement")?;
        row.as_ref().map(Self::row_to_settlement).transpose()
    }

    pub async fn update_settlement_status_in(
        conn: &mut SqliteConnection,
        id: &str,
        status: SettlementStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE settlement_transactions SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to update settlement status")?;
        Ok(())
    }

    pub async fn list_settlements_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SettlementTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM settlement_transactions WHERE created_at >= ? AND created_at < ? ORDER BY created_at",
        )
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list settlements in window")?;
        rows.iter().map(Self::row_to_settlement).collect()
    }

    pub async fn list_settlements_by_owner(&self, owner_id: &str) -> Result<Vec<SettlementTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM settlement_transactions WHERE owner_id = ? ORDER BY created_at",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list settlements by owner")?;
        rows.iter().map(Self::row_to_settlement).collect()
    }

    /// Overwrite a stored share. Test-only back door for reconciliation
    /// discrepancy scenarios.
    #[doc(hidden)]
    pub async fn corrupt_settlement_owner_share(&self, id: &str, owner_share: Decimal) -> Result<()> {
        sqlx::query("UPDATE settlement_transactions SET owner_share = ? WHERE id = ?")
            .bind(owner_share.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to overwrite owner share")?;
        Ok(())
    }

    // ========================
    // Payout operations
    // ========================

    pub async fn insert_payout_in(conn: &mut SqliteConnection, payout: &Payout) -> Result<()> {
        let transaction_ids = serde_json::to_string(&payout.transaction_ids)?;
        sqlx::query(
            r#"
            INSERT INTO payouts (id, wallet_id, recipient_id, recipient_type, amount, fee,
                withholding_tax, net_amount, method, status, batch_id, period_start, period_end,
                transaction_ids, failure_reason, requested_at, processed_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(payout.id.to_string())
        .bind(payout.wallet_id.to_string())
        .bind(&payout.recipient_id)
        .bind(payout.recipient_type.as_str())
        .bind(payout.amount.to_string())
        .bind(payout.fee.to_string())
        .bind(payout.withholding_tax.to_string())
        .bind(payout.net_amount.to_string())
        .bind(payout.method.as_str())
        .bind(payout.status.as_str())
        .bind(&payout.batch_id)
        .bind(payout.period_start.map(|d| d.to_rfc3339()))
        .bind(payout.period_end.map(|d| d.to_rfc3339()))
        .bind(transaction_ids)
        .bind(&payout.failure_reason)
        .bind(payout.requested_at.to_rfc3339())
        .bind(payout.processed_at.map(|d| d.to_rfc3339()))
        .bind(payout.completed_at.map(|d| d.to_rfc3339()))
        .execute(&mut *conn)
        .await
        .context("Failed to insert payout")?;
        Ok(())
    }

    pub async fn get_payout(&self, id: Uuid) -> Result<Option<Payout>> {
        let row = sqlx::query("SELECT * FROM payouts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch payout")?;
        row.as_ref().map(Self::row_to_payout).transpose()
    }

    /// Persist a payout's lifecycle transition (status + timestamps +
    /// failure reason).
    pub async fn update_payout_transition_in(conn: &mut SqliteConnection, payout: &Payout) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payouts
            SET status = ?, failure_reason = ?, processed_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(payout.status.as_str())
        .bind(&payout.failure_reason)
        .bind(payout.processed_at.map(|d| d.to_rfc3339()))
        .bind(payout.completed_at.map(|d| d.to_rfc3339()))
        .bind(payout.id.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to update payout")?;
        Ok(())
    }

    pub async fn list_payouts_by_wallet(&self, wallet_id: WalletId) -> Result<Vec<Payout>> {
        let rows = sqlx::query("SELECT * FROM payouts WHERE wallet_id = ? ORDER BY requested_at")
            .bind(wallet_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list payouts by wallet")?;
        rows.iter().map(Self::row_to_payout).collect()
    }

    pub async fn list_payouts_by_batch(&self, batch_id: &str) -> Result<Vec<Payout>> {
        let rows = sqlx::query("SELECT * FROM payouts WHERE batch_id = ? ORDER BY requested_at")
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list payouts by batch")?;
        rows.iter().map(Self::row_to_payout).collect()
    }

    // ========================
    // FX rate operations
    // ========================

    /// Deactivate any active rate for the pair and insert the new one as
    /// active, in a single transaction.
    pub async fn activate_rate(&self, rate: &FxRate) -> Result<()> {
        let mut tx = self.begin().await?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE fx_rates SET is_active = 0, effective_to = ?
            WHERE from_currency = ? AND to_currency = ? AND is_active = 1
            "#,
        )
        .bind(&now)
        .bind(&rate.from_currency)
        .bind(&rate.to_currency)
        .execute(&mut *tx)
        .await
        .context("Failed to deactivate previous rates")?;

        sqlx::query(
            r#"
            INSERT INTO fx_rates (id, from_currency, to_currency, rate, inverse_rate, buy_rate,
                sell_rate, source, effective_from, effective_to, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(rate.id.to_string())
        .bind(&rate.from_currency)
        .bind(&rate.to_currency)
        .bind(rate.rate.to_string())
        .bind(rate.inverse_rate.to_string())
        .bind(rate.buy_rate.map(|d| d.to_string()))
        .bind(rate.sell_rate.map(|d| d.to_string()))
        .bind(&rate.source)
        .bind(rate.effective_from.to_rfc3339())
        .bind(rate.effective_to.map(|d| d.to_rfc3339()))
        .bind(rate.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to insert rate")?;

        tx.commit().await.context("Failed to commit rate activation")?;
        Ok(())
    }

    pub async fn get_active_rate(&self, from: &str, to: &str) -> Result<Option<FxRate>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM fx_rates
            WHERE from_currency = ? AND to_currency = ? AND is_active = 1
            ORDER BY effective_from DESC LIMIT 1
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch active rate")?;
        row.as_ref().map(Self::row_to_fx_rate).transpose()
    }

    /// Most recent rate applicable at a point in time.
    pub async fn get_rate_at(&self, from: &str, to: &str, at: DateTime<Utc>) -> Result<Option<FxRate>> {
        let at_str = at.to_rfc3339();
        let row = sqlx::query(
            r#"
            SELECT * FROM fx_rates
            WHERE from_currency = ? AND to_currency = ?
              AND effective_from <= ?
              AND (effective_to IS NULL OR effective_to > ?)
            ORDER BY effective_from DESC LIMIT 1
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(&at_str)
        .bind(&at_str)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch rate at date")?;
        row.as_ref().map(Self::row_to_fx_rate).transpose()
    }

    // ========================
    // Audit log operations
    // ========================

    pub async fn insert_audit_log_in(conn: &mut SqliteConnection, log: &AuditLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO financial_audit_logs (id, sequence, action, category, actor, target_id,
                before_state, after_state, log_hash, previous_log_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.id.to_string())
        .bind(log.sequence)
        .bind(&log.action)
        .bind(log.category.as_str())
        .bind(&log.actor)
        .bind(&log.target_id)
        .bind(log.before.as_ref().map(|v| v.to_string()))
        .bind(log.after.as_ref().map(|v| v.to_string()))
        .bind(&log.log_hash)
        .bind(&log.previous_log_hash)
        .bind(log.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to insert audit log")?;
        Ok(())
    }

    pub async fn list_audit_logs(
        &self,
        category: Option<AuditCategory>,
        limit: Option<usize>,
    ) -> Result<Vec<AuditLog>> {
        let mut query = String::from("SELECT * FROM financial_audit_logs");
        if category.is_some() {
            query.push_str(" WHERE category = ?");
        }
        query.push_str(" ORDER BY sequence");
        if let Some(lim) = limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query);
        if let Some(cat) = category {
            sql_query = sql_query.bind(cat.as_str());
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list audit logs")?;
        rows.iter().map(Self::row_to_audit_log).collect()
    }

    // ========================
    // Reconciliation records
    // ========================

    pub async fn save_reconciliation(&self, record: &ReconciliationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_records (id, period_type, period_start, period_end,
                settlement_count, gross_total, owner_total, dellala_total, corporate_total,
                vat_total, withholding_total, currency_volumes, ledger_debit_total,
                ledger_credit_total, discrepancies, wallet_snapshots, snapshot_hash, status, run_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.period_type.as_str())
        .bind(record.period_start.to_rfc3339())
        .bind(record.period_end.to_rfc3339())
        .bind(record.settlement_count)
        .bind(record.gross_total.to_string())
        .bind(record.owner_total.to_string())
        .bind(record.dellala_total.to_string())
        .bind(record.corporate_total.to_string())
        .bind(record.vat_total.to_string())
        .bind(record.withholding_total.to_string())
        .bind(serde_json::to_string(&record.currency_volumes)?)
        .bind(record.ledger_debit_total.to_string())
        .bind(record.ledger_credit_total.to_string())
        .bind(serde_json::to_string(&record.discrepancies)?)
        .bind(serde_json::to_string(&record.wallet_snapshots)?)
        .bind(&record.snapshot_hash)
        .bind(record.status.as_str())
        .bind(record.run_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save reconciliation record")?;
        Ok(())
    }

    pub async fn list_reconciliations(&self, limit: Option<usize>) -> Result<Vec<ReconciliationRecord>> {
        let mut query = String::from("SELECT * FROM reconciliation_records ORDER BY run_at DESC");
        if let Some(lim) = limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list reconciliation records")?;
        rows.iter().map(Self::row_to_reconciliation).collect()
    }

    // ========================
    // Job leases
    // ========================

    /// Take or steal the named lease. Succeeds when the lease is free or
    /// expired; an unexpired lease held elsewhere makes this a no-op
    /// returning false.
    pub async fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let result = sqlx::query(
            r#"
            INSERT INTO job_leases (name, holder, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
            WHERE job_leases.expires_at < ?
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to acquire job lease")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn release_lease(&self, name: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM job_leases WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await
            .context("Failed to release job lease")?;
        Ok(())
    }

    // ========================
    // Row mappers
    // ========================

    fn row_to_wallet(row: &SqliteRow) -> Result<Wallet> {
        let owner_type_str: String = row.get("owner_type");
        let status_str: String = row.get("status");
        Ok(Wallet {
            id: parse_uuid(row.get("id"))?,
            owner_id: row.get("owner_id"),
            owner_type: OwnerType::from_str(&owner_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid owner type: {}", owner_type_str))?,
            currency: row.get("currency"),
            available_balance: parse_decimal(row.get("available_balance"))?,
            frozen_balance: parse_decimal(row.get("frozen_balance"))?,
            pending_balance: parse_decimal(row.get("pending_balance"))?,
            total_earnings: parse_decimal(row.get("total_earnings"))?,
            total_withdrawals: parse_decimal(row.get("total_withdrawals"))?,
            last_balance_hash: row.get("last_balance_hash"),
            status: WalletStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid wallet status: {}", status_str))?,
            payout_method: row.get("payout_method"),
            payout_account: row.get("payout_account"),
            created_at: parse_datetime(row.get("created_at"))?,
            updated_at: parse_datetime(row.get("updated_at"))?,
        })
    }

    fn row_to_ledger_entry(row: &SqliteRow) -> Result<LedgerEntry> {
        let wallet_id_str: Option<String> = row.get("wallet_id");
        let account_type_str: String = row.get("account_type");
        let entry_type_str: String = row.get("entry_type");
        Ok(LedgerEntry {
            id: parse_uuid(row.get("id"))?,
            sequence: row.get("sequence"),
            transaction_id: row.get("transaction_id"),
            wallet_id: wallet_id_str.map(parse_uuid).transpose()?,
            account_type: AccountType::from_str(&account_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account type: {}", account_type_str))?,
            entry_type: EntryType::from_str(&entry_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid entry type: {}", entry_type_str))?,
            amount: parse_decimal(row.get("amount"))?,
            currency: row.get("currency"),
            booking_id: row.get("booking_id"),
            balance_before: parse_decimal_opt(row.get("balance_before"))?,
            balance_after: parse_decimal_opt(row.get("balance_after"))?,
            description: row.get("description"),
            entry_hash: row.get("entry_hash"),
            previous_hash: row.get("previous_hash"),
            created_at: parse_datetime(row.get("created_at"))?,
        })
    }

    fn row_to_settlement(row: &SqliteRow) -> Result<SettlementTransaction> {
        let status_str: String = row.get("status");
        Ok(SettlementTransaction {
            id: row.get("id"),
            booking_id: row.get("booking_id"),
            gross_amount: parse_decimal(row.get("gross_amount"))?,
            currency: row.get("currency"),
            owner_share: parse_decimal(row.get("owner_share"))?,
            dellala_share: parse_decimal(row.get("dellala_share"))?,
            corporate_share: parse_decimal(row.get("corporate_share"))?,
            vat_amount: parse_decimal(row.get("vat_amount"))?,
            withholding_tax: parse_decimal(row.get("withholding_tax"))?,
            fx_rate: parse_decimal_opt(row.get("fx_rate"))?,
            original_amount: parse_decimal_opt(row.get("original_amount"))?,
            original_currency: row.get("original_currency"),
            status: SettlementStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid settlement status: {}", status_str))?,
            owner_id: row.get("owner_id"),
            dellala_id: row.get("dellala_id"),
            guest_id: row.get("guest_id"),
            payment_ref: row.get("payment_ref"),
            payment_method: row.get("payment_method"),
            transaction_hash: row.get("transaction_hash"),
            created_at: parse_datetime(row.get("created_at"))?,
            updated_at: parse_datetime(row.get("updated_at"))?,
        })
    }

    fn row_to_payout(row: &SqliteRow) -> Result<Payout> {
        let recipient_type_str: String = row.get("recipient_type");
        let method_str: String = row.get("method");
        let status_str: String = row.get("status");
        let transaction_ids_json: String = row.get("transaction_ids");
        let period_start: Option<String> = row.get("period_start");
        let period_end: Option<String> = row.get("period_end");
        let processed_at: Option<String> = row.get("processed_at");
        let completed_at: Option<String> = row.get("completed_at");
        Ok(Payout {
            id: parse_uuid(row.get("id"))?,
            wallet_id: parse_uuid(row.get("wallet_id"))?,
            recipient_id: row.get("recipient_id"),
            recipient_type: OwnerType::from_str(&recipient_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid recipient type: {}", recipient_type_str))?,
            amount: parse_decimal(row.get("amount"))?,
            fee: parse_decimal(row.get("fee"))?,
            withholding_tax: parse_decimal(row.get("withholding_tax"))?,
            net_amount: parse_decimal(row.get("net_amount"))?,
            method: PayoutMethod::from_str(&method_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid payout method: {}", method_str))?,
            status: PayoutStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid payout status: {}", status_str))?,
            batch_id: row.get("batch_id"),
            period_start: period_start.map(parse_datetime).transpose()?,
            period_end: period_end.map(parse_datetime).transpose()?,
            transaction_ids: serde_json::from_str(&transaction_ids_json).unwrap_or_default(),
            failure_reason: row.get("failure_reason"),
            requested_at: parse_datetime(row.get("requested_at"))?,
            processed_at: processed_at.map(parse_datetime).transpose()?,
            completed_at: completed_at.map(parse_datetime).transpose()?,
        })
    }

    fn row_to_fx_rate(row: &SqliteRow) -> Result<FxRate> {
        let effective_to: Option<String> = row.get("effective_to");
        Ok(FxRate {
            id: parse_uuid(row.get("id"))?,
            from_currency: row.get("from_currency"),
            to_currency: row.get("to_currency"),
            rate: parse_decimal(row.get("rate"))?,
            inverse_rate: parse_decimal(row.get("inverse_rate"))?,
            buy_rate: parse_decimal_opt(row.get("buy_rate"))?,
            sell_rate: parse_decimal_opt(row.get("sell_rate"))?,
            source: row.get("source"),
            effective_from: parse_datetime(row.get("effective_from"))?,
            effective_to: effective_to.map(parse_datetime).transpose()?,
            is_active: row.get::<i32, _>("is_active") != 0,
            created_at: parse_datetime(row.get("created_at"))?,
        })
    }

    fn row_to_audit_log(row: &SqliteRow) -> Result<AuditLog> {
        let category_str: String = row.get("category");
        let before_state: Option<String> = row.get("before_state");
        let after_state: Option<String> = row.get("after_state");
        Ok(AuditLog {
            id: parse_uuid(row.get("id"))?,
            sequence: row.get("sequence"),
            action: row.get("action"),
            category: AuditCategory::from_str(&category_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid audit category: {}", category_str))?,
            actor: row.get("actor"),
            target_id: row.get("target_id"),
            before: before_state.map(|s| serde_json::from_str(&s)).transpose()?,
            after: after_state.map(|s| serde_json::from_str(&s)).transpose()?,
            log_hash: row.get("log_hash"),
            previous_log_hash: row.get("previous_log_hash"),
            created_at: parse_datetime(row.get("created_at"))?,
        })
    }

    fn row_to_reconciliation(row: &SqliteRow) -> Result<ReconciliationRecord> {
        let period_type_str: String = row.get("period_type");
        let status_str: String = row.get("status");
        let currency_volumes_json: String = row.get("currency_volumes");
        let discrepancies_json: String = row.get("discrepancies");
        let snapshots_json: String = row.get("wallet_snapshots");
        let currency_volumes: BTreeMap<String, Decimal> =
            serde_json::from_str(&currency_volumes_json).unwrap_or_default();
        Ok(ReconciliationRecord {
            id: parse_uuid(row.get("id"))?,
            period_type: PeriodType::from_str(&period_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid period type: {}", period_type_str))?,
            period_start: parse_datetime(row.get("period_start"))?,
            period_end: parse_datetime(row.get("period_end"))?,
            settlement_count: row.get("settlement_count"),
            gross_total: parse_decimal(row.get("gross_total"))?,
            owner_total: parse_decimal(row.get("owner_total"))?,
            dellala_total: parse_decimal(row.get("dellala_total"))?,
            corporate_total: parse_decimal(row.get("corporate_total"))?,
            vat_total: parse_decimal(row.get("vat_total"))?,
            withholding_total: parse_decimal(row.get("withholding_total"))?,
            currency_volumes,
            ledger_debit_total: parse_decimal(row.get("ledger_debit_total"))?,
            ledger_credit_total: parse_decimal(row.get("ledger_credit_total"))?,
            discrepancies: serde_json::from_str(&discrepancies_json).unwrap_or_default(),
            wallet_snapshots: serde_json::from_str(&snapshots_json).unwrap_or_default(),
            snapshot_hash: row.get("snapshot_hash"),
            status: ReconciliationStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid reconciliation status: {}", status_str))?,
            run_at: parse_datetime(row.get("run_at"))?,
        })
    }
}

fn parse_uuid(s: String) -> Result<Uuid> {
    Uuid::parse_str(&s).context("Invalid UUID")
}

fn parse_decimal(s: String) -> Result<Decimal> {
    Decimal::from_str(&s).with_context(|| format!("Invalid decimal: {}", s))
}

fn parse_decimal_opt(s: Option<String>) -> Result<Option<Decimal>> {
    s.map(parse_decimal).transpose()
}

fn parse_datetime(s: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&s)
        .context("Invalid timestamp")?
        .with_timezone(&Utc))
}
