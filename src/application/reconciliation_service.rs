use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    check_split, format_amount, tolerance, AuditCategory, AuditDraft, Discrepancy, DiscrepancyKind,
    PeriodType, ReconciliationRecord, ReconciliationStatus, WalletBalanceSnapshot,
};
use crate::storage::Repository;

use super::{AppError, AuditLogService, LedgerService};

const RECONCILIATION_LEASE: &str = "reconciliation";

fn lease_ttl() -> Duration {
    Duration::minutes(10)
}

/// Periodic consistency sweep over a settlement window. Verifies every
/// settlement's split, every wallet's balance hash, and the in-window ledger
/// balance, and persists a hashed report. Findings are reported for operator
/// action, never auto-corrected.
pub struct ReconciliationService {
    repo: Repository,
    ledger: LedgerService,
    audit: AuditLogService,
}

impl ReconciliationService {
    pub fn new(repo: Repository) -> Self {
        let ledger = LedgerService::new(repo.clone());
        let audit = AuditLogService::new(repo.clone());
        Self { repo, ledger, audit }
    }

    /// Run one sweep over [start, end). Guarded by a lease so overlapping
    /// runs are rejected with `AlreadyRunning`.
    pub async fn run(
        &self,
        period_type: PeriodType,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        actor: &str,
    ) -> Result<ReconciliationRecord, AppError> {
        let holder = Uuid::new_v4().to_string();
        if !self
            .repo
            .try_acquire_lease(RECONCILIATION_LEASE, &holder, lease_ttl())
            .await?
        {
            return Err(AppError::AlreadyRunning(RECONCILIATION_LEASE.into()));
        }

        let result = self.sweep(period_type, period_start, period_end, actor).await;
        self.repo.release_lease(RECONCILIATION_LEASE, &holder).await?;
        result
    }

    async fn sweep(
        &self,
        period_type: PeriodType,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        actor: &str,
    ) -> Result<ReconciliationRecord, AppError> {
        let settlements = self
            .repo
            .list_settlements_in_window(period_start, period_end)
            .await?;
        let mut discrepancies: Vec<Discrepancy> = Vec::new();

        let mut gross_total = Decimal::ZERO;
        let mut owner_total = Decimal::ZERO;
        let mut dellala_total = Decimal::ZERO;
        let mut corporate_total = Decimal::ZERO;
        let mut vat_total = Decimal::ZERO;
        let mut withholding_total = Decimal::ZERO;
        let mut currency_volumes: BTreeMap<String, Decimal> = BTreeMap::new();

        for txn in &settlements {
            gross_total += txn.gross_amount;
            owner_total += txn.owner_share;
            dellala_total += txn.dellala_share;
            corporate_total += txn.corporate_share;
            vat_total += txn.vat_amount;
            withholding_total += txn.withholding_tax;

            // Volume is tracked in the guest's original payment currency.
            let currency = txn.original_currency.clone().unwrap_or_else(|| txn.currency.clone());
            let volume = txn.original_amount.unwrap_or(txn.gross_amount);
            *currency_volumes.entry(currency).or_insert(Decimal::ZERO) += volume;

            if let Some(discrepancy) = check_split(txn) {
                discrepancies.push(discrepancy);
            }
        }

        let wallets = self.repo.list_wallets().await?;
        let mut wallet_snapshots = Vec::with_capacity(wallets.len());
        for wallet in &wallets {
            let snapshot = WalletBalanceSnapshot::of(wallet);
            if !snapshot.hash_valid {
                discrepancies.push(Discrepancy {
                    kind: DiscrepancyKind::WalletIntegrity,
                    target_id: wallet.id.to_string(),
                    detail: "stored balance hash does not match wallet state".into(),
                    amount: None,
                });
            }
            wallet_snapshots.push(snapshot);
        }

        let (ledger_debit_total, ledger_credit_total) =
            self.ledger.window_totals(period_start, period_end).await?;
        let imbalance = (ledger_debit_total - ledger_credit_total).abs();
        if imbalance > tolerance() {
            discrepancies.push(Discrepancy {
                kind: DiscrepancyKind::LedgerImbalance,
                target_id: "ledger".into(),
                detail: format!(
                    "debits {} vs credits {}",
                    format_amount(ledger_debit_total),
                    format_amount(ledger_credit_total)
                ),
                amount: Some(imbalance),
            });
        }

        let status = if discrepancies.is_empty() {
            ReconciliationStatus::Completed
        } else {
            ReconciliationStatus::DiscrepancyFound
        };

        let mut record = ReconciliationRecord {
            id: Uuid::new_v4(),
            period_type,
            period_start,
            period_end,
            settlement_count: settlements.len() as i64,
            gross_total,
            owner_total,
            dellala_total,
            corporate_total,
            vat_total,
            withholding_total,
            currency_volumes,
            ledger_debit_total,
            ledger_credit_total,
            discrepancies,
            wallet_snapshots,
            snapshot_hash: String::new(),
            status,
            run_at: Utc::now(),
        };
        record.snapshot_hash = record.compute_snapshot_hash();
        self.repo.save_reconciliation(&record).await?;

        let draft = AuditDraft::new(
            "reconciliation_run",
            AuditCategory::Reconciliation,
            actor,
            record.id.to_string(),
        )
        .with_after(json!({
            "period_type": record.period_type.as_str(),
            "settlement_count": record.settlement_count,
            "gross_total": record.gross_total,
            "discrepancies": record.discrepancies.len(),
            "status": record.status.as_str(),
        }));
        self.audit.record(draft).await?;

        if record.discrepancies.is_empty() {
            info!(
                record_id = %record.id,
                settlements = record.settlement_count,
                "reconciliation completed clean"
            );
        } else {
            warn!(
                record_id = %record.id,
                discrepancies = record.discrepancies.len(),
                "reconciliation found discrepancies"
            );
        }
        Ok(record)
    }

    /// Window-independent integrity sweep over every wallet. Mismatches are
    /// reported, never corrected.
    pub async fn verify_all_wallets(&self, actor: &str) -> Result<Vec<WalletBalanceSnapshot>, AppError> {
        let wallets = self.repo.list_wallets().await?;
        let mut snapshots = Vec::with_capacity(wallets.len());
        let mut mismatches = 0usize;
        for wallet in &wallets {
            let snapshot = WalletBalanceSnapshot::of(wallet);
            if !snapshot.hash_valid {
                mismatches += 1;
                warn!(wallet_id = %wallet.id, "wallet balance hash mismatch");
            }
            snapshots.push(snapshot);
        }

        let draft = AuditDraft::new(
            "wallet_integrity_sweep",
            AuditCategory::Integrity,
            actor,
            "all_wallets",
        )
        .with_after(json!({
            "wallets_checked": snapshots.len(),
            "mismatches": mismatches,
        }));
        self.audit.record(draft).await?;
        Ok(snapshots)
    }

    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<ReconciliationRecord>, AppError> {
        Ok(self.repo.list_reconciliations(limit).await?)
    }
}
