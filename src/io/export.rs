use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::SettlementCore;
use crate::domain::{
    format_amount, AuditCategory, AuditLog, LedgerEntry, ReconciliationRecord,
    SettlementTransaction,
};

/// Compliance snapshot for regulator-facing export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub settlements: Vec<SettlementTransaction>,
    pub ledger_entries: Vec<LedgerEntry>,
    pub audit_logs: Vec<AuditLog>,
    pub reconciliations: Vec<ReconciliationRecord>,
}

/// Exporter for converting settlement data to various formats
pub struct Exporter<'a> {
    core: &'a SettlementCore,
}

impl<'a> Exporter<'a> {
    pub fn new(core: &'a SettlementCore) -> Self {
        Self { core }
    }

    /// Export settlements in a window to CSV format
    pub async fn export_settlements_csv<W: Write>(
        &self,
        writer: W,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize> {
        let settlements = self
            .core
            .repository()
            .list_settlements_in_window(start, end)
            .await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "booking_id",
            "gross_amount",
            "currency",
            "owner_share",
            "dellala_share",
            "corporate_share",
            "vat_amount",
            "withholding_tax",
            "original_amount",
            "original_currency",
            "fx_rate",
            "status",
            "owner_id",
            "dellala_id",
            "guest_id",
            "payment_method",
            "created_at",
        ])?;

        let mut count = 0;
        for txn in &settlements {
            csv_writer.write_record([
                txn.id.clone(),
                txn.booking_id.clone(),
                format_amount(txn.gross_amount),
                txn.currency.clone(),
                format_amount(txn.owner_share),
                format_amount(txn.dellala_share),
                format_amount(txn.corporate_share),
                format_amount(txn.vat_amount),
                format_amount(txn.withholding_tax),
                txn.original_amount.map(format_amount).unwrap_or_default(),
                txn.original_currency.clone().unwrap_or_default(),
                txn.fx_rate.map(|r| r.to_string()).unwrap_or_default(),
                txn.status.as_str().to_string(),
                txn.owner_id.clone(),
                txn.dellala_id.clone().unwrap_or_default(),
                txn.guest_id.clone(),
                txn.payment_method.clone(),
                txn.created_at.to_rfc3339(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export wallet balances to CSV format
    pub async fn export_wallet_balances_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let wallets = self.core.wallets.list().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "wallet_id",
            "owner_id",
            "owner_type",
            "currency",
            "available",
            "frozen",
            "pending",
            "total_earnings",
            "total_withdrawals",
            "status",
        ])?;

        let mut count = 0;
        for wallet in &wallets {
            csv_writer.write_record([
                wallet.id.to_string(),
                wallet.owner_id.clone(),
                wallet.owner_type.as_str().to_string(),
                wallet.currency.clone(),
                format_amount(wallet.available_balance),
                format_amount(wallet.frozen_balance),
                format_amount(wallet.pending_balance),
                format_amount(wallet.total_earnings),
                format_amount(wallet.total_withdrawals),
                wallet.status.as_str().to_string(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export audit logs to CSV format
    pub async fn export_audit_csv<W: Write>(
        &self,
        writer: W,
        category: Option<AuditCategory>,
        limit: Option<usize>,
    ) -> Result<usize> {
        let logs = self.core.audit.list(category, limit).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "sequence",
            "action",
            "category",
            "actor",
            "target_id",
            "log_hash",
            "previous_log_hash",
            "created_at",
        ])?;

        let mut count = 0;
        for log in &logs {
            csv_writer.write_record([
                log.sequence.to_string(),
                log.action.clone(),
                log.category.as_str().to_string(),
                log.actor.clone(),
                log.target_id.clone(),
                log.log_hash.clone(),
                log.previous_log_hash.clone(),
                log.created_at.to_rfc3339(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export a full compliance snapshot as JSON
    pub async fn export_compliance_json<W: Write>(
        &self,
        mut writer: W,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ComplianceSnapshot> {
        let settlements = self
            .core
            .repository()
            .list_settlements_in_window(start, end)
            .await?;
        let ledger_entries = self.core.ledger.entries_in_window(start, end).await?;
        let audit_logs = self.core.audit.list(None, None).await?;
        let reconciliations = self.core.reconciliation.list(None).await?;

        let snapshot = ComplianceSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            period_start: start,
            period_end: end,
            settlements,
            ledger_entries,
            audit_logs,
            reconciliations,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
