use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{format_amount, sha256_hex, SettlementTransaction, Wallet, WalletId};

pub type ReconciliationId = Uuid;

/// Tolerance for monetary comparisons: one cent.
pub fn tolerance() -> Decimal {
    Decimal::new(1, 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Daily,
    Weekly,
    Adhoc,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Daily => "daily",
            PeriodType::Weekly => "weekly",
            PeriodType::Adhoc => "adhoc",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "daily" => Some(PeriodType::Daily),
            "weekly" => Some(PeriodType::Weekly),
            "adhoc" => Some(PeriodType::Adhoc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Shares of a settlement do not sum to its gross
    SplitMismatch,
    /// A wallet's stored balance hash no longer matches its state
    WalletIntegrity,
    /// In-window ledger debits and credits do not balance
    LedgerImbalance,
}

impl DiscrepancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyKind::SplitMismatch => "split_mismatch",
            DiscrepancyKind::WalletIntegrity => "wallet_integrity",
            DiscrepancyKind::LedgerImbalance => "ledger_imbalance",
        }
    }
}

/// One finding of a reconciliation sweep. Reported for operator action,
/// never auto-corrected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    /// Offending transaction id, wallet id, or "ledger"
    pub target_id: String,
    pub detail: String,
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Completed,
    DiscrepancyFound,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Completed => "completed",
            ReconciliationStatus::DiscrepancyFound => "discrepancy_found",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "completed" => Some(ReconciliationStatus::Completed),
            "discrepancy_found" => Some(ReconciliationStatus::DiscrepancyFound),
            _ => None,
        }
    }
}

/// Point-in-time view of one wallet taken during a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalanceSnapshot {
    pub wallet_id: WalletId,
    pub owner_id: String,
    pub currency: String,
    pub available_balance: Decimal,
    pub frozen_balance: Decimal,
    pub pending_balance: Decimal,
    pub hash_valid: bool,
}

impl WalletBalanceSnapshot {
    pub fn of(wallet: &Wallet) -> Self {
        Self {
            wallet_id: wallet.id,
            owner_id: wallet.owner_id.clone(),
            currency: wallet.currency.clone(),
            available_balance: wallet.available_balance,
            frozen_balance: wallet.frozen_balance,
            pending_balance: wallet.pending_balance,
            hash_valid: wallet.verify_balance_hash(),
        }
    }
}

/// Durable report of one reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub id: ReconciliationId,
    pub period_type: PeriodType,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub settlement_count: i64,
    pub gross_total: Decimal,
    pub owner_total: Decimal,
    pub dellala_total: Decimal,
    pub corporate_total: Decimal,
    pub vat_total: Decimal,
    pub withholding_total: Decimal,
    /// Settled volume per original payment currency
    pub currency_volumes: BTreeMap<String, Decimal>,
    pub ledger_debit_total: Decimal,
    pub ledger_credit_total: Decimal,
    pub discrepancies: Vec<Discrepancy>,
    pub wallet_snapshots: Vec<WalletBalanceSnapshot>,
    pub snapshot_hash: String,
    pub status: ReconciliationStatus,
    pub run_at: DateTime<Utc>,
}

impl ReconciliationRecord {
    /// Hash over the whole report so a stored record can be shown untampered.
    pub fn compute_snapshot_hash(&self) -> String {
        let mut parts: Vec<String> = vec![
            self.id.to_string(),
            self.period_type.as_str().to_string(),
            self.period_start.to_rfc3339(),
            self.period_end.to_rfc3339(),
            self.settlement_count.to_string(),
            format_amount(self.gross_total),
            format_amount(self.owner_total),
            format_amount(self.dellala_total),
            format_amount(self.corporate_total),
            format_amount(self.ledger_debit_total),
            format_amount(self.ledger_credit_total),
            self.discrepancies.len().to_string(),
        ];
        for snapshot in &self.wallet_snapshots {
            parts.push(format!(
                "{}:{}:{}:{}",
                snapshot.wallet_id,
                format_amount(snapshot.available_balance),
                format_amount(snapshot.frozen_balance),
                snapshot.hash_valid,
            ));
        }
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        sha256_hex(&refs)
    }
}

/// Check one settlement's shares against its gross (±0.01).
pub fn check_split(txn: &SettlementTransaction) -> Option<Discrepancy> {
    let sum = txn.owner_share + txn.dellala_share + txn.corporate_share;
    let delta = (sum - txn.gross_amount).abs();
    if delta > tolerance() {
        Some(Discrepancy {
            kind: DiscrepancyKind::SplitMismatch,
            target_id: txn.id.clone(),
            detail: format!(
                "shares sum to {} but gross is {}",
                format_amount(sum),
                format_amount(txn.gross_amount)
            ),
            amount: Some(delta),
        })
    } else {
        None
    }
}
