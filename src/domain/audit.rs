use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{sha256_hex, CHAIN_GENESIS};

pub type AuditLogId = Uuid;

/// Which subsystem produced an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    Wallet,
    Ledger,
    Settlement,
    Payout,
    Fx,
    Reconciliation,
    Integrity,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Wallet => "wallet",
            AuditCategory::Ledger => "ledger",
            AuditCategory::Settlement => "settlement",
            AuditCategory::Payout => "payout",
            AuditCategory::Fx => "fx",
            AuditCategory::Reconciliation => "reconciliation",
            AuditCategory::Integrity => "integrity",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "wallet" => Some(AuditCategory::Wallet),
            "ledger" => Some(AuditCategory::Ledger),
            "settlement" => Some(AuditCategory::Settlement),
            "payout" => Some(AuditCategory::Payout),
            "fx" => Some(AuditCategory::Fx),
            "reconciliation" => Some(AuditCategory::Reconciliation),
            "integrity" => Some(AuditCategory::Integrity),
            _ => None,
        }
    }
}

/// One row of the global append-only compliance log. Every mutating call
/// across the settlement core writes at least one. The chain is global and
/// single, distinct from the ledger's per-wallet chains; business logic only
/// writes here, the compliance export is the only reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: AuditLogId,
    pub sequence: i64,
    /// What happened, e.g. "wallet_credit", "payout_failed"
    pub action: String,
    pub category: AuditCategory,
    /// Who did it: a user id, "system", or a job name
    pub actor: String,
    /// The entity acted on (wallet id, payout id, transaction id, ...)
    pub target_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub log_hash: String,
    pub previous_log_hash: String,
    pub created_at: DateTime<Utc>,
}

/// An audit row before it is chained and persisted.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub action: String,
    pub category: AuditCategory,
    pub actor: String,
    pub target_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

impl AuditDraft {
    pub fn new(
        action: impl Into<String>,
        category: AuditCategory,
        actor: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            category,
            actor: actor.into(),
            target_id: target_id.into(),
            before: None,
            after: None,
        }
    }

    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: serde_json::Value) -> Self {
        self.after = Some(after);
        self
    }

    pub fn seal(self, sequence: i64, previous_log_hash: String, created_at: DateTime<Utc>) -> AuditLog {
        let mut log = AuditLog {
            id: Uuid::new_v4(),
            sequence,
            action: self.action,
            category: self.category,
            actor: self.actor,
            target_id: self.target_id,
            before: self.before,
            after: self.after,
            log_hash: String::new(),
            previous_log_hash,
            created_at,
        };
        log.log_hash = log.compute_hash();
        log
    }
}

impl AuditLog {
    pub fn compute_hash(&self) -> String {
        sha256_hex(&[
            &self.id.to_string(),
            &self.action,
            self.category.as_str(),
            &self.actor,
            &self.target_id,
            &self.before.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            &self.after.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            &self.created_at.to_rfc3339(),
            &self.previous_log_hash,
        ])
    }
}

/// Walk the global audit chain in order; returns the index of the first bad
/// row, if any.
pub fn verify_audit_chain(logs: &[AuditLog]) -> Option<usize> {
    let mut previous = CHAIN_GENESIS.to_string();
    for (index, log) in logs.iter().enumerate() {
        if log.previous_log_hash != previous || log.compute_hash() != log.log_hash {
            return Some(index);
        }
        previous = log.log_hash.clone();
    }
    None
}
