use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{format_amount, sha256_hex, CommissionSplit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    /// Settled but owner/dellala shares held until checkout
    Frozen,
    /// Shares credited to available immediately
    Settled,
    /// Previously frozen shares released at checkout
    Unfrozen,
    /// Terminal: all shares clawed back
    Refunded,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Frozen => "frozen",
            SettlementStatus::Settled => "settled",
            SettlementStatus::Unfrozen => "unfrozen",
            SettlementStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "frozen" => Some(SettlementStatus::Frozen),
            "settled" => Some(SettlementStatus::Settled),
            "unfrozen" => Some(SettlementStatus::Unfrozen),
            "refunded" => Some(SettlementStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The durable record of one booking payment's split. Exactly one exists
/// per booking. Shares are recorded at settlement time and reused verbatim
/// by unfreeze and refund, so later rate changes never shift old money.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementTransaction {
    pub id: String,
    pub booking_id: String,
    /// Gross in settlement currency (ETB)
    pub gross_amount: Decimal,
    pub currency: String,
    pub owner_share: Decimal,
    pub dellala_share: Decimal,
    pub corporate_share: Decimal,
    pub vat_amount: Decimal,
    pub withholding_tax: Decimal,
    /// Present when the guest paid in a non-ETB currency
    pub fx_rate: Option<Decimal>,
    pub original_amount: Option<Decimal>,
    pub original_currency: Option<String>,
    pub status: SettlementStatus,
    pub owner_id: String,
    pub dellala_id: Option<String>,
    pub guest_id: String,
    pub payment_ref: String,
    pub payment_method: String,
    pub transaction_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementTransaction {
    pub fn new_id() -> String {
        format!("TXN-{}", Uuid::new_v4())
    }

    /// Deterministic hash over the settlement inputs. Two settlements of the
    /// same booking with the same figures produce the same hash.
    pub fn compute_transaction_hash(
        booking_id: &str,
        payment_ref: &str,
        gross_amount: Decimal,
        currency: &str,
        owner_id: &str,
        dellala_id: Option<&str>,
        guest_id: &str,
        split: &CommissionSplit,
    ) -> String {
        sha256_hex(&[
            booking_id,
            payment_ref,
            &format_amount(gross_amount),
            currency,
            owner_id,
            dellala_id.unwrap_or(""),
            guest_id,
            &format_amount(split.owner_share),
            &format_amount(split.dellala_share),
            &format_amount(split.corporate_share),
        ])
    }

    /// Refund is allowed from any non-terminal state; only a second refund
    /// is rejected.
    pub fn is_refundable(&self) -> bool {
        self.status != SettlementStatus::Refunded
    }
}
