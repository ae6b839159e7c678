use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{OwnerType, WalletId};

pub type PayoutId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    BankTransfer,
    Telebirr,
    Cash,
}

impl PayoutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutMethod::BankTransfer => "bank_transfer",
            PayoutMethod::Telebirr => "telebirr",
            PayoutMethod::Cash => "cash",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bank_transfer" => Some(PayoutMethod::BankTransfer),
            "telebirr" => Some(PayoutMethod::Telebirr),
            "cash" => Some(PayoutMethod::Cash),
            _ => None,
        }
    }

    /// Flat fee charged by the rail: 25.00 for bank transfers, 5.00 for
    /// everything else.
    pub fn fee(&self) -> Decimal {
        match self {
            PayoutMethod::BankTransfer => Decimal::new(2500, 2),
            _ => Decimal::new(500, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(PayoutStatus::Pending),
            "processing" => Some(PayoutStatus::Processing),
            "completed" => Some(PayoutStatus::Completed),
            "failed" => Some(PayoutStatus::Failed),
            _ => None,
        }
    }

    /// Lifecycle: pending -> processing -> completed | failed.
    /// Completed is terminal; failed can also be reached straight from
    /// pending when the rail rejects up front.
    pub fn can_transition_to(&self, next: PayoutStatus) -> bool {
        matches!(
            (self, next),
            (PayoutStatus::Pending, PayoutStatus::Processing)
                | (PayoutStatus::Pending, PayoutStatus::Failed)
                | (PayoutStatus::Processing, PayoutStatus::Completed)
                | (PayoutStatus::Processing, PayoutStatus::Failed)
        )
    }
}

impl std::fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An inert "payout requested" record. The wallet is debited the moment the
/// payout is created (funds reserved ahead of rail confirmation); a failed
/// payout is compensated by crediting the amount back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: PayoutId,
    pub wallet_id: WalletId,
    pub recipient_id: String,
    pub recipient_type: OwnerType,
    /// Gross amount debited from the wallet
    pub amount: Decimal,
    pub fee: Decimal,
    pub withholding_tax: Decimal,
    /// amount - fee - withholding_tax; what the rail pays out
    pub net_amount: Decimal,
    pub method: PayoutMethod,
    pub status: PayoutStatus,
    /// Groups the payouts of one weekly Dellala sweep
    pub batch_id: Option<String>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    /// Settlement transactions covered by this payout
    pub transaction_ids: Vec<String>,
    pub failure_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payout {
    pub fn new_batch_id() -> String {
        format!("BATCH-{}", Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fees() {
        assert_eq!(PayoutMethod::BankTransfer.fee(), Decimal::new(2500, 2));
        assert_eq!(PayoutMethod::Telebirr.fee(), Decimal::new(500, 2));
        assert_eq!(PayoutMethod::Cash.fee(), Decimal::new(500, 2));
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(PayoutStatus::Pending.can_transition_to(PayoutStatus::Processing));
        assert!(PayoutStatus::Processing.can_transition_to(PayoutStatus::Completed));
        assert!(PayoutStatus::Processing.can_transition_to(PayoutStatus::Failed));
        assert!(PayoutStatus::Pending.can_transition_to(PayoutStatus::Failed));
        // Completed is terminal
        assert!(!PayoutStatus::Completed.can_transition_to(PayoutStatus::Processing));
        assert!(!PayoutStatus::Completed.can_transition_to(PayoutStatus::Failed));
        assert!(!PayoutStatus::Failed.can_transition_to(PayoutStatus::Completed));
        assert!(!PayoutStatus::Pending.can_transition_to(PayoutStatus::Completed));
    }

    #[test]
    fn test_method_roundtrip() {
        for m in [PayoutMethod::BankTransfer, PayoutMethod::Telebirr, PayoutMethod::Cash] {
            assert_eq!(PayoutMethod::from_str(m.as_str()), Some(m));
        }
    }
}
