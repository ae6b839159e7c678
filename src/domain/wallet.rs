use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{format_amount, sha256_hex};

pub type WalletId = Uuid;

/// Sentinel owner id for the platform's own wallet.
pub const CORPORATE_OWNER_ID: &str = "corporate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    /// Property owner (host) earning booking income
    Owner,
    /// Referring agent earning time-limited commission
    Dellala,
    /// The platform itself
    Corporate,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::Owner => "owner",
            OwnerType::Dellala => "dellala",
            OwnerType::Corporate => "corporate",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "owner" => Some(OwnerType::Owner),
            "dellala" => Some(OwnerType::Dellala),
            "corporate" => Some(OwnerType::Corporate),
            _ => None,
        }
    }
}

impl std::fmt::Display for OwnerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Administrative wallet lock, independent of the balance buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Frozen,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Frozen => "frozen",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(WalletStatus::Active),
            "frozen" => Some(WalletStatus::Frozen),
            _ => None,
        }
    }
}

/// Which balance bucket a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceBucket {
    /// Spendable; payouts draw from here
    Available,
    /// Settled but held until the booking's checkout completes
    Frozen,
    /// Expected but not yet settled
    Pending,
}

impl BalanceBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceBucket::Available => "available",
            BalanceBucket::Frozen => "frozen",
            BalanceBucket::Pending => "pending",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "available" => Some(BalanceBucket::Available),
            "frozen" => Some(BalanceBucket::Frozen),
            "pending" => Some(BalanceBucket::Pending),
            _ => None,
        }
    }
}

impl std::fmt::Display for BalanceBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-owner balance state. Exactly one wallet exists per (owner, currency).
///
/// All balance buckets stay non-negative; `last_balance_hash` is a SHA-256
/// fingerprint over the balances and the mutation timestamp, recomputed on
/// every mutation and checked by integrity sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub owner_id: String,
    pub owner_type: OwnerType,
    pub currency: String,
    pub available_balance: Decimal,
    pub frozen_balance: Decimal,
    pub pending_balance: Decimal,
    pub total_earnings: Decimal,
    pub total_withdrawals: Decimal,
    pub last_balance_hash: String,
    pub status: WalletStatus,
    /// Payout rail details (bank account, Telebirr number, ...)
    pub payout_method: Option<String>,
    pub payout_account: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(owner_id: impl Into<String>, owner_type: OwnerType, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut wallet = Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            owner_type,
            currency: currency.into(),
            available_balance: Decimal::ZERO,
            frozen_balance: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            total_withdrawals: Decimal::ZERO,
            last_balance_hash: String::new(),
            status: WalletStatus::Active,
            payout_method: None,
            payout_account: None,
            created_at: now,
            updated_at: now,
        };
        wallet.last_balance_hash = wallet.compute_balance_hash();
        wallet
    }

    pub fn balance(&self, bucket: BalanceBucket) -> Decimal {
        match bucket {
            BalanceBucket::Available => self.available_balance,
            BalanceBucket::Frozen => self.frozen_balance,
            BalanceBucket::Pending => self.pending_balance,
        }
    }

    pub fn balance_mut(&mut self, bucket: BalanceBucket) -> &mut Decimal {
        match bucket {
            BalanceBucket::Available => &mut self.available_balance,
            BalanceBucket::Frozen => &mut self.frozen_balance,
            BalanceBucket::Pending => &mut self.pending_balance,
        }
    }

    /// Sum of all balance buckets.
    pub fn total_balance(&self) -> Decimal {
        self.available_balance + self.frozen_balance + self.pending_balance
    }

    /// Whether the administrative lock is engaged.
    pub fn is_locked(&self) -> bool {
        self.status == WalletStatus::Frozen
    }

    /// Fingerprint over all balances and the last mutation timestamp.
    pub fn compute_balance_hash(&self) -> String {
        sha256_hex(&[
            &self.id.to_string(),
            &format_amount(self.available_balance),
            &format_amount(self.frozen_balance),
            &format_amount(self.pending_balance),
            &format_amount(self.total_earnings),
            &format_amount(self.total_withdrawals),
            &self.updated_at.to_rfc3339(),
        ])
    }

    /// Stamp a mutation: advance `updated_at` and recompute the fingerprint.
    pub fn refresh_hash(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
        self.last_balance_hash = self.compute_balance_hash();
    }

    /// Recompute the fingerprint from current state and compare it to the
    /// stored one.
    pub fn verify_balance_hash(&self) -> bool {
        self.compute_balance_hash() == self.last_balance_hash
    }
}
