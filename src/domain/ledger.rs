use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{format_amount, sha256_hex, WalletId, CHAIN_GENESIS};

pub type EntryId = Uuid;

/// Account a ledger row posts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Money received from the guest (non-wallet account)
    GuestPayment,
    OwnerEarning,
    DellalaCommission,
    CorporateFee,
    /// Informational tax posting, excluded from the balance invariant
    Vat,
    /// Informational tax posting, excluded from the balance invariant
    WithholdingTax,
    /// Funds leaving a wallet toward an external rail
    PayoutRequest,
    /// Compensating posting when money is returned
    Refund,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::GuestPayment => "guest_payment",
            AccountType::OwnerEarning => "owner_earning",
            AccountType::DellalaCommission => "dellala_commission",
            AccountType::CorporateFee => "corporate_fee",
            AccountType::Vat => "vat",
            AccountType::WithholdingTax => "withholding_tax",
            AccountType::PayoutRequest => "payout_request",
            AccountType::Refund => "refund",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "guest_payment" => Some(AccountType::GuestPayment),
            "owner_earning" => Some(AccountType::OwnerEarning),
            "dellala_commission" => Some(AccountType::DellalaCommission),
            "corporate_fee" => Some(AccountType::CorporateFee),
            "vat" => Some(AccountType::Vat),
            "withholding_tax" => Some(AccountType::WithholdingTax),
            "payout_request" => Some(AccountType::PayoutRequest),
            "refund" => Some(AccountType::Refund),
            _ => None,
        }
    }

    /// Tax postings are recorded for reporting only; no money moves, so the
    /// reconciliation debit/credit sums skip them.
    pub fn is_informational(&self) -> bool {
        matches!(self, AccountType::Vat | AccountType::WithholdingTax)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "debit",
            EntryType::Credit => "credit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debit" => Some(EntryType::Debit),
            "credit" => Some(EntryType::Credit),
            _ => None,
        }
    }
}

/// One immutable row of the double-entry ledger.
///
/// Rows carrying a wallet id chain per wallet; rows without one (vat,
/// guest_payment, ...) chain among themselves globally. `entry_hash` covers
/// the row's fields plus `previous_hash`, so rewriting history breaks the
/// chain at the tampered row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    /// Monotonically increasing sequence number for ordering
    pub sequence: i64,
    /// Groups the rows of one logical transaction
    pub transaction_id: String,
    pub wallet_id: Option<WalletId>,
    pub account_type: AccountType,
    pub entry_type: EntryType,
    /// Always positive
    pub amount: Decimal,
    pub currency: String,
    pub booking_id: Option<String>,
    /// Wallet total balance before this posting (wallet rows only)
    pub balance_before: Option<Decimal>,
    pub balance_after: Option<Decimal>,
    pub description: Option<String>,
    pub entry_hash: String,
    pub previous_hash: String,
    pub created_at: DateTime<Utc>,
}

/// The fields of a ledger row before it is chained and persisted.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub transaction_id: String,
    pub wallet_id: Option<WalletId>,
    pub account_type: AccountType,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub currency: String,
    pub booking_id: Option<String>,
    pub balance_before: Option<Decimal>,
    pub balance_after: Option<Decimal>,
    pub description: Option<String>,
}

impl EntryDraft {
    pub fn new(
        transaction_id: impl Into<String>,
        account_type: AccountType,
        entry_type: EntryType,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            wallet_id: None,
            account_type,
            entry_type,
            amount,
            currency: currency.into(),
            booking_id: None,
            balance_before: None,
            balance_after: None,
            description: None,
        }
    }

    pub fn with_wallet(mut self, wallet_id: WalletId) -> Self {
        self.wallet_id = Some(wallet_id);
        self
    }

    pub fn with_booking(mut self, booking_id: impl Into<String>) -> Self {
        self.booking_id = Some(booking_id.into());
        self
    }

    pub fn with_balances(mut self, before: Decimal, after: Decimal) -> Self {
        self.balance_before = Some(before);
        self.balance_after = Some(after);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Chain the draft onto `previous_hash` and seal it into an immutable
    /// entry. `sequence` is assigned by the repository.
    pub fn seal(self, sequence: i64, previous_hash: String, created_at: DateTime<Utc>) -> LedgerEntry {
        let mut entry = LedgerEntry {
            id: Uuid::new_v4(),
            sequence,
            transaction_id: self.transaction_id,
            wallet_id: self.wallet_id,
            account_type: self.account_type,
            entry_type: self.entry_type,
            amount: self.amount,
            currency: self.currency,
            booking_id: self.booking_id,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            description: self.description,
            entry_hash: String::new(),
            previous_hash,
            created_at,
        };
        entry.entry_hash = entry.compute_hash();
        entry
    }
}

impl LedgerEntry {
    /// Hash over the row's canonical fields plus the previous hash.
    pub fn compute_hash(&self) -> String {
        sha256_hex(&[
            &self.id.to_string(),
            &self.transaction_id,
            &self.wallet_id.map(|w| w.to_string()).unwrap_or_default(),
            self.account_type.as_str(),
            self.entry_type.as_str(),
            &format_amount(self.amount),
            &self.currency,
            self.booking_id.as_deref().unwrap_or(""),
            &self.created_at.to_rfc3339(),
            &self.previous_hash,
        ])
    }
}

/// Where and how a hash chain broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainViolation {
    /// Index into the verified slice
    pub index: usize,
    pub entry_id: EntryId,
    pub kind: ChainViolationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainViolationKind {
    /// `previous_hash` does not match the prior entry's hash
    BrokenLink,
    /// The stored `entry_hash` does not match the recomputed one
    TamperedEntry,
}

/// Walk one chain's entries in creation order and return the first
/// violation, if any. The caller supplies the entries of a single chain
/// (one wallet's rows, or the wallet-less global rows) ordered by sequence.
pub fn verify_chain(entries: &[LedgerEntry]) -> Option<ChainViolation> {
    let mut previous = CHAIN_GENESIS.to_string();
    for (index, entry) in entries.iter().enumerate() {
        if entry.previous_hash != previous {
            return Some(ChainViolation {
                index,
                entry_id: entry.id,
                kind: ChainViolationKind::BrokenLink,
            });
        }
        if entry.compute_hash() != entry.entry_hash {
            return Some(ChainViolation {
                index,
                entry_id: entry.id,
                kind: ChainViolationKind::TamperedEntry,
            });
        }
        previous = entry.entry_hash.clone();
    }
    None
}
