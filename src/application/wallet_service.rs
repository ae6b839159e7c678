use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::{debug, error, warn};

use crate::domain::{
    AuditCategory, AuditDraft, BalanceBucket, OwnerType, Wallet, WalletId, WalletStatus,
};
use crate::storage::Repository;

use super::{AppError, AuditLogService};

/// Bounded optimistic retries before a mutation gives up.
const MAX_MUTATION_ATTEMPTS: usize = 5;

/// A single balance mutation. Credits and debits touch exactly one bucket;
/// freeze/unfreeze move money between available and frozen.
#[derive(Debug, Clone, Copy)]
pub enum WalletOp {
    Credit(BalanceBucket),
    Debit(BalanceBucket),
    Freeze,
    Unfreeze,
}

impl WalletOp {
    fn action(&self) -> &'static str {
        match self {
            WalletOp::Credit(_) => "wallet_credit",
            WalletOp::Debit(_) => "wallet_debit",
            WalletOp::Freeze => "wallet_freeze",
            WalletOp::Unfreeze => "wallet_unfreeze",
        }
    }
}

/// Per-owner balance state machine. Every mutation is an atomic unit: the
/// wallet row update is guarded by the balance hash the mutation read
/// (optimistic concurrency), and the audit row commits with it or not at all.
pub struct WalletService {
    repo: Repository,
}

impl WalletService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Idempotent lookup-or-insert; exactly one wallet exists per
    /// (owner, currency).
    pub async fn get_or_create(
        &self,
        owner_id: &str,
        owner_type: OwnerType,
        currency: &str,
    ) -> Result<Wallet, AppError> {
        if let Some(wallet) = self.repo.get_wallet_by_owner(owner_id, currency).await? {
            return Ok(wallet);
        }

        let wallet = Wallet::new(owner_id, owner_type, currency);
        match self.repo.save_wallet(&wallet).await {
            Ok(()) => {
                debug!(wallet_id = %wallet.id, owner_id, "wallet created");
                Ok(wallet)
            }
            // A concurrent creator may have won the unique index race
            Err(err) => match self.repo.get_wallet_by_owner(owner_id, currency).await? {
                Some(existing) => Ok(existing),
                None => Err(err.into()),
            },
        }
    }

    pub async fn get(&self, wallet_id: WalletId) -> Result<Wallet, AppError> {
        self.repo
            .get_wallet(wallet_id)
            .await?
            .ok_or_else(|| AppError::not_found("wallet", wallet_id.to_string()))
    }

    pub async fn get_by_owner(&self, owner_id: &str, currency: &str) -> Result<Wallet, AppError> {
        self.repo
            .get_wallet_by_owner(owner_id, currency)
            .await?
            .ok_or_else(|| AppError::not_found("wallet", owner_id))
    }

    pub async fn list(&self) -> Result<Vec<Wallet>, AppError> {
        Ok(self.repo.list_wallets().await?)
    }

    pub async fn list_by_type(&self, owner_type: OwnerType) -> Result<Vec<Wallet>, AppError> {
        Ok(self.repo.list_wallets_by_type(owner_type).await?)
    }

    pub async fn credit(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        bucket: BalanceBucket,
        actor: &str,
        description: &str,
    ) -> Result<Wallet, AppError> {
        self.mutate(wallet_id, WalletOp::Credit(bucket), amount, actor, description)
            .await
    }

    pub async fn debit(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        bucket: BalanceBucket,
        actor: &str,
        description: &str,
    ) -> Result<Wallet, AppError> {
        self.mutate(wallet_id, WalletOp::Debit(bucket), amount, actor, description)
            .await
    }

    /// Move funds available -> frozen.
    pub async fn freeze(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        actor: &str,
        description: &str,
    ) -> Result<Wallet, AppError> {
        self.mutate(wallet_id, WalletOp::Freeze, amount, actor, description)
            .await
    }

    /// Move funds frozen -> available.
    pub async fn unfreeze(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        actor: &str,
        description: &str,
    ) -> Result<Wallet, AppError> {
        self.mutate(wallet_id, WalletOp::Unfreeze, amount, actor, description)
            .await
    }

    /// Standalone mutation with bounded optimistic retries.
    async fn mutate(
        &self,
        wallet_id: WalletId,
        op: WalletOp,
        amount: Decimal,
        actor: &str,
        description: &str,
    ) -> Result<Wallet, AppError> {
        for attempt in 1..=MAX_MUTATION_ATTEMPTS {
            let mut tx = self.repo.begin().await?;
            match Self::try_apply_in(&mut tx, wallet_id, op, amount, actor, description).await? {
                Some(wallet) => {
                    tx.commit().await.map_err(anyhow::Error::from)?;
                    debug!(
                        wallet_id = %wallet_id,
                        action = op.action(),
                        amount = %amount,
                        "wallet mutation committed"
                    );
                    return Ok(wallet);
                }
                None => {
                    drop(tx);
                    warn!(wallet_id = %wallet_id, attempt, "wallet mutation contended, retrying");
                }
            }
        }
        Err(AppError::Concurrency(wallet_id.to_string()))
    }

    /// Apply a mutation on an open transaction (one attempt). A concurrent
    /// writer winning the hash guard surfaces as `Concurrency`; callers
    /// composing larger transactions abort rather than retry in place.
    pub async fn apply_in(
        conn: &mut SqliteConnection,
        wallet_id: WalletId,
        op: WalletOp,
        amount: Decimal,
        actor: &str,
        description: &str,
    ) -> Result<Wallet, AppError> {
        Self::try_apply_in(conn, wallet_id, op, amount, actor, description)
            .await?
            .ok_or_else(|| AppError::Concurrency(wallet_id.to_string()))
    }

    /// One mutation attempt. Returns None when the guarded update lost to a
    /// concurrent writer.
    async fn try_apply_in(
        conn: &mut SqliteConnection,
        wallet_id: WalletId,
        op: WalletOp,
        amount: Decimal,
        actor: &str,
        description: &str,
    ) -> Result<Option<Wallet>, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation("amount must be positive".into()));
        }

        let wallet = Repository::get_wallet_in(conn, wallet_id)
            .await?
            .ok_or_else(|| AppError::not_found("wallet", wallet_id.to_string()))?;
        if wallet.is_locked() {
            return Err(AppError::WalletFrozen(wallet_id.to_string()));
        }
        // Never mutate a wallet whose stored state no longer matches its
        // fingerprint; the discrepancy goes to an operator first.
        if !wallet.verify_balance_hash() {
            return Err(AppError::Integrity {
                target: wallet_id.to_string(),
                detail: "stored balance hash does not match wallet state".into(),
            });
        }

        let expected_hash = wallet.last_balance_hash.clone();
        let before = wallet_snapshot(&wallet);

        let mut updated = wallet;
        match op {
            WalletOp::Credit(bucket) => {
                *updated.balance_mut(bucket) += amount;
                updated.total_earnings += amount;
            }
            WalletOp::Debit(bucket) => {
                require_funds(&updated, bucket, amount)?;
                *updated.balance_mut(bucket) -= amount;
                updated.total_withdrawals += amount;
            }
            WalletOp::Freeze => {
                require_funds(&updated, BalanceBucket::Available, amount)?;
                updated.available_balance -= amount;
                updated.frozen_balance += amount;
            }
            WalletOp::Unfreeze => {
                require_funds(&updated, BalanceBucket::Frozen, amount)?;
                updated.frozen_balance -= amount;
                updated.available_balance += amount;
            }
        }
        updated.refresh_hash(Utc::now());

        if !Repository::update_wallet_guarded_in(conn, &updated, &expected_hash).await? {
            return Ok(None);
        }

        let draft = AuditDraft::new(op.action(), AuditCategory::Wallet, actor, wallet_id.to_string())
            .with_before(before)
            .with_after(wallet_snapshot_with_note(&updated, description));
        AuditLogService::record_in(conn, draft).await?;

        Ok(Some(updated))
    }

    /// Engage the administrative lock. Orthogonal to the balance buckets: a
    /// locked wallet holds its funds but rejects mutations.
    pub async fn lock_wallet(&self, wallet_id: WalletId, actor: &str) -> Result<(), AppError> {
        let wallet = self.get(wallet_id).await?;
        self.repo.set_wallet_status(wallet_id, WalletStatus::Frozen).await?;
        let mut tx = self.repo.begin().await?;
        let draft = AuditDraft::new("wallet_locked", AuditCategory::Wallet, actor, wallet_id.to_string())
            .with_before(json!({ "status": wallet.status.as_str() }))
            .with_after(json!({ "status": WalletStatus::Frozen.as_str() }));
        AuditLogService::record_in(&mut *tx, draft).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(())
    }

    pub async fn unlock_wallet(&self, wallet_id: WalletId, actor: &str) -> Result<(), AppError> {
        let wallet = self.get(wallet_id).await?;
        self.repo.set_wallet_status(wallet_id, WalletStatus::Active).await?;
        let mut tx = self.repo.begin().await?;
        let draft = AuditDraft::new("wallet_unlocked", AuditCategory::Wallet, actor, wallet_id.to_string())
            .with_before(json!({ "status": wallet.status.as_str() }))
            .with_after(json!({ "status": WalletStatus::Active.as_str() }));
        AuditLogService::record_in(&mut *tx, draft).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(())
    }

    /// Recompute the balance fingerprint from stored state and compare it to
    /// `last_balance_hash`. Every check is audit-logged, pass or fail.
    pub async fn verify_integrity(&self, wallet_id: WalletId, actor: &str) -> Result<bool, AppError> {
        let wallet = self.get(wallet_id).await?;
        let valid = wallet.verify_balance_hash();

        let mut tx = self.repo.begin().await?;
        let draft = AuditDraft::new(
            "wallet_integrity_check",
            AuditCategory::Integrity,
            actor,
            wallet_id.to_string(),
        )
        .with_after(json!({
            "valid": valid,
            "stored_hash": wallet.last_balance_hash,
            "computed_hash": wallet.compute_balance_hash(),
        }));
        AuditLogService::record_in(&mut *tx, draft).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        if !valid {
            error!(wallet_id = %wallet_id, "wallet balance hash mismatch");
        }
        Ok(valid)
    }
}

fn require_funds(wallet: &Wallet, bucket: BalanceBucket, amount: Decimal) -> Result<(), AppError> {
    let available = wallet.balance(bucket);
    if available < amount {
        return Err(AppError::InsufficientBalance {
            wallet_id: wallet.id.to_string(),
            bucket,
            available,
            required: amount,
        });
    }
    Ok(())
}

fn wallet_snapshot(wallet: &Wallet) -> serde_json::Value {
    json!({
        "available": wallet.available_balance,
        "frozen": wallet.frozen_balance,
        "pending": wallet.pending_balance,
        "total_earnings": wallet.total_earnings,
        "total_withdrawals": wallet.total_withdrawals,
        "balance_hash": wallet.last_balance_hash,
    })
}

fn wallet_snapshot_with_note(wallet: &Wallet, note: &str) -> serde_json::Value {
    let mut snapshot = wallet_snapshot(wallet);
    snapshot["note"] = json!(note);
    snapshot
}
