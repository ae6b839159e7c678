use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    withholding_on, AccountType, AuditCategory, AuditDraft, BalanceBucket, EntryType, OwnerType,
    Payout, PayoutMethod, PayoutStatus, Wallet, WalletId,
};
use crate::storage::Repository;

use super::{
    wallet_credit_draft, wallet_debit_draft, AppError, AuditLogService, LedgerService, WalletOp,
    WalletService,
};

/// Lease name guarding the weekly Dellala sweep against double runs.
const WEEKLY_DELLALA_LEASE: &str = "weekly_dellala_payouts";

/// How long a sweep may hold its lease before a stalled run is stolen.
fn lease_ttl() -> Duration {
    Duration::minutes(10)
}

/// Outcome of one weekly Dellala sweep.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub batch_id: String,
    pub created: Vec<Payout>,
    pub skipped: usize,
}

/// Payout lifecycle: funds are debited from the wallet the moment a payout
/// is created, ahead of rail confirmation; a failed payout credits the
/// amount back to the available bucket.
pub struct PayoutService {
    repo: Repository,
    wallets: WalletService,
    audit: AuditLogService,
}

impl PayoutService {
    pub fn new(repo: Repository) -> Self {
        let wallets = WalletService::new(repo.clone());
        let audit = AuditLogService::new(repo.clone());
        Self { repo, wallets, audit }
    }

    /// On-demand owner payout. The rail fee comes off the top; withholding
    /// tax is deducted only when the owner asked for tax handling.
    pub async fn create_owner_payout(
        &self,
        owner_id: &str,
        currency: &str,
        amount: Decimal,
        method: PayoutMethod,
        withhold_tax: bool,
        actor: &str,
    ) -> Result<Payout, AppError> {
        let wallet = self.wallets.get_by_owner(owner_id, currency).await?;
        if wallet.owner_type != OwnerType::Owner {
            return Err(AppError::Validation(format!(
                "wallet of {} is not an owner wallet",
                owner_id
            )));
        }
        let withholding = if withhold_tax { withholding_on(amount) } else { Decimal::ZERO };
        self.create_payout(&wallet, amount, method, withholding, None, None, Vec::new(), actor)
            .await
    }

    /// Dellala payout covering the wallet's full available balance.
    /// Commission income always carries the 10% withholding deduction.
    pub async fn create_dellala_payout(
        &self,
        wallet: &Wallet,
        method: PayoutMethod,
        batch_id: Option<String>,
        period: Option<(DateTime<Utc>, DateTime<Utc>)>,
        transaction_ids: Vec<String>,
        actor: &str,
    ) -> Result<Payout, AppError> {
        let amount = wallet.available_balance;
        let withholding = withholding_on(amount);
        self.create_payout(wallet, amount, method, withholding, batch_id, period, transaction_ids, actor)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_payout(
        &self,
        wallet: &Wallet,
        amount: Decimal,
        method: PayoutMethod,
        withholding: Decimal,
        batch_id: Option<String>,
        period: Option<(DateTime<Utc>, DateTime<Utc>)>,
        transaction_ids: Vec<String>,
        actor: &str,
    ) -> Result<Payout, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation("payout amount must be positive".into()));
        }
        let fee = method.fee();
        let net_amount = amount - fee - withholding;
        if net_amount <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "payout of {} does not cover fee {} and withholding {}",
                amount, fee, withholding
            )));
        }

        let now = Utc::now();
        let payout = Payout {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            recipient_id: wallet.owner_id.clone(),
            recipient_type: wallet.owner_type,
            amount,
            fee,
            withholding_tax: withholding,
            net_amount,
            method,
            status: PayoutStatus::Pending,
            batch_id,
            period_start: period.map(|(start, _)| start),
            period_end: period.map(|(_, end)| end),
            transaction_ids,
            failure_reason: None,
            requested_at: now,
            processed_at: None,
            completed_at: None,
        };

        // Reserve the funds now: wallet debit, ledger pair, payout row and
        // audit row commit together.
        let mut tx = self.repo.begin().await?;
        let updated = WalletService::apply_in(
            &mut tx,
            wallet.id,
            WalletOp::Debit(BalanceBucket::Available),
            amount,
            actor,
            &format!("payout {}", payout.id),
        )
        .await?;
        Self::book_payout_pair_in(
            &mut tx,
            &payout.id.to_string(),
            wallet.id,
            amount,
            &wallet.currency,
            updated.total_balance(),
            EntryType::Debit,
        )
        .await?;
        Repository::insert_payout_in(&mut tx, &payout).await?;
        let draft = AuditDraft::new("payout_created", AuditCategory::Payout, actor, payout.id.to_string())
            .with_after(json!({
                "wallet_id": wallet.id,
                "amount": amount,
                "fee": fee,
                "withholding_tax": withholding,
                "net_amount": net_amount,
                "method": method.as_str(),
                "batch_id": payout.batch_id,
            }));
        AuditLogService::record_in(&mut tx, draft).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(payout_id = %payout.id, wallet_id = %wallet.id, %amount, "payout created");
        Ok(payout)
    }

    /// Balanced ledger pair for a payout movement. For the initial debit the
    /// wallet row debits and a wallet-less row credits (money leaving to the
    /// rail); a failure reversal flips both.
    async fn book_payout_pair_in(
        conn: &mut SqliteConnection,
        transaction_id: &str,
        wallet_id: WalletId,
        amount: Decimal,
        currency: &str,
        wallet_total_after: Decimal,
        wallet_side: EntryType,
    ) -> Result<(), AppError> {
        let (wallet_draft, external_type) = match wallet_side {
            EntryType::Debit => (
                wallet_debit_draft(transaction_id, wallet_id, AccountType::PayoutRequest, amount, currency)
                    .with_balances(wallet_total_after + amount, wallet_total_after),
                EntryType::Credit,
            ),
            EntryType::Credit => (
                wallet_credit_draft(transaction_id, wallet_id, AccountType::PayoutRequest, amount, currency)
                    .with_balances(wallet_total_after - amount, wallet_total_after),
                EntryType::Debit,
            ),
        };
        LedgerService::create_entry_in(conn, wallet_draft).await?;
        let external = crate::domain::EntryDraft::new(
            transaction_id,
            AccountType::PayoutRequest,
            external_type,
            amount,
            currency,
        );
        LedgerService::create_entry_in(conn, external).await?;
        Ok(())
    }

    /// pending -> processing: the rail accepted the transfer.
    pub async fn mark_processing(&self, payout_id: Uuid, actor: &str) -> Result<Payout, AppError> {
        self.transition(payout_id, PayoutStatus::Processing, None, actor).await
    }

    /// processing -> completed: the rail confirmed delivery.
    pub async fn mark_completed(&self, payout_id: Uuid, actor: &str) -> Result<Payout, AppError> {
        self.transition(payout_id, PayoutStatus::Completed, None, actor).await
    }

    /// Terminal failure: record the reason and credit the full amount back
    /// to the wallet's available bucket.
    pub async fn mark_failed(
        &self,
        payout_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<Payout, AppError> {
        self.transition(payout_id, PayoutStatus::Failed, Some(reason.to_string()), actor)
            .await
    }

    async fn transition(
        &self,
        payout_id: Uuid,
        next: PayoutStatus,
        failure_reason: Option<String>,
        actor: &str,
    ) -> Result<Payout, AppError> {
        let mut payout = self
            .repo
            .get_payout(payout_id)
            .await?
            .ok_or_else(|| AppError::not_found("payout", payout_id.to_string()))?;
        if !payout.status.can_transition_to(next) {
            return Err(AppError::Validation(format!(
                "payout {} cannot go from {} to {}",
                payout_id, payout.status, next
            )));
        }

        let previous = payout.status;
        let now = Utc::now();
        payout.status = next;
        match next {
            PayoutStatus::Processing => payout.processed_at = Some(now),
            PayoutStatus::Completed => payout.completed_at = Some(now),
            PayoutStatus::Failed => {
                payout.failure_reason = failure_reason.clone();
                payout.completed_at = Some(now);
            }
            PayoutStatus::Pending => {}
        }

        let mut tx = self.repo.begin().await?;
        if next == PayoutStatus::Failed {
            let updated = WalletService::apply_in(
                &mut tx,
                payout.wallet_id,
                WalletOp::Credit(BalanceBucket::Available),
                payout.amount,
                actor,
                &format!("reversal of failed payout {}", payout.id),
            )
            .await?;
            Self::book_payout_pair_in(
                &mut tx,
                &payout.id.to_string(),
                payout.wallet_id,
                payout.amount,
                &updated.currency,
                updated.total_balance(),
                EntryType::Credit,
            )
            .await?;
        }
        Repository::update_payout_transition_in(&mut tx, &payout).await?;
        let action = match next {
            PayoutStatus::Processing => "payout_processing",
            PayoutStatus::Completed => "payout_completed",
            PayoutStatus::Failed => "payout_failed",
            PayoutStatus::Pending => "payout_pending",
        };
        let draft = AuditDraft::new(action, AuditCategory::Payout, actor, payout.id.to_string())
            .with_before(json!({ "status": previous.as_str() }))
            .with_after(json!({ "status": next.as_str(), "failure_reason": failure_reason }));
        AuditLogService::record_in(&mut tx, draft).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        if next == PayoutStatus::Failed {
            warn!(payout_id = %payout.id, reason = ?payout.failure_reason, "payout failed, funds returned");
        } else {
            info!(payout_id = %payout.id, status = %next, "payout transitioned");
        }
        Ok(payout)
    }

    /// Weekly sweep: pay every Dellala wallet's full available balance in
    /// one batch. Guarded by a lease so overlapping runs are rejected; a
    /// wallet that fails (locked, balance below fees) is skipped, not fatal.
    pub async fn process_weekly_dellala_payouts(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        actor: &str,
    ) -> Result<BatchSummary, AppError> {
        let holder = Uuid::new_v4().to_string();
        if !self
            .repo
            .try_acquire_lease(WEEKLY_DELLALA_LEASE, &holder, lease_ttl())
            .await?
        {
            return Err(AppError::AlreadyRunning(WEEKLY_DELLALA_LEASE.into()));
        }

        let result = self
            .run_dellala_sweep(period_start, period_end, actor)
            .await;
        self.repo.release_lease(WEEKLY_DELLALA_LEASE, &holder).await?;
        result
    }

    async fn run_dellala_sweep(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        actor: &str,
    ) -> Result<BatchSummary, AppError> {
        let batch_id = Payout::new_batch_id();
        let wallets = self.wallets.list_by_type(OwnerType::Dellala).await?;
        let mut created = Vec::new();
        let mut skipped = 0usize;

        for wallet in &wallets {
            if wallet.available_balance <= Decimal::ZERO {
                continue;
            }
            let method = wallet
                .payout_method
                .as_deref()
                .and_then(PayoutMethod::from_str)
                .unwrap_or(PayoutMethod::Telebirr);
            match self
                .create_dellala_payout(
                    wallet,
                    method,
                    Some(batch_id.clone()),
                    Some((period_start, period_end)),
                    Vec::new(),
                    actor,
                )
                .await
            {
                Ok(payout) => created.push(payout),
                Err(err) => {
                    skipped += 1;
                    warn!(wallet_id = %wallet.id, %err, "dellala payout skipped");
                }
            }
        }

        let draft = AuditDraft::new("dellala_batch_run", AuditCategory::Payout, actor, &batch_id)
            .with_after(json!({
                "created": created.len(),
                "skipped": skipped,
                "period_start": period_start,
                "period_end": period_end,
            }));
        self.audit.record(draft).await?;

        info!(%batch_id, created = created.len(), skipped, "weekly dellala sweep finished");
        Ok(BatchSummary { batch_id, created, skipped })
    }

    pub async fn get(&self, payout_id: Uuid) -> Result<Payout, AppError> {
        self.repo
            .get_payout(payout_id)
            .await?
            .ok_or_else(|| AppError::not_found("payout", payout_id.to_string()))
    }

    pub async fn list_by_wallet(&self, wallet_id: WalletId) -> Result<Vec<Payout>, AppError> {
        Ok(self.repo.list_payouts_by_wallet(wallet_id).await?)
    }

    pub async fn list_by_batch(&self, batch_id: &str) -> Result<Vec<Payout>, AppError> {
        Ok(self.repo.list_payouts_by_batch(batch_id).await?)
    }
}
