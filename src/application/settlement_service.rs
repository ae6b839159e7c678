use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::domain::{
    commission_split, dellala_commission_active, AccountType, AuditCategory, AuditDraft,
    BalanceBucket, CommissionSplit, EntryType, ErcaReceipt, MarketplaceDirectory, OwnerType,
    SettlementStatus, SettlementTransaction, Wallet, CORPORATE_OWNER_ID,
};
use crate::storage::Repository;

use super::{
    wallet_credit_draft, wallet_debit_draft, AppError, AuditLogService, FxService, LedgerService,
    WalletOp, WalletService,
};

/// Settlement currency for all wallets and ledger postings.
pub const SETTLEMENT_CURRENCY: &str = "ETB";

/// Inputs for settling one booking payment.
#[derive(Debug, Clone)]
pub struct SettleRequest {
    pub booking_id: String,
    pub payment_ref: String,
    pub payment_method: String,
    /// Hold owner/dellala shares in the frozen bucket until checkout
    pub freeze_until_checkout: bool,
}

/// Settles booking payments: converts to ETB, splits the gross among owner,
/// Dellala and corporate, credits wallets, and books the ledger rows, all in
/// one transaction per booking. Also releases frozen shares at checkout and
/// claws everything back on refund.
pub struct PaymentSettlementService {
    repo: Repository,
    wallets: WalletService,
    fx: FxService,
}

impl PaymentSettlementService {
    pub fn new(repo: Repository) -> Self {
        let wallets = WalletService::new(repo.clone());
        let fx = FxService::new(repo.clone());
        Self { repo, wallets, fx }
    }

    /// Settle one booking payment. At most one settlement exists per
    /// booking; a second call is rejected as a duplicate.
    pub async fn settle_booking(
        &self,
        directory: &MarketplaceDirectory,
        request: SettleRequest,
        actor: &str,
    ) -> Result<SettlementTransaction, AppError> {
        if let Some(existing) = self.repo.get_settlement_by_booking(&request.booking_id).await? {
            return Err(AppError::DuplicateOperation(format!(
                "booking {} already settled as {}",
                request.booking_id, existing.id
            )));
        }

        let booking = directory
            .booking(&request.booking_id)
            .ok_or_else(|| AppError::not_found("booking", &request.booking_id))?;
        let property = directory
            .property(&booking.property_id)
            .ok_or_else(|| AppError::not_found("property", &booking.property_id))?;

        // Resolve the referring agent and whether their commission window
        // is still open. The window starts at the link's first booking when
        // known, else at the agent's registration.
        let now = Utc::now();
        let mut dellala_id: Option<String> = None;
        let mut dellala_active = false;
        if let Some(link) = directory.link_for_property(&property.id) {
            if let Some(agent) = directory.agent(&link.agent_id) {
                let window_start = link.first_booking_at.unwrap_or(agent.registered_at);
                dellala_id = Some(agent.id.clone());
                dellala_active = dellala_commission_active(window_start, now);
                if !dellala_active {
                    info!(agent_id = %agent.id, "dellala commission window expired");
                }
            }
        }

        let conversion = self
            .fx
            .convert(booking.total_price, &booking.currency, SETTLEMENT_CURRENCY)
            .await?;
        let gross = conversion.amount;
        let (original_amount, original_currency) = if conversion.rate.is_some() {
            (Some(booking.total_price), Some(booking.currency.clone()))
        } else {
            (None, None)
        };

        let split = commission_split(gross, dellala_id.is_some(), dellala_active);

        // Wallet rows are created outside the settlement transaction so a
        // rolled-back settlement never leaves a half-created wallet behind
        // the unique index.
        let owner_wallet = self
            .wallets
            .get_or_create(&property.host_id, OwnerType::Owner, SETTLEMENT_CURRENCY)
            .await?;
        let dellala_wallet = match (&dellala_id, split.dellala_share > Decimal::ZERO) {
            (Some(agent_id), true) => Some(
                self.wallets
                    .get_or_create(agent_id, OwnerType::Dellala, SETTLEMENT_CURRENCY)
                    .await?,
            ),
            _ => None,
        };
        let corporate_wallet = self
            .wallets
            .get_or_create(CORPORATE_OWNER_ID, OwnerType::Corporate, SETTLEMENT_CURRENCY)
            .await?;

        let status = if request.freeze_until_checkout {
            SettlementStatus::Frozen
        } else {
            SettlementStatus::Settled
        };
        let transaction_hash = SettlementTransaction::compute_transaction_hash(
            &booking.id,
            &request.payment_ref,
            gross,
            SETTLEMENT_CURRENCY,
            &property.host_id,
            dellala_id.as_deref(),
            &booking.guest_id,
            &split,
        );
        let txn = SettlementTransaction {
            id: SettlementTransaction::new_id(),
            booking_id: booking.id.clone(),
            gross_amount: gross,
            currency: SETTLEMENT_CURRENCY.to_string(),
            owner_share: split.owner_share,
            dellala_share: split.dellala_share,
            corporate_share: split.corporate_share,
            vat_amount: split.vat_amount,
            withholding_tax: split.withholding_tax,
            fx_rate: conversion.rate,
            original_amount,
            original_currency,
            status,
            owner_id: property.host_id.clone(),
            dellala_id: dellala_id.clone(),
            guest_id: booking.guest_id.clone(),
            payment_ref: request.payment_ref.clone(),
            payment_method: request.payment_method.clone(),
            transaction_hash,
            created_at: now,
            updated_at: now,
        };

        // Owner/dellala shares land in the frozen bucket when the settlement
        // is held until checkout; the corporate share is spendable at once.
        let share_bucket = if request.freeze_until_checkout {
            BalanceBucket::Frozen
        } else {
            BalanceBucket::Available
        };

        let mut tx = self.repo.begin().await?;
        Repository::insert_settlement_in(&mut tx, &txn).await?;
        Self::book_settlement_entries(
            &mut tx,
            &txn,
            &split,
            &owner_wallet,
            dellala_wallet.as_ref(),
            &corporate_wallet,
            share_bucket,
            actor,
        )
        .await?;

        let draft = AuditDraft::new("settlement_created", AuditCategory::Settlement, actor, &txn.id)
            .with_after(json!({
                "booking_id": txn.booking_id,
                "gross": txn.gross_amount,
                "owner_share": txn.owner_share,
                "dellala_share": txn.dellala_share,
                "corporate_share": txn.corporate_share,
                "status": txn.status.as_str(),
                "erca": ErcaReceipt::from_split(&split),
            }));
        AuditLogService::record_in(&mut tx, draft).await?;

        if let Some(rate) = conversion.rate {
            let fx_draft = AuditDraft::new("fx_conversion", AuditCategory::Fx, actor, &txn.id)
                .with_after(json!({
                    "booking_id": txn.booking_id,
                    "original_amount": txn.original_amount,
                    "original_currency": txn.original_currency,
                    "rate": rate,
                    "converted_amount": txn.gross_amount,
                    "currency": txn.currency,
                }));
            AuditLogService::record_in(&mut tx, fx_draft).await?;
        }
        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(
            transaction_id = %txn.id,
            booking_id = %txn.booking_id,
            gross = %txn.gross_amount,
            status = %txn.status,
            "booking settled"
        );
        Ok(txn)
    }

    /// Wallet credits and ledger rows for one settlement: a wallet-less
    /// guest-payment debit of the gross, one credit per non-zero share, and
    /// informational vat/withholding postings.
    #[allow(clippy::too_many_arguments)]
    async fn book_settlement_entries(
        conn: &mut SqliteConnection,
        txn: &SettlementTransaction,
        split: &CommissionSplit,
        owner_wallet: &Wallet,
        dellala_wallet: Option<&Wallet>,
        corporate_wallet: &Wallet,
        share_bucket: BalanceBucket,
        actor: &str,
    ) -> Result<(), AppError> {
        let currency = &txn.currency;

        let guest_debit = crate::domain::EntryDraft::new(
            &txn.id,
            AccountType::GuestPayment,
            EntryType::Debit,
            split.gross,
            currency,
        )
        .with_booking(&txn.booking_id)
        .with_description(format!("guest payment for booking {}", txn.booking_id));
        LedgerService::create_entry_in(conn, guest_debit).await?;

        Self::credit_share_in(
            conn,
            txn,
            owner_wallet.id,
            AccountType::OwnerEarning,
            split.owner_share,
            share_bucket,
            actor,
        )
        .await?;

        if let Some(wallet) = dellala_wallet {
            Self::credit_share_in(
                conn,
                txn,
                wallet.id,
                AccountType::DellalaCommission,
                split.dellala_share,
                share_bucket,
                actor,
            )
            .await?;
        }

        Self::credit_share_in(
            conn,
            txn,
            corporate_wallet.id,
            AccountType::CorporateFee,
            split.corporate_share,
            BalanceBucket::Available,
            actor,
        )
        .await?;

        for (account, amount) in [
            (AccountType::Vat, split.vat_amount),
            (AccountType::WithholdingTax, split.withholding_tax),
        ] {
            if amount > Decimal::ZERO {
                let draft = crate::domain::EntryDraft::new(
                    &txn.id,
                    account,
                    EntryType::Credit,
                    amount,
                    currency,
                )
                .with_booking(&txn.booking_id)
                .with_description("tax reporting posting");
                LedgerService::create_entry_in(conn, draft).await?;
            }
        }

        Ok(())
    }

    /// Credit one share to a wallet and book the matching ledger row with
    /// balance snapshots.
    async fn credit_share_in(
        conn: &mut SqliteConnection,
        txn: &SettlementTransaction,
        wallet_id: crate::domain::WalletId,
        account: AccountType,
        amount: Decimal,
        bucket: BalanceBucket,
        actor: &str,
    ) -> Result<(), AppError> {
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        let updated = WalletService::apply_in(
            conn,
            wallet_id,
            WalletOp::Credit(bucket),
            amount,
            actor,
            &format!("settlement {}", txn.id),
        )
        .await?;
        let after = updated.total_balance();
        let draft = wallet_credit_draft(&txn.id, wallet_id, account, amount, &txn.currency)
            .with_booking(&txn.booking_id)
            .with_balances(after - amount, after);
        LedgerService::create_entry_in(conn, draft).await?;
        Ok(())
    }

    /// Release a frozen settlement's owner/dellala shares at checkout.
    /// Looks up the still-frozen settlement for the booking; a second call
    /// finds nothing and reports NotFound.
    pub async fn unfreeze_on_checkout(
        &self,
        booking_id: &str,
        actor: &str,
    ) -> Result<SettlementTransaction, AppError> {
        let mut txn = self
            .repo
            .get_frozen_settlement_by_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::not_found("frozen settlement", booking_id))?;

        let owner_wallet = self
            .wallets
            .get_by_owner(&txn.owner_id, &txn.currency)
            .await?;

        let mut tx = self.repo.begin().await?;
        WalletService::apply_in(
            &mut tx,
            owner_wallet.id,
            WalletOp::Unfreeze,
            txn.owner_share,
            actor,
            &format!("checkout release for {}", txn.id),
        )
        .await?;
        if txn.dellala_share > Decimal::ZERO {
            if let Some(agent_id) = &txn.dellala_id {
                let dellala_wallet = self.wallets.get_by_owner(agent_id, &txn.currency).await?;
                WalletService::apply_in(
                    &mut tx,
                    dellala_wallet.id,
                    WalletOp::Unfreeze,
                    txn.dellala_share,
                    actor,
                    &format!("checkout release for {}", txn.id),
                )
                .await?;
            }
        }

        let now = Utc::now();
        Repository::update_settlement_status_in(&mut tx, &txn.id, SettlementStatus::Unfrozen, now)
            .await?;
        let draft = AuditDraft::new("settlement_unfrozen", AuditCategory::Settlement, actor, &txn.id)
            .with_before(json!({ "status": txn.status.as_str() }))
            .with_after(json!({ "status": SettlementStatus::Unfrozen.as_str() }));
        AuditLogService::record_in(&mut tx, draft).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        txn.status = SettlementStatus::Unfrozen;
        txn.updated_at = now;
        info!(transaction_id = %txn.id, booking_id, "frozen shares released at checkout");
        Ok(txn)
    }

    /// Claw back every share of a settled booking. Shares still frozen are
    /// debited from the frozen bucket, released ones from available; the
    /// corporate share always comes out of available. Only a second refund
    /// is rejected.
    pub async fn refund_transaction(
        &self,
        booking_id: &str,
        actor: &str,
    ) -> Result<SettlementTransaction, AppError> {
        let mut txn = self
            .repo
            .get_settlement_by_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::not_found("settlement", booking_id))?;
        if !txn.is_refundable() {
            return Err(AppError::DuplicateOperation(format!(
                "settlement {} already refunded",
                txn.id
            )));
        }

        let share_bucket = if txn.status == SettlementStatus::Frozen {
            BalanceBucket::Frozen
        } else {
            BalanceBucket::Available
        };

        let owner_wallet = self.wallets.get_by_owner(&txn.owner_id, &txn.currency).await?;
        let corporate_wallet = self
            .wallets
            .get_by_owner(CORPORATE_OWNER_ID, &txn.currency)
            .await?;

        let mut tx = self.repo.begin().await?;
        Self::debit_share_in(
            &mut tx,
            &txn,
            owner_wallet.id,
            txn.owner_share,
            share_bucket,
            actor,
        )
        .await?;
        if txn.dellala_share > Decimal::ZERO {
            if let Some(agent_id) = &txn.dellala_id {
                let dellala_wallet = self.wallets.get_by_owner(agent_id, &txn.currency).await?;
                Self::debit_share_in(
                    &mut tx,
                    &txn,
                    dellala_wallet.id,
                    txn.dellala_share,
                    share_bucket,
                    actor,
                )
                .await?;
            }
        }
        Self::debit_share_in(
            &mut tx,
            &txn,
            corporate_wallet.id,
            txn.corporate_share,
            BalanceBucket::Available,
            actor,
        )
        .await?;

        // Balancing row: the gross goes back to the guest.
        let refund_credit = crate::domain::EntryDraft::new(
            &txn.id,
            AccountType::Refund,
            EntryType::Credit,
            txn.gross_amount,
            &txn.currency,
        )
        .with_booking(&txn.booking_id)
        .with_description(format!("refund of booking {}", txn.booking_id));
        LedgerService::create_entry_in(&mut tx, refund_credit).await?;

        let now = Utc::now();
        Repository::update_settlement_status_in(&mut tx, &txn.id, SettlementStatus::Refunded, now)
            .await?;
        let draft = AuditDraft::new("settlement_refunded", AuditCategory::Settlement, actor, &txn.id)
            .with_before(json!({ "status": txn.status.as_str() }))
            .with_after(json!({ "status": SettlementStatus::Refunded.as_str(), "gross": txn.gross_amount }));
        AuditLogService::record_in(&mut tx, draft).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;

        txn.status = SettlementStatus::Refunded;
        txn.updated_at = now;
        warn!(transaction_id = %txn.id, booking_id, gross = %txn.gross_amount, "settlement refunded");
        Ok(txn)
    }

    async fn debit_share_in(
        conn: &mut SqliteConnection,
        txn: &SettlementTransaction,
        wallet_id: crate::domain::WalletId,
        amount: Decimal,
        bucket: BalanceBucket,
        actor: &str,
    ) -> Result<(), AppError> {
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        let updated = WalletService::apply_in(
            conn,
            wallet_id,
            WalletOp::Debit(bucket),
            amount,
            actor,
            &format!("refund of {}", txn.id),
        )
        .await?;
        let after = updated.total_balance();
        let draft = wallet_debit_draft(&txn.id, wallet_id, AccountType::Refund, amount, &txn.currency)
            .with_booking(&txn.booking_id)
            .with_balances(after + amount, after);
        LedgerService::create_entry_in(conn, draft).await?;
        Ok(())
    }

    pub async fn get(&self, transaction_id: &str) -> Result<SettlementTransaction, AppError> {
        self.repo
            .get_settlement(transaction_id)
            .await?
            .ok_or_else(|| AppError::not_found("settlement", transaction_id))
    }

    pub async fn get_by_booking(&self, booking_id: &str) -> Result<SettlementTransaction, AppError> {
        self.repo
            .get_settlement_by_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::not_found("settlement", booking_id))
    }

    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<SettlementTransaction>, AppError> {
        Ok(self.repo.list_settlements_by_owner(owner_id).await?)
    }
}
