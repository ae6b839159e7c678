mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use common::{seed_marketplace, settle_request, test_core};
use gojo_settlement::application::AppError;
use gojo_settlement::domain::{BalanceBucket, OwnerType, PayoutMethod, PayoutStatus};

async fn settled_core() -> Result<(gojo_settlement::SettlementCore, tempfile::TempDir)> {
    let (mut core, temp) = test_core().await?;
    seed_marketplace(&mut core);
    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;
    Ok((core, temp))
}

#[tokio::test]
async fn test_owner_payout_debits_wallet_immediately() -> Result<()> {
    let (core, _temp) = settled_core().await?;

    // Owner has 800.00 available
    let payout = core
        .payouts
        .create_owner_payout("owner-1", "ETB", Decimal::new(500, 0), PayoutMethod::BankTransfer, false, "test")
        .await?;

    assert_eq!(payout.status, PayoutStatus::Pending);
    assert_eq!(payout.fee, Decimal::new(2500, 2));
    assert_eq!(payout.withholding_tax, Decimal::ZERO);
    assert_eq!(payout.net_amount, Decimal::new(47500, 2)); // 500 - 25

    let owner = core.wallets.get_by_owner("owner-1", "ETB").await?;
    assert_eq!(owner.available_balance, Decimal::new(30000, 2));

    Ok(())
}

#[tokio::test]
async fn test_owner_payout_with_withholding() -> Result<()> {
    let (core, _temp) = settled_core().await?;

    let payout = core
        .payouts
        .create_owner_payout("owner-1", "ETB", Decimal::new(100, 0), PayoutMethod::Telebirr, true, "test")
        .await?;

    assert_eq!(payout.fee, Decimal::new(500, 2));
    assert_eq!(payout.withholding_tax, Decimal::new(1000, 2)); // 10% of 100
    assert_eq!(payout.net_amount, Decimal::new(8500, 2)); // 100 - 5 - 10

    Ok(())
}

#[tokio::test]
async fn test_payout_rejected_when_below_fees() -> Result<()> {
    let (core, _temp) = settled_core().await?;

    let err = core
        .payouts
        .create_owner_payout("owner-1", "ETB", Decimal::new(20, 0), PayoutMethod::BankTransfer, false, "test")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn test_payout_rejected_when_insufficient_balance() -> Result<()> {
    let (core, _temp) = settled_core().await?;

    let err = core
        .payouts
        .create_owner_payout("owner-1", "ETB", Decimal::new(900, 0), PayoutMethod::Telebirr, false, "test")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientBalance { .. }));

    // Nothing was debited by the failed attempt
    let owner = core.wallets.get_by_owner("owner-1", "ETB").await?;
    assert_eq!(owner.available_balance, Decimal::new(80000, 2));

    Ok(())
}

#[tokio::test]
async fn test_payout_lifecycle_to_completed() -> Result<()> {
    let (core, _temp) = settled_core().await?;
    let payout = core
        .payouts
        .create_owner_payout("owner-1", "ETB", Decimal::new(100, 0), PayoutMethod::Telebirr, false, "test")
        .await?;

    let processing = core.payouts.mark_processing(payout.id, "test").await?;
    assert_eq!(processing.status, PayoutStatus::Processing);
    assert!(processing.processed_at.is_some());

    let completed = core.payouts.mark_completed(payout.id, "test").await?;
    assert_eq!(completed.status, PayoutStatus::Completed);
    assert!(completed.completed_at.is_some());

    // Completed is terminal
    let err = core.payouts.mark_failed(payout.id, "too late", "test").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn test_invalid_transition_pending_to_completed() -> Result<()> {
    let (core, _temp) = settled_core().await?;
    let payout = core
        .payouts
        .create_owner_payout("owner-1", "ETB", Decimal::new(100, 0), PayoutMethod::Telebirr, false, "test")
        .await?;

    let err = core.payouts.mark_completed(payout.id, "test").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn test_failed_payout_returns_funds_to_available() -> Result<()> {
    let (core, _temp) = settled_core().await?;
    let payout = core
        .payouts
        .create_owner_payout("owner-1", "ETB", Decimal::new(200, 0), PayoutMethod::Telebirr, false, "test")
        .await?;
    core.payouts.mark_processing(payout.id, "test").await?;

    let before = core.wallets.get_by_owner("owner-1", "ETB").await?;
    assert_eq!(before.available_balance, Decimal::new(60000, 2));

    let failed = core.payouts.mark_failed(payout.id, "rail rejected account", "test").await?;
    assert_eq!(failed.status, PayoutStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("rail rejected account"));

    let after = core.wallets.get_by_owner("owner-1", "ETB").await?;
    assert_eq!(after.available_balance, Decimal::new(80000, 2));

    Ok(())
}

#[tokio::test]
async fn test_weekly_dellala_sweep_pays_full_balance_with_withholding() -> Result<()> {
    let (core, _temp) = settled_core().await?;

    let period_start = Utc::now() - Duration::days(7);
    let period_end = Utc::now();
    let summary = core
        .payouts
        .process_weekly_dellala_payouts(period_start, period_end, "scheduler")
        .await?;

    assert_eq!(summary.created.len(), 1);
    assert_eq!(summary.skipped, 0);
    let payout = &summary.created[0];
    assert_eq!(payout.recipient_id, "agent-1");
    assert_eq!(payout.recipient_type, OwnerType::Dellala);
    assert_eq!(payout.amount, Decimal::new(5000, 2)); // full balance
    assert_eq!(payout.withholding_tax, Decimal::new(500, 2)); // always 10%
    assert_eq!(payout.batch_id.as_deref(), Some(summary.batch_id.as_str()));

    let dellala = core.wallets.get_by_owner("agent-1", "ETB").await?;
    assert_eq!(dellala.available_balance, Decimal::ZERO);

    // Batch is queryable
    let batch = core.payouts.list_by_batch(&summary.batch_id).await?;
    assert_eq!(batch.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_sweep_skips_empty_and_locked_wallets() -> Result<()> {
    let (core, _temp) = settled_core().await?;

    // Empty dellala wallet: created but never credited
    core.wallets.get_or_create("agent-empty", OwnerType::Dellala, "ETB").await?;
    // Locked dellala wallet with a balance
    let locked = core.wallets.get_or_create("agent-locked", OwnerType::Dellala, "ETB").await?;
    core.wallets
        .credit(locked.id, Decimal::new(100, 0), BalanceBucket::Available, "test", "earning")
        .await?;
    core.wallets.lock_wallet(locked.id, "admin").await?;

    let summary = core
        .payouts
        .process_weekly_dellala_payouts(Utc::now() - Duration::days(7), Utc::now(), "scheduler")
        .await?;

    // agent-1 paid; the locked wallet was skipped, the empty one ignored
    assert_eq!(summary.created.len(), 1);
    assert_eq!(summary.skipped, 1);

    let still_locked = core.wallets.get(locked.id).await?;
    assert_eq!(still_locked.available_balance, Decimal::new(100, 0));

    Ok(())
}

#[tokio::test]
async fn test_sweep_lease_blocks_overlapping_runs() -> Result<()> {
    let (core, _temp) = settled_core().await?;

    // Simulate a run holding the lease
    assert!(
        core.repository()
            .try_acquire_lease("weekly_dellala_payouts", "other-run", chrono::Duration::minutes(10))
            .await?
    );

    let err = core
        .payouts
        .process_weekly_dellala_payouts(Utc::now() - Duration::days(7), Utc::now(), "scheduler")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyRunning(_)));

    // Released lease frees the job
    core.repository().release_lease("weekly_dellala_payouts", "other-run").await?;
    let summary = core
        .payouts
        .process_weekly_dellala_payouts(Utc::now() - Duration::days(7), Utc::now(), "scheduler")
        .await?;
    assert_eq!(summary.created.len(), 1);

    Ok(())
}
