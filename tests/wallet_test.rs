mod common;

use anyhow::Result;
use rust_decimal::Decimal;

use common::test_core;
use gojo_settlement::application::AppError;
use gojo_settlement::domain::{BalanceBucket, OwnerType};

#[tokio::test]
async fn test_get_or_create_is_idempotent() -> Result<()> {
    let (core, _temp) = test_core().await?;

    let first = core.wallets.get_or_create("owner-1", OwnerType::Owner, "ETB").await?;
    let second = core.wallets.get_or_create("owner-1", OwnerType::Owner, "ETB").await?;
    assert_eq!(first.id, second.id);

    // A different currency gets its own wallet
    let usd = core.wallets.get_or_create("owner-1", OwnerType::Owner, "USD").await?;
    assert_ne!(usd.id, first.id);

    Ok(())
}

#[tokio::test]
async fn test_credit_and_debit() -> Result<()> {
    let (core, _temp) = test_core().await?;
    let wallet = core.wallets.get_or_create("owner-1", OwnerType::Owner, "ETB").await?;

    let after_credit = core
        .wallets
        .credit(wallet.id, Decimal::new(500, 0), BalanceBucket::Available, "test", "earning")
        .await?;
    assert_eq!(after_credit.available_balance, Decimal::new(500, 0));
    assert_eq!(after_credit.total_earnings, Decimal::new(500, 0));

    let after_debit = core
        .wallets
        .debit(wallet.id, Decimal::new(200, 0), BalanceBucket::Available, "test", "withdrawal")
        .await?;
    assert_eq!(after_debit.available_balance, Decimal::new(300, 0));
    assert_eq!(after_debit.total_withdrawals, Decimal::new(200, 0));
    assert!(after_debit.verify_balance_hash());

    Ok(())
}

#[tokio::test]
async fn test_debit_rejects_insufficient_balance() -> Result<()> {
    let (core, _temp) = test_core().await?;
    let wallet = core.wallets.get_or_create("owner-1", OwnerType::Owner, "ETB").await?;
    core.wallets
        .credit(wallet.id, Decimal::new(100, 0), BalanceBucket::Available, "test", "earning")
        .await?;

    let err = core
        .wallets
        .debit(wallet.id, Decimal::new(101, 0), BalanceBucket::Available, "test", "too much")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientBalance { .. }));

    // Balance unchanged after the rejected debit
    let wallet = core.wallets.get(wallet.id).await?;
    assert_eq!(wallet.available_balance, Decimal::new(100, 0));

    Ok(())
}

#[tokio::test]
async fn test_freeze_and_unfreeze_move_between_buckets() -> Result<()> {
    let (core, _temp) = test_core().await?;
    let wallet = core.wallets.get_or_create("owner-1", OwnerType::Owner, "ETB").await?;
    core.wallets
        .credit(wallet.id, Decimal::new(300, 0), BalanceBucket::Available, "test", "earning")
        .await?;

    let frozen = core.wallets.freeze(wallet.id, Decimal::new(120, 0), "test", "hold").await?;
    assert_eq!(frozen.available_balance, Decimal::new(180, 0));
    assert_eq!(frozen.frozen_balance, Decimal::new(120, 0));
    assert_eq!(frozen.total_balance(), Decimal::new(300, 0));

    let released = core.wallets.unfreeze(wallet.id, Decimal::new(120, 0), "test", "release").await?;
    assert_eq!(released.available_balance, Decimal::new(300, 0));
    assert_eq!(released.frozen_balance, Decimal::ZERO);

    // Cannot unfreeze more than is frozen
    let err = core
        .wallets
        .unfreeze(wallet.id, Decimal::new(1, 0), "test", "nothing held")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientBalance { .. }));

    Ok(())
}

#[tokio::test]
async fn test_rejects_non_positive_amounts() -> Result<()> {
    let (core, _temp) = test_core().await?;
    let wallet = core.wallets.get_or_create("owner-1", OwnerType::Owner, "ETB").await?;

    let err = core
        .wallets
        .credit(wallet.id, Decimal::ZERO, BalanceBucket::Available, "test", "zero")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = core
        .wallets
        .debit(wallet.id, Decimal::new(-5, 0), BalanceBucket::Available, "test", "negative")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn test_locked_wallet_rejects_mutations_but_keeps_funds() -> Result<()> {
    let (core, _temp) = test_core().await?;
    let wallet = core.wallets.get_or_create("owner-1", OwnerType::Owner, "ETB").await?;
    core.wallets
        .credit(wallet.id, Decimal::new(100, 0), BalanceBucket::Available, "test", "earning")
        .await?;

    core.wallets.lock_wallet(wallet.id, "admin").await?;
    let err = core
        .wallets
        .debit(wallet.id, Decimal::new(10, 0), BalanceBucket::Available, "test", "blocked")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::WalletFrozen(_)));

    let locked = core.wallets.get(wallet.id).await?;
    assert_eq!(locked.available_balance, Decimal::new(100, 0));

    core.wallets.unlock_wallet(wallet.id, "admin").await?;
    core.wallets
        .debit(wallet.id, Decimal::new(10, 0), BalanceBucket::Available, "test", "unblocked")
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_integrity_check_detects_tampered_balance() -> Result<()> {
    let (core, _temp) = test_core().await?;
    let wallet = core.wallets.get_or_create("owner-1", OwnerType::Owner, "ETB").await?;
    core.wallets
        .credit(wallet.id, Decimal::new(100, 0), BalanceBucket::Available, "test", "earning")
        .await?;
    assert!(core.wallets.verify_integrity(wallet.id, "sweep").await?);

    // Tamper with the stored balance behind the hash's back
    let mut tampered = core.wallets.get(wallet.id).await?;
    let stored_hash = tampered.last_balance_hash.clone();
    tampered.available_balance += Decimal::new(999, 0);
    let mut tx = core.repository().begin().await?;
    assert!(
        gojo_settlement::Repository::update_wallet_guarded_in(&mut tx, &tampered, &stored_hash)
            .await?
    );
    tx.commit().await?;

    assert!(!core.wallets.verify_integrity(wallet.id, "sweep").await?);

    Ok(())
}

#[tokio::test]
async fn test_balance_write_back_preserves_admin_lock() -> Result<()> {
    let (core, _temp) = test_core().await?;
    let wallet = core.wallets.get_or_create("owner-1", OwnerType::Owner, "ETB").await?;
    core.wallets
        .credit(wallet.id, Decimal::new(100, 0), BalanceBucket::Available, "test", "earning")
        .await?;

    // Snapshot loaded before the admin lock lands
    let stale = core.wallets.get(wallet.id).await?;
    core.wallets.lock_wallet(wallet.id, "admin").await?;

    let mut tx = core.repository().begin().await?;
    assert!(
        gojo_settlement::Repository::update_wallet_guarded_in(
            &mut tx,
            &stale,
            &stale.last_balance_hash
        )
        .await?
    );
    tx.commit().await?;

    // The write-back carries balances only; the lock stays engaged
    let current = core.wallets.get(wallet.id).await?;
    assert!(current.is_locked());

    Ok(())
}

#[tokio::test]
async fn test_mutation_refuses_tampered_wallet() -> Result<()> {
    let (core, _temp) = test_core().await?;
    let wallet = core.wallets.get_or_create("owner-1", OwnerType::Owner, "ETB").await?;
    core.wallets
        .credit(wallet.id, Decimal::new(100, 0), BalanceBucket::Available, "test", "earning")
        .await?;

    let mut tampered = core.wallets.get(wallet.id).await?;
    let stored_hash = tampered.last_balance_hash.clone();
    tampered.available_balance += Decimal::new(999, 0);
    let mut tx = core.repository().begin().await?;
    gojo_settlement::Repository::update_wallet_guarded_in(&mut tx, &tampered, &stored_hash).await?;
    tx.commit().await?;

    let err = core
        .wallets
        .credit(wallet.id, Decimal::new(10, 0), BalanceBucket::Available, "test", "earning")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Integrity { .. }));

    // Tampered state is left for an operator, not papered over
    let unchanged = core.wallets.get(wallet.id).await?;
    assert_eq!(unchanged.available_balance, Decimal::new(1099, 0));
    assert!(!unchanged.verify_balance_hash());

    Ok(())
}
