mod common;

use anyhow::Result;
use rust_decimal::Decimal;

use common::{seed_expired_agent_booking, seed_marketplace, seed_usd_booking, settle_request, test_core};
use gojo_settlement::application::AppError;
use gojo_settlement::domain::SettlementStatus;

#[tokio::test]
async fn test_settle_with_active_dellala() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    let txn = core
        .settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;

    // 1000 ETB: 15% corporate, 5% dellala, 80% owner
    assert_eq!(txn.gross_amount, Decimal::new(1000, 0));
    assert_eq!(txn.owner_share, Decimal::new(80000, 2));
    assert_eq!(txn.dellala_share, Decimal::new(5000, 2));
    assert_eq!(txn.corporate_share, Decimal::new(15000, 2));
    assert_eq!(txn.vat_amount, Decimal::new(2250, 2));
    assert_eq!(txn.withholding_tax, Decimal::new(1500, 2));
    assert_eq!(txn.status, SettlementStatus::Settled);
    assert_eq!(txn.dellala_id.as_deref(), Some("agent-1"));
    assert!(txn.fx_rate.is_none());

    // Shares landed in the available buckets
    let owner = core.wallets.get_by_owner("owner-1", "ETB").await?;
    assert_eq!(owner.available_balance, Decimal::new(80000, 2));
    assert_eq!(owner.frozen_balance, Decimal::ZERO);
    let dellala = core.wallets.get_by_owner("agent-1", "ETB").await?;
    assert_eq!(dellala.available_balance, Decimal::new(5000, 2));
    let corporate = core.wallets.get_by_owner("corporate", "ETB").await?;
    assert_eq!(corporate.available_balance, Decimal::new(15000, 2));

    Ok(())
}

#[tokio::test]
async fn test_settle_duplicate_booking_rejected() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;
    let err = core
        .settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateOperation(_)));

    Ok(())
}

#[tokio::test]
async fn test_settle_unknown_booking() -> Result<()> {
    let (core, _temp) = test_core().await?;
    let err = core
        .settlements
        .settle_booking(core.directory(), settle_request("missing", false), "test")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { kind: "booking", .. }));
    Ok(())
}

#[tokio::test]
async fn test_expired_dellala_earns_nothing() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_expired_agent_booking(&mut core);

    let txn = core
        .settlements
        .settle_booking(core.directory(), settle_request("bk-old", false), "test")
        .await?;

    assert_eq!(txn.dellala_share, Decimal::ZERO);
    // The lapsed agent is still recorded on the transaction
    assert_eq!(txn.dellala_id.as_deref(), Some("agent-old"));
    assert_eq!(txn.owner_share, Decimal::new(85000, 2));

    // No dellala wallet was created
    let err = core.wallets.get_by_owner("agent-old", "ETB").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));

    Ok(())
}

#[tokio::test]
async fn test_settle_usd_booking_converts_via_fallback() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_usd_booking(&mut core);

    let txn = core
        .settlements
        .settle_booking(core.directory(), settle_request("bk-usd", false), "test")
        .await?;

    // 100 USD * 56.50 fallback = 5650 ETB
    assert_eq!(txn.gross_amount, Decimal::new(565000, 2));
    assert_eq!(txn.currency, "ETB");
    assert_eq!(txn.original_amount, Some(Decimal::new(100, 0)));
    assert_eq!(txn.original_currency.as_deref(), Some("USD"));
    assert_eq!(txn.fx_rate, Some(Decimal::new(5650, 2)));
    assert_eq!(txn.corporate_share, Decimal::new(84750, 2)); // 15% of 5650

    Ok(())
}

#[tokio::test]
async fn test_settle_usd_booking_uses_stored_rate() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_usd_booking(&mut core);
    core.fx
        .set_rate("USD", "ETB", Decimal::new(6000, 2), None, "nbe", "test")
        .await?;

    let txn = core
        .settlements
        .settle_booking(core.directory(), settle_request("bk-usd", false), "test")
        .await?;

    assert_eq!(txn.gross_amount, Decimal::new(600000, 2)); // 100 * 60.00
    assert_eq!(txn.fx_rate, Some(Decimal::new(6000, 2)));

    Ok(())
}

#[tokio::test]
async fn test_freeze_and_checkout_release() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    let txn = core
        .settlements
        .settle_booking(core.directory(), settle_request("bk-1", true), "test")
        .await?;
    assert_eq!(txn.status, SettlementStatus::Frozen);

    // Owner and dellala shares are held; corporate is spendable at once
    let owner = core.wallets.get_by_owner("owner-1", "ETB").await?;
    assert_eq!(owner.available_balance, Decimal::ZERO);
    assert_eq!(owner.frozen_balance, Decimal::new(80000, 2));
    let corporate = core.wallets.get_by_owner("corporate", "ETB").await?;
    assert_eq!(corporate.available_balance, Decimal::new(15000, 2));

    let released = core.settlements.unfreeze_on_checkout("bk-1", "test").await?;
    assert_eq!(released.status, SettlementStatus::Unfrozen);

    let owner = core.wallets.get_by_owner("owner-1", "ETB").await?;
    assert_eq!(owner.available_balance, Decimal::new(80000, 2));
    assert_eq!(owner.frozen_balance, Decimal::ZERO);
    let dellala = core.wallets.get_by_owner("agent-1", "ETB").await?;
    assert_eq!(dellala.available_balance, Decimal::new(5000, 2));
    assert_eq!(dellala.frozen_balance, Decimal::ZERO);

    // Checkout is one-shot
    let err = core.settlements.unfreeze_on_checkout("bk-1", "test").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));

    Ok(())
}

#[tokio::test]
async fn test_refund_settled_booking() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;
    let refunded = core.settlements.refund_transaction("bk-1", "test").await?;
    assert_eq!(refunded.status, SettlementStatus::Refunded);

    // All wallets back to zero
    for owner_id in ["owner-1", "agent-1", "corporate"] {
        let wallet = core.wallets.get_by_owner(owner_id, "ETB").await?;
        assert_eq!(wallet.available_balance, Decimal::ZERO, "{}", owner_id);
        assert_eq!(wallet.frozen_balance, Decimal::ZERO, "{}", owner_id);
    }

    // Second refund is rejected
    let err = core.settlements.refund_transaction("bk-1", "test").await.unwrap_err();
    assert!(matches!(err, AppError::DuplicateOperation(_)));

    Ok(())
}

#[tokio::test]
async fn test_refund_frozen_booking_debits_frozen_bucket() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", true), "test")
        .await?;
    core.settlements.refund_transaction("bk-1", "test").await?;

    let owner = core.wallets.get_by_owner("owner-1", "ETB").await?;
    assert_eq!(owner.frozen_balance, Decimal::ZERO);
    assert_eq!(owner.available_balance, Decimal::ZERO);

    Ok(())
}

#[tokio::test]
async fn test_refund_fails_when_owner_spent_the_money() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;

    // Owner withdraws most of their share before the refund
    let owner = core.wallets.get_by_owner("owner-1", "ETB").await?;
    core.wallets
        .debit(
            owner.id,
            Decimal::new(70000, 2),
            gojo_settlement::domain::BalanceBucket::Available,
            "test",
            "withdrawal",
        )
        .await?;

    let err = core.settlements.refund_transaction("bk-1", "test").await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientBalance { .. }));

    // The failed refund rolled back: nothing was clawed back anywhere
    let corporate = core.wallets.get_by_owner("corporate", "ETB").await?;
    assert_eq!(corporate.available_balance, Decimal::new(15000, 2));
    let txn = core.settlements.get_by_booking("bk-1").await?;
    assert_eq!(txn.status, SettlementStatus::Settled);

    Ok(())
}

#[tokio::test]
async fn test_settlement_ledger_rows() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    let txn = core
        .settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;
    let entries = core.ledger.entries_for_transaction(&txn.id).await?;

    // guest debit + 3 share credits + vat + withholding
    assert_eq!(entries.len(), 6);
    let wallet_rows = entries.iter().filter(|e| e.wallet_id.is_some()).count();
    assert_eq!(wallet_rows, 3);
    for entry in &entries {
        assert_eq!(entry.booking_id.as_deref(), Some("bk-1"));
    }

    Ok(())
}
