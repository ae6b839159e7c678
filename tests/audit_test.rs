mod common;

use anyhow::Result;
use rust_decimal::Decimal;

use common::{seed_marketplace, seed_usd_booking, settle_request, test_core};
use gojo_settlement::domain::{AuditCategory, BalanceBucket, OwnerType};

#[tokio::test]
async fn test_every_mutation_leaves_an_audit_trail() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "operator")
        .await?;

    let logs = core.audit.list(None, None).await?;
    // 3 wallet credits + the settlement row
    assert!(logs.len() >= 4);
    assert!(logs.iter().any(|l| l.action == "settlement_created"));
    assert_eq!(logs.iter().filter(|l| l.action == "wallet_credit").count(), 3);
    assert!(logs.iter().all(|l| l.actor == "operator"));

    Ok(())
}

#[tokio::test]
async fn test_audit_chain_stays_valid_across_operations() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", true), "test")
        .await?;
    core.settlements.unfreeze_on_checkout("bk-1", "test").await?;
    core.fx.set_rate("USD", "ETB", Decimal::new(5700, 2), None, "nbe", "test").await?;
    let wallet = core.wallets.get_or_create("extra", OwnerType::Owner, "ETB").await?;
    core.wallets
        .credit(wallet.id, Decimal::new(10, 0), BalanceBucket::Available, "test", "seed")
        .await?;

    assert_eq!(core.audit.verify_chain().await?, None);

    // Sequences are dense and ordered
    let logs = core.audit.list(None, None).await?;
    for (i, log) in logs.iter().enumerate() {
        assert_eq!(log.sequence, i as i64 + 1);
    }

    Ok(())
}

#[tokio::test]
async fn test_converted_settlement_audits_the_fx_conversion() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_usd_booking(&mut core);

    let txn = core
        .settlements
        .settle_booking(core.directory(), settle_request("bk-usd", false), "test")
        .await?;

    let fx_logs = core.audit.list(Some(AuditCategory::Fx), None).await?;
    assert_eq!(fx_logs.len(), 1);
    let log = &fx_logs[0];
    assert_eq!(log.action, "fx_conversion");
    assert_eq!(log.target_id, txn.id);

    let after = log.after.as_ref().unwrap();
    assert_eq!(after["original_amount"], serde_json::json!("100"));
    assert_eq!(after["original_currency"], serde_json::json!("USD"));
    assert_eq!(after["rate"], serde_json::json!("56.50"));
    assert_eq!(after["converted_amount"], serde_json::json!("5650.00"));

    Ok(())
}

#[tokio::test]
async fn test_category_filter_and_limit() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);
    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;
    core.fx.set_rate("USD", "ETB", Decimal::new(5700, 2), None, "nbe", "test").await?;

    let fx_logs = core.audit.list(Some(AuditCategory::Fx), None).await?;
    assert_eq!(fx_logs.len(), 1);
    assert_eq!(fx_logs[0].action, "fx_rate_set");

    let limited = core.audit.list(None, Some(2)).await?;
    assert_eq!(limited.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_wallet_audit_carries_before_and_after_state() -> Result<()> {
    let (core, _temp) = test_core().await?;
    let wallet = core.wallets.get_or_create("owner-1", OwnerType::Owner, "ETB").await?;
    core.wallets
        .credit(wallet.id, Decimal::new(250, 0), BalanceBucket::Available, "test", "earning")
        .await?;

    let logs = core.audit.list(Some(AuditCategory::Wallet), None).await?;
    let credit_log = logs.iter().find(|l| l.action == "wallet_credit").unwrap();
    assert_eq!(credit_log.target_id, wallet.id.to_string());

    let before = credit_log.before.as_ref().unwrap();
    let after = credit_log.after.as_ref().unwrap();
    assert_eq!(before["available"], serde_json::json!("0"));
    assert_eq!(after["available"], serde_json::json!("250"));
    assert_eq!(after["note"], serde_json::json!("earning"));

    Ok(())
}
