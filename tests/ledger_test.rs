mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use common::{seed_marketplace, settle_request, test_core};
use gojo_settlement::application::AppError;
use gojo_settlement::domain::{AccountType, ChainViolationKind, EntryDraft, EntryType};

#[tokio::test]
async fn test_chains_valid_after_settlement_and_refund() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;
    core.settlements.refund_transaction("bk-1", "test").await?;

    let reports = core.ledger.verify_all_chains().await?;
    assert_eq!(reports.len(), 4); // global + 3 wallets
    for report in &reports {
        assert!(report.is_valid(), "chain {:?} broken", report.wallet_id);
        assert!(report.entries_checked > 0);
    }

    Ok(())
}

#[tokio::test]
async fn test_tampered_entry_detected() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    let txn = core
        .settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;
    let entries = core.ledger.entries_for_transaction(&txn.id).await?;
    let owner_entry = entries
        .iter()
        .find(|e| e.account_type == AccountType::OwnerEarning)
        .unwrap();
    core.repository()
        .corrupt_entry_hash(owner_entry.id, "deadbeef")
        .await?;

    let report = core.ledger.verify_chain(owner_entry.wallet_id).await?;
    let violation = report.violation.expect("tampering must be detected");
    assert_eq!(violation.entry_id, owner_entry.id);
    assert_eq!(violation.kind, ChainViolationKind::TamperedEntry);

    // Other chains are untouched
    assert!(core.ledger.verify_chain(None).await?.is_valid());

    Ok(())
}

#[tokio::test]
async fn test_double_entry_must_balance() -> Result<()> {
    let (core, _temp) = test_core().await?;

    let debit = EntryDraft::new("txn-x", AccountType::GuestPayment, EntryType::Debit, Decimal::new(100, 0), "ETB");
    let credit = EntryDraft::new("txn-x", AccountType::Refund, EntryType::Credit, Decimal::new(90, 0), "ETB");
    let err = core.ledger.record_double_entry("txn-x", debit, credit).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let debit = EntryDraft::new("txn-y", AccountType::GuestPayment, EntryType::Debit, Decimal::new(100, 0), "ETB");
    let credit = EntryDraft::new("txn-y", AccountType::Refund, EntryType::Credit, Decimal::new(100, 0), "ETB");
    let (d, c) = core.ledger.record_double_entry("txn-y", debit, credit).await?;
    assert_eq!(d.transaction_id, "txn-y");
    assert!(c.sequence > d.sequence);

    Ok(())
}

#[tokio::test]
async fn test_window_totals_balance_and_skip_tax_rows() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;

    let start = Utc::now() - Duration::hours(1);
    let end = Utc::now() + Duration::hours(1);
    let (debits, credits) = core.ledger.window_totals(start, end).await?;

    // Gross debit equals the three share credits; vat/withholding rows are
    // informational and excluded.
    assert_eq!(debits, Decimal::new(1000, 0));
    assert_eq!(credits, Decimal::new(1000, 0));

    Ok(())
}

#[tokio::test]
async fn test_sequences_are_strictly_increasing() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);

    let txn = core
        .settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;
    let entries = core.ledger.entries_for_transaction(&txn.id).await?;
    for pair in entries.windows(2) {
        assert!(pair[1].sequence > pair[0].sequence);
    }

    Ok(())
}
