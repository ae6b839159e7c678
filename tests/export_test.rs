mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use common::{seed_marketplace, settle_request, test_core};
use gojo_settlement::domain::PeriodType;
use gojo_settlement::io::Exporter;

fn window() -> (chrono::DateTime<Utc>, chrono::DateTime<Utc>) {
    (Utc::now() - Duration::hours(1), Utc::now() + Duration::hours(1))
}

#[tokio::test]
async fn test_audit_csv_has_one_row_per_entry() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);
    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;

    let logs = core.audit.list(None, None).await?;
    assert!(!logs.is_empty());

    let mut buffer = Vec::new();
    let count = Exporter::new(&core).export_audit_csv(&mut buffer, None, None).await?;
    assert_eq!(count, logs.len());

    let output = String::from_utf8(buffer)?;
    let lines: Vec<&str> = output.lines().collect();
    // Header plus one row per audit entry
    assert_eq!(lines.len(), logs.len() + 1);
    assert!(lines[0].starts_with("sequence,action,category,actor"));
    assert!(lines.iter().any(|l| l.contains("settlement_created")));

    Ok(())
}

#[tokio::test]
async fn test_settlement_csv_carries_the_split() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);
    let txn = core
        .settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;

    let (start, end) = window();
    let mut buffer = Vec::new();
    let count = Exporter::new(&core)
        .export_settlements_csv(&mut buffer, start, end)
        .await?;
    assert_eq!(count, 1);

    let mut reader = csv::Reader::from_reader(buffer.as_slice());
    let record = reader.records().next().expect("one settlement row")?;
    assert_eq!(&record[0], txn.id.as_str());
    assert_eq!(&record[1], "bk-1");
    assert_eq!(&record[2], "1000.00");
    assert_eq!(&record[4], "800.00"); // owner share
    assert_eq!(&record[5], "50.00"); // dellala share
    assert_eq!(&record[6], "150.00"); // corporate share

    Ok(())
}

#[tokio::test]
async fn test_wallet_balances_csv_lists_every_wallet() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);
    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;

    let mut buffer = Vec::new();
    let count = Exporter::new(&core).export_wallet_balances_csv(&mut buffer).await?;
    // owner, dellala, corporate
    assert_eq!(count, 3);

    let output = String::from_utf8(buffer)?;
    assert!(output.contains("owner-1"));
    assert!(output.contains("agent-1"));
    assert!(output.contains("corporate"));

    Ok(())
}

#[tokio::test]
async fn test_compliance_json_snapshot() -> Result<()> {
    let (mut core, _temp) = test_core().await?;
    seed_marketplace(&mut core);
    core.settlements
        .settle_booking(core.directory(), settle_request("bk-1", false), "test")
        .await?;
    let (start, end) = window();
    core.reconciliation.run(PeriodType::Daily, start, end, "sweep").await?;

    let mut buffer = Vec::new();
    let snapshot = Exporter::new(&core)
        .export_compliance_json(&mut buffer, start, end)
        .await?;

    assert_eq!(snapshot.settlements.len(), 1);
    // guest debit, three share credits, vat and withholding postings
    assert_eq!(snapshot.ledger_entries.len(), 6);
    assert_eq!(snapshot.reconciliations.len(), 1);
    assert!(!snapshot.audit_logs.is_empty());
    assert_eq!(snapshot.settlements[0].gross_amount, Decimal::new(1000, 0));

    // The written bytes round-trip as JSON
    let parsed: serde_json::Value = serde_json::from_slice(&buffer)?;
    assert_eq!(parsed["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(parsed["settlements"].as_array().map(|a| a.len()), Some(1));

    Ok(())
}
