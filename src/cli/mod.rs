use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{SettleRequest, SettlementCore};
use crate::domain::{format_amount, parse_amount, AuditCategory, OwnerType, PayoutMethod, PeriodType};

const CLI_ACTOR: &str = "cli";

/// Gojo Settlement - Marketplace financial settlement core
#[derive(Parser)]
#[command(name = "gojo-settlement")]
#[command(about = "Commission settlement, wallets, hash-chained ledger and payouts for a hospitality marketplace")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "gojo-settlement.db")]
    pub database: String,

    /// Marketplace directory file (bookings, properties, agents) as JSON
    #[arg(long)]
    pub directory: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Settle a booking payment: convert to ETB, split and credit wallets
    Settle {
        /// Booking ID to settle
        booking_id: String,

        /// Payment processor reference
        #[arg(long)]
        payment_ref: String,

        /// Payment method (telebirr, cbe, card, ...)
        #[arg(short, long, default_value = "telebirr")]
        method: String,

        /// Hold owner/dellala shares frozen until checkout
        #[arg(long)]
        freeze: bool,
    },

    /// Release a booking's frozen shares at checkout
    Checkout {
        /// Booking ID
        booking_id: String,
    },

    /// Refund a settled booking, clawing back every share
    Refund {
        /// Booking ID
        booking_id: String,
    },

    /// Show a settlement transaction
    Show {
        /// Booking ID
        booking_id: String,
    },

    /// Wallet management commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Payout management commands
    #[command(subcommand)]
    Payout(PayoutCommands),

    /// Exchange rate commands
    #[command(subcommand)]
    Rate(RateCommands),

    /// Run a reconciliation sweep over a settlement window
    Reconcile {
        /// Period type: daily, weekly, adhoc
        #[arg(short, long, default_value = "adhoc")]
        period: String,

        /// Window start (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// Window end (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        to: Option<String>,
    },

    /// Verify every ledger chain and the audit chain
    Verify,

    /// List audit log entries
    Audit {
        /// Filter by category (wallet, ledger, settlement, payout, fx, reconciliation, integrity)
        #[arg(short, long)]
        category: Option<String>,

        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Export data to CSV or JSON
    Export {
        /// What to export: settlements, balances, audit, compliance
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Window start for settlements/compliance (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Window end (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Show a wallet by owner
    Show {
        /// Owner ID
        owner_id: String,

        /// Currency code
        #[arg(short, long, default_value = "ETB")]
        currency: String,
    },

    /// List all wallets
    List {
        /// Filter by owner type: owner, dellala, corporate
        #[arg(short = 't', long = "type")]
        owner_type: Option<String>,
    },

    /// Administratively lock a wallet (rejects all mutations)
    Lock {
        /// Wallet ID
        id: String,
    },

    /// Release a wallet's administrative lock
    Unlock {
        /// Wallet ID
        id: String,
    },

    /// Verify balance hashes (one wallet, or all when no ID is given)
    Verify {
        /// Wallet ID
        id: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PayoutCommands {
    /// Create an on-demand owner payout
    Create {
        /// Owner ID
        owner_id: String,

        /// Amount to pay out (e.g., "500.00")
        amount: String,

        /// Payout method: bank_transfer, telebirr, cash
        #[arg(short, long, default_value = "bank_transfer")]
        method: String,

        /// Deduct 10% withholding tax
        #[arg(long)]
        withhold: bool,

        /// Currency code
        #[arg(short, long, default_value = "ETB")]
        currency: String,
    },

    /// Mark a payout as accepted by the rail (pending -> processing)
    Process {
        /// Payout ID
        id: String,
    },

    /// Mark a payout as delivered (processing -> completed)
    Complete {
        /// Payout ID
        id: String,
    },

    /// Mark a payout as failed; funds return to the wallet
    Fail {
        /// Payout ID
        id: String,

        /// Failure reason from the rail
        #[arg(short, long)]
        reason: String,
    },

    /// Show a payout
    Show {
        /// Payout ID
        id: String,
    },

    /// Run the weekly Dellala commission sweep
    WeeklyDellala {
        /// Period start (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// Period end (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum RateCommands {
    /// Set the active exchange rate for a currency pair
    Set {
        /// Source currency code (e.g., USD)
        from: String,

        /// Target currency code (e.g., ETB)
        to: String,

        /// Rate (e.g., "56.50")
        rate: String,

        /// Rate source tag
        #[arg(short, long, default_value = "manual")]
        source: String,

        /// Bank buy quote
        #[arg(long, requires = "sell")]
        buy: Option<String>,

        /// Bank sell quote
        #[arg(long, requires = "buy")]
        sell: Option<String>,
    },

    /// Show the active rate for a pair
    Show {
        /// Source currency code
        from: String,

        /// Target currency code
        to: String,

        /// Show the rate in force on this date instead (YYYY-MM-DD)
        #[arg(long)]
        at: Option<String>,
    },

    /// Convert an amount between currencies
    Convert {
        /// Amount (e.g., "100.00")
        amount: String,

        /// Source currency code
        from: String,

        /// Target currency code
        to: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        if matches!(self.command, Commands::Init) {
            SettlementCore::init(&self.database).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let mut core = SettlementCore::connect(&self.database).await?;
        if let Some(path) = &self.directory {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open directory file: {}", path))?;
            core.set_directory(crate::io::load_directory(file)?);
        }

        match self.command {
            Commands::Init => unreachable!(),

            Commands::Settle { booking_id, payment_ref, method, freeze } => {
                let request = SettleRequest {
                    booking_id,
                    payment_ref,
                    payment_method: method,
                    freeze_until_checkout: freeze,
                };
                let txn = core
                    .settlements
                    .settle_booking(core.directory(), request, CLI_ACTOR)
                    .await?;
                println!("Settled booking {} as {}", txn.booking_id, txn.id);
                print_settlement(&txn);
            }

            Commands::Checkout { booking_id } => {
                let txn = core.settlements.unfreeze_on_checkout(&booking_id, CLI_ACTOR).await?;
                println!(
                    "Released frozen shares for booking {}: owner {} dellala {}",
                    booking_id,
                    format_amount(txn.owner_share),
                    format_amount(txn.dellala_share)
                );
            }

            Commands::Refund { booking_id } => {
                let txn = core.settlements.refund_transaction(&booking_id, CLI_ACTOR).await?;
                println!(
                    "Refunded booking {}: {} {} clawed back",
                    booking_id,
                    format_amount(txn.gross_amount),
                    txn.currency
                );
            }

            Commands::Show { booking_id } => {
                let txn = core.settlements.get_by_booking(&booking_id).await?;
                print_settlement(&txn);
            }

            Commands::Wallet(cmd) => run_wallet_command(&core, cmd).await?,
            Commands::Payout(cmd) => run_payout_command(&core, cmd).await?,
            Commands::Rate(cmd) => run_rate_command(&core, cmd).await?,

            Commands::Reconcile { period, from, to } => {
                let period_type = PeriodType::from_str(&period)
                    .ok_or_else(|| anyhow::anyhow!("Invalid period type '{}'. Valid: daily, weekly, adhoc", period))?;
                let start = parse_date(&from)?;
                let end = to.as_deref().map(parse_date).transpose()?.unwrap_or_else(Utc::now);
                let record = core.reconciliation.run(period_type, start, end, CLI_ACTOR).await?;

                println!("Reconciliation {} ({})", record.id, record.status.as_str());
                println!("  Settlements:   {}", record.settlement_count);
                println!("  Gross total:   {}", format_amount(record.gross_total));
                println!("  Owner total:   {}", format_amount(record.owner_total));
                println!("  Dellala total: {}", format_amount(record.dellala_total));
                println!("  Corporate:     {}", format_amount(record.corporate_total));
                println!(
                    "  Ledger:        {} debit / {} credit",
                    format_amount(record.ledger_debit_total),
                    format_amount(record.ledger_credit_total)
                );
                if record.discrepancies.is_empty() {
                    println!("  No discrepancies.");
                } else {
                    println!("  DISCREPANCIES:");
                    for d in &record.discrepancies {
                        println!("    [{}] {}: {}", d.kind.as_str(), d.target_id, d.detail);
                    }
                }
            }

            Commands::Verify => {
                let reports = core.ledger.verify_all_chains().await?;
                let mut broken = 0;
                for report in &reports {
                    let label = report
                        .wallet_id
                        .map(|id| format!("wallet {}", id))
                        .unwrap_or_else(|| "global".to_string());
                    match &report.violation {
                        None => println!("OK    {} ({} entries)", label, report.entries_checked),
                        Some(v) => {
                            broken += 1;
                            println!("BROKEN {} at index {} ({:?})", label, v.index, v.kind);
                        }
                    }
                }
                match core.audit.verify_chain().await? {
                    None => println!("OK    audit chain"),
                    Some(index) => {
                        broken += 1;
                        println!("BROKEN audit chain at index {}", index);
                    }
                }
                if broken > 0 {
                    anyhow::bail!("{} chain(s) failed verification", broken);
                }
            }

            Commands::Audit { category, limit } => {
                let category = category
                    .as_deref()
                    .map(|s| {
                        AuditCategory::from_str(s)
                            .ok_or_else(|| anyhow::anyhow!("Invalid audit category '{}'", s))
                    })
                    .transpose()?;
                let logs = core.audit.list(category, limit).await?;
                if logs.is_empty() {
                    println!("No audit entries found.");
                } else {
                    println!("{:<8} {:<24} {:<14} {:<10} TARGET", "SEQ", "ACTION", "CATEGORY", "ACTOR");
                    println!("{}", "-".repeat(80));
                    for log in logs {
                        println!(
                            "{:<8} {:<24} {:<14} {:<10} {}",
                            log.sequence,
                            log.action,
                            log.category.as_str(),
                            log.actor,
                            log.target_id
                        );
                    }
                }
            }

            Commands::Export { export_type, output, from, to } => {
                run_export_command(&core, &export_type, output.as_deref(), from.as_deref(), to.as_deref())
                    .await?;
            }
        }

        Ok(())
    }
}

fn print_settlement(txn: &crate::domain::SettlementTransaction) {
    println!("Settlement: {}", txn.id);
    println!("  Booking:        {}", txn.booking_id);
    println!("  Status:         {}", txn.status);
    println!("  Gross:          {} {}", format_amount(txn.gross_amount), txn.currency);
    if let (Some(amount), Some(currency)) = (&txn.original_amount, &txn.original_currency) {
        println!(
            "  Original:       {} {} @ {}",
            format_amount(*amount),
            currency,
            txn.fx_rate.map(|r| r.to_string()).unwrap_or_default()
        );
    }
    println!("  Owner share:    {} ({})", format_amount(txn.owner_share), txn.owner_id);
    if let Some(dellala) = &txn.dellala_id {
        println!("  Dellala share:  {} ({})", format_amount(txn.dellala_share), dellala);
    }
    println!("  Corporate:      {}", format_amount(txn.corporate_share));
    println!("  VAT (info):     {}", format_amount(txn.vat_amount));
    println!("  Withholding:    {}", format_amount(txn.withholding_tax));
    println!("  Hash:           {}", txn.transaction_hash);
}

async fn run_wallet_command(core: &SettlementCore, cmd: WalletCommands) -> Result<()> {
    match cmd {
        WalletCommands::Show { owner_id, currency } => {
            let wallet = core.wallets.get_by_owner(&owner_id, &currency).await?;
            println!("Wallet: {}", wallet.id);
            println!("  Owner:       {} ({})", wallet.owner_id, wallet.owner_type);
            println!("  Currency:    {}", wallet.currency);
            println!("  Available:   {}", format_amount(wallet.available_balance));
            println!("  Frozen:      {}", format_amount(wallet.frozen_balance));
            println!("  Pending:     {}", format_amount(wallet.pending_balance));
            println!("  Earnings:    {}", format_amount(wallet.total_earnings));
            println!("  Withdrawals: {}", format_amount(wallet.total_withdrawals));
            println!("  Status:      {}", wallet.status.as_str());
        }

        WalletCommands::List { owner_type } => {
            let wallets = match owner_type.as_deref() {
                Some(s) => {
                    let ot = OwnerType::from_str(s).ok_or_else(|| {
                        anyhow::anyhow!("Invalid owner type '{}'. Valid: owner, dellala, corporate", s)
                    })?;
                    core.wallets.list_by_type(ot).await?
                }
                None => core.wallets.list().await?,
            };
            if wallets.is_empty() {
                println!("No wallets found.");
            } else {
                println!(
                    "{:<20} {:<10} {:<6} {:>14} {:>14} {:<8}",
                    "OWNER", "TYPE", "CCY", "AVAILABLE", "FROZEN", "STATUS"
                );
                println!("{}", "-".repeat(78));
                for wallet in wallets {
                    println!(
                        "{:<20} {:<10} {:<6} {:>14} {:>14} {:<8}",
                        wallet.owner_id,
                        wallet.owner_type.as_str(),
                        wallet.currency,
                        format_amount(wallet.available_balance),
                        format_amount(wallet.frozen_balance),
                        wallet.status.as_str()
                    );
                }
            }
        }

        WalletCommands::Lock { id } => {
            let wallet_id = parse_wallet_id(&id)?;
            core.wallets.lock_wallet(wallet_id, CLI_ACTOR).await?;
            println!("Locked wallet: {}", wallet_id);
        }

        WalletCommands::Unlock { id } => {
            let wallet_id = parse_wallet_id(&id)?;
            core.wallets.unlock_wallet(wallet_id, CLI_ACTOR).await?;
            println!("Unlocked wallet: {}", wallet_id);
        }

        WalletCommands::Verify { id: Some(id) } => {
            let wallet_id = parse_wallet_id(&id)?;
            if core.wallets.verify_integrity(wallet_id, CLI_ACTOR).await? {
                println!("Wallet {} balance hash is valid.", wallet_id);
            } else {
                anyhow::bail!("Wallet {} balance hash MISMATCH", wallet_id);
            }
        }

        WalletCommands::Verify { id: None } => {
            let snapshots = core.reconciliation.verify_all_wallets(CLI_ACTOR).await?;
            let mismatches: Vec<_> = snapshots.iter().filter(|s| !s.hash_valid).collect();
            println!("Checked {} wallet(s).", snapshots.len());
            for snapshot in &mismatches {
                println!("  MISMATCH {} ({})", snapshot.wallet_id, snapshot.owner_id);
            }
            if !mismatches.is_empty() {
                anyhow::bail!("{} wallet balance hash mismatch(es)", mismatches.len());
            }
        }
    }
    Ok(())
}

async fn run_payout_command(core: &SettlementCore, cmd: PayoutCommands) -> Result<()> {
    match cmd {
        PayoutCommands::Create { owner_id, amount, method, withhold, currency } => {
            let amount = parse_amount(&amount).context("Invalid amount format. Use '500.00' or '500'")?;
            let method = PayoutMethod::from_str(&method).ok_or_else(|| {
                anyhow::anyhow!("Invalid payout method '{}'. Valid: bank_transfer, telebirr, cash", method)
            })?;
            let payout = core
                .payouts
                .create_owner_payout(&owner_id, &currency, amount, method, withhold, CLI_ACTOR)
                .await?;
            println!("Created payout: {}", payout.id);
            println!(
                "  Amount {} - fee {} - withholding {} = net {}",
                format_amount(payout.amount),
                format_amount(payout.fee),
                format_amount(payout.withholding_tax),
                format_amount(payout.net_amount)
            );
        }

        PayoutCommands::Process { id } => {
            let payout = core.payouts.mark_processing(parse_payout_id(&id)?, CLI_ACTOR).await?;
            println!("Payout {} is now {}", payout.id, payout.status);
        }

        PayoutCommands::Complete { id } => {
            let payout = core.payouts.mark_completed(parse_payout_id(&id)?, CLI_ACTOR).await?;
            println!("Payout {} is now {}", payout.id, payout.status);
        }

        PayoutCommands::Fail { id, reason } => {
            let payout = core.payouts.mark_failed(parse_payout_id(&id)?, &reason, CLI_ACTOR).await?;
            println!(
                "Payout {} failed ({}); {} returned to wallet",
                payout.id,
                reason,
                format_amount(payout.amount)
            );
        }

        PayoutCommands::Show { id } => {
            let payout = core.payouts.get(parse_payout_id(&id)?).await?;
            println!("Payout: {}", payout.id);
            println!("  Recipient:   {} ({})", payout.recipient_id, payout.recipient_type);
            println!("  Amount:      {}", format_amount(payout.amount));
            println!("  Fee:         {}", format_amount(payout.fee));
            println!("  Withholding: {}", format_amount(payout.withholding_tax));
            println!("  Net:         {}", format_amount(payout.net_amount));
            println!("  Method:      {}", payout.method.as_str());
            println!("  Status:      {}", payout.status);
            if let Some(batch) = &payout.batch_id {
                println!("  Batch:       {}", batch);
            }
            if let Some(reason) = &payout.failure_reason {
                println!("  Failure:     {}", reason);
            }
        }

        PayoutCommands::WeeklyDellala { from, to } => {
            let start = parse_date(&from)?;
            let end = to.as_deref().map(parse_date).transpose()?.unwrap_or_else(Utc::now);
            let summary = core.payouts.process_weekly_dellala_payouts(start, end, CLI_ACTOR).await?;
            println!(
                "Batch {}: {} payouts created, {} wallets skipped",
                summary.batch_id,
                summary.created.len(),
                summary.skipped
            );
            for payout in &summary.created {
                println!(
                    "  {} -> {} net {}",
                    payout.recipient_id,
                    payout.method.as_str(),
                    format_amount(payout.net_amount)
                );
            }
        }
    }
    Ok(())
}

async fn run_rate_command(core: &SettlementCore, cmd: RateCommands) -> Result<()> {
    match cmd {
        RateCommands::Set { from, to, rate, source, buy, sell } => {
            let rate = parse_amount(&rate).context("Invalid rate format")?;
            let buy_sell = match (buy, sell) {
                (Some(buy), Some(sell)) => Some((
                    parse_amount(&buy).context("Invalid buy quote format")?,
                    parse_amount(&sell).context("Invalid sell quote format")?,
                )),
                _ => None,
            };
            let fx_rate = core.fx.set_rate(&from, &to, rate, buy_sell, &source, CLI_ACTOR).await?;
            println!(
                "Set rate {}/{} = {} (inverse {})",
                fx_rate.from_currency, fx_rate.to_currency, fx_rate.rate, fx_rate.inverse_rate
            );
        }

        RateCommands::Show { from, to, at } => {
            let rate = match at {
                Some(date) => core.fx.rate_at(&from, &to, parse_date(&date)?).await?,
                None => core.fx.active_rate(&from, &to).await?,
            };
            match rate {
                Some(rate) => {
                    println!("Rate {}/{}: {}", rate.from_currency, rate.to_currency, rate.rate);
                    println!("  Inverse:   {}", rate.inverse_rate);
                    if let (Some(buy), Some(sell)) = (rate.buy_rate, rate.sell_rate) {
                        println!("  Buy/Sell:  {} / {}", buy, sell);
                    }
                    println!("  Source:    {}", rate.source);
                    println!("  Effective: {}", rate.effective_from.format("%Y-%m-%d %H:%M:%S"));
                }
                None => println!("No rate for {}/{}", from.to_uppercase(), to.to_uppercase()),
            }
        }

        RateCommands::Convert { amount, from, to } => {
            let amount = parse_amount(&amount).context("Invalid amount format")?;
            let conversion = core.fx.convert(amount, &from, &to).await?;
            match conversion.rate {
                Some(rate) => println!(
                    "{} {} = {} {} @ {}",
                    format_amount(amount),
                    from.to_uppercase(),
                    format_amount(conversion.amount),
                    to.to_uppercase(),
                    rate
                ),
                None => println!("{} {} (no conversion needed)", format_amount(amount), from.to_uppercase()),
            }
        }
    }
    Ok(())
}

async fn run_export_command(
    core: &SettlementCore,
    export_type: &str,
    output: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    let exporter = Exporter::new(core);
    let start = from
        .map(parse_date)
        .transpose()?
        .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH);
    let end = to.map(parse_date).transpose()?.unwrap_or_else(Utc::now);

    let writer: Box<dyn Write> = match output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create output file: {}", path))?,
        ),
        None => Box::new(stdout()),
    };

    match export_type {
        "settlements" => {
            let count = exporter.export_settlements_csv(writer, start, end).await?;
            if output.is_some() {
                eprintln!("Exported {} settlements", count);
            }
        }
        "balances" => {
            let count = exporter.export_wallet_balances_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} wallet balances", count);
            }
        }
        "audit" => {
            let count = exporter.export_audit_csv(writer, None, None).await?;
            if output.is_some() {
                eprintln!("Exported {} audit entries", count);
            }
        }
        "compliance" => {
            let snapshot = exporter.export_compliance_json(writer, start, end).await?;
            if output.is_some() {
                eprintln!(
                    "Exported compliance snapshot: {} settlements, {} audit entries, {} reconciliations",
                    snapshot.settlements.len(),
                    snapshot.audit_logs.len(),
                    snapshot.reconciliations.len()
                );
            }
        }
        other => anyhow::bail!(
            "Unknown export type '{}'. Valid: settlements, balances, audit, compliance",
            other
        ),
    }
    Ok(())
}

fn parse_wallet_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).context("Invalid wallet ID format (expected UUID)")
}

fn parse_payout_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).context("Invalid payout ID format (expected UUID)")
}

fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date format '{}'. Use YYYY-MM-DD", s))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .context("Invalid date")?
        .and_utc();
    Ok(datetime)
}
