#![allow(dead_code)]

use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tempfile::TempDir;

use gojo_settlement::application::{SettleRequest, SettlementCore};
use gojo_settlement::domain::{Agent, AgentPropertyLink, Booking, Property};

/// Fresh settlement core over a temporary database.
pub async fn test_core() -> Result<(SettlementCore, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let core = SettlementCore::init(db_path.to_str().unwrap()).await?;
    Ok((core, temp_dir))
}

/// Seed one property with an active referring agent and one ETB booking.
/// Booking "bk-1": 1000 ETB at property "p-1" (host "owner-1"), referred by
/// "agent-1" who registered six months ago.
pub fn seed_marketplace(core: &mut SettlementCore) {
    let directory = core.directory_mut();
    directory
        .add_property(Property { id: "p-1".into(), host_id: "owner-1".into() })
        .add_booking(Booking {
            id: "bk-1".into(),
            property_id: "p-1".into(),
            total_price: Decimal::new(1000, 0),
            currency: "ETB".into(),
            guest_id: "guest-1".into(),
            status: "confirmed".into(),
        })
        .add_agent(Agent { id: "agent-1".into(), registered_at: Utc::now() - Duration::days(180) })
        .add_link(AgentPropertyLink {
            agent_id: "agent-1".into(),
            property_id: "p-1".into(),
            first_booking_at: None,
        });
}

/// Seed a second property without a referring agent and a 100 USD booking
/// "bk-usd" on it (host "owner-2").
pub fn seed_usd_booking(core: &mut SettlementCore) {
    let directory = core.directory_mut();
    directory
        .add_property(Property { id: "p-2".into(), host_id: "owner-2".into() })
        .add_booking(Booking {
            id: "bk-usd".into(),
            property_id: "p-2".into(),
            total_price: Decimal::new(100, 0),
            currency: "USD".into(),
            guest_id: "guest-2".into(),
            status: "confirmed".into(),
        });
}

/// Seed a booking whose referring agent's 36-month window has lapsed.
/// Booking "bk-old" at property "p-old" (host "owner-3"), agent "agent-old"
/// registered four years ago.
pub fn seed_expired_agent_booking(core: &mut SettlementCore) {
    let directory = core.directory_mut();
    directory
        .add_property(Property { id: "p-old".into(), host_id: "owner-3".into() })
        .add_booking(Booking {
            id: "bk-old".into(),
            property_id: "p-old".into(),
            total_price: Decimal::new(1000, 0),
            currency: "ETB".into(),
            guest_id: "guest-3".into(),
            status: "confirmed".into(),
        })
        .add_agent(Agent {
            id: "agent-old".into(),
            registered_at: Utc::now() - Duration::days(4 * 365),
        })
        .add_link(AgentPropertyLink {
            agent_id: "agent-old".into(),
            property_id: "p-old".into(),
            first_booking_at: None,
        });
}

pub fn settle_request(booking_id: &str, freeze: bool) -> SettleRequest {
    SettleRequest {
        booking_id: booking_id.into(),
        payment_ref: format!("pay-{}", booking_id),
        payment_method: "telebirr".into(),
        freeze_until_checkout: freeze,
    }
}
