use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Read models for the marketplace entities the settlement core consumes.
/// Booking/property/agent CRUD lives outside the core; these lookups are the
/// core's only view of that data.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub property_id: String,
    pub total_price: Decimal,
    pub currency: String,
    pub guest_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    /// The owner who gets the owner share
    pub host_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub registered_at: DateTime<Utc>,
}

/// Link between a referring agent and a property. The agent's 36-month
/// commission window starts at the link's first booking when known, else at
/// the agent's registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPropertyLink {
    pub agent_id: String,
    pub property_id: String,
    pub first_booking_at: Option<DateTime<Utc>>,
}

/// In-memory read-only lookup surface over marketplace data.
#[derive(Debug, Clone, Default)]
pub struct MarketplaceDirectory {
    bookings: HashMap<String, Booking>,
    properties: HashMap<String, Property>,
    agents: HashMap<String, Agent>,
    /// Keyed by property id; at most one referring agent per property
    links: HashMap<String, AgentPropertyLink>,
}

impl MarketplaceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_booking(&mut self, booking: Booking) -> &mut Self {
        self.bookings.insert(booking.id.clone(), booking);
        self
    }

    pub fn add_property(&mut self, property: Property) -> &mut Self {
        self.properties.insert(property.id.clone(), property);
        self
    }

    pub fn add_agent(&mut self, agent: Agent) -> &mut Self {
        self.agents.insert(agent.id.clone(), agent);
        self
    }

    pub fn add_link(&mut self, link: AgentPropertyLink) -> &mut Self {
        self.links.insert(link.property_id.clone(), link);
        self
    }

    pub fn booking(&self, id: &str) -> Option<&Booking> {
        self.bookings.get(id)
    }

    pub fn property(&self, id: &str) -> Option<&Property> {
        self.properties.get(id)
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn link_for_property(&self, property_id: &str) -> Option<&AgentPropertyLink> {
        self.links.get(property_id)
    }
}
