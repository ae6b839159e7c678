use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::domain::{Agent, AgentPropertyLink, Booking, MarketplaceDirectory, Property};

/// JSON file shape for seeding the marketplace directory. The settlement
/// core never owns booking/property/agent data; a host application injects
/// it, and the CLI loads it from a file of this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryFile {
    #[serde(default)]
    pub bookings: Vec<Booking>,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub links: Vec<AgentPropertyLink>,
}

impl DirectoryFile {
    pub fn into_directory(self) -> MarketplaceDirectory {
        let mut directory = MarketplaceDirectory::new();
        for property in self.properties {
            directory.add_property(property);
        }
        for booking in self.bookings {
            directory.add_booking(booking);
        }
        for agent in self.agents {
            directory.add_agent(agent);
        }
        for link in self.links {
            directory.add_link(link);
        }
        directory
    }
}

/// Load a marketplace directory from a JSON reader.
pub fn load_directory<R: Read>(reader: R) -> Result<MarketplaceDirectory> {
    let file: DirectoryFile =
        serde_json::from_reader(reader).context("Failed to parse directory file")?;
    Ok(file.into_directory())
}
