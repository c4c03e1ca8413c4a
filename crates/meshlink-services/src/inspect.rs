//! Inspect snapshots of the link registry, serialised by the status API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinksInspectResult {
    pub links: Vec<LinkInspectDetail>,
    pub destinations: Vec<LinkDestDetail>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDestDetail {
    pub id: String,
    pub version: String,
    pub healthy: bool,
    /// Seconds since the destination went unhealthy. None while healthy.
    pub unhealthy_since_secs: Option<u64>,
    pub link_states: Vec<LinkStateDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkStateDetail {
    pub id: String,
    pub key: String,
    pub status: String,
    pub dial_attempts: u64,
    pub connected_count: u64,
    pub retry_delay_ms: u64,
    /// Zero when the state is already eligible to dial.
    pub next_dial_in_ms: u64,
    pub target_address: String,
    pub target_groups: Vec<String>,
    pub target_binding: String,
    pub dialer_groups: Vec<String>,
    pub dialer_binding: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInspectDetail {
    pub id: String,
    pub key: String,
    pub dest_router_id: String,
    pub protocol: String,
    pub dial_address: String,
    pub dialed: bool,
    pub iteration: u32,
    pub closed: bool,
}

impl LinksInspectResult {
    pub fn destination(&self, id: &str) -> Option<&LinkDestDetail> {
        self.destinations.iter().find(|d| d.id == id)
    }
}
