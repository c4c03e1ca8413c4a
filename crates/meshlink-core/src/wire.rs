//! Controller wire messages exchanged by the link registry.
//!
//! Field encodings belong to the control-channel layer. These types carry
//! serde derives so a channel can pick its own encoding; `encode`/`decode`
//! give the JSON form used by the local transport and API.

use serde::{Deserialize, Serialize};

/// Binding/group name used when nothing more specific is configured.
pub const DEFAULT_BINDING: &str = "default";

// ── Inbound (controller → router) ────────────────────────────────────────────

/// A link listener advertised by a remote router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Listener {
    pub address: String,
    pub protocol: String,
    /// Dialers whose groups intersect these groups may dial this listener.
    pub groups: Vec<String>,
    /// Empty means `default`.
    pub local_binding: String,
}

impl Listener {
    pub fn binding(&self) -> &str {
        if self.local_binding.is_empty() {
            DEFAULT_BINDING
        } else {
            &self.local_binding
        }
    }
}

/// A one-off, controller-directed dial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dial {
    pub address: String,
    pub router_id: String,
    pub link_protocol: String,
    pub router_version: String,
}

// ── Outbound (router → controller) ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterLink {
    pub id: String,
    pub dest_router_id: String,
    pub link_protocol: String,
    pub dial_address: String,
    pub iteration: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterLinks {
    pub links: Vec<RouterLink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultSubject {
    /// Link is dead or invalid. Also used for duplicates toward legacy controllers.
    LinkFault,
    /// Link lost a duplicate race and is about to be closed.
    LinkDuplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fault {
    pub subject: FaultSubject,
    pub id: String,
    pub iteration: u32,
}

/// Everything the registry sends to a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum CtrlMessage {
    RouterLinks(RouterLinks),
    Fault(Fault),
}

impl CtrlMessage {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
