//! Link and dialer contracts — what the registry needs from a transport.
//!
//! A transport hands the registry established links (`Xlink`) and exposes
//! one `Dialer` per local binding. Dialers never see registry state; they get
//! a [`DialTarget`] snapshot instead.

use std::sync::Arc;

use async_trait::async_trait;
use meshlink_core::BackoffConfig;

use crate::error::{DialError, LinkError};
use crate::inspect::LinkInspectDetail;

/// An established link to another router.
pub trait Xlink: Send + Sync {
    fn id(&self) -> &str;
    /// Composite link key, see [`crate::link::link_key`].
    fn key(&self) -> &str;
    fn close(&self) -> Result<(), LinkError>;
    fn is_closed(&self) -> bool;
    /// True if this side dialed the link, false if it was accepted.
    fn is_dialed(&self) -> bool;
    fn iteration(&self) -> u32;
    fn destination_id(&self) -> &str;
    fn dest_version(&self) -> &str;
    fn link_protocol(&self) -> &str;
    fn dial_address(&self) -> &str;
    /// Record one more rejected duplicate and return the running total.
    fn duplicates_rejected(&self) -> u32;

    fn inspect_link(&self) -> LinkInspectDetail {
        LinkInspectDetail {
            id: self.id().to_string(),
            key: self.key().to_string(),
            dest_router_id: self.destination_id().to_string(),
            protocol: self.link_protocol().to_string(),
            dial_address: self.dial_address().to_string(),
            dialed: self.is_dialed(),
            iteration: self.iteration(),
            closed: self.is_closed(),
        }
    }
}

pub type SharedLink = Arc<dyn Xlink>;

/// Identity comparison. Two handles are the same link only if they point at
/// the same object, regardless of ids.
pub fn same_link(a: &SharedLink, b: &SharedLink) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Everything a dialer needs for one attempt. Built by the registry per dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialTarget {
    /// Fresh id for the link this attempt would create.
    pub link_id: String,
    pub link_key: String,
    pub router_id: String,
    pub router_version: String,
    pub address: String,
    pub link_protocol: String,
    pub iteration: u32,
}

#[async_trait]
pub trait Dialer: Send + Sync {
    fn groups(&self) -> &[String];
    /// Local binding. Empty means `default`.
    fn binding(&self) -> &str;
    fn healthy_backoff(&self) -> &BackoffConfig;
    fn unhealthy_backoff(&self) -> &BackoffConfig;

    fn in_group(&self, group: &str) -> bool {
        self.groups().iter().any(|g| g == group)
    }

    fn in_any_group(&self, groups: &[String]) -> bool {
        groups.iter().any(|g| self.in_group(g))
    }

    async fn dial(&self, target: DialTarget) -> Result<SharedLink, DialError>;
}

pub type SharedDialer = Arc<dyn Dialer>;
