//! Link destinations and per-key link state.
//!
//! Only the registry actor touches these. Everything crossing threads goes
//! through commands.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use meshlink_core::{BackoffConfig, Fault, Listener};
use tokio::time::Instant;

use crate::inspect::{LinkDestDetail, LinkStateDetail};
use crate::xlink::{DialTarget, SharedDialer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    Pending,
    Dialing,
    QueueFailed,
    DialFailed,
    LinkFailed,
    DestRemoved,
    Established,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Pending => "pending",
            LinkStatus::Dialing => "dialing",
            LinkStatus::QueueFailed => "queueFailed",
            LinkStatus::DialFailed => "dialFailed",
            LinkStatus::LinkFailed => "linkFailed",
            LinkStatus::DestRemoved => "destRemoved",
            LinkStatus::Established => "established",
        }
    }

    /// Statuses that go through dial failure backoff.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            LinkStatus::QueueFailed | LinkStatus::DialFailed | LinkStatus::LinkFailed
        )
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote router we may link to.
pub struct LinkDest {
    pub id: String,
    pub version: String,
    pub healthy: bool,
    pub unhealthy_at: Option<Instant>,
    pub link_states: HashMap<String, LinkState>,
}

impl LinkDest {
    pub fn new(id: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            version: version.to_string(),
            healthy: true,
            unhealthy_at: None,
            link_states: HashMap::new(),
        }
    }

    /// Record a health report. Returns true if the destination just recovered.
    pub fn set_healthy(&mut self, healthy: bool, now: Instant) -> bool {
        let became_healthy = healthy && !self.healthy;
        if healthy {
            self.unhealthy_at = None;
        } else if self.healthy || self.unhealthy_at.is_none() {
            self.unhealthy_at = Some(now);
        }
        self.healthy = healthy;
        became_healthy
    }

    pub fn has_established(&self) -> bool {
        self.link_states
            .values()
            .any(|s| s.status == LinkStatus::Established)
    }

    /// Empty, or unhealthy for longer than `max_unhealthy` with nothing established.
    pub fn is_prunable(&self, now: Instant, max_unhealthy: Duration) -> bool {
        if self.link_states.is_empty() {
            return true;
        }
        match self.unhealthy_at {
            Some(at) if !self.healthy => {
                now.saturating_duration_since(at) > max_unhealthy && !self.has_established()
            }
            _ => false,
        }
    }

    pub fn inspect(&self, now: Instant) -> LinkDestDetail {
        let mut link_states: Vec<_> = self.link_states.values().map(|s| s.inspect(now)).collect();
        link_states.sort_by(|a, b| a.key.cmp(&b.key));
        LinkDestDetail {
            id: self.id.clone(),
            version: self.version.clone(),
            healthy: self.healthy,
            unhealthy_since_secs: match (self.healthy, self.unhealthy_at) {
                (false, Some(at)) => Some(now.saturating_duration_since(at).as_secs()),
                _ => None,
            },
            link_states,
        }
    }
}

/// One potential or actual link, keyed by composite link key.
pub struct LinkState {
    pub link_key: String,
    /// Fresh per dial, replaced by the live link's id once established.
    pub link_id: String,
    pub iteration: u32,
    pub status: LinkStatus,
    pub dial_attempts: u64,
    pub connected_count: u64,
    pub retry_delay: Duration,
    pub next_dial: Instant,
    /// -1 is unlimited. Positive values count down per failure.
    pub allowed_dials: i32,
    /// Link id of the dial in flight. At most one per state.
    pub active_dial: Option<String>,
    pub link_faults: Vec<Fault>,
    pub ctrls_notified: bool,
    pub listener: Listener,
    pub dialer: SharedDialer,
}

impl LinkState {
    pub fn new(
        link_key: String,
        listener: Listener,
        dialer: SharedDialer,
        allowed_dials: i32,
        now: Instant,
    ) -> Self {
        Self {
            link_key,
            link_id: new_link_id(),
            iteration: 0,
            status: LinkStatus::Pending,
            dial_attempts: 0,
            connected_count: 0,
            retry_delay: Duration::ZERO,
            next_dial: now,
            allowed_dials,
            active_dial: None,
            link_faults: Vec::new(),
            ctrls_notified: false,
            listener,
            dialer,
        }
    }

    pub fn could_dial(&self, now: Instant) -> bool {
        !matches!(self.status, LinkStatus::Established | LinkStatus::Dialing)
            && self.active_dial.is_none()
            && self.next_dial <= now
    }

    /// Move to `Dialing` and build the snapshot handed to the dialer.
    pub fn start_dial(&mut self, dest: &str, dest_version: &str) -> DialTarget {
        self.status = LinkStatus::Dialing;
        self.dial_attempts += 1;
        self.iteration = self.iteration.wrapping_add(1);
        self.link_id = new_link_id();
        self.active_dial = Some(self.link_id.clone());
        DialTarget {
            link_id: self.link_id.clone(),
            link_key: self.link_key.clone(),
            router_id: dest.to_string(),
            router_version: dest_version.to_string(),
            address: self.listener.address.clone(),
            link_protocol: self.listener.protocol.clone(),
            iteration: self.iteration,
        }
    }

    pub fn mark_established(&mut self, link_id: &str, iteration: u32) {
        self.status = LinkStatus::Established;
        self.link_id = link_id.to_string();
        self.iteration = iteration;
        self.connected_count += 1;
        self.retry_delay = Duration::ZERO;
        self.ctrls_notified = false;
    }

    /// Clear the in-flight dial if `link_id` is the one that finished.
    /// Returns false for results of dials this state never started.
    pub fn finish_dial(&mut self, link_id: &str) -> bool {
        if self.active_dial.as_deref() != Some(link_id) {
            return false;
        }
        self.active_dial = None;
        true
    }

    /// Skip any remaining backoff.
    pub fn reset_backoff(&mut self, now: Instant) {
        self.retry_delay = Duration::ZERO;
        self.next_dial = now;
    }

    /// Grow the retry delay along the dialer's healthy or unhealthy curve and
    /// push out `next_dial`.
    pub fn apply_backoff(&mut self, dest_healthy: bool, now: Instant) {
        let backoff: &BackoffConfig = if dest_healthy {
            self.dialer.healthy_backoff()
        } else {
            self.dialer.unhealthy_backoff()
        };
        self.retry_delay = backoff.next_delay(self.retry_delay);
        self.next_dial = now + self.retry_delay;
    }

    /// Spend one bounded dial. Returns true once the budget is gone.
    pub fn consume_allowed_dial(&mut self) -> bool {
        if self.allowed_dials > 0 {
            self.allowed_dials -= 1;
            return self.allowed_dials == 0;
        }
        false
    }

    pub fn queue_fault(&mut self, fault: Fault) {
        if !self.link_faults.contains(&fault) {
            self.link_faults.push(fault);
        }
    }

    pub fn inspect(&self, now: Instant) -> LinkStateDetail {
        LinkStateDetail {
            id: self.link_id.clone(),
            key: self.link_key.clone(),
            status: self.status.to_string(),
            dial_attempts: self.dial_attempts,
            connected_count: self.connected_count,
            retry_delay_ms: self.retry_delay.as_millis() as u64,
            next_dial_in_ms: self.next_dial.saturating_duration_since(now).as_millis() as u64,
            target_address: self.listener.address.clone(),
            target_groups: self.listener.groups.clone(),
            target_binding: self.listener.binding().to_string(),
            dialer_groups: self.dialer.groups().to_vec(),
            dialer_binding: or_default(self.dialer.binding()).to_string(),
        }
    }
}

pub fn new_link_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn or_default(binding: &str) -> &str {
    if binding.is_empty() {
        meshlink_core::wire::DEFAULT_BINDING
    } else {
        binding
    }
}
