//! Registry handle — live link maps and the public entry points.
//!
//! Calls that have to answer right away (accept, dial success, close, link
//! lookups) run here under the map lock. Everything that changes
//! destinations or link states becomes a command for the actor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use meshlink_core::config::RegistryConfig;
use meshlink_core::{CtrlMessage, Dial, Fault, FaultSubject, Listener, RouterLink, RouterLinks};
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use super::actor::RegistryActor;
use super::events::Command;
use super::link_key;
use super::state::LinkStatus;
use crate::ctrl::{use_legacy_link_mgmt, Capability, CtrlHandler, NetworkControllers, SharedCtrl};
use crate::error::RegistryError;
use crate::inspect::LinksInspectResult;
use crate::metrics::MetricsRegistry;
use crate::pool::Pool;
use crate::shutdown::CloseNotify;
use crate::xlink::{same_link, SharedDialer, SharedLink};

/// Everything the registry runs on.
pub struct RegistryEnv {
    pub router_id: String,
    pub ctrls: Arc<dyn NetworkControllers>,
    pub dialers: Vec<SharedDialer>,
    pub dialer_pool: Arc<dyn Pool>,
    pub rate_limiter_pool: Arc<dyn Pool>,
    pub metrics: Arc<dyn MetricsRegistry>,
    pub close: CloseNotify,
    pub config: RegistryConfig,
}

/// Result of presenting a link to the registry.
pub enum ApplyOutcome {
    /// The link now occupies its key.
    Registered,
    /// This exact link object was already registered. Nothing changed.
    AlreadyRegistered,
    /// Another link keeps the key. The presented link will be closed shortly.
    Rejected { survivor: SharedLink },
    /// The presented link was already closed.
    Closed,
}

impl ApplyOutcome {
    pub fn is_kept(&self) -> bool {
        matches!(self, ApplyOutcome::Registered | ApplyOutcome::AlreadyRegistered)
    }
}

#[derive(Default)]
struct LinkMaps {
    by_key: HashMap<String, SharedLink>,
    by_id: HashMap<String, SharedLink>,
}

struct Shared {
    env: RegistryEnv,
    maps: RwLock<LinkMaps>,
    commands: mpsc::UnboundedSender<Command>,
    notify_tx: mpsc::Sender<()>,
    runtime: Handle,
}

/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct LinkRegistry {
    shared: Arc<Shared>,
}

impl LinkRegistry {
    /// Build the registry and start its actor and metrics GC tasks.
    /// Must be called from inside a tokio runtime.
    pub fn new(env: RegistryEnv) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::channel(1);

        tracing::info!(
            router_id = %env.router_id,
            dialers = env.dialers.len(),
            "link registry starting"
        );

        let registry = Self {
            shared: Arc::new(Shared {
                env,
                maps: RwLock::new(LinkMaps::default()),
                commands,
                notify_tx,
                runtime: Handle::current(),
            }),
        };

        let actor = RegistryActor::new(registry.clone(), command_rx, notify_rx);
        tokio::spawn(actor.run());
        tokio::spawn(super::gc::run(registry.clone()));

        registry
    }

    pub(crate) fn env(&self) -> &RegistryEnv {
        &self.shared.env
    }

    pub(crate) fn config(&self) -> &RegistryConfig {
        &self.shared.env.config
    }

    pub(crate) fn send(&self, cmd: Command) {
        if self.shared.commands.send(cmd).is_err() {
            tracing::debug!("link registry actor gone, command dropped");
        }
    }

    /// Wake the notification pass. Coalesces with a pending wake-up.
    pub(crate) fn trigger_notify(&self) {
        let _ = self.shared.notify_tx.try_send(());
    }

    // ── Controller-driven updates ─────────────────────────────────────────────

    pub fn update_link_destination(
        &self,
        id: &str,
        version: &str,
        healthy: bool,
        listeners: Vec<Listener>,
    ) {
        self.send(Command::UpdateLinkDest {
            id: id.to_string(),
            version: version.to_string(),
            healthy,
            listeners,
        });
    }

    pub fn remove_link_destination(&self, id: &str) {
        self.send(Command::RemoveLinkDest { id: id.to_string() });
    }

    /// One-off dial requested by a controller.
    pub fn dial_requested(&self, ctrl: SharedCtrl, dial: Dial) {
        self.send(Command::DialRequested { ctrl, dial });
    }

    // ── Link lookups ──────────────────────────────────────────────────────────

    pub fn get_link(&self, link_key: &str) -> Option<SharedLink> {
        self.shared.maps.read().by_key.get(link_key).cloned()
    }

    pub fn get_link_by_id(&self, link_id: &str) -> Option<SharedLink> {
        self.shared.maps.read().by_id.get(link_id).cloned()
    }

    /// Snapshot of every link occupying a key.
    pub fn links(&self) -> Vec<SharedLink> {
        self.shared.maps.read().by_key.values().cloned().collect()
    }

    pub fn get_link_key(
        &self,
        dialer_binding: &str,
        protocol: &str,
        dest: &str,
        listener_binding: &str,
    ) -> String {
        let legacy = use_legacy_link_mgmt(self.env().ctrls.as_ref());
        link_key(dialer_binding, protocol, dest, listener_binding, legacy)
    }

    /// Drop a link from both maps without closing it.
    pub fn debug_forget_link(&self, link_id: &str) -> bool {
        let mut maps = self.shared.maps.write();
        let Some(link) = maps.by_id.remove(link_id) else {
            return false;
        };
        if maps
            .by_key
            .get(link.key())
            .is_some_and(|current| same_link(current, &link))
        {
            maps.by_key.remove(link.key());
        }
        tracing::info!(link_id, link_key = link.key(), "link forgotten");
        true
    }

    // ── Transport callbacks ───────────────────────────────────────────────────

    /// A peer dialed us. Returns whether the caller's link was kept.
    pub fn link_accepted(&self, link: SharedLink) -> ApplyOutcome {
        self.apply_link(link)
    }

    /// One of our dials completed.
    pub fn dial_succeeded(&self, link: SharedLink) -> ApplyOutcome {
        self.apply_link(link)
    }

    fn apply_link(&self, link: SharedLink) -> ApplyOutcome {
        if link.is_closed() {
            tracing::info!(
                dest = link.destination_id(),
                link_id = link.id(),
                "link being registered is already closed, skipping registration"
            );
            return ApplyOutcome::Closed;
        }

        let mut maps = self.shared.maps.write();

        if let Some(existing) = maps.by_key.get(link.key()).cloned() {
            if same_link(&existing, &link) {
                tracing::warn!(link_id = link.id(), link_key = link.key(), "link registered twice");
                return ApplyOutcome::AlreadyRegistered;
            }

            if !existing.is_closed() {
                let max_rejections = self.config().max_duplicate_rejections;
                if existing.id() < link.id() && existing.duplicates_rejected() <= max_rejections {
                    tracing::info!(
                        dest = link.destination_id(),
                        current_link_id = existing.id(),
                        new_link_id = link.id(),
                        "duplicate link rejected, current link has lower id"
                    );
                    self.close_later(link, self.config().duplicate_close_delay(), "duplicate");
                    return ApplyOutcome::Rejected { survivor: existing };
                }

                tracing::info!(
                    dest = link.destination_id(),
                    current_link_id = existing.id(),
                    new_link_id = link.id(),
                    "duplicate link detected, replacing current link"
                );
                self.report_superseded(existing);
            }
        }

        maps.by_key.insert(link.key().to_string(), link.clone());
        maps.by_id.insert(link.id().to_string(), link.clone());
        drop(maps);

        self.send(Command::UpdateLinkStatusForLink {
            link,
            status: LinkStatus::Established,
        });
        ApplyOutcome::Registered
    }

    /// Transport saw the link go down.
    pub fn link_closed(&self, link: SharedLink) {
        let was_current = {
            let mut maps = self.shared.maps.write();
            let was_current = maps
                .by_key
                .get(link.key())
                .is_some_and(|current| same_link(current, &link));
            if was_current {
                maps.by_key.remove(link.key());
            }
            if maps
                .by_id
                .get(link.id())
                .is_some_and(|current| same_link(current, &link))
            {
                maps.by_id.remove(link.id());
            }
            was_current
        };

        if was_current {
            tracing::info!(link_id = link.id(), link_key = link.key(), "link closed");
            self.send(Command::UpdateLinkStatusForLink {
                link,
                status: LinkStatus::LinkFailed,
            });
        } else {
            tracing::debug!(link_id = link.id(), "closed link no longer current, ignoring");
        }
    }

    /// Close every registered link.
    pub fn shutdown(&self) {
        let links = self.links();
        for link in &links {
            tracing::info!(link_id = link.id(), "closing link");
            if let Err(e) = link.close() {
                tracing::warn!(link_id = link.id(), error = %e, "error closing link");
            }
        }
        tracing::info!(link_count = links.len(), "shutdown links in link registry");
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Live links plus a snapshot of destinations from the actor. A slow or
    /// stopped actor shows up in `errors` instead of destinations.
    pub async fn inspect(&self, timeout: Duration) -> LinksInspectResult {
        let mut result = LinksInspectResult {
            links: self.links().iter().map(|l| l.inspect_link()).collect(),
            ..Default::default()
        };
        result.links.sort_by(|a, b| a.key.cmp(&b.key));

        let (reply, rx) = oneshot::channel();
        self.send(Command::InspectLinkStates { reply });

        let close = self.env().close.clone();
        let outcome = tokio::select! {
            r = tokio::time::timeout(timeout, rx) => match r {
                Ok(Ok(dests)) => Ok(dests),
                Ok(Err(_)) => Err(RegistryError::Closed),
                Err(_) => Err(RegistryError::Timeout),
            },
            _ = close.closed() => Err(RegistryError::Closed),
        };

        match outcome {
            Ok(dests) => result.destinations = dests,
            Err(e) => result.errors.push(e.to_string()),
        }
        result
    }

    /// True if any live link or link state uses this id. Undetermined
    /// answers count as known.
    pub async fn is_known_link_id(&self, link_id: &str) -> bool {
        {
            let maps = self.shared.maps.read();
            if maps.by_id.contains_key(link_id) || maps.by_key.values().any(|l| l.id() == link_id) {
                return true;
            }
        }

        let (reply, rx) = oneshot::channel();
        self.send(Command::ScanForLinkId {
            link_id: link_id.to_string(),
            reply,
        });

        let close = self.env().close.clone();
        tokio::select! {
            r = tokio::time::timeout(self.config().known_link_id_timeout(), rx) => match r {
                Ok(Ok(known)) => known,
                _ => true,
            },
            _ = close.closed() => true,
        }
    }

    // ── Controller messaging ──────────────────────────────────────────────────

    /// Announce `links` to one controller on the rate limiter pool.
    pub(crate) fn send_router_links(&self, ctrl: SharedCtrl, links: Vec<SharedLink>) {
        if links.is_empty() {
            return;
        }
        let msg = CtrlMessage::RouterLinks(RouterLinks {
            links: links.iter().map(router_link).collect(),
        });
        let send_timeout = self.config().notify_send_timeout();
        let task = async move {
            let ctrl_id = ctrl.id().to_string();
            match tokio::time::timeout(send_timeout, ctrl.send(msg, send_timeout)).await {
                Ok(Ok(())) => tracing::debug!(ctrl_id, "router links sent"),
                Ok(Err(e)) => tracing::warn!(ctrl_id, error = %e, "error sending router links"),
                Err(_) => tracing::warn!(ctrl_id, "timed out sending router links"),
            }
        };
        if let Err(e) = self.env().rate_limiter_pool.queue_or_error(task.boxed()) {
            tracing::warn!(error = %e, "unable to queue router link message");
        }
    }

    /// Resend current links to a controller that just reconnected.
    pub fn resend_router_links(&self, ctrl: SharedCtrl) {
        let single_source = ctrl.has_capability(Capability::SingleRouterLinkSource);
        let links: Vec<SharedLink> = self
            .links()
            .into_iter()
            .filter(|l| !l.is_closed() && (l.is_dialed() || !single_source))
            .collect();
        tracing::info!(ctrl_id = ctrl.id(), links = links.len(), "controller reconnected, resending links");
        self.send_router_links(ctrl, links);
    }

    /// Fault the superseded link to every reachable controller, then close it
    /// after a grace period so circuits can move.
    fn report_superseded(&self, existing: SharedLink) {
        let ctrls = self.env().ctrls.get_all();
        let subject = if use_legacy_link_mgmt(self.env().ctrls.as_ref()) {
            FaultSubject::LinkFault
        } else {
            FaultSubject::LinkDuplicate
        };
        let fault = CtrlMessage::Fault(Fault {
            subject,
            id: existing.id().to_string(),
            iteration: existing.iteration(),
        });
        let send_timeout = self.config().notify_send_timeout();
        let close_delay = self.config().superseded_close_delay();
        let close = self.env().close.clone();

        self.shared.runtime.spawn(async move {
            // grace period runs from the replacement, not from fault delivery
            let close_at = tokio::time::Instant::now() + close_delay;
            let sends = ctrls.iter().filter(|c| c.is_connected()).map(|ctrl| {
                let fault = fault.clone();
                async move {
                    let result =
                        tokio::time::timeout(send_timeout, ctrl.send(fault, send_timeout)).await;
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::error!(
                            ctrl_id = ctrl.id(),
                            error = %e,
                            "failed to send fault for duplicate link"
                        ),
                        Err(_) => tracing::error!(
                            ctrl_id = ctrl.id(),
                            "timed out sending fault for duplicate link"
                        ),
                    }
                }
            });
            futures::future::join_all(sends).await;

            tokio::select! {
                _ = tokio::time::sleep_until(close_at) => {}
                _ = close.closed() => {}
            }
            if existing.is_closed() {
                return;
            }
            if let Err(e) = existing.close() {
                tracing::warn!(link_id = existing.id(), error = %e, "error closing superseded link");
            }
        });
    }

    fn close_later(&self, link: SharedLink, delay: Duration, reason: &'static str) {
        let close = self.env().close.clone();
        self.shared.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = close.closed() => {}
            }
            if link.is_closed() {
                return;
            }
            if let Err(e) = link.close() {
                tracing::error!(link_id = link.id(), reason, error = %e, "error closing link");
            }
        });
    }
}

pub(crate) fn router_link(link: &SharedLink) -> RouterLink {
    RouterLink {
        id: link.id().to_string(),
        dest_router_id: link.destination_id().to_string(),
        link_protocol: link.link_protocol().to_string(),
        dial_address: link.dial_address().to_string(),
        iteration: link.iteration(),
    }
}

impl CtrlHandler for LinkRegistry {
    fn load_config(&self, _config: &toml::Table) -> Result<(), RegistryError> {
        Ok(())
    }

    fn bind_channel(&self, _ctrl: &SharedCtrl) -> Result<(), RegistryError> {
        Ok(())
    }

    fn enabled(&self) -> bool {
        true
    }

    /// The actor starts in `new`.
    fn run(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    fn notify_of_reconnect(&self, ctrl: SharedCtrl) {
        self.resend_router_links(ctrl);
    }
}
