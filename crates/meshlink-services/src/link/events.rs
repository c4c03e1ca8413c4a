//! Commands processed by the registry actor, and their handlers.

use std::collections::HashSet;

use meshlink_core::wire::DEFAULT_BINDING;
use meshlink_core::{Dial, Fault, FaultSubject, Listener};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::actor::RegistryActor;
use super::link_key;
use super::notify::NotifyReport;
use super::state::{LinkDest, LinkState, LinkStatus};
use crate::ctrl::{use_legacy_link_mgmt, SharedCtrl};
use crate::inspect::LinkDestDetail;
use crate::xlink::{same_link, SharedLink};

/// How a dial worker finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DialOutcome {
    /// Our link now holds the key.
    Linked,
    /// Some other live link holds the key.
    AlreadyLinked,
    Failed,
}

pub(crate) enum Command {
    UpdateLinkDest {
        id: String,
        version: String,
        healthy: bool,
        listeners: Vec<Listener>,
    },
    RemoveLinkDest {
        id: String,
    },
    DialRequested {
        ctrl: SharedCtrl,
        dial: Dial,
    },
    DialCompleted {
        dest_id: String,
        link_key: String,
        /// Id the dial was started with.
        link_id: String,
        outcome: DialOutcome,
    },
    UpdateLinkStatusForLink {
        link: SharedLink,
        status: LinkStatus,
    },
    InspectLinkStates {
        reply: oneshot::Sender<Vec<LinkDestDetail>>,
    },
    ScanForLinkId {
        link_id: String,
        reply: oneshot::Sender<bool>,
    },
    NotificationsSent {
        report: NotifyReport,
    },
}

impl RegistryActor {
    pub(super) fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::UpdateLinkDest {
                id,
                version,
                healthy,
                listeners,
            } => self.update_link_dest(id, version, healthy, listeners),
            Command::RemoveLinkDest { id } => self.remove_link_dest(&id),
            Command::DialRequested { ctrl, dial } => self.dial_request(ctrl, dial),
            Command::DialCompleted {
                dest_id,
                link_key,
                link_id,
                outcome,
            } => self.dial_completed(&dest_id, &link_key, &link_id, outcome),
            Command::UpdateLinkStatusForLink { link, status } => {
                self.update_link_status_for_link(link, status)
            }
            Command::InspectLinkStates { reply } => {
                let now = Instant::now();
                let mut dests: Vec<_> = self.destinations.values().map(|d| d.inspect(now)).collect();
                dests.sort_by(|a, b| a.id.cmp(&b.id));
                let _ = reply.send(dests);
            }
            Command::ScanForLinkId { link_id, reply } => {
                let known = self
                    .destinations
                    .values()
                    .flat_map(|d| d.link_states.values())
                    .any(|s| s.link_id == link_id);
                let _ = reply.send(known);
            }
            Command::NotificationsSent { report } => self.notifications_sent(report),
        }
    }

    // ── Destinations ──────────────────────────────────────────────────────────

    fn update_link_dest(&mut self, id: String, version: String, healthy: bool, listeners: Vec<Listener>) {
        let now = Instant::now();
        let dest = self
            .destinations
            .entry(id.clone())
            .or_insert_with(|| LinkDest::new(&id, &version));
        dest.version = version;
        let became_healthy = dest.set_healthy(healthy, now);

        if became_healthy {
            tracing::info!(dest = %id, "link destination became healthy");
        }
        if healthy {
            self.apply_listener_changes(&id, &listeners, became_healthy, now);
        }
    }

    /// Sync link states with the advertised listeners. Keys no longer
    /// advertised are dropped so they won't be redialed once closed.
    fn apply_listener_changes(
        &mut self,
        dest_id: &str,
        listeners: &[Listener],
        became_healthy: bool,
        now: Instant,
    ) {
        let legacy = use_legacy_link_mgmt(self.registry.env().ctrls.as_ref());
        let dialers = self.registry.env().dialers.clone();
        let Some(dest) = self.destinations.get_mut(dest_id) else {
            return;
        };

        let mut orphaned: HashSet<String> = dest.link_states.keys().cloned().collect();
        let mut to_evaluate = Vec::new();

        for listener in listeners {
            for dialer in dialers.iter().filter(|d| d.in_any_group(&listener.groups)) {
                let key = link_key(dialer.binding(), &listener.protocol, dest_id, listener.binding(), legacy);
                orphaned.remove(&key);

                match dest.link_states.get_mut(&key) {
                    None => {
                        tracing::info!(
                            dest = dest_id,
                            address = %listener.address,
                            link_key = %key,
                            "new potential link"
                        );
                        let state = LinkState::new(key.clone(), listener.clone(), dialer.clone(), -1, now);
                        dest.link_states.insert(key.clone(), state);
                        to_evaluate.push(key);
                    }
                    Some(state) => {
                        state.listener = listener.clone();
                        if became_healthy && state.status != LinkStatus::Established {
                            state.reset_backoff(now);
                            self.heap.push(now, dest_id, &key);
                            to_evaluate.push(key);
                        }
                    }
                }
            }
        }

        for key in orphaned {
            if let Some(mut state) = dest.link_states.remove(&key) {
                state.status = LinkStatus::DestRemoved;
                tracing::info!(dest = dest_id, link_key = %key, "listener no longer advertised, dropping link state");
            }
        }

        for key in to_evaluate {
            self.evaluate_link_state(dest_id, &key, now);
        }
    }

    fn remove_link_dest(&mut self, id: &str) {
        let Some(mut dest) = self.destinations.remove(id) else {
            return;
        };
        tracing::info!(dest = id, link_states = dest.link_states.len(), "link destination removed");

        for state in dest.link_states.values_mut() {
            state.status = LinkStatus::DestRemoved;
            if let Some(link) = self.registry.get_link(&state.link_key) {
                if let Err(e) = link.close() {
                    tracing::error!(link_key = %state.link_key, link_id = link.id(), error = %e, "error closing link");
                }
            }
        }
    }

    fn dial_request(&mut self, ctrl: SharedCtrl, dial: Dial) {
        let now = Instant::now();
        let legacy = use_legacy_link_mgmt(self.registry.env().ctrls.as_ref());
        let dialers = self.registry.env().dialers.clone();
        let dest_id = dial.router_id.clone();
        let dest = self
            .destinations
            .entry(dest_id.clone())
            .or_insert_with(|| LinkDest::new(&dial.router_id, &dial.router_version));

        let mut to_evaluate = Vec::new();
        for dialer in dialers.iter().filter(|d| d.in_group(DEFAULT_BINDING)) {
            let key = link_key(DEFAULT_BINDING, &dial.link_protocol, &dest_id, DEFAULT_BINDING, legacy);

            if let Some(link) = self.registry.get_link(&key) {
                tracing::info!(dest = %dest_id, link_key = %key, "dial requested for existing link, resending");
                self.registry.send_router_links(ctrl.clone(), vec![link]);
                continue;
            }

            match dest.link_states.get_mut(&key) {
                None => {
                    tracing::info!(dest = %dest_id, address = %dial.address, link_key = %key, "new potential link");
                    let listener = Listener {
                        address: dial.address.clone(),
                        protocol: dial.link_protocol.clone(),
                        groups: vec![DEFAULT_BINDING.to_string()],
                        local_binding: String::new(),
                    };
                    let state = LinkState::new(key.clone(), listener, dialer.clone(), 1, now);
                    dest.link_states.insert(key.clone(), state);
                    to_evaluate.push(key);
                }
                Some(state) if state.status != LinkStatus::Established => {
                    state.reset_backoff(now);
                    state.allowed_dials = 1;
                    to_evaluate.push(key);
                }
                Some(_) => {}
            }
        }

        for key in to_evaluate {
            self.evaluate_link_state(&dest_id, &key, now);
        }
    }

    // ── Link status ───────────────────────────────────────────────────────────

    fn dial_completed(&mut self, dest_id: &str, link_key: &str, link_id: &str, outcome: DialOutcome) {
        let now = Instant::now();
        let live = self.registry.get_link(link_key).filter(|l| !l.is_closed());
        let Some(state) = self
            .destinations
            .get_mut(dest_id)
            .and_then(|d| d.link_states.get_mut(link_key))
        else {
            return;
        };
        if !state.finish_dial(link_id) {
            tracing::debug!(link_key, link_id, "result for a dial this state did not start, ignoring");
            return;
        }
        if state.status != LinkStatus::Dialing {
            // reschedule the retry skipped while this dial was in flight
            if state.status.is_failure() {
                let next_dial = state.next_dial;
                if next_dial <= now {
                    self.evaluate_link_state(dest_id, link_key, now);
                } else {
                    self.heap.push(next_dial, dest_id, link_key);
                }
            }
            return;
        }

        match (outcome, live) {
            (DialOutcome::Failed, _) | (_, None) => {
                self.update_link_state(dest_id, link_key, LinkStatus::DialFailed, now);
            }
            (_, Some(link)) => {
                tracing::debug!(link_key, link_id = link.id(), "dial finished with live link, syncing state");
                state.mark_established(link.id(), link.iteration());
                self.registry.trigger_notify();
            }
        }
    }

    fn update_link_status_for_link(&mut self, link: SharedLink, status: LinkStatus) {
        let now = Instant::now();
        let current = self.registry.get_link(link.key());
        let Some(dest) = self.destinations.get_mut(link.destination_id()) else {
            tracing::warn!(
                link_key = link.key(),
                link_id = link.id(),
                dest = link.destination_id(),
                "unable to mark link as {status}, link destination not present in registry"
            );
            return;
        };
        let Some(state) = dest.link_states.get_mut(link.key()) else {
            if link.is_dialed() {
                tracing::warn!(
                    link_key = link.key(),
                    link_id = link.id(),
                    "unable to mark link as {status}, link state not present in registry"
                );
            }
            return;
        };
        if state.status == LinkStatus::DestRemoved {
            return;
        }

        match status {
            LinkStatus::Established => {
                state.mark_established(link.id(), link.iteration());
                tracing::info!(
                    link_key = link.key(),
                    link_id = link.id(),
                    connected_count = state.connected_count,
                    "link established"
                );
                self.registry.trigger_notify();
            }
            LinkStatus::LinkFailed => {
                if current.is_some_and(|c| !c.is_closed() && !same_link(&c, &link)) {
                    tracing::debug!(link_id = link.id(), "closed link already replaced, keeping state");
                    return;
                }
                state.queue_fault(Fault {
                    subject: FaultSubject::LinkFault,
                    id: link.id().to_string(),
                    iteration: link.iteration(),
                });
                let dest_id = link.destination_id().to_string();
                self.update_link_state(&dest_id, link.key(), LinkStatus::LinkFailed, now);
                self.registry.trigger_notify();
            }
            other => {
                let dest_id = link.destination_id().to_string();
                self.update_link_state(&dest_id, link.key(), other, now);
            }
        }
    }
}
