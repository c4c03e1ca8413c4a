//! Controller notification batcher.
//!
//! Collects established links nobody has been told about and queued faults,
//! sends them to every controller on the rate limiter pool, and reports back
//! which items every recipient acknowledged. Anything else stays queued for
//! the next pass.

use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use meshlink_core::{CtrlMessage, Fault, RouterLinks};
use tokio::time::Instant;

use super::actor::RegistryActor;
use super::events::Command;
use super::registry::{router_link, LinkRegistry};
use super::state::LinkStatus;
use crate::ctrl::{Capability, SharedCtrl};
use crate::xlink::SharedLink;

/// Items every recipient acknowledged.
#[derive(Debug, Default)]
pub(crate) struct NotifyReport {
    /// `(dest_id, link_key, link_id)`
    pub links: Vec<(String, String, String)>,
    /// `(dest_id, link_key, fault)`
    pub faults: Vec<(String, String, Fault)>,
}

struct PendingLink {
    dest_id: String,
    link_key: String,
    link: SharedLink,
}

impl RegistryActor {
    pub(super) fn notify_controllers(&mut self) {
        if self.notify_in_flight {
            return;
        }
        let now = Instant::now();

        let mut links = Vec::new();
        let mut faults = Vec::new();
        let mut orphaned = Vec::new();
        let mut resync = Vec::new();

        for dest in self.destinations.values() {
            for state in dest.link_states.values() {
                if state.status == LinkStatus::Established && !state.ctrls_notified {
                    match self.registry.get_link(&state.link_key) {
                        Some(link) if !link.is_closed() && link.id() == state.link_id => {
                            links.push(PendingLink {
                                dest_id: dest.id.clone(),
                                link_key: state.link_key.clone(),
                                link,
                            });
                        }
                        // replaced, and the new link's status update is still queued
                        Some(link) if !link.is_closed() => {
                            resync.push((dest.id.clone(), state.link_key.clone(), link));
                        }
                        _ => orphaned.push((dest.id.clone(), state.link_key.clone())),
                    }
                }
                for fault in &state.link_faults {
                    faults.push((dest.id.clone(), state.link_key.clone(), fault.clone()));
                }
            }
        }

        for (dest_id, link_key, link) in resync {
            if let Some(state) = self
                .destinations
                .get_mut(&dest_id)
                .and_then(|d| d.link_states.get_mut(&link_key))
            {
                tracing::debug!(dest = %dest_id, link_key, link_id = link.id(), "link state behind its live link, resyncing");
                state.link_id = link.id().to_string();
                state.iteration = link.iteration();
            }
        }

        for (dest_id, link_key) in orphaned {
            tracing::warn!(dest = %dest_id, link_key, "established link state has no live link, rescheduling");
            self.update_link_state(&dest_id, &link_key, LinkStatus::DialFailed, now);
        }

        if links.is_empty() && faults.is_empty() {
            return;
        }

        let config = self.registry.config();
        let task = send_notifications(
            self.registry.clone(),
            self.registry.env().ctrls.get_all(),
            links,
            faults,
            config.notify_send_timeout(),
            config.fault_contact_window(),
        );
        match self.registry.env().rate_limiter_pool.queue_or_error(task.boxed()) {
            Ok(()) => self.notify_in_flight = true,
            Err(e) => tracing::warn!(error = %e, "unable to queue controller notifications"),
        }
    }

    pub(super) fn notifications_sent(&mut self, report: NotifyReport) {
        self.notify_in_flight = false;

        for (dest_id, link_key, link_id) in &report.links {
            if let Some(state) = self
                .destinations
                .get_mut(dest_id)
                .and_then(|d| d.link_states.get_mut(link_key))
            {
                if state.status == LinkStatus::Established && &state.link_id == link_id {
                    state.ctrls_notified = true;
                }
            }
        }

        for (dest_id, link_key, fault) in &report.faults {
            if let Some(state) = self
                .destinations
                .get_mut(dest_id)
                .and_then(|d| d.link_states.get_mut(link_key))
            {
                state.link_faults.retain(|f| f != fault);
            }
        }

        tracing::debug!(
            links = report.links.len(),
            faults = report.faults.len(),
            "controller notifications delivered"
        );
    }
}

async fn send_notifications(
    registry: LinkRegistry,
    ctrls: Vec<SharedCtrl>,
    links: Vec<PendingLink>,
    faults: Vec<(String, String, Fault)>,
    send_timeout: Duration,
    contact_window: Duration,
) {
    let mut report = NotifyReport::default();

    let link_recipients: Vec<&SharedCtrl> = ctrls.iter().filter(|c| c.is_connected()).collect();
    if !links.is_empty() && !link_recipients.is_empty() {
        let sends = link_recipients.iter().map(|ctrl| {
            let single_source = ctrl.has_capability(Capability::SingleRouterLinkSource);
            let subset: Vec<usize> = links
                .iter()
                .enumerate()
                .filter(|(_, p)| p.link.is_dialed() || !single_source)
                .map(|(i, _)| i)
                .collect();
            let msg = CtrlMessage::RouterLinks(RouterLinks {
                links: subset.iter().map(|&i| router_link(&links[i].link)).collect(),
            });
            async move {
                if subset.is_empty() {
                    return (subset, true);
                }
                let ok = send(ctrl, msg, send_timeout).await;
                (subset, ok)
            }
        });

        let mut failed = vec![false; links.len()];
        for (subset, ok) in join_all(sends).await {
            if !ok {
                for i in subset {
                    failed[i] = true;
                }
            }
        }
        for (pending, failed) in links.iter().zip(failed) {
            if !failed {
                report.links.push((
                    pending.dest_id.clone(),
                    pending.link_key.clone(),
                    pending.link.id().to_string(),
                ));
            }
        }
    }

    let fault_recipients: Vec<&SharedCtrl> = ctrls
        .iter()
        .filter(|c| c.is_connected() || c.time_since_last_contact() < contact_window)
        .collect();
    if !faults.is_empty() && !fault_recipients.is_empty() {
        for (dest_id, link_key, fault) in faults {
            let sends = fault_recipients
                .iter()
                .map(|ctrl| send(ctrl, CtrlMessage::Fault(fault.clone()), send_timeout));
            if join_all(sends).await.into_iter().all(|ok| ok) {
                tracing::info!(link_id = %fault.id, iteration = fault.iteration, "link fault reported");
                report.faults.push((dest_id, link_key, fault));
            }
        }
    }

    registry.send(Command::NotificationsSent { report });
}

async fn send(ctrl: &SharedCtrl, msg: CtrlMessage, send_timeout: Duration) -> bool {
    match tokio::time::timeout(send_timeout, ctrl.send(msg, send_timeout)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(ctrl_id = ctrl.id(), error = %e, "controller notification failed");
            false
        }
        Err(_) => {
            tracing::warn!(ctrl_id = ctrl.id(), "controller notification timed out");
            false
        }
    }
}
