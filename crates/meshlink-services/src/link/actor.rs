//! Registry actor — the only writer of destinations and the retry heap.

use std::collections::HashMap;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::events::{Command, DialOutcome};
use super::heap::RetryHeap;
use super::registry::LinkRegistry;
use super::state::{LinkDest, LinkStatus};
use crate::xlink::{DialTarget, SharedDialer};

pub(crate) struct RegistryActor {
    pub(super) registry: LinkRegistry,
    pub(super) destinations: HashMap<String, LinkDest>,
    pub(super) heap: RetryHeap,
    pub(super) notify_in_flight: bool,
    commands: mpsc::UnboundedReceiver<Command>,
    notify_rx: mpsc::Receiver<()>,
}

impl RegistryActor {
    pub(crate) fn new(
        registry: LinkRegistry,
        commands: mpsc::UnboundedReceiver<Command>,
        notify_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            destinations: HashMap::new(),
            heap: RetryHeap::new(),
            notify_in_flight: false,
            commands,
            notify_rx,
        }
    }

    pub(crate) async fn run(mut self) {
        let config = self.registry.config().clone();
        let close = self.registry.env().close.clone();

        let mut queue_check = tokio::time::interval(config.queue_check_interval());
        queue_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut full_scan = tokio::time::interval(config.full_scan_interval());
        full_scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // interval fires immediately; start the scan clock one period out
        full_scan.tick().await;

        loop {
            tokio::select! {
                Some(cmd) = self.commands.recv() => self.handle(cmd),
                Some(()) = self.notify_rx.recv() => self.notify_controllers(),
                _ = queue_check.tick() => {
                    self.evaluate_queue();
                    self.notify_controllers();
                }
                _ = full_scan.tick() => self.evaluate_destinations(),
                _ = close.closed() => break,
            }
        }

        let mut drained = 0usize;
        while self.commands.try_recv().is_ok() {
            drained += 1;
        }
        tracing::info!(drained, "link registry actor stopped");
    }

    // ── Scheduling ────────────────────────────────────────────────────────────

    /// Dial everything whose retry time has come.
    pub(super) fn evaluate_queue(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.heap.pop_due(now) {
            self.evaluate_link_state(&entry.dest_id, &entry.link_key, now);
        }
    }

    /// Full scan: prune dead destinations, fix drift, dial what's due.
    pub(super) fn evaluate_destinations(&mut self) {
        let now = Instant::now();
        let gc_age = self.registry.config().dest_gc_age();

        self.destinations.retain(|id, dest| {
            let prune = dest.is_prunable(now, gc_age);
            if prune {
                tracing::info!(dest = %id, healthy = dest.healthy, "pruning link destination");
            }
            !prune
        });

        let mut keys = Vec::new();
        let mut missing = Vec::new();
        for dest in self.destinations.values() {
            for state in dest.link_states.values() {
                let key = (dest.id.clone(), state.link_key.clone());
                if state.status == LinkStatus::Established
                    && !self
                        .registry
                        .get_link(&state.link_key)
                        .is_some_and(|l| !l.is_closed())
                {
                    missing.push(key);
                } else {
                    keys.push(key);
                }
            }
        }

        for (dest_id, link_key) in missing {
            tracing::warn!(dest = %dest_id, link_key, "established link state has no live link, rescheduling");
            self.update_link_state(&dest_id, &link_key, LinkStatus::DialFailed, now);
        }
        for (dest_id, link_key) in keys {
            self.evaluate_link_state(&dest_id, &link_key, now);
        }
    }

    /// Queue a dial for this state if it is eligible.
    pub(super) fn evaluate_link_state(&mut self, dest_id: &str, link_key: &str, now: Instant) {
        let Some(dest) = self.destinations.get_mut(dest_id) else {
            return;
        };
        let Some(state) = dest.link_states.get_mut(link_key) else {
            return;
        };
        if !state.could_dial(now) {
            return;
        }

        let target = state.start_dial(&dest.id, &dest.version);
        let dialer = state.dialer.clone();
        tracing::debug!(
            dest = dest_id,
            link_key,
            link_id = %target.link_id,
            attempt = state.dial_attempts,
            "queueing link dial"
        );

        let task = dial(self.registry.clone(), dialer, target, dest_id.to_string());
        if let Err(e) = self.registry.env().dialer_pool.queue_or_error(task.boxed()) {
            tracing::error!(dest = dest_id, link_key, error = %e, "unable to queue link dial");
            state.active_dial = None;
            self.update_link_state(dest_id, link_key, LinkStatus::QueueFailed, now);
        }
    }

    /// Apply a status decided by the actor. Failures go through backoff, and
    /// bounded states are dropped once their dial budget is spent.
    pub(super) fn update_link_state(
        &mut self,
        dest_id: &str,
        link_key: &str,
        status: LinkStatus,
        now: Instant,
    ) {
        let Some(dest) = self.destinations.get_mut(dest_id) else {
            return;
        };
        let healthy = dest.healthy;
        let Some(state) = dest.link_states.get_mut(link_key) else {
            return;
        };
        if state.status == LinkStatus::DestRemoved {
            return;
        }

        state.status = status;
        if !status.is_failure() {
            return;
        }

        if state.consume_allowed_dial() {
            tracing::info!(dest = dest_id, link_key, "dial budget exhausted, dropping link state");
            dest.link_states.remove(link_key);
            return;
        }

        state.apply_backoff(healthy, now);
        tracing::info!(
            dest = dest_id,
            link_key,
            %status,
            retry_delay_ms = state.retry_delay.as_millis() as u64,
            "link dial failed, backing off"
        );
        self.heap.push(state.next_dial, dest_id, link_key);
    }
}

/// Dial worker. Runs on the dialer pool and reports back as a command.
async fn dial(registry: LinkRegistry, dialer: SharedDialer, target: DialTarget, dest_id: String) {
    let outcome = match registry.get_link(&target.link_key) {
        Some(link) if !link.is_closed() => {
            tracing::warn!(link_key = %target.link_key, "link already present, but link state still dialing");
            DialOutcome::AlreadyLinked
        }
        _ => match dialer.dial(target.clone()).await {
            Ok(link) => {
                if registry.dial_succeeded(link).is_kept() {
                    DialOutcome::Linked
                } else {
                    DialOutcome::AlreadyLinked
                }
            }
            Err(e) => {
                tracing::error!(link_key = %target.link_key, address = %target.address, error = %e, "error dialing link");
                DialOutcome::Failed
            }
        },
    };

    registry.send(Command::DialCompleted {
        dest_id,
        link_key: target.link_key,
        link_id: target.link_id,
        outcome,
    });
}
