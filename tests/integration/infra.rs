//! Mock transport and control plane for driving a real `LinkRegistry`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use meshlink_core::{BackoffConfig, CtrlMessage, Fault, Listener, RegistryConfig, RouterLink};
use meshlink_services::{
    Capability, CloseNotify, ControllerSet, CtrlChannel, CtrlError, DialError, DialTarget, Dialer,
    LinkError, LinkRegistry, LinkStateDetail, LinksInspectResult, RegistryEnv, SharedCtrl,
    SharedDialer, SharedLink, UsageRegistry, WorkerPool, Xlink,
};

// ── MockLink ──────────────────────────────────────────────────────────────────

pub struct MockLink {
    pub id: String,
    pub key: String,
    pub dest: String,
    pub dialed: bool,
    pub iteration: u32,
    closed: AtomicBool,
    duplicates: AtomicU32,
    close_calls: AtomicU32,
}

impl MockLink {
    pub fn new(id: &str, key: &str, dest: &str, dialed: bool) -> Arc<Self> {
        Self::with_iteration(id, key, dest, dialed, 1)
    }

    pub fn with_iteration(id: &str, key: &str, dest: &str, dialed: bool, iteration: u32) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            key: key.to_string(),
            dest: dest.to_string(),
            dialed,
            iteration,
            closed: AtomicBool::new(false),
            duplicates: AtomicU32::new(0),
            close_calls: AtomicU32::new(0),
        })
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Xlink for MockLink {
    fn id(&self) -> &str {
        &self.id
    }
    fn key(&self) -> &str {
        &self.key
    }
    fn close(&self) -> Result<(), LinkError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(LinkError::AlreadyClosed(self.id.clone()));
        }
        Ok(())
    }
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
    fn is_dialed(&self) -> bool {
        self.dialed
    }
    fn iteration(&self) -> u32 {
        self.iteration
    }
    fn destination_id(&self) -> &str {
        &self.dest
    }
    fn dest_version(&self) -> &str {
        "v1.0.0"
    }
    fn link_protocol(&self) -> &str {
        "tls"
    }
    fn dial_address(&self) -> &str {
        "1.2.3.4:999"
    }
    fn duplicates_rejected(&self) -> u32 {
        self.duplicates.fetch_add(1, Ordering::SeqCst) + 1
    }
}

pub fn shared(link: &Arc<MockLink>) -> SharedLink {
    link.clone()
}

// ── MockDialer ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialScript {
    Succeed,
    Fail,
}

/// Dialer with scripted results. Once the script runs out every dial
/// uses `fallback`. With a gate, each dial waits for one permit first.
pub struct MockDialer {
    groups: Vec<String>,
    binding: String,
    healthy: BackoffConfig,
    unhealthy: BackoffConfig,
    script: Mutex<VecDeque<DialScript>>,
    fallback: DialScript,
    gate: Option<Arc<Semaphore>>,
    pub targets: Mutex<Vec<DialTarget>>,
    pub links: Mutex<Vec<Arc<MockLink>>>,
}

impl MockDialer {
    pub fn new(fallback: DialScript) -> Self {
        Self {
            groups: vec!["default".to_string()],
            binding: String::new(),
            healthy: BackoffConfig::healthy(),
            unhealthy: BackoffConfig::unhealthy(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            gate: None,
            targets: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
        }
    }

    pub fn scripted(script: &[DialScript], fallback: DialScript) -> Self {
        let dialer = Self::new(fallback);
        dialer.script.lock().extend(script.iter().copied());
        dialer
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn dial_count(&self) -> usize {
        self.targets.lock().len()
    }

    pub fn last_link(&self) -> Option<Arc<MockLink>> {
        self.links.lock().last().cloned()
    }
}

#[async_trait]
impl Dialer for MockDialer {
    fn groups(&self) -> &[String] {
        &self.groups
    }
    fn binding(&self) -> &str {
        &self.binding
    }
    fn healthy_backoff(&self) -> &BackoffConfig {
        &self.healthy
    }
    fn unhealthy_backoff(&self) -> &BackoffConfig {
        &self.unhealthy
    }

    async fn dial(&self, target: DialTarget) -> Result<SharedLink, DialError> {
        self.targets.lock().push(target.clone());
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let step = self.script.lock().pop_front().unwrap_or(self.fallback);
        match step {
            DialScript::Succeed => {
                let link = MockLink::with_iteration(
                    &target.link_id,
                    &target.link_key,
                    &target.router_id,
                    true,
                    target.iteration,
                );
                self.links.lock().push(link.clone());
                let link: SharedLink = link;
                Ok(link)
            }
            DialScript::Fail => Err(DialError::Timeout(target.address)),
        }
    }
}

// ── MockCtrl ──────────────────────────────────────────────────────────────────

pub struct MockCtrl {
    id: String,
    version: String,
    single_source: bool,
    connected: AtomicBool,
    failing: AtomicBool,
    stalled: AtomicBool,
    pub messages: Mutex<Vec<CtrlMessage>>,
}

impl MockCtrl {
    pub fn new(id: &str, version: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            version: version.to_string(),
            single_source: false,
            connected: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            messages: Mutex::new(Vec::new()),
        })
    }

    /// Controller that only wants links from the dialing side.
    pub fn single_source(id: &str, version: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            version: version.to_string(),
            single_source: true,
            connected: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            messages: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Sends hang until the caller's timeout gives up on them.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Every link announced to this controller, in order.
    pub fn announced(&self) -> Vec<RouterLink> {
        self.messages
            .lock()
            .iter()
            .filter_map(|m| match m {
                CtrlMessage::RouterLinks(r) => Some(r.links.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn faults(&self) -> Vec<Fault> {
        self.messages
            .lock()
            .iter()
            .filter_map(|m| match m {
                CtrlMessage::Fault(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl CtrlChannel for MockCtrl {
    fn id(&self) -> &str {
        &self.id
    }
    fn version(&self) -> &str {
        &self.version
    }
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
    fn time_since_last_contact(&self) -> Duration {
        if self.is_connected() {
            Duration::ZERO
        } else {
            Duration::from_secs(3600)
        }
    }
    fn has_capability(&self, capability: Capability) -> bool {
        match capability {
            Capability::SingleRouterLinkSource => self.single_source,
        }
    }

    async fn send(&self, msg: CtrlMessage, _timeout: Duration) -> Result<(), CtrlError> {
        if !self.is_connected() {
            return Err(CtrlError::NotConnected(self.id.clone()));
        }
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CtrlError::SendFailed {
                ctrl_id: self.id.clone(),
                reason: "injected failure".to_string(),
            });
        }
        self.messages.lock().push(msg);
        Ok(())
    }
}

pub fn as_ctrl(ctrl: &Arc<MockCtrl>) -> SharedCtrl {
    ctrl.clone()
}

// ── Harness ───────────────────────────────────────────────────────────────────

pub const DEST: &str = "r2";
pub const DEFAULT_KEY: &str = "default->tls:r2->default";

pub struct Harness {
    pub registry: LinkRegistry,
    pub ctrls: Arc<ControllerSet>,
    pub dialer: Arc<MockDialer>,
    pub metrics: Arc<UsageRegistry>,
    pub close: CloseNotify,
}

impl Harness {
    pub fn new(dialer: MockDialer) -> Self {
        Self::build(dialer, RegistryConfig::default(), WorkerPool::new("link.dialer", 4, 16))
    }

    pub fn build(dialer: MockDialer, config: RegistryConfig, dialer_pool: WorkerPool) -> Self {
        let ctrls = Arc::new(ControllerSet::new(Duration::from_secs(10)));
        let dialer = Arc::new(dialer);
        let metrics = Arc::new(UsageRegistry::new());
        let close = CloseNotify::new();

        let registry = LinkRegistry::new(RegistryEnv {
            router_id: "r1".to_string(),
            ctrls: ctrls.clone(),
            dialers: vec![dialer.clone() as SharedDialer],
            dialer_pool: Arc::new(dialer_pool),
            rate_limiter_pool: Arc::new(WorkerPool::new("link.rate_limiter", 2, 8)),
            metrics: metrics.clone(),
            close: close.clone(),
            config,
        });

        Self {
            registry,
            ctrls,
            dialer,
            metrics,
            close,
        }
    }

    pub fn add_ctrl(&self, ctrl: &Arc<MockCtrl>) {
        self.ctrls.add(as_ctrl(ctrl));
    }

    pub async fn inspect(&self) -> LinksInspectResult {
        self.registry.inspect(Duration::from_secs(1)).await
    }

    /// The single link state of `DEST`, if any.
    pub async fn state(&self) -> Option<LinkStateDetail> {
        self.inspect()
            .await
            .destination(DEST)
            .and_then(|d| d.link_states.first().cloned())
    }
}

pub fn tls_listener(address: &str) -> Listener {
    Listener {
        address: address.to_string(),
        protocol: "tls".to_string(),
        groups: vec!["default".to_string()],
        local_binding: String::new(),
    }
}

/// Let every spawned task run until idle.
/// With paused time this also fires any timer that is due.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
