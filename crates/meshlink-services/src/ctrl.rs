//! Controller channels — the registry's view of the control plane.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use meshlink_core::version::requires_legacy_link_mgmt;
use meshlink_core::CtrlMessage;

use crate::error::{CtrlError, RegistryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Controller only wants link announcements from the dialing side.
    SingleRouterLinkSource,
}

/// One connection to a controller.
#[async_trait]
pub trait CtrlChannel: Send + Sync {
    fn id(&self) -> &str;
    fn version(&self) -> &str;
    fn is_connected(&self) -> bool;
    fn time_since_last_contact(&self) -> Duration;
    fn has_capability(&self, capability: Capability) -> bool;

    /// Send and wait for acknowledgement, bounded by `timeout`.
    async fn send(&self, msg: CtrlMessage, timeout: Duration) -> Result<(), CtrlError>;
}

pub type SharedCtrl = Arc<dyn CtrlChannel>;

pub trait NetworkControllers: Send + Sync {
    fn get_all(&self) -> Vec<SharedCtrl>;
    /// Any currently connected channel.
    fn any_channel(&self) -> Option<SharedCtrl>;
    fn default_request_timeout(&self) -> Duration;
}

/// True if any known controller predates link management (0.30.0).
pub fn use_legacy_link_mgmt(ctrls: &dyn NetworkControllers) -> bool {
    ctrls
        .get_all()
        .iter()
        .any(|ctrl| requires_legacy_link_mgmt(ctrl.version()))
}

/// Concurrent set of controller channels keyed by controller id.
pub struct ControllerSet {
    ctrls: DashMap<String, SharedCtrl>,
    default_timeout: Duration,
}

impl ControllerSet {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            ctrls: DashMap::new(),
            default_timeout,
        }
    }

    pub fn add(&self, ctrl: SharedCtrl) {
        tracing::info!(ctrl_id = ctrl.id(), version = ctrl.version(), "controller added");
        self.ctrls.insert(ctrl.id().to_string(), ctrl);
    }

    pub fn remove(&self, ctrl_id: &str) -> Option<SharedCtrl> {
        self.ctrls.remove(ctrl_id).map(|(_, ctrl)| ctrl)
    }

    pub fn len(&self) -> usize {
        self.ctrls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ctrls.is_empty()
    }
}

impl NetworkControllers for ControllerSet {
    fn get_all(&self) -> Vec<SharedCtrl> {
        self.ctrls.iter().map(|e| e.value().clone()).collect()
    }

    fn any_channel(&self) -> Option<SharedCtrl> {
        self.ctrls
            .iter()
            .find(|e| e.value().is_connected())
            .map(|e| e.value().clone())
    }

    fn default_request_timeout(&self) -> Duration {
        self.default_timeout
    }
}

/// Lifecycle hooks the router framework drives on control-plane handlers.
pub trait CtrlHandler {
    fn load_config(&self, config: &toml::Table) -> Result<(), RegistryError>;
    fn bind_channel(&self, ctrl: &SharedCtrl) -> Result<(), RegistryError>;
    fn enabled(&self) -> bool;
    fn run(&self) -> Result<(), RegistryError>;
    /// A controller came back; bring it up to date.
    fn notify_of_reconnect(&self, ctrl: SharedCtrl);
}
