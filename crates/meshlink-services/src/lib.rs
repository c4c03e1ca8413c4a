//! meshlink-services — the link registry and the collaborators it runs on.
//!
//! The registry itself lives in [`link`]. Everything else here is the
//! boundary it talks through: link and dialer traits, controller channels,
//! bounded worker pools, the metrics registry, and the shared close signal.

pub mod ctrl;
pub mod error;
pub mod inspect;
pub mod link;
pub mod metrics;
pub mod pool;
pub mod shutdown;
pub mod xlink;

pub use ctrl::{Capability, ControllerSet, CtrlChannel, CtrlHandler, NetworkControllers, SharedCtrl};
pub use error::{CtrlError, DialError, LinkError, PoolError, RegistryError};
pub use inspect::{LinkDestDetail, LinkInspectDetail, LinkStateDetail, LinksInspectResult};
pub use link::{ApplyOutcome, LinkRegistry, LinkStatus, RegistryEnv};
pub use metrics::{MetricsRegistry, UsageRegistry};
pub use pool::{Pool, WorkerPool};
pub use shutdown::CloseNotify;
pub use xlink::{DialTarget, Dialer, SharedDialer, SharedLink, Xlink};
