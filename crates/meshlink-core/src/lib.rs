//! meshlink-core — shared configuration, controller wire messages, and
//! version capability checks. All other meshlink crates depend on this one.

pub mod config;
pub mod version;
pub mod wire;

pub use config::{BackoffConfig, ConfigError, MeshlinkConfig, RegistryConfig};
pub use version::{Version, VersionError};
pub use wire::{CtrlMessage, Dial, Fault, FaultSubject, Listener, RouterLink, RouterLinks};
